//! files_part.rs – zip container, relationships and part paths.

use crate::{XlsxEditor, locate_sheet, read_part::parse_shared_strings};
use ::zip as zip_crate;
use anyhow::{Context, Result};
use roxmltree::Document;
use std::{
    collections::HashSet,
    fs,
    io::{Cursor, Read, Write},
    path::Path,
};
use tracing::{debug, info};

pub(crate) const WORKBOOK_PART: &str = "xl/workbook.xml";
pub(crate) const STYLES_PART: &str = "xl/styles.xml";

const REL_SHARED_STRINGS: &str = "/sharedStrings";

/* ============================== PACKAGE =================================== */

/// Source archive plus the parts rewritten in memory.
///
/// Entries that were never overridden are copied raw on save, so their
/// compressed bytes stay identical to the input.
pub(crate) struct Package {
    zip: zip_crate::ZipArchive<Cursor<Vec<u8>>>,
    new_files: Vec<(String, Vec<u8>)>,
}

impl Package {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let zip = zip_crate::ZipArchive::new(Cursor::new(bytes))
            .context("input is not a zip container")?;
        Ok(Self {
            zip,
            new_files: Vec::new(),
        })
    }

    /// Current content of `name`, in-memory edits first.
    pub fn read_part(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        if let Some((_, content)) = self.new_files.iter().find(|(p, _)| p == name) {
            return Ok(Some(content.clone()));
        }
        let mut file = match self.zip.by_name(name) {
            Ok(f) => f,
            Err(zip_crate::result::ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {name}")),
        };
        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)?;
        Ok(Some(buf))
    }

    pub fn part(&mut self, name: &str) -> Result<Vec<u8>> {
        self.read_part(name)?
            .with_context(|| format!("{name} not found"))
    }

    pub fn set_part(&mut self, name: &str, content: Vec<u8>) {
        if let Some((_, c)) = self.new_files.iter_mut().find(|(p, _)| p == name) {
            *c = content;
        } else {
            self.new_files.push((name.to_owned(), content));
        }
    }

    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut zout = zip_crate::ZipWriter::new(Cursor::new(Vec::new()));
        let opt: zip_crate::write::FileOptions<'_, ()> = zip_crate::write::FileOptions::default()
            .compression_method(zip_crate::CompressionMethod::Deflated);

        let mut written: HashSet<String> = HashSet::new();
        for i in 0..self.zip.len() {
            let file = self.zip.by_index_raw(i)?;
            let name = file.name().to_owned();

            if let Some((_, content)) = self.new_files.iter().find(|(p, _)| *p == name) {
                zout.start_file(name.as_str(), opt)?;
                zout.write_all(content)?;
            } else {
                zout.raw_copy_file(file)?;
            }
            written.insert(name);
        }

        for (path, content) in &self.new_files {
            if !written.contains(path) {
                zout.start_file(path.as_str(), opt)?;
                zout.write_all(content)?;
            }
        }

        Ok(zout.finish()?.into_inner())
    }
}

/* ============================ RELATIONSHIPS =============================== */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub type_: String,
    pub target: String,
}

pub(crate) fn parse_relationships(xml: &[u8], part_name: &str) -> Result<Vec<Relationship>> {
    let xml = std::str::from_utf8(xml).with_context(|| format!("{part_name} is not UTF-8"))?;
    let doc = Document::parse(xml).with_context(|| format!("{part_name} is malformed"))?;

    Ok(doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "Relationship")
        .filter_map(|node| {
            Some(Relationship {
                id: node.attribute("Id")?.to_owned(),
                type_: node.attribute("Type").unwrap_or_default().to_owned(),
                target: node.attribute("Target").unwrap_or_default().to_owned(),
            })
        })
        .collect())
}

/// Relationships of `part`; an absent `.rels` part means none.
pub(crate) fn part_relationships(pkg: &mut Package, part: &str) -> Result<Vec<Relationship>> {
    let rels_path = rels_for_part(part);
    match pkg.read_part(&rels_path)? {
        Some(xml) => parse_relationships(&xml, &rels_path),
        None => Ok(Vec::new()),
    }
}

pub(crate) fn rels_for_part(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file_name)) => format!("{dir}/_rels/{file_name}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

pub(crate) fn resolve_target(source_part: &str, target: &str) -> String {
    let target = target.split('#').next().unwrap_or(target);
    if target.is_empty() {
        return normalize(source_part);
    }
    if let Some(target) = target.strip_prefix('/') {
        return normalize(target);
    }

    let base_dir = source_part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    normalize(&format!("{base_dir}/{target}"))
}

fn normalize(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out.join("/")
}

/* =============================== SHEETS =================================== */

/// One `<sheet>` of `workbook.xml`, attribute values unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetEntry {
    pub name: String,
    pub rel_id: String,
    pub visible: bool,
}

pub(crate) fn workbook_sheets(workbook_xml: &[u8]) -> Result<Vec<SheetEntry>> {
    let xml = std::str::from_utf8(workbook_xml).context("workbook.xml is not UTF-8")?;
    let doc = Document::parse(xml).context("workbook.xml is malformed")?;

    Ok(doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "sheet")
        .map(|node| SheetEntry {
            name: node.attribute("name").unwrap_or_default().to_owned(),
            // `r:id`, whatever prefix the producer bound the namespace to
            rel_id: node
                .attributes()
                .find(|a| a.name() == "id" && a.namespace().is_some())
                .map(|a| a.value().to_owned())
                .unwrap_or_default(),
            visible: node.attribute("state").is_none_or(|s| s == "visible"),
        })
        .collect())
}

/// Sheet names in workbook order.
pub fn scan_bytes(bytes: &[u8]) -> Result<Vec<String>> {
    let mut pkg = Package::from_bytes(bytes.to_vec())?;
    let wb_xml = pkg.part(WORKBOOK_PART)?;
    Ok(workbook_sheets(&wb_xml)?.into_iter().map(|s| s.name).collect())
}

pub fn scan<P: AsRef<Path>>(src: P) -> Result<Vec<String>> {
    let bytes = fs::read(src.as_ref())
        .with_context(|| format!("reading {}", src.as_ref().display()))?;
    scan_bytes(&bytes)
}

/* ============================ OPEN / WRITE ================================ */

/// Work with files
impl XlsxEditor {
    /// Opens `sheet_name`, falling back to the first visible sheet.
    pub fn open_bytes(bytes: Vec<u8>, sheet_name: &str) -> Result<Self> {
        let mut package = Package::from_bytes(bytes)?;

        // ── workbook.xml ─────────────────────────────────────────────
        let workbook_xml = package.part(WORKBOOK_PART)?;
        let sheets = workbook_sheets(&workbook_xml)?;
        let entry = locate_sheet(&sheets, sheet_name)
            .context("workbook.xml lists no sheets")?
            .clone();
        if entry.name != sheet_name {
            info!(requested = sheet_name, using = %entry.name, "sheet not found, falling back");
        }

        // ── sheet#.xml ───────────────────────────────────────────────
        let wb_rels = part_relationships(&mut package, WORKBOOK_PART)?;
        let sheet_rel = wb_rels
            .iter()
            .find(|r| r.id == entry.rel_id)
            .with_context(|| format!("relationship {} for sheet `{}` not found", entry.rel_id, entry.name))?;
        let sheet_path = resolve_target(WORKBOOK_PART, &sheet_rel.target);
        let sheet_xml = package.part(&sheet_path)?;

        // ── styles.xml / sharedStrings.xml ───────────────────────────
        let styles_xml = package.part(STYLES_PART)?;
        let shared_strings = match wb_rels.iter().find(|r| r.type_.ends_with(REL_SHARED_STRINGS)) {
            Some(rel) => {
                let path = resolve_target(WORKBOOK_PART, &rel.target);
                match package.read_part(&path)? {
                    Some(xml) => parse_shared_strings(&xml)?,
                    None => Vec::new(),
                }
            }
            None => Vec::new(),
        };

        debug!(sheet = %entry.name, path = %sheet_path, "sheet opened");
        Ok(Self {
            package,
            sheet_name: entry.name,
            sheet_path,
            sheet_xml,
            styles_xml,
            workbook_xml,
            shared_strings,
            styles_dirty: false,
            workbook_dirty: false,
        })
    }

    pub fn open<P: AsRef<Path>>(src: P, sheet_name: &str) -> Result<Self> {
        let bytes = fs::read(src.as_ref())
            .with_context(|| format!("reading {}", src.as_ref().display()))?;
        Self::open_bytes(bytes, sheet_name)
    }

    /// Serializes the workbook; consumes the editor.
    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        self.package.set_part(&self.sheet_path, self.sheet_xml);
        if self.styles_dirty {
            self.package.set_part(STYLES_PART, self.styles_xml);
        }
        if self.workbook_dirty {
            self.package.set_part(WORKBOOK_PART, self.workbook_xml);
        }
        self.package.to_bytes()
    }
}
