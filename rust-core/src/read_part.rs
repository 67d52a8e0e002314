//! read_part.rs – read-only view of `<sheetData>` and `sharedStrings.xml`.

use anyhow::{Context, Result};
use roxmltree::{Document, Node};
use std::{collections::BTreeMap, ops::Range};

/// Value of one cell, with shared strings already resolved.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    Error(String),
    Formula {
        text: String,
        cached: Option<Box<CellValue>>,
    },
}

impl CellValue {
    /// `None` and `""` both count as blank; whitespace does not.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Text a user would see, used when a cell has to be read as a key.
    pub fn display_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Number(n) => Some(n.to_string()),
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_owned()),
            CellValue::Error(e) => Some(e.clone()),
            CellValue::Formula { cached, .. } => cached.as_deref().and_then(CellValue::display_text),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CellData {
    pub style: Option<u32>,
    pub value: CellValue,
    pub(crate) span: Range<usize>,
}

#[derive(Debug, Clone)]
pub struct RowData {
    pub index: u32,
    /// `ht` exactly as written in the file.
    pub height: Option<String>,
    pub custom_height: bool,
    pub cells: BTreeMap<u32, CellData>,
    pub(crate) span: Range<usize>,
}

/// Parsed `<sheetData>`; byte spans point into the XML it was parsed from.
#[derive(Debug, Clone)]
pub struct SheetData {
    pub rows: BTreeMap<u32, RowData>,
    pub(crate) span: Range<usize>,
    pub(crate) self_closing: bool,
}

static EMPTY: CellValue = CellValue::Empty;

impl SheetData {
    pub fn parse(sheet_xml: &[u8], shared: &[String]) -> Result<Self> {
        let text = std::str::from_utf8(sheet_xml).context("worksheet is not UTF-8")?;
        let doc = Document::parse(text).context("worksheet XML is malformed")?;
        let sheet_data = doc
            .descendants()
            .find(|n| n.is_element() && n.tag_name().name() == "sheetData")
            .context("<sheetData> not found")?;

        let span = sheet_data.range();
        let self_closing = text[span.clone()].ends_with("/>");

        let mut rows = BTreeMap::new();
        let mut prev_row = 0u32;
        for row in elements(sheet_data, "row") {
            let index = row
                .attribute("r")
                .and_then(|r| r.parse::<u32>().ok())
                .unwrap_or(prev_row + 1);
            prev_row = index;

            let mut cells = BTreeMap::new();
            let mut prev_col = 0u32;
            for c in elements(row, "c") {
                let col = c
                    .attribute("r")
                    .and_then(parse_cell_ref)
                    .map(|(col, _)| col)
                    .unwrap_or(prev_col + 1);
                prev_col = col;
                cells.insert(
                    col,
                    CellData {
                        style: c.attribute("s").and_then(|s| s.parse().ok()),
                        value: cell_value(c, shared),
                        span: c.range(),
                    },
                );
            }

            rows.insert(
                index,
                RowData {
                    index,
                    height: row.attribute("ht").map(str::to_owned),
                    custom_height: row.attribute("customHeight").is_some_and(xml_bool),
                    cells,
                    span: row.range(),
                },
            );
        }

        Ok(Self {
            rows,
            span,
            self_closing,
        })
    }

    pub fn cell(&self, row: u32, col: u32) -> Option<&CellData> {
        self.rows.get(&row)?.cells.get(&col)
    }

    pub fn value(&self, row: u32, col: u32) -> &CellValue {
        self.cell(row, col).map_or(&EMPTY, |c| &c.value)
    }

    /// Highest row (≥ 2) whose cell in `col` is not blank; 1 when there is none.
    pub fn last_data_row(&self, col: u32) -> u32 {
        self.rows
            .range(2..)
            .rev()
            .find(|(_, row)| row.cells.get(&col).is_some_and(|c| !c.value.is_blank()))
            .map_or(1, |(&r, _)| r)
    }
}

pub fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let text = std::str::from_utf8(xml).context("sharedStrings.xml is not UTF-8")?;
    let doc = Document::parse(text).context("sharedStrings.xml is malformed")?;
    Ok(elements(doc.root_element(), "si").map(rich_text).collect())
}

fn cell_value(c: Node<'_, '_>, shared: &[String]) -> CellValue {
    let kind = c.attribute("t").unwrap_or("n");
    let mut formula = None;
    let mut raw = None;
    let mut inline = None;
    for child in c.children().filter(Node::is_element) {
        match child.tag_name().name() {
            // shared-formula children carry no text of their own
            "f" => formula = child.text().filter(|f| !f.is_empty()).map(str::to_owned),
            "v" => raw = Some(child.text().unwrap_or_default().to_owned()),
            "is" => inline = Some(rich_text(child)),
            _ => {}
        }
    }

    let plain = match (kind, raw) {
        ("inlineStr", _) => inline.map_or(CellValue::Empty, CellValue::Text),
        ("s", Some(v)) => v
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i))
            .map_or(CellValue::Empty, |s| CellValue::Text(s.clone())),
        ("str", Some(v)) => CellValue::Text(v),
        ("b", Some(v)) => CellValue::Bool(xml_bool(v.trim())),
        ("e", Some(v)) => CellValue::Error(v),
        (_, Some(v)) => match v.trim().parse::<f64>() {
            Ok(n) => CellValue::Number(n),
            Err(_) => CellValue::Text(v),
        },
        (_, None) => CellValue::Empty,
    };

    match formula {
        Some(text) => CellValue::Formula {
            text,
            cached: (plain != CellValue::Empty).then(|| Box::new(plain)),
        },
        None => plain,
    }
}

/// Concatenated `<t>` runs, skipping phonetic (`rPh`) runs.
fn rich_text(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "t")
        .filter(|n| !n.ancestors().any(|a| a.tag_name().name() == "rPh"))
        .filter_map(|n| n.text())
        .collect()
}

fn elements<'a, 'input>(
    parent: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    parent
        .children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

pub(crate) fn xml_bool(v: &str) -> bool {
    v == "1" || v == "true"
}

/// `"H12"` → `(8, 12)`; columns are 1-based.
pub fn parse_cell_ref(coord: &str) -> Option<(u32, u32)> {
    let split = coord.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = coord.split_at(split);
    let letters = letters.trim_start_matches('$').trim_end_matches('$');
    if letters.is_empty() || !letters.bytes().all(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    let col = letters
        .bytes()
        .fold(0u32, |acc, b| acc * 26 + (b.to_ascii_uppercase() - b'A' + 1) as u32);
    Some((col, digits.parse().ok()?))
}

/// 1-based column number → letters (`1` → `A`, `27` → `AA`).
pub fn column_name(col: u32) -> String {
    let mut n = col.saturating_sub(1);
    let mut s = String::new();
    loop {
        s.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    s
}
