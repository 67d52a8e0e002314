//! style.rs – cellXfs records, font lookup and xf reuse

use anyhow::{Context, Result, bail};
use quick_xml::{Reader, escape::escape, events::BytesStart, events::Event};
use std::{fmt, str::FromStr};

use crate::{XlsxEditor, bump_count, find_bytes};

/* ========================== ALIGNMENT API ================================= */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HorizAlignment {
    General,
    Left,
    Center,
    Right,
    Fill,
    Justify,
    CenterContinuous,
    Distributed,
}
impl fmt::Display for HorizAlignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HorizAlignment::General => "general",
            HorizAlignment::Left => "left",
            HorizAlignment::Center => "center",
            HorizAlignment::Right => "right",
            HorizAlignment::Fill => "fill",
            HorizAlignment::Justify => "justify",
            HorizAlignment::CenterContinuous => "centerContinuous",
            HorizAlignment::Distributed => "distributed",
        })
    }
}
impl FromStr for HorizAlignment {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "general" => HorizAlignment::General,
            "left" => HorizAlignment::Left,
            "center" => HorizAlignment::Center,
            "right" => HorizAlignment::Right,
            "fill" => HorizAlignment::Fill,
            "justify" => HorizAlignment::Justify,
            "centerContinuous" => HorizAlignment::CenterContinuous,
            "distributed" => HorizAlignment::Distributed,
            _ => bail!("Unknown horizontal alignment: {s}"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VertAlignment {
    Top,
    Center,
    Bottom,
    Justify,
    Distributed,
}
impl fmt::Display for VertAlignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VertAlignment::Top => "top",
            VertAlignment::Center => "center",
            VertAlignment::Bottom => "bottom",
            VertAlignment::Justify => "justify",
            VertAlignment::Distributed => "distributed",
        })
    }
}
impl FromStr for VertAlignment {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "top" => VertAlignment::Top,
            "center" => VertAlignment::Center,
            "bottom" => VertAlignment::Bottom,
            "justify" => VertAlignment::Justify,
            "distributed" => VertAlignment::Distributed,
            _ => bail!("Unknown vertical alignment: {s}"),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignSpec {
    pub horiz: Option<HorizAlignment>,
    pub vert: Option<VertAlignment>,
    pub wrap: bool,
    pub shrink: bool,
    pub indent: Option<u32>,
    pub rotation: Option<u32>,
    /// `readingOrder`, `justifyLastLine`, `relativeIndent` and the like, as read.
    pub other: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectionSpec {
    pub locked: Option<bool>,
    pub hidden: Option<bool>,
}

/* ========================== STYLE RECORD ================================== */

/// One `<xf>` of `cellXfs`, by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleRecord {
    pub number_format: u32,
    pub font: u32,
    pub fill: u32,
    pub border: u32,
    /// `xfId`, the named cell style this one derives from.
    pub parent: u32,
    pub alignment: Option<AlignSpec>,
    pub protection: Option<ProtectionSpec>,
    /// Attributes without a field above (`quotePrefix`, `pivotButton`, ...).
    /// The `apply*` flags are derived from the fields and not kept here.
    pub other: Vec<(String, String)>,
}

impl StyleRecord {
    fn to_xml(&self) -> String {
        let mut xf = format!(
            r#"<xf numFmtId="{}" fontId="{}" fillId="{}" borderId="{}" xfId="{}""#,
            self.number_format, self.font, self.fill, self.border, self.parent
        );
        if self.number_format != 0 {
            xf.push_str(r#" applyNumberFormat="1""#);
        }
        if self.font != 0 {
            xf.push_str(r#" applyFont="1""#);
        }
        if self.fill != 0 {
            xf.push_str(r#" applyFill="1""#);
        }
        if self.border != 0 {
            xf.push_str(r#" applyBorder="1""#);
        }
        if self.alignment.is_some() {
            xf.push_str(r#" applyAlignment="1""#);
        }
        if self.protection.is_some() {
            xf.push_str(r#" applyProtection="1""#);
        }
        push_attrs(&mut xf, &self.other);
        if self.alignment.is_none() && self.protection.is_none() {
            xf.push_str("/>");
            return xf;
        }
        xf.push('>');

        if let Some(al) = &self.alignment {
            xf.push_str("<alignment");
            if let Some(h) = &al.horiz {
                xf.push_str(&format!(r#" horizontal="{h}""#));
            }
            if let Some(v) = &al.vert {
                xf.push_str(&format!(r#" vertical="{v}""#));
            }
            if let Some(r) = al.rotation {
                xf.push_str(&format!(r#" textRotation="{r}""#));
            }
            if al.wrap {
                xf.push_str(r#" wrapText="1""#);
            }
            if let Some(i) = al.indent {
                xf.push_str(&format!(r#" indent="{i}""#));
            }
            if al.shrink {
                xf.push_str(r#" shrinkToFit="1""#);
            }
            push_attrs(&mut xf, &al.other);
            xf.push_str("/>");
        }
        if let Some(p) = &self.protection {
            xf.push_str("<protection");
            if let Some(l) = p.locked {
                xf.push_str(&format!(r#" locked="{}""#, u8::from(l)));
            }
            if let Some(h) = p.hidden {
                xf.push_str(&format!(r#" hidden="{}""#, u8::from(h)));
            }
            xf.push_str("/>");
        }
        xf.push_str("</xf>");
        xf
    }
}

fn push_attrs(xml: &mut String, attrs: &[(String, String)]) {
    for (k, v) in attrs {
        xml.push_str(&format!(r#" {k}="{}""#, escape(v.as_str())));
    }
}

fn attr_pair(key: &[u8], value: &[u8]) -> (String, String) {
    (
        String::from_utf8_lossy(key).into_owned(),
        String::from_utf8_lossy(value).into_owned(),
    )
}

/// All `cellXfs` records in index order.
pub fn cell_xfs(styles_xml: &[u8]) -> Result<Vec<StyleRecord>> {
    let mut rdr = Reader::from_reader(styles_xml);
    rdr.config_mut().trim_text(true);

    let mut in_xfs = false;
    let mut out = Vec::new();
    loop {
        let ev = rdr.read_event()?;
        match ev {
            Event::Start(ref e) if e.local_name().as_ref() == b"cellXfs" => in_xfs = true,
            Event::End(ref e) if e.local_name().as_ref() == b"cellXfs" => break,
            Event::Start(ref e) | Event::Empty(ref e)
                if in_xfs && e.local_name().as_ref() == b"xf" =>
            {
                let mut rec = StyleRecord::default();
                for a in e.attributes().with_checks(false).flatten() {
                    let val = || String::from_utf8_lossy(&a.value).into_owned();
                    match a.key.as_ref() {
                        b"numFmtId" => rec.number_format = val().parse()?,
                        b"fontId" => rec.font = val().parse()?,
                        b"fillId" => rec.fill = val().parse()?,
                        b"borderId" => rec.border = val().parse()?,
                        b"xfId" => rec.parent = val().parse()?,
                        k if k.starts_with(b"apply") => {}
                        k => rec.other.push(attr_pair(k, &a.value)),
                    }
                }
                // Event::Start -> children follow
                if matches!(ev, Event::Start(_)) {
                    loop {
                        match rdr.read_event()? {
                            Event::Start(ref ie) | Event::Empty(ref ie) => {
                                match ie.local_name().as_ref() {
                                    b"alignment" => rec.alignment = Some(parse_alignment(ie)?),
                                    b"protection" => rec.protection = Some(parse_protection(ie)),
                                    _ => {}
                                }
                            }
                            Event::End(ref ie) if ie.local_name().as_ref() == b"xf" => break,
                            Event::Eof => break,
                            _ => {}
                        }
                    }
                }
                out.push(rec);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

fn parse_alignment(e: &BytesStart<'_>) -> Result<AlignSpec> {
    let mut spec = AlignSpec::default();
    for attr in e.attributes().with_checks(false).flatten() {
        let val = String::from_utf8_lossy(&attr.value).into_owned();
        match attr.key.as_ref() {
            b"horizontal" => spec.horiz = Some(val.parse()?),
            b"vertical" => spec.vert = Some(val.parse()?),
            b"wrapText" => spec.wrap = xml_flag(&val),
            b"shrinkToFit" => spec.shrink = xml_flag(&val),
            b"indent" => spec.indent = val.parse().ok(),
            b"textRotation" => spec.rotation = val.parse().ok(),
            k => spec.other.push(attr_pair(k, &attr.value)),
        }
    }
    Ok(spec)
}

fn parse_protection(e: &BytesStart<'_>) -> ProtectionSpec {
    let mut spec = ProtectionSpec::default();
    for attr in e.attributes().with_checks(false).flatten() {
        let val = String::from_utf8_lossy(&attr.value).into_owned();
        match attr.key.as_ref() {
            b"locked" => spec.locked = Some(xml_flag(&val)),
            b"hidden" => spec.hidden = Some(xml_flag(&val)),
            _ => {}
        }
    }
    spec
}

fn xml_flag(v: &str) -> bool {
    v == "1" || v == "true"
}

/* ============================== FONTS ===================================== */

#[derive(Debug, Clone, Default, PartialEq)]
struct FontSpec {
    name: Option<String>,
    size: Option<f64>,
    bold: bool,
    italic: bool,
    underline: bool,
    strike: bool,
    /// `theme:N`, `rgb:AARRGGBB` or `indexed:N`
    color: Option<String>,
}

impl FontSpec {
    /// No emphasis and the default text colour.
    fn is_plain(&self) -> bool {
        !(self.bold || self.italic || self.underline || self.strike)
            && self.color.as_deref().is_none_or(|c| c == "theme:1")
    }
}

fn fonts(styles_xml: &[u8]) -> Result<Vec<FontSpec>> {
    let mut rdr = Reader::from_reader(styles_xml);
    rdr.config_mut().trim_text(true);

    let mut in_fonts = false;
    let mut cur: Option<FontSpec> = None;
    let mut out = Vec::new();
    loop {
        match rdr.read_event()? {
            Event::Start(ref e) if e.local_name().as_ref() == b"fonts" => in_fonts = true,
            Event::End(ref e) if e.local_name().as_ref() == b"fonts" => break,
            Event::Empty(ref e) if in_fonts && e.local_name().as_ref() == b"font" => {
                out.push(FontSpec::default())
            }
            Event::Start(ref e) if in_fonts && e.local_name().as_ref() == b"font" => {
                cur = Some(FontSpec::default())
            }
            Event::End(ref e) if e.local_name().as_ref() == b"font" => {
                out.extend(cur.take());
            }
            Event::Start(ref e) | Event::Empty(ref e) if cur.is_some() => {
                let Some(font) = cur.as_mut() else { continue };
                let attr = |key: &[u8]| {
                    e.attributes()
                        .with_checks(false)
                        .flatten()
                        .find(|a| a.key.as_ref() == key)
                        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
                };
                // <b/> is on, <b val="0"/> is off
                let on = || attr(b"val").is_none_or(|v| v != "0" && v != "false");
                match e.local_name().as_ref() {
                    b"b" => font.bold = on(),
                    b"i" => font.italic = on(),
                    b"u" => font.underline = attr(b"val").is_none_or(|v| v != "none"),
                    b"strike" => font.strike = on(),
                    b"sz" => font.size = attr(b"val").and_then(|v| v.parse().ok()),
                    b"name" => font.name = attr(b"val"),
                    b"color" => {
                        font.color = ["theme", "rgb", "indexed"].into_iter().find_map(|k| {
                            attr(k.as_bytes()).map(|v| format!("{k}:{v}"))
                        })
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

/* ============================== EDITOR ==================================== */

impl XlsxEditor {
    pub fn style_record(&self, style_id: u32) -> Result<StyleRecord> {
        cell_xfs(&self.styles_xml)?
            .into_iter()
            .nth(style_id as usize)
            .with_context(|| format!("cellXfs has no entry {style_id}"))
    }

    /// Index of an `xf` equal to `rec`, appending one when none matches.
    pub fn ensure_style_record(&mut self, rec: &StyleRecord) -> Result<u32> {
        let xfs = cell_xfs(&self.styles_xml)?;
        if let Some(i) = xfs.iter().position(|x| x == rec) {
            return Ok(i as u32);
        }

        let pos = find_bytes(&self.styles_xml, b"</cellXfs>")
            .context("styles.xml: </cellXfs> not found")?;
        self.styles_xml.splice(pos..pos, rec.to_xml().into_bytes());
        bump_count(&mut self.styles_xml, b"<cellXfs", b"count=\"")?;
        self.styles_dirty = true;
        Ok(xfs.len() as u32)
    }

    /// Style for a cell copied from `style_id`: the same `cellXfs` index,
    /// once it is known to exist.
    pub fn clone_style(&self, style_id: Option<u32>) -> Result<Option<u32>> {
        if let Some(id) = style_id {
            self.style_record(id)?;
        }
        Ok(style_id)
    }

    /// Plain font with this name and size; appended to `<fonts>` if missing.
    pub(crate) fn ensure_font(&mut self, name: &str, size: f64) -> Result<u32> {
        let existing = fonts(&self.styles_xml)?;
        if let Some(i) = existing
            .iter()
            .position(|f| f.is_plain() && f.name.as_deref() == Some(name) && f.size == Some(size))
        {
            return Ok(i as u32);
        }

        let insert = find_bytes(&self.styles_xml, b"</fonts>")
            .context("<fonts> block not found in styles.xml")?;
        let xml = format!(r#"<font><sz val="{size}"/><name val="{}"/></font>"#, escape(name));
        self.styles_xml.splice(insert..insert, xml.into_bytes());
        bump_count(&mut self.styles_xml, b"<fonts", b"count=\"")?;
        self.styles_dirty = true;

        Ok(existing.len() as u32)
    }

    /// Owner/annotation cell: given font, wrapped text.
    pub(crate) fn owner_style(&mut self, font_name: &str, font_size: f64) -> Result<u32> {
        let font = self.ensure_font(font_name, font_size)?;
        let rec = StyleRecord {
            font,
            alignment: Some(AlignSpec {
                wrap: true,
                ..AlignSpec::default()
            }),
            ..StyleRecord::default()
        };
        self.ensure_style_record(&rec)
    }
}
