//! append_part.rs – writes one record row below the last keyed row.

use anyhow::{Context, Result};
use quick_xml::{Writer, events::BytesText};
use std::{io, ops::Range};
use tracing::debug;

use crate::{
    AppendOptions, XlsxEditor, find_bytes_from, find_start_tag, rfind_end_tag, tag_prefix,
    layout::*,
    read_part::{CellValue, column_name, parse_cell_ref},
};

/// Elements that may follow `<calcPr>` inside `<workbook>`.
const AFTER_CALC_PR: [&[u8]; 9] = [
    b"oleSize",
    b"customWorkbookViews",
    b"pivotCaches",
    b"smartTagPr",
    b"smartTagTypes",
    b"webPublishing",
    b"fileRecoveryPr",
    b"webPublishObjects",
    b"extLst",
];

impl XlsxEditor {
    /// Appends one record at `last_data_row + 1` and returns that row index.
    ///
    /// Columns A–O take their style from the previous record (or the header
    /// when there is none), so does the row height. J–O carry the previous
    /// record's control limits forward when such a record exists.
    pub fn append_record(
        &mut self,
        key: &str,
        values: &[f64; VALUE_COUNT],
        owner: &str,
        opts: &AppendOptions,
    ) -> Result<u32> {
        let sheet = self.sheet_data()?;
        let last_row = sheet.last_data_row(COL_KEY);
        let row = last_row + 1;
        let source = sheet.rows.get(&last_row);

        // ── styles ───────────────────────────────────────────────────
        let mut styles = Vec::with_capacity(COL_OWNER as usize);
        for col in COL_KEY..=COL_RANGE_LCL {
            let src = source.and_then(|r| r.cells.get(&col)).and_then(|c| c.style);
            styles.push(self.clone_style(src)?);
        }
        styles.push(Some(
            self.owner_style(&opts.owner_font_name, opts.owner_font_size)?,
        ));

        // ── values ───────────────────────────────────────────────────
        let span = format!(
            "{}{row}:{}{row}",
            column_name(COL_FIRST_VALUE),
            column_name(COL_LAST_VALUE)
        );
        let mean = values.iter().sum::<f64>() / VALUE_COUNT as f64;
        let (lo, hi) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

        let mut cells = vec![CellValue::Text(key.to_owned())];
        cells.extend(values.iter().map(|&v| CellValue::Number(v)));
        cells.push(formula(format!("AVERAGE({span})"), mean));
        cells.push(formula(format!("MAX({span})-MIN({span})"), hi - lo));
        for col in COL_MEAN_CL..=COL_RANGE_LCL {
            cells.push(if last_row >= 2 {
                sheet.value(last_row, col).clone()
            } else {
                CellValue::Empty
            });
        }
        cells.push(if owner.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(owner.to_owned())
        });

        // ── <row> ────────────────────────────────────────────────────
        let existing = sheet.rows.get(&row);
        let foreign: Vec<&[u8]> = existing
            .map(|r| {
                r.cells
                    .range(COL_OWNER + 1..)
                    .map(|(_, c)| &self.sheet_xml[c.span.clone()])
                    .collect()
            })
            .unwrap_or_default();

        // new elements use the same SpreadsheetML prefix as <sheetData>
        let prefix = tag_prefix(&self.sheet_xml, sheet.span.start);
        let row_str = row.to_string();
        let mut writer = Writer::new(Vec::new());
        let mut row_el = writer
            .create_element(format!("{prefix}row"))
            .with_attribute(("r", row_str.as_str()));
        if let Some(ht) = source.and_then(|r| r.height.as_deref()) {
            row_el = row_el.with_attribute(("ht", ht));
            if source.is_some_and(|r| r.custom_height) {
                row_el = row_el.with_attribute(("customHeight", "1"));
            }
        }
        row_el.write_inner_content(|w| {
            for (col, (value, style)) in (COL_KEY..).zip(cells.iter().zip(&styles)) {
                if value.is_blank() && style.is_none() {
                    continue;
                }
                write_cell(w, &prefix, col, row, *style, value)?;
            }
            for raw in &foreign {
                w.get_mut().extend_from_slice(raw);
            }
            Ok(())
        })?;
        let row_xml = writer.into_inner();

        // ── splice into <sheetData> ──────────────────────────────────
        let (range, replacement) = match existing {
            Some(r) => (r.span.clone(), row_xml),
            None => match sheet.rows.range(row + 1..).next() {
                Some((_, next)) => (next.span.start..next.span.start, row_xml),
                None if sheet.self_closing => {
                    let mut wrapped = format!("<{prefix}sheetData>").into_bytes();
                    wrapped.extend_from_slice(&row_xml);
                    wrapped.extend_from_slice(format!("</{prefix}sheetData>").as_bytes());
                    (sheet.span.clone(), wrapped)
                }
                None => {
                    let pos = memchr::memmem::rfind(&self.sheet_xml[sheet.span.clone()], b"</")
                        .context("</sheetData> not found")?
                        + sheet.span.start;
                    (pos..pos, row_xml)
                }
            },
        };
        self.sheet_xml.splice(range, replacement);

        self.extend_dimension(row)?;
        debug!(row, key, reused_row = existing.is_some(), "record appended");
        Ok(row)
    }

    /// Grows `<dimension ref>` so it covers A..P of `row`.
    fn extend_dimension(&mut self, row: u32) -> Result<()> {
        let xml = &self.sheet_xml;
        let Some(pos) = find_start_tag(xml, b"dimension") else {
            return Ok(());
        };
        let tag_end = find_bytes_from(xml, b">", pos).context("unterminated <dimension>")?;
        let Some(a) = find_bytes_from(&xml[..tag_end], b"ref=\"", pos) else {
            return Ok(());
        };
        let start = a + b"ref=\"".len();
        let end = find_bytes_from(xml, b"\"", start).context("closing quote not found")?;

        let current = std::str::from_utf8(&xml[start..end])?;
        let (first, last) = current.split_once(':').unwrap_or((current, current));
        let Some((last_col, last_row)) = parse_cell_ref(last) else {
            return Ok(());
        };
        if last_row >= row && last_col >= COL_OWNER {
            return Ok(());
        }
        let new_ref = format!(
            "{first}:{}{}",
            column_name(last_col.max(COL_OWNER)),
            last_row.max(row)
        );
        self.sheet_xml.splice(start..end, new_ref.into_bytes());
        Ok(())
    }

    /// Asks spreadsheet applications to recalculate everything on open.
    pub(crate) fn request_full_recalc(&mut self) -> Result<()> {
        let xml = self.workbook_xml.as_slice();
        let (range, patch): (Range<usize>, Vec<u8>) = if let Some(pos) = find_start_tag(xml, b"calcPr") {
            let tag_end = find_bytes_from(xml, b">", pos).context("unterminated <calcPr>")?;
            match find_bytes_from(&xml[..tag_end], b"fullCalcOnLoad=\"", pos) {
                Some(a) => {
                    let start = a + b"fullCalcOnLoad=\"".len();
                    let end = find_bytes_from(xml, b"\"", start).context("closing quote not found")?;
                    (start..end, b"1".to_vec())
                }
                None => {
                    let at = pos + 1 + tag_prefix(xml, pos).len() + b"calcPr".len();
                    (at..at, b" fullCalcOnLoad=\"1\"".to_vec())
                }
            }
        } else {
            let prefix = find_start_tag(xml, b"workbook")
                .map(|p| tag_prefix(xml, p))
                .unwrap_or_default();
            let at = AFTER_CALC_PR
                .iter()
                .filter_map(|tag| find_start_tag(xml, tag))
                .min()
                .or_else(|| rfind_end_tag(xml, b"workbook"))
                .context("</workbook> not found")?;
            (at..at, format!("<{prefix}calcPr fullCalcOnLoad=\"1\"/>").into_bytes())
        };
        self.workbook_xml.splice(range, patch);
        self.workbook_dirty = true;
        Ok(())
    }
}

fn formula(text: String, cached: f64) -> CellValue {
    CellValue::Formula {
        text,
        cached: Some(Box::new(CellValue::Number(cached))),
    }
}

fn write_cell(
    w: &mut Writer<Vec<u8>>,
    prefix: &str,
    col: u32,
    row: u32,
    style: Option<u32>,
    value: &CellValue,
) -> io::Result<()> {
    let coord = format!("{}{row}", column_name(col));
    let style = style.map(|s| s.to_string());
    let mut c = w
        .create_element(format!("{prefix}c"))
        .with_attribute(("r", coord.as_str()));
    if let Some(s) = &style {
        c = c.with_attribute(("s", s.as_str()));
    }
    if let Some(t) = cell_type(value) {
        c = c.with_attribute(("t", t));
    }

    match value {
        CellValue::Empty => {
            c.write_empty()?;
        }
        CellValue::Text(s) => {
            c.write_inner_content(|w| {
                w.create_element(format!("{prefix}is")).write_inner_content(|w| {
                    let mut t = w.create_element(format!("{prefix}t"));
                    if s.starts_with(char::is_whitespace) || s.ends_with(char::is_whitespace) {
                        t = t.with_attribute(("xml:space", "preserve"));
                    }
                    t.write_text_content(BytesText::new(s))?;
                    Ok(())
                })?;
                Ok(())
            })?;
        }
        CellValue::Formula { text, cached } => {
            c.write_inner_content(|w| {
                w.create_element(format!("{prefix}f"))
                    .write_text_content(BytesText::new(text))?;
                if let Some(v) = cached.as_deref().and_then(raw_value) {
                    w.create_element(format!("{prefix}v"))
                        .write_text_content(BytesText::new(&v))?;
                }
                Ok(())
            })?;
        }
        other => {
            let v = raw_value(other).unwrap_or_default();
            c.write_inner_content(|w| {
                w.create_element(format!("{prefix}v"))
                    .write_text_content(BytesText::new(&v))?;
                Ok(())
            })?;
        }
    }
    Ok(())
}

fn cell_type(value: &CellValue) -> Option<&'static str> {
    match value {
        CellValue::Text(_) => Some("inlineStr"),
        CellValue::Bool(_) => Some("b"),
        CellValue::Error(_) => Some("e"),
        CellValue::Formula { cached, .. } => match cached.as_deref() {
            Some(CellValue::Text(_)) => Some("str"),
            Some(CellValue::Bool(_)) => Some("b"),
            Some(CellValue::Error(_)) => Some("e"),
            _ => None,
        },
        CellValue::Empty | CellValue::Number(_) => None,
    }
}

/// Content of `<v>`.
fn raw_value(value: &CellValue) -> Option<String> {
    match value {
        CellValue::Number(n) => Some(n.to_string()),
        CellValue::Text(s) | CellValue::Error(s) => Some(s.clone()),
        CellValue::Bool(b) => Some(if *b { "1" } else { "0" }.to_owned()),
        CellValue::Empty | CellValue::Formula { .. } => None,
    }
}
