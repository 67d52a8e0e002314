mod append_part;
pub mod auth;
mod batch_part;
mod chart_part;
pub mod datekey;
pub mod error;
mod files_part;
pub mod read_part;
pub mod sequence;
pub mod style;
mod test;

use anyhow::{Context, Result};

pub use batch_part::{
    AppendOptions, AppendedRow, BatchOutcome, BatchRow, ValidatedRow, append_batch, append_many,
    append_many_with, last_recorded_key, needs_same_day_confirmation, output_file_name,
    validate_batch,
};
pub use chart_part::ChartFamily;
pub use datekey::DateKey;
pub use error::AppendError;
pub use files_part::{SheetEntry, scan, scan_bytes};
pub use read_part::{CellValue, SheetData};

/// Fixed column roles of the record sheet (1-based).
pub mod layout {
    pub const COL_KEY: u32 = 1;
    pub const COL_FIRST_VALUE: u32 = 2;
    pub const COL_LAST_VALUE: u32 = 7;
    pub const VALUE_COUNT: usize = 6;
    pub const COL_MEAN: u32 = 8;
    pub const COL_RANGE: u32 = 9;
    pub const COL_MEAN_CL: u32 = 10;
    pub const COL_RANGE_LCL: u32 = 15;
    pub const COL_OWNER: u32 = 16;

    /// Series columns of the first chart: mean and its limits.
    pub const MEAN_FAMILY: [u32; 4] = [COL_MEAN, COL_MEAN_CL, COL_MEAN_CL + 1, COL_MEAN_CL + 2];
    /// Series columns of the second chart: range and its limits.
    pub const RANGE_FAMILY: [u32; 4] = [COL_RANGE, COL_RANGE_LCL - 2, COL_RANGE_LCL - 1, COL_RANGE_LCL];
}

/// `XlsxEditor` holds one workbook in memory and edits a single sheet of it.
/// Everything it did not touch is copied through unchanged when serialized.
pub struct XlsxEditor {
    package: files_part::Package,
    sheet_name: String,
    sheet_path: String,
    sheet_xml: Vec<u8>,
    styles_xml: Vec<u8>,       // содержимое styles.xml
    workbook_xml: Vec<u8>,     // содержимое workbook.xml
    shared_strings: Vec<String>,
    styles_dirty: bool,
    workbook_dirty: bool,
}

impl XlsxEditor {
    /// Name of the sheet actually opened (after fallback).
    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    pub fn sheet_path(&self) -> &str {
        &self.sheet_path
    }

    /// Fresh parse of the sheet's `<sheetData>`.
    pub fn sheet_data(&self) -> Result<SheetData> {
        SheetData::parse(&self.sheet_xml, &self.shared_strings)
            .with_context(|| format!("reading {}", self.sheet_path))
    }

    pub fn last_data_row(&self) -> Result<u32> {
        Ok(self.sheet_data()?.last_data_row(layout::COL_KEY))
    }
}

/// Exact name first, then the first visible sheet, then the first sheet.
pub fn locate_sheet<'a>(sheets: &'a [SheetEntry], requested: &str) -> Option<&'a SheetEntry> {
    sheets
        .iter()
        .find(|s| s.name == requested)
        .or_else(|| sheets.iter().find(|s| s.visible))
        .or_else(|| sheets.first())
}

/* ========================== BYTE/STRING HELPERS =========================== */

pub(crate) fn find_bytes(hay: &[u8], needle: &[u8]) -> Option<usize> {
    memchr::memmem::find(hay, needle)
}

pub(crate) fn find_bytes_from(hay: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    memchr::memmem::find(hay.get(start..)?, needle).map(|p| p + start)
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.')
}

/// Start of the qualified name whose local part begins at `i`, provided
/// what precedes it is nothing or a single `prefix:`.
fn qualified_start(hay: &[u8], i: usize) -> Option<usize> {
    let start = hay[..i]
        .iter()
        .rposition(|&b| !is_name_byte(b) && b != b':')
        .map_or(0, |p| p + 1);
    match hay[start..i].split_last() {
        None => Some(start),
        Some((b':', p)) if !p.is_empty() && !p.contains(&b':') => Some(start),
        _ => None,
    }
}

/// Offset of the first `<local` or `<prefix:local` start tag.
pub(crate) fn find_start_tag(hay: &[u8], local: &[u8]) -> Option<usize> {
    memchr::memmem::find_iter(hay, local).find_map(|i| {
        let next = hay.get(i + local.len()).copied();
        if next.is_none_or(|b| is_name_byte(b) || b == b':') {
            return None;
        }
        let q = qualified_start(hay, i)?;
        (q > 0 && hay[q - 1] == b'<').then(|| q - 1)
    })
}

/// Offset of the last `</local>` or `</prefix:local>` end tag.
pub(crate) fn rfind_end_tag(hay: &[u8], local: &[u8]) -> Option<usize> {
    memchr::memmem::rfind_iter(hay, local).find_map(|i| {
        let next = hay.get(i + local.len()).copied();
        if !next.is_some_and(|b| b == b'>' || b.is_ascii_whitespace()) {
            return None;
        }
        let q = qualified_start(hay, i)?;
        (q > 1 && hay[q - 1] == b'/' && hay[q - 2] == b'<').then(|| q - 2)
    })
}

/// `prefix:` of the element whose `<` is at `tag_start`; `""` when unprefixed.
pub(crate) fn tag_prefix(xml: &[u8], tag_start: usize) -> String {
    let name = xml.get(tag_start + 1..).unwrap_or_default();
    let len = name
        .iter()
        .position(|&b| !is_name_byte(b) && b != b':')
        .unwrap_or(name.len());
    match name[..len].iter().rposition(|&b| b == b':') {
        Some(colon) => String::from_utf8_lossy(&name[..=colon]).into_owned(),
        None => String::new(),
    }
}

/// Increments `count="N"` on the first `tag`; a tag without `count` is left alone.
pub(crate) fn bump_count(xml: &mut Vec<u8>, tag: &[u8], attr: &[u8]) -> Result<()> {
    let pos = find_bytes(xml, tag).with_context(|| {
        format!("<{}> not found", String::from_utf8_lossy(tag.strip_prefix(b"<").unwrap_or(tag)))
    })?;
    let tag_end = find_bytes_from(xml, b">", pos).context("unterminated start tag")?;
    if let Some(a) = find_bytes_from(&xml[..tag_end], attr, pos) {
        let start = a + attr.len();
        let end = find_bytes_from(xml, b"\"", start).context("closing quote not found")?;
        let mut num: u32 = std::str::from_utf8(&xml[start..end])?.parse()?;
        num += 1;
        xml.splice(start..end, num.to_string().bytes());
    }
    Ok(())
}
