//! batch_part.rs – validate, allocate, append, rebind charts, serialize.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::{
    XlsxEditor,
    datekey::{DateKey, half_width},
    error::AppendError,
    layout::{COL_KEY, VALUE_COUNT},
    sequence::{SequenceAllocator, key_from_cell},
};

/// Knobs for one append operation.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendOptions {
    pub sheet_name: String,
    pub owner_font_name: String,
    pub owner_font_size: f64,
}

impl Default for AppendOptions {
    fn default() -> Self {
        Self {
            sheet_name: "Data".to_owned(),
            owner_font_name: "Calibri".to_owned(),
            owner_font_size: 11.0,
        }
    }
}

/// One form row as typed by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchRow {
    pub date: String,
    pub values: Vec<String>,
    pub owner: String,
}

impl BatchRow {
    pub fn new(date: &str, values: &[&str], owner: &str) -> Self {
        Self {
            date: date.to_owned(),
            values: values.iter().map(|v| (*v).to_owned()).collect(),
            owner: owner.to_owned(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.date.trim().is_empty()
    }

    /// `None` for a blank row. `index` is 1-based and only used in errors.
    pub fn validate(&self, index: usize) -> Result<Option<ValidatedRow>, AppendError> {
        if self.is_blank() {
            return Ok(None);
        }
        let key = DateKey::parse(&self.date)?;

        if self.values.len() != VALUE_COUNT {
            return Err(AppendError::ValueCount {
                row: index,
                count: self.values.len(),
            });
        }
        let mut values = [0.0; VALUE_COUNT];
        for (i, raw) in self.values.iter().enumerate() {
            values[i] = half_width(raw.trim())
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| AppendError::NotNumeric {
                    row: index,
                    field: format!("Value_{}", i + 1),
                    value: raw.clone(),
                })?;
        }

        Ok(Some(ValidatedRow {
            index,
            key,
            values,
            owner: self.owner.trim().to_owned(),
        }))
    }
}

/// A row that passed validation; appending it cannot fail on its content.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRow {
    pub index: usize,
    pub key: DateKey,
    pub values: [f64; VALUE_COUNT],
    pub owner: String,
}

/// Validates every row before anything is written.
pub fn validate_batch(rows: &[BatchRow]) -> Result<Vec<ValidatedRow>, AppendError> {
    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if let Some(valid) = row.validate(i + 1)? {
            out.push(valid);
        }
    }
    if out.is_empty() {
        return Err(AppendError::EmptyBatch);
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendedRow {
    pub row: u32,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub sheet_name: String,
    pub appended: Vec<AppendedRow>,
    pub charts_rebound: usize,
}

impl BatchOutcome {
    pub fn last_row(&self) -> Option<u32> {
        self.appended.last().map(|r| r.row)
    }
}

/// Appends a batch to an open editor. On error the editor must be discarded.
pub fn append_batch(
    editor: &mut XlsxEditor,
    rows: &[BatchRow],
    opts: &AppendOptions,
) -> Result<BatchOutcome> {
    let valid = validate_batch(rows)?;

    let sheet = editor.sheet_data()?;
    let mut alloc = SequenceAllocator::from_sheet(&sheet, COL_KEY, sheet.last_data_row(COL_KEY));
    drop(sheet);

    let mut appended = Vec::with_capacity(valid.len());
    for row in &valid {
        let key = alloc.assign(row.key)?.to_string();
        let at = editor.append_record(&key, &row.values, &row.owner, opts)?;
        debug!(input_row = row.index, row = at, key = %key, "row appended");
        appended.push(AppendedRow { row: at, key });
    }

    let last_row = appended.last().map_or(1, |r| r.row);
    let charts_rebound = editor.extend_charts(last_row)?;
    editor.request_full_recalc()?;

    info!(
        sheet = editor.sheet_name(),
        rows = appended.len(),
        last_row,
        charts_rebound,
        "batch appended"
    );
    Ok(BatchOutcome {
        sheet_name: editor.sheet_name().to_owned(),
        appended,
        charts_rebound,
    })
}

/// Byte-level entry: template in, rewritten workbook and used sheet name out.
pub fn append_many(template: &[u8], rows: &[BatchRow], sheet_name: &str) -> Result<(Vec<u8>, String)> {
    let opts = AppendOptions {
        sheet_name: sheet_name.to_owned(),
        ..AppendOptions::default()
    };
    append_many_with(template, rows, &opts)
}

pub fn append_many_with(
    template: &[u8],
    rows: &[BatchRow],
    opts: &AppendOptions,
) -> Result<(Vec<u8>, String)> {
    let mut editor = XlsxEditor::open_bytes(template.to_vec(), &opts.sheet_name)?;
    let outcome = append_batch(&mut editor, rows, opts)?;
    Ok((editor.into_bytes()?, outcome.sheet_name))
}

/// Key of the last data row as `YYYY/MM/DD-LL`; `""` when there is none.
///
/// Bare and serial dates render with `-00`; text that is not a key is
/// returned trimmed.
pub fn last_recorded_key(bytes: &[u8], sheet_name: &str) -> Result<String> {
    let editor = XlsxEditor::open_bytes(bytes.to_vec(), sheet_name)?;
    let sheet = editor.sheet_data()?;
    let last = sheet.last_data_row(COL_KEY);
    if last < 2 {
        return Ok(String::new());
    }
    let cell = sheet.value(last, COL_KEY);
    Ok(match key_from_cell(cell) {
        Some(key) => key.display_or_zero(),
        None => cell
            .display_text()
            .map(|t| t.trim().to_owned())
            .unwrap_or_default(),
    })
}

/// True when the batch holds two unkeyed rows of one date, or one explicit
/// key twice. Rows whose date does not parse are ignored.
pub fn needs_same_day_confirmation(rows: &[BatchRow]) -> bool {
    let mut seen = HashSet::new();
    rows.iter()
        .filter(|r| !r.is_blank())
        .filter_map(|r| DateKey::parse(&r.date).ok())
        .any(|key| !seen.insert(key))
}

/// `Plan.xlsx` → `Plan-out.xlsx`; the extension is kept.
pub fn output_file_name(input: &str) -> String {
    let (dir, file) = match input.rfind(['/', '\\']) {
        Some(i) => input.split_at(i + 1),
        None => ("", input),
    };
    match file.rfind('.') {
        Some(dot) if dot > 0 => format!("{dir}{}-out{}", &file[..dot], &file[dot..]),
        _ => format!("{dir}{file}-out.xlsx"),
    }
}
