//! sequence.rs – per-day `-LL` allocation for one batch.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::{
    datekey::DateKey,
    error::AppendError,
    read_part::{CellValue, SheetData},
};

/// Highest sequence number already used on each base date.
///
/// Built from column A before the first row of a batch is appended and
/// dropped with the batch.
#[derive(Debug, Default, Clone)]
pub struct SequenceAllocator {
    max_seen: BTreeMap<NaiveDate, u8>,
}

impl SequenceAllocator {
    /// Scans `col` for rows `2..=last_row`; cells that are not keys are ignored.
    pub fn from_sheet(sheet: &SheetData, col: u32, last_row: u32) -> Self {
        Self::from_cells((2..=last_row).map(|r| sheet.value(r, col)))
    }

    pub fn from_cells<'a>(cells: impl IntoIterator<Item = &'a CellValue>) -> Self {
        let mut alloc = Self::default();
        for key in cells.into_iter().filter_map(key_from_cell) {
            alloc.observe(key);
        }
        alloc
    }

    /// Records a key; bare dates count as sequence 0.
    pub fn observe(&mut self, key: DateKey) {
        let seq = key.sequence.unwrap_or(0);
        let slot = self.max_seen.entry(key.date).or_insert(0);
        *slot = (*slot).max(seq);
    }

    pub fn max_sequence(&self, date: NaiveDate) -> Option<u8> {
        self.max_seen.get(&date).copied()
    }

    /// Explicit sequences are kept as typed; bare dates get `max + 1`.
    pub fn assign(&mut self, key: DateKey) -> Result<DateKey, AppendError> {
        if key.sequence.is_some() {
            self.observe(key);
            return Ok(key);
        }

        let slot = self.max_seen.entry(key.date).or_insert(0);
        if *slot >= 99 {
            return Err(AppendError::SequenceExhausted { date: key.base() });
        }
        *slot += 1;
        Ok(key.with_sequence(*slot))
    }
}

/// Reads a column-A cell as a key.
///
/// Text goes through the key grammars. Numbers are first tried as typed digits
/// (`2024010503`), then as Excel serial dates.
pub fn key_from_cell(value: &CellValue) -> Option<DateKey> {
    match value {
        CellValue::Text(s) => DateKey::parse(s).ok(),
        CellValue::Number(n) => DateKey::parse(&n.to_string())
            .ok()
            .or_else(|| DateKey::from_excel_serial(*n)),
        CellValue::Formula { cached, .. } => cached.as_deref().and_then(key_from_cell),
        _ => None,
    }
}
