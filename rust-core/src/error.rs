use thiserror::Error;

/// Operator-facing failures of an append batch.
///
/// Package/XML plumbing keeps using `anyhow`; these travel inside an
/// `anyhow::Error` and can be recovered with `downcast_ref::<AppendError>()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppendError {
    #[error("date must be YYYY/MM/DD-LL, YYYYMMDDLL, YYYY/MM/DD or YYYYMMDD, got {0:?}")]
    Format(String),

    #[error("row {row}: {field} must be a number, got {value:?}")]
    NotNumeric {
        row: usize,
        field: String,
        value: String,
    },

    #[error("row {row}: Value_1..Value_6 must be exactly 6 numbers, got {count}")]
    ValueCount { row: usize, count: usize },

    #[error("nothing to append: every date field in the batch is blank")]
    EmptyBatch,

    #[error("no sequence number left for {date}: 99 is the last one")]
    SequenceExhausted { date: String },
}

impl AppendError {
    /// 1-based batch row the error points at, if any.
    pub fn row(&self) -> Option<usize> {
        match self {
            AppendError::NotNumeric { row, .. } | AppendError::ValueCount { row, .. } => Some(*row),
            _ => None,
        }
    }
}
