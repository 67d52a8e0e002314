//! datekey.rs – `YYYY/MM/DD-LL` record keys.
//!
//! Accepted input, first match wins:
//!   1. `YYYY[/-]MM[/-]DD[/-]LL`   (the separator before `LL` is required)
//!   2. `YYYYMMDDLL`
//!   3. `YYYY[/.-]MM[/.-]DD`       (no sequence)

use chrono::{Datelike, Days, NaiveDate};
use regex::Regex;
use std::{borrow::Cow, fmt, str::FromStr, sync::LazyLock};

use crate::error::AppendError;

// A one-digit month or day needs a separator after it, otherwise
// `2024/11/02` could split as 2024/1/1 sequence 02.
static WITH_SEQ_SEPARATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{4})(?:[/\-]([0-9]{1,2})|([0-9]{2}))(?:[/\-]([0-9]{1,2})|([0-9]{2}))[/\-]([0-9]{1,2})$")
        .expect("static regex")
});
static WITH_SEQ_PACKED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]{4})([0-9]{2})([0-9]{2})([0-9]{2})$").expect("static regex"));
static BARE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{4})(?:[/.\-]([0-9]{1,2})|([0-9]{2}))(?:[/.\-]([0-9]{1,2})|([0-9]{2}))$")
        .expect("static regex")
});

/// Maps full-width digits, `／`, `－` and `．` to ASCII.
pub(crate) fn half_width(s: &str) -> Cow<'_, str> {
    let wide = |c: char| matches!(c, '\u{FF10}'..='\u{FF19}' | '／' | '－' | '．');
    if !s.chars().any(wide) {
        return Cow::Borrowed(s);
    }
    s.chars()
        .map(|c| match c {
            '\u{FF10}'..='\u{FF19}' => char::from(b'0' + (c as u32 - 0xFF10) as u8),
            '／' => '/',
            '－' => '-',
            '．' => '.',
            c => c,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateKey {
    pub date: NaiveDate,
    /// `None` when the operator typed a bare date; the allocator picks the number.
    pub sequence: Option<u8>,
}

impl DateKey {
    pub fn new(date: NaiveDate, sequence: Option<u8>) -> Self {
        Self { date, sequence }
    }

    /// Reads a key in one of the grammars above. Full-width digits and
    /// separators from an IME count as their ASCII forms.
    ///
    /// The date must also exist on the calendar: `2024/02/30` and
    /// `2024-13-45` fit the bare-date grammar but are format errors, where a
    /// lenient reader would hand back a date that is not there.
    pub fn parse(raw: &str) -> Result<Self, AppendError> {
        let trimmed = raw.trim();
        let format_err = || AppendError::Format(trimmed.to_owned());
        let normalized = half_width(trimmed);
        let s = normalized.as_ref();

        if let Some(caps) = WITH_SEQ_SEPARATED.captures(s) {
            let date = ymd(&caps[1], either(&caps, 2, 3), either(&caps, 4, 5)).ok_or_else(format_err)?;
            let seq: u8 = caps[6].parse().map_err(|_| format_err())?;
            return Ok(Self::new(date, Some(seq)));
        }
        if let Some(caps) = WITH_SEQ_PACKED.captures(s) {
            let date = ymd(&caps[1], &caps[2], &caps[3]).ok_or_else(format_err)?;
            let seq: u8 = caps[4].parse().map_err(|_| format_err())?;
            return Ok(Self::new(date, Some(seq)));
        }

        if let Some(caps) = BARE_DATE.captures(s) {
            let date = ymd(&caps[1], either(&caps, 2, 3), either(&caps, 4, 5)).ok_or_else(format_err)?;
            return Ok(Self::new(date, None));
        }

        Err(format_err())
    }

    /// Excel 1900-system serial number (integer part only).
    pub fn from_excel_serial(serial: f64) -> Option<Self> {
        if !serial.is_finite() || serial < 1.0 {
            return None;
        }
        let days = serial.floor() as u64;
        // serial 60 is the phantom 1900-02-29; everything after it is shifted by one
        let epoch = if days < 61 {
            NaiveDate::from_ymd_opt(1899, 12, 31)?
        } else {
            NaiveDate::from_ymd_opt(1899, 12, 30)?
        };
        let date = epoch.checked_add_days(Days::new(days))?;
        Some(Self::new(date, None))
    }

    /// `YYYY/MM/DD`
    pub fn base(&self) -> String {
        format_base(self.date)
    }

    pub fn with_sequence(self, sequence: u8) -> Self {
        Self {
            sequence: Some(sequence),
            ..self
        }
    }

    /// Composed form, rendering a missing sequence as `00`.
    pub fn display_or_zero(&self) -> String {
        compose(self.date, self.sequence.unwrap_or(0))
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sequence {
            Some(seq) => f.write_str(&compose(self.date, seq)),
            None => f.write_str(&self.base()),
        }
    }
}

impl FromStr for DateKey {
    type Err = AppendError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// `YYYY/MM/DD-LL`
pub fn compose(date: NaiveDate, sequence: u8) -> String {
    format!("{}-{:02}", format_base(date), sequence)
}

fn format_base(date: NaiveDate) -> String {
    format!("{:04}/{:02}/{:02}", date.year(), date.month(), date.day())
}

fn either<'h>(caps: &regex::Captures<'h>, a: usize, b: usize) -> &'h str {
    caps.get(a).or_else(|| caps.get(b)).map_or("", |m| m.as_str())
}

fn ymd(y: &str, m: &str, d: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
}
