use thiserror::Error;

/// A single CSV row that could not be turned into a [`crate::DutyRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("employee id is empty")]
    EmptyEmployeeId,

    #[error("unknown transaction type '{0}'")]
    UnknownStatus(String),

    #[error("invalid clocking date '{0}' (expected YYYYMMDD)")]
    InvalidDate(String),

    #[error("invalid clocking time '{0}' (expected HHMMSS)")]
    InvalidTime(String),

    #[error("invalid {field} value '{value}'")]
    InvalidGeo { field: &'static str, value: String },
}

/// Failures that make a whole file unusable for the current cycle.
#[derive(Debug, Error)]
pub enum FileParseError {
    #[error("file contents were not valid UTF-8")]
    Encoding,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
