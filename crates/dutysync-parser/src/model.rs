use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::errors::ParseError;

/// Transaction type carried in the first CSV column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusCode {
    On,
    Off,
}

impl StatusCode {
    /// Accepts the booking codes emitted by the clocking terminals (`BON`/`BOF`)
    /// as well as the plain `ON`/`OFF` spellings.
    pub fn from_code(code: &str) -> Result<Self, ParseError> {
        match code.trim().to_ascii_uppercase().as_str() {
            "BON" | "ON" => Ok(StatusCode::On),
            "BOF" | "OFF" => Ok(StatusCode::Off),
            other => Err(ParseError::UnknownStatus(other.to_string())),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            StatusCode::On => "BON",
            StatusCode::Off => "BOF",
        }
    }

    pub fn is_on_duty(&self) -> bool {
        matches!(self, StatusCode::On)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoFix {
    pub lat: f64,
    pub lon: f64,
    pub accuracy: f64,
}

/// One worker's duty event, as read from a single CSV row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DutyRecord {
    pub employee_id: String,
    pub status: StatusCode,
    pub event_timestamp: NaiveDateTime,
    pub geo: Option<GeoFix>,
}

impl DutyRecord {
    pub fn event_date(&self) -> NaiveDate {
        self.event_timestamp.date()
    }

    pub fn event_time(&self) -> NaiveTime {
        self.event_timestamp.time()
    }
}
