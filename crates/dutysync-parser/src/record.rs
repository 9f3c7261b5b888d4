use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use csv::{ReaderBuilder, StringRecord};

use crate::errors::{FileParseError, ParseError};
use crate::model::{DutyRecord, GeoFix, StatusCode};

/// Column count of a clocking export row.
pub const EXPECTED_FIELDS: usize = 10;

const COL_TRANSACTION: usize = 0;
const COL_EMPLOYEE: usize = 1;
const COL_DATE: usize = 3;
const COL_TIME: usize = 4;
const COL_GEO_STATUS: usize = 6;
const COL_LATITUDE: usize = 7;
const COL_LONGITUDE: usize = 8;
const COL_ACCURACY: usize = 9;

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    /// 1-based line number within the file.
    pub line: u64,
    pub error: ParseError,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub records: Vec<DutyRecord>,
    pub rejected: Vec<RejectedRow>,
}

impl ParsedFile {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Parses one row of a clocking export.
///
/// Column layout: transaction type, employee id, payroll id, date (`YYYYMMDD`),
/// time (`HHMMSS`), created stamp, geo status, latitude, longitude, accuracy.
/// Payroll id and created stamp are carried by the export but not used.
pub fn parse_row(row: &StringRecord) -> Result<DutyRecord, ParseError> {
    if row.len() != EXPECTED_FIELDS {
        return Err(ParseError::FieldCount {
            expected: EXPECTED_FIELDS,
            found: row.len(),
        });
    }

    let field = |idx: usize| row.get(idx).unwrap_or("").trim();

    let status = StatusCode::from_code(field(COL_TRANSACTION))?;

    let employee_id = field(COL_EMPLOYEE);
    if employee_id.is_empty() {
        return Err(ParseError::EmptyEmployeeId);
    }

    let date = NaiveDate::parse_from_str(field(COL_DATE), "%Y%m%d")
        .map_err(|_| ParseError::InvalidDate(field(COL_DATE).to_string()))?;
    let time = NaiveTime::parse_from_str(field(COL_TIME), "%H%M%S")
        .map_err(|_| ParseError::InvalidTime(field(COL_TIME).to_string()))?;

    Ok(DutyRecord {
        employee_id: employee_id.to_string(),
        status,
        event_timestamp: NaiveDateTime::new(date, time),
        geo: parse_geo(&field)?,
    })
}

fn parse_geo<'a>(field: &impl Fn(usize) -> &'a str) -> Result<Option<GeoFix>, ParseError> {
    let geo_status = field(COL_GEO_STATUS);
    if !geo_status.is_empty() && geo_status.parse::<i64>().is_err() {
        return Err(ParseError::InvalidGeo {
            field: "geo status",
            value: geo_status.to_string(),
        });
    }

    let lat = parse_coordinate(field(COL_LATITUDE), "latitude")?;
    let lon = parse_coordinate(field(COL_LONGITUDE), "longitude")?;
    let accuracy = parse_coordinate(field(COL_ACCURACY), "accuracy")?;

    match (lat, lon) {
        (Some(lat), Some(lon)) => Ok(Some(GeoFix {
            lat,
            lon,
            accuracy: accuracy.unwrap_or(0.0),
        })),
        _ => Ok(None),
    }
}

fn parse_coordinate(raw: &str, name: &'static str) -> Result<Option<f64>, ParseError> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| ParseError::InvalidGeo {
            field: name,
            value: raw.to_string(),
        })
}

/// Parses the full contents of one export file.
///
/// Malformed rows are collected in [`ParsedFile::rejected`] and never abort the
/// file. Only problems that make the file unreadable as a whole are returned as
/// errors.
pub fn parse_file(contents: &[u8]) -> Result<ParsedFile, FileParseError> {
    let text = std::str::from_utf8(contents).map_err(|_| FileParseError::Encoding)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut parsed = ParsedFile::default();
    for result in reader.records() {
        let row = result?;
        let line = row.position().map(|pos| pos.line()).unwrap_or_default();
        match parse_row(&row) {
            Ok(record) => parsed.records.push(record),
            Err(error) => parsed.rejected.push(RejectedRow { line, error }),
        }
    }

    Ok(parsed)
}
