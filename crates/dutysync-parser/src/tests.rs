use std::fs;
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveTime};
use csv::StringRecord;

use crate::errors::{FileParseError, ParseError};
use crate::model::StatusCode;
use crate::{parse_file, parse_row, EXPECTED_FIELDS};

fn fixture(path: &str) -> Vec<u8> {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let full_path = base.join("tests/data").join(path);
    fs::read(&full_path)
        .unwrap_or_else(|err| panic!("failed to read fixture {}: {}", full_path.display(), err))
}

fn row(fields: &[&str]) -> StringRecord {
    StringRecord::from(fields.to_vec())
}

#[test]
fn parses_clean_export() {
    let parsed = parse_file(&fixture("BOBO_20240617_143000_output.csv")).expect("parse failed");

    assert_eq!(parsed.records.len(), 3);
    assert!(parsed.rejected.is_empty());

    let first = &parsed.records[0];
    assert_eq!(first.employee_id, "00100");
    assert_eq!(first.status, StatusCode::On);
    assert_eq!(first.event_date(), NaiveDate::from_ymd_opt(2024, 6, 17).unwrap());
    assert_eq!(first.event_time(), NaiveTime::from_hms_opt(14, 30, 0).unwrap());
    let geo = first.geo.expect("geo fix");
    assert!((geo.lat - 51.507351).abs() < 1e-9);
    assert!((geo.accuracy - 12.5).abs() < 1e-9);

    let second = &parsed.records[1];
    assert_eq!(second.status, StatusCode::Off);
    assert!(second.geo.is_none());
}

#[test]
fn rejects_malformed_rows_without_dropping_file() {
    let parsed = parse_file(&fixture("BOBO_20240617_143500_mixed.csv")).expect("parse failed");

    assert_eq!(parsed.records.len(), 1);
    assert_eq!(parsed.records[0].employee_id, "00100");

    let errors: Vec<&ParseError> = parsed.rejected.iter().map(|r| &r.error).collect();
    assert_eq!(errors.len(), 5);
    assert_eq!(errors[0], &ParseError::EmptyEmployeeId);
    assert_eq!(errors[1], &ParseError::UnknownStatus("XYZ".into()));
    assert!(matches!(errors[2], ParseError::InvalidDate(_)));
    assert_eq!(
        errors[3],
        &ParseError::FieldCount {
            expected: EXPECTED_FIELDS,
            found: 4
        }
    );
    assert!(matches!(
        errors[4],
        ParseError::InvalidGeo {
            field: "latitude",
            ..
        }
    ));
    assert_eq!(parsed.rejected[0].line, 2);
}

#[test]
fn extra_fields_are_rejected() {
    let err = parse_row(&row(&[
        "BON", "1", "2", "20240617", "143000", "", "", "", "", "", "extra",
    ]))
    .unwrap_err();
    assert_eq!(
        err,
        ParseError::FieldCount {
            expected: EXPECTED_FIELDS,
            found: 11
        }
    );
}

#[test]
fn invalid_time_is_rejected() {
    let err = parse_row(&row(&[
        "BON", "1", "2", "20240617", "146100", "", "", "", "", "",
    ]))
    .unwrap_err();
    assert_eq!(err, ParseError::InvalidTime("146100".into()));
}

#[test]
fn status_codes_accept_plain_spellings() {
    assert_eq!(StatusCode::from_code("on").unwrap(), StatusCode::On);
    assert_eq!(StatusCode::from_code(" BOF ").unwrap(), StatusCode::Off);
    assert!(StatusCode::from_code("BREAK").is_err());
}

#[test]
fn invalid_utf8_fails_whole_file() {
    let err = parse_file(&[0x42, 0x4f, 0xff, 0xfe]).unwrap_err();
    assert!(matches!(err, FileParseError::Encoding));
}

#[test]
fn empty_file_has_no_records() {
    let parsed = parse_file(b"").expect("empty file parses");
    assert!(parsed.is_empty());
    assert!(parsed.rejected.is_empty());
}
