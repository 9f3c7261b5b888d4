pub mod errors;
pub mod model;
mod record;

pub use errors::{FileParseError, ParseError};
pub use model::{DutyRecord, GeoFix, StatusCode};
pub use record::{parse_file, parse_row, ParsedFile, RejectedRow, EXPECTED_FIELDS};

#[cfg(test)]
mod tests;
