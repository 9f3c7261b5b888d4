use std::fmt;

use chrono::NaiveDateTime;
use dutysync_parser::DutyRecord;
use serde::{Serialize, Serializer};

/// Wire format of the duty-status field on the remote profile.
pub const DUTY_STATUS_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Value written into the duty-status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DutyStatusValue {
    /// On duty since the given local time.
    Since(NaiveDateTime),
    /// Field cleared (off duty or stale).
    Cleared,
}

impl DutyStatusValue {
    pub fn for_record(record: &DutyRecord) -> Self {
        if record.status.is_on_duty() {
            DutyStatusValue::Since(record.event_timestamp)
        } else {
            DutyStatusValue::Cleared
        }
    }

    /// `None` is sent as JSON `null`, which clears the field remotely.
    pub fn to_wire(&self) -> Option<String> {
        match self {
            DutyStatusValue::Since(ts) => Some(ts.format(DUTY_STATUS_FORMAT).to_string()),
            DutyStatusValue::Cleared => None,
        }
    }

    pub fn from_wire(raw: Option<&str>) -> Result<Self, chrono::ParseError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(DutyStatusValue::Cleared),
            Some(text) => {
                NaiveDateTime::parse_from_str(text, DUTY_STATUS_FORMAT).map(DutyStatusValue::Since)
            }
        }
    }
}

impl fmt::Display for DutyStatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_wire() {
            Some(text) => f.write_str(&text),
            None => f.write_str("<cleared>"),
        }
    }
}

impl Serialize for DutyStatusValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

/// One username/value pair submitted to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledUpdate {
    pub username: String,
    pub value: DutyStatusValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncStatus {
    Ok,
    Error,
}

/// Per-record result reported by the remote update call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub username: String,
    pub sync_status: SyncStatus,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl BatchOutcome {
    pub fn ok(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            sync_status: SyncStatus::Ok,
            detail: String::new(),
            remote_id: None,
        }
    }

    pub fn error(username: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            sync_status: SyncStatus::Error,
            detail: detail.into(),
            remote_id: None,
        }
    }
}
