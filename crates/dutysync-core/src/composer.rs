//! Merges the records of every admitted file into one conflict-free batch.
//!
//! Records are fed in discovery order (file order, then row order). For each
//! employee the record with the greatest event timestamp wins; on equal
//! timestamps the one seen last wins. Usernames are resolved through the
//! identity snapshot afterwards, and the same rule settles the rare case of two
//! employee ids resolving to one username.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDateTime;
use dutysync_parser::{DutyRecord, StatusCode};
use serde::Serialize;

use crate::identity::IdentityLookup;
use crate::model::{DutyStatusValue, ReconciledUpdate};

/// A record tagged with the index of the file it came from.
#[derive(Debug, Clone, Copy)]
pub struct SourcedRecord<'a> {
    pub file: usize,
    pub record: &'a DutyRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposedUpdate {
    pub update: ReconciledUpdate,
    pub employee_id: String,
    pub status: StatusCode,
    pub event_timestamp: NaiveDateTime,
    /// File holding the winning record.
    pub source_file: usize,
    /// Every file that carried any record for this username.
    pub contributing_files: BTreeSet<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ComposedBatch {
    /// One entry per username, ordered by username.
    pub updates: Vec<ComposedUpdate>,
    pub mapping_misses: BTreeSet<String>,
    /// Files that carried a record for each missing employee id.
    pub miss_files: BTreeMap<String, BTreeSet<usize>>,
}

impl ComposedBatch {
    pub fn reconciled(&self) -> Vec<ReconciledUpdate> {
        self.updates.iter().map(|u| u.update.clone()).collect()
    }
}

struct Candidate<'a> {
    seq: usize,
    file: usize,
    record: &'a DutyRecord,
    files: BTreeSet<usize>,
}

impl Candidate<'_> {
    fn beaten_by(&self, seq: usize, timestamp: NaiveDateTime) -> bool {
        (timestamp, seq) >= (self.record.event_timestamp, self.seq)
    }
}

pub fn compose<'a, I, L>(records: I, identities: &L) -> ComposedBatch
where
    I: IntoIterator<Item = SourcedRecord<'a>>,
    L: IdentityLookup + ?Sized,
{
    let mut by_employee: HashMap<&'a str, Candidate<'a>> = HashMap::new();

    for (seq, sourced) in records.into_iter().enumerate() {
        let record = sourced.record;
        match by_employee.get_mut(record.employee_id.as_str()) {
            Some(current) => {
                current.files.insert(sourced.file);
                if current.beaten_by(seq, record.event_timestamp) {
                    current.seq = seq;
                    current.file = sourced.file;
                    current.record = record;
                }
            }
            None => {
                by_employee.insert(
                    record.employee_id.as_str(),
                    Candidate {
                        seq,
                        file: sourced.file,
                        record,
                        files: BTreeSet::from([sourced.file]),
                    },
                );
            }
        }
    }

    let mut batch = ComposedBatch::default();
    let mut by_username: BTreeMap<String, Candidate<'a>> = BTreeMap::new();

    for (employee_id, candidate) in by_employee {
        let Some(username) = identities.username_for(employee_id) else {
            batch.mapping_misses.insert(employee_id.to_string());
            batch
                .miss_files
                .insert(employee_id.to_string(), candidate.files);
            continue;
        };

        match by_username.get_mut(username) {
            Some(current) => {
                let mut files = std::mem::take(&mut current.files);
                files.extend(candidate.files.iter().copied());
                if current.beaten_by(candidate.seq, candidate.record.event_timestamp) {
                    *current = candidate;
                }
                current.files = files;
            }
            None => {
                by_username.insert(username.to_string(), candidate);
            }
        }
    }

    batch.updates = by_username
        .into_iter()
        .map(|(username, winner)| ComposedUpdate {
            update: ReconciledUpdate {
                username,
                value: DutyStatusValue::for_record(winner.record),
            },
            employee_id: winner.record.employee_id.clone(),
            status: winner.record.status,
            event_timestamp: winner.record.event_timestamp,
            source_file: winner.file,
            contributing_files: winner.files,
        })
        .collect();

    batch
}
