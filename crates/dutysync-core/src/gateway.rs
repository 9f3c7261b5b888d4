//! Sends a composed batch to the remote service and classifies what comes back.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::classify::{ClassifiedOutcome, ErrorVocabulary};
use crate::model::{BatchOutcome, ReconciledUpdate};
use crate::remote::{DirectoryService, RemoteError};

/// Backoff for transient transport failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay between retries (backoff is capped here).
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedRecord {
    pub outcome: BatchOutcome,
    pub class: ClassifiedOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// One entry per submitted update, in submission order.
    pub records: Vec<ClassifiedRecord>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_error: Option<String>,
}

impl SyncReport {
    pub fn count(&self, pred: impl Fn(&ClassifiedOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.class)).count()
    }

    pub fn ok_count(&self) -> usize {
        self.count(|c| matches!(c, ClassifiedOutcome::Ok))
    }

    pub fn expected_count(&self) -> usize {
        self.count(|c| matches!(c, ClassifiedOutcome::Expected(_)))
    }

    pub fn real_count(&self) -> usize {
        self.count(|c| matches!(c, ClassifiedOutcome::Real))
    }

    pub fn real_error_usernames(&self) -> HashSet<&str> {
        self.records
            .iter()
            .filter(|r| !r.class.is_terminal())
            .map(|r| r.outcome.username.as_str())
            .collect()
    }

    pub fn get(&self, username: &str) -> Option<&ClassifiedRecord> {
        self.records.iter().find(|r| r.outcome.username == username)
    }
}

pub struct SyncGateway<'a> {
    service: &'a dyn DirectoryService,
    field: &'a str,
    vocabulary: &'a ErrorVocabulary,
    retry: &'a RetryPolicy,
}

impl<'a> SyncGateway<'a> {
    pub fn new(
        service: &'a dyn DirectoryService,
        field: &'a str,
        vocabulary: &'a ErrorVocabulary,
        retry: &'a RetryPolicy,
    ) -> Self {
        Self {
            service,
            field,
            vocabulary,
            retry,
        }
    }

    pub fn service(&self) -> &'a dyn DirectoryService {
        self.service
    }

    pub fn field(&self) -> &'a str {
        self.field
    }

    /// Submits the whole batch in one call.
    ///
    /// Transient transport failures are retried as full resends. A well-formed
    /// response is final even when it carries per-record errors. If every
    /// attempt fails, every update is reported as a real error.
    pub async fn sync_batch(&self, updates: &[ReconciledUpdate]) -> SyncReport {
        if updates.is_empty() {
            return SyncReport::default();
        }

        let mut delay = self.retry.base_delay;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        let last_error = loop {
            attempt += 1;
            match self.service.submit_updates(self.field, updates).await {
                Ok(outcomes) => {
                    let report = self.classify(updates, outcomes, attempt);
                    info!(
                        submitted = updates.len(),
                        ok = report.ok_count(),
                        expected = report.expected_count(),
                        real = report.real_count(),
                        attempts = attempt,
                        "Batch sync completed"
                    );
                    return report;
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        retry_in = ?delay,
                        error = %err,
                        "Batch sync transport failure, resending"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.retry.max_delay);
                }
                Err(err) => break err,
            }
        };

        error!(
            attempts = attempt,
            submitted = updates.len(),
            error = %last_error,
            "Batch sync failed; every update counts as a real error"
        );
        transport_failure(updates, &last_error, attempt)
    }

    fn classify(
        &self,
        updates: &[ReconciledUpdate],
        outcomes: Vec<BatchOutcome>,
        attempts: u32,
    ) -> SyncReport {
        let mut by_username: HashMap<String, BatchOutcome> = HashMap::new();
        for outcome in outcomes {
            let key = outcome.username.to_lowercase();
            if by_username.contains_key(&key) {
                debug!(username = %outcome.username, "Ignoring duplicate outcome");
                continue;
            }
            by_username.insert(key, outcome);
        }

        let records = updates
            .iter()
            .map(|update| {
                let mut outcome = by_username
                    .remove(&update.username.to_lowercase())
                    .unwrap_or_else(|| {
                        BatchOutcome::error(&update.username, "no outcome returned for this user")
                    });
                // Report lookups key on the submitted username, not the echoed one.
                outcome.username = update.username.clone();
                let class = self.vocabulary.classify(&outcome);
                log_classification(&outcome, class);
                ClassifiedRecord { outcome, class }
            })
            .collect();

        for stray in by_username.values() {
            debug!(username = %stray.username, "Outcome for a user that was not submitted");
        }

        SyncReport {
            records,
            attempts,
            transport_error: None,
        }
    }
}

fn transport_failure(updates: &[ReconciledUpdate], err: &RemoteError, attempts: u32) -> SyncReport {
    let detail = err.to_string();
    SyncReport {
        records: updates
            .iter()
            .map(|update| ClassifiedRecord {
                outcome: BatchOutcome::error(&update.username, detail.clone()),
                class: ClassifiedOutcome::Real,
            })
            .collect(),
        attempts,
        transport_error: Some(detail),
    }
}

fn log_classification(outcome: &BatchOutcome, class: ClassifiedOutcome) {
    match class {
        ClassifiedOutcome::Ok => debug!(username = %outcome.username, "Update applied"),
        ClassifiedOutcome::Expected(kind) => info!(
            username = %outcome.username,
            kind = kind.as_str(),
            detail = %outcome.detail,
            "Expected remote refusal"
        ),
        ClassifiedOutcome::Real => warn!(
            username = %outcome.username,
            detail = %outcome.detail,
            "Remote update failed"
        ),
    }
}
