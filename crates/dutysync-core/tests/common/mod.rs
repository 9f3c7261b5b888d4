#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use dutysync_core::config::Config;
use dutysync_core::gateway::RetryPolicy;
use dutysync_core::identity::{IdentityCache, IdentityMapping};
use dutysync_core::model::{BatchOutcome, ReconciledUpdate};
use dutysync_core::remote::{DirectoryEntry, DirectoryService, RemoteError};

/// Scripted stand-in for the remote directory.
#[derive(Default)]
pub struct FakeDirectory {
    directory: Mutex<Vec<DirectoryEntry>>,
    listing_failure: Mutex<Option<String>>,
    submit_failures: Mutex<VecDeque<RemoteError>>,
    rejections: Mutex<HashMap<String, String>>,
    silent: Mutex<Vec<String>>,
    stale: Mutex<Vec<String>>,
    stale_failure: Mutex<Option<String>>,
    uppercase_logins: Mutex<bool>,
    submissions: Mutex<Vec<Vec<ReconciledUpdate>>>,
    submit_calls: Mutex<u32>,
    listing_calls: Mutex<u32>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_directory(self, entries: Vec<DirectoryEntry>) -> Self {
        *self.directory.lock().unwrap() = entries;
        self
    }

    pub fn failing_listing(self, message: &str) -> Self {
        *self.listing_failure.lock().unwrap() = Some(message.to_string());
        self
    }

    /// Errors returned by the next submit calls, in order.
    pub fn failing_submissions(self, errors: Vec<RemoteError>) -> Self {
        *self.submit_failures.lock().unwrap() = errors.into();
        self
    }

    pub fn rejecting(self, username: &str, detail: &str) -> Self {
        self.rejections
            .lock()
            .unwrap()
            .insert(username.to_string(), detail.to_string());
        self
    }

    /// The response leaves this username out entirely.
    pub fn omitting(self, username: &str) -> Self {
        self.silent.lock().unwrap().push(username.to_string());
        self
    }

    pub fn with_stale(self, usernames: &[&str]) -> Self {
        *self.stale.lock().unwrap() = usernames.iter().map(|u| u.to_string()).collect();
        self
    }

    pub fn failing_stale(self, message: &str) -> Self {
        *self.stale_failure.lock().unwrap() = Some(message.to_string());
        self
    }

    /// Outcomes echo each login upper-cased.
    pub fn echoing_uppercase(self) -> Self {
        *self.uppercase_logins.lock().unwrap() = true;
        self
    }

    /// Every batch that reached the service, including resends.
    pub fn submissions(&self) -> Vec<Vec<ReconciledUpdate>> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submit_calls(&self) -> u32 {
        *self.submit_calls.lock().unwrap()
    }

    pub fn listing_calls(&self) -> u32 {
        *self.listing_calls.lock().unwrap()
    }
}

#[async_trait]
impl DirectoryService for FakeDirectory {
    async fn fetch_directory(
        &self,
        _attributes: &[String],
    ) -> Result<Vec<DirectoryEntry>, RemoteError> {
        *self.listing_calls.lock().unwrap() += 1;
        if let Some(message) = self.listing_failure.lock().unwrap().clone() {
            return Err(RemoteError::Transport(message));
        }
        Ok(self.directory.lock().unwrap().clone())
    }

    async fn submit_updates(
        &self,
        _field: &str,
        updates: &[ReconciledUpdate],
    ) -> Result<Vec<BatchOutcome>, RemoteError> {
        *self.submit_calls.lock().unwrap() += 1;
        if let Some(err) = self.submit_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.submissions.lock().unwrap().push(updates.to_vec());

        let rejections = self.rejections.lock().unwrap();
        let silent = self.silent.lock().unwrap();
        let uppercase = *self.uppercase_logins.lock().unwrap();
        Ok(updates
            .iter()
            .filter(|u| !silent.contains(&u.username))
            .map(|u| {
                let login = if uppercase {
                    u.username.to_uppercase()
                } else {
                    u.username.clone()
                };
                match rejections.get(&u.username) {
                    Some(detail) => BatchOutcome::error(login, detail),
                    None => BatchOutcome::ok(login),
                }
            })
            .collect())
    }

    async fn query_stale(
        &self,
        _field: &str,
        _older_than_hours: u32,
    ) -> Result<Vec<String>, RemoteError> {
        if let Some(message) = self.stale_failure.lock().unwrap().clone() {
            return Err(RemoteError::Status {
                status: 500,
                body: message,
            });
        }
        Ok(self.stale.lock().unwrap().clone())
    }
}

pub fn entry(username: &str, collar_id: &str) -> DirectoryEntry {
    DirectoryEntry {
        username: username.to_string(),
        attributes: HashMap::from([("COLLAR_ID".to_string(), collar_id.to_string())]),
    }
}

/// Directory identity with no collar id attribute.
pub fn unlinked_entry(username: &str) -> DirectoryEntry {
    DirectoryEntry {
        username: username.to_string(),
        attributes: HashMap::from([("FIRSTNAME".to_string(), "Service".to_string())]),
    }
}

pub fn at(day: u32, hour: u32, min: u32, sec: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, day)
        .unwrap()
        .and_hms_opt(hour, min, sec)
        .unwrap()
}

/// Config rooted in a scratch directory, with mapping refresh off and
/// zero-delay resends.
pub fn config_in(root: &Path, extra: &[(&str, &str)]) -> Config {
    let dirs = [
        ("CSV_DIRECTORY", root.join("incoming")),
        ("PROCESSED_DIRECTORY", root.join("processed")),
        ("FAILED_FILES_DIRECTORY", root.join("failed")),
    ];
    let mut env: HashMap<String, String> = dirs
        .iter()
        .map(|(k, v)| (k.to_string(), v.display().to_string()))
        .collect();
    env.insert("SYNC_MAPPINGS".into(), "false".into());
    for (k, v) in extra {
        env.insert(k.to_string(), v.to_string());
    }

    let mut config = Config::from_lookup(|key| env.get(key).cloned()).unwrap();
    config.transport_retry = RetryPolicy::immediate(config.transport_retry.max_attempts);
    std::fs::create_dir_all(&config.csv_directory).unwrap();
    config
}

/// One 10-field export row without a geo fix.
pub fn row(code: &str, employee_id: &str, date: &str, time: &str) -> String {
    format!("{code},{employee_id},55000,{date},{time},{date}{time},0,,,")
}

pub fn write_csv(dir: &Path, name: &str, rows: &[String]) {
    let mut contents = rows.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    std::fs::write(dir.join(name), contents).unwrap();
}

pub async fn seed_mappings(cache: &IdentityCache, pairs: &[(&str, &str)]) {
    let mappings: Vec<IdentityMapping> = pairs
        .iter()
        .map(|(employee_id, username)| IdentityMapping {
            employee_id: employee_id.to_string(),
            username: username.to_string(),
            collar_id: employee_id.to_string(),
            last_updated: at(1, 0, 0, 0),
        })
        .collect();
    cache.upsert_all(&mappings).await.unwrap();
}
