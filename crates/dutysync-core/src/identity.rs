//! Local employee-id → username cache backed by the `worker_mapping` table.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::db::DbPool;
use crate::error::Result;
use crate::remote::{DirectoryEntry, DirectoryService};
use crate::schedule::{self, RefreshStatus, USER_MAPPING_SYNC};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct IdentityMapping {
    pub employee_id: String,
    pub username: String,
    pub collar_id: String,
    pub last_updated: NaiveDateTime,
}

/// Read access used by the batch composer.
pub trait IdentityLookup {
    fn username_for(&self, employee_id: &str) -> Option<&str>;
}

/// In-memory copy of the mapping table taken at the start of a cycle.
#[derive(Debug, Clone, Default)]
pub struct IdentitySnapshot {
    by_employee: HashMap<String, String>,
}

impl IdentitySnapshot {
    pub fn len(&self) -> usize {
        self.by_employee.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_employee.is_empty()
    }
}

impl IdentityLookup for IdentitySnapshot {
    fn username_for(&self, employee_id: &str) -> Option<&str> {
        self.by_employee.get(employee_id).map(String::as_str)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for IdentitySnapshot {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self {
            by_employee: pairs
                .into_iter()
                .map(|(e, u)| (e.to_string(), u.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub status: RefreshStatus,
    pub entries_listed: usize,
    pub mappings_written: usize,
    pub skipped_without_identifier: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RefreshReport {
    fn failed(error: String) -> Self {
        Self {
            status: RefreshStatus::Failed,
            entries_listed: 0,
            mappings_written: 0,
            skipped_without_identifier: 0,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentityCache {
    pool: DbPool,
}

impl IdentityCache {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn lookup(&self, employee_id: &str) -> Result<Option<String>> {
        let username = sqlx::query_scalar::<_, String>(
            "SELECT username FROM worker_mapping WHERE employee_id = ?",
        )
        .bind(employee_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(username)
    }

    pub async fn all(&self) -> Result<Vec<IdentityMapping>> {
        let rows = sqlx::query_as::<_, IdentityMapping>(
            r#"
                SELECT employee_id, username, collar_id, last_updated
                FROM worker_mapping
                ORDER BY employee_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn snapshot(&self) -> Result<IdentitySnapshot> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT employee_id, username FROM worker_mapping")
                .fetch_all(&self.pool)
                .await?;
        Ok(IdentitySnapshot {
            by_employee: rows.into_iter().collect(),
        })
    }

    /// Upserts every mapping inside one transaction. Rows for identities not
    /// present in `mappings` are left untouched.
    pub async fn upsert_all(&self, mappings: &[IdentityMapping]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        for mapping in mappings {
            sqlx::query(
                r#"
                    INSERT INTO worker_mapping (employee_id, username, collar_id, last_updated)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT (employee_id) DO UPDATE SET
                        username = excluded.username,
                        collar_id = excluded.collar_id,
                        last_updated = excluded.last_updated
                "#,
            )
            .bind(&mapping.employee_id)
            .bind(&mapping.username)
            .bind(&mapping.collar_id)
            .bind(mapping.last_updated)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(mappings.len())
    }

    /// Pulls the full directory and rewrites the cache from it.
    ///
    /// Never clears existing mappings on failure; the attempt is recorded in
    /// `sync_tracking` so the next cycle retries.
    pub async fn refresh(
        &self,
        service: &dyn DirectoryService,
        attributes: &[String],
        identifier_field: &str,
        now: NaiveDateTime,
    ) -> Result<RefreshReport> {
        let report = match service.fetch_directory(attributes).await {
            Err(err) => {
                error!(error = %err, "Directory listing failed; keeping existing mappings");
                RefreshReport::failed(err.to_string())
            }
            Ok(entries) => self.apply_listing(&entries, identifier_field, now).await,
        };

        schedule::record_attempt(&self.pool, USER_MAPPING_SYNC, report.status, now).await?;
        Ok(report)
    }

    async fn apply_listing(
        &self,
        entries: &[DirectoryEntry],
        identifier_field: &str,
        now: NaiveDateTime,
    ) -> RefreshReport {
        let (mappings, skipped) = mappings_from_listing(entries, identifier_field, now);

        if mappings.is_empty() {
            warn!(
                listed = entries.len(),
                identifier_field, "Directory listing produced no usable mappings"
            );
            return RefreshReport {
                status: RefreshStatus::Empty,
                entries_listed: entries.len(),
                mappings_written: 0,
                skipped_without_identifier: skipped,
                error: None,
            };
        }

        match self.upsert_all(&mappings).await {
            Ok(written) => {
                info!(written, skipped, "User mapping refresh completed");
                RefreshReport {
                    status: RefreshStatus::Ok,
                    entries_listed: entries.len(),
                    mappings_written: written,
                    skipped_without_identifier: skipped,
                    error: None,
                }
            }
            Err(err) => {
                error!(error = %err, "Failed to store refreshed mappings");
                RefreshReport {
                    entries_listed: entries.len(),
                    ..RefreshReport::failed(err.to_string())
                }
            }
        }
    }
}

/// Builds one mapping per identity carrying the identifier attribute. When two
/// identities claim the same employee id, the later one in the listing wins.
fn mappings_from_listing(
    entries: &[DirectoryEntry],
    identifier_field: &str,
    now: NaiveDateTime,
) -> (Vec<IdentityMapping>, usize) {
    let mut by_employee: HashMap<&str, usize> = HashMap::new();
    let mut mappings: Vec<IdentityMapping> = Vec::new();
    let mut skipped = 0;

    for entry in entries {
        let Some(collar_id) = entry.attribute(identifier_field) else {
            skipped += 1;
            continue;
        };
        let mapping = IdentityMapping {
            employee_id: collar_id.to_string(),
            username: entry.username.clone(),
            collar_id: collar_id.to_string(),
            last_updated: now,
        };
        match by_employee.get(collar_id) {
            Some(&idx) => {
                debug!(
                    employee_id = collar_id,
                    previous = %mappings[idx].username,
                    username = %entry.username,
                    "Duplicate identifier in directory listing"
                );
                mappings[idx] = mapping;
            }
            None => {
                by_employee.insert(collar_id, mappings.len());
                mappings.push(mapping);
            }
        }
    }

    (mappings, skipped)
}
