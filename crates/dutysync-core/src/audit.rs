//! Append-only processing log and per-file retry counters.

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::info;

use crate::db::DbPool;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ProcessingLogRecord {
    pub filename: String,
    pub file_hash: Option<String>,
    pub processed_at: NaiveDateTime,
    pub disposition: String,
    pub entries_processed: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub errors: String,
}

pub async fn append(pool: &DbPool, record: &ProcessingLogRecord) -> Result<()> {
    sqlx::query(
        r#"
            INSERT INTO processing_log
                (filename, file_hash, processed_at, disposition, entries_processed, success_count, error_count, errors)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.filename)
    .bind(&record.file_hash)
    .bind(record.processed_at)
    .bind(&record.disposition)
    .bind(record.entries_processed)
    .bind(record.success_count)
    .bind(record.error_count)
    .bind(&record.errors)
    .execute(pool)
    .await?;

    info!(
        file = %record.filename,
        disposition = %record.disposition,
        entries = record.entries_processed,
        successes = record.success_count,
        errors = record.error_count,
        "Processing log entry"
    );
    Ok(())
}

/// Most recent entries first.
pub async fn recent(pool: &DbPool, limit: i64) -> Result<Vec<ProcessingLogRecord>> {
    let rows = sqlx::query_as::<_, ProcessingLogRecord>(
        r#"
            SELECT filename, file_hash, processed_at, disposition,
                   entries_processed, success_count, error_count, errors
            FROM processing_log
            ORDER BY id DESC
            LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Bumps the retry counter for `filename` and returns the new value.
pub async fn track_retry(pool: &DbPool, filename: &str, now: NaiveDateTime) -> Result<u32> {
    let count: i64 = sqlx::query_scalar(
        r#"
            INSERT INTO file_retry_tracking (filename, retry_count, first_seen, last_retry)
            VALUES (?, 1, ?, ?)
            ON CONFLICT (filename) DO UPDATE SET
                retry_count = file_retry_tracking.retry_count + 1,
                last_retry = excluded.last_retry
            RETURNING retry_count
        "#,
    )
    .bind(filename)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(u32::try_from(count).unwrap_or(u32::MAX))
}

pub async fn clear_retry(pool: &DbPool, filename: &str) -> Result<()> {
    sqlx::query("DELETE FROM file_retry_tracking WHERE filename = ?")
        .bind(filename)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::db;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 17)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn retry_counter_increments_and_clears() {
        let pool = db::connect_in_memory().await.unwrap();

        assert_eq!(track_retry(&pool, "a.csv", now()).await.unwrap(), 1);
        assert_eq!(track_retry(&pool, "a.csv", now()).await.unwrap(), 2);
        assert_eq!(track_retry(&pool, "b.csv", now()).await.unwrap(), 1);

        clear_retry(&pool, "a.csv").await.unwrap();
        assert_eq!(track_retry(&pool, "a.csv", now()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn log_is_listed_newest_first() {
        let pool = db::connect_in_memory().await.unwrap();
        for name in ["first.csv", "second.csv"] {
            append(
                &pool,
                &ProcessingLogRecord {
                    filename: name.into(),
                    file_hash: None,
                    processed_at: now(),
                    disposition: "advanced".into(),
                    entries_processed: 3,
                    success_count: 3,
                    error_count: 0,
                    errors: String::new(),
                },
            )
            .await
            .unwrap();
        }

        let rows = recent(&pool, 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].filename, "second.csv");
    }
}
