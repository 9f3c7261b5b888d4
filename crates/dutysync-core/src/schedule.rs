//! Mapping-refresh bookkeeping and the pure scheduling decision built on it.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;
use sqlx::Row;

use crate::db::DbPool;
use crate::error::{CoreError, Result};

pub const USER_MAPPING_SYNC: &str = "user_mapping";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RefreshStatus {
    Ok,
    Empty,
    Failed,
}

impl RefreshStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshStatus::Ok => "OK",
            RefreshStatus::Empty => "EMPTY",
            RefreshStatus::Failed => "FAILED",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "OK" => Ok(RefreshStatus::Ok),
            "EMPTY" => Ok(RefreshStatus::Empty),
            "FAILED" => Ok(RefreshStatus::Failed),
            other => Err(CoreError::Corrupt(format!("unknown sync status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTrackingRecord {
    pub sync_type: String,
    pub last_sync_date: NaiveDate,
    pub last_sync_time: NaiveDateTime,
    pub last_success_date: Option<NaiveDate>,
    pub status: RefreshStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    /// Local hour from which the daily refresh becomes due.
    pub sync_hour: u32,
    /// Days without a successful refresh before one is forced regardless of hour.
    pub sync_retry_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    NeverRun,
    PreviousAttemptUnsuccessful,
    Overdue,
    Scheduled,
}

/// Decides whether the mapping refresh runs this cycle.
pub fn refresh_due(
    last: Option<&SyncTrackingRecord>,
    now: NaiveDateTime,
    policy: &SchedulePolicy,
) -> Option<RefreshReason> {
    let Some(last) = last else {
        return Some(RefreshReason::NeverRun);
    };

    if last.status != RefreshStatus::Ok {
        return Some(RefreshReason::PreviousAttemptUnsuccessful);
    }

    let today = now.date();
    let success_date = last.last_success_date.unwrap_or(last.last_sync_date);
    if (today - success_date).num_days() > policy.sync_retry_days {
        return Some(RefreshReason::Overdue);
    }

    if now.hour() >= policy.sync_hour && success_date != today {
        return Some(RefreshReason::Scheduled);
    }

    None
}

pub async fn load_tracking(pool: &DbPool, sync_type: &str) -> Result<Option<SyncTrackingRecord>> {
    let row = sqlx::query(
        r#"
            SELECT sync_type, last_sync_date, last_sync_time, last_success_date, status
            FROM sync_tracking
            WHERE sync_type = ?
        "#,
    )
    .bind(sync_type)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status: String = row.try_get("status")?;
    Ok(Some(SyncTrackingRecord {
        sync_type: row.try_get("sync_type")?,
        last_sync_date: row.try_get("last_sync_date")?,
        last_sync_time: row.try_get("last_sync_time")?,
        last_success_date: row.try_get("last_success_date")?,
        status: RefreshStatus::parse(&status)?,
    }))
}

/// Records an attempt. A successful attempt also moves `last_success_date`;
/// unsuccessful ones keep the previous value.
pub async fn record_attempt(
    pool: &DbPool,
    sync_type: &str,
    status: RefreshStatus,
    now: NaiveDateTime,
) -> Result<()> {
    let success_date = (status == RefreshStatus::Ok).then(|| now.date());

    sqlx::query(
        r#"
            INSERT INTO sync_tracking (sync_type, last_sync_date, last_sync_time, last_success_date, status)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (sync_type) DO UPDATE SET
                last_sync_date = excluded.last_sync_date,
                last_sync_time = excluded.last_sync_time,
                last_success_date = COALESCE(excluded.last_success_date, sync_tracking.last_success_date),
                status = excluded.status
        "#,
    )
    .bind(sync_type)
    .bind(now.date())
    .bind(now)
    .bind(success_date)
    .bind(status.as_str())
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: SchedulePolicy = SchedulePolicy {
        sync_hour: 20,
        sync_retry_days: 2,
    };

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(hour, 15, 0)
            .unwrap()
    }

    fn tracked(day: u32, success_day: Option<u32>, status: RefreshStatus) -> SyncTrackingRecord {
        SyncTrackingRecord {
            sync_type: USER_MAPPING_SYNC.into(),
            last_sync_date: at(day, 0).date(),
            last_sync_time: at(day, 20),
            last_success_date: success_day.map(|d| at(d, 0).date()),
            status,
        }
    }

    #[test]
    fn runs_when_never_run() {
        assert_eq!(refresh_due(None, at(17, 3), &POLICY), Some(RefreshReason::NeverRun));
    }

    #[test]
    fn skipped_before_sync_hour_after_success_today() {
        let last = tracked(17, Some(17), RefreshStatus::Ok);
        assert_eq!(refresh_due(Some(&last), at(17, 9), &POLICY), None);
    }

    #[test]
    fn skipped_after_sync_hour_when_already_done_today() {
        let last = tracked(17, Some(17), RefreshStatus::Ok);
        assert_eq!(refresh_due(Some(&last), at(17, 22), &POLICY), None);
    }

    #[test]
    fn scheduled_after_sync_hour_on_new_day() {
        let last = tracked(16, Some(16), RefreshStatus::Ok);
        assert_eq!(refresh_due(Some(&last), at(17, 9), &POLICY), None);
        assert_eq!(
            refresh_due(Some(&last), at(17, 20), &POLICY),
            Some(RefreshReason::Scheduled)
        );
    }

    #[test]
    fn forced_when_overdue_regardless_of_hour() {
        let last = tracked(14, Some(14), RefreshStatus::Ok);
        assert_eq!(
            refresh_due(Some(&last), at(17, 1), &POLICY),
            Some(RefreshReason::Overdue)
        );
        let within = tracked(15, Some(15), RefreshStatus::Ok);
        assert_eq!(refresh_due(Some(&within), at(17, 1), &POLICY), None);
    }

    #[test]
    fn retried_after_empty_or_failed_attempt() {
        for status in [RefreshStatus::Empty, RefreshStatus::Failed] {
            let last = tracked(17, Some(17), status);
            assert_eq!(
                refresh_due(Some(&last), at(17, 2), &POLICY),
                Some(RefreshReason::PreviousAttemptUnsuccessful)
            );
        }
    }

    #[tokio::test]
    async fn failed_attempt_keeps_last_success_date() {
        let pool = crate::db::connect_in_memory().await.unwrap();

        record_attempt(&pool, USER_MAPPING_SYNC, RefreshStatus::Ok, at(15, 20))
            .await
            .unwrap();
        record_attempt(&pool, USER_MAPPING_SYNC, RefreshStatus::Failed, at(17, 20))
            .await
            .unwrap();

        let record = load_tracking(&pool, USER_MAPPING_SYNC)
            .await
            .unwrap()
            .expect("tracking row");
        assert_eq!(record.status, RefreshStatus::Failed);
        assert_eq!(record.last_sync_date, at(17, 0).date());
        assert_eq!(record.last_success_date, Some(at(15, 0).date()));
    }
}
