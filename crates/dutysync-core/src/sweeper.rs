use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{error, info};

use crate::gateway::SyncGateway;
use crate::model::{DutyStatusValue, ReconciledUpdate};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub stale_found: usize,
    pub cleared: usize,
    pub expected: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Clears the duty-status field on every profile whose value is older than
/// `stale_after_hours`. Returns a report instead of failing; anything left
/// behind is picked up by the next cycle.
pub async fn sweep(gateway: &SyncGateway<'_>, stale_after_hours: u32) -> SweepReport {
    let stale = match gateway
        .service()
        .query_stale(gateway.field(), stale_after_hours)
        .await
    {
        Ok(usernames) => usernames,
        Err(err) => {
            error!(error = %err, "Stale duty-status query failed");
            return SweepReport {
                error: Some(err.to_string()),
                ..SweepReport::default()
            };
        }
    };

    let usernames: BTreeSet<String> = stale.into_iter().collect();
    if usernames.is_empty() {
        info!("Auto-cleanup: no users required duty status clearing");
        return SweepReport::default();
    }

    let updates: Vec<ReconciledUpdate> = usernames
        .into_iter()
        .map(|username| ReconciledUpdate {
            username,
            value: DutyStatusValue::Cleared,
        })
        .collect();

    let report = gateway.sync_batch(&updates).await;
    let summary = SweepReport {
        stale_found: updates.len(),
        cleared: report.ok_count(),
        expected: report.expected_count(),
        failed: report.real_count(),
        error: report.transport_error.clone(),
    };

    info!(
        stale = summary.stale_found,
        cleared = summary.cleared,
        expected = summary.expected,
        failed = summary.failed,
        "Auto-cleanup finished"
    );
    summary
}
