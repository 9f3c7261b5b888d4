//! One polling iteration: mapping refresh, file batch, sync, cleanup sweep.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::audit::{self, ProcessingLogRecord};
use crate::classify::ClassifiedOutcome;
use crate::composer::{self, ComposedBatch, SourcedRecord};
use crate::config::Config;
use crate::db::DbPool;
use crate::files::{self, FileDisposition};
use crate::gateway::{SyncGateway, SyncReport};
use crate::identity::{IdentityCache, RefreshReport};
use crate::ingestion::{self, FileLoad, LoadedFile};
use crate::remote::DirectoryService;
use crate::schedule::{self, RefreshReason, USER_MAPPING_SYNC};
use crate::sweeper::{self, SweepReport};

pub struct CycleContext<'a> {
    pub pool: &'a DbPool,
    pub service: &'a dyn DirectoryService,
    pub config: &'a Config,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub reason: RefreshReason,
    #[serde(flatten)]
    pub report: RefreshReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub name: String,
    pub disposition: FileDisposition,
    pub records: usize,
    pub rejected_rows: usize,
    pub successes: usize,
    pub real_errors: usize,
    /// Submitted updates whose winning record came from this file.
    pub winning_updates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub started_at: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh: Option<RefreshSummary>,
    pub files_admitted: usize,
    pub files_deferred: usize,
    pub files: Vec<FileSummary>,
    pub records_parsed: usize,
    pub updates_submitted: usize,
    pub ok: usize,
    pub expected: usize,
    pub real: usize,
    pub mapping_misses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_error: Option<String>,
    pub sweep: SweepReport,
    /// Component failures caught during the cycle.
    pub errors: Vec<String>,
}

impl CycleSummary {
    fn new(started_at: NaiveDateTime) -> Self {
        Self {
            started_at,
            refresh: None,
            files_admitted: 0,
            files_deferred: 0,
            files: Vec::new(),
            records_parsed: 0,
            updates_submitted: 0,
            ok: 0,
            expected: 0,
            real: 0,
            mapping_misses: Vec::new(),
            transport_error: None,
            sweep: SweepReport::default(),
            errors: Vec::new(),
        }
    }

    fn record_error(&mut self, phase: &str, err: &anyhow::Error) {
        error!(phase, error = %format!("{err:#}"), "Cycle phase failed");
        self.errors.push(format!("{phase}: {err:#}"));
    }

    pub fn file(&self, name: &str) -> Option<&FileSummary> {
        self.files.iter().find(|f| f.name == name)
    }
}

/// Runs one cycle to completion. Component failures are logged and recorded in
/// the summary; the cleanup sweep runs whatever happened before it.
pub async fn run_cycle(ctx: &CycleContext<'_>, now: NaiveDateTime) -> CycleSummary {
    let config = ctx.config;
    let mut summary = CycleSummary::new(now);
    let cache = IdentityCache::new(ctx.pool.clone());
    let gateway = SyncGateway::new(
        ctx.service,
        &config.duty_status_field,
        &config.expected_errors,
        &config.transport_retry,
    );

    if config.sync_mappings {
        match refresh_if_due(ctx, &cache, now).await {
            Ok(refresh) => summary.refresh = refresh,
            Err(err) => summary.record_error("mapping refresh", &err),
        }
    }

    if let Err(err) = process_files(ctx, &cache, &gateway, now, &mut summary).await {
        summary.record_error("file processing", &err);
    }

    summary.sweep = sweeper::sweep(&gateway, config.auto_cleanup_hours).await;

    info!(
        files = summary.files.len(),
        deferred = summary.files_deferred,
        records = summary.records_parsed,
        submitted = summary.updates_submitted,
        ok = summary.ok,
        expected = summary.expected,
        real = summary.real,
        misses = summary.mapping_misses.len(),
        swept = summary.sweep.cleared,
        errors = summary.errors.len(),
        "Cycle complete"
    );
    summary
}

/// Evaluates the refresh schedule and runs at most one refresh attempt.
pub async fn refresh_if_due(
    ctx: &CycleContext<'_>,
    cache: &IdentityCache,
    now: NaiveDateTime,
) -> Result<Option<RefreshSummary>> {
    let last = schedule::load_tracking(ctx.pool, USER_MAPPING_SYNC)
        .await
        .context("failed to load sync tracking")?;

    let Some(reason) = schedule::refresh_due(last.as_ref(), now, &ctx.config.schedule) else {
        info!("User mapping refresh not due");
        return Ok(None);
    };

    info!(?reason, "Starting user mapping refresh");
    let report = cache
        .refresh(
            ctx.service,
            &ctx.config.user_attributes,
            &ctx.config.identifier_field,
            now,
        )
        .await
        .context("failed to record mapping refresh attempt")?;

    Ok(Some(RefreshSummary { reason, report }))
}

async fn process_files(
    ctx: &CycleContext<'_>,
    cache: &IdentityCache,
    gateway: &SyncGateway<'_>,
    now: NaiveDateTime,
    summary: &mut CycleSummary,
) -> Result<()> {
    let config = ctx.config;
    let discovery = files::discover(&config.csv_directory, config.batch_size).with_context(|| {
        format!(
            "failed to list CSV files in {}",
            config.csv_directory.display()
        )
    })?;
    summary.files_admitted = discovery.admitted.len();
    summary.files_deferred = discovery.deferred;

    if discovery.admitted.is_empty() {
        info!("No CSV files found to process");
        return Ok(());
    }

    let loaded = ingestion::load_files(discovery.admitted);
    summary.records_parsed = loaded
        .iter()
        .filter_map(LoadedFile::parsed)
        .map(|p| p.records.len())
        .sum();

    let snapshot = match cache.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            summary.files = loaded
                .iter()
                .map(|f| file_summary(f, FileDisposition::Pending))
                .collect();
            return Err(err).context("failed to load identity mappings");
        }
    };

    let records = loaded.iter().enumerate().flat_map(|(file, loaded)| {
        loaded
            .parsed()
            .into_iter()
            .flat_map(|parsed| parsed.records.iter())
            .map(move |record| SourcedRecord { file, record })
    });
    let batch = composer::compose(records, &snapshot);

    for employee_id in &batch.mapping_misses {
        let files: Vec<&str> = batch.miss_files[employee_id]
            .iter()
            .map(|&idx| loaded[idx].file.name.as_str())
            .collect();
        warn!(employee_id = %employee_id, ?files, "No username mapping found for employee");
    }
    summary.mapping_misses = batch.mapping_misses.iter().cloned().collect();

    let report = gateway.sync_batch(&batch.reconciled()).await;
    summary.updates_submitted = report.records.len();
    summary.ok = report.ok_count();
    summary.expected = report.expected_count();
    summary.real = report.real_count();
    summary.transport_error = report.transport_error.clone();

    let dispositions = decide_dispositions(&loaded, &batch, &report);
    for (idx, (file, disposition)) in loaded.iter().zip(dispositions).enumerate() {
        let stats = FileStats::collect(idx, file, &batch, &report);
        let file_summary = apply_disposition(ctx, file, disposition, &stats, now).await;
        if let Some(err) = &file_summary.error {
            summary.errors.push(format!("{}: {err}", file.file.name));
        }
        summary.files.push(file_summary);
    }

    Ok(())
}

/// A parsed file advances unless a username it carried a record for ended in a
/// real error. Unreadable files are retained.
pub fn decide_dispositions(
    loaded: &[LoadedFile],
    batch: &ComposedBatch,
    report: &SyncReport,
) -> Vec<FileDisposition> {
    let real = report.real_error_usernames();
    let blocked: HashSet<usize> = batch
        .updates
        .iter()
        .filter(|u| real.contains(u.update.username.as_str()))
        .flat_map(|u| u.contributing_files.iter().copied())
        .collect();

    loaded
        .iter()
        .enumerate()
        .map(|(idx, file)| match file.load {
            FileLoad::Failed(_) => FileDisposition::Retained,
            FileLoad::Parsed(_) if blocked.contains(&idx) => FileDisposition::Retained,
            FileLoad::Parsed(_) => FileDisposition::Advanced,
        })
        .collect()
}

struct FileStats {
    successes: usize,
    real_errors: usize,
    winning_updates: usize,
    details: Vec<String>,
}

impl FileStats {
    fn collect(idx: usize, file: &LoadedFile, batch: &ComposedBatch, report: &SyncReport) -> Self {
        let mut stats = FileStats {
            successes: 0,
            real_errors: 0,
            winning_updates: 0,
            details: Vec::new(),
        };

        match &file.load {
            FileLoad::Failed(reason) => stats.details.push(reason.clone()),
            FileLoad::Parsed(parsed) => {
                for rejected in &parsed.rejected {
                    stats
                        .details
                        .push(format!("line {}: {}", rejected.line, rejected.error));
                }
            }
        }

        for update in batch
            .updates
            .iter()
            .filter(|u| u.contributing_files.contains(&idx))
        {
            if update.source_file == idx {
                stats.winning_updates += 1;
            }
            let Some(record) = report.get(&update.update.username) else {
                continue;
            };
            match record.class {
                ClassifiedOutcome::Real => {
                    stats.real_errors += 1;
                    stats.details.push(format!(
                        "{} ({}): {}",
                        update.update.username, update.employee_id, record.outcome.detail
                    ));
                }
                ClassifiedOutcome::Ok | ClassifiedOutcome::Expected(_) => stats.successes += 1,
            }
        }

        stats
    }
}

fn file_summary(file: &LoadedFile, disposition: FileDisposition) -> FileSummary {
    let (records, rejected_rows) = file
        .parsed()
        .map(|p| (p.records.len(), p.rejected.len()))
        .unwrap_or((0, 0));
    FileSummary {
        name: file.file.name.clone(),
        disposition,
        records,
        rejected_rows,
        successes: 0,
        real_errors: 0,
        winning_updates: 0,
        retry_count: None,
        error: None,
    }
}

/// Performs the side effects of a disposition and appends the audit entry.
async fn apply_disposition(
    ctx: &CycleContext<'_>,
    file: &LoadedFile,
    disposition: FileDisposition,
    stats: &FileStats,
    now: NaiveDateTime,
) -> FileSummary {
    let mut summary = FileSummary {
        successes: stats.successes,
        real_errors: stats.real_errors,
        winning_updates: stats.winning_updates,
        ..file_summary(file, disposition)
    };

    let outcome = match disposition {
        FileDisposition::Advanced => advance(ctx, file, now).await,
        FileDisposition::Retained => retain(ctx, file, now, &mut summary).await,
        FileDisposition::Pending | FileDisposition::Quarantined => Ok(()),
    };
    if let Err(err) = outcome {
        error!(file = %file.file.name, error = %format!("{err:#}"), "Failed to apply file disposition");
        summary.error = Some(format!("{err:#}"));
    }

    let record = ProcessingLogRecord {
        filename: file.file.name.clone(),
        file_hash: file.hash.clone(),
        processed_at: now,
        disposition: summary.disposition.as_str().to_string(),
        entries_processed: summary.records as i64,
        success_count: stats.successes as i64,
        error_count: (stats.real_errors
            + usize::from(matches!(file.load, FileLoad::Failed(_))))
            as i64,
        errors: stats.details.join("; "),
    };
    if let Err(err) = audit::append(ctx.pool, &record).await {
        error!(file = %file.file.name, error = %err, "Failed to append processing log entry");
        summary.error.get_or_insert_with(|| err.to_string());
    }

    summary
}

async fn advance(ctx: &CycleContext<'_>, file: &LoadedFile, now: NaiveDateTime) -> Result<()> {
    audit::clear_retry(ctx.pool, &file.file.name)
        .await
        .context("failed to clear retry counter")?;

    if ctx.config.move_processed_files {
        let destination = files::move_into(&file.file.path, &ctx.config.processed_directory, now)
            .context("failed to move processed file")?;
        info!(file = %file.file.name, destination = %destination.display(), "Moved processed file");
    }
    Ok(())
}

async fn retain(
    ctx: &CycleContext<'_>,
    file: &LoadedFile,
    now: NaiveDateTime,
    summary: &mut FileSummary,
) -> Result<()> {
    if let FileLoad::Failed(reason) = &file.load {
        warn!(file = %file.file.name, reason = %reason, "Unreadable file left in place");
        return Ok(());
    }

    let retries = audit::track_retry(ctx.pool, &file.file.name, now)
        .await
        .context("failed to track file retry")?;
    summary.retry_count = Some(retries);

    let ceiling = ctx.config.max_retry_attempts;
    if ceiling == 0 || retries < ceiling {
        warn!(
            file = %file.file.name,
            attempt = retries,
            max_attempts = ceiling,
            "File retained for retry"
        );
        return Ok(());
    }

    let destination = files::move_into(&file.file.path, &ctx.config.failed_files_directory, now)
        .context("failed to move file to failed directory")?;
    summary.disposition = FileDisposition::Quarantined;
    warn!(
        file = %file.file.name,
        destination = %destination.display(),
        attempts = retries,
        "File exceeded retry ceiling; moved to failed directory"
    );
    Ok(())
}
