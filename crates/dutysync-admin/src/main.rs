use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use dutysync_core::config::Config;
use dutysync_core::gateway::SyncGateway;
use dutysync_core::identity::IdentityCache;
use dutysync_core::remote::AtHocClient;
use dutysync_core::{audit, db, schedule, sweeper};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Dutysync administrative tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh worker mappings from the directory
    RefreshMappings(RefreshArgs),
    /// List cached worker mappings
    Mappings,
    /// Show recent processing log entries
    ProcessingLog(LogArgs),
    /// Clear stale duty-status values now
    Sweep,
}

#[derive(Args, Debug, Default)]
struct RefreshArgs {
    /// Refresh even when the schedule says it is not due
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct LogArgs {
    /// Number of entries to show
    #[arg(long, default_value_t = 20)]
    limit: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;
    let pool = db::connect(&config.database_url)
        .await
        .context("failed to open mapping store")?;
    db::run_migrations(&pool).await?;

    match cli.command {
        Command::RefreshMappings(args) => handle_refresh(&config, &pool, args).await,
        Command::Mappings => handle_mappings(&pool).await,
        Command::ProcessingLog(args) => handle_processing_log(&pool, args).await,
        Command::Sweep => handle_sweep(&config).await,
    }
}

async fn handle_refresh(config: &Config, pool: &db::DbPool, args: RefreshArgs) -> Result<()> {
    let now = Local::now().naive_local();

    if !args.force {
        let last = schedule::load_tracking(pool, schedule::USER_MAPPING_SYNC).await?;
        if schedule::refresh_due(last.as_ref(), now, &config.schedule).is_none() {
            println!("Mapping refresh is not due. Run again with --force to refresh anyway.");
            return Ok(());
        }
    }

    let client = AtHocClient::connect(&config.remote)
        .await
        .context("failed to connect to AtHoc")?;
    let cache = IdentityCache::new(pool.clone());
    let report = cache
        .refresh(
            &client,
            &config.user_attributes,
            &config.identifier_field,
            now,
        )
        .await?;

    println!(
        "Refresh {}: {} listed, {} mappings written, {} without {}",
        report.status.as_str(),
        report.entries_listed,
        report.mappings_written,
        report.skipped_without_identifier,
        config.identifier_field
    );
    if let Some(error) = &report.error {
        println!("Error: {error}");
    }
    Ok(())
}

async fn handle_mappings(pool: &db::DbPool) -> Result<()> {
    let mappings = IdentityCache::new(pool.clone()).all().await?;
    if mappings.is_empty() {
        println!("No worker mappings cached.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Employee", "Username", "Collar ID", "Last updated"]);
    for mapping in &mappings {
        table.add_row(vec![
            mapping.employee_id.clone(),
            mapping.username.clone(),
            mapping.collar_id.clone(),
            mapping.last_updated.to_string(),
        ]);
    }
    println!("{table}");
    println!("{} mappings", mappings.len());
    Ok(())
}

async fn handle_processing_log(pool: &db::DbPool, args: LogArgs) -> Result<()> {
    let entries = audit::recent(pool, args.limit).await?;
    if entries.is_empty() {
        println!("Processing log is empty.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Processed at",
        "File",
        "Disposition",
        "Entries",
        "Ok",
        "Errors",
        "Details",
    ]);
    for entry in &entries {
        table.add_row(vec![
            entry.processed_at.to_string(),
            entry.filename.clone(),
            entry.disposition.clone(),
            entry.entries_processed.to_string(),
            entry.success_count.to_string(),
            entry.error_count.to_string(),
            entry.errors.clone(),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn handle_sweep(config: &Config) -> Result<()> {
    let client = AtHocClient::connect(&config.remote)
        .await
        .context("failed to connect to AtHoc")?;
    let gateway = SyncGateway::new(
        &client,
        &config.duty_status_field,
        &config.expected_errors,
        &config.transport_retry,
    );

    info!(stale_after_hours = config.auto_cleanup_hours, "Running on-demand sweep");
    let report = sweeper::sweep(&gateway, config.auto_cleanup_hours).await;
    println!(
        "Stale: {}, cleared: {}, expected refusals: {}, failed: {}",
        report.stale_found, report.cleared, report.expected, report.failed
    );
    if let Some(error) = &report.error {
        println!("Error: {error}");
    }
    Ok(())
}
