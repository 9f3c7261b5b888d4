use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use dutysync_core::config::Config;
use dutysync_core::cycle::{run_cycle, CycleContext};
use dutysync_core::db;
use dutysync_core::remote::AtHocClient;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Duty-status reconciliation for badge-reader exports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one polling cycle and print its summary as JSON
    Run,
    /// Run database migrations
    Migrate,
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

    match cli.command {
        Command::Run => {
            let pool = db::connect(&config.database_url)
                .await
                .context("failed to open mapping store")?;
            db::run_migrations(&pool).await?;

            let client = AtHocClient::connect(&config.remote)
                .await
                .context("failed to connect to AtHoc")?;

            info!(
                csv_directory = %config.csv_directory.display(),
                batch_size = config.batch_size,
                duty_status_field = %config.duty_status_field,
                sync_mappings = config.sync_mappings,
                "Starting polling cycle"
            );

            let ctx = CycleContext {
                pool: &pool,
                service: &client,
                config: &config,
            };
            let summary = run_cycle(&ctx, Local::now().naive_local()).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Migrate => {
            let pool = db::connect(&config.database_url).await?;
            db::run_migrations(&pool).await?;
            info!("Database migrations applied");
            Ok(())
        }
    }
}
