//! MongoDB Backup Scheduler
//!
//! Dumps a MongoDB database with mongodump, uploads the archive to
//! S3-compatible object storage and deletes the local copy, on a cron schedule.

// mongobackup/src/main.rs
mod backup;
mod config;
mod errors;
mod scheduler;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::AppConfig;
use scheduler::Scheduler;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "mongobackup", about = "Scheduled MongoDB backups to S3-compatible storage")]
struct Cli {
    /// Optional JSON config file; environment variables override its values
    #[arg(long, env = "BACKUP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run backups on the configured schedule until the process is stopped (default)
    Schedule {
        /// Also start one backup immediately
        #[arg(long)]
        run_on_start: bool,
    },
    /// Run a single backup now and exit
    RunNow,
    /// Validate configuration, locate mongodump and check bucket access
    Check,
}

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    // .env has to be loaded before clap reads BACKUP_CONFIG
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match run_app(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("❌ Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mongobackup=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_app(cli: Cli) -> Result<ExitCode> {
    let app_config = AppConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load configuration from {} and environment", path.display()),
        None => "Failed to load configuration from environment".to_string(),
    })?;

    match cli.command.unwrap_or(Command::Schedule { run_on_start: false }) {
        Command::Schedule { run_on_start } => {
            let orchestrator = Arc::new(backup::build_orchestrator(&app_config).await);
            let scheduler = Scheduler::new(app_config.schedule.clone(), orchestrator);
            if run_on_start {
                info!("🚀 Running initial backup on start...");
                drop(scheduler.fire());
            }

            tokio::select! {
                result = scheduler.run_forever() => {
                    result.context("Scheduler stopped")?;
                }
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for shutdown signal")?;
                    info!("Shutdown signal received, stopping scheduler");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::RunNow => {
            info!("🚀 Starting backup process...");
            let outcome = backup::run_backup_now(&app_config).await;
            Ok(if outcome.backup_stored() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Check => {
            run_checks(&app_config).await?;
            println!("✅ Configuration, mongodump and storage all look good.");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_checks(app_config: &AppConfig) -> Result<()> {
    let mongodump = match &app_config.mongodump_path {
        Some(path) if path.is_file() => path.clone(),
        Some(path) => anyhow::bail!("MONGODUMP_PATH {} does not exist", path.display()),
        None => backup::db_dump::find_mongodump_executable()?,
    };
    info!("Found mongodump executable at: {}", mongodump.display());
    info!(
        "Backups of {}@{}:{}/{} go to {} then s3://{}/{}",
        app_config.mongo.username,
        app_config.mongo.host,
        app_config.mongo.port,
        app_config.mongo.db,
        app_config.backup_dir.display(),
        app_config.storage.bucket_name,
        app_config.storage.key_prefix
    );

    let uploader = backup::s3_upload::S3Uploader::new(&app_config.storage).await;
    uploader
        .check_connection(&app_config.storage.bucket_name)
        .await
}
