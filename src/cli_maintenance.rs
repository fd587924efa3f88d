//! Maintenance entry point meant to be run by cron or a systemd timer.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use song_analysis_server::analysis_store::{AnalysisStore, SqliteAnalysisStore};
use song_analysis_server::background_jobs::jobs::AnalysisCleanupJob;
use song_analysis_server::background_jobs::{run_job, JobContext};
use song_analysis_server::config::{self, MaintenanceSettings};

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Directory containing the analysis database (analysis.db).
    #[clap(long)]
    pub db_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deletes old analyses that were rarely accessed.
    Cleanup {
        /// Only delete analyses older than this many days.
        #[clap(long)]
        days_old: Option<u32>,

        /// Only delete analyses accessed fewer times than this.
        #[clap(long)]
        min_access_count: Option<u64>,
    },

    /// Prints how many analyses are stored.
    Count,
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => Some(config::FileConfig::load(path)?),
        None => None,
    };
    let cli_config = config::CliConfig {
        db_dir: cli_args.db_dir.clone(),
        ..config::CliConfig::default()
    };
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    let db_path = app_config.analysis_db_path();
    if !db_path.exists() {
        bail!("No analysis database at {:?}", db_path);
    }
    let store: Arc<dyn AnalysisStore> = Arc::new(SqliteAnalysisStore::new(&db_path)?);

    match cli_args.command {
        Command::Cleanup {
            days_old,
            min_access_count,
        } => {
            let settings = MaintenanceSettings {
                days_old: days_old.unwrap_or(app_config.maintenance.days_old),
                min_access_count: min_access_count
                    .unwrap_or(app_config.maintenance.min_access_count),
            };
            let ctx = JobContext::new(CancellationToken::new(), store.clone());
            run_job(&AnalysisCleanupJob::from_settings(&settings), &ctx)?;
            info!("{} analyses remain", store.count_analyses()?);
        }
        Command::Count => {
            println!("{}", store.count_analyses()?);
        }
    }

    Ok(())
}
