use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use song_analysis_server::analysis::AnalysisService;
use song_analysis_server::analysis_store::{AnalysisStore, SqliteAnalysisStore};
use song_analysis_server::config;
use song_analysis_server::llm::{ApiKeySource, LlmProvider, OpenAIProvider};
use song_analysis_server::server::state::ServerState;
use song_analysis_server::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(path_buf))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing the analysis database (analysis.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Public base URL used to build share links.
    #[clap(long)]
    pub base_url: Option<String>,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            base_url: args.base_url.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
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

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  port: {}", app_config.port);
    info!("  base_url: {}", app_config.base_url);
    info!("  llm: {:?}", app_config.llm);

    info!("Initializing metrics...");
    metrics::init_metrics();

    if !app_config.analysis_db_path().exists() {
        info!(
            "Creating new analysis database at {:?}",
            app_config.analysis_db_path()
        );
    }
    let store: Arc<dyn AnalysisStore> =
        Arc::new(SqliteAnalysisStore::new(app_config.analysis_db_path())?);
    match store.count_analyses() {
        Ok(count) => info!("Analysis store holds {} analyses", count),
        Err(e) => warn!("Could not count stored analyses: {}", e),
    }

    let api_key_source = app_config.llm.api_key_source();
    if matches!(api_key_source, ApiKeySource::None) {
        warn!(
            "No API key configured for {}; set llm.api_key, llm.api_key_command or {}",
            app_config.llm.base_url,
            config::LLM_API_KEY_ENV
        );
    }
    let provider: Arc<dyn LlmProvider> = Arc::new(OpenAIProvider::new(
        app_config.llm.base_url.clone(),
        app_config.llm.model.clone(),
        api_key_source,
    ));

    let service = Arc::new(AnalysisService::build(&app_config, provider, store));
    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
        metrics_port: app_config.metrics_port,
    };
    let state = ServerState::new(server_config, service);

    info!("Ready to serve at port {}!", app_config.port);
    info!("Metrics available at port {}!", app_config.metrics_port);

    tokio::select! {
        result = run_server(state) => {
            info!("HTTP server stopped: {:?}", result);
            result
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    }
}
