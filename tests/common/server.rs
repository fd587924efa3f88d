//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own database directory and a
//! scripted model provider.

use super::constants::*;
use super::mock_llm::{MockBehavior, MockLlm};
use song_analysis_server::analysis::AnalysisService;
use song_analysis_server::analysis_store::{AnalysisStore, SqliteAnalysisStore};
use song_analysis_server::config::{AppConfig, CliConfig, FileConfig};
use song_analysis_server::server::state::ServerState;
use song_analysis_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance with an isolated database
///
/// When dropped, the server shuts down. The database directory lives as long
/// as any server spawned on it.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The scripted model behind this server
    pub llm: Arc<MockLlm>,

    /// Direct access to the analysis database
    pub store: Arc<dyn AnalysisStore>,

    config_toml: String,
    db_dir: Arc<TempDir>,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl TestServer {
    /// Spawns a server with an answering model and fast retries
    pub async fn spawn() -> Self {
        Self::spawn_with(MockLlm::new(MockBehavior::Answer), FAST_RETRY_CONFIG).await
    }

    /// Spawns a server with the given model and extra TOML configuration
    pub async fn spawn_with(llm: MockLlm, config_toml: &str) -> Self {
        let db_dir = Arc::new(TempDir::new().expect("Failed to create temp db dir"));
        Self::spawn_on(db_dir, Arc::new(llm), config_toml.to_string()).await
    }

    /// A fresh process on the same database: empty memory cache, new model
    pub async fn restart(&self, llm: MockLlm) -> Self {
        Self::spawn_on(self.db_dir.clone(), Arc::new(llm), self.config_toml.clone()).await
    }

    async fn spawn_on(db_dir: Arc<TempDir>, llm: Arc<MockLlm>, config_toml: String) -> Self {
        let file_config: FileConfig =
            toml::from_str(&config_toml).expect("Invalid test configuration");
        let cli = CliConfig {
            db_dir: Some(db_dir.path().to_path_buf()),
            logging_level: RequestsLoggingLevel::None,
            ..CliConfig::default()
        };

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let mut app_config =
            AppConfig::resolve(&cli, Some(file_config)).expect("Failed to resolve config");
        app_config.base_url = base_url.clone();

        let store: Arc<dyn AnalysisStore> = Arc::new(
            SqliteAnalysisStore::new(app_config.analysis_db_path())
                .expect("Failed to open analysis store"),
        );
        let service = AnalysisService::build(&app_config, llm.clone(), store.clone());
        let server_config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port,
            metrics_port: 0,
        };
        let app = make_app(ServerState::new(server_config, Arc::new(service)));

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
            .expect("Server failed");
        });

        let server = Self {
            base_url,
            llm,
            store,
            config_toml,
            db_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
