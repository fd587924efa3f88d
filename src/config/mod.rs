mod file_config;

pub use file_config::{
    CacheConfig, CircuitBreakerConfig, FileConfig, LlmConfig, MaintenanceConfig,
    RateLimitConfig, RetryConfig,
};

use crate::llm::ApiKeySource;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// Environment variable consulted when no key is configured.
pub const LLM_API_KEY_ENV: &str = "LLM_API_KEY";

/// File name of the analysis database inside `db_dir`.
pub const ANALYSIS_DB_FILE: &str = "analysis.db";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    /// Public base for share links.
    pub base_url: String,

    // Feature configs (with defaults)
    pub llm: LlmSettings,
    pub rate_limit: RateLimitSettings,
    pub cache: CacheSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub retry: RetrySettings,
    pub maintenance: MaintenanceSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let base_url = file
            .base_url
            .or_else(|| cli.base_url.clone())
            .unwrap_or_else(|| format!("http://localhost:{}", port))
            .trim_end_matches('/')
            .to_string();

        let llm_file = file.llm.unwrap_or_default();
        let llm_defaults = LlmSettings::default();
        let llm = LlmSettings {
            base_url: llm_file.base_url.unwrap_or(llm_defaults.base_url),
            model: llm_file.model.unwrap_or(llm_defaults.model),
            api_key: llm_file.api_key,
            api_key_command: llm_file.api_key_command,
            temperature: llm_file.temperature.unwrap_or(llm_defaults.temperature),
            max_tokens: llm_file.max_tokens.unwrap_or(llm_defaults.max_tokens),
            timeout_secs: llm_file.timeout_secs.unwrap_or(llm_defaults.timeout_secs),
        };
        if llm.timeout_secs == 0 {
            bail!("llm.timeout_secs must be greater than 0");
        }

        let rl_file = file.rate_limit.unwrap_or_default();
        let rl_defaults = RateLimitSettings::default();
        let rate_limit = RateLimitSettings {
            max_requests: rl_file.max_requests.unwrap_or(rl_defaults.max_requests),
            window_secs: rl_file.window_secs.unwrap_or(rl_defaults.window_secs),
            sweep_interval_secs: rl_file
                .sweep_interval_secs
                .unwrap_or(rl_defaults.sweep_interval_secs),
        };
        if rate_limit.window_secs == 0 {
            bail!("rate_limit.window_secs must be greater than 0");
        }

        let cache_file = file.cache.unwrap_or_default();
        let cache_defaults = CacheSettings::default();
        let cache = CacheSettings {
            max_size: cache_file.max_size.unwrap_or(cache_defaults.max_size),
            ttl_secs: cache_file.ttl_secs.unwrap_or(cache_defaults.ttl_secs),
        };
        if cache.max_size == 0 {
            bail!("cache.max_size must be greater than 0");
        }

        let cb_file = file.circuit_breaker.unwrap_or_default();
        let cb_defaults = CircuitBreakerSettings::default();
        let circuit_breaker = CircuitBreakerSettings {
            failure_threshold: cb_file
                .failure_threshold
                .unwrap_or(cb_defaults.failure_threshold),
            recovery_timeout_secs: cb_file
                .recovery_timeout_secs
                .unwrap_or(cb_defaults.recovery_timeout_secs),
        };
        if circuit_breaker.failure_threshold == 0 {
            bail!("circuit_breaker.failure_threshold must be greater than 0");
        }

        let retry_file = file.retry.unwrap_or_default();
        let retry_defaults = RetrySettings::default();
        let retry = RetrySettings {
            max_retries: retry_file.max_retries.unwrap_or(retry_defaults.max_retries),
            base_delay_ms: retry_file
                .base_delay_ms
                .unwrap_or(retry_defaults.base_delay_ms),
            max_delay_ms: retry_file.max_delay_ms.unwrap_or(retry_defaults.max_delay_ms),
            jitter_ms: retry_file.jitter_ms.unwrap_or(retry_defaults.jitter_ms),
        };
        if retry.max_delay_ms < retry.base_delay_ms {
            bail!("retry.max_delay_ms must not be smaller than retry.base_delay_ms");
        }

        let maintenance_file = file.maintenance.unwrap_or_default();
        let maintenance_defaults = MaintenanceSettings::default();
        let maintenance = MaintenanceSettings {
            days_old: maintenance_file
                .days_old
                .unwrap_or(maintenance_defaults.days_old),
            min_access_count: maintenance_file
                .min_access_count
                .unwrap_or(maintenance_defaults.min_access_count),
        };

        Ok(Self {
            db_dir,
            port,
            metrics_port,
            logging_level,
            base_url,
            llm,
            rate_limit,
            cache,
            circuit_breaker,
            retry,
            maintenance,
        })
    }

    pub fn analysis_db_path(&self) -> PathBuf {
        self.db_dir.join(ANALYSIS_DB_FILE)
    }
}

/// Settings for the upstream model provider.
#[derive(Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub api_key_command: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-attempt timeout of the upstream call.
    pub timeout_secs: u64,
}

impl LlmSettings {
    /// Where the bearer token comes from: the config file first, then the
    /// key command, then the environment.
    pub fn api_key_source(&self) -> ApiKeySource {
        if let Some(key) = &self.api_key {
            return ApiKeySource::Static(key.clone());
        }
        if let Some(command) = &self.api_key_command {
            return ApiKeySource::Command(command.clone());
        }
        match std::env::var(LLM_API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => ApiKeySource::Static(key.trim().to_string()),
            _ => ApiKeySource::None,
        }
    }
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_key_command", &self.api_key_command)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_key_command: None,
            temperature: 0.7,
            max_tokens: 1500,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window_secs: 86_400,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub max_size: usize,
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: 500,
            ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            jitter_ms: 250,
        }
    }
}

/// Settings for the out-of-band cleanup run by `cli-maintenance`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceSettings {
    pub days_old: u32,
    pub min_access_count: u64,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            days_old: 90,
            min_access_count: 2,
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
