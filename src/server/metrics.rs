use crate::resilience::CircuitState;
use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all song analysis metrics
const PREFIX: &str = "song_analysis";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["method", "endpoint"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Analysis Metrics
    pub static ref ANALYSIS_OUTCOMES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_outcomes_total"), "Analyze requests by outcome"),
        &["outcome"]
    ).expect("Failed to create outcomes_total metric");

    pub static ref CACHE_LOOKUPS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_cache_lookups_total"), "Cache lookups by tier and result"),
        &["tier", "result"]
    ).expect("Failed to create cache_lookups_total metric");

    // Upstream Metrics
    pub static ref UPSTREAM_CALLS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_upstream_calls_total"), "Model calls by result"),
        &["result"]
    ).expect("Failed to create upstream_calls_total metric");

    pub static ref UPSTREAM_CALL_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_upstream_call_duration_seconds"),
            "Model call duration in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0]),
        &["result"]
    ).expect("Failed to create upstream_call_duration_seconds metric");

    pub static ref UPSTREAM_RETRIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_upstream_retries_total"), "Model call retries by error kind"),
        &["kind"]
    ).expect("Failed to create upstream_retries_total metric");

    pub static ref CIRCUIT_BREAKER_STATE: IntGauge = IntGauge::new(
        format!("{PREFIX}_circuit_breaker_state"),
        "Circuit breaker state (0 closed, 1 half-open, 2 open)"
    ).expect("Failed to create circuit_breaker_state metric");

    pub static ref DEDUP_JOINS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_dedup_joins_total"),
        "Requests that joined an in-flight model call"
    ).expect("Failed to create dedup_joins_total metric");

    // Rate Limiting Metrics
    pub static ref RATE_LIMIT_REJECTIONS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_rate_limit_rejections_total"),
        "Analyze requests rejected by the rate limiter"
    ).expect("Failed to create rate_limit_rejections_total metric");

    // Storage Metrics
    pub static ref STORE_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_store_errors_total"), "Analysis store failures by operation"),
        &["operation"]
    ).expect("Failed to create store_errors_total metric");

    pub static ref SHARE_RESOLUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_share_resolutions_total"), "Share lookups by result"),
        &["result"]
    ).expect("Failed to create share_resolutions_total metric");

    // Process Metrics
    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(ANALYSIS_OUTCOMES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_LOOKUPS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UPSTREAM_CALLS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UPSTREAM_CALL_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(UPSTREAM_RETRIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CIRCUIT_BREAKER_STATE.clone()));
    let _ = REGISTRY.register(Box::new(DEDUP_JOINS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RATE_LIMIT_REJECTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STORE_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SHARE_RESOLUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Groups paths so share ids do not explode label cardinality.
pub fn categorize_endpoint(path: &str) -> &'static str {
    match path {
        "/" => "home",
        "/v1/analyze" => "analyze",
        "/v1/analyze/status" => "analyze_status",
        "/v1/cache/stats" => "cache_stats",
        "/v1/health" => "health",
        "/metrics" => "metrics",
        p if p.starts_with("/v1/share/") => "share",
        _ => "other",
    }
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let endpoint = categorize_endpoint(path);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, endpoint])
        .observe(duration.as_secs_f64());
}

pub fn record_analysis_outcome(outcome: &str) {
    ANALYSIS_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
}

/// `tier` is "memory" or "store"; `result` is "hit", "miss" or "error".
pub fn record_cache_lookup(tier: &str, result: &str) {
    CACHE_LOOKUPS_TOTAL.with_label_values(&[tier, result]).inc();
}

pub fn record_upstream_call(result: &str, duration: Duration) {
    UPSTREAM_CALLS_TOTAL.with_label_values(&[result]).inc();
    UPSTREAM_CALL_DURATION_SECONDS
        .with_label_values(&[result])
        .observe(duration.as_secs_f64());
}

pub fn record_upstream_retry(kind: &str) {
    UPSTREAM_RETRIES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn set_circuit_state(state: CircuitState) {
    CIRCUIT_BREAKER_STATE.set(state.gauge_value());
}

pub fn record_dedup_join() {
    DEDUP_JOINS_TOTAL.inc();
}

pub fn record_rate_limit_rejection() {
    RATE_LIMIT_REJECTIONS_TOTAL.inc();
}

pub fn record_store_error(operation: &str) {
    STORE_ERRORS_TOTAL.with_label_values(&[operation]).inc();
}

pub fn record_share_resolution(result: &str) {
    SHARE_RESOLUTIONS_TOTAL.with_label_values(&[result]).inc();
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            // Resident set size, reported in kB
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<f64>().ok());
            if let Some(kb) = rss_kb {
                PROCESS_MEMORY_BYTES.set(kb * 1024.0);
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
