use anyhow::{Context, Result};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::{info, warn};

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use super::{log_requests, metrics, state::*, ServerConfig};
use crate::analysis::{AnalysisResponse, AnalyzeRequest, ResponseStatus, ShareError};
use crate::rate_limit::client_identity;
use crate::resilience::{CircuitBreakerStats, UpstreamError};

/// Who is calling, as far as rate limiting is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientIdentity(client_identity(&parts.headers, peer)))
    }
}

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    model: String,
    upstream_healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_error: Option<String>,
    circuit_breaker: CircuitBreakerStats,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: state.version.to_string(),
    };
    Json(stats)
}

fn analysis_response(response: AnalysisResponse) -> Response {
    let (status, retry_after) = match response.status {
        ResponseStatus::Ok => (StatusCode::OK, None),
        ResponseStatus::BadRequest => (StatusCode::BAD_REQUEST, None),
        ResponseStatus::RateLimited { retry_after_secs } => {
            (StatusCode::TOO_MANY_REQUESTS, Some(retry_after_secs))
        }
        ResponseStatus::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, None),
        ResponseStatus::Internal => (StatusCode::INTERNAL_SERVER_ERROR, None),
    };

    let mut http_response = (status, Json(response)).into_response();
    if let Some(secs) = retry_after {
        http_response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    http_response
}

async fn analyze(
    State(service): State<GuardedAnalysisService>,
    ClientIdentity(identity): ClientIdentity,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    let response = match body {
        Ok(Json(request)) => service.analyze(request, &identity).await,
        Err(rejection) => {
            warn!("Malformed analyze request: {}", rejection.body_text());
            service.reject_invalid(
                "Please provide a song as {\"query\": \"Artist - Title\"} or {\"artist\": \"...\", \"title\": \"...\"}",
                &identity,
            )
        }
    };
    analysis_response(response)
}

async fn analyze_status(
    State(service): State<GuardedAnalysisService>,
    ClientIdentity(identity): ClientIdentity,
) -> Response {
    Json(service.rate_limit_status(&identity)).into_response()
}

async fn get_share(
    State(service): State<GuardedAnalysisService>,
    Path(share_id): Path<String>,
) -> Response {
    match service.resolve_share(&share_id) {
        Ok(shared) => Json(shared).into_response(),
        Err(err) => {
            let status = match err {
                ShareError::NotFound => StatusCode::NOT_FOUND,
                ShareError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            };
            (
                status,
                Json(ErrorBody {
                    error: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn cache_stats(State(service): State<GuardedAnalysisService>) -> Response {
    Json(service.stats()).into_response()
}

async fn health(State(service): State<GuardedAnalysisService>) -> Response {
    let orchestrator = service.orchestrator();
    let upstream = orchestrator.upstream_health().await;
    let upstream_error = upstream
        .err()
        .map(|err| UpstreamError::from(err).kind.as_str().to_string());
    let healthy = upstream_error.is_none();

    let body = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        model: orchestrator.model().to_string(),
        upstream_healthy: healthy,
        upstream_error,
        circuit_breaker: orchestrator.breaker_stats(),
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

pub fn make_app(state: ServerState) -> Router {
    let v1_routes: Router = Router::new()
        .route("/analyze", post(analyze))
        .route("/analyze/status", get(analyze_status))
        .route("/share/{share_id}", get(get_share))
        .route("/cache/stats", get(cache_stats))
        .route("/health", get(health))
        .with_state(state.clone());

    Router::new()
        .route("/", get(home))
        .with_state(state.clone())
        .nest("/v1", v1_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

pub fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics::metrics_handler))
}

pub async fn run_server(state: ServerState) -> Result<()> {
    let port = state.config.port;
    let metrics_port = state.config.metrics_port;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Listening on port {}, metrics on port {}", port, metrics_port);

    tokio::try_join!(
        async {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .context("HTTP server failed")
        },
        async {
            axum::serve(metrics_listener, make_metrics_app())
                .await
                .context("Metrics server failed")
        },
    )?;
    Ok(())
}
