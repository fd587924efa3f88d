use axum::extract::FromRef;

use crate::analysis::AnalysisService;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedAnalysisService = Arc<AnalysisService>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub analysis_service: GuardedAnalysisService,
    pub version: &'static str,
}

impl ServerState {
    pub fn new(config: ServerConfig, analysis_service: GuardedAnalysisService) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            analysis_service,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

impl FromRef<ServerState> for GuardedAnalysisService {
    fn from_ref(input: &ServerState) -> Self {
        input.analysis_service.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
