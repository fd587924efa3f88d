//! Song analysis: query handling, generation, tiered caching and sharing.

pub mod fallback;
pub mod generator;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod query;
pub mod service;
pub mod share_resolver;

pub use generator::AnalysisGenerator;
pub use models::{AnalysisQuery, AnalysisRecord, AnalysisResult, CachedAnalysis, ShareInfo};
pub use orchestrator::{AnalysisOrchestrator, AnalysisOutcome, AnalyzedSong, FailureKind};
pub use service::{
    AnalysisPayload, AnalysisResponse, AnalysisService, AnalyzeRequest, RateLimitInfo,
    RateLimitStatus, ResponseStatus, ServiceStats, ShareError, ShareMetadata, SharedAnalysis,
};
pub use share_resolver::ShareResolver;
