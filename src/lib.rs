//! Song Analysis Server Library
//!
//! Caching, resilience and sharing around an LLM-backed song analysis.
//! Exposed as a library for the binaries and the end-to-end tests.

pub mod analysis;
pub mod analysis_store;
pub mod background_jobs;
pub mod cache;
pub mod config;
pub mod llm;
pub mod rate_limit;
pub mod resilience;
pub mod server;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use analysis::{AnalysisService, AnalyzeRequest};
pub use analysis_store::{AnalysisStore, SqliteAnalysisStore};
pub use server::{make_app, run_server, RequestsLoggingLevel};
