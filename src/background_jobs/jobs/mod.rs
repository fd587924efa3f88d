//! Specific background job implementations.

pub mod analysis_cleanup;

pub use analysis_cleanup::AnalysisCleanupJob;
