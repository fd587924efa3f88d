//! Analysis cleanup job.
//!
//! Deletes stored analyses that are both old and rarely accessed, so the
//! store keeps popular songs and shared links that people actually open.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError},
};
use crate::config::MaintenanceSettings;
use crate::server::metrics;
use tracing::info;

pub struct AnalysisCleanupJob {
    days_old: u32,
    min_access_count: u64,
}

impl AnalysisCleanupJob {
    pub fn new(days_old: u32, min_access_count: u64) -> Self {
        Self {
            days_old,
            min_access_count,
        }
    }

    pub fn from_settings(settings: &MaintenanceSettings) -> Self {
        Self::new(settings.days_old, settings.min_access_count)
    }
}

impl BackgroundJob for AnalysisCleanupJob {
    fn id(&self) -> &'static str {
        "analysis_cleanup"
    }

    fn name(&self) -> &'static str {
        "Analysis Cleanup"
    }

    fn description(&self) -> &'static str {
        "Delete old analyses that were rarely accessed"
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        info!(
            "Cleaning up analyses older than {} days with fewer than {} accesses",
            self.days_old, self.min_access_count
        );

        let deleted = ctx
            .analysis_store
            .cleanup_old_analyses(self.days_old, self.min_access_count)
            .map_err(|e| {
                metrics::record_store_error("cleanup_old_analyses");
                JobError::ExecutionFailed(e.to_string())
            })?;

        if deleted > 0 {
            info!("Deleted {} old analyses", deleted);
        } else {
            info!("No analyses to clean up");
        }

        Ok(())
    }
}
