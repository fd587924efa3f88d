use super::context::JobContext;
use std::time::Instant;
use tracing::{error, info};

/// Errors that can occur during job execution.
#[derive(Debug)]
pub enum JobError {
    ExecutionFailed(String),
    Cancelled,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::ExecutionFailed(msg) => write!(f, "Execution failed: {}", msg),
            JobError::Cancelled => write!(f, "Job was cancelled"),
        }
    }
}

impl std::error::Error for JobError {}

/// Trait for maintenance jobs.
///
/// Jobs run synchronously; callers on an async runtime should use
/// `spawn_blocking`.
pub trait BackgroundJob: Send + Sync {
    /// Unique identifier for this job.
    fn id(&self) -> &'static str;

    /// Human-readable name for this job.
    fn name(&self) -> &'static str;

    /// Description of what this job does.
    fn description(&self) -> &'static str;

    /// Execute the job.
    fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}

/// Runs `job` once, logging its start, duration and outcome.
pub fn run_job(job: &dyn BackgroundJob, ctx: &JobContext) -> Result<(), JobError> {
    info!("Running job {} ({})", job.id(), job.description());
    let started = Instant::now();
    let result = job.execute(ctx);
    match &result {
        Ok(()) => info!(
            "{} finished in {}ms",
            job.name(),
            started.elapsed().as_millis()
        ),
        Err(e) => error!("{} failed: {}", job.name(), e),
    }
    result
}
