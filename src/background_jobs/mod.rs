//! Maintenance jobs.
//!
//! Nothing in here schedules itself: jobs are run on demand by an external
//! trigger such as the `cli-maintenance` binary invoked from cron.

mod context;
mod job;
pub mod jobs;

pub use context::JobContext;
pub use job::{run_job, BackgroundJob, JobError};
