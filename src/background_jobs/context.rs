use crate::analysis_store::AnalysisStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// Access to persisted analyses.
    pub analysis_store: Arc<dyn AnalysisStore>,
}

impl JobContext {
    pub fn new(cancellation_token: CancellationToken, analysis_store: Arc<dyn AnalysisStore>) -> Self {
        Self {
            cancellation_token,
            analysis_store,
        }
    }

    /// Jobs should check this before long-running steps and return
    /// `JobError::Cancelled` if true.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
