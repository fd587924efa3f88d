use super::models::AnalysisRecord;
use crate::analysis_store::share_id::is_valid_share_id;
use crate::analysis_store::{AnalysisStore, Lookup};
use crate::server::metrics;
use std::sync::Arc;
use tracing::{debug, warn};

/// Read-only access to shared analyses by their public id.
///
/// The only write is the access counter bump done by the store on a hit.
#[derive(Clone)]
pub struct ShareResolver {
    store: Arc<dyn AnalysisStore>,
}

impl ShareResolver {
    pub fn new(store: Arc<dyn AnalysisStore>) -> Self {
        Self { store }
    }

    pub fn resolve(&self, share_id: &str) -> Lookup<AnalysisRecord> {
        if !is_valid_share_id(share_id) {
            debug!("Rejected malformed share id of {} chars", share_id.len());
            metrics::record_share_resolution("malformed");
            return Lookup::NotFound;
        }

        let lookup = self.store.get_analysis_by_share_id(share_id);
        let label = match &lookup {
            Lookup::Found(_) => "found",
            Lookup::NotFound => "not_found",
            Lookup::Failed(failure) => {
                warn!("Share lookup for {} failed: {}", share_id, failure);
                metrics::record_store_error("get_analysis_by_share_id");
                "error"
            }
        };
        metrics::record_share_resolution(label);
        lookup
    }
}
