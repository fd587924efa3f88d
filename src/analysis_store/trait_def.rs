//! AnalysisStore trait definition.

use super::models::{Lookup, StoreFailure};
use crate::analysis::models::{AnalysisRecord, AnalysisResult};

/// Durable storage of analyses, addressable by normalized song key and by
/// public share id.
///
/// Every operation reports expected conditions through its return type;
/// callers decide how to degrade.
pub trait AnalysisStore: Send + Sync {
    /// Looks up an analysis by song, ignoring case and spacing. A hit bumps
    /// the record's access count before it is returned.
    fn get_cached_analysis(&self, artist: &str, title: &str) -> Lookup<AnalysisRecord>;

    /// Persists a new analysis with an access count of 1.
    ///
    /// When `share_id` is `None` a readable one is derived from the song.
    /// If the song is already stored, the existing record is returned.
    fn store_analysis(
        &self,
        result: &AnalysisResult,
        share_id: Option<&str>,
    ) -> Result<AnalysisRecord, StoreFailure>;

    /// Looks up an analysis by share id. Malformed ids are `NotFound`
    /// without querying. A hit bumps the access count.
    fn get_analysis_by_share_id(&self, share_id: &str) -> Lookup<AnalysisRecord>;

    /// Deletes records older than `days_old` days that were accessed fewer
    /// than `min_access_count` times. Returns the number deleted.
    fn cleanup_old_analyses(
        &self,
        days_old: u32,
        min_access_count: u64,
    ) -> Result<usize, StoreFailure>;

    fn count_analyses(&self) -> Result<usize, StoreFailure>;
}
