use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A song to analyze, as parsed from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisQuery {
    pub artist: String,
    pub title: String,
}

impl AnalysisQuery {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into().trim().to_string(),
            title: title.into().trim().to_string(),
        }
    }
}

/// The interpretation produced by the upstream model.
///
/// Immutable once created: records only ever re-read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub song_title: String,
    pub artist: String,
    /// Two or three sentence summary.
    pub overview: String,
    pub themes: Vec<String>,
    pub deep_dive: String,
    pub cultural_context: String,
}

/// Public sharing details of a persisted analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareInfo {
    pub share_id: String,
    pub created_at: DateTime<Utc>,
    pub access_count: u64,
}

/// What the in-memory tier keeps per normalized key.
#[derive(Debug, Clone)]
pub struct CachedAnalysis {
    pub result: AnalysisResult,
    /// `None` when the analysis could not be persisted.
    pub share: Option<ShareInfo>,
}

/// Durable record of an analysis. `id` never leaves the store layer's callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRecord {
    pub id: String,
    pub share_id: String,
    pub normalized_artist: String,
    pub normalized_title: String,
    pub artist: String,
    pub title: String,
    pub result: AnalysisResult,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub access_count: u64,
}

impl AnalysisRecord {
    pub fn share_info(&self) -> ShareInfo {
        ShareInfo {
            share_id: self.share_id.clone(),
            created_at: self.created_at,
            access_count: self.access_count,
        }
    }
}
