use super::models::{AnalysisQuery, AnalysisResult};

/// Label every placeholder carries so it is never mistaken for a real analysis.
pub const FALLBACK_NOTICE: &str =
    "Our analysis service is temporarily unavailable, so this is a general placeholder.";

/// Generic stand-in served when the upstream model cannot be reached.
pub fn placeholder_analysis(query: &AnalysisQuery) -> AnalysisResult {
    AnalysisResult {
        song_title: query.title.clone(),
        artist: query.artist.clone(),
        overview: format!(
            "{} A full interpretation of \"{}\" by {} will be available when you try again in a few minutes.",
            FALLBACK_NOTICE, query.title, query.artist
        ),
        themes: vec!["Unavailable".to_string()],
        deep_dive: format!(
            "{} Listening closely to the lyrics, the arrangement and the way the two \
             interact is a good way to form your own reading of the song in the meantime.",
            FALLBACK_NOTICE
        ),
        cultural_context: format!(
            "{} Context about the song's release and reception is not available right now.",
            FALLBACK_NOTICE
        ),
    }
}
