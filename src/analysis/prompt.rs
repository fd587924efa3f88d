//! Prompt construction and parsing of the model's answer.

use super::models::{AnalysisQuery, AnalysisResult};
use crate::llm::{LlmError, Message};
use serde::Deserialize;

const SYSTEM_PROMPT: &str = "You are a music critic and cultural historian. \
Given a song, write an interpretive analysis of its lyrics, meaning and context. \
Respond with a single JSON object and nothing else, using exactly these keys: \
\"songTitle\" (string), \"artist\" (string), \
\"overview\" (two or three sentences), \
\"themes\" (array of three to six short strings), \
\"deepDive\" (several paragraphs on lyrics, imagery and musical choices), \
\"culturalContext\" (the song's background, reception and influence). \
If you do not know the song, say so in the overview instead of inventing facts.";

/// Chat messages asking the model to analyze `query`.
pub fn build_messages(query: &AnalysisQuery) -> Vec<Message> {
    vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(format!(
            "Analyze the song \"{}\" by {}.",
            query.title, query.artist
        )),
    ]
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    themes: Option<Vec<String>>,
    #[serde(default, alias = "deepDive")]
    deep_dive: Option<String>,
    #[serde(default, alias = "culturalContext")]
    cultural_context: Option<String>,
}

/// Parses the model's answer into an [`AnalysisResult`] for `query`.
///
/// Code fences and chatter around the JSON object are ignored. The song
/// identity always comes from the query so the result matches its key.
pub fn parse_analysis(text: &str, query: &AnalysisQuery) -> Result<AnalysisResult, LlmError> {
    let json = extract_json_object(text)
        .ok_or_else(|| LlmError::InvalidResponse("no JSON object in response".to_string()))?;
    let raw: RawAnalysis = serde_json::from_str(json)
        .map_err(|e| LlmError::InvalidResponse(format!("malformed analysis JSON: {}", e)))?;

    let overview = required("overview", raw.overview)?;
    let deep_dive = required("deepDive", raw.deep_dive)?;
    let cultural_context = required("culturalContext", raw.cultural_context)?;
    let themes = raw
        .themes
        .unwrap_or_default()
        .into_iter()
        .map(|theme| theme.trim().to_string())
        .filter(|theme| !theme.is_empty())
        .collect();

    // The model's own songTitle/artist are ignored; it sometimes "corrects" them.
    Ok(AnalysisResult {
        song_title: query.title.clone(),
        artist: query.artist.clone(),
        overview,
        themes,
        deep_dive,
        cultural_context,
    })
}

fn required(field: &str, value: Option<String>) -> Result<String, LlmError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(LlmError::InvalidResponse(format!(
            "analysis is missing {}",
            field
        ))),
    }
}

/// Slice from the first `{` to the last `}`.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
