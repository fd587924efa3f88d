//! Key normalization and free-text query parsing.

use super::models::AnalysisQuery;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

/// Artist used when the input names only a song.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

pub const MAX_QUERY_LENGTH: usize = 500;
pub const MAX_FIELD_LENGTH: usize = 200;

/// Separators where the artist comes first ("Queen - Bohemian Rhapsody").
const ARTIST_FIRST_SEPARATORS: &[&str] = &[" - ", " \u{2013} ", " \u{2014} ", " | "];

/// Separator where the title comes first ("Bohemian Rhapsody by Queen").
const TITLE_FIRST_SEPARATOR: &str = " by ";

lazy_static! {
    static ref SUSPICIOUS_CONTENT: Regex =
        Regex::new(r"(?i)(<[^>]*>|javascript\s*:|data\s*:\s*text/html|\bon[a-z]+\s*=)")
            .expect("suspicious content pattern is valid");
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please enter a song to analyze")]
    Empty,

    #[error("The {field} is too long (maximum {max} characters)")]
    TooLong { field: &'static str, max: usize },

    #[error("The {field} contains invalid characters")]
    ControlCharacters { field: &'static str },

    #[error("The {field} contains content that is not allowed")]
    SuspiciousContent { field: &'static str },
}

/// Canonical form used for cache keys and storage lookups.
///
/// Trims, lowercases and collapses whitespace runs, so it is idempotent.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Cache/dedup key for a normalized `(artist, title)` pair.
pub fn cache_key(artist: &str, title: &str) -> String {
    format!("{}::{}", normalize(artist), normalize(title))
}

/// Parses free text like "Queen - Bohemian Rhapsody" into an [`AnalysisQuery`].
pub fn parse_query(raw: &str) -> Result<AnalysisQuery, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    if trimmed.chars().count() > MAX_QUERY_LENGTH {
        return Err(ValidationError::TooLong {
            field: "query",
            max: MAX_QUERY_LENGTH,
        });
    }
    check_content("query", trimmed)?;

    let (artist, title) = split_artist_title(trimmed);
    let query = AnalysisQuery { artist, title };
    validate_query(&query)?;
    Ok(query)
}

/// Validates a query's fields, whether parsed or supplied directly.
pub fn validate_query(query: &AnalysisQuery) -> Result<(), ValidationError> {
    validate_field("artist", &query.artist)?;
    validate_field("title", &query.title)
}

fn validate_field(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Empty);
    }
    if value.chars().count() > MAX_FIELD_LENGTH {
        return Err(ValidationError::TooLong {
            field,
            max: MAX_FIELD_LENGTH,
        });
    }
    check_content(field, value)
}

fn check_content(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.chars().any(char::is_control) {
        return Err(ValidationError::ControlCharacters { field });
    }
    if SUSPICIOUS_CONTENT.is_match(value) {
        return Err(ValidationError::SuspiciousContent { field });
    }
    Ok(())
}

fn split_artist_title(text: &str) -> (String, String) {
    for separator in ARTIST_FIRST_SEPARATORS {
        if let Some((artist, title)) = text.split_once(separator) {
            if let Some(pair) = non_empty_pair(artist, title) {
                return pair;
            }
        }
    }

    // " by " is matched case-insensitively on its last occurrence so that
    // titles like "Stand by Me by Ben E. King" keep their own "by".
    if let Some(index) = rfind_ignore_ascii_case(text, TITLE_FIRST_SEPARATOR) {
        let title = &text[..index];
        let artist = &text[index + TITLE_FIRST_SEPARATOR.len()..];
        if let Some(pair) = non_empty_pair(artist, title) {
            return pair;
        }
    }

    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() < 3 {
        return (UNKNOWN_ARTIST.to_string(), text.to_string());
    }
    (tokens[0].to_string(), tokens[1..].join(" "))
}

/// Byte offset of the last ASCII-case-insensitive match of an ASCII `needle`.
fn rfind_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    let (h, n) = (haystack.as_bytes(), needle.as_bytes());
    if n.len() > h.len() {
        return None;
    }
    (0..=h.len() - n.len())
        .rev()
        .find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

fn non_empty_pair(artist: &str, title: &str) -> Option<(String, String)> {
    let artist = artist.trim();
    let title = title.trim();
    if artist.is_empty() || title.is_empty() {
        None
    } else {
        Some((artist.to_string(), title.to_string()))
    }
}
