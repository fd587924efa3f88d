//! Shared constants for end-to-end tests
#![allow(dead_code)]

// ============================================================================
// Server lifecycle
// ============================================================================

/// Max time to wait for a spawned server to answer
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Poll interval while waiting for the server
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

/// Per-request timeout of the test client
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Queries
// ============================================================================

pub const BOHEMIAN_QUERY: &str = "Queen - Bohemian Rhapsody";

/// Same song as `BOHEMIAN_QUERY`, differently spelled
pub const BOHEMIAN_QUERY_MESSY: &str = " queen -   BOHEMIAN RHAPSODY ";

pub const BOHEMIAN_SHARE_ID: &str = "queen-bohemian-rhapsody";

pub const HEROES_ARTIST: &str = "David Bowie";
pub const HEROES_TITLE: &str = "Heroes";
pub const HEROES_SHARE_ID: &str = "david-bowie-heroes";

// ============================================================================
// Model answers
// ============================================================================

pub const MOCK_OVERVIEW: &str = "A six-minute suite without a chorus.";

/// Well-formed answer as the model would return it
pub const MOCK_ANSWER: &str = r#"```json
{
  "overview": "A six-minute suite without a chorus.",
  "themes": ["fate", "confession", "guilt"],
  "deepDive": "Ballad, opera and hard rock sections in sequence.",
  "culturalContext": "Released in 1975 on A Night at the Opera."
}
```"#;

// ============================================================================
// Configuration
// ============================================================================

/// Fast retries so resilience tests finish quickly
pub const FAST_RETRY_CONFIG: &str = r#"
[retry]
max_retries = 3
base_delay_ms = 5
max_delay_ms = 20
jitter_ms = 0
"#;
