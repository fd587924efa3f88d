//! Public share id generation and validation.

use crate::analysis::query::cache_key;
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

pub const MAX_SLUG_LENGTH: usize = 80;
pub const MAX_SHARE_ID_ATTEMPTS: u32 = 5;

lazy_static! {
    static ref SLUG_SHARE_ID: Regex = Regex::new(r"^[a-z0-9-]{3,100}$").expect("valid regex");
    static ref LEGACY_SHARE_ID: Regex =
        Regex::new(r"^[A-Za-z0-9_-]{10,30}$").expect("valid regex");
    static ref NON_SLUG_RUN: Regex = Regex::new(r"[^a-z0-9]+").expect("valid regex");
}

/// Whether `share_id` has the shape of a slug or a legacy random id.
pub fn is_valid_share_id(share_id: &str) -> bool {
    SLUG_SHARE_ID.is_match(share_id) || LEGACY_SHARE_ID.is_match(share_id)
}

/// Readable slug of `artist-title`, restricted to `[a-z0-9-]`.
pub fn slugify(artist: &str, title: &str) -> String {
    let lowered = format!("{} {}", artist, title).to_lowercase();
    let slug = NON_SLUG_RUN.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    // ASCII only at this point, so byte truncation is safe.
    let truncated = &slug[..slug.len().min(MAX_SLUG_LENGTH)];
    truncated.trim_end_matches('-').to_string()
}

/// Share id to try on the given insert attempt (0-based).
///
/// Attempt 0 is the plain slug; later attempts append a short hash so that
/// collisions between different songs with the same slug resolve
/// deterministically.
pub fn candidate(artist: &str, title: &str, attempt: u32) -> String {
    let key = cache_key(artist, title);
    let slug = slugify(artist, title);
    let base = if slug.len() < 3 {
        format!("song-{}", &sha256_hex(&key)[..8])
    } else {
        slug
    };

    if attempt == 0 {
        base
    } else {
        let suffix = sha256_hex(&format!("{}|{}", key, attempt));
        format!("{}-{}", base, &suffix[..6])
    }
}

fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}
