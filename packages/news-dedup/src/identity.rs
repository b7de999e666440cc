//! Content-addressed article identity.
//!
//! An article's id is the first 16 hex characters of the SHA-256 of its
//! normalized URL. Titles and bodies drift between extraction attempts, the
//! URL does not, so every equality check in this crate goes through here.

use sha2::{Digest, Sha256};

use crate::error::{DedupError, Result};

/// Number of hex characters kept from the digest (64 bits).
pub const ID_LEN: usize = 16;

/// Normalize a URL for hashing: trim surrounding whitespace, lower-case.
pub fn normalize_url(url: &str) -> String {
    url.trim().to_lowercase()
}

/// Compute the stable id for an article URL.
///
/// Fails with [`DedupError::InvalidInput`] when the URL is empty after
/// trimming.
///
/// ```
/// use news_dedup::identity::article_id;
///
/// let a = article_id("https://example.com/match-report").unwrap();
/// let b = article_id("  HTTPS://EXAMPLE.COM/Match-Report ").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 16);
/// ```
pub fn article_id(url: &str) -> Result<String> {
    let normalized = normalize_url(url);
    if normalized.is_empty() {
        return Err(DedupError::invalid("URL is required to generate an article id"));
    }

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    Ok(digest[..ID_LEN].to_string())
}
