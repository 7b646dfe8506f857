//! Content-hash cache keys.

use sha2::{Digest, Sha256};

/// Cache key derived from a payload.
///
/// The digest is SHA-256, hex-encoded (64 lower-case characters), optionally
/// namespaced as `{prefix}:{digest}`. Identical payloads always map to the
/// same key, in every worker and across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hashes a payload into a key without a namespace.
    pub fn from_payload(payload: &[u8]) -> Self {
        Self(content_digest(payload))
    }

    /// Hashes a payload into a key under an optional namespace.
    pub fn derive(prefix: Option<&str>, payload: &[u8]) -> Self {
        let digest = content_digest(payload);
        match prefix {
            Some(prefix) if !prefix.is_empty() => Self(format!("{}:{}", prefix, digest)),
            _ => Self(digest),
        }
    }

    /// Get the key string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn content_digest(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}
