//! Content hashing for change detection
//!
//! Hashes are compared for equality only. Two texts with the same
//! `ContentHash` are treated as identical and never reanalyzed.

use serde::{Deserialize, Serialize};

/// Hex-encoded blake3 digest of a chunk's text
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash `text` in a single pass
pub fn content_hash(text: &str) -> ContentHash {
    ContentHash(blake3::hash(text.as_bytes()).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_same_hash() {
        assert_eq!(content_hash("hello world"), content_hash("hello world"));
    }

    #[test]
    fn single_byte_difference_changes_hash() {
        assert_ne!(content_hash("hello world"), content_hash("hello world."));
        assert_ne!(content_hash("hello world"), content_hash("hello World"));
        assert_ne!(content_hash(""), content_hash(" "));
    }

    #[test]
    fn hash_is_hex_encoded() {
        let hash = content_hash("abc");
        assert_eq!(hash.as_str().len(), 64);
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
