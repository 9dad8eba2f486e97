//! Deterministic resource hashing.
//!
//! A resource's hash is derived from its *identity*, not (in general) its
//! bytes: the same URL always hashes the same way, independent of when it
//! was fetched or what its body currently is. Uploads are the exception —
//! there, identity and content coincide.

use sha2::{Digest, Sha256};

/// Hash for a web resource: the SHA-256 of the URL, hex-encoded.
pub fn hash_web(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash for a ticket resource: `{source_type}_{sanitized_id}`, where
/// non-word characters in `ticket_id` become `_` and the result is
/// lower-cased.
///
/// Example: `hash_ticket("redmine", "A/42#x") == "redmine_a_42_x"`.
pub fn hash_ticket(source_type: &str, ticket_id: &str) -> String {
    let sanitized: String = ticket_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("{}_{}", source_type, sanitized).to_lowercase()
}

/// Hash for an uploaded file: the SHA-256 of its content.
pub fn hash_upload(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// A short prefix of a content hash, used for `{short_hash}.{ext}`
/// upload filenames.
pub fn short_hash(hash: &str, len: usize) -> &str {
    &hash[..len.min(hash.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_hash_matches_the_documented_example() {
        assert_eq!(hash_ticket("redmine", "A/42#x"), "redmine_a_42_x");
    }

    #[test]
    fn ticket_hash_is_deterministic() {
        assert_eq!(
            hash_ticket("jira", "PROJ-17"),
            hash_ticket("jira", "PROJ-17")
        );
    }

    #[test]
    fn web_hash_is_a_pure_function_of_the_url() {
        let a = hash_web("https://example.com/docs");
        let b = hash_web("https://example.com/docs");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn upload_hash_depends_on_bytes_not_name() {
        assert_eq!(hash_upload(b"hello"), hash_upload(b"hello"));
        assert_ne!(hash_upload(b"hello"), hash_upload(b"world"));
    }

    #[test]
    fn short_hash_truncates_without_panicking_on_short_input() {
        assert_eq!(short_hash("abcdef", 3), "abc");
        assert_eq!(short_hash("ab", 8), "ab");
    }
}
