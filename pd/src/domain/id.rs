//! Domain ID generation
//!
//! Record IDs use the format: `{6-char-hex}-{type}-{slug}`
//! Example: `019430-txn-sync-2026-08-06`

use sha2::{Digest, Sha256};

/// Generate a domain ID from type and title
pub fn generate_id(domain_type: &str, title: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex_prefix = &uuid.to_string()[..6];
    let slug = slugify(title);
    format!("{}-{}-{}", hex_prefix, domain_type, slug)
}

/// Slugify a title for use in IDs
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Stable hex digest of a logical identity string.
///
/// The same identity always hashes to the same digest, across processes and
/// restarts, so identity-derived keys survive reloads.
pub fn identity_digest(identity: &str) -> String {
    let digest = Sha256::digest(identity.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_format() {
        let id = generate_id("txn", "Sync 2026-08-06");
        let parts: Vec<&str> = id.splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 6);
        assert_eq!(parts[1], "txn");
        assert!(parts[2].starts_with("sync"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Deep Work"), "deep-work");
        assert_eq!(slugify("  Lunch @ 12  "), "lunch-12");
        assert_eq!(slugify("a--b"), "a-b");
    }

    #[test]
    fn test_identity_digest_stable() {
        let a = identity_digest("profile|no_earlier_than|mon,tue");
        let b = identity_digest("profile|no_earlier_than|mon,tue");
        let c = identity_digest("profile|no_later_than|mon,tue");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 12);
    }
}
