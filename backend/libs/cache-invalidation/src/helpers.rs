//! Helper functions for cache key management

/// Build the cache key for an entity identity.
///
/// Without a prefix the key is the bare identity, matching how the read path
/// populates the cache.
///
/// # Example
///
/// ```
/// use cache_invalidation::build_cache_key;
///
/// assert_eq!(build_cache_key(None, "42"), "42");
/// assert_eq!(build_cache_key(Some("sinner"), "42"), "sinner:42");
/// assert_eq!(build_cache_key(Some(""), "42"), "42");
/// ```
pub fn build_cache_key(prefix: Option<&str>, identity: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{}:{}", p, identity),
        _ => identity.to_string(),
    }
}
