//! Cache key derivation.

use std::fmt::Write as _;
use std::path::Path;

use path_slash::PathExt as _;

/// A rendered, delimited cache key: `path|content|options|env|deps`.
///
/// Rendered as a string (rather than kept as a tuple) so it can be used
/// directly as a map key and logged without extra formatting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

/// The delimiter must never appear inside a component. Forward-slash
/// normalized paths and hex-rendered hashes both satisfy this.
const DELIM: char = '|';

impl CacheKey {
    pub fn new(
        normalized_path: &Path,
        content_hash: u64,
        options_hash: u64,
        env_hash: u64,
        dep_hash: u64,
    ) -> Self {
        let path = normalized_path.to_slash_lossy();
        debug_assert!(!path.contains(DELIM), "path must not contain the key delimiter");
        let mut s = String::with_capacity(path.len() + 4 * 17);
        s.push_str(&path);
        for component in [content_hash, options_hash, env_hash, dep_hash] {
            write!(s, "{DELIM}{component:016x}").expect("String write is infallible");
        }
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hashes a byte string with the crate's chosen content hash (xxh3, same
/// family `foundry-compilers-core` exposes behind its `hasher` feature).
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn key_changes_when_any_component_changes() {
        let path = PathBuf::from("src/a.ts");
        let base = CacheKey::new(&path, 1, 2, 3, 4);
        assert_ne!(base, CacheKey::new(&path, 9, 2, 3, 4));
        assert_ne!(base, CacheKey::new(&path, 1, 9, 3, 4));
        assert_ne!(base, CacheKey::new(&path, 1, 2, 9, 4));
        assert_ne!(base, CacheKey::new(&path, 1, 2, 3, 9));
        assert_eq!(base, CacheKey::new(&path, 1, 2, 3, 4));
    }

    #[test]
    fn key_uses_forward_slashes() {
        let key = CacheKey::new(Path::new("src/nested/a.ts"), 1, 2, 3, 4);
        assert!(key.as_str().starts_with("src/nested/a.ts|"));
    }
}
