/*!
 * Path Helpers
 * Normalization and prefix walking for absolute namespace paths
 */

use super::types::{NamingError, NamingResult};

/// Root of the namespace
pub const ROOT: &str = "/";

/// Fold `.`, `..` and repeated separators; reject relative paths
pub fn normalize(path: &str) -> NamingResult<String> {
    if !path.starts_with('/') {
        return Err(NamingError::InvalidPath(path.to_string()));
    }
    path_clean::clean(path)
        .to_str()
        .map(str::to_owned)
        .ok_or_else(|| NamingError::InvalidPath(path.to_string()))
}

/// Every prefix of a normalized path that ends on a segment boundary,
/// longest first and ending with the root
pub fn prefixes(path: &str) -> impl Iterator<Item = &str> {
    let mut next = Some(path);
    std::iter::from_fn(move || {
        let current = next?;
        next = match current.rfind('/') {
            _ if current == ROOT => None,
            Some(0) => Some(ROOT),
            Some(idx) => Some(&current[..idx]),
            None => None,
        };
        Some(current)
    })
}

/// Part of `path` left to resolve once `prefix` has matched
pub fn remainder(path: &str, prefix: &str) -> String {
    if path == prefix {
        ROOT.to_string()
    } else if prefix == ROOT {
        path.to_string()
    } else {
        path[prefix.len()..].to_string()
    }
}
