//! Request URL to logical cache key normalization.

/// Normalizes a request URL to the logical key used by the resource manifest.
///
/// Returns `None` for URLs outside `origin` — those requests are never
/// intercepted. Same-origin URLs normalize as follows:
///
/// - a trailing `?v=` version query is stripped;
/// - the origin itself, `{origin}/`, and `{origin}/#...` deep links all
///   collapse to the entry-document key `/`;
/// - anything else becomes the origin-relative path, e.g.
///   `{origin}/app.js` → `app.js`.
#[must_use]
pub fn logical_key(origin: &str, url: &str) -> Option<String> {
    let origin = origin.trim_end_matches('/');
    if url == origin {
        return Some("/".to_string());
    }
    let rest = url.strip_prefix(origin)?;
    // Guard against prefix-only matches like "http://host2" vs "http://host".
    if !rest.starts_with('/') {
        return None;
    }
    if rest.starts_with("/#") {
        return Some("/".to_string());
    }
    let mut key = &rest[1..];
    if let Some((base, _)) = key.split_once("?v=") {
        key = base;
    }
    if key.is_empty() {
        return Some("/".to_string());
    }
    Some(key.to_string())
}
