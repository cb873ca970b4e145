//! URL canonicalization for visited-set keys and link dedup.

use url::Url;

/// Canonicalize an absolute URL: drop fragment and query, strip trailing
/// slashes from the path (the root path stays `/`).
///
/// Malformed input is returned unchanged. Idempotent.
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => normalize_parsed(url),
        Err(_) => raw.to_string(),
    }
}

/// Same as [`normalize_url`] for an already-parsed URL.
pub fn normalize_parsed(mut url: Url) -> String {
    url.set_fragment(None);
    url.set_query(None);

    let trimmed = url.path().trim_end_matches('/').to_string();
    if trimmed.is_empty() {
        url.set_path("/");
    } else {
        url.set_path(&trimmed);
    }

    url.to_string()
}
