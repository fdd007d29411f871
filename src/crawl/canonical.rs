//! URL canonicalisation
//!
//! Maps any input URL to a stable canonical form so that equivalent URLs
//! compare equal across the frontier, the deduplicator, and storage:
//! - lowercase scheme and host (IDNA-encoded by the `url` parser)
//! - default ports and fragments removed
//! - path segment-normalised (`.`/`..` resolved, duplicate slashes collapsed)
//! - tracking query parameters stripped, remaining parameters sorted
//!
//! Canonicalising a canonical URL yields the same string.

use thiserror::Error;
use url::Url;

/// Errors produced while canonicalising a URL
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(#[from] url::ParseError),
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
}

/// Query parameter keys that carry tracking state rather than content
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "gclsrc", "dclid", "msclkid", "twclid", "mc_cid", "mc_eid", "ref",
    "ref_src", "source", "si", "spm", "_ga", "_gl", "_hsenc", "_hsmi",
];

/// Tracking key prefixes matched case-insensitively
const TRACKING_PREFIXES: &[&str] = &["utm_", "hsa_"];

/// Canonicalise a URL, resolving it against `base` when relative.
///
/// Returns an error for unparseable input and for any scheme other than
/// `http`/`https` (`mailto:`, `javascript:`, `tel:`, `data:` and friends are
/// all rejected here).
pub fn canonicalize(input: &str, base: Option<&Url>) -> Result<Url, UrlError> {
    let mut url = match base {
        Some(base) => base.join(input.trim())?,
        None => Url::parse(input.trim())?,
    };

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::UnsupportedScheme(other.to_string())),
    }

    // The parser already lowercases and IDNA-encodes the host; a trailing
    // dot survives parsing and must be stripped by hand.
    let host = url.host_str().ok_or(UrlError::MissingHost)?;
    if host.ends_with('.') {
        let stripped = host.trim_end_matches('.').to_string();
        if stripped.is_empty() {
            return Err(UrlError::MissingHost);
        }
        url.set_host(Some(&stripped))?;
    }

    let path = normalize_path(url.path());
    url.set_path(&path);

    let query = url.query().map(normalize_query).unwrap_or_default();
    if query.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&query));
    }

    url.set_fragment(None);

    Ok(url)
}

/// Collapse duplicate slashes, resolve `.`/`..`, strip the trailing slash
/// from non-root paths.
fn normalize_path(path: &str) -> String {
    let mut resolved: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                resolved.pop();
            }
            seg => resolved.push(seg),
        }
    }

    if resolved.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", resolved.join("/"))
    }
}

/// Drop tracking parameters and sort the remainder by raw `key=value` pair.
///
/// Pairs are kept verbatim (no decode/re-encode round trip) so that a
/// canonical query string survives a second pass unchanged.
fn normalize_query(query: &str) -> String {
    let mut params: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty() && !is_tracking_param(pair))
        .collect();

    params.sort_unstable();
    params.dedup();
    params.join("&")
}

fn is_tracking_param(pair: &str) -> bool {
    let key = pair.split('=').next().unwrap_or("").to_lowercase();
    TRACKING_PARAMS.contains(&key.as_str())
        || TRACKING_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Strip a single leading `www.` label from a hostname.
pub fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Check whether `host` belongs to the site rooted at `root_host`.
///
/// With `include_subdomains` the check accepts any host underneath the root
/// (`docs.example.com` vs `example.com`); without it hosts must match
/// exactly. A leading `www.` is ignored on both sides.
pub fn is_same_site(host: &str, root_host: &str, include_subdomains: bool) -> bool {
    let host = strip_www(host);
    let root = strip_www(root_host);

    if host.eq_ignore_ascii_case(root) {
        return true;
    }
    if !include_subdomains {
        return false;
    }

    let host = host.to_ascii_lowercase();
    let root = root.to_ascii_lowercase();
    host.ends_with(&format!(".{root}")) || root.ends_with(&format!(".{host}"))
}
