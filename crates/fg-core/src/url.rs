//! URL normalization utilities
//!
//! Every URL the engine sees goes through [`normalize_url`] first. Bare hosts
//! such as `youtube.com/watch` get an `https://` prefix, browser-internal
//! schemes are rejected, and hostnames are compared without a leading `www.`.

use url::Url;

use crate::error::EngineError;

// =============================================================================
// Scheme Handling
// =============================================================================

/// Get the position after "://" if the URL starts with an explicit scheme.
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();
    let sep = url.find("://")?;
    if sep == 0 || !bytes[0].is_ascii_alphabetic() {
        return None;
    }
    let scheme_ok = bytes[..sep]
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.');
    if scheme_ok {
        Some(sep + 3)
    } else {
        None
    }
}

/// Check for an explicit `http://` or `https://` prefix.
#[inline]
pub fn has_web_scheme(url: &str) -> bool {
    let bytes = url.as_bytes();
    (bytes.len() >= 8 && bytes[..8].eq_ignore_ascii_case(b"https://"))
        || (bytes.len() >= 7 && bytes[..7].eq_ignore_ascii_case(b"http://"))
}

// =============================================================================
// Normalization
// =============================================================================

/// Parse a URL the way the extension pages enter them.
///
/// Input without a scheme is treated as `https://<input>`. Any other explicit
/// scheme (`chrome://`, `chrome-extension://`, `file://`) is not a website
/// and is reported as malformed.
pub fn normalize_url(raw: &str) -> Result<Url, EngineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::MalformedUrl(raw.to_string()));
    }

    let candidate = if has_web_scheme(trimmed) {
        trimmed.to_string()
    } else if get_scheme_end(trimmed).is_some() {
        return Err(EngineError::MalformedUrl(raw.to_string()));
    } else {
        format!("https://{}", trimmed)
    };

    let parsed = Url::parse(&candidate).map_err(|_| EngineError::MalformedUrl(raw.to_string()))?;
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(parsed),
        _ => Err(EngineError::MalformedUrl(raw.to_string())),
    }
}

/// Canonical form of a hostname for comparisons.
#[inline]
pub fn canonical_host(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => host,
    }
}

/// Extract the comparison domain of a URL.
pub fn try_domain_of(raw: &str) -> Result<String, EngineError> {
    let parsed = normalize_url(raw)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| EngineError::MalformedUrl(raw.to_string()))?;
    Ok(canonical_host(host))
}

/// Extract the comparison domain of a URL, or `None` if it does not parse.
pub fn domain_of(raw: &str) -> Option<String> {
    try_domain_of(raw).ok()
}

/// Reduce a URL to its origin, the form stored in category lists.
pub fn format_url(raw: &str) -> Option<String> {
    let parsed = normalize_url(raw).ok()?;
    Some(parsed.origin().ascii_serialization())
}

/// Check whether the input can be turned into a website URL.
pub fn is_valid_url(raw: &str) -> bool {
    normalize_url(raw).is_ok()
}

// =============================================================================
// Slicing
// =============================================================================

/// Everything before the query string.
#[inline]
pub fn strip_query(url: &str) -> &str {
    match url.find('?') {
        Some(pos) => &url[..pos],
        None => url,
    }
}

/// Check whether a URL belongs to the extension itself.
#[inline]
pub fn is_extension_url(url: &str, extension_origin: &str) -> bool {
    if extension_origin.is_empty() {
        return false;
    }
    url.starts_with(extension_origin)
}
