//! Input URL canonicalization.
//!
//! Tracking parameters (`start_radio`, `si`, `feature`, …) change constantly
//! and can steer the remote service into degraded responses, so the query is
//! reduced to a fixed allow-list before any remote call. Only the known
//! video hosts are touched; everything else passes through unchanged.

use tracing::debug;
use url::Url;

/// Query parameters that survive canonicalization, in original order:
/// video id, playlist id, timestamp, playlist index, playlist params.
const ALLOWED_PARAMS: [&str; 5] = ["v", "list", "t", "index", "pp"];

/// Hosts whose URLs are canonicalized.
fn is_known_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == "youtube.com"
        || host.ends_with(".youtube.com")
        || host == "youtu.be"
}

/// Canonicalizes `raw`, stripping all query parameters except the allow-list.
///
/// Allow-listed parameters keep their order and values. URLs on unknown
/// hosts, and inputs that do not parse as URLs, pass through unchanged.
/// Idempotent: canonicalizing a canonical URL is a no-op.
#[must_use]
pub fn canonicalize(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    let Some(host) = url.host_str() else {
        return raw.to_string();
    };
    if !is_known_host(host) {
        return raw.to_string();
    }

    let mut kept: Vec<(String, String)> = Vec::new();
    let mut dropped: Vec<String> = Vec::new();
    for (key, value) in url.query_pairs() {
        if ALLOWED_PARAMS.contains(&key.as_ref()) {
            kept.push((key.into_owned(), value.into_owned()));
        } else {
            dropped.push(key.into_owned());
        }
    }

    if dropped.is_empty() {
        return url.to_string();
    }

    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    debug!(
        dropped = %dropped.join(","),
        canonical = %url,
        "stripped query parameters"
    );
    url.to_string()
}

/// True for URLs addressing a bare playlist (a known hang class for
/// metadata-only queries; the caller skips probing for these).
#[must_use]
pub fn is_playlist_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    is_known_host(host) && url.path().starts_with("/playlist")
}
