//! Generic cross-browser cookie extraction.
//!
//! Wraps the `rookie` extraction library, which knows how to locate and
//! decrypt the native cookie stores of the supported browsers. Extraction is
//! blocking (filesystem + OS keychain access), so it runs on the blocking
//! pool.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use super::cookies::{CookieRecord, fallback_expiry};
use crate::settings::Browser;

/// Errors from the generic extraction path. Absorbed by the credential
/// resolver (logged, then the next browser is tried).
#[derive(Debug, thiserror::Error)]
pub enum GenericExtractError {
    /// The blocking extraction task panicked or was cancelled.
    #[error("cookie extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The extraction library reported a failure for this browser.
    #[error("{browser} cookie extraction failed: {message}")]
    Extraction {
        /// Browser whose store could not be read.
        browser: Browser,
        /// Library-reported reason.
        message: String,
    },
}

/// Extracts cookies scoped to `domain` from `browser`'s native store.
///
/// An empty result means the browser is installed but holds no cookies for
/// the domain; the caller falls through to the next browser.
///
/// # Errors
///
/// Returns [`GenericExtractError`] when the store cannot be read at all.
pub async fn extract_browser_cookies(
    browser: Browser,
    domain: &str,
) -> Result<Vec<CookieRecord>, GenericExtractError> {
    let bare_domain = domain.trim_start_matches('.').to_string();
    let raw = tokio::task::spawn_blocking(move || {
        let domains = Some(vec![bare_domain]);
        match browser {
            Browser::Chrome => rookie::chrome(domains),
            Browser::Firefox => rookie::firefox(domains),
            Browser::Edge => rookie::edge(domains),
        }
    })
    .await?
    .map_err(|error| GenericExtractError::Extraction {
        browser,
        message: error.to_string(),
    })?;

    let now = unix_now();
    let records: Vec<CookieRecord> = raw
        .into_iter()
        .map(|cookie| {
            let expires = cookie.expires.unwrap_or_else(|| fallback_expiry(now));
            CookieRecord::new(
                &cookie.domain,
                &cookie.path,
                cookie.secure,
                expires,
                cookie.name,
                cookie.value,
            )
        })
        .collect();
    debug!(%browser, count = records.len(), "generic extraction finished");
    Ok(records)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
