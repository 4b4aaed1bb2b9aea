//! Credential resolution: turning a policy into a usable cookie file.
//!
//! Source precedence: a user-supplied cookie file always wins and is never
//! combined with browser extraction; otherwise browser stores are tried
//! (direct Firefox profile read, then the generic cross-browser shim) until
//! one yields cookies for the target domain. Every per-source failure is
//! absorbed and logged; the resolver only gives up when all sources are
//! exhausted.
//!
//! Do not log cookie values; logs carry counts and source names only.

mod cookies;
mod firefox;
mod generic;
mod handle;

use std::io::BufReader;

use tracing::{debug, info, warn};

pub use cookies::{
    CookieFileError, CookieParse, CookieRecord, fallback_expiry, normalize_domain,
    parse_cookie_file, write_cookie_file,
};
pub use firefox::{FirefoxError, default_profile_roots, extract_profile_cookies};
pub use generic::{GenericExtractError, extract_browser_cookies};
pub use handle::{CredentialHandle, materialize_cookie_file};

use crate::settings::{Browser, CredentialPolicy};

/// Cookie domain of the remote service.
pub const SERVICE_COOKIE_DOMAIN: &str = ".youtube.com";

/// Resolves a credential for one attempt.
///
/// `escalate` forces the direct Firefox profile read to be tried first,
/// regardless of the preferred browser: the escalation path deliberately
/// swaps acquisition strategy after a credential-classified failure.
///
/// Returns `None` when no source yields cookies; the caller proceeds
/// unauthenticated.
pub async fn resolve(
    policy: &CredentialPolicy,
    domain: &str,
    escalate: bool,
) -> Option<CredentialHandle> {
    resolve_with_roots(policy, domain, escalate, &default_profile_roots()).await
}

/// [`resolve`] with explicit Firefox profile roots (injectable for tests).
pub async fn resolve_with_roots(
    policy: &CredentialPolicy,
    domain: &str,
    escalate: bool,
    firefox_roots: &[std::path::PathBuf],
) -> Option<CredentialHandle> {
    // A user-supplied file takes precedence and is never deleted.
    if let Some(custom) = &policy.custom_cookies_file {
        if custom.exists() {
            report_custom_file(custom);
            return Some(CredentialHandle::borrowed(custom.clone()));
        }
        warn!(path = %custom.display(), "custom cookie file not found, falling back");
    }

    if !policy.use_browser_cookies {
        debug!("browser cookie extraction disabled by policy");
        return None;
    }

    let direct_first = escalate || policy.preferred_browser == Browser::Firefox;
    if direct_first {
        match extract_profile_cookies(firefox_roots, domain).await {
            Ok(records) if !records.is_empty() => {
                match materialize_cookie_file(&records) {
                    Ok(handle) => {
                        info!(count = records.len(), "using cookies from Firefox profile");
                        return Some(handle);
                    }
                    Err(error) => warn!(%error, "could not write Firefox cookies"),
                }
            }
            Ok(_) => debug!("Firefox profile holds no cookies for the target domain"),
            Err(error) => warn!(%error, "direct Firefox extraction unavailable"),
        }
    }

    // Generic path: preferred browser first, then the rest in fixed order.
    let mut order = vec![policy.preferred_browser];
    order.extend(
        Browser::ALL
            .into_iter()
            .filter(|b| *b != policy.preferred_browser),
    );

    for browser in order {
        match extract_browser_cookies(browser, domain).await {
            Ok(records) if !records.is_empty() => match materialize_cookie_file(&records) {
                Ok(handle) => {
                    info!(%browser, count = records.len(), "using browser cookies");
                    return Some(handle);
                }
                Err(error) => warn!(%browser, %error, "could not write browser cookies"),
            },
            Ok(_) => debug!(%browser, "no cookies for the target domain"),
            Err(error) => warn!(%browser, %error, "browser cookie source unavailable"),
        }
    }

    let supported = Browser::ALL.map(Browser::label).join(", ");
    warn!(
        supported = %supported,
        "could not load cookies from any browser; make sure one of the supported \
         browsers is installed and logged in to the service"
    );
    None
}

/// Logs a sanity check of a user-supplied cookie file without failing the
/// resolution; an unparseable file is still handed through as-is.
fn report_custom_file(path: &std::path::Path) {
    match std::fs::File::open(path).map(BufReader::new).map(parse_cookie_file) {
        Ok(Ok(parse)) => {
            info!(
                path = %path.display(),
                cookies = parse.records.len(),
                malformed = parse.warnings.len(),
                "using custom cookie file"
            );
        }
        Ok(Err(error)) => {
            warn!(path = %path.display(), %error, "custom cookie file did not parse; using it anyway");
        }
        Err(error) => {
            warn!(path = %path.display(), %error, "custom cookie file could not be read for validation");
        }
    }
}
