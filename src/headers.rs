//! Desktop browser identities for outbound metadata and transfer calls.
//!
//! The remote service fingerprints clients; presenting a consistent desktop
//! browser identity (User-Agent plus matching Accept headers) keeps probe and
//! transfer traffic indistinguishable from a normal session. A fresh identity
//! is drawn when an attempt needs to shed its previous fingerprint.

use rand::seq::SliceRandom;

/// One desktop browser identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowserIdentity {
    /// User-Agent header value.
    pub user_agent: &'static str,
    /// Accept header value.
    pub accept: &'static str,
    /// Accept-Language header value.
    pub accept_language: &'static str,
}

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";

/// Pool of current desktop profiles (Chrome, Firefox, Safari on macOS).
const IDENTITIES: &[BrowserIdentity] = &[
    BrowserIdentity {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
        accept: ACCEPT,
        accept_language: ACCEPT_LANGUAGE,
    },
    BrowserIdentity {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:123.0) \
                     Gecko/20100101 Firefox/123.0",
        accept: ACCEPT,
        accept_language: ACCEPT_LANGUAGE,
    },
    BrowserIdentity {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
                     (KHTML, like Gecko) Version/17.3.1 Safari/605.1.15",
        accept: ACCEPT,
        accept_language: ACCEPT_LANGUAGE,
    },
];

/// Picks a random desktop identity from the pool.
#[must_use]
pub fn random_identity() -> BrowserIdentity {
    let mut rng = rand::thread_rng();
    // The pool is a non-empty const, so choose() cannot return None.
    *IDENTITIES.choose(&mut rng).unwrap_or(&IDENTITIES[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_identity_comes_from_pool() {
        for _ in 0..20 {
            let identity = random_identity();
            assert!(IDENTITIES.contains(&identity));
        }
    }

    #[test]
    fn test_identities_are_desktop_profiles() {
        for identity in IDENTITIES {
            assert!(
                identity.user_agent.starts_with("Mozilla/5.0 (Macintosh"),
                "pool should contain desktop profiles only: {}",
                identity.user_agent
            );
            assert!(!identity.accept.is_empty());
            assert!(!identity.accept_language.is_empty());
        }
    }
}
