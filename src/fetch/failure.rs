//! Transfer failure classification and corrective suggestions.
//!
//! Classification prefers structured information (an HTTP status embedded in
//! the diagnostic) and falls back to substring signatures. The signature
//! lists live in one table so the escalation contract stays testable in one
//! place.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::extractor::ExtractorError;

/// Classified cause of a failed transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Authentication/availability problem a different credential may fix.
    Credential,
    /// The requested format cannot be served.
    FormatUnavailable,
    /// The remote service is throttling (or region/age blocking) requests.
    RateLimited,
    /// Transport-level failure.
    Network,
    /// Anything unrecognized.
    Unknown,
}

impl FailureKind {
    /// Whether this failure class triggers the one-shot credential
    /// escalation retry.
    #[must_use]
    pub fn triggers_escalation(self) -> bool {
        matches!(self, FailureKind::Credential)
    }

    /// Corrective action matching the cause class.
    #[must_use]
    pub fn suggestion(self) -> &'static str {
        match self {
            FailureKind::Credential => {
                "Make sure you are logged in to the service in a supported browser \
                 (or point custom_cookies_file at an exported cookie file), then retry."
            }
            FailureKind::FormatUnavailable => {
                "Run with --list-formats to see what the resource offers, \
                 or try a different URL."
            }
            FailureKind::RateLimited => {
                "Wait a few minutes before retrying. A persistent block can also mean \
                 a geographic restriction or age-gated content - stay logged in."
            }
            FailureKind::Network => {
                "Check network connectivity (and any VPN/proxy), then retry."
            }
            FailureKind::Unknown => "Re-run with -v to capture the full diagnostic output.",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Credential => "credential/availability",
            FailureKind::FormatUnavailable => "format unavailable",
            FailureKind::RateLimited => "rate-limited",
            FailureKind::Network => "network",
            FailureKind::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Substring signatures, checked in order against the lowercased diagnostic.
/// The credential list is the escalation contract.
const FAILURE_SIGNATURES: &[(FailureKind, &[&str])] = &[
    (
        FailureKind::FormatUnavailable,
        &["requested format is not available"],
    ),
    (
        FailureKind::RateLimited,
        &["too many requests", "rate limit", "rate-limit"],
    ),
    (
        FailureKind::Credential,
        &["cookies", "login", "sign in", "private", "unavailable"],
    ),
    (
        FailureKind::Network,
        &[
            "timed out",
            "timeout",
            "connection",
            "network",
            "getaddrinfo",
            "unable to download",
        ],
    ),
];

static HTTP_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    // yt-dlp surfaces transport failures as "HTTP Error NNN".
    #[allow(clippy::unwrap_used)]
    let pattern = Regex::new(r"(?i)http error (\d{3})").unwrap();
    pattern
});

/// Classifies a capability error into a failure kind.
///
/// Structured variants map directly; tool failures classify their captured
/// diagnostic text.
#[must_use]
pub fn classify_failure(error: &ExtractorError) -> FailureKind {
    match error {
        ExtractorError::NoPlayableFormats => FailureKind::FormatUnavailable,
        ExtractorError::Spawn { .. } | ExtractorError::MissingArtifact => FailureKind::Unknown,
        ExtractorError::Metadata { .. } => FailureKind::Network,
        ExtractorError::Failed { stderr, .. } => classify_diagnostic(stderr),
    }
}

/// Classifies raw diagnostic text: embedded HTTP status first, then the
/// signature table.
#[must_use]
pub fn classify_diagnostic(text: &str) -> FailureKind {
    if let Some(status) = embedded_http_status(text) {
        match status {
            401 | 407 => return FailureKind::Credential,
            403 | 429 => return FailureKind::RateLimited,
            404 | 410 => return FailureKind::FormatUnavailable,
            500..=599 => return FailureKind::Network,
            _ => {}
        }
    }

    let lowered = text.to_ascii_lowercase();
    for (kind, needles) in FAILURE_SIGNATURES {
        if needles.iter().any(|needle| lowered.contains(needle)) {
            return *kind;
        }
    }
    FailureKind::Unknown
}

/// True for the transient format-exhaustion response that warrants one
/// fresh-identity probe retry.
#[must_use]
pub fn is_format_exhaustion(error: &ExtractorError) -> bool {
    matches!(error, ExtractorError::Failed { stderr, .. }
        if classify_diagnostic(stderr) == FailureKind::FormatUnavailable)
}

fn embedded_http_status(text: &str) -> Option<u16> {
    HTTP_STATUS
        .captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|status| status.as_str().parse().ok())
}

/// Renders the user-facing failure report: cause class plus matching
/// corrective action.
#[must_use]
pub fn failure_report(kind: FailureKind, diagnostic: &str) -> String {
    format!(
        "{diagnostic}\n  Likely cause: {kind}\n  Suggestion: {}",
        kind.suggestion()
    )
}
