//! Seam to the external extraction/transfer capability.
//!
//! The capability is modeled as a trait so the orchestrator can be exercised
//! against stubs; the production implementation ([`ytdlp::YtDlp`]) shells out
//! to the `yt-dlp` binary. Option bags are explicit structs validated at
//! construction, so an invalid combination fails before it reaches the
//! process boundary.

pub mod ytdlp;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::headers::{BrowserIdentity, random_identity};

/// One remote-offered stream encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingDescriptor {
    /// Remote format identifier.
    pub id: String,
    /// Container extension (e.g. `webm`, `m4a`).
    pub container: String,
    /// Audio codec, when advertised.
    pub audio_codec: Option<String>,
    /// Video codec; the `"none"` sentinel marks audio-only streams.
    pub video_codec: Option<String>,
    /// Approximate audio bitrate in kbps.
    pub bitrate: Option<f64>,
    /// Approximate size in bytes.
    pub size: Option<u64>,
    /// Free-text quality note.
    pub note: Option<String>,
}

impl EncodingDescriptor {
    /// True when the stream carries audio and no video.
    #[must_use]
    pub fn is_audio_only(&self) -> bool {
        self.video_codec.as_deref() == Some("none")
            && self
                .audio_codec
                .as_deref()
                .is_some_and(|codec| codec != "none")
    }

    /// True for image/storyboard placeholder entries.
    #[must_use]
    pub fn is_storyboard(&self) -> bool {
        self.container == "mhtml"
            || self
                .note
                .as_deref()
                .is_some_and(|note| note.to_ascii_lowercase().contains("storyboard"))
    }
}

/// Metadata returned by a probe: resolved title, container shape, and the
/// advertised encodings.
#[derive(Debug, Clone, Default)]
pub struct MediaReport {
    /// Resolved resource title, when available.
    pub title: Option<String>,
    /// Whether the resource is a multi-entry container (playlist).
    pub multi_entry: bool,
    /// Entry count for multi-entry containers.
    pub entry_count: Option<usize>,
    /// Advertised encodings.
    pub formats: Vec<EncodingDescriptor>,
}

/// How a multi-entry container is transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistMode {
    /// Only the first entry (the deterministic non-interactive default).
    FirstItemOnly,
    /// Every entry in the container.
    EntireCollection,
}

/// Options for a metadata-only probe call.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Cookie file to authenticate with, if any.
    pub cookie_file: Option<PathBuf>,
    /// Browser identity presented to the remote service.
    pub identity: BrowserIdentity,
}

impl ProbeOptions {
    /// Probe options with a random desktop identity.
    #[must_use]
    pub fn new(cookie_file: Option<PathBuf>) -> Self {
        Self {
            cookie_file,
            identity: random_identity(),
        }
    }

    /// Unauthenticated options with a freshly drawn identity, used for the
    /// single retry after a format-exhaustion response.
    #[must_use]
    pub fn fresh_identity() -> Self {
        Self {
            cookie_file: None,
            identity: random_identity(),
        }
    }
}

/// Default transfer retry count.
pub const DEFAULT_RETRIES: u32 = 10;
/// Default per-fragment retry count.
pub const DEFAULT_FRAGMENT_RETRIES: u32 = 10;
/// Default inter-item sleep range in seconds.
pub const DEFAULT_SLEEP_INTERVAL: (u64, u64) = (1, 5);

/// Errors constructing an option bag.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OptionsError {
    /// The format selector expression is empty.
    #[error("format selector expression is empty")]
    EmptySelector,

    /// The output directory is empty.
    #[error("output directory is empty")]
    EmptyOutputDir,

    /// Sleep interval minimum exceeds its maximum.
    #[error("sleep interval minimum {min}s exceeds maximum {max}s")]
    BadSleepInterval {
        /// Configured minimum.
        min: u64,
        /// Configured maximum.
        max: u64,
    },
}

/// Options for one transfer attempt.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Format selector expression (exact id or fallback chain).
    pub selector: String,
    /// Directory the artifact lands in.
    pub output_dir: PathBuf,
    /// Cookie file to authenticate with, if any.
    pub cookie_file: Option<PathBuf>,
    /// Browser identity presented to the remote service.
    pub identity: BrowserIdentity,
    /// Multi-entry container handling.
    pub playlist_mode: PlaylistMode,
    /// Whether the capability's own progress output is shown.
    pub show_progress: bool,
    retries: u32,
    fragment_retries: u32,
    sleep_interval: (u64, u64),
}

impl TransferOptions {
    /// Builds transfer options with the standard retry/sleep defaults.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError`] for an empty selector or output directory.
    pub fn new(selector: impl Into<String>, output_dir: PathBuf) -> Result<Self, OptionsError> {
        let selector = selector.into();
        if selector.trim().is_empty() {
            return Err(OptionsError::EmptySelector);
        }
        if output_dir.as_os_str().is_empty() {
            return Err(OptionsError::EmptyOutputDir);
        }
        Ok(Self {
            selector,
            output_dir,
            cookie_file: None,
            identity: random_identity(),
            playlist_mode: PlaylistMode::FirstItemOnly,
            show_progress: false,
            retries: DEFAULT_RETRIES,
            fragment_retries: DEFAULT_FRAGMENT_RETRIES,
            sleep_interval: DEFAULT_SLEEP_INTERVAL,
        })
    }

    /// Overrides the inter-item sleep range.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::BadSleepInterval`] when `min > max`.
    pub fn with_sleep_interval(mut self, min: u64, max: u64) -> Result<Self, OptionsError> {
        if min > max {
            return Err(OptionsError::BadSleepInterval { min, max });
        }
        self.sleep_interval = (min, max);
        Ok(self)
    }

    /// Configured retry count.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Configured per-fragment retry count.
    #[must_use]
    pub fn fragment_retries(&self) -> u32 {
        self.fragment_retries
    }

    /// Configured inter-item sleep range in seconds.
    #[must_use]
    pub fn sleep_interval(&self) -> (u64, u64) {
        self.sleep_interval
    }
}

/// A transferred artifact on local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    /// Where the raw artifact landed.
    pub path: PathBuf,
}

/// Errors from the external capability.
#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    /// The external tool could not be launched.
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        /// Program that failed to start.
        tool: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The external tool exited unsuccessfully.
    #[error("{tool} failed: {stderr}")]
    Failed {
        /// Program that failed.
        tool: String,
        /// Captured diagnostic output (trimmed).
        stderr: String,
    },

    /// The metadata payload did not parse.
    #[error("could not parse metadata output: {source}")]
    Metadata {
        /// Underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// Every advertised encoding is an image/storyboard placeholder.
    #[error("no playable formats")]
    NoPlayableFormats,

    /// The transfer finished but no artifact path was reported.
    #[error("transfer reported no output file")]
    MissingArtifact,
}

impl ExtractorError {
    /// Creates a launch error.
    pub fn spawn(tool: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            tool: tool.into(),
            source,
        }
    }

    /// Creates a tool-failure error from captured stderr.
    pub fn failed(tool: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Failed {
            tool: tool.into(),
            stderr: stderr.into(),
        }
    }

    /// Diagnostic text usable for failure classification.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        match self {
            Self::Failed { stderr, .. } => stderr.clone(),
            other => other.to_string(),
        }
    }
}

/// The external extraction/transfer capability.
///
/// `probe` is metadata-only (no byte transfer); `fetch` performs the actual
/// transfer. Implementations must be cancel-safe: a caller may drop a probe
/// future at its deadline.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Queries the remote service for the resource's metadata and encodings.
    async fn probe(&self, url: &str, options: &ProbeOptions)
    -> Result<MediaReport, ExtractorError>;

    /// Transfers the resource per `options` and reports where it landed.
    async fn fetch(
        &self,
        url: &str,
        options: &TransferOptions,
    ) -> Result<FetchedArtifact, ExtractorError>;
}

/// Hard wall-clock deadline for a probe call.
pub const DEFAULT_PROBE_DEADLINE: Duration = Duration::from_secs(30);

/// Builds the output path template for the transfer capability.
#[must_use]
pub fn output_template(dir: &Path) -> String {
    dir.join("%(title)s.%(ext)s").to_string_lossy().into_owned()
}
