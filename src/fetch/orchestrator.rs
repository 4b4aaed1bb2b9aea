//! The end-to-end attempt state machine.
//!
//! One invocation drives: URL canonicalization, credential resolution, the
//! deadline-guarded catalog probe, format selection, the transfer, and (only
//! for credential-classified failures) a single escalated re-attempt with a
//! swapped credential strategy and a broadened selector. Owned temporary
//! credential files are released at the end of the attempt that created
//! them, on every exit path.

use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::auth::{self, CredentialHandle, SERVICE_COOKIE_DOMAIN};
use crate::convert::{ConvertError, Transcoder, finalize};
use crate::extractor::{
    DEFAULT_PROBE_DEADLINE, ExtractorError, FetchedArtifact, MediaExtractor, MediaReport,
    PlaylistMode, ProbeOptions, TransferOptions,
};
use crate::format::{FormatSelection, choose_format, generic_fallback, BROADENED_EXPRESSION};
use crate::probe::{ProbeOutcome, probe_catalog};
use crate::settings::Settings;

use super::failure::{classify_failure, failure_report, is_format_exhaustion, FailureKind};
use super::url::{canonicalize, is_playlist_url};

/// Errors surfaced by a retrieval run. Everything here ends the run with a
/// non-zero exit; recoverable conditions were already absorbed upstream.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The download directory could not be created.
    #[error("could not create download directory {path}: {source}")]
    OutputDir {
        /// Directory that failed to materialize.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The download directory is missing and auto-creation is disabled.
    #[error(
        "download directory {path} does not exist \
         (enable create_directory_if_missing or create it manually)"
    )]
    OutputDirMissing {
        /// The missing directory.
        path: PathBuf,
    },

    /// A listing-only probe failed.
    #[error("{report}")]
    Probe {
        /// Classified, suggestion-bearing report.
        report: String,
    },

    /// The transfer failed (after escalation, where applicable).
    #[error("{report}")]
    Transfer {
        /// Final failure class.
        kind: FailureKind,
        /// Classified, suggestion-bearing report.
        report: String,
    },

    /// Post-processing failed.
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

/// Outcome of the probe phase.
struct ProbePhase {
    /// Catalog, when one was obtained.
    report: Option<MediaReport>,
    /// Whether the session identity must be refreshed and the credential
    /// stripped for the transfer (format-exhaustion fallback).
    fresh_session: bool,
}

/// Drives one retrieval attempt end to end.
pub struct Orchestrator {
    settings: Settings,
    extractor: Arc<dyn MediaExtractor>,
    transcoder: Transcoder,
    probe_deadline: Duration,
    interactive: bool,
}

impl Orchestrator {
    /// Builds an orchestrator for the given settings and capability.
    #[must_use]
    pub fn new(settings: Settings, extractor: Arc<dyn MediaExtractor>) -> Self {
        Self {
            settings,
            extractor,
            transcoder: Transcoder::default(),
            probe_deadline: DEFAULT_PROBE_DEADLINE,
            interactive: std::io::stdin().is_terminal(),
        }
    }

    /// Overrides interactivity detection (tests force the deterministic path).
    #[must_use]
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Overrides the probe deadline.
    #[must_use]
    pub fn with_probe_deadline(mut self, deadline: Duration) -> Self {
        self.probe_deadline = deadline;
        self
    }

    /// Overrides the post-processing tool pair.
    #[must_use]
    pub fn with_transcoder(mut self, transcoder: Transcoder) -> Self {
        self.transcoder = transcoder;
        self
    }

    /// Runs the full attempt sequence and returns the final artifact path.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when the transfer fails past the escalation
    /// path, when post-processing fails, or when the output directory is
    /// unusable.
    pub async fn run(&self, raw_url: &str) -> Result<PathBuf, FetchError> {
        let url = canonicalize(raw_url);
        self.ensure_output_dir()?;

        let mut credential =
            auth::resolve(&self.settings.cookies, SERVICE_COOKIE_DOMAIN, false).await;
        let phase = self.probe_phase(&url, credential.as_ref()).await;

        if phase.fresh_session {
            // Format-exhaustion fallback: shed the credential along with the
            // old browser identity. The transfer draws a new identity below.
            info!("retrying with a fresh unauthenticated session");
            release(&mut credential);
        }

        if let Some(report) = &phase.report {
            if let Some(title) = &report.title {
                info!(%title, "resource found");
            }
        }

        let selection = match &phase.report {
            Some(report) => choose_format(&report.formats, &self.settings.audio_format),
            None => FormatSelection::Fallback(generic_fallback(&self.settings.audio_format)),
        };
        info!(selector = %selection.expression(), exact = selection.is_exact(), "format selected");

        let playlist_mode = self.decide_playlist_mode(&url, phase.report.as_ref());

        let primary = self
            .attempt_transfer(&url, selection.expression(), credential.as_ref(), playlist_mode)
            .await;
        release(&mut credential);

        let artifact = match primary {
            Ok(artifact) => artifact,
            Err(error) => {
                let kind = classify_failure(&error);
                if !kind.triggers_escalation() {
                    return Err(FetchError::Transfer {
                        kind,
                        report: failure_report(kind, &error.diagnostic()),
                    });
                }
                warn!(%kind, "transfer failed, escalating credential strategy");
                self.escalated_attempt(&url, playlist_mode).await?
            }
        };

        info!(path = %artifact.path.display(), "transfer complete");
        let final_path = finalize(
            &artifact.path,
            &self.settings.audio_format,
            &self.settings.audio_quality,
            &self.transcoder,
        )
        .await?;
        Ok(final_path)
    }

    /// The single escalated re-attempt: credential re-resolved with the
    /// swapped strategy, selector broadened. A second failure is terminal.
    async fn escalated_attempt(
        &self,
        url: &str,
        playlist_mode: PlaylistMode,
    ) -> Result<FetchedArtifact, FetchError> {
        let mut credential =
            auth::resolve(&self.settings.cookies, SERVICE_COOKIE_DOMAIN, true).await;
        let result = self
            .attempt_transfer(url, BROADENED_EXPRESSION, credential.as_ref(), playlist_mode)
            .await;
        release(&mut credential);

        result.map_err(|error| {
            let kind = classify_failure(&error);
            FetchError::Transfer {
                kind,
                report: failure_report(kind, &error.diagnostic()),
            }
        })
    }

    /// Probes the catalog unless the URL is a known-hang playlist address,
    /// applying the one-shot fresh-identity fallback on format exhaustion.
    async fn probe_phase(&self, url: &str, credential: Option<&CredentialHandle>) -> ProbePhase {
        if is_playlist_url(url) {
            info!("playlist address, skipping catalog probe");
            return ProbePhase {
                report: None,
                fresh_session: false,
            };
        }

        let options = ProbeOptions::new(credential.map(|handle| handle.path().to_path_buf()));
        match probe_catalog(self.extractor.as_ref(), url, &options, self.probe_deadline).await {
            ProbeOutcome::Catalog(report) => ProbePhase {
                report: Some(report),
                fresh_session: false,
            },
            ProbeOutcome::Timeout => {
                warn!("catalog probe timed out, proceeding with the fallback selector");
                ProbePhase {
                    report: None,
                    fresh_session: false,
                }
            }
            ProbeOutcome::Failed(error) if is_format_exhaustion(&error) => {
                warn!(%error, "format catalog exhausted, falling back to a fresh session");
                ProbePhase {
                    report: None,
                    fresh_session: true,
                }
            }
            ProbeOutcome::Failed(error) => {
                warn!(%error, "catalog probe failed, proceeding with the fallback selector");
                ProbePhase {
                    report: None,
                    fresh_session: false,
                }
            }
        }
    }

    /// One transfer via the external capability.
    async fn attempt_transfer(
        &self,
        url: &str,
        selector: &str,
        credential: Option<&CredentialHandle>,
        playlist_mode: PlaylistMode,
    ) -> Result<FetchedArtifact, ExtractorError> {
        let mut options = match TransferOptions::new(
            selector,
            self.settings.download_directory.clone(),
        ) {
            Ok(options) => options,
            Err(error) => {
                // Selector and output dir were validated upstream; surface as
                // a failed attempt rather than panicking.
                return Err(ExtractorError::failed("options", error.to_string()));
            }
        };
        options.cookie_file = credential.map(|handle| handle.path().to_path_buf());
        options.playlist_mode = playlist_mode;
        options.show_progress = self.settings.show_progress;

        self.extractor.fetch(url, &options).await
    }

    /// The multi-entry fork: an explicit decision point, deterministic when
    /// nobody is at the terminal.
    fn decide_playlist_mode(&self, url: &str, report: Option<&MediaReport>) -> PlaylistMode {
        let multi_entry = is_playlist_url(url) || report.is_some_and(|r| r.multi_entry);
        if !multi_entry {
            return PlaylistMode::FirstItemOnly;
        }
        let entries = report.and_then(|r| r.entry_count);
        if !self.interactive {
            info!(
                ?entries,
                "multi-entry resource in a non-interactive session, taking the first item only"
            );
            return PlaylistMode::FirstItemOnly;
        }
        if ask_yes_no("Download the entire collection? [y/N] ") {
            PlaylistMode::EntireCollection
        } else {
            PlaylistMode::FirstItemOnly
        }
    }

    /// Listing-only mode: probe and print the catalog, no transfer.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Probe`] when no catalog could be obtained.
    pub async fn list_formats(&self, raw_url: &str) -> Result<(), FetchError> {
        let url = canonicalize(raw_url);
        let mut credential =
            auth::resolve(&self.settings.cookies, SERVICE_COOKIE_DOMAIN, false).await;
        let phase = self.probe_phase(&url, credential.as_ref()).await;
        release(&mut credential);

        let Some(report) = phase.report else {
            let kind = FailureKind::Unknown;
            return Err(FetchError::Probe {
                report: failure_report(kind, "could not obtain the format catalog"),
            });
        };
        print!("{}", render_format_table(&report));
        Ok(())
    }

    fn ensure_output_dir(&self) -> Result<(), FetchError> {
        let dir = &self.settings.download_directory;
        if dir.is_dir() {
            return Ok(());
        }
        if !self.settings.create_directory_if_missing {
            return Err(FetchError::OutputDirMissing { path: dir.clone() });
        }
        std::fs::create_dir_all(dir).map_err(|source| FetchError::OutputDir {
            path: dir.clone(),
            source,
        })
    }
}

/// Releases an owned temporary credential file, if any. Idempotent.
fn release(credential: &mut Option<CredentialHandle>) {
    if let Some(handle) = credential.as_mut() {
        handle.release();
    }
    *credential = None;
}

fn ask_yes_no(prompt: &str) -> bool {
    print!("{prompt}");
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Renders the probed catalog the way the listing mode prints it:
/// audio-only section first, then video.
#[must_use]
pub fn render_format_table(report: &MediaReport) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    if let Some(title) = &report.title {
        let _ = writeln!(out, "Formats for: {title}");
    }
    let _ = writeln!(
        out,
        "{:<12} {:<9} {:<12} {:<10} Note",
        "Format Code", "Extension", "Bitrate", "Filesize"
    );
    let _ = writeln!(out, "{}", "-".repeat(60));

    let (audio, other): (Vec<_>, Vec<_>) = report
        .formats
        .iter()
        .partition(|format| format.is_audio_only());

    if !audio.is_empty() {
        let _ = writeln!(out, "Audio-only formats:");
        for format in &audio {
            let _ = writeln!(out, "{}", format_row(format));
        }
    }
    if !other.is_empty() {
        let _ = writeln!(out, "Video formats (with audio if available):");
        for format in &other {
            let _ = writeln!(out, "{}", format_row(format));
        }
    }
    out
}

fn format_row(format: &crate::extractor::EncodingDescriptor) -> String {
    let bitrate = format
        .bitrate
        .map_or_else(|| "N/A".to_string(), |b| format!("{b:.0}k"));
    let size = format.size.map_or_else(
        || "N/A".to_string(),
        |bytes| format!("{:.1}MB", bytes as f64 / 1024.0 / 1024.0),
    );
    format!(
        "{:<12} {:<9} {:<12} {:<10} {}",
        format.id,
        format.container,
        bitrate,
        size,
        format.note.as_deref().unwrap_or("")
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::extractor::EncodingDescriptor;
    use crate::settings::CredentialPolicy;

    fn settings(dir: PathBuf, auto_create: bool) -> Settings {
        Settings {
            download_directory: dir,
            audio_format: "opus".to_string(),
            audio_quality: "best".to_string(),
            create_directory_if_missing: auto_create,
            show_progress: false,
            cookies: CredentialPolicy {
                use_browser_cookies: false,
                custom_cookies_file: None,
                preferred_browser: crate::settings::Browser::Chrome,
            },
        }
    }

    struct NoopExtractor;

    #[async_trait::async_trait]
    impl MediaExtractor for NoopExtractor {
        async fn probe(
            &self,
            _url: &str,
            _options: &ProbeOptions,
        ) -> Result<MediaReport, ExtractorError> {
            Ok(MediaReport::default())
        }
        async fn fetch(
            &self,
            _url: &str,
            _options: &TransferOptions,
        ) -> Result<FetchedArtifact, ExtractorError> {
            Err(ExtractorError::MissingArtifact)
        }
    }

    fn orchestrator(settings: Settings) -> Orchestrator {
        Orchestrator::new(settings, Arc::new(NoopExtractor)).with_interactive(false)
    }

    #[test]
    fn test_output_dir_missing_without_autocreate_is_error() {
        let scratch = tempfile::tempdir().unwrap();
        let missing = scratch.path().join("nope");
        let orch = orchestrator(settings(missing.clone(), false));
        let err = orch.ensure_output_dir().unwrap_err();
        assert!(matches!(err, FetchError::OutputDirMissing { path } if path == missing));
    }

    #[test]
    fn test_output_dir_autocreate_creates() {
        let scratch = tempfile::tempdir().unwrap();
        let target = scratch.path().join("a/b");
        let orch = orchestrator(settings(target.clone(), true));
        orch.ensure_output_dir().unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn test_non_interactive_playlist_defaults_to_first_item() {
        let scratch = tempfile::tempdir().unwrap();
        let orch = orchestrator(settings(scratch.path().to_path_buf(), true));

        let multi = MediaReport {
            multi_entry: true,
            entry_count: Some(12),
            ..MediaReport::default()
        };
        assert_eq!(
            orch.decide_playlist_mode("https://www.youtube.com/watch?v=A&list=B", Some(&multi)),
            PlaylistMode::FirstItemOnly
        );
        assert_eq!(
            orch.decide_playlist_mode("https://www.youtube.com/playlist?list=B", None),
            PlaylistMode::FirstItemOnly
        );
    }

    #[test]
    fn test_single_entry_never_prompts() {
        let scratch = tempfile::tempdir().unwrap();
        // interactive=true would prompt if the fork were taken
        let orch = Orchestrator::new(
            settings(scratch.path().to_path_buf(), true),
            Arc::new(NoopExtractor),
        )
        .with_interactive(true);
        let single = MediaReport::default();
        assert_eq!(
            orch.decide_playlist_mode("https://www.youtube.com/watch?v=A", Some(&single)),
            PlaylistMode::FirstItemOnly
        );
    }

    #[test]
    fn test_render_format_table_sections() {
        let report = MediaReport {
            title: Some("Example".to_string()),
            multi_entry: false,
            entry_count: None,
            formats: vec![
                EncodingDescriptor {
                    id: "251".to_string(),
                    container: "webm".to_string(),
                    audio_codec: Some("opus".to_string()),
                    video_codec: Some("none".to_string()),
                    bitrate: Some(160.0),
                    size: Some(4 * 1024 * 1024),
                    note: Some("medium".to_string()),
                },
                EncodingDescriptor {
                    id: "22".to_string(),
                    container: "mp4".to_string(),
                    audio_codec: Some("mp4a.40.2".to_string()),
                    video_codec: Some("avc1".to_string()),
                    bitrate: None,
                    size: None,
                    note: None,
                },
            ],
        };
        let table = render_format_table(&report);
        assert!(table.contains("Formats for: Example"));
        let audio_at = table.find("Audio-only formats:").unwrap();
        let video_at = table.find("Video formats").unwrap();
        assert!(audio_at < video_at, "audio section prints first");
        assert!(table.contains("251"));
        assert!(table.contains("160k"));
        assert!(table.contains("4.0MB"));
    }
}
