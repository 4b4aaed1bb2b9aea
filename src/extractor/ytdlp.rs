//! Production extractor: the `yt-dlp` binary behind the [`MediaExtractor`] seam.
//!
//! Probes use `--dump-single-json` (metadata only); transfers hand yt-dlp the
//! selector expression and ask it to print the final artifact path. Children
//! are spawned with `kill_on_drop` so a probe abandoned at its deadline
//! cannot leak a process.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{
    EncodingDescriptor, ExtractorError, FetchedArtifact, MediaExtractor, MediaReport,
    PlaylistMode, ProbeOptions, TransferOptions, output_template,
};
use crate::headers::BrowserIdentity;

const DEFAULT_PROGRAM: &str = "yt-dlp";

/// The yt-dlp subprocess adapter.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new()
    }
}

impl YtDlp {
    /// Adapter invoking `yt-dlp` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
        }
    }

    /// Adapter invoking a specific program (tests substitute fakes here).
    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<std::process::Output, ExtractorError> {
        debug!(tool = %self.program, arg_count = args.len(), "spawning extractor");
        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExtractorError::spawn(&self.program, source))
    }

    fn check_status(&self, output: &std::process::Output) -> Result<(), ExtractorError> {
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let diagnostic = if stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr.to_string()
        };
        Err(ExtractorError::failed(&self.program, diagnostic))
    }
}

/// Appends identity and credential arguments shared by probe and transfer.
fn push_session_args(
    args: &mut Vec<String>,
    identity: &BrowserIdentity,
    cookie_file: Option<&Path>,
) {
    args.push("--user-agent".to_string());
    args.push(identity.user_agent.to_string());
    args.push("--add-header".to_string());
    args.push(format!("Accept:{}", identity.accept));
    args.push("--add-header".to_string());
    args.push(format!("Accept-Language:{}", identity.accept_language));
    if let Some(cookie_file) = cookie_file {
        args.push("--cookies".to_string());
        args.push(cookie_file.to_string_lossy().into_owned());
    }
}

#[async_trait]
impl MediaExtractor for YtDlp {
    #[instrument(level = "debug", skip(self, options))]
    async fn probe(
        &self,
        url: &str,
        options: &ProbeOptions,
    ) -> Result<MediaReport, ExtractorError> {
        let mut args = vec![
            "--dump-single-json".to_string(),
            "--no-warnings".to_string(),
            "--no-check-certificates".to_string(),
        ];
        push_session_args(&mut args, &options.identity, options.cookie_file.as_deref());
        args.push(url.to_string());

        let output = self.run(&args).await?;
        self.check_status(&output)?;
        let report = parse_probe_payload(&output.stdout)?;
        debug!(
            formats = report.formats.len(),
            multi_entry = report.multi_entry,
            "probe finished"
        );
        Ok(report)
    }

    #[instrument(level = "debug", skip(self, options))]
    async fn fetch(
        &self,
        url: &str,
        options: &TransferOptions,
    ) -> Result<FetchedArtifact, ExtractorError> {
        let (sleep_min, sleep_max) = options.sleep_interval();
        let mut args = vec![
            "--format".to_string(),
            options.selector.clone(),
            "--output".to_string(),
            output_template(&options.output_dir),
            "--retries".to_string(),
            options.retries().to_string(),
            "--fragment-retries".to_string(),
            options.fragment_retries().to_string(),
            "--sleep-interval".to_string(),
            sleep_min.to_string(),
            "--max-sleep-interval".to_string(),
            sleep_max.to_string(),
            "--abort-on-unavailable-fragments".to_string(),
            "--no-warnings".to_string(),
            "--no-check-certificates".to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            "--no-simulate".to_string(),
        ];
        match options.playlist_mode {
            PlaylistMode::FirstItemOnly => args.push("--no-playlist".to_string()),
            PlaylistMode::EntireCollection => args.push("--yes-playlist".to_string()),
        }
        if options.show_progress {
            args.push("--progress".to_string());
            args.push("--newline".to_string());
        } else {
            args.push("--quiet".to_string());
        }
        push_session_args(&mut args, &options.identity, options.cookie_file.as_deref());
        args.push(url.to_string());

        let output = self.run(&args).await?;
        self.check_status(&output)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = reported_artifact_path(&stdout).ok_or(ExtractorError::MissingArtifact)?;
        debug!(path = %path.display(), "transfer finished");
        Ok(FetchedArtifact { path })
    }
}

/// Picks the artifact path out of the transfer's stdout: the last printed
/// line that names an existing file (progress lines never do).
fn reported_artifact_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .find(|candidate| candidate.is_file())
}

#[derive(Debug, Deserialize)]
struct RawProbe {
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "_type", default)]
    kind: Option<String>,
    #[serde(default)]
    entries: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    #[serde(default)]
    format_id: Option<String>,
    #[serde(default)]
    ext: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    abr: Option<f64>,
    #[serde(default)]
    filesize: Option<u64>,
    #[serde(default)]
    filesize_approx: Option<u64>,
    #[serde(default)]
    format_note: Option<String>,
}

/// Parses the `--dump-single-json` payload into a [`MediaReport`].
fn parse_probe_payload(payload: &[u8]) -> Result<MediaReport, ExtractorError> {
    let raw: RawProbe = serde_json::from_slice(payload)?;
    let multi_entry = raw.kind.as_deref() == Some("playlist") || raw.entries.is_some();
    let entry_count = raw.entries.as_ref().map(Vec::len);
    let formats = raw
        .formats
        .into_iter()
        .filter_map(|f| {
            let id = f.format_id?;
            Some(EncodingDescriptor {
                id,
                container: f.ext.unwrap_or_default(),
                audio_codec: f.acodec,
                video_codec: f.vcodec,
                bitrate: f.abr,
                size: f.filesize.or(f.filesize_approx),
                note: f.format_note,
            })
        })
        .collect();
    Ok(MediaReport {
        title: raw.title,
        multi_entry,
        entry_count,
        formats,
    })
}
