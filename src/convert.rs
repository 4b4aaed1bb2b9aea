//! Post-processing: decide whether a transcode is needed and apply it.
//!
//! A retrieved artifact that already carries the target codec is renamed, not
//! re-encoded; a lossy re-encode of conforming audio would only degrade it.
//! Everything else goes through the external transcoder with an enforced
//! bitrate floor. The original file is deleted only after the replacement is
//! verified to exist.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

/// Minimum viable encoder bitrate in kbps; the target codec's practical
/// quality collapses below this.
pub const MIN_BITRATE_KBPS: u32 = 128;

/// Bitrate used for the symbolic `"best"` quality.
pub const BEST_BITRATE: &str = "192k";

/// Broadcast-standard sample rate handed to the transcoder.
const SAMPLE_RATE: &str = "48000";

/// External tool pair used for inspection and transcoding.
#[derive(Debug, Clone)]
pub struct Transcoder {
    /// Transcoder program (ffmpeg).
    pub ffmpeg: String,
    /// Stream prober program (ffprobe).
    pub ffprobe: String,
}

impl Default for Transcoder {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

/// Errors from the post-processing step. All of them are fatal for the
/// attempt; partial output has already been discarded when they surface.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// The external tool could not be launched.
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        /// Program that failed to start.
        tool: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The transcoder exited unsuccessfully.
    #[error("audio conversion failed: {stderr}")]
    Transcode {
        /// Captured diagnostic output.
        stderr: String,
    },

    /// The transcoder reported success but produced no file.
    #[error("converted file missing at {path}")]
    MissingOutput {
        /// Expected output path.
        path: PathBuf,
    },

    /// Filesystem error while renaming or cleaning up.
    #[error("file system error on {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Produces the final, target-codec artifact for `artifact`.
///
/// Decision ladder: an artifact already carrying the target extension is
/// final as-is; an artifact whose audio stream probes as the target codec is
/// renamed in place; everything else is transcoded.
///
/// # Errors
///
/// Returns [`ConvertError`] when the transcode fails or the filesystem does.
pub async fn finalize(
    artifact: &Path,
    target_codec: &str,
    quality: &str,
    transcoder: &Transcoder,
) -> Result<PathBuf, ConvertError> {
    let target_ext = extension_for(target_codec);
    if artifact
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(&target_ext))
    {
        debug!(path = %artifact.display(), "artifact already in target container");
        return Ok(artifact.to_path_buf());
    }

    let destination = artifact.with_extension(&target_ext);

    if let Some(codec) = inspect_audio_codec(transcoder, artifact).await {
        if codec.eq_ignore_ascii_case(target_codec) {
            info!(
                from = %artifact.display(),
                to = %destination.display(),
                "audio already conforms, renaming instead of re-encoding"
            );
            std::fs::rename(artifact, &destination).map_err(|source| ConvertError::Io {
                path: destination.clone(),
                source,
            })?;
            return Ok(destination);
        }
        debug!(%codec, "audio codec differs from target, transcoding");
    }

    let (bitrate, warning) = resolve_bitrate(quality);
    if let Some(warning) = warning {
        warn!(%warning, "adjusted audio quality");
    }

    transcode(transcoder, artifact, &destination, target_codec, &bitrate).await?;

    // Never delete-before-verify.
    if !destination.is_file() {
        return Err(ConvertError::MissingOutput { path: destination });
    }
    if let Err(error) = std::fs::remove_file(artifact) {
        warn!(path = %artifact.display(), %error, "could not remove pre-conversion artifact");
    }
    info!(path = %destination.display(), "conversion complete");
    Ok(destination)
}

/// Container extension used for a target codec.
#[must_use]
pub fn extension_for(codec: &str) -> String {
    match codec.to_ascii_lowercase().as_str() {
        "aac" | "mp4a" => "m4a".to_string(),
        "vorbis" => "ogg".to_string(),
        other => other.to_string(),
    }
}

/// Applies the bitrate-floor rule to a configured quality string.
///
/// Returns the effective bitrate plus a warning message when the input was
/// clamped or unrecognized.
#[must_use]
pub fn resolve_bitrate(quality: &str) -> (String, Option<String>) {
    let trimmed = quality.trim();
    if trimmed.eq_ignore_ascii_case("best") {
        return (BEST_BITRATE.to_string(), None);
    }
    let digits = trimmed
        .strip_suffix('k')
        .or_else(|| trimmed.strip_suffix('K'))
        .unwrap_or(trimmed);
    match digits.parse::<u32>() {
        Ok(kbps) if kbps < MIN_BITRATE_KBPS => (
            format!("{MIN_BITRATE_KBPS}k"),
            Some(format!(
                "audio_quality {trimmed} is below the usable floor, using {MIN_BITRATE_KBPS}k"
            )),
        ),
        Ok(kbps) => (format!("{kbps}k"), None),
        Err(_) => (
            format!("{MIN_BITRATE_KBPS}k"),
            Some(format!(
                "unrecognized audio_quality '{trimmed}', using {MIN_BITRATE_KBPS}k"
            )),
        ),
    }
}

/// Asks the stream prober for the codec of the first audio stream.
///
/// A non-zero exit, unlaunchable tool, or empty answer is "inspection
/// inconclusive" (`None`), never fatal.
async fn inspect_audio_codec(transcoder: &Transcoder, path: &Path) -> Option<String> {
    let output = Command::new(&transcoder.ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "a:0",
            "-show_entries",
            "stream=codec_name",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            let codec = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if codec.is_empty() {
                None
            } else {
                debug!(%codec, path = %path.display(), "probed audio codec");
                Some(codec)
            }
        }
        Ok(_) => {
            debug!(path = %path.display(), "codec inspection inconclusive");
            None
        }
        Err(error) => {
            warn!(tool = %transcoder.ffprobe, %error, "could not launch stream prober");
            None
        }
    }
}

/// Encoder name for a target codec.
fn encoder_for(codec: &str) -> &str {
    match codec.to_ascii_lowercase().as_str() {
        "opus" => "libopus",
        "mp3" => "libmp3lame",
        "vorbis" => "libvorbis",
        _ => codec,
    }
}

/// Builds the fixed transcoder argument contract.
fn build_transcode_args(input: &Path, output: &Path, codec: &str, bitrate: &str) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-vn".to_string(),
        "-c:a".to_string(),
        encoder_for(codec).to_string(),
        "-b:a".to_string(),
        bitrate.to_string(),
        "-ar".to_string(),
        SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        "2".to_string(),
    ];
    if codec.eq_ignore_ascii_case("opus") {
        // libopus-specific tuning: VBR, maximum compression effort, audio profile.
        args.extend(
            ["-vbr", "on", "-compression_level", "10", "-application", "audio"]
                .map(str::to_string),
        );
    }
    args.extend(["-v".to_string(), "warning".to_string(), "-y".to_string()]);
    args.push(output.to_string_lossy().into_owned());
    args
}

async fn transcode(
    transcoder: &Transcoder,
    input: &Path,
    output: &Path,
    codec: &str,
    bitrate: &str,
) -> Result<(), ConvertError> {
    let args = build_transcode_args(input, output, codec, bitrate);
    info!(
        input = %input.display(),
        output = %output.display(),
        %bitrate,
        "transcoding"
    );

    let result = Command::new(&transcoder.ffmpeg)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ConvertError::Spawn {
            tool: transcoder.ffmpeg.clone(),
            source,
        })?;

    if !result.status.success() {
        // Discard partial output before surfacing the failure.
        if output.exists() {
            if let Err(error) = std::fs::remove_file(output) {
                warn!(path = %output.display(), %error, "could not remove partial output");
            }
        }
        return Err(ConvertError::Transcode {
            stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Bitrate floor ====================

    #[test]
    fn test_resolve_bitrate_best_is_fixed_high() {
        assert_eq!(resolve_bitrate("best"), (BEST_BITRATE.to_string(), None));
    }

    #[test]
    fn test_resolve_bitrate_below_floor_clamps_with_warning() {
        let (bitrate, warning) = resolve_bitrate("64k");
        assert_eq!(bitrate, "128k");
        assert!(warning.is_some());
    }

    #[test]
    fn test_resolve_bitrate_bare_number_gets_suffix() {
        assert_eq!(resolve_bitrate("192"), ("192k".to_string(), None));
    }

    #[test]
    fn test_resolve_bitrate_at_floor_passes() {
        assert_eq!(resolve_bitrate("128k"), ("128k".to_string(), None));
    }

    #[test]
    fn test_resolve_bitrate_unrecognized_falls_back_with_warning() {
        let (bitrate, warning) = resolve_bitrate("extreme");
        assert_eq!(bitrate, "128k");
        assert!(warning.is_some());
    }

    // ==================== Argument contract ====================

    #[test]
    fn test_transcode_args_fixed_contract() {
        let args = build_transcode_args(
            Path::new("in.webm"),
            Path::new("out.opus"),
            "opus",
            "192k",
        );
        let joined = args.join(" ");
        assert!(joined.contains("-c:a libopus"));
        assert!(joined.contains("-b:a 192k"));
        assert!(joined.contains("-ar 48000"));
        assert!(joined.contains("-ac 2"));
        assert!(joined.contains("-vbr on"));
        assert!(joined.contains("-compression_level 10"));
        assert!(joined.contains("-application audio"));
        assert!(joined.ends_with("-y out.opus"));
    }

    #[test]
    fn test_transcode_args_opus_tuning_only_for_opus() {
        let args = build_transcode_args(Path::new("in.webm"), Path::new("out.mp3"), "mp3", "192k");
        let joined = args.join(" ");
        assert!(joined.contains("-c:a libmp3lame"));
        assert!(!joined.contains("-application"));
    }

    #[test]
    fn test_extension_mapping() {
        assert_eq!(extension_for("opus"), "opus");
        assert_eq!(extension_for("aac"), "m4a");
        assert_eq!(extension_for("vorbis"), "ogg");
        assert_eq!(extension_for("mp3"), "mp3");
    }

    // ==================== Finalize behavior (fake tools) ====================

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_finalize_target_extension_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("track.opus");
        std::fs::write(&artifact, b"audio").unwrap();

        // No tool is ever invoked; an unlaunchable pair proves it.
        let transcoder = Transcoder {
            ffmpeg: "/nonexistent/ffmpeg".to_string(),
            ffprobe: "/nonexistent/ffprobe".to_string(),
        };
        let final_path = finalize(&artifact, "opus", "best", &transcoder).await.unwrap();
        assert_eq!(final_path, artifact);
        assert!(artifact.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_finalize_renames_when_codec_already_conforms() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("track.webm");
        std::fs::write(&artifact, b"audio").unwrap();

        let transcoder = Transcoder {
            ffmpeg: write_script(dir.path(), "ffmpeg", "#!/bin/sh\nexit 1\n"),
            ffprobe: write_script(dir.path(), "ffprobe", "#!/bin/sh\necho opus\n"),
        };
        let final_path = finalize(&artifact, "opus", "best", &transcoder).await.unwrap();
        assert_eq!(final_path, dir.path().join("track.opus"));
        assert!(final_path.exists());
        assert!(!artifact.exists(), "renamed, not copied");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_finalize_transcode_success_replaces_original() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("track.m4a");
        std::fs::write(&artifact, b"audio").unwrap();

        // Fake transcoder writes its last argument (the output path).
        let ffmpeg = write_script(
            dir.path(),
            "ffmpeg",
            "#!/bin/sh\nfor a in \"$@\"; do last=$a; done\necho converted > \"$last\"\nexit 0\n",
        );
        let ffprobe = write_script(dir.path(), "ffprobe", "#!/bin/sh\necho aac\n");
        let transcoder = Transcoder { ffmpeg, ffprobe };

        let final_path = finalize(&artifact, "opus", "160k", &transcoder).await.unwrap();
        assert_eq!(final_path, dir.path().join("track.opus"));
        assert!(final_path.exists());
        assert!(!artifact.exists(), "original removed after verification");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_finalize_transcode_failure_keeps_original_discards_partial() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("track.m4a");
        std::fs::write(&artifact, b"audio").unwrap();

        // Fake transcoder leaves a partial file behind and fails.
        let ffmpeg = write_script(
            dir.path(),
            "ffmpeg",
            "#!/bin/sh\nfor a in \"$@\"; do last=$a; done\necho partial > \"$last\"\nexit 1\n",
        );
        let ffprobe = write_script(dir.path(), "ffprobe", "#!/bin/sh\necho aac\n");
        let transcoder = Transcoder { ffmpeg, ffprobe };

        let err = finalize(&artifact, "opus", "best", &transcoder).await.unwrap_err();
        assert!(matches!(err, ConvertError::Transcode { .. }));
        assert!(artifact.exists(), "original must survive a failed conversion");
        assert!(
            !dir.path().join("track.opus").exists(),
            "partial output must be discarded"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_finalize_inconclusive_inspection_transcodes() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("track.webm");
        std::fs::write(&artifact, b"audio").unwrap();

        let ffmpeg = write_script(
            dir.path(),
            "ffmpeg",
            "#!/bin/sh\nfor a in \"$@\"; do last=$a; done\necho converted > \"$last\"\nexit 0\n",
        );
        // Prober exits non-zero: inconclusive, not fatal.
        let ffprobe = write_script(dir.path(), "ffprobe", "#!/bin/sh\nexit 1\n");
        let transcoder = Transcoder { ffmpeg, ffprobe };

        let final_path = finalize(&artifact, "opus", "best", &transcoder).await.unwrap();
        assert!(final_path.exists());
    }
}
