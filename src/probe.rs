//! Format catalog probing under a hard wall-clock deadline.
//!
//! Some degraded responses never terminate the metadata query (the remote
//! service falls back to storyboard-only payloads that stream forever), so
//! the probe is raced against a deadline and abandoned outright when it
//! elapses. Abandonment is structured cancellation: the probe future is
//! dropped, which kills the underlying child process.

use std::time::Duration;

use tracing::{debug, warn};

use crate::extractor::{ExtractorError, MediaExtractor, MediaReport, ProbeOptions};

pub use crate::extractor::DEFAULT_PROBE_DEADLINE;

/// Result of one catalog probe.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// The catalog came back and contains at least one real stream.
    Catalog(MediaReport),
    /// The deadline elapsed before the capability answered.
    Timeout,
    /// The capability answered with an error, or the catalog was degenerate.
    Failed(ExtractorError),
}

impl ProbeOutcome {
    /// True when the probe produced a usable catalog.
    #[must_use]
    pub fn is_catalog(&self) -> bool {
        matches!(self, ProbeOutcome::Catalog(_))
    }
}

/// Probes the catalog for `url`, giving the capability at most `deadline`.
///
/// A catalog whose every entry is an image/storyboard placeholder reports
/// [`ExtractorError::NoPlayableFormats`] rather than an empty success, since an
/// empty classification would otherwise be silently treated as "use
/// defaults" downstream.
pub async fn probe_catalog(
    extractor: &dyn MediaExtractor,
    url: &str,
    options: &ProbeOptions,
    deadline: Duration,
) -> ProbeOutcome {
    let probe = extractor.probe(url, options);
    match tokio::time::timeout(deadline, probe).await {
        Err(_elapsed) => {
            warn!(deadline_secs = deadline.as_secs(), "catalog probe hit its deadline");
            ProbeOutcome::Timeout
        }
        Ok(Err(error)) => {
            warn!(%error, "catalog probe failed");
            ProbeOutcome::Failed(error)
        }
        Ok(Ok(report)) => {
            if !report.formats.is_empty() && report.formats.iter().all(|f| f.is_storyboard()) {
                warn!("catalog probe returned storyboard placeholders only");
                return ProbeOutcome::Failed(ExtractorError::NoPlayableFormats);
            }
            debug!(formats = report.formats.len(), "catalog probe succeeded");
            ProbeOutcome::Catalog(report)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::extractor::{
        EncodingDescriptor, FetchedArtifact, MediaExtractor, TransferOptions,
    };
    use async_trait::async_trait;

    /// Stub capability whose probe either blocks forever, errors, or returns
    /// a fixed catalog.
    enum StubProbe {
        Hang,
        Error(String),
        Catalog(MediaReport),
    }

    struct StubExtractor(StubProbe);

    #[async_trait]
    impl MediaExtractor for StubExtractor {
        async fn probe(
            &self,
            _url: &str,
            _options: &ProbeOptions,
        ) -> Result<MediaReport, ExtractorError> {
            match &self.0 {
                StubProbe::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(MediaReport::default())
                }
                StubProbe::Error(message) => Err(ExtractorError::failed("stub", message.clone())),
                StubProbe::Catalog(report) => Ok(report.clone()),
            }
        }

        async fn fetch(
            &self,
            _url: &str,
            _options: &TransferOptions,
        ) -> Result<FetchedArtifact, ExtractorError> {
            Err(ExtractorError::MissingArtifact)
        }
    }

    fn storyboard(id: &str) -> EncodingDescriptor {
        EncodingDescriptor {
            id: id.to_string(),
            container: "mhtml".to_string(),
            audio_codec: None,
            video_codec: Some("none".to_string()),
            bitrate: None,
            size: None,
            note: Some("storyboard".to_string()),
        }
    }

    fn audio(id: &str) -> EncodingDescriptor {
        EncodingDescriptor {
            id: id.to_string(),
            container: "webm".to_string(),
            audio_codec: Some("opus".to_string()),
            video_codec: Some("none".to_string()),
            bitrate: Some(160.0),
            size: None,
            note: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_past_deadline_reports_timeout() {
        let extractor = StubExtractor(StubProbe::Hang);
        let outcome = probe_catalog(
            &extractor,
            "https://example.com/watch?v=x",
            &ProbeOptions::new(None),
            Duration::from_secs(30),
        )
        .await;
        assert!(matches!(outcome, ProbeOutcome::Timeout));
    }

    #[tokio::test]
    async fn test_probe_error_passes_through() {
        let extractor = StubExtractor(StubProbe::Error("boom".to_string()));
        let outcome = probe_catalog(
            &extractor,
            "https://example.com/watch?v=x",
            &ProbeOptions::new(None),
            Duration::from_secs(30),
        )
        .await;
        match outcome {
            ProbeOutcome::Failed(error) => assert!(error.to_string().contains("boom")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_storyboard_only_catalog_is_degenerate() {
        let report = MediaReport {
            formats: vec![storyboard("sb0"), storyboard("sb1")],
            ..MediaReport::default()
        };
        let extractor = StubExtractor(StubProbe::Catalog(report));
        let outcome = probe_catalog(
            &extractor,
            "https://example.com/watch?v=x",
            &ProbeOptions::new(None),
            Duration::from_secs(30),
        )
        .await;
        match outcome {
            ProbeOutcome::Failed(error) => {
                assert!(matches!(error, ExtractorError::NoPlayableFormats));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mixed_catalog_is_usable() {
        let report = MediaReport {
            formats: vec![storyboard("sb0"), audio("251")],
            ..MediaReport::default()
        };
        let extractor = StubExtractor(StubProbe::Catalog(report));
        let outcome = probe_catalog(
            &extractor,
            "https://example.com/watch?v=x",
            &ProbeOptions::new(None),
            Duration::from_secs(30),
        )
        .await;
        assert!(outcome.is_catalog());
    }

    #[tokio::test]
    async fn test_empty_catalog_is_not_degenerate() {
        let extractor = StubExtractor(StubProbe::Catalog(MediaReport::default()));
        let outcome = probe_catalog(
            &extractor,
            "https://example.com/watch?v=x",
            &ProbeOptions::new(None),
            Duration::from_secs(30),
        )
        .await;
        assert!(outcome.is_catalog(), "an empty catalog falls through to defaults");
    }
}
