//! Format scoring and selection.
//!
//! An exact format identifier is the highest-fidelity choice when the probe
//! produced a catalog (no re-negotiation risk at transfer time), but a
//! generic fallback expression always exists as a safety net, since the remote
//! catalog is not guaranteed stable between calls.

use tracing::debug;

use crate::extractor::EncodingDescriptor;

/// Broadened expression used by the escalated attempt.
pub const BROADENED_EXPRESSION: &str = "bestaudio/best";

/// What the transfer capability should be told to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatSelection {
    /// A concrete identifier from the probed catalog.
    Exact(String),
    /// An ordered fallback predicate chain.
    Fallback(String),
}

impl FormatSelection {
    /// The selector expression to hand to the transfer capability.
    #[must_use]
    pub fn expression(&self) -> &str {
        match self {
            FormatSelection::Exact(expr) | FormatSelection::Fallback(expr) => expr.as_str(),
        }
    }

    /// True when this is a concrete catalog identifier.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        matches!(self, FormatSelection::Exact(_))
    }
}

/// A container extension historically known to co-locate the target codec,
/// making the remux cheap.
#[must_use]
pub fn cheap_container_for(codec: &str) -> Option<&'static str> {
    match codec.to_ascii_lowercase().as_str() {
        "opus" | "vorbis" => Some("webm"),
        "aac" | "mp4a" | "m4a" => Some("m4a"),
        _ => None,
    }
}

/// The generic fallback chain: exact-codec-preferred, then cheap-container,
/// then extension, then unconditional best.
#[must_use]
pub fn generic_fallback(codec: &str) -> String {
    let codec = codec.to_ascii_lowercase();
    match cheap_container_for(&codec) {
        Some(container) if container != codec => format!(
            "bestaudio[acodec={codec}]/bestaudio[ext={container}]/bestaudio[ext={codec}]/bestaudio/best"
        ),
        _ => format!("bestaudio[acodec={codec}]/bestaudio[ext={codec}]/bestaudio/best"),
    }
}

/// Picks the transfer target from a probed catalog.
///
/// Tiers, each restricted to audio-only descriptors and ranked by bitrate:
/// exact target-codec match, then cheaply-convertible container, then any
/// audio-only stream. A catalog with no audio-only descriptor yields the
/// generic fallback chain.
#[must_use]
pub fn choose_format(formats: &[EncodingDescriptor], target_codec: &str) -> FormatSelection {
    let target = target_codec.to_ascii_lowercase();
    let audio_only: Vec<&EncodingDescriptor> =
        formats.iter().filter(|f| f.is_audio_only()).collect();

    let exact = best_by_bitrate(audio_only.iter().copied().filter(|f| {
        f.audio_codec
            .as_deref()
            .is_some_and(|codec| codec.eq_ignore_ascii_case(&target))
    }));
    if let Some(hit) = exact {
        debug!(id = %hit.id, bitrate = ?hit.bitrate, "exact codec match");
        return FormatSelection::Exact(hit.id.clone());
    }

    if let Some(container) = cheap_container_for(&target) {
        let convertible = best_by_bitrate(
            audio_only
                .iter()
                .copied()
                .filter(|f| f.container.eq_ignore_ascii_case(container)),
        );
        if let Some(hit) = convertible {
            debug!(id = %hit.id, container = %hit.container, "cheap-container match");
            return FormatSelection::Exact(hit.id.clone());
        }
    }

    if let Some(hit) = best_by_bitrate(audio_only.into_iter()) {
        debug!(id = %hit.id, codec = ?hit.audio_codec, "best audio-only stream");
        return FormatSelection::Exact(hit.id.clone());
    }

    debug!("no audio-only stream advertised, using fallback chain");
    FormatSelection::Fallback(generic_fallback(&target))
}

fn best_by_bitrate<'a>(
    candidates: impl Iterator<Item = &'a EncodingDescriptor>,
) -> Option<&'a EncodingDescriptor> {
    candidates.max_by(|a, b| {
        let a = a.bitrate.unwrap_or(0.0);
        let b = b.bitrate.unwrap_or(0.0);
        a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn audio(id: &str, container: &str, codec: &str, bitrate: f64) -> EncodingDescriptor {
        EncodingDescriptor {
            id: id.to_string(),
            container: container.to_string(),
            audio_codec: Some(codec.to_string()),
            video_codec: Some("none".to_string()),
            bitrate: Some(bitrate),
            size: None,
            note: None,
        }
    }

    fn video(id: &str) -> EncodingDescriptor {
        EncodingDescriptor {
            id: id.to_string(),
            container: "mp4".to_string(),
            audio_codec: Some("mp4a.40.2".to_string()),
            video_codec: Some("avc1.42001E".to_string()),
            bitrate: None,
            size: None,
            note: None,
        }
    }

    // ==================== Tier selection ====================

    #[test]
    fn test_exact_codec_match_prefers_highest_bitrate() {
        let formats = vec![
            audio("140", "m4a", "aac", 128.0),
            audio("250", "webm", "opus", 96.0),
            audio("251", "webm", "opus", 160.0),
        ];
        let selection = choose_format(&formats, "opus");
        assert_eq!(selection, FormatSelection::Exact("251".to_string()));
    }

    #[test]
    fn test_cheap_container_when_no_exact_codec() {
        let formats = vec![
            audio("140", "m4a", "aac", 128.0),
            audio("600", "webm", "vorbis", 64.0),
        ];
        // No opus stream; the webm one is the cheap-container candidate.
        let selection = choose_format(&formats, "opus");
        assert_eq!(selection, FormatSelection::Exact("600".to_string()));
    }

    #[test]
    fn test_any_audio_only_as_third_tier() {
        let formats = vec![video("18"), audio("140", "m4a", "aac", 128.0)];
        let selection = choose_format(&formats, "opus");
        assert_eq!(selection, FormatSelection::Exact("140".to_string()));
    }

    #[test]
    fn test_no_audio_only_yields_fallback_chain() {
        let formats = vec![video("18"), video("22")];
        let selection = choose_format(&formats, "opus");
        match &selection {
            FormatSelection::Fallback(expr) => {
                assert_eq!(
                    expr,
                    "bestaudio[acodec=opus]/bestaudio[ext=webm]/bestaudio[ext=opus]/bestaudio/best"
                );
            }
            other => panic!("expected fallback, got {other:?}"),
        }
        assert!(!selection.is_exact());
    }

    #[test]
    fn test_empty_catalog_yields_fallback_chain() {
        let selection = choose_format(&[], "opus");
        assert!(matches!(selection, FormatSelection::Fallback(_)));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let formats = vec![
            audio("140", "m4a", "aac", 128.0),
            audio("250", "webm", "opus", 96.0),
            audio("251", "webm", "opus", 160.0),
        ];
        let first = choose_format(&formats, "opus");
        for _ in 0..10 {
            assert_eq!(choose_format(&formats, "opus"), first);
        }
    }

    #[test]
    fn test_codec_comparison_is_case_insensitive() {
        let formats = vec![audio("251", "webm", "Opus", 160.0)];
        assert_eq!(
            choose_format(&formats, "opus"),
            FormatSelection::Exact("251".to_string())
        );
    }

    // ==================== Expressions ====================

    #[test]
    fn test_generic_fallback_without_cheap_container() {
        assert_eq!(
            generic_fallback("flac"),
            "bestaudio[acodec=flac]/bestaudio[ext=flac]/bestaudio/best"
        );
    }

    #[test]
    fn test_broadened_expression_is_unconditional() {
        assert_eq!(BROADENED_EXPRESSION, "bestaudio/best");
    }

    #[test]
    fn test_expression_accessor() {
        assert_eq!(FormatSelection::Exact("251".into()).expression(), "251");
        let fallback = FormatSelection::Fallback(generic_fallback("opus"));
        assert!(fallback.expression().starts_with("bestaudio[acodec=opus]"));
    }
}
