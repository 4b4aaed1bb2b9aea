//! Run settings loaded from a JSON settings document.
//!
//! The settings file is resolved once per run and never mutated afterwards.
//! A missing or malformed file is a hard startup error whose message embeds
//! an example document the user can copy.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use tracing::warn;

/// Example settings document shown when loading fails.
pub const EXAMPLE_SETTINGS: &str = r#"{
    "download_directory": "~/Music/audiograb",
    "audio_format": "opus",
    "audio_quality": "best",
    "create_directory_if_missing": true,
    "show_progress": true,
    "cookies": {
        "use_browser_cookies": true,
        "custom_cookies_file": null,
        "preferred_browser": "chrome"
    }
}"#;

/// Errors that can occur while loading the settings document.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings file does not exist.
    #[error(
        "settings file not found at {path}\nCreate one with the following format:\n{EXAMPLE_SETTINGS}"
    )]
    NotFound {
        /// Path that was checked.
        path: PathBuf,
    },

    /// The settings file exists but is not valid JSON (or misses required fields).
    #[error(
        "settings file {path} is not valid: {source}\nExpected format:\n{EXAMPLE_SETTINGS}"
    )]
    Invalid {
        /// Path of the offending file.
        path: PathBuf,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// I/O error reading the settings file.
    #[error("failed to read settings file {path}: {source}")]
    Io {
        /// Path of the file being read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A browser whose cookie store can act as a credential source.
///
/// This set is closed: unknown names in the settings document are normalized
/// to [`Browser::Chrome`] with a warning during load, so downstream code never
/// sees an invalid value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Browser {
    /// Google Chrome.
    #[default]
    Chrome,
    /// Mozilla Firefox.
    Firefox,
    /// Microsoft Edge.
    Edge,
}

impl Browser {
    /// Fixed fall-through order for the generic extraction path.
    pub const ALL: [Browser; 3] = [Browser::Chrome, Browser::Firefox, Browser::Edge];

    /// Human-readable browser name.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Browser::Chrome => "Chrome",
            Browser::Firefox => "Firefox",
            Browser::Edge => "Edge",
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Browser {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chrome" => Ok(Browser::Chrome),
            "firefox" => Ok(Browser::Firefox),
            "edge" => Ok(Browser::Edge),
            _ => Err(()),
        }
    }
}

/// Deserializes a browser name, normalizing unknown values to Chrome.
fn browser_or_chrome<'de, D>(deserializer: D) -> Result<Browser, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.parse().unwrap_or_else(|()| {
        warn!(
            requested = %raw,
            "unrecognized preferred_browser, falling back to Chrome"
        );
        Browser::Chrome
    }))
}

/// How to obtain an authentication credential (cookie jar) for the run.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialPolicy {
    /// Whether browser cookie extraction is allowed at all.
    #[serde(default = "default_true")]
    pub use_browser_cookies: bool,

    /// A user-supplied Netscape cookie file. Takes precedence over browser
    /// extraction and is never deleted by this tool.
    #[serde(default)]
    pub custom_cookies_file: Option<PathBuf>,

    /// Browser to try first on the generic extraction path.
    #[serde(default, deserialize_with = "browser_or_chrome")]
    pub preferred_browser: Browser,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            use_browser_cookies: true,
            custom_cookies_file: None,
            preferred_browser: Browser::Chrome,
        }
    }
}

/// Immutable per-run configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Directory the final artifact is written to (`~` is expanded).
    pub download_directory: PathBuf,

    /// Target audio codec (e.g. `opus`).
    #[serde(default = "default_audio_format")]
    pub audio_format: String,

    /// Target quality: `"best"` or an explicit bitrate such as `"160k"`.
    #[serde(default = "default_audio_quality")]
    pub audio_quality: String,

    /// Create the download directory when it is missing.
    #[serde(default = "default_true")]
    pub create_directory_if_missing: bool,

    /// Show the transfer tool's progress output.
    #[serde(default = "default_true")]
    pub show_progress: bool,

    /// Credential acquisition policy.
    #[serde(default)]
    pub cookies: CredentialPolicy,
}

fn default_true() -> bool {
    true
}

fn default_audio_format() -> String {
    "opus".to_string()
}

fn default_audio_quality() -> String {
    "best".to_string()
}

impl Settings {
    /// Loads settings from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::NotFound`] or [`SettingsError::Invalid`] with
    /// the example document embedded in the message, or [`SettingsError::Io`]
    /// for other read failures. All of these are fatal at startup.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                SettingsError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let mut settings: Settings =
            serde_json::from_str(&text).map_err(|source| SettingsError::Invalid {
                path: path.to_path_buf(),
                source,
            })?;

        settings.download_directory =
            expand_tilde(&settings.download_directory, dirs::home_dir());
        if let Some(custom) = settings.cookies.custom_cookies_file.take() {
            settings.cookies.custom_cookies_file = Some(expand_tilde(&custom, dirs::home_dir()));
        }
        Ok(settings)
    }
}

/// Expands a leading `~` or `~/` in `path` against `home`.
///
/// Paths without a tilde, and tildes with no known home directory, pass
/// through unchanged.
fn expand_tilde(path: &Path, home: Option<PathBuf>) -> PathBuf {
    let Some(home) = home else {
        return path.to_path_buf();
    };
    let Some(text) = path.to_str() else {
        return path.to_path_buf();
    };
    if text == "~" {
        home
    } else if let Some(rest) = text.strip_prefix("~/") {
        home.join(rest)
    } else {
        path.to_path_buf()
    }
}
