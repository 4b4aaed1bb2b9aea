//! Direct extraction from Firefox's on-disk cookie store.
//!
//! The running browser may hold an exclusive lock on `cookies.sqlite`, so the
//! store is copied to a private temporary location before being opened
//! read-only. Only rows scoped to the target domain are converted.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, Row, SqliteConnection};
use tracing::{debug, warn};

use super::cookies::{CookieRecord, fallback_expiry};

/// Errors from the direct-extraction path. These are absorbed by the
/// credential resolver (logged, then the next source is tried).
#[derive(Debug, thiserror::Error)]
pub enum FirefoxError {
    /// No profile directory matching the default naming pattern was found.
    #[error("no Firefox default profile found under any known location")]
    NoProfile,

    /// The selected profile has no cookie store file.
    #[error("profile {0} has no cookies.sqlite")]
    NoCookieStore(PathBuf),

    /// I/O failure copying or reading the store.
    #[error("cookie store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite-level failure reading the copied store.
    #[error("cookie store query failed: {0}")]
    Store(#[from] sqlx::Error),
}

/// Platform-specific locations that can hold Firefox profiles.
///
/// All candidates are probed at runtime rather than compiled per-OS; paths
/// that do not exist are skipped.
#[must_use]
pub fn default_profile_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(home) = dirs::home_dir() {
        // macOS
        roots.push(home.join("Library/Application Support/Firefox/Profiles"));
        // Linux
        roots.push(home.join(".mozilla/firefox"));
    }
    if let Some(config) = dirs::config_dir() {
        // Windows (%APPDATA%)
        roots.push(config.join("Mozilla/Firefox/Profiles"));
    }
    roots
}

/// Picks the most-recently-modified profile directory whose name matches the
/// `default`/`default-release` naming pattern.
fn newest_default_profile(roots: &[PathBuf]) -> Option<PathBuf> {
    let mut best: Option<(SystemTime, PathBuf)> = None;
    for root in roots {
        let Ok(entries) = std::fs::read_dir(root) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.contains("default") {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(UNIX_EPOCH);
            if best.as_ref().is_none_or(|(t, _)| modified > *t) {
                best = Some((modified, path));
            }
        }
    }
    best.map(|(_, path)| path)
}

/// Extracts cookies scoped to `domain` from the newest default profile under
/// `roots`.
///
/// The returned records carry leading-dot domains and a one-year fallback
/// expiry where the store row has none. An empty result means the profile had
/// no cookies for the domain; the caller decides whether to fall through.
///
/// # Errors
///
/// Returns [`FirefoxError`] when no usable profile/store exists or the store
/// cannot be copied or queried.
pub async fn extract_profile_cookies(
    roots: &[PathBuf],
    domain: &str,
) -> Result<Vec<CookieRecord>, FirefoxError> {
    let profile = newest_default_profile(roots).ok_or(FirefoxError::NoProfile)?;
    let store = profile.join("cookies.sqlite");
    if !store.exists() {
        return Err(FirefoxError::NoCookieStore(profile));
    }
    debug!(profile = %profile.display(), "using Firefox profile");

    // Copy aside: the live browser can hold the store exclusively locked.
    let scratch = tempfile::tempdir()?;
    let copy = scratch.path().join("cookies.sqlite");
    std::fs::copy(&store, &copy)?;

    let records = read_store(&copy, domain, unix_now()).await?;
    debug!(count = records.len(), "extracted Firefox cookies");
    Ok(records)
}

/// Reads domain-scoped rows from a (copied) `cookies.sqlite`.
async fn read_store(
    store: &Path,
    domain: &str,
    now: u64,
) -> Result<Vec<CookieRecord>, FirefoxError> {
    let options = SqliteConnectOptions::new()
        .filename(store)
        .read_only(true);
    let mut conn = SqliteConnection::connect_with(&options).await?;

    let pattern = format!("%{}", domain.trim_start_matches('.'));
    let rows = sqlx::query(
        "SELECT host, path, isSecure, expiry, name, value \
         FROM moz_cookies WHERE host LIKE ?",
    )
    .bind(&pattern)
    .fetch_all(&mut conn)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let host: String = row.try_get("host")?;
        let path: String = row.try_get("path").unwrap_or_default();
        let secure: i64 = row.try_get("isSecure").unwrap_or(0);
        let expiry: i64 = row.try_get("expiry").unwrap_or(0);
        let name: String = row.try_get("name")?;
        let value: String = row.try_get("value")?;

        let expires = if expiry > 0 {
            expiry.unsigned_abs()
        } else {
            fallback_expiry(now)
        };
        records.push(CookieRecord::new(
            &host,
            &path,
            secure != 0,
            expires,
            name,
            value,
        ));
    }

    if let Err(error) = conn.close().await {
        warn!(%error, "failed to close cookie store cleanly");
    }
    Ok(records)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
