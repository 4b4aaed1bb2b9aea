//! Netscape cookie-file model: parser and writer.
//!
//! The transfer capability consumes cookies as a Netscape HTTP Cookie File
//! (7 TAB-separated fields per line). This module parses user-supplied files
//! for validation and writes files materialized from browser stores.

use std::fmt;
use std::io::{BufRead, Write};

use tracing::{debug, warn};

/// Seconds in one year; fallback lifetime for cookies with no expiry.
const SECONDS_PER_YEAR: u64 = 31_536_000;

/// A single cookie destined for (or read from) a Netscape-format file.
///
/// The value field is redacted in Debug output so session tokens cannot leak
/// into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct CookieRecord {
    /// Cookie domain in leading-dot form (e.g. `.example.com`).
    pub domain: String,
    /// URL path scope.
    pub path: String,
    /// Whether the cookie is HTTPS-only.
    pub secure: bool,
    /// Unix timestamp for expiry.
    pub expires: u64,
    /// Cookie name.
    pub name: String,
    /// Cookie value (sensitive, never log).
    value: String,
}

impl CookieRecord {
    /// Creates a record, normalizing the domain to leading-dot form and an
    /// empty path to `/`.
    #[must_use]
    pub fn new(
        domain: &str,
        path: &str,
        secure: bool,
        expires: u64,
        name: String,
        value: String,
    ) -> Self {
        Self {
            domain: normalize_domain(domain),
            path: if path.is_empty() {
                "/".to_string()
            } else {
                path.to_string()
            },
            secure,
            expires,
            name,
            value,
        }
    }

    /// Returns the cookie value. Avoid logging the result.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for CookieRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieRecord")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Normalizes a cookie domain to leading-dot form.
#[must_use]
pub fn normalize_domain(domain: &str) -> String {
    if domain.starts_with('.') {
        domain.to_string()
    } else {
        format!(".{domain}")
    }
}

/// Expiry to substitute when a store row carries none: one year from `now`.
#[must_use]
pub fn fallback_expiry(now: u64) -> u64 {
    now + SECONDS_PER_YEAR
}

/// Errors from reading or writing a cookie file.
#[derive(Debug, thiserror::Error)]
pub enum CookieFileError {
    /// I/O failure on the cookie file.
    #[error("cookie file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A non-empty file produced zero valid cookies.
    #[error("no valid cookies found ({malformed_count} lines failed to parse)")]
    NoCookiesFound {
        /// Number of malformed data lines.
        malformed_count: usize,
    },
}

/// Result of parsing a cookie file: valid records plus per-line warnings.
#[derive(Debug)]
pub struct CookieParse {
    /// Successfully parsed cookies.
    pub records: Vec<CookieRecord>,
    /// Warnings for malformed lines (line number, reason).
    pub warnings: Vec<(usize, String)>,
}

/// Parses a Netscape-format cookie file.
///
/// Blank lines and `#` comments (including the standard header) are skipped.
/// Malformed data lines are collected as warnings; the parse only fails when
/// a non-empty file yields no cookies at all.
///
/// # Errors
///
/// Returns [`CookieFileError::Io`] on read failure or
/// [`CookieFileError::NoCookiesFound`] when every data line is malformed.
pub fn parse_cookie_file(reader: impl BufRead) -> Result<CookieParse, CookieFileError> {
    let mut records = Vec::new();
    let mut warnings = Vec::new();
    let mut data_lines = 0;

    for (idx, line_result) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line_result?;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        data_lines += 1;

        match parse_line(line) {
            Ok(record) => {
                debug!(line = line_number, domain = %record.domain, name = %record.name, "parsed cookie");
                records.push(record);
            }
            Err(reason) => {
                warn!(line = line_number, reason = %reason, "skipping malformed cookie line");
                warnings.push((line_number, reason));
            }
        }
    }

    if records.is_empty() && data_lines > 0 {
        return Err(CookieFileError::NoCookiesFound {
            malformed_count: warnings.len(),
        });
    }

    Ok(CookieParse { records, warnings })
}

/// Parses one 7-field data line. Returns a reason string on failure (the
/// cookie value never appears in the reason).
fn parse_line(line: &str) -> Result<CookieRecord, String> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 7 {
        return Err(format!(
            "expected 7 TAB-separated fields, found {}",
            fields.len()
        ));
    }

    let domain = fields[0];
    if domain.is_empty() {
        return Err("domain field is empty".to_string());
    }
    parse_flag(fields[1], "tailmatch")?;
    let secure = parse_flag(fields[3], "secure")?;
    let expires = fields[4].parse::<u64>().map_err(|_| {
        format!(
            "expires field must be a non-negative integer, got '{}'",
            fields[4]
        )
    })?;
    let name = fields[5];
    if name.is_empty() {
        return Err("cookie name field is empty".to_string());
    }

    Ok(CookieRecord::new(
        domain,
        fields[2],
        secure,
        expires,
        name.to_string(),
        fields[6].to_string(),
    ))
}

fn parse_flag(value: &str, field: &str) -> Result<bool, String> {
    match value {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        _ => Err(format!("{field} field must be TRUE or FALSE, got '{value}'")),
    }
}

/// Writes records to `writer` in Netscape format, header included.
///
/// # Errors
///
/// Returns [`CookieFileError::Io`] on write failure.
pub fn write_cookie_file(
    mut writer: impl Write,
    records: &[CookieRecord],
) -> Result<(), CookieFileError> {
    writer.write_all(
        b"# Netscape HTTP Cookie File\n\
          # https://curl.haxx.se/rfc/cookie_spec.html\n\
          # This is a generated file!  Do not edit.\n\n",
    )?;
    for record in records {
        let secure = if record.secure { "TRUE" } else { "FALSE" };
        writeln!(
            writer,
            "{}\tTRUE\t{}\t{}\t{}\t{}\t{}",
            record.domain,
            record.path,
            secure,
            record.expires,
            record.name,
            record.value()
        )?;
    }
    writer.flush()?;
    Ok(())
}
