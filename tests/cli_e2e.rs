//! End-to-end CLI behavior: argument handling and startup failure modes.
//!
//! These tests never reach the network: settings loading fails (or help
//! short-circuits) before any remote call.

use assert_cmd::Command;
use predicates::prelude::*;

const URL: &str = "https://www.youtube.com/watch?v=ABC";

fn audiograb() -> Command {
    Command::cargo_bin("audiograb").expect("binary builds")
}

#[test]
fn missing_settings_file_exits_nonzero_with_example() {
    audiograb()
        .args(["--settings", "/nonexistent/settings.json", URL])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("settings file not found"))
        .stderr(predicate::str::contains("download_directory"));
}

#[test]
fn invalid_settings_json_exits_nonzero_with_example() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    use std::io::Write as _;
    write!(file, "{{ not json").unwrap();
    let settings_path = file.path().to_string_lossy().into_owned();

    audiograb()
        .args(["--settings", settings_path.as_str(), URL])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("is not valid"))
        .stderr(predicate::str::contains("Expected format"));
}

#[test]
fn no_arguments_is_a_usage_error() {
    audiograb()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_mentions_listing_mode() {
    audiograb()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--list-formats"))
        .stdout(predicate::str::contains("--settings"));
}

#[test]
fn version_prints_and_exits_zero() {
    audiograb()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("audiograb"));
}
