//! Retrieval orchestration: canonicalize, probe, select, transfer, escalate.

mod failure;
mod orchestrator;
mod url;

pub use failure::{
    FailureKind, classify_diagnostic, classify_failure, failure_report, is_format_exhaustion,
};
pub use orchestrator::{FetchError, Orchestrator, render_format_table};
pub use url::{canonicalize, is_playlist_url};
