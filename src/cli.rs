//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Fetch the best audio stream for a video URL and normalize it to a target
/// codec.
#[derive(Parser, Debug)]
#[command(name = "audiograb")]
#[command(author, version, about)]
pub struct Args {
    /// Resource URL to fetch
    pub url: String,

    /// List the available formats and exit without transferring anything
    #[arg(long)]
    pub list_formats: bool,

    /// Path to the settings document
    #[arg(short, long, default_value = "settings.json")]
    pub settings: PathBuf,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
