//! CLI entry point for the audiograb tool.

use std::sync::Arc;

use anyhow::Result;
use audiograb_core::{Orchestrator, Settings, YtDlp};
use clap::Parser;
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let settings = Settings::load(&args.settings)?;
    debug!(
        output_dir = %settings.download_directory.display(),
        format = %settings.audio_format,
        quality = %settings.audio_quality,
        "settings loaded"
    );

    let orchestrator = Orchestrator::new(settings, Arc::new(YtDlp::new()));

    if args.list_formats {
        orchestrator.list_formats(&args.url).await?;
        return Ok(());
    }

    let artifact = orchestrator.run(&args.url).await?;
    info!(path = %artifact.display(), "run complete");
    println!("Download completed! File saved at: {}", artifact.display());
    Ok(())
}
