//! datalad-release: publish DataLad dataset releases to Zenodo.
//!
//! The release runs as a single forward pass: install the dataset with
//! `datalad`, pack it into one compressed archive, create or version the
//! Zenodo deposit that belongs to the source repository, and report the
//! resulting DOI to the CI runner.
//!
//! # Modules
//!
//! - [`config`]: CLI arguments and resolved [`Settings`]
//! - [`dataset`]: installing the dataset into a temporary directory
//! - [`archive`]: tar and zip archive formats
//! - [`metadata`]: Zenodo deposition metadata and its validation
//! - [`zenodo`]: the deposition workflow and the HTTP client
//! - [`report`]: `key=value` outputs for the CI runner
//! - [`error`]: Error types for release operations

pub mod archive;
pub mod config;
pub mod dataset;
pub mod error;
pub mod metadata;
pub mod release;
pub mod report;
pub mod zenodo;

use clap::Parser;
use tracing_subscriber::EnvFilter;

pub use config::{ReleaseArgs, Settings};
pub use error::ReleaseError;
pub use release::{run_release, ReleaseOutcome};

/// Run the datalad-release CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), ReleaseError> {
    let args = ReleaseArgs::parse();
    init_logging(args.verbose);

    let settings = Settings::from_args(args)?;
    let client = zenodo::ZenodoClient::new(&settings);
    tracing::info!(
        repository = %settings.repository,
        zenodo = client.base_url(),
        "starting release"
    );

    let outcome = run_release(&settings, &client)?;
    print!("{}", outcome.outputs);
    Ok(())
}

/// Log to stderr; `RUST_LOG` overrides the level picked by `-v`.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
