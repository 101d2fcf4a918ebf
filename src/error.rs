use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for datalad-release operations.
///
/// Every variant is fatal: the run stops at the first error and nothing is
/// retried or rolled back.
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing required setting {name}: set {env} or pass --{flag}")]
    MissingSetting {
        name: &'static str,
        env: &'static str,
        flag: &'static str,
    },

    #[error("Invalid setting {name}: {message}")]
    InvalidSetting { name: &'static str, message: String },

    #[error("Failed to install dataset from {source_url}: {message}")]
    DatasetInstall { source_url: String, message: String },

    #[error("Dataset installation from {source_url} timed out after {}s", .timeout.as_secs())]
    DatasetInstallTimeout {
        source_url: String,
        timeout: Duration,
    },

    #[error("Failed to create archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read metadata file {path}: {source}")]
    MetadataRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse metadata file {path}: {source}")]
    MetadataParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Metadata file {path} is invalid: {}", .problems.join("; "))]
    MetadataInvalid { path: PathBuf, problems: Vec<String> },

    #[error("Zenodo rejected {operation} (HTTP {status}): {message}")]
    ZenodoStatus {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("Zenodo request {operation} failed: {message}")]
    ZenodoTransport { operation: String, message: String },

    #[error("Unexpected Zenodo response to {operation}: {message}")]
    ZenodoResponse { operation: String, message: String },

    #[error("Failed to write outputs to {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
