//! Command-line arguments and the resolved run settings.
//!
//! Every environment variable the action depends on is bound through clap's
//! `env` support, so the process environment is read exactly once while the
//! arguments are parsed. [`Settings::from_args`] then checks the required
//! values and produces the immutable record every stage receives.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use url::Url;

use crate::archive::ArchiveFormat;
use crate::error::ReleaseError;

/// Archive name used when neither `--archive-name` nor `GITHUB_REF_NAME` is set.
pub const DEFAULT_ARCHIVE_NAME: &str = "release";

/// Default git server used to build the clone URL.
pub const DEFAULT_SERVER_URL: &str = "https://github.com";

/// Archive a DataLad dataset and publish it to Zenodo.
#[derive(Clone, Debug, Parser)]
#[command(name = "datalad-release")]
#[command(version, author, about)]
pub struct ReleaseArgs {
    /// File inside the dataset holding the deposition metadata.
    #[arg(long, default_value = ".zenodo.json")]
    pub metadata_filename: PathBuf,

    /// Base name of the uploaded archive (defaults to the git ref name).
    #[arg(long)]
    pub archive_name: Option<String>,

    /// Archive format; every format stores symbolic links as links.
    #[arg(long, value_enum, default_value_t = ArchiveFormat::Gztar)]
    pub archive_format: ArchiveFormat,

    /// Maximum sub-dataset depth to install (unlimited when omitted).
    #[arg(long)]
    pub recursion_limit: Option<u32>,

    /// Publish to the Zenodo sandbox instead of production.
    #[arg(long)]
    pub sandbox: bool,

    /// Zenodo personal access token.
    #[arg(long, env = "ZENODO_API_TOKEN", hide_env_values = true)]
    pub zenodo_api_token: Option<String>,

    /// Source repository identifier in 'owner/name' form.
    #[arg(long, env = "GITHUB_REPOSITORY")]
    pub repository: Option<String>,

    /// Git server hosting the repository.
    #[arg(long, env = "GITHUB_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
    pub server_url: String,

    /// Git ref name used for the default archive name.
    #[arg(long, env = "GITHUB_REF_NAME", hide = true)]
    pub ref_name: Option<String>,

    /// Access token used to clone private datasets.
    #[arg(long, env = "GIT_TOKEN", hide_env_values = true)]
    pub git_token: Option<String>,

    /// Git user name configured on the installed dataset.
    #[arg(long, env = "GIT_USERNAME")]
    pub git_username: Option<String>,

    /// Git user email configured on the installed dataset.
    #[arg(long, env = "GIT_EMAIL")]
    pub git_email: Option<String>,

    /// Existing Zenodo deposition to add a version to, bypassing the lookup.
    #[arg(long, env = "ZENODO_DEPOSITION_ID")]
    pub deposition_id: Option<u64>,

    /// File that receives the `key=value` outputs.
    #[arg(long, env = "GITHUB_OUTPUT")]
    pub output_file: Option<PathBuf>,

    /// DataLad executable.
    #[arg(long, env = "DATALAD_BIN", default_value = "datalad")]
    pub datalad: PathBuf,

    /// Seconds allowed for installing the dataset.
    #[arg(long, default_value_t = 1800)]
    pub fetch_timeout: u64,

    /// Seconds allowed for each Zenodo API call.
    #[arg(long, default_value_t = 120)]
    pub api_timeout: u64,

    /// Seconds allowed for uploading the archive.
    #[arg(long, default_value_t = 3600)]
    pub upload_timeout: u64,

    /// Increase log verbosity (-v, -vv, -vvv). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Name and email written into the installed dataset's git config.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl GitIdentity {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none()
    }
}

/// Fully resolved settings for one release run.
#[derive(Clone, Debug)]
pub struct Settings {
    pub metadata_filename: PathBuf,
    pub archive_name: String,
    pub archive_format: ArchiveFormat,
    pub recursion_limit: Option<u32>,
    pub sandbox: bool,
    pub zenodo_token: String,
    pub repository: String,
    pub server_url: Url,
    pub git_token: Option<String>,
    pub git_identity: GitIdentity,
    pub deposition_id: Option<u64>,
    pub output_file: Option<PathBuf>,
    pub datalad: PathBuf,
    pub fetch_timeout: Duration,
    pub api_timeout: Duration,
    pub upload_timeout: Duration,
}

impl Settings {
    /// Resolve parsed arguments into settings.
    ///
    /// # Errors
    /// Returns a configuration error if the Zenodo token or the repository
    /// identifier is missing, or if a value is malformed.
    pub fn from_args(args: ReleaseArgs) -> Result<Self, ReleaseError> {
        let zenodo_token =
            non_blank(args.zenodo_api_token).ok_or(ReleaseError::MissingSetting {
                name: "Zenodo API token",
                env: "ZENODO_API_TOKEN",
                flag: "zenodo-api-token",
            })?;

        let repository = non_blank(args.repository).ok_or(ReleaseError::MissingSetting {
            name: "repository identifier",
            env: "GITHUB_REPOSITORY",
            flag: "repository",
        })?;
        let repository = validate_repository(&repository)?;

        let server_url = parse_server_url(&args.server_url)?;

        let archive_name = resolve_archive_name(args.archive_name.as_deref(), args.ref_name.as_deref());
        if archive_name.is_empty() || archive_name == "." || archive_name == ".." {
            return Err(ReleaseError::InvalidSetting {
                name: "archive name",
                message: format!("'{archive_name}' is not a usable file name"),
            });
        }

        if !stays_inside(&args.metadata_filename) {
            return Err(ReleaseError::InvalidSetting {
                name: "metadata filename",
                message: format!(
                    "'{}' must be a relative path inside the dataset",
                    args.metadata_filename.display()
                ),
            });
        }

        Ok(Self {
            metadata_filename: args.metadata_filename,
            archive_name,
            archive_format: args.archive_format,
            recursion_limit: args.recursion_limit,
            sandbox: args.sandbox,
            zenodo_token,
            repository,
            server_url,
            git_token: non_blank(args.git_token),
            git_identity: GitIdentity {
                name: non_blank(args.git_username),
                email: non_blank(args.git_email),
            },
            deposition_id: args.deposition_id,
            output_file: args.output_file,
            datalad: args.datalad,
            fetch_timeout: Duration::from_secs(args.fetch_timeout),
            api_timeout: Duration::from_secs(args.api_timeout),
            upload_timeout: Duration::from_secs(args.upload_timeout),
        })
    }

    /// Public URL of the source repository; this is the deposit key.
    pub fn repository_url(&self) -> String {
        format!(
            "{}/{}",
            self.server_url.as_str().trim_end_matches('/'),
            self.repository
        )
    }
}

/// Pick the archive base name and replace path separators with hyphens.
pub fn resolve_archive_name(explicit: Option<&str>, ref_name: Option<&str>) -> String {
    let raw = explicit
        .or(ref_name.filter(|name| !name.trim().is_empty()))
        .unwrap_or(DEFAULT_ARCHIVE_NAME);
    normalize_archive_name(raw)
}

/// Replace path separators so the name cannot escape the archive directory.
pub fn normalize_archive_name(name: &str) -> String {
    name.trim().replace(['/', '\\'], "-")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn stays_inside(path: &Path) -> bool {
    path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn validate_repository(repository: &str) -> Result<String, ReleaseError> {
    let trimmed = repository.trim().trim_end_matches(".git");
    let mut parts = trimmed.split('/');
    let owner = parts.next().unwrap_or_default();
    let name = parts.next().unwrap_or_default();

    if owner.is_empty() || name.is_empty() || parts.next().is_some() {
        return Err(ReleaseError::InvalidSetting {
            name: "repository identifier",
            message: format!("expected 'owner/name', found '{repository}'"),
        });
    }

    Ok(trimmed.to_string())
}

fn parse_server_url(raw: &str) -> Result<Url, ReleaseError> {
    let url = Url::parse(raw).map_err(|source| ReleaseError::InvalidSetting {
        name: "server URL",
        message: format!("'{raw}': {source}"),
    })?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ReleaseError::InvalidSetting {
            name: "server URL",
            message: format!("'{raw}' must be an http(s) URL with a host"),
        });
    }

    Ok(url)
}
