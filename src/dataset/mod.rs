//! Installing the dataset that is about to be released.
//!
//! The dataset is cloned with the `datalad` executable into a fresh
//! temporary directory. The directory belongs to the returned
//! [`DatasetHandle`] and is removed when the handle is dropped.
//!
//! The clone ends up inside the published archive, `.git/config` included,
//! so credentials never go into the clone URL. A git token reaches git
//! through a credential helper set in the child's environment
//! (`GIT_CONFIG_COUNT`), which git does not persist.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use url::Url;

use crate::config::{GitIdentity, Settings};
use crate::error::ReleaseError;

const GIT: &str = "git";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Environment variable the credential helper reads the token from.
pub const TOKEN_ENV: &str = "GIT_TOKEN";

/// Answers `get` requests with the token from [`TOKEN_ENV`].
const CREDENTIAL_HELPER: &str =
    "!f() { test \"$1\" = get || return 0; echo username=x-access-token; echo \"password=$GIT_TOKEN\"; }; f";

/// An installed dataset tree.
#[derive(Debug)]
pub struct DatasetHandle {
    root: PathBuf,
    source_url: String,
    head: Option<String>,
    _dir: TempDir,
}

impl DatasetHandle {
    /// Root of the installed dataset.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// URL the dataset was installed from.
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Commit checked out at the dataset root, when git could report it.
    pub fn head(&self) -> Option<&str> {
        self.head.as_deref()
    }
}

/// Clone URL for the configured repository.
///
/// User-info in the server URL is dropped; credentials are passed with
/// [`credential_env`] instead.
pub fn clone_url(settings: &Settings) -> Result<Url, ReleaseError> {
    let base = settings.server_url.as_str().trim_end_matches('/');
    let mut url = Url::parse(&format!("{}/{}.git", base, settings.repository)).map_err(
        |source| ReleaseError::InvalidSetting {
            name: "repository identifier",
            message: source.to_string(),
        },
    )?;

    if !url.username().is_empty() || url.password().is_some() {
        tracing::warn!("ignoring credentials in the server URL, use GIT_TOKEN instead");
        let _ = url.set_username("");
        let _ = url.set_password(None);
    }

    Ok(url)
}

/// Environment that hands `token` to every git process started by the install.
pub fn credential_env(token: &str) -> [(&'static str, String); 4] {
    [
        (TOKEN_ENV, token.to_string()),
        ("GIT_CONFIG_COUNT", "1".to_string()),
        ("GIT_CONFIG_KEY_0", "credential.helper".to_string()),
        ("GIT_CONFIG_VALUE_0", CREDENTIAL_HELPER.to_string()),
    ]
}

/// Arguments passed to `datalad` for a recursive install.
pub fn install_args(source: &str, target: &Path, recursion_limit: Option<u32>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "install".into(),
        "--source".into(),
        source.into(),
        "--recursive".into(),
    ];
    if let Some(limit) = recursion_limit {
        args.push("--recursion-limit".into());
        args.push(limit.to_string().into());
    }
    args.push(target.as_os_str().to_owned());
    args
}

/// Install the configured dataset into a fresh temporary directory.
///
/// # Errors
/// Returns a fetch error if `datalad` cannot be started, exits unsuccessfully,
/// or exceeds the fetch timeout, or if the git identity cannot be written.
pub fn install_dataset(settings: &Settings) -> Result<DatasetHandle, ReleaseError> {
    let url = clone_url(settings)?;
    let shown = url.to_string();

    let dir = tempfile::Builder::new()
        .prefix("datalad-release-dataset-")
        .tempdir()?;
    let name = settings
        .repository
        .rsplit('/')
        .next()
        .unwrap_or("dataset");
    let root = dir.path().join(name);

    tracing::info!(
        source = %shown,
        target = %root.display(),
        recursion_limit = ?settings.recursion_limit,
        authenticated = settings.git_token.is_some(),
        "installing dataset"
    );

    let mut command = install_command(settings, &url, &root);
    let status = run_with_deadline(&mut command, settings.fetch_timeout).map_err(|err| match err {
        Wait::Timeout => ReleaseError::DatasetInstallTimeout {
            source_url: shown.clone(),
            timeout: settings.fetch_timeout,
        },
        Wait::Io(source) => ReleaseError::DatasetInstall {
            source_url: shown.clone(),
            message: format!("could not run {}: {}", settings.datalad.display(), source),
        },
    })?;

    if !status.success() {
        return Err(ReleaseError::DatasetInstall {
            source_url: shown,
            message: format!("{} exited with {}", settings.datalad.display(), status),
        });
    }
    if !root.is_dir() {
        return Err(ReleaseError::DatasetInstall {
            source_url: shown,
            message: format!("{} did not create {}", settings.datalad.display(), root.display()),
        });
    }

    configure_identity(&root, &settings.git_identity).map_err(|message| {
        ReleaseError::DatasetInstall {
            source_url: shown.clone(),
            message,
        }
    })?;

    let head = head_commit(&root);
    match head.as_deref() {
        Some(commit) => tracing::info!(%commit, "dataset installed"),
        None => tracing::warn!(root = %root.display(), "could not determine dataset HEAD"),
    }

    Ok(DatasetHandle {
        root,
        source_url: shown,
        head,
        _dir: dir,
    })
}

/// The `datalad install` invocation, with credentials and identity in its environment.
fn install_command(settings: &Settings, source: &Url, target: &Path) -> Command {
    let mut command = Command::new(&settings.datalad);
    command
        .args(install_args(source.as_str(), target, settings.recursion_limit))
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null());
    if let Some(token) = settings.git_token.as_deref() {
        command.envs(credential_env(token));
    }
    apply_identity_env(&mut command, &settings.git_identity);
    command
}

fn apply_identity_env(command: &mut Command, identity: &GitIdentity) {
    if let Some(name) = identity.name.as_deref() {
        command
            .env("GIT_AUTHOR_NAME", name)
            .env("GIT_COMMITTER_NAME", name);
    }
    if let Some(email) = identity.email.as_deref() {
        command
            .env("GIT_AUTHOR_EMAIL", email)
            .env("GIT_COMMITTER_EMAIL", email);
    }
}

fn configure_identity(root: &Path, identity: &GitIdentity) -> Result<(), String> {
    if identity.is_empty() {
        return Ok(());
    }
    let entries = [
        ("user.name", identity.name.as_deref()),
        ("user.email", identity.email.as_deref()),
    ];

    for (key, value) in entries {
        let Some(value) = value else {
            continue;
        };
        tracing::debug!(key, "configuring git identity");
        let status = Command::new(GIT)
            .arg("-C")
            .arg(root)
            .args(["config", key, value])
            .stdin(Stdio::null())
            .status()
            .map_err(|source| format!("could not run git config {key}: {source}"))?;
        if !status.success() {
            return Err(format!("git config {key} exited with {status}"));
        }
    }

    Ok(())
}

fn head_commit(root: &Path) -> Option<String> {
    let output = Command::new(GIT)
        .arg("-C")
        .arg(root)
        .args(["rev-parse", "HEAD"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let commit = String::from_utf8(output.stdout).ok()?;
    let commit = commit.trim();
    (!commit.is_empty()).then(|| commit.to_string())
}

enum Wait {
    Timeout,
    Io(std::io::Error),
}

/// Run `command` to completion, killing it once `timeout` has elapsed.
fn run_with_deadline(command: &mut Command, timeout: Duration) -> Result<ExitStatus, Wait> {
    tracing::debug!(program = ?command.get_program(), "spawning");
    let mut child = command.spawn().map_err(Wait::Io)?;
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(status) = child.try_wait().map_err(Wait::Io)? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Wait::Timeout);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReleaseArgs;
    use clap::Parser;

    fn settings(extra: &[&str]) -> Settings {
        let mut argv = vec![
            "datalad-release",
            "--zenodo-api-token",
            "z",
            "--repository",
            "org/data",
        ];
        if !extra.contains(&"--server-url") {
            argv.extend_from_slice(&["--server-url", "https://github.com"]);
        }
        argv.extend_from_slice(extra);
        let mut args = ReleaseArgs::try_parse_from(argv).expect("args");
        if !extra.contains(&"--git-token") {
            args.git_token = None;
        }
        Settings::from_args(args).expect("settings")
    }

    #[test]
    fn clone_url_without_token() {
        let url = clone_url(&settings(&[])).unwrap();
        assert_eq!(url.as_str(), "https://github.com/org/data.git");
    }

    #[test]
    fn clone_url_never_carries_credentials() {
        let url = clone_url(&settings(&["--git-token", "ghp_secret"])).unwrap();
        assert_eq!(url.as_str(), "https://github.com/org/data.git");

        let url = clone_url(&settings(&["--server-url", "https://user:pw@git.example.org"])).unwrap();
        assert_eq!(url.as_str(), "https://git.example.org/org/data.git");
    }

    #[test]
    fn token_goes_to_environment_not_arguments() {
        let settings = settings(&["--git-token", "ghp_secret"]);
        let url = clone_url(&settings).unwrap();
        let command = install_command(&settings, &url, Path::new("/tmp/data"));

        assert!(command
            .get_args()
            .all(|arg| !arg.to_string_lossy().contains("ghp_secret")));

        let env: Vec<(String, String)> = command
            .get_envs()
            .filter_map(|(key, value)| {
                Some((key.to_str()?.to_string(), value?.to_str()?.to_string()))
            })
            .collect();
        let lookup = |key: &str| {
            env.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(lookup(TOKEN_ENV), Some("ghp_secret"));
        assert_eq!(lookup("GIT_CONFIG_COUNT"), Some("1"));
        assert_eq!(lookup("GIT_CONFIG_KEY_0"), Some("credential.helper"));
        let helper = lookup("GIT_CONFIG_VALUE_0").unwrap();
        assert!(helper.contains("$GIT_TOKEN"));
        assert!(!helper.contains("ghp_secret"));
    }

    #[test]
    fn no_token_means_no_credential_helper() {
        let settings = settings(&[]);
        let url = clone_url(&settings).unwrap();
        let command = install_command(&settings, &url, Path::new("/tmp/data"));
        assert!(!command
            .get_envs()
            .any(|(key, _)| key == "GIT_CONFIG_KEY_0" || key == TOKEN_ENV));
    }

    #[test]
    fn install_args_without_limit_recurse_fully() {
        let args = install_args("https://x/y.git", Path::new("/tmp/y"), None);
        assert_eq!(
            args,
            ["install", "--source", "https://x/y.git", "--recursive", "/tmp/y"]
                .map(OsString::from)
                .to_vec()
        );
    }

    #[test]
    fn install_args_with_zero_limit() {
        let args = install_args("src", Path::new("dst"), Some(0));
        let joined: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            joined,
            ["install", "--source", "src", "--recursive", "--recursion-limit", "0", "dst"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn deadline_kills_slow_command() {
        let mut command = Command::new("sleep");
        command.arg("5");
        let started = Instant::now();
        let result = run_with_deadline(&mut command, Duration::from_millis(200));
        assert!(matches!(result, Err(Wait::Timeout)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_executable_is_install_error() {
        let mut args = settings(&[]);
        args.datalad = PathBuf::from("/nonexistent/datalad-release/datalad");
        let err = install_dataset(&args).expect_err("should fail");
        match err {
            ReleaseError::DatasetInstall { message, .. } => {
                assert!(message.contains("could not run"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
