#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use datalad_release::{ReleaseArgs, Settings};

pub const VALID_METADATA: &str = r#"{
    "title": "Example dataset",
    "description": "A dataset released from CI",
    "upload_type": "dataset",
    "creators": [{"name": "Doe, Jane", "affiliation": "Example Lab"}],
    "keywords": ["example"]
}"#;

/// Write a small dataset tree with the given `.zenodo.json` content.
pub fn write_dataset(root: &Path, metadata: Option<&str>) {
    fs::create_dir_all(root.join("sub/raw")).expect("create dataset dirs");
    fs::write(root.join("README.md"), "# Example\n").expect("write readme");
    fs::write(root.join("sub/raw/values.csv"), "x,y\n1,2\n3,4\n").expect("write csv");
    if let Some(metadata) = metadata {
        fs::write(root.join(".zenodo.json"), metadata).expect("write metadata");
    }
}

/// Create an executable stand-in for `datalad`.
///
/// The script records its arguments (one per line) in `log`, then copies
/// `source` into the install target, which is its last argument.
#[cfg(unix)]
pub fn fake_datalad(dir: &Path, source: &Path, log: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("datalad");
    let body = format!(
        "#!/bin/sh\n\
         for last; do :; done\n\
         printf '%s\\n' \"$@\" > '{log}'\n\
         mkdir -p \"$last\" && cp -R '{source}/.' \"$last/\"\n",
        log = log.display(),
        source = source.display(),
    );
    fs::write(&script, body).expect("write fake datalad");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod fake datalad");
    script
}

/// A `datalad` stand-in that leaves a git repository behind, like a real clone.
///
/// The install source (third argument) becomes the `origin` remote and the
/// copied tree is committed. When `GIT_TOKEN` is set, the script asks git
/// for github.com credentials and writes the answer to `credentials`.
#[cfg(unix)]
pub fn cloning_datalad(dir: &Path, source: &Path, credentials: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("datalad-clone");
    let body = format!(
        "#!/bin/sh\n\
         for last; do :; done\n\
         mkdir -p \"$last\" && cp -R '{source}/.' \"$last/\" || exit 1\n\
         cd \"$last\" || exit 1\n\
         git init -q . || exit 1\n\
         git remote add origin \"$3\" || exit 1\n\
         git add -A || exit 1\n\
         git -c user.name=fixture -c user.email=fixture@example.invalid \
         -c commit.gpgsign=false commit -q -m initial || exit 1\n\
         if [ -n \"$GIT_TOKEN\" ]; then\n\
         printf 'protocol=https\\nhost=github.com\\n\\n' | git credential fill > '{credentials}'\n\
         fi\n",
        source = source.display(),
        credentials = credentials.display(),
    );
    fs::write(&script, body).expect("write cloning datalad");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod cloning datalad");
    script
}

/// A `datalad` stand-in that always fails.
#[cfg(unix)]
pub fn failing_datalad(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("datalad-failing");
    fs::write(&script, "#!/bin/sh\necho 'install failed' >&2\nexit 1\n")
        .expect("write failing datalad");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");
    script
}

/// Settings for a test run, independent of the CI environment.
pub fn settings(datalad: &Path, output: Option<&Path>, extra: &[&str]) -> Settings {
    let mut argv = vec![
        "datalad-release",
        "--zenodo-api-token",
        "test-token",
        "--repository",
        "org/example",
        "--server-url",
        "https://github.com",
    ];
    argv.extend_from_slice(extra);

    let mut args = ReleaseArgs::try_parse_from(argv).expect("parse args");
    args.datalad = datalad.to_path_buf();
    args.output_file = output.map(Path::to_path_buf);
    args.git_token = None;
    args.git_username = None;
    args.git_email = None;
    args.deposition_id = None;
    Settings::from_args(args).expect("settings")
}

/// Arguments recorded by [`fake_datalad`].
pub fn logged_args(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .expect("read datalad log")
        .lines()
        .map(str::to_string)
        .collect()
}
