//! Publishing to Zenodo.
//!
//! This module owns the deposition workflow: finding the deposit that
//! belongs to a source repository, opening a new version (or a fresh
//! deposit), uploading the archive, and publishing. HTTP details live in
//! [`client`]. With the `test-support` feature, `memory` provides an
//! in-process stand-in for tests.
//!
//! A deposit is keyed by the source repository URL, stored on the record as
//! an `isSupplementTo` related identifier. Every release therefore becomes a
//! new version of the same concept record.

pub mod client;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::archive::Archive;
use crate::error::ReleaseError;
use crate::metadata::{Metadata, RelatedIdentifier};

pub use client::ZenodoClient;

/// Production Zenodo.
pub const PRODUCTION_URL: &str = "https://zenodo.org";

/// Zenodo sandbox, for test releases.
pub const SANDBOX_URL: &str = "https://sandbox.zenodo.org";

/// Number of depositions requested per page while looking up a key.
pub const LOOKUP_PAGE_SIZE: u32 = 100;

/// Base URL of the Zenodo instance to publish to.
pub fn base_url(sandbox: bool) -> &'static str {
    if sandbox {
        SANDBOX_URL
    } else {
        PRODUCTION_URL
    }
}

/// A deposition as returned by the deposit API.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Deposition {
    pub id: u64,
    #[serde(default)]
    pub conceptrecid: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub doi_url: Option<String>,
    #[serde(default)]
    pub submitted: bool,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub links: DepositionLinks,
    #[serde(default)]
    pub files: Vec<DepositFile>,
    #[serde(default)]
    pub metadata: DepositionMetadata,
}

impl Deposition {
    /// Whether this deposition carries `key` as a related identifier.
    pub fn is_keyed_by(&self, key: &str) -> bool {
        self.metadata
            .related_identifiers
            .iter()
            .any(|related| related.identifier == key)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositionLinks {
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub record_html: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub latest_draft: Option<String>,
}

/// A file attached to a deposition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositFile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub filesize: u64,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub links: FileLinks,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLinks {
    #[serde(default)]
    pub download: Option<String>,
    #[serde(default, rename = "self")]
    pub self_link: Option<String>,
}

/// The parts of a deposition's metadata the workflow reads back.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositionMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub related_identifiers: Vec<RelatedIdentifier>,
}

/// Operations of the Zenodo deposit API used by a release.
///
/// Implementations must not retry: a repeated upload could leave a
/// duplicate file on the draft.
pub trait DepositApi {
    /// One page (1-based) of the account's depositions, most recent first.
    fn list_depositions(&self, page: u32, size: u32) -> Result<Vec<Deposition>, ReleaseError>;

    fn get_deposition(&self, id: u64) -> Result<Deposition, ReleaseError>;

    /// Create an empty draft deposition.
    fn create_deposition(&self) -> Result<Deposition, ReleaseError>;

    /// Open a new version of a published deposition and return its draft.
    fn new_version(&self, id: u64) -> Result<Deposition, ReleaseError>;

    fn delete_file(&self, deposition_id: u64, file_id: &str) -> Result<(), ReleaseError>;

    /// Upload `path` into the draft's bucket as `file_name`.
    fn upload_file(
        &self,
        deposition: &Deposition,
        file_name: &str,
        path: &Path,
    ) -> Result<(), ReleaseError>;

    fn update_metadata(
        &self,
        deposition_id: u64,
        metadata: &Metadata,
    ) -> Result<Deposition, ReleaseError>;

    fn publish(&self, deposition_id: u64) -> Result<Deposition, ReleaseError>;
}

/// Find the most relevant deposition carrying `key`.
///
/// An unpublished draft wins over published versions, since Zenodo allows
/// only one open draft per concept; otherwise the newest deposition is used.
pub fn find_deposition(
    api: &dyn DepositApi,
    key: &str,
) -> Result<Option<Deposition>, ReleaseError> {
    let mut matches = Vec::new();
    let mut page = 1;

    loop {
        let batch = api.list_depositions(page, LOOKUP_PAGE_SIZE)?;
        let exhausted = batch.len() < LOOKUP_PAGE_SIZE as usize;
        matches.extend(batch.into_iter().filter(|dep| dep.is_keyed_by(key)));
        if exhausted {
            break;
        }
        page += 1;
    }

    tracing::debug!(key, found = matches.len(), "looked up depositions");
    Ok(matches
        .into_iter()
        .max_by_key(|dep| (!dep.submitted, dep.id)))
}

/// Create or update the deposit keyed by `key` and publish `archive` to it.
///
/// With `explicit_id` the lookup is skipped and that deposition is used.
/// Files carried over from the previous version are removed so the new
/// version holds exactly the one archive.
///
/// # Errors
/// Returns the first publish error; nothing is retried.
pub fn ensure_deposition(
    api: &dyn DepositApi,
    key: &str,
    explicit_id: Option<u64>,
    metadata: &Metadata,
    archive: &Archive,
) -> Result<Deposition, ReleaseError> {
    let existing = match explicit_id {
        Some(id) => Some(api.get_deposition(id)?),
        None => find_deposition(api, key)?,
    };

    let draft = match existing {
        None => {
            tracing::info!(key, "no deposition found, creating one");
            api.create_deposition()?
        }
        Some(dep) if !dep.submitted => {
            tracing::info!(id = dep.id, "reusing unpublished draft");
            dep
        }
        Some(dep) => {
            tracing::info!(id = dep.id, "opening new version");
            api.new_version(dep.id)?
        }
    };

    for file in &draft.files {
        tracing::debug!(deposition = draft.id, file = %file.filename, "removing inherited file");
        api.delete_file(draft.id, &file.id)?;
    }

    api.update_metadata(draft.id, metadata)?;

    tracing::info!(
        deposition = draft.id,
        file = archive.file_name(),
        "uploading archive"
    );
    api.upload_file(&draft, archive.file_name(), archive.path())?;

    let published = api.publish(draft.id)?;
    tracing::info!(
        deposition = published.id,
        doi = published.doi.as_deref().unwrap_or_default(),
        "published"
    );
    Ok(published)
}
