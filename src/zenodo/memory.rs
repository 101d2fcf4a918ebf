//! An in-process deposit service with Zenodo's versioning rules.
//!
//! Used by the tests to exercise the release workflow without network
//! access. It follows the behaviour the workflow relies on: one open draft
//! per concept record, new versions inherit the previous files, files can
//! only change on drafts, and a deposition needs at least one file to be
//! published.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::ReleaseError;
use crate::metadata::Metadata;

use super::{
    base_url, DepositApi, DepositFile, Deposition, DepositionLinks, DepositionMetadata, FileLinks,
};

/// A file received by [`MemoryDepositApi::upload_file`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedUpload {
    pub deposition_id: u64,
    pub file_name: String,
    /// Where the file was read from at upload time.
    pub source: PathBuf,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    depositions: BTreeMap<u64, Deposition>,
    uploads: Vec<RecordedUpload>,
    calls: Vec<String>,
    fail_on: Option<String>,
}

impl State {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory implementation of [`DepositApi`].
#[derive(Debug)]
pub struct MemoryDepositApi {
    base: &'static str,
    state: RefCell<State>,
}

impl MemoryDepositApi {
    /// Create an empty service; `sandbox` selects the host used in links.
    pub fn new(sandbox: bool) -> Self {
        Self {
            base: base_url(sandbox),
            state: RefCell::new(State::default()),
        }
    }

    /// Make every later call of `operation` fail with HTTP 500.
    pub fn fail_on(&self, operation: &str) {
        self.state.borrow_mut().fail_on = Some(operation.to_string());
    }

    pub fn clear_failure(&self) {
        self.state.borrow_mut().fail_on = None;
    }

    /// All depositions, ordered by id.
    pub fn depositions(&self) -> Vec<Deposition> {
        self.state.borrow().depositions.values().cloned().collect()
    }

    /// Distinct concept record ids.
    pub fn concepts(&self) -> BTreeSet<String> {
        self.state
            .borrow()
            .depositions
            .values()
            .filter_map(|dep| dep.conceptrecid.clone())
            .collect()
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.state.borrow().uploads.clone()
    }

    /// Calls received so far, as `operation:argument`.
    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    fn enter(&self, operation: &str, argument: impl std::fmt::Display) -> Result<(), ReleaseError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("{operation}:{argument}"));
        if state.fail_on.as_deref() == Some(operation) {
            return Err(status_error(operation, 500, "injected failure"));
        }
        Ok(())
    }

    fn draft_links(&self, id: u64) -> DepositionLinks {
        DepositionLinks {
            html: Some(format!("{}/deposit/{}", self.base, id)),
            record_html: None,
            bucket: Some(format!("{}/api/files/bucket-{}", self.base, id)),
            latest_draft: None,
        }
    }
}

fn status_error(operation: &str, status: u16, message: &str) -> ReleaseError {
    ReleaseError::ZenodoStatus {
        operation: operation.to_string(),
        status,
        message: message.to_string(),
    }
}

fn existing<'a>(
    state: &'a mut State,
    operation: &str,
    id: u64,
) -> Result<&'a mut Deposition, ReleaseError> {
    state
        .depositions
        .get_mut(&id)
        .ok_or_else(|| status_error(operation, 404, "PID does not exist."))
}

impl DepositApi for MemoryDepositApi {
    fn list_depositions(&self, page: u32, size: u32) -> Result<Vec<Deposition>, ReleaseError> {
        self.enter("list", page)?;
        let state = self.state.borrow();
        let skip = (page.saturating_sub(1) as usize) * size as usize;
        Ok(state
            .depositions
            .values()
            .rev()
            .skip(skip)
            .take(size as usize)
            .cloned()
            .collect())
    }

    fn get_deposition(&self, id: u64) -> Result<Deposition, ReleaseError> {
        self.enter("get", id)?;
        let mut state = self.state.borrow_mut();
        existing(&mut state, "get", id).cloned()
    }

    fn create_deposition(&self) -> Result<Deposition, ReleaseError> {
        self.enter("create", "")?;
        let mut state = self.state.borrow_mut();
        let concept = state.allocate();
        let id = state.allocate();
        let deposition = Deposition {
            id,
            conceptrecid: Some(concept.to_string()),
            state: Some("unsubmitted".to_string()),
            links: self.draft_links(id),
            ..Default::default()
        };
        state.depositions.insert(id, deposition.clone());
        Ok(deposition)
    }

    fn new_version(&self, id: u64) -> Result<Deposition, ReleaseError> {
        self.enter("newversion", id)?;
        let mut state = self.state.borrow_mut();
        let source = existing(&mut state, "newversion", id)?.clone();
        if !source.submitted {
            return Err(status_error("newversion", 400, "deposition is not published"));
        }
        let open_draft = state
            .depositions
            .values()
            .any(|dep| !dep.submitted && dep.conceptrecid == source.conceptrecid);
        if open_draft {
            return Err(status_error(
                "newversion",
                400,
                "a new version draft already exists",
            ));
        }

        let draft_id = state.allocate();
        let files = source
            .files
            .iter()
            .map(|file| DepositFile {
                id: format!("{}-{}", draft_id, file.filename),
                ..file.clone()
            })
            .collect();
        let draft = Deposition {
            id: draft_id,
            conceptrecid: source.conceptrecid.clone(),
            state: Some("unsubmitted".to_string()),
            links: self.draft_links(draft_id),
            files,
            metadata: source.metadata.clone(),
            ..Default::default()
        };
        state.depositions.insert(draft_id, draft.clone());
        Ok(draft)
    }

    fn delete_file(&self, deposition_id: u64, file_id: &str) -> Result<(), ReleaseError> {
        self.enter("delete", file_id)?;
        let mut state = self.state.borrow_mut();
        let deposition = existing(&mut state, "delete", deposition_id)?;
        if deposition.submitted {
            return Err(status_error("delete", 403, "published files cannot be deleted"));
        }
        let before = deposition.files.len();
        deposition.files.retain(|file| file.id != file_id);
        if deposition.files.len() == before {
            return Err(status_error("delete", 404, "file does not exist"));
        }
        Ok(())
    }

    fn upload_file(
        &self,
        deposition: &Deposition,
        file_name: &str,
        path: &Path,
    ) -> Result<(), ReleaseError> {
        self.enter("upload", file_name)?;
        let bytes = std::fs::read(path)?;
        let mut state = self.state.borrow_mut();
        let stored = existing(&mut state, "upload", deposition.id)?;
        if stored.submitted {
            return Err(status_error("upload", 403, "deposition is already published"));
        }
        if stored.files.iter().any(|file| file.filename == file_name) {
            return Err(status_error("upload", 400, "filename already exists"));
        }

        let bucket = stored.links.bucket.clone().unwrap_or_default();
        stored.files.push(DepositFile {
            id: format!("{}-{}", deposition.id, file_name),
            filename: file_name.to_string(),
            filesize: bytes.len() as u64,
            checksum: None,
            links: FileLinks {
                download: Some(format!("{}/{}", bucket, file_name)),
                self_link: None,
            },
        });
        state.uploads.push(RecordedUpload {
            deposition_id: deposition.id,
            file_name: file_name.to_string(),
            source: path.to_path_buf(),
            bytes,
        });
        Ok(())
    }

    fn update_metadata(
        &self,
        deposition_id: u64,
        metadata: &Metadata,
    ) -> Result<Deposition, ReleaseError> {
        self.enter("update", deposition_id)?;
        let mut state = self.state.borrow_mut();
        let stored = existing(&mut state, "update", deposition_id)?;
        if stored.submitted {
            return Err(status_error("update", 400, "deposition is already published"));
        }
        stored.metadata = DepositionMetadata {
            title: Some(metadata.title.clone()),
            version: metadata.version.clone(),
            related_identifiers: metadata.related_identifiers.clone(),
        };
        Ok(stored.clone())
    }

    fn publish(&self, deposition_id: u64) -> Result<Deposition, ReleaseError> {
        self.enter("publish", deposition_id)?;
        let base = self.base;
        let mut state = self.state.borrow_mut();
        let stored = existing(&mut state, "publish", deposition_id)?;
        if stored.files.is_empty() {
            return Err(status_error("publish", 400, "Minimum one file must be provided."));
        }

        let doi = format!("10.5072/zenodo.{deposition_id}");
        stored.submitted = true;
        stored.state = Some("done".to_string());
        stored.doi_url = Some(format!("https://doi.org/{doi}"));
        stored.doi = Some(doi);
        stored.links.record_html = Some(format!("{base}/records/{deposition_id}"));
        for file in &mut stored.files {
            file.links.download = Some(format!(
                "{base}/records/{deposition_id}/files/{}",
                file.filename
            ));
        }
        Ok(stored.clone())
    }
}
