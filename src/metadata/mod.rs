//! Deposition metadata read from a file inside the dataset.
//!
//! The file (`.zenodo.json` by default) uses Zenodo's deposition metadata
//! schema. Loading collects every schema problem instead of stopping at the
//! first one, so a broken file can be fixed in one pass.

mod model;

pub use model::{
    AccessRight, Community, Contributor, Creator, Metadata, RelatedIdentifier, UploadType,
};

use std::path::Path;

use chrono::NaiveDate;

use crate::error::ReleaseError;

/// Relation used for the related identifier that keys a deposit to its source.
pub const SOURCE_RELATION: &str = "isSupplementTo";

/// License applied to open and embargoed records that do not name one.
pub const DEFAULT_LICENSE: &str = "cc-by-4.0";

/// Read and validate the metadata file at `filename` below `root`.
///
/// # Errors
/// Returns a metadata error if the file is missing, is not valid JSON, or
/// violates the schema.
pub fn load_metadata(root: &Path, filename: &Path) -> Result<Metadata, ReleaseError> {
    let path = root.join(filename);
    let bytes = std::fs::read(&path).map_err(|source| ReleaseError::MetadataRead {
        path: path.clone(),
        source,
    })?;

    let metadata = from_json_slice(&bytes).map_err(|source| ReleaseError::MetadataParse {
        path: path.clone(),
        source,
    })?;

    let problems = validate(&metadata);
    if !problems.is_empty() {
        return Err(ReleaseError::MetadataInvalid { path, problems });
    }

    tracing::info!(path = %path.display(), title = %metadata.title, "loaded deposition metadata");
    Ok(metadata)
}

/// Parse metadata from JSON bytes without validating it.
pub fn from_json_slice(bytes: &[u8]) -> Result<Metadata, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Check the metadata against the deposition schema.
///
/// Returns one message per problem; an empty list means the metadata is
/// acceptable.
pub fn validate(metadata: &Metadata) -> Vec<String> {
    let mut problems = Vec::new();

    if metadata.title.trim().is_empty() {
        problems.push("title must not be empty".to_string());
    }
    if metadata.description.trim().is_empty() {
        problems.push("description must not be empty".to_string());
    }
    if metadata.creators.is_empty() {
        problems.push("at least one creator is required".to_string());
    }

    for (idx, creator) in metadata.creators.iter().enumerate() {
        if creator.name.trim().is_empty() {
            problems.push(format!("creators[{idx}].name must not be empty"));
        }
        if let Some(orcid) = creator.orcid.as_deref() {
            if !is_orcid(orcid) {
                problems.push(format!("creators[{idx}].orcid '{orcid}' is not a valid ORCID"));
            }
        }
    }

    for (idx, contributor) in metadata.contributors.iter().enumerate() {
        if contributor.name.trim().is_empty() {
            problems.push(format!("contributors[{idx}].name must not be empty"));
        }
        if contributor.kind.trim().is_empty() {
            problems.push(format!("contributors[{idx}].type must not be empty"));
        }
    }

    match metadata.upload_type {
        UploadType::Publication if metadata.publication_type.is_none() => {
            problems.push("publication_type is required for upload_type 'publication'".to_string());
        }
        UploadType::Image if metadata.image_type.is_none() => {
            problems.push("image_type is required for upload_type 'image'".to_string());
        }
        _ => {}
    }

    match metadata.access_right {
        AccessRight::Embargoed if metadata.embargo_date.is_none() => {
            problems.push("embargo_date is required for access_right 'embargoed'".to_string());
        }
        AccessRight::Restricted if metadata.access_conditions.is_none() => {
            problems
                .push("access_conditions is required for access_right 'restricted'".to_string());
        }
        _ => {}
    }

    for (idx, related) in metadata.related_identifiers.iter().enumerate() {
        if related.identifier.trim().is_empty() || related.relation.trim().is_empty() {
            problems.push(format!(
                "related_identifiers[{idx}] needs both identifier and relation"
            ));
        }
    }

    problems
}

impl Metadata {
    /// Whether a related identifier with this value is already present.
    pub fn has_related_identifier(&self, identifier: &str) -> bool {
        self.related_identifiers
            .iter()
            .any(|related| related.identifier == identifier)
    }

    /// Fill in the values Zenodo needs at submission time.
    ///
    /// `source_key` is added as an `isSupplementTo` related identifier so the
    /// deposit can be found again on the next release.
    pub fn prepare_for_submission(&mut self, version: &str, source_key: &str, today: NaiveDate) {
        if self.version.is_none() {
            self.version = Some(version.to_string());
        }
        if self.publication_date.is_none() {
            self.publication_date = Some(today);
        }
        if self.license.is_none() && self.access_right.requires_license() {
            self.license = Some(DEFAULT_LICENSE.to_string());
        }
        if !self.has_related_identifier(source_key) {
            self.related_identifiers.push(RelatedIdentifier {
                identifier: source_key.to_string(),
                relation: SOURCE_RELATION.to_string(),
                resource_type: None,
            });
        }
    }
}

fn is_orcid(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 19 {
        return false;
    }
    bytes.iter().enumerate().all(|(idx, &b)| match idx {
        4 | 9 | 14 => b == b'-',
        18 => b.is_ascii_digit() || b == b'X',
        _ => b.is_ascii_digit(),
    })
}
