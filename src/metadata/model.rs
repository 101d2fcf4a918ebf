//! Zenodo deposition metadata types.
//!
//! Field names follow the Zenodo deposit API so the values serialize straight
//! into the `metadata` object of a deposition update. Unknown fields in the
//! input file are ignored.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Kind of record being deposited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadType {
    Publication,
    Poster,
    Presentation,
    #[default]
    Dataset,
    Image,
    Video,
    Software,
    Lesson,
    Physicalobject,
    Other,
}

/// Access level of the published files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessRight {
    #[default]
    Open,
    Embargoed,
    Restricted,
    Closed,
}

impl AccessRight {
    /// Open and embargoed records must carry a license.
    pub fn requires_license(self) -> bool {
        matches!(self, AccessRight::Open | AccessRight::Embargoed)
    }
}

/// An author of the deposit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    /// Name in "Family, Given" form.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orcid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gnd: Option<String>,
}

/// A non-author contributor (editor, data curator, ...).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orcid: Option<String>,
}

/// A link from the deposit to another identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedIdentifier {
    pub identifier: String,
    pub relation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    pub identifier: String,
}

/// Descriptive metadata for a Zenodo deposition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub upload_type: UploadType,

    /// Required when `upload_type` is `publication`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_type: Option<String>,

    /// Required when `upload_type` is `image`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_type: Option<String>,

    /// Free text, HTML allowed.
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub creators: Vec<Creator>,

    #[serde(default)]
    pub access_right: AccessRight,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embargo_date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_conditions: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_identifiers: Vec<RelatedIdentifier>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contributors: Vec<Contributor>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub communities: Vec<Community>,
}
