//! Reporting the published identifiers to the CI runner.
//!
//! GitHub Actions collects step outputs from the file named by
//! `GITHUB_OUTPUT`; each output is one `key=value` line appended to it.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::ReleaseError;
use crate::zenodo::Deposition;

/// The three values a release reports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PublishOutputs {
    pub doi: String,
    pub zenodo_url: String,
    pub archive_url: String,
}

impl PublishOutputs {
    /// Extract the outputs from a published deposition.
    ///
    /// # Errors
    /// Returns [`ReleaseError::ZenodoResponse`] if the deposition lacks a DOI,
    /// a record URL or a downloadable file, or if a value spans lines.
    pub fn from_deposition(deposition: &Deposition) -> Result<Self, ReleaseError> {
        let missing = |what: &str| ReleaseError::ZenodoResponse {
            operation: "publish".to_string(),
            message: format!("deposition {} has no {}", deposition.id, what),
        };

        let doi = deposition
            .doi
            .clone()
            .filter(|doi| !doi.is_empty())
            .ok_or_else(|| missing("DOI"))?;
        let zenodo_url = deposition
            .doi_url
            .clone()
            .or_else(|| deposition.links.record_html.clone())
            .or_else(|| deposition.links.html.clone())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| missing("record URL"))?;
        let archive_url = deposition
            .files
            .first()
            .and_then(|file| file.links.download.clone())
            .ok_or_else(|| missing("downloadable file"))?;

        let outputs = Self {
            doi,
            zenodo_url,
            archive_url,
        };
        if let Some((key, _)) = outputs.pairs().into_iter().find(|(_, v)| v.contains('\n')) {
            return Err(ReleaseError::ZenodoResponse {
                operation: "publish".to_string(),
                message: format!("{key} spans multiple lines"),
            });
        }
        Ok(outputs)
    }

    /// Output names and values, in reporting order.
    pub fn pairs(&self) -> [(&'static str, &str); 3] {
        [
            ("doi", self.doi.as_str()),
            ("zenodo_url", self.zenodo_url.as_str()),
            ("archive_url", self.archive_url.as_str()),
        ]
    }
}

impl fmt::Display for PublishOutputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.pairs() {
            writeln!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Append the outputs to `output_file`, if one is configured.
///
/// Without an output file the values are only logged; that is not an error.
pub fn write_outputs(
    output_file: Option<&Path>,
    outputs: &PublishOutputs,
) -> Result<(), ReleaseError> {
    let Some(path) = output_file else {
        tracing::info!("no output file configured, outputs not exported");
        return Ok(());
    };

    let write_err = |source: std::io::Error| ReleaseError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(write_err)?;
    file.write_all(outputs.to_string().as_bytes())
        .map_err(write_err)?;

    tracing::info!(path = %path.display(), "wrote outputs");
    Ok(())
}
