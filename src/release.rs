//! The release pipeline: fetch, archive, publish, report.

use chrono::Utc;

use crate::archive::{create_archive, Archive};
use crate::config::Settings;
use crate::dataset::install_dataset;
use crate::error::ReleaseError;
use crate::metadata::load_metadata;
use crate::report::{write_outputs, PublishOutputs};
use crate::zenodo::{ensure_deposition, DepositApi, Deposition};

/// What a successful release produced.
#[derive(Clone, Debug)]
pub struct ReleaseOutcome {
    pub outputs: PublishOutputs,
    pub deposition: Deposition,
    /// Commit of the released dataset, when git could report it.
    pub dataset_head: Option<String>,
}

/// Run one release against `api`.
///
/// Stages run in order and the first failure ends the run. The dataset
/// clone and the archive live in temporary directories that are removed
/// when this function returns, whether it succeeds or not.
pub fn run_release(
    settings: &Settings,
    api: &dyn DepositApi,
) -> Result<ReleaseOutcome, ReleaseError> {
    let dataset = install_dataset(settings)?;
    tracing::debug!(
        source = dataset.source_url(),
        root = %dataset.root().display(),
        "dataset ready"
    );

    // Checked before archiving so a bad metadata file never costs an upload.
    let mut metadata = load_metadata(dataset.root(), &settings.metadata_filename)?;
    let key = settings.repository_url();
    metadata.prepare_for_submission(&settings.archive_name, &key, Utc::now().date_naive());

    let archive = create_archive(
        dataset.root(),
        &settings.archive_name,
        settings.archive_format,
    )?;
    tracing::info!(
        file = archive.file_name(),
        format = %archive.format(),
        bytes = ?archive_size(&archive),
        "archive ready"
    );

    let deposition = ensure_deposition(api, &key, settings.deposition_id, &metadata, &archive)?;
    let outputs = PublishOutputs::from_deposition(&deposition)?;
    write_outputs(settings.output_file.as_deref(), &outputs)?;

    Ok(ReleaseOutcome {
        outputs,
        deposition,
        dataset_head: dataset.head().map(str::to_string),
    })
}

/// Archive size for logging; a failed stat is not worth failing the release.
fn archive_size(archive: &Archive) -> Option<u64> {
    archive
        .size()
        .map_err(|err| tracing::warn!(file = archive.file_name(), %err, "archive size unavailable"))
        .ok()
}
