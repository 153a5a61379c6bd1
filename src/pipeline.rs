use crate::core::acquire::{AcquisitionReport, Downloader, Fetcher};
use crate::core::merge::{DedupReport, Deduplicator};
use crate::core::record::Table;
use crate::core::store::{AssetStore, StoreError};
use crate::core::validate::{ValidationReport, Validator};
use indicatif::ProgressBar;
use log::info;
use rayon::ThreadPoolBuildError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CurateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to start download workers: {0}")]
    Pool(#[from] ThreadPoolBuildError),
}

#[derive(Debug)]
pub struct PipelineReport {
    pub acquisition: AcquisitionReport,
    pub validation: ValidationReport,
    pub dedup: DedupReport,
}

/// Progress bars for the three stages.
pub struct StageBars {
    pub acquire: ProgressBar,
    pub validate: ProgressBar,
    pub dedup: ProgressBar,
}

impl StageBars {
    pub fn hidden() -> Self {
        Self {
            acquire: ProgressBar::hidden(),
            validate: ProgressBar::hidden(),
            dedup: ProgressBar::hidden(),
        }
    }
}

/// Acquisition, validation and duplicate merge over one asset root, run
/// strictly one after another.
pub struct Pipeline {
    downloader: Downloader,
    validator: Validator,
    deduplicator: Deduplicator,
}

impl Pipeline {
    /// Fails if the asset root does not exist.
    pub fn new(store: AssetStore, workers: usize) -> Result<Self, CurateError> {
        store.ensure_root()?;
        Ok(Self {
            downloader: Downloader::new(store.clone(), workers)?,
            validator: Validator::new(store.clone()),
            deduplicator: Deduplicator::new(store),
        })
    }

    pub fn run(&self, table: &mut Table, fetcher: &dyn Fetcher, bars: &StageBars) -> PipelineReport {
        let acquisition = self.downloader.download_missing(table, fetcher, &bars.acquire);
        bars.acquire.finish_and_clear();

        let validation = self.validator.validate(table, &bars.validate);
        bars.validate.finish_and_clear();

        let dedup = self.deduplicator.deduplicate(table, &bars.dedup);
        bars.dedup.finish_and_clear();

        info!(
            "Pipeline done: {} fetched, {} failed, {} invalid, {} merged, {} rows remain",
            acquisition.fetched,
            acquisition.failed.len(),
            validation.dropped.len(),
            dedup.removed(),
            table.len()
        );

        PipelineReport {
            acquisition,
            validation,
            dedup,
        }
    }
}
