pub mod config;
pub mod core;
pub mod pipeline;

pub use crate::core::acquire::{AcquisitionReport, Downloader, FetchError, Fetcher, HttpFetcher};
pub use crate::core::hash::{ContentHash, DecodeError};
pub use crate::core::hierarchy::{LabelTree, build_trees};
pub use crate::core::merge::{DedupReport, Deduplicator, union_labels};
pub use crate::core::record::{HierarchyColumn, Record, RecordId, Table, TableError};
pub use crate::core::store::{AssetStore, StoreError};
pub use crate::core::validate::{ValidationReport, Validator};
pub use crate::pipeline::{CurateError, Pipeline, PipelineReport, StageBars};
