use crate::core::hash::{DecodeError, open_image};
use crate::core::record::Table;
use crate::core::store::AssetStore;
use indicatif::ProgressBar;
use log::{info, warn};
use std::collections::HashSet;

#[derive(Debug)]
pub struct DroppedRow {
    pub id: String,
    pub reason: DecodeError,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub kept: usize,
    pub dropped: Vec<DroppedRow>,
}

impl ValidationReport {
    pub fn dropped_ids(&self) -> Vec<&str> {
        self.dropped.iter().map(|d| d.id.as_str()).collect()
    }
}

/// Drops rows whose image is missing or does not decode.
///
/// Only decodability is checked; file size is not.
pub struct Validator {
    store: AssetStore,
}

impl Validator {
    pub fn new(store: AssetStore) -> Self {
        Self { store }
    }

    pub fn validate(&self, table: &mut Table, progress: &ProgressBar) -> ValidationReport {
        progress.set_length(table.len() as u64);
        info!("Validating {} image(s)", table.len());

        let mut dropped = Vec::new();
        for record in table.records() {
            let opened = self
                .store
                .path_for(record)
                .map_err(DecodeError::from)
                .and_then(|path| open_image(&path));
            if let Err(reason) = opened {
                warn!("Error opening image for {}: {}", record.id, reason);
                dropped.push(DroppedRow {
                    id: record.id.to_string(),
                    reason,
                });
            }
            progress.inc(1);
        }

        {
            let dropped_ids: HashSet<&str> = dropped.iter().map(|d| d.id.as_str()).collect();
            table.retain(|record| !dropped_ids.contains(record.id.as_str()));
        }

        ValidationReport {
            kept: table.len(),
            dropped,
        }
    }
}
