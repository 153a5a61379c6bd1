// Exact-duplicate detection and annotation merge.
//
// Pass A hashes every record's decoded pixels in table order. Pass B buckets
// records by hash; the first record of each bucket is the primary, every later
// one is folded into it column by column and then removed from the table.

use crate::core::hash::{ContentHash, DecodeError, compute_content_hash};
use crate::core::record::{ALTERNATIVES_DELIMITER, HierarchyColumn, Table};
use crate::core::store::AssetStore;
use indicatif::ProgressBar;
use log::{debug, info};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Union two annotation values.
///
/// An absent side yields the other side. Otherwise both are split on
/// `" $ "` and the distinct label paths are rejoined, `current` ones first.
pub fn union_labels(current: Option<&str>, incoming: Option<&str>) -> Option<String> {
    match (current, incoming) {
        (None, None) => None,
        (Some(value), None) | (None, Some(value)) => Some(value.to_string()),
        (Some(current), Some(incoming)) => {
            let mut seen = HashSet::new();
            let merged: Vec<&str> = current
                .split(ALTERNATIVES_DELIMITER)
                .chain(incoming.split(ALTERNATIVES_DELIMITER))
                .filter(|path| seen.insert(*path))
                .collect();
            Some(merged.join(ALTERNATIVES_DELIMITER))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub hash: ContentHash,
    pub primary: String,
    pub secondaries: Vec<String>,
    /// Whether every member had the same classification/object type/subject
    /// text. Informational only; merging does not depend on it.
    pub annotations_identical: bool,
    /// Column merges where both sides held different values.
    pub conflicts: usize,
}

#[derive(Debug)]
pub struct SkippedRecord {
    pub id: String,
    pub reason: DecodeError,
}

#[derive(Debug, Default)]
pub struct DedupReport {
    pub hashed: usize,
    pub groups: Vec<GroupReport>,
    pub unhashable: Vec<SkippedRecord>,
}

impl DedupReport {
    pub fn removed(&self) -> usize {
        self.groups.iter().map(|g| g.secondaries.len()).sum()
    }

    pub fn removed_ids(&self) -> Vec<&str> {
        self.groups
            .iter()
            .flat_map(|g| g.secondaries.iter().map(String::as_str))
            .collect()
    }
}

struct HashedRecord {
    index: usize,
    hash: ContentHash,
    digest: String,
}

pub struct Deduplicator {
    store: AssetStore,
    columns: Vec<HierarchyColumn>,
}

impl Deduplicator {
    pub fn new(store: AssetStore) -> Self {
        Self {
            store,
            columns: HierarchyColumn::ALL.to_vec(),
        }
    }

    /// Restrict merging to `columns`. Other hierarchy columns keep the
    /// primary's value.
    pub fn with_columns(mut self, columns: &[HierarchyColumn]) -> Self {
        self.columns = columns.to_vec();
        self
    }

    pub fn deduplicate(&self, table: &mut Table, progress: &ProgressBar) -> DedupReport {
        progress.set_length(table.len() as u64);
        info!("Detecting duplicates among {} record(s)", table.len());

        let mut report = DedupReport::default();
        let hashed = self.hash_records(table, progress, &mut report);
        report.hashed = hashed.len();

        for members in group_by_hash(&hashed) {
            let group = self.merge_group(table, &members);
            debug!(
                "Merged {} duplicate(s) into {} (annotations identical: {})",
                group.secondaries.len(),
                group.primary,
                group.annotations_identical
            );
            report.groups.push(group);
        }

        let removed: HashSet<String> = report
            .removed_ids()
            .into_iter()
            .map(str::to_string)
            .collect();
        table.retain(|record| !removed.contains(record.id.as_str()));

        info!(
            "Removed {} duplicate(s) across {} group(s), {} record(s) could not be hashed",
            removed.len(),
            report.groups.len(),
            report.unhashable.len()
        );
        report
    }

    fn hash_records(
        &self,
        table: &Table,
        progress: &ProgressBar,
        report: &mut DedupReport,
    ) -> Vec<HashedRecord> {
        let mut hashed = Vec::with_capacity(table.len());
        for (index, record) in table.records().iter().enumerate() {
            let hash = self
                .store
                .path_for(record)
                .map_err(DecodeError::from)
                .and_then(|path| compute_content_hash(&path));
            match hash {
                Ok(hash) => hashed.push(HashedRecord {
                    index,
                    hash,
                    digest: record.annotation_digest(),
                }),
                Err(reason) => {
                    debug!("Skipping {} during hashing: {}", record.id, reason);
                    report.unhashable.push(SkippedRecord {
                        id: record.id.to_string(),
                        reason,
                    });
                }
            }
            progress.inc(1);
        }
        hashed
    }

    /// Left-fold every secondary into the primary in table order.
    fn merge_group(&self, table: &mut Table, members: &[&HashedRecord]) -> GroupReport {
        let first = members[0];
        let annotations_identical = members[1..].iter().all(|m| m.digest == first.digest);

        let records = table.records_mut();
        let primary = first.index;
        let mut conflicts = 0;
        for secondary in &members[1..] {
            for column in &self.columns {
                let current = column.get(&records[primary]);
                let incoming = column.get(&records[secondary.index]);
                if let (Some(a), Some(b)) = (current, incoming) {
                    if a != b {
                        conflicts += 1;
                        debug!(
                            "{} differs between {} and {}; taking the union",
                            column.column_name(),
                            records[primary].id,
                            records[secondary.index].id
                        );
                    }
                }
                let merged = union_labels(current, incoming);
                column.set(&mut records[primary], merged);
            }
        }

        GroupReport {
            hash: first.hash.clone(),
            primary: records[primary].id.to_string(),
            secondaries: members[1..]
                .iter()
                .map(|m| records[m.index].id.to_string())
                .collect(),
            annotations_identical,
            conflicts,
        }
    }
}

/// Buckets with two or more members, in order of first appearance. Members
/// keep table order.
fn group_by_hash(hashed: &[HashedRecord]) -> Vec<Vec<&HashedRecord>> {
    let mut slots: HashMap<&ContentHash, usize> = HashMap::new();
    let mut buckets: Vec<Vec<&HashedRecord>> = Vec::new();
    for record in hashed {
        let slot = *slots.entry(&record.hash).or_insert_with(|| {
            buckets.push(Vec::new());
            buckets.len() - 1
        });
        buckets[slot].push(record);
    }
    buckets.into_iter().filter(|b| b.len() > 1).collect()
}
