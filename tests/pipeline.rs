use curatrs::core::record::ALTERNATIVES_DELIMITER;
use curatrs::pipeline::StageBars;
use curatrs::{
    AssetStore, CurateError, FetchError, Fetcher, HierarchyColumn, LabelTree, Pipeline, Record,
    StoreError, Table, build_trees,
};
use image::{ImageBuffer, ImageFormat, Rgb};
use std::collections::{BTreeSet, HashMap};
use std::io::Cursor;
use tempfile::TempDir;

struct StaticFetcher {
    bodies: HashMap<String, Vec<u8>>,
}

impl Fetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Request {
                url: url.to_string(),
                message: "connection refused".to_string(),
            })
    }
}

fn png_bytes(seed: u8) -> Vec<u8> {
    let img = ImageBuffer::from_fn(24, 24, |x, y| Rgb([seed, (x * 10) as u8, (y * 10) as u8]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn labels(value: Option<&str>) -> BTreeSet<&str> {
    value
        .map(|v| v.split(ALTERNATIVES_DELIMITER).collect())
        .unwrap_or_default()
}

#[test]
fn identical_images_merge_into_first_row() {
    let temp_dir = TempDir::new().unwrap();
    let same = png_bytes(42);
    let fetcher = StaticFetcher {
        bodies: HashMap::from([
            ("http://cdn/1".to_string(), same.clone()),
            ("http://cdn/2".to_string(), same.clone()),
            ("http://cdn/3".to_string(), same),
        ]),
    };
    let mut table = Table::new(vec![
        Record::new("row1", "MET")
            .with_url("http://cdn/1")
            .with_label(HierarchyColumn::Classifications, "X"),
        Record::new("row2", "MET")
            .with_url("http://cdn/2")
            .with_label(HierarchyColumn::Classifications, "Y"),
        Record::new("row3", "EUROPEANA").with_url("http://cdn/3"),
    ])
    .unwrap();

    let pipeline = Pipeline::new(AssetStore::new(temp_dir.path()), 4).unwrap();
    let report = pipeline.run(&mut table, &fetcher, &StageBars::hidden());

    assert_eq!(report.acquisition.fetched, 3);
    assert!(report.validation.dropped.is_empty());
    assert_eq!(table.ids(), vec!["row1"]);
    let survivor = table.get("row1").unwrap();
    assert_eq!(
        labels(survivor.classifications.as_deref()),
        BTreeSet::from(["X", "Y"])
    );
    assert_eq!(survivor.object_types, None);
    assert!(table.get("row2").is_none());
    assert!(table.get("row3").is_none());

    // Assets of merged rows stay on disk.
    let store = AssetStore::new(temp_dir.path());
    assert!(store.image_path("MET", "row2").unwrap().exists());
    assert!(store.image_path("EUROPEANA", "row3").unwrap().exists());
}

#[test]
fn failed_and_broken_downloads_are_dropped_not_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let fetcher = StaticFetcher {
        bodies: HashMap::from([
            ("http://cdn/a".to_string(), png_bytes(1)),
            ("http://cdn/b".to_string(), png_bytes(2)),
            ("http://cdn/html".to_string(), b"<html>moved</html>".to_vec()),
        ]),
    };
    let mut table = Table::new(vec![
        Record::new("a", "MET").with_url("http://cdn/a"),
        Record::new("gone", "MET").with_url("http://cdn/gone"),
        Record::new("html", "MET").with_url("http://cdn/html"),
        Record::new("b", "MET").with_url("http://cdn/b"),
    ])
    .unwrap();

    let pipeline = Pipeline::new(AssetStore::new(temp_dir.path()), 2).unwrap();
    let report = pipeline.run(&mut table, &fetcher, &StageBars::hidden());

    assert_eq!(report.acquisition.failed_ids(), vec!["gone"]);
    assert_eq!(report.validation.dropped_ids(), vec!["gone", "html"]);
    assert!(report.dedup.groups.is_empty());
    assert_eq!(table.ids(), vec!["a", "b"]);
}

#[test]
fn missing_root_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let result = Pipeline::new(AssetStore::new(temp_dir.path().join("absent")), 2);
    assert!(matches!(
        result,
        Err(CurateError::Store(StoreError::MissingRoot { .. }))
    ));
}

#[test]
fn merged_table_feeds_tree_builder() {
    let temp_dir = TempDir::new().unwrap();
    let same = png_bytes(9);
    let fetcher = StaticFetcher {
        bodies: HashMap::from([
            ("http://cdn/p".to_string(), same.clone()),
            ("http://cdn/q".to_string(), same),
        ]),
    };
    let mut table = Table::new(vec![
        Record::new("p", "MET")
            .with_url("http://cdn/p")
            .with_label(HierarchyColumn::ObjectTypes, "furniture | chair"),
        Record::new("q", "MET")
            .with_url("http://cdn/q")
            .with_label(HierarchyColumn::ObjectTypes, "furniture | table $ tool | chair"),
    ])
    .unwrap();

    let pipeline = Pipeline::new(AssetStore::new(temp_dir.path()), 2).unwrap();
    pipeline.run(&mut table, &fetcher, &StageBars::hidden());

    let trees = build_trees(&table);
    let object_types: &LabelTree = &trees["objectTypes"];
    assert_eq!(object_types.len(), 5);
    let furniture = object_types.find_path(&["furniture"]).unwrap();
    assert_eq!(object_types.child_labels(furniture), vec!["chair", "table"]);
    assert!(object_types.find_path(&["tool", "chair"]).is_some());
}
