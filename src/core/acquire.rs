use crate::core::record::{Record, Table};
use crate::core::store::{AssetStore, StoreError};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::ffi::OsString;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_WORKERS: usize = 12;
pub const DEFAULT_USER_AGENT: &str = concat!("curatrs/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Record {id} has no source URL")]
    MissingUrl { id: String },

    #[error("Request for {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid image location: {0}")]
    Location(#[from] StoreError),
}

/// Retrieves the bytes behind a source URL.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Plain blocking HTTP(S) GET. No retries and no timeouts beyond the
/// transport defaults.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().user_agent(user_agent).build(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_USER_AGENT)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|err| FetchError::Request {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        let mut body = Vec::new();
        response.into_reader().read_to_end(&mut body)?;
        Ok(body)
    }
}

#[derive(Debug, Clone)]
struct DownloadTask {
    id: String,
    url: Option<String>,
    target: PathBuf,
}

#[derive(Debug)]
pub struct FetchFailure {
    pub id: String,
    pub url: Option<String>,
    pub error: FetchError,
}

#[derive(Debug, Default)]
pub struct AcquisitionReport {
    pub fetched: usize,
    pub skipped_existing: usize,
    pub failed: Vec<FetchFailure>,
}

impl AcquisitionReport {
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.id.as_str()).collect()
    }
}

/// Fetches images that are not yet in the asset store on a fixed-width
/// worker pool.
pub struct Downloader {
    store: AssetStore,
    pool: ThreadPool,
    workers: usize,
}

impl Downloader {
    pub fn new(store: AssetStore, workers: usize) -> Result<Self, ThreadPoolBuildError> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("curatrs-fetch-{}", i))
            .build()?;
        Ok(Self {
            store,
            pool,
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Download every missing asset referenced by `table`.
    ///
    /// Existing files are never touched. Each task succeeds or fails on its
    /// own; failures are collected in the report and never abort the batch.
    /// Returns once every task has finished.
    pub fn download_missing(
        &self,
        table: &Table,
        fetcher: &dyn Fetcher,
        progress: &ProgressBar,
    ) -> AcquisitionReport {
        let (tasks, skipped_existing, rejected) = self.plan(table.records());
        progress.set_length(tasks.len() as u64);
        info!(
            "Fetching {} missing image(s) with {} worker(s), {} already present",
            tasks.len(),
            self.workers,
            skipped_existing
        );

        let outcomes: Vec<(DownloadTask, Result<(), FetchError>)> = self.pool.install(|| {
            tasks
                .into_par_iter()
                .map(|task| {
                    let result = fetch_into(&task, fetcher);
                    match &result {
                        Ok(()) => debug!("Image {} downloaded", task.target.display()),
                        Err(err) => warn!("Error downloading image {}: {}", task.target.display(), err),
                    }
                    progress.inc(1);
                    (task, result)
                })
                .collect()
        });

        let mut report = AcquisitionReport {
            skipped_existing,
            failed: rejected,
            ..Default::default()
        };
        for (task, result) in outcomes {
            match result {
                Ok(()) => report.fetched += 1,
                Err(error) => report.failed.push(FetchFailure {
                    id: task.id,
                    url: task.url,
                    error,
                }),
            }
        }
        report
    }

    /// Split records into download tasks, files already on disk, and records
    /// whose id or database cannot name a file under the root.
    fn plan(&self, records: &[Record]) -> (Vec<DownloadTask>, usize, Vec<FetchFailure>) {
        let mut tasks = Vec::new();
        let mut skipped = 0;
        let mut rejected = Vec::new();
        for record in records {
            let target = match self.store.path_for(record) {
                Ok(target) => target,
                Err(err) => {
                    warn!("Not downloading {}: {}", record.id, err);
                    rejected.push(FetchFailure {
                        id: record.id.to_string(),
                        url: record.source_url.clone(),
                        error: err.into(),
                    });
                    continue;
                }
            };
            if target.exists() {
                skipped += 1;
                continue;
            }
            tasks.push(DownloadTask {
                id: record.id.to_string(),
                url: record.source_url.clone(),
                target,
            });
        }
        (tasks, skipped, rejected)
    }
}

fn fetch_into(task: &DownloadTask, fetcher: &dyn Fetcher) -> Result<(), FetchError> {
    let url = task
        .url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| FetchError::MissingUrl {
            id: task.id.clone(),
        })?;
    let bytes = fetcher.fetch(url)?;

    if let Some(parent) = task.target.parent() {
        fs::create_dir_all(parent)?;
    }
    let part = part_path(&task.target);
    let written = fs::write(&part, &bytes).and_then(|_| fs::rename(&part, &task.target));
    if let Err(err) = written {
        let _ = fs::remove_file(&part);
        return Err(err.into());
    }
    Ok(())
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;
    use walkdir::WalkDir;

    struct MapFetcher {
        bodies: HashMap<String, Vec<u8>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
    }

    impl MapFetcher {
        fn new(bodies: &[(&str, &str)]) -> Self {
            Self {
                bodies: bodies
                    .iter()
                    .map(|(url, body)| (url.to_string(), body.as_bytes().to_vec()))
                    .collect(),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    impl Fetcher for MapFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Request {
                    url: url.to_string(),
                    message: "404 Not Found".to_string(),
                })
        }
    }

    fn files_under(dir: &Path) -> BTreeSet<PathBuf> {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect()
    }

    #[test]
    fn test_downloads_missing_and_skips_existing() {
        let temp_dir = TempDir::new().unwrap();
        let store = AssetStore::new(temp_dir.path());
        let table = Table::new(vec![
            Record::new("a", "MET").with_url("http://img/a"),
            Record::new("b", "EUROPEANA").with_url("http://img/b"),
        ])
        .unwrap();

        let existing = store.image_path("MET", "a").unwrap();
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"already here").unwrap();

        let fetcher = MapFetcher::new(&[("http://img/a", "new a"), ("http://img/b", "b bytes")]);
        let downloader = Downloader::new(store.clone(), 4).unwrap();
        let report = downloader.download_missing(&table, &fetcher, &ProgressBar::hidden());

        assert_eq!(report.fetched, 1);
        assert_eq!(report.skipped_existing, 1);
        assert!(report.failed.is_empty());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read(&existing).unwrap(), b"already here");
        assert_eq!(fs::read(store.image_path("EUROPEANA", "b").unwrap()).unwrap(), b"b bytes");
    }

    #[test]
    fn test_second_run_fetches_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = AssetStore::new(temp_dir.path());
        let table = Table::new(vec![
            Record::new("a", "MET").with_url("http://img/a"),
            Record::new("b", "MET").with_url("http://img/b"),
            Record::new("c", "MET").with_url("http://img/missing"),
        ])
        .unwrap();
        let fetcher = MapFetcher::new(&[("http://img/a", "a"), ("http://img/b", "b")]);
        let downloader = Downloader::new(store, 2).unwrap();

        let first = downloader.download_missing(&table, &fetcher, &ProgressBar::hidden());
        let after_first = files_under(temp_dir.path());
        let calls_after_first = fetcher.calls.load(Ordering::SeqCst);

        let second = downloader.download_missing(&table, &fetcher, &ProgressBar::hidden());
        let after_second = files_under(temp_dir.path());

        assert_eq!(first.fetched, 2);
        assert_eq!(second.fetched, 0);
        assert_eq!(second.skipped_existing, 2);
        // Only the record that failed the first time is attempted again.
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), calls_after_first + 1);
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_failures_are_isolated_and_leave_no_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = AssetStore::new(temp_dir.path());
        let table = Table::new(vec![
            Record::new("ok", "MET").with_url("http://img/ok"),
            Record::new("broken", "MET").with_url("http://img/broken"),
            Record::new("nourl", "MET"),
            Record::new("blank", "MET").with_url("  "),
        ])
        .unwrap();
        let fetcher = MapFetcher::new(&[("http://img/ok", "fine")]);
        let downloader = Downloader::new(store.clone(), 3).unwrap();

        let report = downloader.download_missing(&table, &fetcher, &ProgressBar::hidden());

        assert_eq!(report.fetched, 1);
        let mut failed = report.failed_ids();
        failed.sort();
        assert_eq!(failed, vec!["blank", "broken", "nourl"]);
        assert!(
            report
                .failed
                .iter()
                .filter(|f| f.id != "broken")
                .all(|f| matches!(f.error, FetchError::MissingUrl { .. }))
        );

        let files = files_under(temp_dir.path());
        assert_eq!(files.len(), 1);
        assert!(files.contains(&store.image_path("MET", "ok").unwrap()));
    }

    #[test]
    fn test_pool_width_bounds_concurrency() {
        let temp_dir = TempDir::new().unwrap();
        let store = AssetStore::new(temp_dir.path());
        let records: Vec<Record> = (0..10)
            .map(|i| Record::new(format!("r{}", i), "MET").with_url("http://img/same"))
            .collect();
        let table = Table::new(records).unwrap();
        let fetcher =
            MapFetcher::new(&[("http://img/same", "x")]).with_delay(Duration::from_millis(20));
        let downloader = Downloader::new(store, 2).unwrap();

        let report = downloader.download_missing(&table, &fetcher, &ProgressBar::hidden());

        assert_eq!(report.fetched, 10);
        assert!(fetcher.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_unsafe_ids_are_not_fetched() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir(&root).unwrap();
        let table = Table::new(vec![
            Record::new("../../../escaped", "MET").with_url("http://img/x"),
            Record::new("fine", "MET").with_url("http://img/x"),
        ])
        .unwrap();
        let fetcher = MapFetcher::new(&[("http://img/x", "x")]);
        let downloader = Downloader::new(AssetStore::new(&root), 2).unwrap();

        let report = downloader.download_missing(&table, &fetcher, &ProgressBar::hidden());

        assert_eq!(report.fetched, 1);
        assert_eq!(report.failed_ids(), vec!["../../../escaped"]);
        assert!(matches!(report.failed[0].error, FetchError::Location(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        let files = files_under(temp_dir.path());
        assert_eq!(files.len(), 1);
        assert!(files.iter().all(|path| path.starts_with(&root)));
    }

    #[test]
    fn test_failed_rename_removes_part_file() {
        let temp_dir = TempDir::new().unwrap();
        // A non-empty directory at the target makes the final rename fail.
        let target = temp_dir.path().join("MET/images/a.jpg");
        fs::create_dir_all(target.join("occupied")).unwrap();
        let task = DownloadTask {
            id: "a".to_string(),
            url: Some("http://img/a".to_string()),
            target: target.clone(),
        };
        let fetcher = MapFetcher::new(&[("http://img/a", "bytes")]);

        let result = fetch_into(&task, &fetcher);

        assert!(matches!(result, Err(FetchError::Io(_))));
        assert!(!part_path(&target).exists());
        assert!(target.is_dir());
    }

    #[test]
    fn test_part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/r/MET/images/a.b.jpg")),
            PathBuf::from("/r/MET/images/a.b.jpg.part")
        );
    }
}
