use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use curatrs::config::CurateConfig;
use curatrs::{
    AssetStore, DedupReport, Deduplicator, Downloader, HttpFetcher, Pipeline, StageBars, Table,
    Validator, build_trees,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Serialize, Deserialize, Debug)]
struct MergeHistoryRecord {
    timestamp: String,
    hash: String,
    retained: String,
    merged: Vec<String>,
    annotations_identical: bool,
}

#[derive(Parser, Debug)]
#[command(name = "curatrs", version, about = "CLI for curating image datasets")]
struct Cli {
    /// TOML file with default settings
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct TableArgs {
    /// JSONL table, one record per line
    #[arg(short, long, value_name = "FILE")]
    table: PathBuf,
    /// Image root containing `<database>/images/<id>.jpg`
    #[arg(short, long, value_name = "DIR")]
    root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch images that are not yet on disk
    Download {
        #[command(flatten)]
        table: TableArgs,
        /// Concurrent downloads (default 12)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Drop rows whose image is missing or unreadable
    Validate {
        #[command(flatten)]
        table: TableArgs,
        /// Where to write the filtered table (default: `<table>.curated.jsonl`)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Merge rows whose images have identical pixels
    Dedupe {
        #[command(flatten)]
        table: TableArgs,
        /// Where to write the merged table (default: `<table>.curated.jsonl`)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Download, validate and dedupe in one go
    Run {
        #[command(flatten)]
        table: TableArgs,
        /// Concurrent downloads (default 12)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Where to write the curated table (default: `<table>.curated.jsonl`)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Print the label hierarchy of each annotation column
    Trees {
        /// JSONL table, one record per line
        #[arg(short, long, value_name = "FILE")]
        table: PathBuf,
        /// Show how many label paths pass through each node
        #[arg(long)]
        counts: bool,
    },

    /// Work with merge history
    History {
        #[command(subcommand)]
        command: HistoryCmd,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCmd {
    /// List all merge history records
    List {
        /// Image root holding `.merges.jsonl`
        #[arg(short, long, value_name = "DIR")]
        root: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let mut config = CurateConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Download { table, workers } => {
            let store = open_store(&mut config, table.root)?;
            if let Some(workers) = workers {
                config.workers = workers;
            }
            let rows = load_table(&table.table)?;
            println!(
                "▶ Downloading missing images for {} row(s) into {}",
                rows.len(),
                store.root().display()
            );

            let downloader = Downloader::new(store, config.workers)
                .context("Failed to start download workers")?;
            let fetcher = HttpFetcher::new(&config.user_agent);
            let bar = stage_bar("Downloading")?;
            let report = benchmark("downloading images", || {
                downloader.download_missing(&rows, &fetcher, &bar)
            });
            bar.finish_and_clear();

            println!(
                "✅ {} downloaded, {} already present, {} failed",
                report.fetched,
                report.skipped_existing,
                report.failed.len()
            );
            for failure in &report.failed {
                eprintln!("   ⚠️  {}: {}", failure.id, failure.error);
            }
        }

        Commands::Validate { table, output } => {
            let store = open_store(&mut config, table.root)?;
            let mut rows = load_table(&table.table)?;
            println!("▶ Validating {} image(s)", rows.len());

            let bar = stage_bar("Validating")?;
            let report = benchmark("validating images", || {
                Validator::new(store).validate(&mut rows, &bar)
            });
            bar.finish_and_clear();

            println!(
                "✅ {} row(s) kept, {} dropped",
                report.kept,
                report.dropped.len()
            );
            for dropped in &report.dropped {
                eprintln!("   🗑️  {}: {}", dropped.id, dropped.reason);
            }
            save_table(&rows, &output_path(&table.table, output))?;
        }

        Commands::Dedupe { table, output } => {
            let store = open_store(&mut config, table.root)?;
            let mut rows = load_table(&table.table)?;
            println!("▶ Detecting duplicates among {} row(s)", rows.len());

            let bar = stage_bar("Hashing")?;
            let report = benchmark("hashing and merging", || {
                Deduplicator::new(store.clone()).deduplicate(&mut rows, &bar)
            });
            bar.finish_and_clear();

            print_dedup_report(&report);
            if config.merge_log {
                append_history(store.root(), &report)?;
            }
            save_table(&rows, &output_path(&table.table, output))?;
        }

        Commands::Run {
            table,
            workers,
            output,
        } => {
            let store = open_store(&mut config, table.root)?;
            if let Some(workers) = workers {
                config.workers = workers;
            }
            let mut rows = load_table(&table.table)?;
            println!(
                "▶ Curating {} row(s) under {}",
                rows.len(),
                store.root().display()
            );

            let pipeline = Pipeline::new(store.clone(), config.workers)?;
            let fetcher = HttpFetcher::new(&config.user_agent);
            let bars = StageBars {
                acquire: stage_bar("Downloading")?,
                validate: stage_bar("Validating")?,
                dedup: stage_bar("Hashing")?,
            };
            let report = benchmark("full curation", || pipeline.run(&mut rows, &fetcher, &bars));

            println!(
                "✅ {} downloaded, {} download failure(s), {} invalid row(s) dropped",
                report.acquisition.fetched,
                report.acquisition.failed.len(),
                report.validation.dropped.len()
            );
            for failure in &report.acquisition.failed {
                eprintln!("   ⚠️  {}: {}", failure.id, failure.error);
            }
            for dropped in &report.validation.dropped {
                eprintln!("   🗑️  {}: {}", dropped.id, dropped.reason);
            }
            print_dedup_report(&report.dedup);
            if config.merge_log {
                append_history(store.root(), &report.dedup)?;
            }
            save_table(&rows, &output_path(&table.table, output))?;
        }

        Commands::Trees { table, counts } => {
            let rows = load_table(&table)?;
            for (category, tree) in build_trees(&rows) {
                println!(
                    "Tree for {}: number of total elements is {}",
                    category,
                    tree.len()
                );
                print!("{}", tree.render(counts));
                println!();
            }
        }

        Commands::History { command } => match command {
            HistoryCmd::List { root } => {
                if let Some(root) = root {
                    config.root = Some(root);
                }
                let root = config.asset_root()?;
                let history_file = root.join(".merges.jsonl");
                let f = File::open(&history_file)
                    .with_context(|| format!("Could not open history file {:?}", history_file))?;
                let reader = BufReader::new(f);

                println!("🗂️  Merge History:");
                for (i, line) in reader.lines().enumerate() {
                    let line = line?;
                    match serde_json::from_str::<MergeHistoryRecord>(&line) {
                        Ok(rec) => println!(
                            "[{}] {}\n     kept: {}\n     merged: {:?}\n     same annotations: {}\n",
                            i, rec.timestamp, rec.retained, rec.merged, rec.annotations_identical
                        ),
                        Err(err) => eprintln!("⚠️  Skipping malformed entry {}: {}", i, err),
                    }
                }
            }
        },
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut clog = colog::default_builder();
    clog.filter(None, level);
    clog.init();
}

/// Apply a `--root` override and check the directory exists.
fn open_store(config: &mut CurateConfig, root: Option<PathBuf>) -> Result<AssetStore> {
    if let Some(root) = root {
        config.root = Some(root);
    }
    let store = AssetStore::new(config.asset_root()?);
    store.ensure_root()?;
    Ok(store)
}

fn load_table(path: &Path) -> Result<Table> {
    Table::load_jsonl(path).with_context(|| format!("Failed to load table {:?}", path))
}

fn save_table(table: &Table, path: &Path) -> Result<()> {
    table
        .save_jsonl(path)
        .with_context(|| format!("Failed to write table {:?}", path))?;
    println!("💾 Wrote {} row(s) to {}", table.len(), path.display());
    Ok(())
}

fn output_path(input: &Path, output: Option<PathBuf>) -> PathBuf {
    output.unwrap_or_else(|| input.with_extension("curated.jsonl"))
}

fn stage_bar(message: &'static str) -> Result<ProgressBar> {
    let bar = ProgressBar::new(0);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
    )?);
    bar.set_message(message);
    Ok(bar)
}

fn print_dedup_report(report: &DedupReport) {
    if report.groups.is_empty() {
        println!("No duplicates found.");
    } else {
        println!("Found {} duplicate group(s):", report.groups.len());
        for (i, group) in report.groups.iter().enumerate() {
            println!("\n✨ Group {}:", i + 1);
            println!("   🏆 Keeping → {}", group.primary);
            for id in &group.secondaries {
                println!("   🔀 Merged  ← {}", id);
            }
            if !group.annotations_identical {
                println!("   📝 annotations differed ({} column conflict(s))", group.conflicts);
            }
        }
    }
    if !report.unhashable.is_empty() {
        println!(
            "\n⚠️  {} row(s) could not be hashed and were left as is",
            report.unhashable.len()
        );
    }
}

fn append_history(root: &Path, report: &DedupReport) -> Result<()> {
    if report.groups.is_empty() {
        return Ok(());
    }
    let history_file = root.join(".merges.jsonl");
    let mut history_out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&history_file)
        .with_context(|| format!("Failed to open history file {:?}", history_file))?;

    for group in &report.groups {
        let record = MergeHistoryRecord {
            timestamp: Utc::now().to_rfc3339(),
            hash: group.hash.to_string(),
            retained: group.primary.clone(),
            merged: group.secondaries.clone(),
            annotations_identical: group.annotations_identical,
        };
        writeln!(history_out, "{}", serde_json::to_string(&record)?)?;
    }
    println!("\n✅ Recorded merge history in {}", history_file.display());
    Ok(())
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
