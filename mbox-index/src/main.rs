//! Command-line front end
//!
//! # Usage
//!
//! ```bash
//! # Index an archive (writes all.mbox.idx next to it)
//! mbox-index build all.mbox
//!
//! # Is the index still valid?
//! mbox-index status all.mbox
//!
//! # Print message 42 without its envelope line
//! mbox-index show all.mbox 42
//!
//! # Messages of one thread, or from one domain within a time window
//! mbox-index query all.mbox --group 1847237176990937209
//! mbox-index query all.mbox --domain example.com --since 2024-01-01 --until 2024-06-30
//!
//! # Export every message as .eml plus a SQLite summary table
//! mbox-index export all.mbox --output out --workers 8 --strategy grouping-key
//! ```

use chrono::{DateTime, NaiveDate};
use clap::{Parser, Subcommand};
use mbox_index::config::{Config, LoggingConfig};
use mbox_index::dedup;
use mbox_index::distributor::PartitionStrategy;
use mbox_index::error::{MboxError, Result};
use mbox_index::index::{is_stale, load_index, Index, IndexFormat, IndexStore};
use mbox_index::pipeline::Pipeline;
use mbox_index::processor::EmlExportProcessor;
use mbox_index::reader::MmapReader;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mbox-index")]
#[command(about = "Index and process large mbox archives", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./config.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Index file (defaults next to the archive)
    #[arg(short, long, global = true)]
    index: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan an archive and write its index
    Build {
        archive: PathBuf,
        /// Index encoding
        #[arg(short, long)]
        format: Option<IndexFormat>,
    },
    /// Report whether the index still matches the archive
    Status { archive: PathBuf },
    /// Print one message
    Show {
        archive: PathBuf,
        id: u32,
        /// Include the envelope line
        #[arg(long)]
        raw: bool,
    },
    /// List messages matching key and time filters
    Query {
        archive: PathBuf,
        /// Grouping key (thread id)
        #[arg(long)]
        group: Option<String>,
        /// Sender domain
        #[arg(long)]
        domain: Option<String>,
        /// Start of time window (RFC 3339, YYYY-MM-DD or epoch seconds)
        #[arg(long)]
        since: Option<String>,
        /// End of time window, inclusive
        #[arg(long)]
        until: Option<String>,
    },
    /// Print index statistics as JSON
    Stats { archive: PathBuf },
    /// List duplicate messages
    Duplicates {
        archive: PathBuf,
        /// Compare full content instead of trusting digests
        #[arg(long)]
        confirm: bool,
    },
    /// Export messages as .eml files plus a summary table
    Export {
        archive: PathBuf,
        /// Output directory
        #[arg(short, long)]
        output: Option<String>,
        /// Summary database URL
        #[arg(long)]
        db: Option<String>,
        /// Worker count (0 = available parallelism)
        #[arg(short, long)]
        workers: Option<usize>,
        #[arg(short, long)]
        strategy: Option<PartitionStrategy>,
        /// Rebuild the index first if it is missing or stale
        #[arg(long)]
        rebuild: bool,
    },
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None if Path::new("config.toml").exists() => Config::from_file("config.toml")?,
        None => Config::default(),
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    init_logging(&config.logging);

    if let Err(e) = run(cli, config).await {
        error!("{}", e);
        if e.needs_rebuild() {
            eprintln!("Hint: run `mbox-index build <archive>` to rebuild the index");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("mbox_index={}", logging.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli, mut config: Config) -> Result<()> {
    let index_for = |archive: &Path, config: &Config| -> PathBuf {
        cli.index.clone().unwrap_or_else(|| config.index_path(archive))
    };

    match cli.command {
        Commands::Build { ref archive, format } => {
            if let Some(format) = format {
                config.index.format = format;
            }
            let index_path = index_for(archive, &config);
            let index = IndexStore::from_config(&config).build(archive, &index_path).await?;
            println!("✓ Indexed {} messages into {}", index.len(), index_path.display());
        }
        Commands::Status { ref archive } => {
            let index_path = index_for(archive, &config);
            match load_index(&index_path).await {
                Ok(index) if is_stale(archive, &index) => {
                    println!("stale: {} no longer matches {}", index_path.display(), archive.display());
                    std::process::exit(2);
                }
                Ok(index) => {
                    println!("fresh: {} messages (format v{})", index.len(), index.version());
                }
                Err(MboxError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    println!("missing: no index at {}", index_path.display());
                    std::process::exit(2);
                }
                Err(e) => return Err(e),
            }
        }
        Commands::Show { ref archive, id, raw } => {
            let index = fresh_index(archive, &index_for(archive, &config)).await?;
            let reader = MmapReader::open_verified(archive, &index)?;
            let message = reader.read_entry(index.lookup_by_id(id)?)?;
            let bytes = if raw { message.bytes() } else { message.content() };
            std::io::stdout().write_all(bytes)?;
        }
        Commands::Query {
            ref archive,
            ref group,
            ref domain,
            ref since,
            ref until,
        } => {
            let index = fresh_index(archive, &index_for(archive, &config)).await?;

            let mut selections: Vec<Vec<u32>> = Vec::new();
            if let Some(group) = group {
                selections.push(index.lookup_by_grouping_key(group));
            }
            if let Some(domain) = domain {
                selections.push(index.lookup_by_secondary_key(domain));
            }
            if since.is_some() || until.is_some() {
                let start = since
                    .as_deref()
                    .map(|value| parse_time(value, false))
                    .transpose()?
                    .unwrap_or(i64::MIN);
                let end = until
                    .as_deref()
                    .map(|value| parse_time(value, true))
                    .transpose()?
                    .unwrap_or(i64::MAX);
                selections.push(index.lookup_by_time_range(start, end));
            }

            for id in intersect(selections, &index) {
                let entry = index.lookup_by_id(id)?;
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    entry.id,
                    entry.byte_offset,
                    entry.byte_length,
                    entry.grouping_key.as_deref().unwrap_or("-"),
                    entry.secondary_key.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Stats { ref archive } => {
            let index_path = index_for(archive, &config);
            let index = load_index(&index_path).await?;
            let report = serde_json::json!({
                "index": index_path.display().to_string(),
                "index_file_bytes": tokio::fs::metadata(&index_path).await?.len(),
                "format_version": index.version(),
                "stale": is_stale(archive, &index),
                "entries": index.stats(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Duplicates { ref archive, confirm } => {
            let index = fresh_index(archive, &index_for(archive, &config)).await?;
            let mut groups = dedup::find_duplicates(&index);
            if confirm {
                let reader = MmapReader::open_verified(archive, &index)?;
                groups = dedup::confirm(&reader, &index, &groups)?;
            }
            for group in &groups {
                println!("{:016x}\t{:?}", group.content_digest, group.ids);
            }
            println!(
                "{} groups, {} duplicate messages",
                groups.len(),
                dedup::duplicate_count(&groups)
            );
        }
        Commands::Export {
            ref archive,
            output,
            db,
            workers,
            strategy,
            rebuild,
        } => {
            if let Some(output) = output {
                config.output.database_url = db
                    .clone()
                    .unwrap_or_else(|| format!("sqlite://{}/results.db", output));
                config.output.dir = output;
            } else if let Some(db) = db {
                config.output.database_url = db;
            }
            if let Some(workers) = workers {
                config.workers.count = workers;
            }
            if let Some(strategy) = strategy {
                config.workers.strategy = strategy;
            }
            config.validate()?;

            let index_path = index_for(archive, &config);
            if rebuild {
                IndexStore::from_config(&config)
                    .load_or_build(archive, &index_path)
                    .await?;
            }

            tokio::fs::create_dir_all(&config.output.dir).await?;
            let stats = Pipeline::new(config, archive)
                .with_index_path(index_path)
                .process(EmlExportProcessor::new())
                .await?;

            info!("Export complete");
            println!("{}", serde_json::to_string_pretty(&stats)?);
            if !stats.is_complete_success() {
                std::process::exit(3);
            }
        }
    }

    Ok(())
}

async fn fresh_index(archive: &Path, index_path: &Path) -> Result<Index> {
    let index = load_index(index_path).await?;
    if is_stale(archive, &index) {
        return Err(MboxError::StaleIndex(format!(
            "{} no longer matches {}",
            index_path.display(),
            archive.display()
        )));
    }
    Ok(index)
}

/// Ids present in every selection; all ids when there is none
fn intersect(selections: Vec<Vec<u32>>, index: &Index) -> Vec<u32> {
    let mut selections = selections.into_iter();
    let Some(mut result) = selections.next() else {
        return (0..index.len() as u32).collect();
    };
    for other in selections {
        result.retain(|id| other.binary_search(id).is_ok());
    }
    result
}

/// Epoch seconds from epoch, RFC 3339 or a bare date
///
/// A bare date covers the whole day: its first second as a start bound,
/// its last second as an inclusive end bound.
fn parse_time(value: &str, end_of_day: bool) -> Result<i64> {
    if let Ok(epoch) = value.parse::<i64>() {
        return Ok(epoch);
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Ok(datetime.timestamp());
    }
    let (hour, minute, second) = if end_of_day { (23, 59, 59) } else { (0, 0, 0) };
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .map(|datetime| datetime.and_utc().timestamp())
        .ok_or_else(|| MboxError::InvalidConfiguration(format!("cannot parse time: {}", value)))
}
