use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rtindex::models::file::CONTENT_FIELD;
use rtindex::{
    Analyzer, FileInterpreter, IndexConfig, IndexProfile, IndexSystem, IndexableInterpreter, Tokenizer,
    UpdateEvent,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rtindex")]
#[command(about = "Real-time searchable file index", long_about = None)]
struct Args {
    /// Performance profile (low-latency, balanced, high-throughput)
    #[arg(long, env = "RTINDEX_PROFILE", default_value = "balanced", global = true)]
    profile: String,

    /// Write straight to disk instead of staging in memory
    #[arg(long, global = true)]
    no_realtime: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index every file below a directory
    Index {
        index_dir: PathBuf,
        source_dir: PathBuf,
        /// Uid given to the first file
        #[arg(long, default_value = "0")]
        first_uid: u64,
        /// Seconds to wait for the disk flush
        #[arg(long, default_value = "300")]
        timeout: u64,
    },
    /// Count live documents containing a term
    Count { index_dir: PathBuf, term: String },
    /// Print index statistics as JSON
    Stats { index_dir: PathBuf },
    /// Merge the disk index down to a number of segments
    Optimize {
        index_dir: PathBuf,
        #[arg(long, default_value = "1")]
        segments: usize,
    },
    /// Delete all indexed data
    Purge { index_dir: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let profile = IndexProfile::parse(&args.profile).unwrap_or_else(|| {
        warn!("Unknown profile '{}', using 'balanced'", args.profile);
        IndexProfile::Balanced
    });
    let configure = |dir: &Path| {
        IndexConfig::new(dir)
            .with_profile(profile.clone())
            .with_realtime(!args.no_realtime)
    };

    match args.command {
        Command::Index {
            index_dir,
            source_dir,
            first_uid,
            timeout,
        } => {
            let mut files = Vec::new();
            collect_files(&source_dir, &mut files)
                .with_context(|| format!("walking {}", source_dir.display()))?;
            files.sort();

            let system = IndexSystem::open(configure(&index_dir), files_from(first_uid))?;
            system.start()?;

            let started = Instant::now();
            let base = system.current_disk_version() + 1;
            let events: Vec<_> = files
                .into_iter()
                .enumerate()
                .map(|(i, path)| UpdateEvent::new(base + i as u64, path))
                .collect();
            let count = events.len();
            let batch = system.config().consumer_batch_size;
            let mut pending = events;
            while !pending.is_empty() {
                let rest = pending.split_off(pending.len().min(batch));
                system.consume(std::mem::replace(&mut pending, rest))?;
            }
            system
                .flush_events(Duration::from_secs(timeout))
                .context("flushing to disk")?;
            info!(
                "Indexed {} files in {:?} (disk version {})",
                count,
                started.elapsed(),
                system.current_disk_version()
            );
            system.shutdown();
        }
        Command::Count { index_dir, term } => {
            let config = configure(&index_dir);
            let analyzer = Tokenizer::new(&config.analyzer);
            let system = IndexSystem::open(config, files_from(0))?;
            let Some(analyzed) = analyzer.analyze_term(&term) else {
                anyhow::bail!("'{}' has no indexable terms", term);
            };
            let snapshot = system.acquire_readers();
            println!("{}", snapshot.term_doc_count(CONTENT_FIELD, &analyzed));
        }
        Command::Stats { index_dir } => {
            let system = IndexSystem::open(configure(&index_dir), files_from(0))?;
            println!("{}", serde_json::to_string_pretty(&system.admin().stats())?);
        }
        Command::Optimize { index_dir, segments } => {
            let system = IndexSystem::open(configure(&index_dir), files_from(0))?;
            let merged = system.admin().optimize(segments)?;
            info!(
                "Optimize {} ({} segments)",
                if merged { "merged" } else { "had nothing to do" },
                system.admin().disk_segment_count()
            );
        }
        Command::Purge { index_dir } => {
            let system = IndexSystem::open(configure(&index_dir), files_from(0))?;
            system.purge_index()?;
            info!("Purged {}", index_dir.display());
        }
    }

    Ok(())
}

fn files_from(first_uid: u64) -> Arc<dyn IndexableInterpreter<PathBuf>> {
    Arc::new(FileInterpreter::new(first_uid))
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}
