//! agentwal CLI
//!
//! Inspect, replay and truncate a WAL storage directory.

use std::collections::BTreeMap;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use agentwal::wal::{self, Record, RecordType};
use agentwal::{Config, Storage};

/// agentwal CLI
#[derive(Parser, Debug)]
#[command(name = "agentwal-cli")]
#[command(about = "Inspect and maintain an agent WAL storage directory")]
#[command(version)]
struct Args {
    /// Data directory (the log lives in <data-dir>/wal)
    #[arg(short, long, default_value = "./agentwal_data")]
    data_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read the log and print record counts
    Inspect,

    /// Open the storage (replaying and repairing the log) and print replay stats
    Replay,

    /// Garbage collect series older than a timestamp and checkpoint the log
    Truncate {
        /// Minimum timestamp (milliseconds) to keep
        #[arg(long)]
        mint: i64,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,agentwal=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    let config = Config::builder().data_dir(&args.data_dir).build();

    let result = match args.command {
        Commands::Inspect => inspect(&config),
        Commands::Replay => replay(config),
        Commands::Truncate { mint } => truncate(config, mint),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn inspect(config: &Config) -> agentwal::Result<()> {
    let dir = config.wal_dir();
    let range = wal::segments(&dir)?;
    let checkpoint = wal::last_checkpoint(&dir)?;
    let records = wal::read_all(&dir)?;

    let mut counts: BTreeMap<u8, (RecordType, usize, usize)> = BTreeMap::new();
    for record in &records {
        let record_type = record.record_type();
        let entry = counts
            .entry(record_type as u8)
            .or_insert((record_type, 0, 0));
        entry.1 += 1;
        entry.2 += record.len();
    }

    println!("WAL directory: {}", dir.display());
    match range {
        Some((first, last)) => println!("Segments: {}..={}", first, last),
        None => println!("Segments: none"),
    }
    match checkpoint {
        Some((_, index)) => println!("Checkpoint: {}", index),
        None => println!("Checkpoint: none"),
    }
    println!("Records: {}", records.len());
    for (record_type, count, entries) in counts.values() {
        println!("  {:?}: {} records, {} entries", record_type, count, entries);
    }

    let series: usize = records
        .iter()
        .filter_map(|r| match r {
            Record::Series(s) => Some(s.len()),
            _ => None,
        })
        .sum();
    let samples: usize = records
        .iter()
        .filter_map(|r| match r {
            Record::Samples(s) => Some(s.len()),
            _ => None,
        })
        .sum();
    println!("Series records: {}, samples: {}", series, samples);
    Ok(())
}

fn replay(config: Config) -> agentwal::Result<()> {
    let storage = Storage::open(config)?;
    let stats = storage.replay_stats();

    println!("Checkpoint: {:?}", stats.checkpoint);
    println!("Segments replayed: {}", stats.segments_replayed);
    println!("Series created: {}", stats.series_created);
    println!("Duplicate series: {}", stats.duplicate_series);
    println!("Samples replayed: {}", stats.samples_replayed);
    println!("Samples for unknown series: {}", stats.unknown_series_samples);
    println!("Tombstones applied: {}", stats.tombstones_applied);
    if let Some(repair) = &stats.repaired {
        println!(
            "Repaired: segment {} truncated at offset {} ({} later segments deleted)",
            repair.segment, repair.offset, repair.segments_deleted
        );
    }
    println!("Active series: {}", storage.series_count());

    storage.close()
}

fn truncate(config: Config, mint: i64) -> agentwal::Result<()> {
    let storage = Storage::open(config)?;
    let before = storage.series_count();
    storage.truncate(mint)?;
    println!(
        "Active series: {} -> {}, tracked deleted series: {}",
        before,
        storage.series_count(),
        storage.deleted_series().len()
    );
    storage.close()
}
