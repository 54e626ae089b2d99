use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use mvccstore::{ExpandingShardLocator, ShardLocator};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "shard-plan")]
#[command(about = "Inspect key placement before changing shard bucket counts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Keys per bucket for one bucket count
    Distribution {
        #[arg(long)]
        buckets: u32,
        #[command(flatten)]
        keys: KeySource,
    },
    /// Keys that move and probe fan-out when a new bucket count is added
    Expand {
        /// Historical bucket counts, most recent first (e.g. 8,4)
        #[arg(long, value_delimiter = ',')]
        current: Vec<u32>,
        #[arg(long)]
        proposed: u32,
        #[command(flatten)]
        keys: KeySource,
    },
}

#[derive(clap::Args)]
struct KeySource {
    /// Number of synthetic keys ("key-0", "key-1", ...)
    #[arg(long, default_value_t = 10_000)]
    count: usize,
    /// File with one key per line, replaces synthetic keys
    #[arg(long)]
    keys_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Distribution { buckets, keys } => distribution(buckets, &load_keys(&keys)?),
        Command::Expand {
            current,
            proposed,
            keys,
        } => expand(&current, proposed, &load_keys(&keys)?),
    }
}

fn load_keys(source: &KeySource) -> Result<Vec<String>> {
    let keys: Vec<String> = match &source.keys_file {
        Some(path) => read_keys(path)?,
        None => (0..source.count).map(|n| format!("key-{}", n)).collect(),
    };
    if keys.is_empty() {
        return Err(anyhow!("No keys to place"));
    }
    Ok(keys)
}

fn read_keys(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read keys from '{}'", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn distribution(buckets: u32, keys: &[String]) -> Result<()> {
    let locator = ShardLocator::<str>::new(buckets)?;
    let mut counts = vec![0usize; buckets as usize];
    for key in keys {
        counts[locator.get_bucket(key.as_str()) as usize] += 1;
    }

    let ideal = keys.len() as f64 / buckets as f64;
    println!("{} keys over {} buckets (ideal {:.1})", keys.len(), buckets, ideal);
    for (bucket, count) in counts.iter().enumerate() {
        println!(
            "  bucket {:>4}: {:>8} ({:+.1}%)",
            bucket,
            count,
            (*count as f64 - ideal) / ideal * 100.0
        );
    }
    Ok(())
}

fn expand(current: &[u32], proposed: u32, keys: &[String]) -> Result<()> {
    let newest = *current
        .first()
        .ok_or_else(|| anyhow!("At least one current bucket count is required"))?;

    let mut counts = Vec::with_capacity(current.len() + 1);
    counts.push(proposed);
    counts.extend_from_slice(current);
    let expanded = ExpandingShardLocator::<str>::new(&counts)
        .with_context(|| format!("Cannot expand {:?} to {}", current, proposed))?;
    let before = ShardLocator::<str>::new(newest)?;

    let mut moved = 0usize;
    let mut fan_out: BTreeMap<usize, usize> = BTreeMap::new();
    for key in keys {
        let key = key.as_str();
        if expanded.get_current_bucket(key) != before.get_bucket(key) {
            moved += 1;
        }
        *fan_out
            .entry(expanded.get_distinct_buckets(key).len())
            .or_default() += 1;
    }

    let expected = 1.0 - newest as f64 / proposed as f64;
    println!("Bucket counts after expansion: {:?}", expanded.bucket_counts());
    println!(
        "Moved keys: {} of {} ({:.2}%, expected {:.2}%)",
        moved,
        keys.len(),
        moved as f64 / keys.len() as f64 * 100.0,
        expected * 100.0
    );
    println!("Rows probed per read:");
    for (probes, count) in fan_out {
        println!("  {:>2} row(s): {:>8} keys", probes, count);
    }
    Ok(())
}
