//! neighwatch command line tool
//!
//! Prints the kernel ARP table once, or keeps polling it and logs every
//! neighbor that appears, disappears or changes hardware address.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-3: Content of Audit Records - Structured logging
//! - AU-12: Audit Record Generation - Log neighbor changes
//! - CM-8: System Component Inventory - Neighbor table listing
//! - SI-4: System Monitoring - Periodic neighbor monitoring

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use sonic_neighwatch::config::{DEFAULT_CONFIG_PATH, LoggingConfig};
use sonic_neighwatch::{NeighborEntry, NeighborTableReader, NeighwatchConfig, SourceKind};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Kernel ARP table inspection
#[derive(Parser, Debug)]
#[command(name = "neighwatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Neighbor source, overrides the configuration file
    #[arg(short = 's', long, value_enum)]
    source: Option<SourceKind>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the neighbor table once
    Snapshot {
        #[arg(short = 'f', long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Poll the neighbor table and log changes until interrupted
    Monitor {
        /// Seconds between snapshots, overrides the configuration file
        #[arg(short = 'i', long)]
        interval: Option<u64>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

/// Difference between two consecutive snapshots
#[derive(Debug, PartialEq, Eq)]
enum NeighborChange {
    Added(NeighborEntry),
    Removed(NeighborEntry),
    Changed {
        old: NeighborEntry,
        new: NeighborEntry,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = NeighwatchConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(source) = args.source {
        config.snapshot.source = source;
    }
    if let Command::Monitor {
        interval: Some(secs),
    } = args.command
    {
        config.monitor.interval_secs = secs;
    }
    config.validate()?;

    init_logging(&config.logging)?;
    debug!(?config, "Configuration loaded");

    let reader = NeighborTableReader::from_config(&config.snapshot)?;
    match args.command {
        Command::Snapshot { format } => {
            let entries = reader.snapshot().context("neighbor snapshot failed")?;
            print_entries(&entries, format)?;
        }
        Command::Monitor { .. } => {
            run_monitor(Arc::new(reader), config.monitor_interval()).await?;
        }
    }

    Ok(())
}

/// Initialize structured logging
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # NIST Controls
/// - AU-3: Content of Audit Records - Structured format
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    installed.map_err(|e| anyhow!("Failed to set logger: {}", e))
}

fn print_entries(entries: &[NeighborEntry], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let value = sonic_neighwatch::entries_to_json(entries);
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Table => {
            println!("{:<16} {:<18} {}", "Address", "HWaddress", "Iface");
            for entry in entries {
                println!(
                    "{:<16} {:<18} {}",
                    entry.ip.to_string(),
                    entry.hardware_address.to_string(),
                    entry.interface_name
                );
            }
        }
    }
    Ok(())
}

/// Periodic snapshot loop
///
/// # NIST Controls
/// - SI-4: System Monitoring - Continuous monitoring
/// - AU-12: Audit Record Generation - Log shutdown and changes
async fn run_monitor(reader: Arc<NeighborTableReader>, interval: Duration) -> anyhow::Result<()> {
    info!(
        source = reader.source_name(),
        interval_secs = interval.as_secs(),
        "neighwatch: Monitoring neighbor table"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut known: HashMap<String, NeighborEntry> = HashMap::new();
    let mut initial = true;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("neighwatch: Received SIGINT, stopping monitor");
                break;
            }
            _ = ticker.tick() => {
                let entries = match reader.clone().snapshot_async().await {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!(error = %e, "neighwatch: Snapshot failed, retrying next interval");
                        continue;
                    }
                };

                if initial {
                    info!(count = entries.len(), "neighwatch: Initial neighbor table");
                    initial = false;
                } else {
                    for change in diff_snapshots(&known, &entries) {
                        log_change(&change);
                    }
                }
                known = entries.into_iter().map(|e| (e.key(), e)).collect();
            }
        }
    }

    Ok(())
}

/// Compare a snapshot against the previous one, keyed by interface and IP
///
/// Additions and changes follow the order of `current`; removals come last
/// in key order.
fn diff_snapshots(
    previous: &HashMap<String, NeighborEntry>,
    current: &[NeighborEntry],
) -> Vec<NeighborChange> {
    let mut changes = Vec::new();
    let mut seen = std::collections::HashSet::with_capacity(current.len());

    for entry in current {
        let key = entry.key();
        match previous.get(&key) {
            None => changes.push(NeighborChange::Added(entry.clone())),
            Some(old) if old.hardware_address != entry.hardware_address => {
                changes.push(NeighborChange::Changed {
                    old: old.clone(),
                    new: entry.clone(),
                })
            }
            Some(_) => {}
        }
        seen.insert(key);
    }

    let mut removed: Vec<&NeighborEntry> = previous
        .iter()
        .filter(|(key, _)| !seen.contains(*key))
        .map(|(_, entry)| entry)
        .collect();
    removed.sort_by_key(|entry| entry.key());
    changes.extend(removed.into_iter().cloned().map(NeighborChange::Removed));

    changes
}

fn log_change(change: &NeighborChange) {
    match change {
        NeighborChange::Added(entry) => info!(
            ip = %entry.ip,
            mac = %entry.hardware_address,
            interface = %entry.interface_name,
            "neighwatch: Neighbor added"
        ),
        NeighborChange::Removed(entry) => info!(
            ip = %entry.ip,
            mac = %entry.hardware_address,
            interface = %entry.interface_name,
            "neighwatch: Neighbor removed"
        ),
        NeighborChange::Changed { old, new } => info!(
            ip = %new.ip,
            old_mac = %old.hardware_address,
            new_mac = %new.hardware_address,
            interface = %new.interface_name,
            "neighwatch: Neighbor hardware address changed"
        ),
    }
}
