//! Kernel ARP table snapshots
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - Point-in-time inventory of IPv4 neighbors
//! - SC-7: Boundary Protection - Read-only kernel interface, no cache mutation
//! - SI-10: Information Input Validation - Bounds-checked decoding of kernel buffers
//!
//! A snapshot is one blocking call into a [`NeighborSource`]. The platform
//! default is the routing socket on Apple targets and the rtnetlink neighbour
//! dump on Linux; `/proc/net/arp` is available everywhere through
//! [`ProcArpSource`] for hosts without netlink access, and any host with an
//! `arp` binary can fall back to [`ArpCommandSource`].

pub mod arp_cmd;
#[cfg(target_os = "linux")]
pub mod netlink;
pub mod procfs;
pub mod route_msg;
pub mod sysctl;

use crate::config::{SnapshotConfig, SourceKind};
use crate::error::{NeighwatchError, QueryError, Result};
use crate::types::NeighborEntry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub use arp_cmd::ArpCommandSource;
#[cfg(target_os = "linux")]
pub use netlink::NetlinkNeighborSource;
pub use procfs::ProcArpSource;
pub use sysctl::{RouteSysctl, RouteSysctlSource};

/// Backend that fetches and decodes the kernel neighbor cache
///
/// Implementations keep no mutable state between calls so that concurrent
/// snapshots stay independent.
pub trait NeighborSource: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Fetch the current IPv4 neighbor cache in kernel order
    fn fetch(&self) -> std::result::Result<Vec<NeighborEntry>, QueryError>;
}

/// Interface index to name resolution
#[cfg_attr(test, mockall::automock)]
pub trait InterfaceNames {
    /// Name for the index, `None` when the index is unknown
    fn name_of(&self, ifindex: u32) -> Option<String>;
}

/// Index to name table captured once per snapshot
///
/// # NIST Controls
/// - CM-8: System Component Inventory - Interface resolution
#[derive(Debug, Default, Clone)]
pub struct InterfaceTable {
    names: HashMap<u32, String>,
}

impl InterfaceTable {
    /// Capture the system interface table via `if_nameindex(3)`
    ///
    /// A failure leaves the table empty; every entry of the snapshot then
    /// carries an empty interface name instead of failing the snapshot.
    #[cfg(unix)]
    pub fn fetch() -> Self {
        match nix::net::if_::if_nameindex() {
            Ok(interfaces) => {
                let names: HashMap<u32, String> = interfaces
                    .iter()
                    .map(|iface| (iface.index(), iface.name().to_string_lossy().into_owned()))
                    .collect();
                debug!(count = names.len(), "Captured interface name table");
                Self { names }
            }
            Err(e) => {
                warn!(error = %e, "if_nameindex failed, interface names will be empty");
                Self::default()
            }
        }
    }

    #[cfg(not(unix))]
    pub fn fetch() -> Self {
        Self::default()
    }

    /// Build a table from explicit (index, name) pairs
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        Self {
            names: pairs.into_iter().map(|(i, n)| (i, n.into())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl InterfaceNames for InterfaceTable {
    fn name_of(&self, ifindex: u32) -> Option<String> {
        self.names.get(&ifindex).cloned()
    }
}

/// Reads the kernel ARP table through a configured [`NeighborSource`]
///
/// # NIST Controls
/// - SI-4: System Monitoring - On-demand neighbor inventory
pub struct NeighborTableReader {
    source: Box<dyn NeighborSource>,
}

impl NeighborTableReader {
    /// Reader over the platform default source
    pub fn new() -> Result<Self> {
        Self::from_config(&SnapshotConfig::default())
    }

    /// Reader over the source selected in configuration
    pub fn from_config(config: &SnapshotConfig) -> Result<Self> {
        let source: Box<dyn NeighborSource> = match config.source {
            SourceKind::Auto => platform_default(config)?,
            SourceKind::RouteSysctl => route_sysctl()?,
            SourceKind::Netlink => netlink(config)?,
            SourceKind::Procfs => Box::new(ProcArpSource::new(&config.proc_path)),
            SourceKind::ArpCommand => Box::new(ArpCommandSource::new(config.arp_command.clone())),
        };
        debug!(source = source.name(), "Selected neighbor source");
        Ok(Self { source })
    }

    /// Reader over an explicit source
    pub fn with_source(source: impl NeighborSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Take a snapshot of the IPv4 neighbor cache (blocking)
    ///
    /// Returns entries in kernel enumeration order. Any query failure aborts
    /// the snapshot; an empty cache is an empty vector.
    #[instrument(skip(self), fields(source = self.source.name()))]
    pub fn snapshot(&self) -> Result<Vec<NeighborEntry>> {
        let entries = self.source.fetch()?;
        debug!(count = entries.len(), "Neighbor snapshot complete");
        Ok(entries)
    }

    /// Take a snapshot on tokio's blocking pool
    pub async fn snapshot_async(self: Arc<Self>) -> Result<Vec<NeighborEntry>> {
        tokio::task::spawn_blocking(move || self.snapshot())
            .await
            .map_err(|e| NeighwatchError::Io(std::io::Error::other(e)))?
    }
}

fn platform_default(config: &SnapshotConfig) -> Result<Box<dyn NeighborSource>> {
    if cfg!(target_vendor = "apple") {
        route_sysctl()
    } else if cfg!(target_os = "linux") {
        netlink(config)
    } else {
        Err(QueryError::Unsupported("auto").into())
    }
}

#[cfg(target_vendor = "apple")]
fn route_sysctl() -> Result<Box<dyn NeighborSource>> {
    Ok(Box::new(RouteSysctlSource::new()))
}

#[cfg(not(target_vendor = "apple"))]
fn route_sysctl() -> Result<Box<dyn NeighborSource>> {
    Err(QueryError::Unsupported("route-sysctl").into())
}

#[cfg(target_os = "linux")]
fn netlink(config: &SnapshotConfig) -> Result<Box<dyn NeighborSource>> {
    Ok(Box::new(NetlinkNeighborSource::new(
        config.netlink_recv_buffer,
    )))
}

#[cfg(not(target_os = "linux"))]
fn netlink(_config: &SnapshotConfig) -> Result<Box<dyn NeighborSource>> {
    Err(QueryError::Unsupported("netlink").into())
}
