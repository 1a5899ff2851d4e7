//! `/proc/net/arp` reader
//!
//! Format of /proc/net/arp:
//!
//! ```text
//! IP address       HW type     Flags       HW address            Mask     Device
//! 192.168.1.1      0x1         0x2         aa:bb:cc:dd:ee:ff     *        eth0
//! ```

use super::NeighborSource;
use crate::error::QueryError;
use crate::types::{MacAddress, NeighborEntry};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_PROC_ARP_PATH: &str = "/proc/net/arp";

/// ATF_COM: entry is complete
const ATF_COM: u32 = 0x2;

/// Linux ARP cache reader over procfs
#[derive(Debug, Clone)]
pub struct ProcArpSource {
    path: PathBuf,
}

impl Default for ProcArpSource {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_ARP_PATH)
    }
}

impl ProcArpSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NeighborSource for ProcArpSource {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn fetch(&self) -> Result<Vec<NeighborEntry>, QueryError> {
        let content = std::fs::read_to_string(&self.path).map_err(QueryError::DataQuery)?;
        let entries = parse_proc_arp(&content);
        debug!(path = %self.path.display(), entries = entries.len(), "ARP table parsed");
        Ok(entries)
    }
}

/// Parse the text of /proc/net/arp, keeping only complete entries
pub fn parse_proc_arp(content: &str) -> Vec<NeighborEntry> {
    let mut entries = Vec::new();

    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            continue;
        }

        let flags = u32::from_str_radix(fields[2].trim_start_matches("0x"), 16).unwrap_or(0);
        if flags & ATF_COM == 0 {
            continue;
        }

        let Some(mac) = MacAddress::parse(fields[3]) else {
            warn!(mac = fields[3], "Invalid MAC in ARP table");
            continue;
        };
        if mac.is_zero() {
            continue;
        }

        match fields[0].parse::<Ipv4Addr>() {
            Ok(ip) => entries.push(NeighborEntry::new(ip, fields[5], mac)),
            Err(e) => warn!(error = %e, ip = fields[0], "Invalid IP in ARP table"),
        }
    }

    entries
}
