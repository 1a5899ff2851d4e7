//! ARP table from the output of `arp -a`
//!
//! Fallback for hosts where neither the routing sysctl nor netlink is
//! reachable. Two output layouts are recognised, line by line:
//!
//! ```text
//! ? (192.168.1.1) at 50:67:f0:8c:7a:3f on en0 ifscope [ethernet]
//! ? (10.0.0.1) at 52:54:00:12:35:02 [ether] on eth0
//!
//! Interface: 192.168.1.54 --- 0x4
//!   Internet Address      Physical Address     Type
//!   192.168.1.1           50-67-f0-8c-7a-3f    dynamic
//! ```
//!
//! The second layout carries no interface name, so those entries have an
//! empty one. Lines matching neither layout (headers, `(incomplete)`
//! entries) are skipped.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-10: Information Input Validation - Regex-validated addresses only
//! - CM-7: Least Functionality - Fixed argument vector, no shell

use super::NeighborSource;
use crate::error::QueryError;
use crate::types::{MacAddress, NeighborEntry};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::net::Ipv4Addr;
use std::process::{Command, Stdio};
use tracing::{debug, instrument, trace, warn};

pub const DEFAULT_ARP_COMMAND: &str = "arp";

/// `? (ip) at mac ... on iface`
static BSD_ENTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\((\d{1,3}(?:\.\d{1,3}){3})\)\s+at\s+((?:[0-9a-fA-F]{1,2}:){5}[0-9a-fA-F]{1,2})\b.*?\bon\s+(\S+)")
        .expect("Invalid regex pattern")
});

/// `ip   mac   type` with `-` or `:` separated octets
static TABULAR_ENTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"((?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)(?:\.(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)){3})\s+((?:[0-9a-fA-F]{2}[:-]){5}[0-9a-fA-F]{2})",
    )
    .expect("Invalid regex pattern")
});

/// Runs `<program> -a` and parses its output
#[derive(Debug, Clone)]
pub struct ArpCommandSource {
    program: String,
}

impl Default for ArpCommandSource {
    fn default() -> Self {
        Self::new(DEFAULT_ARP_COMMAND)
    }
}

impl ArpCommandSource {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl NeighborSource for ArpCommandSource {
    fn name(&self) -> &'static str {
        "arp-command"
    }

    #[instrument(skip(self), fields(program = %self.program))]
    fn fetch(&self) -> Result<Vec<NeighborEntry>, QueryError> {
        let output = Command::new(&self.program)
            .arg("-a")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(QueryError::DataQuery)?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(exit_code = code, stderr = %stderr, "arp command failed");
            return Err(QueryError::DataQuery(io::Error::other(format!(
                "exit code {code}, reason: {stderr}"
            ))));
        }

        let entries = parse_arp_output(&String::from_utf8_lossy(&output.stdout));
        debug!(entries = entries.len(), "arp output parsed");
        Ok(entries)
    }
}

/// Parse `arp -a` output in either supported layout, in output order
pub fn parse_arp_output(output: &str) -> Vec<NeighborEntry> {
    output.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<NeighborEntry> {
    let (ip, mac, interface) = if let Some(caps) = BSD_ENTRY_RE.captures(line) {
        (caps.get(1)?.as_str(), caps.get(2)?.as_str().to_string(), caps.get(3)?.as_str())
    } else {
        let caps = TABULAR_ENTRY_RE.captures(line)?;
        (caps.get(1)?.as_str(), caps.get(2)?.as_str().replace('-', ":"), "")
    };

    let ip: Ipv4Addr = match ip.parse() {
        Ok(ip) => ip,
        Err(e) => {
            warn!(error = %e, ip, "Invalid IP in arp output");
            return None;
        }
    };
    let mac = MacAddress::parse(&mac)?;
    if mac.is_zero() {
        trace!(%ip, "Skipping zero hardware address");
        return None;
    }
    Some(NeighborEntry::new(ip, interface, mac))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOWS_OUTPUT: &str = "
Interface: 192.168.1.54 --- 0x4
  Internet Address      Physical Address     Type
  192.168.1.1           50-67-f0-8c-7a-3f    dynamic
  192.168.1.255         ff-ff-ff-ff-ff-ff    static

Interface: 10.0.0.5 --- 0x9
  Internet Address      Physical Address     Type
  10.0.0.1              00-1B-21-0A-0B-0C    dynamic
";

    const BSD_OUTPUT: &str = "\
? (192.168.1.1) at 50:67:f0:8c:7a:3f on en0 ifscope [ethernet]
? (192.168.1.20) at (incomplete) on en0 ifscope [ethernet]
? (192.168.1.30) at 0:1b:21:a:b:c on en1 ifscope permanent [ethernet]
gateway (10.0.0.1) at 52:54:00:12:35:02 [ether] on eth0
";

    #[test]
    fn test_parse_windows_layout() {
        let entries = parse_arp_output(WINDOWS_OUTPUT);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].ip, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(entries[0].hardware_address.to_string(), "50:67:f0:8c:7a:3f");
        assert_eq!(entries[0].interface_name, "");
        assert_eq!(entries[2].ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(entries[2].hardware_address.to_string(), "00:1b:21:0a:0b:0c");
    }

    #[test]
    fn test_parse_bsd_layout_with_interfaces() {
        let entries = parse_arp_output(BSD_OUTPUT);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].interface_name, "en0");
        assert_eq!(entries[1].ip, Ipv4Addr::new(192, 168, 1, 30));
        assert_eq!(entries[1].interface_name, "en1");
        assert_eq!(entries[1].hardware_address.to_string(), "00:1b:21:0a:0b:0c");
        assert_eq!(entries[2].interface_name, "eth0");
    }

    #[test]
    fn test_interface_header_lines_are_not_entries() {
        assert!(parse_line("Interface: 192.168.1.54 --- 0x4").is_none());
        assert!(parse_line("  Internet Address      Physical Address     Type").is_none());
        assert!(parse_arp_output("").is_empty());
    }

    #[test]
    fn test_out_of_range_address_is_skipped() {
        assert!(parse_line("? (300.1.1.1) at 50:67:f0:8c:7a:3f on en0").is_none());
    }

    #[test]
    fn test_zero_hardware_address_is_skipped() {
        assert!(parse_line("  10.0.0.9    00-00-00-00-00-00    invalid").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_program_is_data_query_error() {
        let source = ArpCommandSource::new("/nonexistent/neighwatch-arp");
        assert!(matches!(source.fetch(), Err(QueryError::DataQuery(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_reports_code_and_stderr() {
        // `false -a` exits 1 without output
        let source = ArpCommandSource::new("false");
        match source.fetch() {
            Err(QueryError::DataQuery(e)) => assert!(e.to_string().starts_with("exit code 1")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
