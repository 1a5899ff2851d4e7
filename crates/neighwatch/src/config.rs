//! Configuration file support for neighwatch
//!
//! Loads and validates neighwatch configuration from TOML files.
//! Default location: /etc/sonic/neighwatch.conf
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-6: Configuration Settings - Validated configuration with safe defaults

use crate::error::{NeighwatchError, Result};
use crate::neighbor::arp_cmd::DEFAULT_ARP_COMMAND;
use crate::neighbor::procfs::DEFAULT_PROC_ARP_PATH;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/neighwatch.conf";

/// Smallest receive buffer that still fits a kernel dump datagram
const MIN_NETLINK_RECV_BUFFER: usize = 4096;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Which kernel interface a snapshot reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Routing socket on Apple targets, rtnetlink on Linux
    #[default]
    Auto,
    /// sysctl(NET_RT_FLAGS, RTF_LLINFO)
    RouteSysctl,
    /// RTM_GETNEIGH dump
    Netlink,
    /// /proc/net/arp text table
    Procfs,
    /// Output of `arp -a`
    ArpCommand,
}

/// Snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Neighbor source backend
    #[serde(default)]
    pub source: SourceKind,

    /// Path read by the procfs backend
    #[serde(default = "default_proc_path")]
    pub proc_path: String,

    /// Receive buffer for one netlink dump datagram in bytes
    #[serde(default = "default_netlink_recv_buffer")]
    pub netlink_recv_buffer: usize,

    /// Program run by the arp-command backend
    #[serde(default = "default_arp_command")]
    pub arp_command: String,
}

/// Monitor loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between snapshots
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of compact text
    #[serde(default)]
    pub json: bool,
}

/// Complete neighwatch configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NeighwatchConfig {
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default functions
fn default_proc_path() -> String {
    DEFAULT_PROC_ARP_PATH.to_string()
}

fn default_arp_command() -> String {
    DEFAULT_ARP_COMMAND.to_string()
}

fn default_netlink_recv_buffer() -> usize {
    32 * 1024
}

fn default_interval_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            proc_path: default_proc_path(),
            netlink_recv_buffer: default_netlink_recv_buffer(),
            arp_command: default_arp_command(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl NeighwatchConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                NeighwatchError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(NeighwatchError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| NeighwatchError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Get monitor interval as Duration
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.interval_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.snapshot.netlink_recv_buffer < MIN_NETLINK_RECV_BUFFER {
            return Err(NeighwatchError::Config(format!(
                "netlink_recv_buffer must be >= {}",
                MIN_NETLINK_RECV_BUFFER
            )));
        }

        if self.snapshot.proc_path.is_empty() {
            return Err(NeighwatchError::Config(
                "proc_path cannot be empty".to_string(),
            ));
        }

        if self.snapshot.arp_command.trim().is_empty() {
            return Err(NeighwatchError::Config(
                "arp_command cannot be empty".to_string(),
            ));
        }

        if self.monitor.interval_secs == 0 {
            return Err(NeighwatchError::Config(
                "interval_secs must be > 0".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(NeighwatchError::Config(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = NeighwatchConfig::default();
        assert_eq!(config.snapshot.source, SourceKind::Auto);
        assert_eq!(config.snapshot.proc_path, "/proc/net/arp");
        assert_eq!(config.snapshot.netlink_recv_buffer, 32768);
        assert_eq!(config.snapshot.arp_command, "arp");
        assert_eq!(config.monitor.interval_secs, 30);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(NeighwatchConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_small_recv_buffer() {
        let mut config = NeighwatchConfig::default();
        config.snapshot.netlink_recv_buffer = 512;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut config = NeighwatchConfig::default();
        config.monitor.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_unknown_level() {
        let mut config = NeighwatchConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[snapshot]
source = "procfs"
proc_path = "/tmp/arp"

[monitor]
interval_secs = 5
"#;
        let config: NeighwatchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.snapshot.source, SourceKind::Procfs);
        assert_eq!(config.snapshot.proc_path, "/tmp/arp");
        assert_eq!(config.monitor_interval(), Duration::from_secs(5));
        // Unspecified values should use defaults
        assert_eq!(config.snapshot.netlink_recv_buffer, 32768);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_route_sysctl_kebab_case() {
        let config: NeighwatchConfig =
            toml::from_str("[snapshot]\nsource = \"route-sysctl\"\n").unwrap();
        assert_eq!(config.snapshot.source, SourceKind::RouteSysctl);
    }

    #[test]
    fn test_arp_command_source_and_program() {
        let config: NeighwatchConfig = toml::from_str(
            "[snapshot]\nsource = \"arp-command\"\narp_command = \"/usr/sbin/arp\"\n",
        )
        .unwrap();
        assert_eq!(config.snapshot.source, SourceKind::ArpCommand);
        assert_eq!(config.snapshot.arp_command, "/usr/sbin/arp");
    }

    #[test]
    fn test_validate_empty_arp_command() {
        let mut config = NeighwatchConfig::default();
        config.snapshot.arp_command = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let file = NamedTempFile::new().unwrap();
        let mut config = NeighwatchConfig::default();
        config.monitor.interval_secs = 12;
        config.save(file.path()).unwrap();

        let loaded = NeighwatchConfig::load_or_default(file.path()).unwrap();
        assert_eq!(loaded.monitor.interval_secs, 12);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[snapshot\nsource = ").unwrap();
        assert!(matches!(
            NeighwatchConfig::load_or_default(file.path()),
            Err(NeighwatchError::Config(_))
        ));
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = NeighwatchConfig::load_or_default("/nonexistent/path.conf").unwrap();
        assert_eq!(config.snapshot.source, SourceKind::Auto);
    }
}
