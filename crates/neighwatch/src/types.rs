//! Core types for neighbor snapshots and descriptor watching
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - Neighbor entries as network components
//! - IA-3: Device Identification - MAC addresses for device identification

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// MAC address representation
///
/// Serialized as its lower-case colon-hex string.
///
/// # NIST Controls
/// - IA-3: Device Identification - MAC addresses for device identification
/// - AU-3: Content of Audit Records - MAC included in neighbor records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Zero MAC address (incomplete entries in /proc/net/arp)
    pub const ZERO: Self = Self([0, 0, 0, 0, 0, 0]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Check if this is a zero MAC
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO.0
    }

    /// Build from the leading six bytes of a link-layer address
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 6] = bytes.get(..6)?.try_into().ok()?;
        Some(Self(arr))
    }

    /// Parse MAC from colon-separated string (e.g., "00:11:22:33:44:55")
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return None;
        }
        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() || part.len() > 2 {
                return None;
            }
            bytes[i] = u8::from_str_radix(part, 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid MAC address: {s}"))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One resolved entry of the kernel ARP table
///
/// # NIST Controls
/// - CM-8: System Component Inventory - Track network neighbors
/// - AU-3: Content of Audit Records - Full neighbor information for logging
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeighborEntry {
    /// Neighbor IPv4 address
    pub ip: Ipv4Addr,
    /// Owning interface, empty when the index could not be resolved
    pub interface_name: String,
    /// Resolved link-layer address
    pub hardware_address: MacAddress,
}

impl NeighborEntry {
    pub fn new(ip: Ipv4Addr, interface_name: impl Into<String>, hardware_address: MacAddress) -> Self {
        Self {
            ip,
            interface_name: interface_name.into(),
            hardware_address,
        }
    }

    /// Key identifying the neighbor across snapshots: "{interface}:{ip}"
    pub fn key(&self) -> String {
        format!("{}:{}", self.interface_name, self.ip)
    }
}

impl fmt::Display for NeighborEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {} on {}",
            self.ip,
            self.hardware_address,
            if self.interface_name.is_empty() {
                "?"
            } else {
                &self.interface_name
            }
        )
    }
}

/// Readiness conditions a watcher asks the event loop for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const NONE: Self = Self::new(false, false);
    pub const READABLE: Self = Self::new(true, false);
    pub const WRITABLE: Self = Self::new(false, true);
    pub const BOTH: Self = Self::new(true, true);

    pub const fn new(readable: bool, writable: bool) -> Self {
        Self { readable, writable }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }
}

impl std::ops::BitOr for Interest {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self::new(self.readable || rhs.readable, self.writable || rhs.writable)
    }
}

/// Conditions reported by the event loop for one notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

impl Readiness {
    pub const fn new(readable: bool, writable: bool) -> Self {
        Self { readable, writable }
    }

    /// Drop every condition the interest never asked for
    #[inline]
    pub fn masked(self, interest: Interest) -> Self {
        Self::new(
            self.readable && interest.readable,
            self.writable && interest.writable,
        )
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }
}
