//! Neighbor table snapshots and descriptor watching for SONiC host tooling
//!
//! This crate provides two independent building blocks:
//!
//! - [`NeighborTableReader`]: a point-in-time snapshot of the kernel IPv4
//!   neighbor (ARP) cache as `(ip, interface name, hardware address)` entries.
//! - [`DescriptorWatcher`]: a level-triggered readiness watcher over a
//!   caller-owned descriptor, driven by a host [`EventLoop`] and reporting
//!   through a reassignable callback.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//!
//! | Control | Description | Implementation |
//! |---------|-------------|----------------|
//! | AU-3 | Content of Audit Records | Structured logging with neighbor details |
//! | CM-6 | Configuration Settings | TOML configuration with validation |
//! | CM-8 | System Component Inventory | ARP table snapshots |
//! | IA-3 | Device Identification | MAC address reporting |
//! | SC-7 | Boundary Protection | Read-only kernel interfaces |
//! | SI-10 | Input Validation | Bounds-checked kernel buffer decoding |
//! | SI-11 | Error Handling | Structured error types |
//!
//! # Architecture
//!
//! ```text
//!  Kernel                       neighwatch                       Host
//! +------------------+   +----------------------------+   +---------------+
//! | route sysctl     |-->|                            |   |               |
//! | RTM_GETNEIGH     |-->| NeighborTableReader        |-->| snapshot()    |
//! | /proc/net/arp    |-->|                            |   |               |
//! | arp -a           |-->|                            |   |               |
//! +------------------+   +----------------------------+   +---------------+
//!                        +----------------------------+   +---------------+
//!                        | DescriptorWatcher          |<--| EventLoop     |
//!                        |   set / start / stop       |-->| callback(r,w) |
//!                        +----------------------------+   +---------------+
//! ```

pub mod config;
pub mod error;
#[cfg(unix)]
pub mod host;
pub mod neighbor;
pub mod types;
#[cfg(unix)]
pub mod watcher;

pub use config::{NeighwatchConfig, SourceKind};
pub use error::{NeighwatchError, QueryError, Result};
#[cfg(unix)]
pub use host::{entries_to_json, parse_set_args};
pub use neighbor::{InterfaceNames, InterfaceTable, NeighborSource, NeighborTableReader};
pub use types::{Interest, MacAddress, NeighborEntry, Readiness};
#[cfg(unix)]
pub use watcher::{
    DescriptorWatcher, EventLoop, PollLoop, ReadinessCallback, ReadinessHandler, Token,
    TokioEventLoop, WeakDescriptorWatcher,
};
