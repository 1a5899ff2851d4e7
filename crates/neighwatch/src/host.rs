//! Plain-data boundary for embedding hosts
//!
//! Hosts hand arguments over as untyped JSON values and expect snapshot
//! results back the same way. Argument checks run before any watcher state
//! is touched.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-10: Information Input Validation - Reject malformed host arguments

use crate::error::{NeighwatchError, Result};
use crate::types::{Interest, NeighborEntry};
use serde_json::{Value, json};
use std::os::fd::RawFd;

/// Decode `[fd, readable, writable]` into a descriptor and interest
pub fn parse_set_args(args: &[Value]) -> Result<(RawFd, Interest)> {
    let fd = args
        .first()
        .and_then(Value::as_i64)
        .and_then(|fd| RawFd::try_from(fd).ok())
        .ok_or_else(|| NeighwatchError::Type("First arg should be a file descriptor.".to_string()))?;
    let readable = args
        .get(1)
        .and_then(Value::as_bool)
        .ok_or_else(|| NeighwatchError::Type("Second arg should be a boolean (readable).".to_string()))?;
    let writable = args
        .get(2)
        .and_then(Value::as_bool)
        .ok_or_else(|| NeighwatchError::Type("Third arg should be a boolean (writable).".to_string()))?;

    Ok((fd, Interest::new(readable, writable)))
}

/// Render a snapshot as an array of `{ip, interfaceName, hardwareAddress}`
pub fn entries_to_json(entries: &[NeighborEntry]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|entry| {
                json!({
                    "ip": entry.ip.to_string(),
                    "interfaceName": entry.interface_name,
                    "hardwareAddress": entry.hardware_address.to_string(),
                })
            })
            .collect(),
    )
}
