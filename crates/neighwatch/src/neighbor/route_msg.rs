//! Routing-socket ARP dump decoding
//!
//! The buffer returned by `sysctl(NET_RT_FLAGS, RTF_LLINFO)` is a sequence of
//! variable-length routing messages, each starting with its own total length.
//! Every message is laid out as:
//!
//! ```text
//! +-------------------+  0
//! | rt_msghdr         |  rtm_msglen @0 (u16), rtm_index @4 (u16)
//! +-------------------+  92
//! | sockaddr_inarp    |  sin_len @0, sin_addr @4 (4 bytes)
//! +-------------------+  92 + ROUNDUP(sin_len)
//! | sockaddr_dl       |  sdl_index @2 (u16), sdl_nlen @5, sdl_alen @6,
//! |                   |  sdl_data @8: interface name, then link-layer address
//! +-------------------+
//! ```
//!
//! Multi-byte fields are in host byte order. Decoding is slice based: every
//! read is bounds-checked against the message it belongs to, and a record
//! that does not fit fails the whole dump.
//!
//! # NIST Controls
//! - SI-10: Information Input Validation - No read outside declared bounds

use super::InterfaceNames;
use crate::error::QueryError;
use crate::types::{MacAddress, NeighborEntry};
use std::net::Ipv4Addr;
use tracing::trace;

/// Size of `struct rt_msghdr` on Darwin
pub const RT_MSGHDR_LEN: usize = 92;

const RTM_INDEX_OFFSET: usize = 4;
const SIN_ADDR_OFFSET: usize = 4;
/// Bytes of `sockaddr_inarp` that must be present to read the address
const SIN_MIN_LEN: usize = SIN_ADDR_OFFSET + 4;
/// Fixed part of `sockaddr_dl` before `sdl_data`
const SDL_HEADER_LEN: usize = 8;
const SDL_INDEX_OFFSET: usize = 2;
const SDL_NLEN_OFFSET: usize = 5;
const SDL_ALEN_OFFSET: usize = 6;
const ETHER_ADDR_LEN: usize = 6;

/// Iterator over the length-prefixed records of a routing dump
///
/// Yields `(offset, record)` pairs. After the first error it yields nothing.
pub struct Records<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Records<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<(usize, &'a [u8]), QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }

        let offset = self.offset;
        let rest = &self.buf[offset..];
        let result = match rest.get(..2) {
            None => Err(QueryError::malformed(offset, "truncated length field")),
            Some(len_bytes) => {
                let msglen = usize::from(u16::from_ne_bytes([len_bytes[0], len_bytes[1]]));
                if msglen == 0 {
                    Err(QueryError::malformed(offset, "zero-length message"))
                } else if msglen > rest.len() {
                    Err(QueryError::malformed(
                        offset,
                        format!(
                            "message length {} exceeds remaining {} bytes",
                            msglen,
                            rest.len()
                        ),
                    ))
                } else {
                    self.offset += msglen;
                    Ok((offset, &rest[..msglen]))
                }
            }
        };

        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

/// Decode a complete routing dump into neighbor entries
///
/// Records whose link-layer address length is zero (unresolved neighbors) are
/// skipped. Order follows the buffer.
pub fn decode_route_dump(
    buf: &[u8],
    names: &dyn InterfaceNames,
) -> Result<Vec<NeighborEntry>, QueryError> {
    let mut entries = Vec::new();
    for record in Records::new(buf) {
        let (offset, msg) = record?;
        if let Some(entry) = decode_message(offset, msg, names)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Decode one routing message; `Ok(None)` for an unresolved neighbor
pub fn decode_message(
    offset: usize,
    msg: &[u8],
    names: &dyn InterfaceNames,
) -> Result<Option<NeighborEntry>, QueryError> {
    if msg.len() < RT_MSGHDR_LEN + SIN_MIN_LEN {
        return Err(QueryError::malformed(
            offset,
            format!("message of {} bytes has no room for an address", msg.len()),
        ));
    }

    let rtm_index = read_u16(msg, RTM_INDEX_OFFSET);

    let sin = &msg[RT_MSGHDR_LEN..];
    let ip = Ipv4Addr::new(
        sin[SIN_ADDR_OFFSET],
        sin[SIN_ADDR_OFFSET + 1],
        sin[SIN_ADDR_OFFSET + 2],
        sin[SIN_ADDR_OFFSET + 3],
    );

    let sdl_start = RT_MSGHDR_LEN + sockaddr_span(sin[0]);
    let sdl = msg
        .get(sdl_start..sdl_start + SDL_HEADER_LEN)
        .ok_or_else(|| QueryError::malformed(offset + sdl_start, "link-layer sockaddr outside message"))?;

    let alen = sdl[SDL_ALEN_OFFSET];
    if alen == 0 {
        trace!(%ip, "Skipping unresolved neighbor");
        return Ok(None);
    }

    let lladdr_start = sdl_start + SDL_HEADER_LEN + usize::from(sdl[SDL_NLEN_OFFSET]);
    let hardware_address = msg
        .get(lladdr_start..lladdr_start + ETHER_ADDR_LEN)
        .and_then(MacAddress::from_slice)
        .ok_or_else(|| QueryError::malformed(offset + lladdr_start, "link-layer address outside message"))?;

    let sdl_index = u16::from_ne_bytes([sdl[SDL_INDEX_OFFSET], sdl[SDL_INDEX_OFFSET + 1]]);
    let ifindex = if sdl_index != 0 { sdl_index } else { rtm_index };
    let interface_name = names.name_of(u32::from(ifindex)).unwrap_or_default();

    trace!(%ip, mac = %hardware_address, ifindex, interface = %interface_name, "Decoded neighbor");

    Ok(Some(NeighborEntry {
        ip,
        interface_name,
        hardware_address,
    }))
}

/// Space a sockaddr occupies in a routing message (ROUNDUP to 4 bytes)
#[inline]
fn sockaddr_span(sa_len: u8) -> usize {
    if sa_len == 0 {
        4
    } else {
        (usize::from(sa_len) + 3) & !3
    }
}

#[inline]
fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_ne_bytes([buf[at], buf[at + 1]])
}
