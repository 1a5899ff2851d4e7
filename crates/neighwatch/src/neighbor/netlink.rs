//! rtnetlink neighbour dump (Linux)
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-7: Boundary Protection - Kernel netlink interface, read-only dump
//! - SI-10: Information Input Validation - Length-checked message walk
//!
//! One `RTM_GETNEIGH` dump request for `AF_INET`; replies are read until
//! `NLMSG_DONE`. Each datagram is a run of length-prefixed netlink messages.

use super::{InterfaceNames, InterfaceTable, NeighborSource};
use crate::error::QueryError;
use crate::types::{MacAddress, NeighborEntry};
use netlink_packet_core::{
    NLM_F_DUMP, NLM_F_REQUEST, NetlinkHeader, NetlinkMessage, NetlinkPayload,
};
use netlink_packet_route::neighbour::{NeighbourAddress, NeighbourAttribute, NeighbourMessage};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
use std::io;
use tracing::{debug, instrument, trace};

/// Default receive buffer for one dump datagram
pub const DEFAULT_RECV_BUFFER: usize = 32 * 1024;

const DUMP_SEQUENCE: u32 = 1;

/// Reads the IPv4 neighbour table through rtnetlink
#[derive(Debug, Clone)]
pub struct NetlinkNeighborSource {
    recv_buffer: usize,
}

impl Default for NetlinkNeighborSource {
    fn default() -> Self {
        Self::new(DEFAULT_RECV_BUFFER)
    }
}

impl NetlinkNeighborSource {
    pub fn new(recv_buffer: usize) -> Self {
        Self { recv_buffer }
    }

    /// Open a route netlink socket connected to the kernel
    fn open(&self) -> Result<Socket, QueryError> {
        let mut socket = Socket::new(NETLINK_ROUTE).map_err(QueryError::DataQuery)?;
        socket.bind_auto().map_err(QueryError::DataQuery)?;
        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(QueryError::DataQuery)?;
        Ok(socket)
    }

    /// Send an RTM_GETNEIGH dump request restricted to AF_INET
    fn request_dump(&self, socket: &Socket) -> Result<(), QueryError> {
        let mut header = NetlinkHeader::default();
        header.flags = NLM_F_REQUEST | NLM_F_DUMP;
        header.sequence_number = DUMP_SEQUENCE;

        let mut neigh = NeighbourMessage::default();
        neigh.header.family = AddressFamily::Inet;

        let mut packet = NetlinkMessage::new(
            header,
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::GetNeighbour(neigh)),
        );
        packet.finalize();

        let mut buf = vec![0u8; packet.buffer_len()];
        packet.serialize(&mut buf);

        socket.send(&buf, 0).map_err(QueryError::DataQuery)?;
        debug!("Requested IPv4 neighbour dump");
        Ok(())
    }
}

impl NeighborSource for NetlinkNeighborSource {
    fn name(&self) -> &'static str {
        "netlink"
    }

    #[instrument(skip(self))]
    fn fetch(&self) -> Result<Vec<NeighborEntry>, QueryError> {
        let socket = self.open()?;
        self.request_dump(&socket)?;

        let names = InterfaceTable::fetch();
        let mut entries = Vec::new();
        let mut buf: Vec<u8> = Vec::with_capacity(self.recv_buffer);

        loop {
            buf.clear();
            let len = socket.recv(&mut buf, 0).map_err(QueryError::DataQuery)?;
            if len == 0 {
                return Err(QueryError::DataQuery(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "netlink socket closed before end of dump",
                )));
            }
            if decode_dump(&buf[..len], &names, &mut entries)? {
                break;
            }
        }

        Ok(entries)
    }
}

/// Decode one dump datagram, appending resolved neighbours to `entries`
///
/// Returns `true` once the datagram carries `NLMSG_DONE`.
pub fn decode_dump(
    buf: &[u8],
    names: &dyn InterfaceNames,
    entries: &mut Vec<NeighborEntry>,
) -> Result<bool, QueryError> {
    let mut offset = 0;

    while offset < buf.len() {
        let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buf[offset..])
            .map_err(|e| QueryError::malformed(offset, e.to_string()))?;

        let len = msg.header.length as usize;
        if len == 0 {
            return Err(QueryError::malformed(offset, "zero-length netlink message"));
        }

        match msg.payload {
            NetlinkPayload::Done(_) => return Ok(true),
            NetlinkPayload::Error(err) => {
                if let Some(code) = err.code {
                    return Err(QueryError::DataQuery(io::Error::from_raw_os_error(
                        -code.get(),
                    )));
                }
            }
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewNeighbour(neigh)) => {
                if let Some(entry) = entry_from_neighbour(&neigh, names) {
                    entries.push(entry);
                }
            }
            _ => {}
        }

        // Align to 4 bytes (netlink alignment requirement)
        offset += (len + 3) & !3;
    }

    Ok(false)
}

/// Convert a neighbour message, `None` for non-IPv4 or unresolved entries
pub fn entry_from_neighbour(
    neigh: &NeighbourMessage,
    names: &dyn InterfaceNames,
) -> Option<NeighborEntry> {
    if neigh.header.family != AddressFamily::Inet {
        return None;
    }

    let mut ip = None;
    let mut lladdr: Option<&[u8]> = None;
    for attr in &neigh.attributes {
        match attr {
            NeighbourAttribute::Destination(NeighbourAddress::Inet(v4)) => ip = Some(*v4),
            NeighbourAttribute::LinkLocalAddress(bytes) => lladdr = Some(bytes.as_slice()),
            _ => {}
        }
    }

    let ip = ip?;
    let Some(hardware_address) = lladdr
        .filter(|bytes| bytes.len() == 6)
        .and_then(MacAddress::from_slice)
    else {
        trace!(%ip, "Skipping neighbour without a resolved link-layer address");
        return None;
    };

    let interface_name = names.name_of(neigh.header.ifindex).unwrap_or_default();

    trace!(%ip, mac = %hardware_address, interface = %interface_name, "Decoded neighbour");
    Some(NeighborEntry {
        ip,
        interface_name,
        hardware_address,
    })
}
