//! Routing-socket ARP table via `sysctl(3)` (Darwin)
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-7: Boundary Protection - Read-only kernel routing interface
//! - SC-5: DoS Protection - Buffer sized exactly to the kernel's report
//!
//! The kernel call sits behind [`RouteSysctl`] so each phase of the
//! two-phase fetch can fail independently in tests.

use super::route_msg::decode_route_dump;
use super::{InterfaceTable, NeighborSource};
use crate::error::QueryError;
use crate::types::NeighborEntry;
use std::io;
use tracing::{debug, instrument};

/// The two calls of a sized `sysctl` read
#[cfg_attr(test, mockall::automock)]
pub trait RouteSysctl: Send + Sync {
    /// Size in bytes the kernel would currently return
    fn required_len(&self) -> io::Result<usize>;

    /// Fill `buf`, returning the number of bytes written
    fn read_into(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// `{CTL_NET, PF_ROUTE, 0, AF_INET, NET_RT_FLAGS, RTF_LLINFO}` on the running kernel
#[cfg(target_vendor = "apple")]
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelRouteSysctl;

#[cfg(target_vendor = "apple")]
impl KernelRouteSysctl {
    fn mib() -> [libc::c_int; 6] {
        [
            libc::CTL_NET,
            libc::PF_ROUTE,
            0,
            libc::AF_INET,
            libc::NET_RT_FLAGS,
            libc::RTF_LLINFO,
        ]
    }

    fn call(buf: *mut libc::c_void, len: &mut libc::size_t) -> io::Result<()> {
        let mut mib = Self::mib();
        let rc = unsafe {
            libc::sysctl(
                mib.as_mut_ptr(),
                mib.len() as libc::c_uint,
                buf,
                len,
                std::ptr::null_mut(),
                0,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(target_vendor = "apple")]
impl RouteSysctl for KernelRouteSysctl {
    fn required_len(&self) -> io::Result<usize> {
        let mut len: libc::size_t = 0;
        Self::call(std::ptr::null_mut(), &mut len)?;
        Ok(len)
    }

    fn read_into(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut len: libc::size_t = buf.len();
        Self::call(buf.as_mut_ptr().cast(), &mut len)?;
        Ok(len)
    }
}

/// ARP table source over the routing sysctl
pub struct RouteSysctlSource {
    sysctl: Box<dyn RouteSysctl>,
}

impl RouteSysctlSource {
    /// Source over the running kernel
    #[cfg(target_vendor = "apple")]
    pub fn new() -> Self {
        Self::with_sysctl(KernelRouteSysctl)
    }

    /// Source over an explicit sysctl implementation
    pub fn with_sysctl(sysctl: impl RouteSysctl + 'static) -> Self {
        Self {
            sysctl: Box::new(sysctl),
        }
    }

    /// Two-phase fetch: ask for the size, allocate exactly that, fill it
    #[instrument(skip(self))]
    fn fetch_dump(&self) -> Result<Vec<u8>, QueryError> {
        let len = self.sysctl.required_len().map_err(QueryError::LengthQuery)?;

        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| QueryError::Allocation { bytes: len })?;
        buf.resize(len, 0);

        let written = self.sysctl.read_into(&mut buf).map_err(QueryError::DataQuery)?;

        // The table may have shrunk between the two calls
        buf.truncate(written);
        debug!(bytes = buf.len(), "Fetched routing-socket ARP dump");
        Ok(buf)
    }
}

#[cfg(target_vendor = "apple")]
impl Default for RouteSysctlSource {
    fn default() -> Self {
        Self::new()
    }
}

impl NeighborSource for RouteSysctlSource {
    fn name(&self) -> &'static str {
        "route-sysctl"
    }

    fn fetch(&self) -> Result<Vec<NeighborEntry>, QueryError> {
        let dump = self.fetch_dump()?;
        let names = InterfaceTable::fetch();
        decode_route_dump(&dump, &names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbor::route_msg::tests::route_message;
    use std::net::Ipv4Addr;

    fn dump() -> Vec<u8> {
        let mut buf = route_message([192, 168, 1, 1], 4, 4, b"", &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
        buf.extend(route_message([192, 168, 1, 2], 4, 4, b"", &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02]));
        buf
    }

    #[test]
    fn test_length_query_failure_aborts_before_data_query() {
        let mut sysctl = MockRouteSysctl::new();
        sysctl
            .expect_required_len()
            .returning(|| Err(io::Error::from_raw_os_error(libc::EPERM)));
        sysctl.expect_read_into().never();

        let err = RouteSysctlSource::with_sysctl(sysctl).fetch().unwrap_err();
        assert!(matches!(err, QueryError::LengthQuery(_)));
    }

    #[test]
    fn test_unallocatable_length_is_allocation_error() {
        let mut sysctl = MockRouteSysctl::new();
        sysctl.expect_required_len().returning(|| Ok(usize::MAX));
        sysctl.expect_read_into().never();

        let err = RouteSysctlSource::with_sysctl(sysctl).fetch().unwrap_err();
        assert!(matches!(err, QueryError::Allocation { bytes: usize::MAX }));
    }

    #[test]
    fn test_data_query_failure_is_reported() {
        let mut sysctl = MockRouteSysctl::new();
        sysctl.expect_required_len().returning(|| Ok(256));
        sysctl
            .expect_read_into()
            .times(1)
            .returning(|_| Err(io::Error::from_raw_os_error(libc::ENOMEM)));

        let err = RouteSysctlSource::with_sysctl(sysctl).fetch().unwrap_err();
        assert!(matches!(err, QueryError::DataQuery(_)));
    }

    #[test]
    fn test_dump_is_decoded_in_kernel_order() {
        let bytes = dump();
        let len = bytes.len();
        let mut sysctl = MockRouteSysctl::new();
        sysctl.expect_required_len().returning(move || Ok(len));
        sysctl.expect_read_into().returning(move |buf| {
            buf[..bytes.len()].copy_from_slice(&bytes);
            Ok(bytes.len())
        });

        let entries = RouteSysctlSource::with_sysctl(sysctl).fetch().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].ip, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(entries[1].hardware_address.to_string(), "aa:bb:cc:dd:ee:02");
    }

    #[test]
    fn test_table_shrinking_between_calls_truncates() {
        let bytes = dump();
        let first = route_message([192, 168, 1, 1], 4, 4, b"", &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
        let len = bytes.len();
        let mut sysctl = MockRouteSysctl::new();
        sysctl.expect_required_len().returning(move || Ok(len));
        sysctl.expect_read_into().returning(move |buf| {
            buf[..first.len()].copy_from_slice(&first);
            Ok(first.len())
        });

        let entries = RouteSysctlSource::with_sysctl(sysctl).fetch().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_empty_table_is_empty_snapshot() {
        let mut sysctl = MockRouteSysctl::new();
        sysctl.expect_required_len().returning(|| Ok(0));
        sysctl.expect_read_into().returning(|_| Ok(0));

        assert!(RouteSysctlSource::with_sysctl(sysctl).fetch().unwrap().is_empty());
    }

    #[cfg(target_vendor = "apple")]
    #[test]
    fn test_live_dump_decodes() {
        let entries = RouteSysctlSource::new().fetch().unwrap();
        for entry in entries {
            assert_eq!(entry.hardware_address.to_string().len(), 17);
        }
    }
}
