// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host-OS adapter (C6): creates and tears down the synthetic link-layer
//! interface the gateway bridges onto, and seeds the static ARP entries
//! for every other address in its /28.
//!
//! Interface manipulation shells out to `ip`/`arp`, mirroring the
//! reference adapter's own use of host networking tools rather than a
//! netlink binding — there is exactly one of these calls per engine
//! start/stop, so the process-spawn overhead is immaterial.

use std::io;
use std::net::Ipv4Addr;
use std::process::Command;

use tracing::{debug, warn};

use crate::engine::{EgressSource, IngressSink, StaticArpTable};
use crate::error::GatewayError;

const IFACE_NAME: &str = "lora0";

/// Runs `ip`/`arp` to bring up the synthetic interface, assign its address,
/// and seed ARP for the rest of the cell. Call [`HostInterface::teardown`]
/// on clean shutdown.
pub struct HostInterface {
    iface: String,
    local_addr: u8,
}

impl HostInterface {
    pub fn new(local_addr: u8) -> Self {
        Self {
            iface: IFACE_NAME.to_string(),
            local_addr,
        }
    }

    pub fn iface_name(&self) -> &str {
        &self.iface
    }

    pub fn mac(&self) -> [u8; 6] {
        StaticArpTable::mac_for(self.local_addr)
    }

    fn mac_string(&self) -> String {
        let mac = self.mac();
        mac.iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Creates the dummy interface, sets its MAC/MTU, assigns `ip_addr/28`,
    /// brings it up, and seeds static ARP for every other address in the
    /// cell so egress lookups in [`crate::engine::StaticArpTable`] resolve.
    pub fn setup(&self, ip_addr: Ipv4Addr, mtu: u16) -> Result<(), GatewayError> {
        run(Command::new("ip").args(["link", "add", &self.iface, "type", "dummy"]))?;
        run(Command::new("ip").args(["link", "set", &self.iface, "address", &self.mac_string()]))?;
        run(Command::new("ip").args(["link", "set", &self.iface, "mtu", &mtu.to_string()]))?;
        run(Command::new("ip").args([
            "addr",
            "add",
            &format!("{ip_addr}/28"),
            "dev",
            &self.iface,
        ]))?;
        run(Command::new("ip").args(["link", "set", &self.iface, "up"]))?;

        for addr in 1u8..=14 {
            if addr == self.local_addr {
                continue;
            }
            let neighbor_mac = StaticArpTable::mac_for(addr)
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(":");
            let neighbor_ip = neighbor_ip_in_same_net(ip_addr, addr);
            run(Command::new("arp").args([
                "-s",
                &neighbor_ip.to_string(),
                &neighbor_mac,
                "-i",
                &self.iface,
            ]))?;
        }

        debug!(iface = %self.iface, %ip_addr, "synthetic interface up");
        Ok(())
    }

    /// Removes the interface; idempotent (best-effort on "does not exist").
    pub fn teardown(&self) {
        if let Err(err) = run(Command::new("ip").args(["link", "delete", &self.iface, "type", "dummy"])) {
            warn!(%err, iface = %self.iface, "failed to remove synthetic interface");
        }
    }
}

/// Computes the neighbor's IP address in the same /28 as `local_ip`, by
/// replacing the low nibble of the last octet with `addr`.
fn neighbor_ip_in_same_net(local_ip: Ipv4Addr, addr: u8) -> Ipv4Addr {
    let octets = local_ip.octets();
    let base = octets[3] & 0xF0;
    Ipv4Addr::new(octets[0], octets[1], octets[2], base | addr)
}

fn run(cmd: &mut Command) -> Result<(), GatewayError> {
    let status = cmd.status().map_err(GatewayError::Io)?;
    if !status.success() {
        warn!(?cmd, ?status, "host networking command exited non-zero");
    }
    Ok(())
}

/// Injects recovered IPv4 datagrams into the kernel with a raw
/// `IPPROTO_RAW` socket and `IP_HDRINCL`, so the datagram's own header is
/// used verbatim and the kernel routes it as if it had arrived normally.
pub struct RawSocketIngressSink {
    fd: libc::c_int,
}

impl RawSocketIngressSink {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_RAW) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let on: libc::c_int = 1;
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IP,
                libc::IP_HDRINCL,
                &on as *const _ as *const libc::c_void,
                std::mem::size_of_val(&on) as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        Ok(Self { fd })
    }
}

impl IngressSink for RawSocketIngressSink {
    fn inject_datagram(&mut self, datagram: &[u8]) -> io::Result<()> {
        if datagram.len() < 20 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "datagram shorter than an IPv4 header"));
        }
        let dest = Ipv4Addr::new(datagram[16], datagram[17], datagram[18], datagram[19]);
        let sockaddr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: 0,
            sin_addr: libc::in_addr {
                s_addr: u32::from_ne_bytes(dest.octets()),
            },
            sin_zero: [0; 8],
        };
        let sent = unsafe {
            libc::sendto(
                self.fd,
                datagram.as_ptr() as *const libc::c_void,
                datagram.len(),
                0,
                &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for RawSocketIngressSink {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Reads outbound IPv4 datagrams off the synthetic interface with an
/// `AF_PACKET`-less raw IP socket bound to it. In production this is the
/// NFQUEUE diversion point named in the component design; this adapter
/// captures the same traffic with plain raw-socket reads, which is
/// sufficient since the engine only ever verdicts packets as `accept`.
pub struct RawSocketEgressSource {
    fd: libc::c_int,
    buf: [u8; 65535],
}

impl RawSocketEgressSource {
    pub fn new(iface: &str) -> io::Result<Self> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_RAW) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let ifname = std::ffi::CString::new(iface).expect("interface name must not contain NUL");
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_BINDTODEVICE,
                ifname.as_ptr() as *const libc::c_void,
                ifname.as_bytes().len() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        Ok(Self { fd, buf: [0u8; 65535] })
    }
}

impl EgressSource for RawSocketEgressSource {
    fn recv_datagram(&mut self) -> io::Result<Option<Vec<u8>>> {
        let n = unsafe { libc::read(self.fd, self.buf.as_mut_ptr() as *mut libc::c_void, self.buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Some(self.buf[..n as usize].to_vec()))
    }
}

impl Drop for RawSocketEgressSource {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbor_ip_replaces_low_nibble_of_last_octet() {
        let local = Ipv4Addr::new(10, 0, 0, 5);
        assert_eq!(neighbor_ip_in_same_net(local, 8), Ipv4Addr::new(10, 0, 0, 8));
        assert_eq!(neighbor_ip_in_same_net(local, 14), Ipv4Addr::new(10, 0, 0, 14));
    }

    #[test]
    fn neighbor_ip_preserves_high_nibble_block() {
        let local = Ipv4Addr::new(10, 0, 0, 21); // block base 16
        assert_eq!(neighbor_ip_in_same_net(local, 3), Ipv4Addr::new(10, 0, 0, 19));
    }

    #[test]
    fn host_interface_mac_uses_reserved_prefix() {
        let iface = HostInterface::new(7);
        assert_eq!(iface.mac(), [0x10, 0x2a, 0x10, 0x2a, 0x10, 0x07]);
    }
}
