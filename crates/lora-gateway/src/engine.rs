// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The gateway engine (C5): egress (IP -> LoRa) and ingress (LoRa -> IP)
//! paths, and the three worker threads that drive them.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codec::Transforms;
use crate::driver::ModemDriver;
use crate::frame::{encode, RollingBuffer};
use crate::rohc::{NoRohc, RohcCompressor, RohcDecompressor};
use crate::stats::GatewayStats;

const MAX_TRANSFORMED_PAYLOAD: usize = 0xFFFE;
const MAC_PREFIX: [u8; 5] = [0x10, 0x2a, 0x10, 0x2a, 0x10];
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Resolves an IPv4 destination to its link-layer neighbor, the way the
/// host's ARP cache would for a directly-attached /28.
pub trait ArpTable: Send + Sync {
    fn lookup(&self, ip: Ipv4Addr) -> Option<[u8; 6]>;
}

/// Source of outbound IPv4 datagrams diverted from the synthetic interface
/// (an NFQUEUE-style packet queue in the production adapter).
pub trait EgressSource: Send {
    /// Blocks until a datagram is available, or returns `Ok(None)` on
    /// cooperative shutdown.
    fn recv_datagram(&mut self) -> std::io::Result<Option<Vec<u8>>>;
}

/// Sink for inbound IPv4 datagrams recovered from the radio, re-injected
/// into the kernel as a raw IP packet.
pub trait IngressSink: Send {
    fn inject_datagram(&mut self, datagram: &[u8]) -> std::io::Result<()>;
}

/// Static resolution table for a /28: `last octet mod 16` -> synthetic MAC.
/// Grounded on the fixed ARP seeding the host-OS adapter performs at start.
pub struct StaticArpTable {
    local_addr: u8,
}

impl StaticArpTable {
    pub fn new(local_addr: u8) -> Self {
        Self { local_addr }
    }

    pub fn mac_for(addr: u8) -> [u8; 6] {
        let mut mac = [0u8; 6];
        mac[..5].copy_from_slice(&MAC_PREFIX);
        mac[5] = addr;
        mac
    }
}

impl ArpTable for StaticArpTable {
    fn lookup(&self, ip: Ipv4Addr) -> Option<[u8; 6]> {
        let last = ip.octets()[3];
        let addr = last % 16;
        if addr == self.local_addr || !(1..=14).contains(&addr) {
            return None;
        }
        Some(Self::mac_for(addr))
    }
}

/// Validates a resolved MAC against the reserved gateway prefix and
/// extracts its low-nibble LoRa address, or `None` if either check fails.
pub fn lora_address_from_mac(mac: [u8; 6]) -> Option<u8> {
    if mac[..5] != MAC_PREFIX {
        return None;
    }
    let addr = mac[5];
    if (1..=14).contains(&addr) {
        Some(addr)
    } else {
        None
    }
}

/// Recomputes the TCP checksum over an IPv4/TCP datagram in place. Other
/// protocols (UDP, ICMP, ...) pass through unfixed, matching the reference
/// behavior: only TCP's checksum needs correcting after this detour through
/// user space.
pub fn fixup_checksum(datagram: &mut [u8]) {
    if datagram.len() < 20 {
        return;
    }
    let version = datagram[0] >> 4;
    if version != 4 {
        return;
    }
    let ihl = (datagram[0] & 0x0F) as usize * 4;
    if datagram.len() < ihl + 20 || ihl < 20 {
        return;
    }
    let protocol = datagram[9];
    if protocol != 6 {
        return; // not TCP
    }

    let src = [datagram[12], datagram[13], datagram[14], datagram[15]];
    let dst = [datagram[16], datagram[17], datagram[18], datagram[19]];
    let tcp_len = datagram.len() - ihl;

    datagram[ihl + 16] = 0;
    datagram[ihl + 17] = 0;

    let mut sum: u32 = 0;
    sum += u16::from_be_bytes([src[0], src[1]]) as u32;
    sum += u16::from_be_bytes([src[2], src[3]]) as u32;
    sum += u16::from_be_bytes([dst[0], dst[1]]) as u32;
    sum += u16::from_be_bytes([dst[2], dst[3]]) as u32;
    sum += protocol as u32;
    sum += tcp_len as u32;

    let tcp_segment = &datagram[ihl..];
    let mut chunks = tcp_segment.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += u16::from_be_bytes([*last, 0]) as u32;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    let checksum = !(sum as u16);
    let bytes = checksum.to_be_bytes();
    datagram[ihl + 16] = bytes[0];
    datagram[ihl + 17] = bytes[1];
}

/// Extracts the IPv4 destination address from an IPv4 datagram.
pub fn destination_of(datagram: &[u8]) -> Option<Ipv4Addr> {
    if datagram.len() < 20 || datagram[0] >> 4 != 4 {
        return None;
    }
    Some(Ipv4Addr::new(datagram[16], datagram[17], datagram[18], datagram[19]))
}

/// Builds the on-air bytes for one datagram: runs it through the codec
/// transforms, assembles the frame, and returns `None` if the transformed
/// payload would overflow the 2-byte size field.
pub fn build_on_air_frame(datagram: &[u8], dest_addr: u8, transforms: &Transforms) -> Option<Vec<u8>> {
    let (flags, transformed) = transforms.encode(datagram);
    if transformed.len() > MAX_TRANSFORMED_PAYLOAD {
        return None;
    }
    Some(encode(dest_addr, flags, &transformed, datagram))
}

/// Splits an already-framed wire buffer into segments of at most
/// `max_lora_frame_sz` bytes for individual `send_radio_frame` calls. The
/// framer is byte-order-preserving and buffers across calls, so chunk
/// boundaries here carry no framing significance of their own.
pub fn chunk_frame(wire: &[u8], max_lora_frame_sz: usize) -> impl Iterator<Item = &[u8]> {
    wire.chunks(max_lora_frame_sz.max(1))
}

/// Engine-wide cooperative shutdown flag, shared across the three worker
/// threads.
#[derive(Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Wires the modem, the codec pipeline, and the host-OS packet boundary
/// into the engine's egress and ingress paths.
pub struct GatewayEngine<D: ModemDriver> {
    driver: Arc<Mutex<D>>,
    local_addr: u8,
    max_lora_frame_sz: usize,
    transforms: Arc<Transforms>,
    rohc_compressor: Option<Mutex<Box<dyn RohcCompressor>>>,
    rohc_decompressor: Option<Mutex<Box<dyn RohcDecompressor>>>,
    arp: Arc<dyn ArpTable>,
    stats: GatewayStats,
    running: RunFlag,
}

impl<D: ModemDriver + 'static> GatewayEngine<D> {
    pub fn new(
        driver: D,
        local_addr: u8,
        max_lora_frame_sz: usize,
        transforms: Transforms,
        arp: Arc<dyn ArpTable>,
        stats: GatewayStats,
    ) -> Self {
        Self::with_rohc(driver, local_addr, max_lora_frame_sz, transforms, false, arp, stats)
    }

    /// Like [`Self::new`], additionally enabling the header-compression
    /// stage when `rohc_compression` is set, using the identity transform
    /// ([`NoRohc`]) shipped with this crate. Both ends of the link must
    /// agree on this setting, since it is not signaled on the wire.
    #[allow(clippy::too_many_arguments)]
    pub fn with_rohc(
        driver: D,
        local_addr: u8,
        max_lora_frame_sz: usize,
        transforms: Transforms,
        rohc_compression: bool,
        arp: Arc<dyn ArpTable>,
        stats: GatewayStats,
    ) -> Self {
        let rohc: Option<(Box<dyn RohcCompressor>, Box<dyn RohcDecompressor>)> =
            rohc_compression.then(|| (Box::new(NoRohc) as Box<dyn RohcCompressor>, Box::new(NoRohc) as Box<dyn RohcDecompressor>));
        Self::with_rohc_impls(driver, local_addr, max_lora_frame_sz, transforms, rohc, arp, stats)
    }

    /// Like [`Self::new`], with an explicit, injected pair of per-direction
    /// header-compression implementations (`None` disables the stage
    /// entirely). This is the actual plug point: embedders with a real
    /// ROHC implementation wire it in here instead of relying on
    /// [`Self::with_rohc`]'s identity default.
    #[allow(clippy::too_many_arguments)]
    pub fn with_rohc_impls(
        driver: D,
        local_addr: u8,
        max_lora_frame_sz: usize,
        transforms: Transforms,
        rohc: Option<(Box<dyn RohcCompressor>, Box<dyn RohcDecompressor>)>,
        arp: Arc<dyn ArpTable>,
        stats: GatewayStats,
    ) -> Self {
        let (compressor, decompressor) = match rohc {
            Some((c, d)) => (Some(Mutex::new(c)), Some(Mutex::new(d))),
            None => (None, None),
        };
        Self {
            driver: Arc::new(Mutex::new(driver)),
            local_addr,
            max_lora_frame_sz,
            transforms: Arc::new(transforms),
            rohc_compressor: compressor,
            rohc_decompressor: decompressor,
            arp,
            stats,
            running: RunFlag::new(),
        }
    }

    pub fn run_flag(&self) -> RunFlag {
        self.running.clone()
    }

    /// Processes one outbound IPv4 datagram: checksum fixup, address
    /// resolution, codec + framing, chunking, and transmission. Returns
    /// `true` if the datagram was sent (wholly or in part).
    pub fn handle_egress_datagram(&self, mut datagram: Vec<u8>) -> bool {
        fixup_checksum(&mut datagram);

        let dest = match destination_of(&datagram) {
            Some(d) => d,
            None => {
                debug!("dropping non-IPv4 egress frame");
                return false;
            }
        };

        let mac = match self.arp.lookup(dest) {
            Some(mac) => mac,
            None => {
                warn!(%dest, "no ARP entry for egress destination; dropping");
                self.stats.record_egress_dropped_address();
                return false;
            }
        };

        let dest_addr = match lora_address_from_mac(mac) {
            Some(addr) => addr,
            None => {
                warn!(%dest, "resolved MAC outside reserved gateway prefix; dropping");
                self.stats.record_egress_dropped_address();
                return false;
            }
        };

        let on_air_payload = match &self.rohc_compressor {
            Some(rohc) => rohc.lock().expect("rohc compressor mutex poisoned").compress(&datagram),
            None => datagram,
        };

        let wire = match build_on_air_frame(&on_air_payload, dest_addr, &self.transforms) {
            Some(w) => w,
            None => {
                warn!(len = on_air_payload.len(), "transformed payload overflow; dropping");
                self.stats.record_egress_dropped_overflow();
                return false;
            }
        };

        self.stats.record_datagram_egress();

        let mut driver = self.driver.lock().expect("driver mutex poisoned");
        for chunk in chunk_frame(&wire, self.max_lora_frame_sz) {
            if let Err(err) = driver.send_radio_frame(chunk) {
                warn!(%err, "send_radio_frame failed");
                return false;
            }
            self.stats.record_frame_tx(chunk.len());
        }
        true
    }

    /// Runs the `EgressQueue` activity: pulls datagrams from `source` and
    /// feeds each through [`Self::handle_egress_datagram`] until shutdown.
    pub fn run_egress_queue(&self, mut source: impl EgressSource) {
        while self.running.is_running() {
            match source.recv_datagram() {
                Ok(Some(datagram)) => {
                    self.handle_egress_datagram(datagram);
                }
                Ok(None) => break,
                Err(err) => warn!(%err, "egress source read failed"),
            }
        }
    }

    /// Runs the `IngressPoll` activity: polls the modem, drains the rolling
    /// buffer, and injects every decoded frame addressed to this node.
    pub fn run_ingress_poll(&self, mut sink: impl IngressSink) {
        let mut rolling = RollingBuffer::new();

        while self.running.is_running() {
            let bytes = {
                let mut driver = self.driver.lock().expect("driver mutex poisoned");
                driver.recv_radio_frame()
            };

            match bytes {
                Ok(bytes) if !bytes.is_empty() => rolling.push(&bytes),
                Ok(_) => {}
                Err(err) => {
                    warn!(%err, "recv_radio_frame failed");
                    std::thread::sleep(IDLE_POLL_INTERVAL);
                    continue;
                }
            }

            loop {
                let result = rolling.drain_one(self.local_addr, &self.transforms);
                self.stats.record_resync_steps(result.resync_steps);
                match result.frame {
                    Some(frame) => {
                        self.stats.record_frame_rx_ok(frame.cleartext_payload.len());

                        let datagram = match &self.rohc_decompressor {
                            Some(rohc) => {
                                match rohc
                                    .lock()
                                    .expect("rohc decompressor mutex poisoned")
                                    .decompress(&frame.cleartext_payload)
                                {
                                    Some(d) => d,
                                    None => {
                                        debug!("rohc decompress failed; dropping frame");
                                        self.stats.record_frame_rx_dropped();
                                        continue;
                                    }
                                }
                            }
                            None => frame.cleartext_payload,
                        };

                        self.stats.record_datagram_ingress();
                        if let Err(err) = sink.inject_datagram(&datagram) {
                            warn!(%err, "inject_datagram failed");
                        }
                    }
                    None => break,
                }
            }

            if rolling.is_empty() {
                std::thread::sleep(IDLE_POLL_INTERVAL);
            }
        }
    }

    /// Runs the `DriverMaintenance` activity (V1 keepalive): wakes once per
    /// second, emitting a keepalive every `period`.
    pub fn run_driver_maintenance(&self, period: Duration) {
        let mut elapsed = Duration::ZERO;
        while self.running.is_running() {
            std::thread::sleep(Duration::from_secs(1));
            elapsed += Duration::from_secs(1);
            if elapsed >= period {
                elapsed = Duration::ZERO;
                let mut driver = self.driver.lock().expect("driver mutex poisoned");
                if let Err(err) = driver.keepalive() {
                    warn!(%err, "keepalive failed");
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.running.stop();
        info!("gateway engine shutting down");
        if let Ok(mut driver) = self.driver.lock() {
            if let Err(err) = driver.stop() {
                warn!(%err, "driver stop failed during shutdown");
            }
        }
    }
}
