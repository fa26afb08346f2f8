// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lock-free running counters shared between the engine's worker threads
//! and whatever reports them (CLI shutdown summary, future external
//! observability).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counters {
    frames_tx: AtomicU64,
    frames_rx_ok: AtomicU64,
    frames_rx_dropped: AtomicU64,
    resync_steps: AtomicU64,
    bytes_tx: AtomicU64,
    bytes_rx: AtomicU64,
    datagrams_egress: AtomicU64,
    datagrams_ingress: AtomicU64,
    egress_dropped_overflow: AtomicU64,
    egress_dropped_address: AtomicU64,
}

/// A cheaply-clonable handle onto the gateway's running counters.
#[derive(Debug, Default, Clone)]
pub struct GatewayStats {
    inner: Arc<Counters>,
}

/// A point-in-time copy of every counter, for logging or reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_tx: u64,
    pub frames_rx_ok: u64,
    pub frames_rx_dropped: u64,
    pub resync_steps: u64,
    pub bytes_tx: u64,
    pub bytes_rx: u64,
    pub datagrams_egress: u64,
    pub datagrams_ingress: u64,
    pub egress_dropped_overflow: u64,
    pub egress_dropped_address: u64,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame_tx(&self, bytes: usize) {
        self.inner.frames_tx.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_tx.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_frame_rx_ok(&self, bytes: usize) {
        self.inner.frames_rx_ok.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_rx.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_frame_rx_dropped(&self) {
        self.inner.frames_rx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resync_steps(&self, steps: usize) {
        if steps > 0 {
            self.inner.resync_steps.fetch_add(steps as u64, Ordering::Relaxed);
        }
    }

    pub fn record_datagram_egress(&self) {
        self.inner.datagrams_egress.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_datagram_ingress(&self) {
        self.inner.datagrams_ingress.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_egress_dropped_overflow(&self) {
        self.inner.egress_dropped_overflow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_egress_dropped_address(&self) {
        self.inner.egress_dropped_address.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_tx: self.inner.frames_tx.load(Ordering::Relaxed),
            frames_rx_ok: self.inner.frames_rx_ok.load(Ordering::Relaxed),
            frames_rx_dropped: self.inner.frames_rx_dropped.load(Ordering::Relaxed),
            resync_steps: self.inner.resync_steps.load(Ordering::Relaxed),
            bytes_tx: self.inner.bytes_tx.load(Ordering::Relaxed),
            bytes_rx: self.inner.bytes_rx.load(Ordering::Relaxed),
            datagrams_egress: self.inner.datagrams_egress.load(Ordering::Relaxed),
            datagrams_ingress: self.inner.datagrams_ingress.load(Ordering::Relaxed),
            egress_dropped_overflow: self.inner.egress_dropped_overflow.load(Ordering::Relaxed),
            egress_dropped_address: self.inner.egress_dropped_address.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_clones() {
        let stats = GatewayStats::new();
        let clone = stats.clone();

        stats.record_frame_tx(10);
        clone.record_frame_tx(20);
        clone.record_datagram_egress();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_tx, 2);
        assert_eq!(snap.bytes_tx, 30);
        assert_eq!(snap.datagrams_egress, 1);
    }

    #[test]
    fn resync_steps_of_zero_are_not_counted() {
        let stats = GatewayStats::new();
        stats.record_resync_steps(0);
        assert_eq!(stats.snapshot().resync_steps, 0);
    }
}
