// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LoRa air-time model.
//!
//! Pure function computing the time to put one LoRa packet on air, used by
//! the gateway engine to size the post-transmit quiet window that gives
//! other nodes in the cell a fair chance to transmit.

/// Parameters needed to estimate a packet's time on air.
#[derive(Debug, Clone, Copy)]
pub struct AirtimeParams {
    /// Spreading factor, 7..12.
    pub spreading_factor: u32,
    /// Explicit header mode: true if a header is sent. The Semtech formula's
    /// `EH` term is 1 only in *implicit* header mode (no header on air) and
    /// 0 when a header is sent, so `explicit_header == true` maps to `EH=0`
    /// and the `-20*EH` term drops out.
    pub explicit_header: bool,
    /// Low data rate optimization enabled.
    pub low_data_rate_optimize: bool,
    /// Coding rate as the integer 5..8 (4/5..4/8), not the 1..4 config index.
    pub coding_rate: u32,
    /// Bandwidth in kHz (125, 250, 500, ...).
    pub bandwidth_khz: f64,
    /// Preamble length in symbols.
    pub preamble_symbols: u32,
}

impl AirtimeParams {
    /// Build params from the 1..4 coderate config index used in §6's
    /// `coderate` key (1..4 -> 4/5..4/8).
    pub fn from_coderate_index(
        spreading_factor: u32,
        explicit_header: bool,
        low_data_rate_optimize: bool,
        coderate_index: u32,
        bandwidth_khz: f64,
        preamble_symbols: u32,
    ) -> Self {
        Self {
            spreading_factor,
            explicit_header,
            low_data_rate_optimize,
            coding_rate: coderate_index + 4,
            bandwidth_khz,
            preamble_symbols,
        }
    }
}

/// Computes the time on air, in seconds, for a packet of `payload_len` bytes.
///
/// Implements:
/// ```text
/// Ts   = 2^SF / (BW_kHz * 1000)
/// Tpre = (NP + 4.25) * Ts
/// Ns   = 8 + 1 + ceil((8*PL - 4*SF + 28 + 16 - 20*EH) / (4*(SF - 2*LDR))) * CR
/// Tpay = Ns * Ts
/// Tpacket = Tpre + Tpay
/// ```
pub fn airtime(params: AirtimeParams, payload_len: usize) -> f64 {
    let sf = params.spreading_factor as f64;
    let cr = params.coding_rate as f64;
    let np = params.preamble_symbols as f64;
    let eh = if params.explicit_header { 0.0 } else { 1.0 };
    let ldr = if params.low_data_rate_optimize {
        1.0
    } else {
        0.0
    };
    let pl = payload_len as f64;

    let ts = 2f64.powf(sf) / (params.bandwidth_khz * 1000.0);
    let tpre = (np + 4.25) * ts;

    let numerator = 8.0 * pl - 4.0 * sf + 28.0 + 16.0 - 20.0 * eh;
    let denominator = 4.0 * (sf - 2.0 * ldr);
    let payload_symbols = if numerator > 0.0 {
        (numerator / denominator).ceil()
    } else {
        0.0
    };
    let ns = 8.0 + 1.0 + payload_symbols * cr;
    let tpay = ns * ts;

    tpre + tpay
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balanced() -> AirtimeParams {
        AirtimeParams::from_coderate_index(9, true, false, 1, 125.0, 8)
    }

    #[test]
    fn airtime_is_positive_and_reasonable() {
        let t = airtime(balanced(), 29);
        assert!(t > 0.0 && t < 2.0, "airtime was {t}s");
    }

    #[test]
    fn airtime_monotone_in_payload_len() {
        let small = airtime(balanced(), 10);
        let large = airtime(balanced(), 200);
        assert!(large > small);
    }

    #[test]
    fn airtime_monotone_in_spreading_factor() {
        let mut p = balanced();
        p.spreading_factor = 7;
        let sf7 = airtime(p, 50);
        p.spreading_factor = 12;
        let sf12 = airtime(p, 50);
        assert!(sf12 > sf7);
    }

    #[test]
    fn airtime_monotone_in_coding_rate() {
        let mut p = balanced();
        p.coding_rate = 5;
        let cr5 = airtime(p, 50);
        p.coding_rate = 8;
        let cr8 = airtime(p, 50);
        assert!(cr8 > cr5);
    }

    #[test]
    fn airtime_monotone_in_preamble() {
        let mut p = balanced();
        p.preamble_symbols = 4;
        let short = airtime(p, 50);
        p.preamble_symbols = 16;
        let long = airtime(p, 50);
        assert!(long > short);
    }

    #[test]
    fn implicit_header_mode_is_never_shorter_than_explicit() {
        // EH subtracts from the numerator only in implicit-header mode, so
        // dropping the header can only add symbols, never remove them.
        let mut p = balanced();
        p.explicit_header = true;
        let explicit = airtime(p, 50);
        p.explicit_header = false;
        let implicit = airtime(p, 50);
        assert!(implicit >= explicit);
    }

    #[test]
    fn airtime_antitone_in_bandwidth() {
        let mut p = balanced();
        p.bandwidth_khz = 125.0;
        let narrow = airtime(p, 50);
        p.bandwidth_khz = 500.0;
        let wide = airtime(p, 50);
        assert!(wide < narrow);
    }
}
