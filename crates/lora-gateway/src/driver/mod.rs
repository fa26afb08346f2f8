// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Modem driver abstraction (C4): a uniform contract over the three
//! concrete LoRa boards this gateway supports.

mod v1_binary;
mod v2_at;
mod v3_line;

pub use v1_binary::{keepalive_period, L072ZDriver};
pub use v2_at::Rak811Driver;
pub use v3_line::LoStickDriver;

use std::io::{self, Read, Write};
use std::time::Duration;

use rand::Rng;

use crate::airtime::{airtime, AirtimeParams};
use crate::error::DriverError;

/// Forwards to a boxed `serialport::SerialPort` by explicit method calls,
/// so the concrete driver structs can stay generic over a plain
/// `Read + Write + Send` serial type without depending on whether a boxed
/// trait object nominally implements its own supertraits.
pub struct SerialHandle(pub Box<dyn serialport::SerialPort>);

impl Read for SerialHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for SerialHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Two symmetric radio parameter blocks, named exactly as in spec §3.
#[derive(Debug, Clone, Copy)]
pub struct RadioTxConfig {
    pub channel_hz: u32,
    pub bandwidth_index: u8,
    pub spreading_factor: u32,
    pub coderate_index: u32,
    pub preamble_len: u16,
    pub power_dbm: i8,
    pub explicit_header: bool,
    pub crc_on: bool,
    pub iq_inverted: bool,
    pub timeout_ms: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RadioRxConfig {
    pub channel_hz: u32,
    pub bandwidth_index: u8,
    pub spreading_factor: u32,
    pub coderate_index: u32,
    pub preamble_len: u16,
    pub symb_timeout: u8,
    pub explicit_header: bool,
    pub crc_on: bool,
    pub iq_inverted: bool,
    pub continuous_rx: bool,
}

impl RadioRxConfig {
    pub fn bandwidth_khz(&self) -> f64 {
        bandwidth_index_to_khz(self.bandwidth_index)
    }
}

impl RadioTxConfig {
    pub fn bandwidth_khz(&self) -> f64 {
        bandwidth_index_to_khz(self.bandwidth_index)
    }
}

pub fn bandwidth_index_to_khz(index: u8) -> f64 {
    match index {
        0 => 125.0,
        1 => 250.0,
        2 => 500.0,
        _ => 125.0,
    }
}

/// A uniform capability set implemented by each of the three board
/// variants. `send_radio_frame` already includes the half-duplex pacing
/// window (spec §4.4); callers need only chop outbound bytes into chunks
/// of at most `max_lora_frame_sz` and call this once per chunk.
pub trait ModemDriver: Send {
    /// Opens the serial port, performs the vendor handshake, pushes the TX
    /// and RX radio config, and leaves the radio listening.
    fn init(&mut self) -> Result<(), DriverError>;

    /// Transmits one chunk of on-air bytes, then blocks for the
    /// half-duplex pacing window before returning.
    fn send_radio_frame(&mut self, payload: &[u8]) -> Result<(), DriverError>;

    /// Non-blocking read of any bytes the modem has made available.
    /// Returns an empty vec if nothing is available.
    fn recv_radio_frame(&mut self) -> Result<Vec<u8>, DriverError>;

    /// Idempotent teardown.
    fn stop(&mut self) -> Result<(), DriverError>;

    /// Called once per `DriverMaintenance` wake. Only the V1 (binary)
    /// variant does anything here; the others default to a no-op.
    fn keepalive(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

impl ModemDriver for Box<dyn ModemDriver> {
    fn init(&mut self) -> Result<(), DriverError> {
        (**self).init()
    }

    fn send_radio_frame(&mut self, payload: &[u8]) -> Result<(), DriverError> {
        (**self).send_radio_frame(payload)
    }

    fn recv_radio_frame(&mut self) -> Result<Vec<u8>, DriverError> {
        (**self).recv_radio_frame()
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        (**self).stop()
    }

    fn keepalive(&mut self) -> Result<(), DriverError> {
        (**self).keepalive()
    }
}

/// Shared half-duplex pacing: blocks for
/// `max_time_transmission + random(0, airtime(payload))`, per spec §4.4.
/// `max_time_transmission` is precomputed by the caller with
/// `PL = maxLoraFrameSz` under the TX radio parameters.
pub fn pace(tx: &RadioTxConfig, max_time_transmission: Duration, payload_len: usize) {
    let params = AirtimeParams::from_coderate_index(
        tx.spreading_factor,
        tx.explicit_header,
        tx.spreading_factor >= 11,
        tx.coderate_index,
        tx.bandwidth_khz(),
        tx.preamble_len as u32,
    );
    let airtime_secs = airtime(params, payload_len);
    let jitter = rand::thread_rng().gen_range(0.0..airtime_secs.max(0.0001));
    let window = max_time_transmission + Duration::from_secs_f64(jitter);
    std::thread::sleep(window);
}

/// Precomputes `max_time_transmission` for a session: the airtime of a
/// full `max_lora_frame_sz`-byte payload under the configured TX params.
pub fn max_time_transmission(tx: &RadioTxConfig, max_lora_frame_sz: usize) -> Duration {
    let params = AirtimeParams::from_coderate_index(
        tx.spreading_factor,
        tx.explicit_header,
        tx.spreading_factor >= 11,
        tx.coderate_index,
        tx.bandwidth_khz(),
        tx.preamble_len as u32,
    );
    Duration::from_secs_f64(airtime(params, max_lora_frame_sz))
}

/// A minimal in-memory duplex stream used by driver unit tests in place of
/// a real serial port, modeled after the mock hardware doubles used for the
/// reference radio driver tests.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};

    #[derive(Default)]
    pub struct MockSerial {
        pub written: Vec<u8>,
        pub to_read: VecDeque<u8>,
    }

    impl MockSerial {
        pub fn with_script(bytes: &[u8]) -> Self {
            Self {
                written: Vec::new(),
                to_read: bytes.iter().copied().collect(),
            }
        }

        pub fn queue(&mut self, bytes: &[u8]) {
            self.to_read.extend(bytes.iter().copied());
        }
    }

    impl Read for MockSerial {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut n = 0;
            while n < buf.len() {
                match self.to_read.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
    }

    impl Write for MockSerial {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
