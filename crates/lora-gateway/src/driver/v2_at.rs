// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! V2: AT-command modem protocol (e.g. RAK811).
//!
//! Commands are ASCII `"at+" + cmd + "\r\n"`; a successful reply matches
//! `.*OK .*`. Radio parameters are pushed through `set_config=...` commands
//! rather than a packed binary blob, and payloads travel as hex-encoded
//! ASCII inside `send=lorap2p:<hex>` / `at+recv=...:<hex>`.

use std::io::{Read, Write};
use std::time::Duration;

use crate::driver::{max_time_transmission, pace, ModemDriver, RadioRxConfig, RadioTxConfig};
use crate::error::DriverError;

const VERSION_RETRIES: u32 = 3;
const RX_CONFIG_RETRIES: u32 = 40;
const TRANSFER_MODE_RETRIES: u32 = 80;
const SEND_RETRIES: u32 = 80;
const RECV_LINE_RETRIES: u32 = 5;

pub struct Rak811Driver<S: Read + Write + Send> {
    serial: S,
    tx: RadioTxConfig,
    rx: RadioRxConfig,
    max_time_transmission: Duration,
}

impl<S: Read + Write + Send> Rak811Driver<S> {
    pub fn new(serial: S, tx: RadioTxConfig, rx: RadioRxConfig, max_lora_frame_sz: usize) -> Self {
        let max_time_transmission = max_time_transmission(&tx, max_lora_frame_sz);
        Self {
            serial,
            tx,
            rx,
            max_time_transmission,
        }
    }

    fn send_at_cmd(&mut self, cmd: &str) -> Result<String, DriverError> {
        let line = format!("at+{cmd}\r\n");
        self.serial.write_all(line.as_bytes())?;
        Ok(self.read_line())
    }

    fn read_line(&mut self) -> String {
        let mut buf = [0u8; 1024];
        let mut acc = Vec::new();
        loop {
            match self.serial.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    acc.extend_from_slice(&buf[..n]);
                    if acc.ends_with(b"\r\n") || acc.ends_with(b"\n") {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&acc).trim().to_string()
    }

    fn expect_ok(&mut self, cmd: &str, tries: u32) -> Result<String, DriverError> {
        let mut last = String::new();
        for _ in 0..tries {
            last = self.send_at_cmd(cmd)?;
            if is_ok_response(&last) {
                return Ok(last);
            }
        }
        Err(DriverError::InitHandshakeFailed(format!(
            "at+{cmd} never returned OK (last: {last:?})"
        )))
    }

    fn negotiate_version(&mut self) -> Result<(), DriverError> {
        for _ in 0..VERSION_RETRIES {
            let reply = self.send_at_cmd("version")?;
            if reply.contains("V3.0.0.") {
                return Ok(());
            }
            if reply.contains("Bootloader") {
                let _ = self.send_at_cmd("run")?;
                std::thread::sleep(Duration::from_secs(1));
            }
        }
        Err(DriverError::UnsupportedFirmware(
            "expected firmware version V3.0.0.x".to_string(),
        ))
    }

    fn region_for_channel(channel_hz: u32) -> &'static str {
        if (433_000_000..868_000_000).contains(&channel_hz) {
            "EU433"
        } else {
            "EU868"
        }
    }

    fn set_tx_mode(&mut self) -> Result<(), DriverError> {
        self.expect_ok("set_config=lorap2p:transfer_mode:2", TRANSFER_MODE_RETRIES)?;
        Ok(())
    }

    fn set_rx_mode(&mut self) -> Result<(), DriverError> {
        self.expect_ok("set_config=lorap2p:transfer_mode:1", TRANSFER_MODE_RETRIES)?;
        Ok(())
    }
}

fn is_ok_response(reply: &str) -> bool {
    reply.contains("OK ") || reply.trim_end().ends_with("OK")
}

impl<S: Read + Write + Send> ModemDriver for Rak811Driver<S> {
    fn init(&mut self) -> Result<(), DriverError> {
        self.negotiate_version()?;
        self.expect_ok("set_config=lora:work_mode:1", 1)?;
        self.expect_ok("set_config=device:sleep:0", 1)?;
        let region = Self::region_for_channel(self.rx.channel_hz);
        self.expect_ok(&format!("set_config=lora:region:{region}"), 1)?;

        let lorap2p = format!(
            "set_config=lorap2p:{}:{}:{}:{}:{}:{}",
            self.rx.channel_hz,
            self.rx.spreading_factor,
            self.rx.bandwidth_index,
            self.rx.coderate_index,
            self.rx.preamble_len,
            self.tx.power_dbm,
        );
        self.expect_ok(&lorap2p, RX_CONFIG_RETRIES)?;
        self.set_rx_mode()?;
        Ok(())
    }

    fn send_radio_frame(&mut self, payload: &[u8]) -> Result<(), DriverError> {
        self.set_tx_mode()?;
        let hex = hex_encode(payload);
        self.expect_ok(&format!("send=lorap2p:{hex}"), SEND_RETRIES)?;
        self.set_rx_mode()?;
        pace(&self.tx, self.max_time_transmission, payload.len());
        Ok(())
    }

    fn recv_radio_frame(&mut self) -> Result<Vec<u8>, DriverError> {
        let line = self.read_line();
        if line.is_empty() {
            return Ok(Vec::new());
        }

        let (header, hex_tail) = match parse_recv_line(&line) {
            Some(parts) => parts,
            None => return Ok(Vec::new()),
        };
        let want_hex_len = header * 2;

        let mut hex = hex_tail;
        for _ in 0..RECV_LINE_RETRIES {
            if hex.len() >= want_hex_len {
                break;
            }
            hex.push_str(&self.read_line());
        }

        hex_decode(&hex).ok_or_else(|| DriverError::ModeSwitch("malformed at+recv payload".to_string()))
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Parses `at+recv=<rssi>,<len>,<snr>:<hexdata>` into `(len, hexdata)`.
fn parse_recv_line(line: &str) -> Option<(usize, String)> {
    let rest = line.strip_prefix("at+recv=")?;
    let (meta, hex) = rest.split_once(':')?;
    let mut fields = meta.split(',');
    let _rssi = fields.next()?;
    let len: usize = fields.next()?.trim().parse().ok()?;
    Some((len, hex.trim().to_string()))
}

fn hex_encode(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02X}")).collect()
}

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockSerial;

    fn tx_cfg() -> RadioTxConfig {
        RadioTxConfig {
            channel_hz: 868_100_000,
            bandwidth_index: 0,
            spreading_factor: 7,
            coderate_index: 1,
            preamble_len: 8,
            power_dbm: 14,
            explicit_header: false,
            crc_on: false,
            iq_inverted: false,
            timeout_ms: 3000,
        }
    }

    fn rx_cfg() -> RadioRxConfig {
        RadioRxConfig {
            channel_hz: 868_100_000,
            bandwidth_index: 0,
            spreading_factor: 7,
            coderate_index: 1,
            preamble_len: 8,
            symb_timeout: 5,
            explicit_header: false,
            crc_on: false,
            iq_inverted: false,
            continuous_rx: true,
        }
    }

    #[test]
    fn region_selection_follows_channel_band() {
        assert_eq!(Rak811Driver::<MockSerial>::region_for_channel(433_000_000), "EU433");
        assert_eq!(Rak811Driver::<MockSerial>::region_for_channel(868_100_000), "EU868");
    }

    #[test]
    fn parses_recv_line_with_hex_payload() {
        let (len, hex) = parse_recv_line("at+recv=-80,2,10:48690D0A").unwrap();
        assert_eq!(len, 2);
        assert_eq!(hex, "48690D0A");
    }

    #[test]
    fn hex_roundtrip() {
        let data = vec![0x01, 0xAB, 0xFF, 0x00];
        assert_eq!(hex_decode(&hex_encode(&data)).unwrap(), data);
    }

    #[test]
    fn send_radio_frame_hex_encodes_payload_in_send_command() {
        let mut serial = MockSerial::default();
        for _ in 0..3 {
            serial.queue(b"OK \r\n");
        }
        let mut driver = Rak811Driver::new(serial, tx_cfg(), rx_cfg(), 64);
        driver.send_radio_frame(b"\x01\x02").unwrap();
        let written = String::from_utf8_lossy(&driver.serial.written).to_string();
        assert!(written.contains("send=lorap2p:0102"));
    }
}
