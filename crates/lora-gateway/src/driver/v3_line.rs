// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! V3: line-oriented modem protocol (e.g. LoStick / RN2483).
//!
//! Commands are plain ASCII lines terminated by `\r\n`, with no command
//! prefix. Replies are queued one line at a time; the spurious
//! `radio_tx_ok` notification line is filtered out of that queue, since
//! it is not a reply to any command this driver issues.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

use crate::driver::{max_time_transmission, pace, ModemDriver, RadioRxConfig, RadioTxConfig};
use crate::error::DriverError;

const SEND_RETRIES: u32 = 80;
const RX_MODE_RETRIES: u32 = 200;

pub struct LoStickDriver<S: Read + Write + Send> {
    serial: S,
    tx: RadioTxConfig,
    rx: RadioRxConfig,
    max_time_transmission: Duration,
    line_queue: VecDeque<String>,
    read_buf: Vec<u8>,
}

impl<S: Read + Write + Send> LoStickDriver<S> {
    pub fn new(serial: S, tx: RadioTxConfig, rx: RadioRxConfig, max_lora_frame_sz: usize) -> Self {
        let max_time_transmission = max_time_transmission(&tx, max_lora_frame_sz);
        Self {
            serial,
            tx,
            rx,
            max_time_transmission,
            line_queue: VecDeque::new(),
            read_buf: Vec::new(),
        }
    }

    fn pump_serial(&mut self) {
        let mut chunk = [0u8; 1024];
        match self.serial.read(&mut chunk) {
            Ok(0) | Err(_) => {}
            Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
        }

        while let Some(pos) = find_crlf(&self.read_buf) {
            let line_bytes: Vec<u8> = self.read_buf.drain(..pos).collect();
            self.read_buf.drain(..2); // drop the \r\n itself
            let line = String::from_utf8_lossy(&line_bytes).to_string();
            if !line.is_empty() && line != "radio_tx_ok" {
                self.line_queue.push_back(line);
            }
        }
    }

    /// Returns the next queued line, polling the serial port until one is
    /// available or bounded reads are exhausted.
    fn recv_serial(&mut self) -> String {
        for _ in 0..16 {
            if let Some(line) = self.line_queue.pop_front() {
                return line;
            }
            self.pump_serial();
        }
        self.line_queue.pop_front().unwrap_or_default()
    }

    /// Writes `cmd\r\n` and classifies the reply: `"ok"` -> success,
    /// `"invalid_param"` -> failure, anything else -> a data line, which is
    /// success unless the caller specifically expected a bare `ok`.
    fn send_cmd(&mut self, cmd: &str, expect_ok: bool) -> Result<String, DriverError> {
        let line = format!("{cmd}\r\n");
        self.serial.write_all(line.as_bytes())?;
        let reply = self.recv_serial();
        match reply.as_str() {
            "ok" => Ok(reply),
            "invalid_param" => Err(DriverError::ModeSwitch(format!("{cmd} -> invalid_param"))),
            _ if expect_ok => Err(DriverError::ModeSwitch(format!(
                "{cmd} expected ok, got {reply:?}"
            ))),
            _ => Ok(reply),
        }
    }

    fn bandwidth_str(index: u8) -> &'static str {
        match index {
            0 => "125",
            1 => "250",
            2 => "500",
            _ => "125",
        }
    }

    fn coderate_str(index: u32) -> &'static str {
        match index {
            1 => "4/5",
            2 => "4/6",
            3 => "4/7",
            4 => "4/8",
            _ => "4/5",
        }
    }

    fn set_tx_mode(&mut self) -> Result<(), DriverError> {
        self.send_cmd("radio rxstop", true)?;
        Ok(())
    }

    fn set_rx_mode(&mut self) -> Result<(), DriverError> {
        for _ in 0..RX_MODE_RETRIES {
            if self.send_cmd("radio rx 0", true).is_ok() {
                return Ok(());
            }
        }
        Err(DriverError::ModeSwitch("radio rx 0 never accepted".to_string()))
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

impl<S: Read + Write + Send> ModemDriver for LoStickDriver<S> {
    fn init(&mut self) -> Result<(), DriverError> {
        let reset = self.send_cmd("sys reset", false)?;
        if !reset.starts_with("RN2483 1.0.5") {
            return Err(DriverError::UnsupportedFirmware(format!(
                "unexpected reset banner: {reset:?}"
            )));
        }
        self.send_cmd("mac pause", false)?;
        self.send_cmd("radio set mod lora", true)?;
        self.send_cmd("radio set wdt 0", true)?;
        self.send_cmd("radio set sync 12", true)?;
        self.send_cmd(
            if self.rx.crc_on { "radio set crc on" } else { "radio set crc off" },
            true,
        )?;

        let bw = Self::bandwidth_str(self.rx.bandwidth_index);
        self.send_cmd(&format!("radio set bw {bw}"), true)?;
        self.send_cmd(&format!("radio set rxbw {bw}"), true)?;
        self.send_cmd(&format!("radio set sf sf{}", self.rx.spreading_factor), true)?;
        self.send_cmd(&format!("radio set cr {}", Self::coderate_str(self.rx.coderate_index)), true)?;
        self.send_cmd(&format!("radio set freq {}", self.rx.channel_hz), true)?;
        self.send_cmd(&format!("radio set prlen {}", self.rx.preamble_len), true)?;
        self.send_cmd(&format!("radio set pwr {}", self.tx.power_dbm), true)?;

        self.set_rx_mode()?;
        Ok(())
    }

    fn send_radio_frame(&mut self, payload: &[u8]) -> Result<(), DriverError> {
        self.set_tx_mode()?;
        let hex = payload.iter().map(|b| format!("{b:02X}")).collect::<String>();

        let mut sent = false;
        for _ in 0..SEND_RETRIES {
            if self.send_cmd(&format!("radio tx {hex}"), true).is_ok() {
                sent = true;
                break;
            }
        }

        self.set_rx_mode()?;
        pace(&self.tx, self.max_time_transmission, payload.len());

        if sent {
            Ok(())
        } else {
            Err(DriverError::ModeSwitch("radio tx never accepted".to_string()))
        }
    }

    fn recv_radio_frame(&mut self) -> Result<Vec<u8>, DriverError> {
        self.pump_serial();
        let line = match self.line_queue.pop_front() {
            Some(line) => line,
            None => return Ok(Vec::new()),
        };

        self.set_rx_mode()?;

        match line.strip_prefix("radio_rx  ") {
            Some(hex) => hex_decode(hex).ok_or_else(|| {
                DriverError::ModeSwitch(format!("malformed radio_rx payload: {hex:?}"))
            }),
            None => Ok(Vec::new()),
        }
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
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
    fn line_queue_filters_radio_tx_ok_notification() {
        let serial = MockSerial::with_script(b"radio_tx_ok\r\nok\r\n");
        let mut driver = LoStickDriver::new(serial, tx_cfg(), rx_cfg(), 64);
        driver.pump_serial();
        assert_eq!(driver.line_queue.len(), 1);
        assert_eq!(driver.line_queue[0], "ok");
    }

    #[test]
    fn bandwidth_and_coderate_strings_match_firmware_vocabulary() {
        assert_eq!(LoStickDriver::<MockSerial>::bandwidth_str(0), "125");
        assert_eq!(LoStickDriver::<MockSerial>::bandwidth_str(2), "500");
        assert_eq!(LoStickDriver::<MockSerial>::coderate_str(1), "4/5");
        assert_eq!(LoStickDriver::<MockSerial>::coderate_str(4), "4/8");
    }

    #[test]
    fn recv_radio_frame_parses_double_space_prefix() {
        let serial = MockSerial::with_script(b"radio_rx  48690D0A\r\nok\r\n");
        let mut driver = LoStickDriver::new(serial, tx_cfg(), rx_cfg(), 64);
        let payload = driver.recv_radio_frame().unwrap();
        assert_eq!(payload, vec![0x48, 0x69, 0x0D, 0x0A]);
    }

    #[test]
    fn hex_decode_rejects_odd_length() {
        assert!(hex_decode("ABC").is_none());
    }
}
