// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! V1: binary length-prefixed modem protocol (e.g. B-L072Z-LRWAN1).
//!
//! Host->modem messages are `cmd_byte || u16_le(len) || body`. `cmd=0x01`
//! sends a radio payload; `cmd=0x02` pushes configuration, whose body
//! starts with a 2-byte ASCII tag (`TC` full TX config, `Tc` TX channel
//! only, `RC` full RX config) followed by packed little-endian fields.

use std::io::{Read, Write};
use std::time::Duration;

use crate::driver::{max_time_transmission, pace, ModemDriver, RadioRxConfig, RadioTxConfig};
use crate::error::DriverError;

const CMD_SEND: u8 = 0x01;
const CMD_CONFIG: u8 = 0x02;
const CONFIG_RETRIES: u32 = 10;
/// Firmware stops listening after a prolonged quiet period until it next
/// transmits; this keepalive period works around that bug.
const KEEPALIVE_PERIOD_SECS: u64 = 30;

pub struct L072ZDriver<S: Read + Write + Send> {
    serial: S,
    tx: RadioTxConfig,
    rx: RadioRxConfig,
    max_lora_frame_sz: usize,
    max_time_transmission: Duration,
}

impl<S: Read + Write + Send> L072ZDriver<S> {
    pub fn new(serial: S, tx: RadioTxConfig, rx: RadioRxConfig, max_lora_frame_sz: usize) -> Self {
        let max_time_transmission = max_time_transmission(&tx, max_lora_frame_sz);
        Self {
            serial,
            tx,
            rx,
            max_lora_frame_sz,
            max_time_transmission,
        }
    }

    fn write_message(&mut self, cmd: u8, body: &[u8]) -> Result<(), DriverError> {
        let mut msg = Vec::with_capacity(3 + body.len());
        msg.push(cmd);
        msg.extend_from_slice(&(body.len() as u16).to_le_bytes());
        msg.extend_from_slice(body);
        self.serial.write_all(&msg)?;
        Ok(())
    }

    fn read_available(&mut self) -> Vec<u8> {
        let mut buf = [0u8; 1024];
        match self.serial.read(&mut buf) {
            Ok(n) => buf[..n].to_vec(),
            Err(_) => Vec::new(),
        }
    }

    fn pack_tx_config(&self) -> Vec<u8> {
        let mut c = Vec::from(*b"TC");
        c.extend_from_slice(&self.tx.channel_hz.to_le_bytes());
        c.push(1); // modem: 1 = LoRa
        c.push(self.tx.power_dbm as u8);
        c.push(0); // fdev
        c.push(self.tx.bandwidth_index);
        c.push(self.tx.spreading_factor as u8);
        c.push(self.tx.coderate_index as u8);
        c.extend_from_slice(&(self.tx.preamble_len as u8).to_le_bytes()[..1]);
        c.push(!self.tx.explicit_header as u8); // wire field is fixLen: 1=implicit, 0=explicit
        c.push(self.tx.crc_on as u8);
        c.push(0); // freqHopOn
        c.push(0); // hopPeriod
        c.push(self.tx.iq_inverted as u8);
        c.extend_from_slice(&(self.tx.timeout_ms as u16).to_le_bytes());
        c
    }

    fn pack_rx_config(&self) -> Vec<u8> {
        let mut c = Vec::from(*b"RC");
        c.extend_from_slice(&self.rx.channel_hz.to_le_bytes());
        c.push(1); // modem: 1 = LoRa
        c.push(self.rx.bandwidth_index);
        c.push(self.rx.spreading_factor as u8);
        c.push(self.rx.coderate_index as u8);
        c.push(0); // bandwidthAfc
        c.extend_from_slice(&(self.rx.preamble_len as u8).to_le_bytes()[..1]);
        c.push(self.rx.symb_timeout);
        c.push(!self.rx.explicit_header as u8); // wire field is fixLen: 1=implicit, 0=explicit
        c.push(0); // payloadLen (explicit header mode)
        c.push(self.rx.crc_on as u8);
        c.push(0); // freqHopOn
        c.push(0); // hopPeriod
        c.push(self.rx.iq_inverted as u8);
        c.push(self.rx.continuous_rx as u8);
        c
    }

    fn send_config(&mut self, body: Vec<u8>) -> Result<(), DriverError> {
        for _ in 0..CONFIG_RETRIES {
            let _ = self.read_available();
            self.write_message(CMD_CONFIG, &body)?;
            std::thread::sleep(Duration::from_secs(1));
            let reply = self.read_available();
            if reply == b"CONFIG_OK" {
                return Ok(());
            }
        }
        Err(DriverError::ConfigAckExhausted(CONFIG_RETRIES))
    }
}

impl<S: Read + Write + Send> ModemDriver for L072ZDriver<S> {
    fn init(&mut self) -> Result<(), DriverError> {
        let tx_config = self.pack_tx_config();
        self.send_config(tx_config)?;
        std::thread::sleep(Duration::from_millis(500));
        let rx_config = self.pack_rx_config();
        self.send_config(rx_config)?;
        std::thread::sleep(Duration::from_millis(500));
        Ok(())
    }

    fn send_radio_frame(&mut self, payload: &[u8]) -> Result<(), DriverError> {
        self.write_message(CMD_SEND, payload)?;
        pace(&self.tx, self.max_time_transmission, payload.len());
        Ok(())
    }

    fn recv_radio_frame(&mut self) -> Result<Vec<u8>, DriverError> {
        Ok(self.read_available())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn keepalive(&mut self) -> Result<(), DriverError> {
        self.write_message(CMD_SEND, b"A")?;
        Ok(())
    }
}

/// Seconds between keepalive sends, exposed for the engine's
/// `DriverMaintenance` thread.
pub const fn keepalive_period() -> Duration {
    Duration::from_secs(KEEPALIVE_PERIOD_SECS)
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
    fn init_succeeds_when_modem_echoes_config_ok() {
        let mut serial = MockSerial::default();
        serial.queue(b"CONFIG_OK");
        serial.queue(b"CONFIG_OK");
        let mut driver = L072ZDriver::new(serial, tx_cfg(), rx_cfg(), 64);
        assert!(driver.init().is_ok());
    }

    #[test]
    fn init_fails_after_exhausting_retries() {
        let serial = MockSerial::default(); // never replies CONFIG_OK
        let mut driver = L072ZDriver::new(serial, tx_cfg(), rx_cfg(), 64);
        let err = driver.init().unwrap_err();
        assert!(matches!(err, DriverError::ConfigAckExhausted(CONFIG_RETRIES)));
    }

    #[test]
    fn fix_len_byte_is_inverted_relative_to_explicit_header() {
        let serial = MockSerial::default();
        let mut tx = tx_cfg();
        tx.explicit_header = true;
        let driver = L072ZDriver::new(serial, tx, rx_cfg(), 64);
        assert_eq!(driver.pack_tx_config()[13], 0); // fixLen: 0 = explicit header

        let serial = MockSerial::default();
        let mut tx = tx_cfg();
        tx.explicit_header = false;
        let driver = L072ZDriver::new(serial, tx, rx_cfg(), 64);
        assert_eq!(driver.pack_tx_config()[13], 1); // fixLen: 1 = implicit header
    }

    #[test]
    fn send_radio_frame_writes_length_prefixed_command() {
        let serial = MockSerial::default();
        let mut driver = L072ZDriver::new(serial, tx_cfg(), rx_cfg(), 64);
        driver.send_radio_frame(b"hi").unwrap();
        assert_eq!(driver.serial.written[0], CMD_SEND);
        assert_eq!(&driver.serial.written[1..3], &2u16.to_le_bytes());
        assert_eq!(&driver.serial.written[3..], b"hi");
    }
}
