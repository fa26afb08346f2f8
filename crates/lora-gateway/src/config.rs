// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway configuration: recognized keys, defaults, and validation.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Selects which [`crate::driver::ModemDriver`] implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    #[serde(rename = "B-L072Z-LRWAN1")]
    L072Z,
    #[serde(rename = "RAK811")]
    Rak811,
    #[serde(rename = "LoStick")]
    LoStick,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub device: DeviceKind,

    #[serde(default = "default_tty")]
    pub tty: String,

    pub ip_address: String,

    pub channel_tx: u32,
    pub channel_rx: u32,

    #[serde(default = "default_tx_power")]
    pub tx_power: i8,

    #[serde(default)]
    pub bandwidth: u8,

    #[serde(default = "default_sf")]
    pub sf: u32,

    #[serde(default = "default_coderate")]
    pub coderate: u32,

    #[serde(default = "default_preamble_len")]
    pub preamble_len: u16,

    #[serde(default = "default_max_lora_framesz")]
    pub max_lora_framesz: usize,

    #[serde(default = "default_mtu")]
    pub mtu: u16,

    #[serde(default)]
    pub rohc_compression: bool,

    #[serde(default)]
    pub compress_mode: Option<String>,

    #[serde(default)]
    pub cipher_mode: Option<String>,

    #[serde(default)]
    pub cipher_key: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_tty() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_tx_power() -> i8 {
    14
}

fn default_sf() -> u32 {
    7
}

fn default_coderate() -> u32 {
    1
}

fn default_preamble_len() -> u16 {
    8
}

fn default_max_lora_framesz() -> usize {
    64
}

fn default_mtu() -> u16 {
    230
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatewayConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Last octet of `ip_address`, the node's 4-bit LoRa address.
    pub fn lora_address(&self) -> Result<u8, ConfigError> {
        let octet = self
            .ip_address
            .split('.')
            .next_back()
            .and_then(|s| s.parse::<u8>().ok())
            .ok_or_else(|| ConfigError::Invalid(format!("malformed ip_address: {}", self.ip_address)))?;
        let addr = octet % 16;
        if !(1..=14).contains(&addr) {
            return Err(ConfigError::Invalid(format!(
                "derived LoRa address {addr} out of range 1..14"
            )));
        }
        Ok(addr)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lora_address()?;

        if !(7..=12).contains(&self.sf) {
            return Err(ConfigError::Invalid(format!("SF {} out of range 7..12", self.sf)));
        }
        if !(1..=4).contains(&self.coderate) {
            return Err(ConfigError::Invalid(format!(
                "coderate {} out of range 1..4",
                self.coderate
            )));
        }
        if self.bandwidth > 2 {
            return Err(ConfigError::Invalid(format!(
                "bandwidth index {} out of range 0..2",
                self.bandwidth
            )));
        }
        if !(0..=14).contains(&self.tx_power) {
            return Err(ConfigError::Invalid(format!(
                "TxPower {} out of range 0..14",
                self.tx_power
            )));
        }
        if self.max_lora_framesz == 0 {
            return Err(ConfigError::Invalid("maxLoraFramesz must be > 0".to_string()));
        }

        match self.compress_mode.as_deref() {
            None | Some("zlib") => {}
            Some(other) => {
                return Err(ConfigError::Invalid(format!(
                    "unsupported compress_mode: {other}"
                )))
            }
        }

        match self.cipher_mode.as_deref() {
            None => {}
            Some("xor") => {
                if self.cipher_key.as_deref().unwrap_or("").is_empty() {
                    return Err(ConfigError::Invalid(
                        "cipher_mode=xor requires a non-empty cipher_key".to_string(),
                    ));
                }
            }
            Some(other) => {
                return Err(ConfigError::Invalid(format!("unsupported cipher_mode: {other}")))
            }
        }

        Ok(())
    }
}
