// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-wide error types.

use thiserror::Error;

/// Errors raised by a modem driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to open serial port: {0}")]
    SerialOpen(#[from] serialport::Error),

    #[error("I/O error talking to modem: {0}")]
    Io(#[from] std::io::Error),

    #[error("modem firmware version not supported: {0}")]
    UnsupportedFirmware(String),

    #[error("modem init handshake failed: {0}")]
    InitHandshakeFailed(String),

    #[error("modem did not acknowledge configuration after {0} attempts")]
    ConfigAckExhausted(u32),

    #[error("mode switch ({0}) failed, continuing best-effort")]
    ModeSwitch(String),
}

/// Errors raised while decoding the on-air frame stream.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("not enough bytes buffered yet")]
    NeedMore,

    #[error("declared frame size is invalid")]
    BadSize,

    #[error("frame addressed to a different node")]
    AddressMismatch,

    #[error("payload transform (decipher/decompress) failed")]
    TransformFailure,

    #[error("CRC-16/XMODEM mismatch")]
    CrcMismatch,
}

/// Top-level gateway error.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("insufficient privileges: must run as root")]
    InsufficientPrivileges,

    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration load/validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
