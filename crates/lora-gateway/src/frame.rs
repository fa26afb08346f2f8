// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The on-air frame encoder/decoder and the rolling receive buffer.
//!
//! Wire format (little-endian where multi-byte), see spec §3/§4.3:
//!
//! ```text
//! offset  size  field
//! 0       2     size = len(transformed_payload) + 1
//! 2       1     addr_flags = addr | (flags << 4)
//! 3       N     transformed_payload
//! 3+N     2     crc16_xmodem(addr_flags || cleartext_payload)
//! ```
//!
//! The CRC covers the *cleartext* payload, not the on-wire bytes — it is
//! recomputed by the receiver after the inverse transforms run.

use crate::codec::Transforms;
use crate::error::FrameError;

const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_XMODEM);

/// A decoded frame, with its cleartext payload already run through the
/// codec pipeline's inverse transforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub addr: u8,
    pub flags: u8,
    pub cleartext_payload: Vec<u8>,
}

/// Computes CRC-16/XMODEM over `addr_flags || cleartext_payload`.
pub fn crc16(addr_flags: u8, cleartext_payload: &[u8]) -> u16 {
    let mut digest = CRC.digest();
    digest.update(&[addr_flags]);
    digest.update(cleartext_payload);
    digest.finalize()
}

/// Encodes one on-air frame. `transformed_payload` is the already-compressed
/// and/or ciphered bytes; `cleartext_payload` is the pre-transform bytes the
/// CRC is computed over.
pub fn encode(addr: u8, flags: u8, transformed_payload: &[u8], cleartext_payload: &[u8]) -> Vec<u8> {
    let addr_flags = (addr & 0x0F) | (flags << 4);
    let size = (transformed_payload.len() + 1) as u16;
    let crc = crc16(addr_flags, cleartext_payload);

    let mut out = Vec::with_capacity(2 + transformed_payload.len() + 1 + 2);
    out.extend_from_slice(&size.to_le_bytes());
    out.push(addr_flags);
    out.extend_from_slice(transformed_payload);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

/// Outcome of attempting to decode one frame at the head of a buffer.
pub enum DecodeOutcome {
    /// A complete, valid frame for `local_addr` was decoded.
    Frame { frame: Frame, consumed: usize },
    /// Not enough bytes buffered yet; wait for more.
    NeedMore,
    /// Decode failed; advance `consumed` bytes and retry.
    Error {
        kind: FrameError,
        consumed: usize,
    },
}

/// Attempts to decode one frame from the head of `buf`, validating against
/// `local_addr` and running `transforms` to recover the cleartext payload.
pub fn decode(buf: &[u8], local_addr: u8, transforms: &Transforms) -> DecodeOutcome {
    if buf.len() < 5 {
        return DecodeOutcome::NeedMore;
    }

    let size = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    if size < 2 {
        return DecodeOutcome::Error {
            kind: FrameError::BadSize,
            consumed: 1,
        };
    }

    let frame_len = 2 + size + 2;
    if buf.len() < frame_len {
        return DecodeOutcome::NeedMore;
    }

    let addr_flags = buf[2];
    let transformed_payload = &buf[3..2 + size];
    let crc_wire = u16::from_le_bytes([buf[frame_len - 2], buf[frame_len - 1]]);

    let addr = addr_flags & 0x0F;
    let flags = (addr_flags & 0xF0) >> 4;

    if addr != local_addr {
        // Length-valid frame addressed to someone else: skip it whole.
        return DecodeOutcome::Error {
            kind: FrameError::AddressMismatch,
            consumed: frame_len,
        };
    }

    let cleartext_payload = match transforms.decode(flags, transformed_payload) {
        Some(data) => data,
        None => {
            return DecodeOutcome::Error {
                kind: FrameError::TransformFailure,
                consumed: 1,
            }
        }
    };

    let crc_computed = crc16(addr_flags, &cleartext_payload);
    if crc_computed != crc_wire {
        return DecodeOutcome::Error {
            kind: FrameError::CrcMismatch,
            consumed: 1,
        };
    }

    DecodeOutcome::Frame {
        frame: Frame {
            addr,
            flags,
            cleartext_payload,
        },
        consumed: frame_len,
    }
}

/// A byte buffer into which modem reads are appended; frames are popped
/// from its head with byte-wise resync on any decode error.
#[derive(Debug, Default)]
pub struct RollingBuffer {
    buf: Vec<u8>,
}

/// Outcome of draining one frame (or giving up for now) from a
/// [`RollingBuffer`].
pub struct DrainResult {
    pub frame: Option<Frame>,
    /// Number of single-byte resync steps taken while draining.
    pub resync_steps: usize,
}

impl RollingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly received radio bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Attempts to decode the next frame, resyncing on errors until either
    /// a frame is produced or the buffer is exhausted (`NeedMore`).
    pub fn drain_one(&mut self, local_addr: u8, transforms: &Transforms) -> DrainResult {
        let mut resync_steps = 0;

        loop {
            if self.buf.is_empty() {
                return DrainResult {
                    frame: None,
                    resync_steps,
                };
            }

            match decode(&self.buf, local_addr, transforms) {
                DecodeOutcome::NeedMore => {
                    return DrainResult {
                        frame: None,
                        resync_steps,
                    }
                }
                DecodeOutcome::Frame { frame, consumed } => {
                    self.buf.drain(..consumed);
                    return DrainResult {
                        frame: Some(frame),
                        resync_steps,
                    };
                }
                DecodeOutcome::Error { consumed, .. } => {
                    let advance = consumed.min(self.buf.len());
                    self.buf.drain(..advance);
                    resync_steps += advance;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CompressConfig, Transforms, XorCipher};

    fn no_transforms() -> Transforms {
        Transforms::none()
    }

    #[test]
    fn scenario_a_plain_no_codecs() {
        let payload = vec![
            0x45, 0x00, 0x00, 0x1c, 0x00, 0x01, 0x00, 0x00, 0x40, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            0, 0, 0, 0, 0, 0, 0, 0, 0,
        ];
        assert_eq!(payload.len(), 28);

        let wire = encode(5, 0, &payload, &payload);
        assert_eq!(&wire[0..2], &29u16.to_le_bytes());
        assert_eq!(wire[2], 0x05);

        let transforms = no_transforms();
        match decode(&wire, 5, &transforms) {
            DecodeOutcome::Frame { frame, consumed } => {
                assert_eq!(consumed, wire.len());
                assert_eq!(frame.cleartext_payload, payload);
                assert_eq!(frame.addr, 5);
            }
            _ => panic!("expected a decoded frame"),
        }
    }

    #[test]
    fn scenario_b_address_mismatch_skips_whole_frame() {
        let payload = b"hello world";
        let wire = encode(3, 0, payload, payload);
        let transforms = no_transforms();

        match decode(&wire, 5, &transforms) {
            DecodeOutcome::Error { kind, consumed } => {
                assert_eq!(kind, FrameError::AddressMismatch);
                assert_eq!(consumed, wire.len());
            }
            _ => panic!("expected address mismatch"),
        }
    }

    #[test]
    fn scenario_c_crc_corruption_resyncs_one_byte_at_a_time() {
        let payload = b"a valid payload";
        let mut wire = encode(5, 0, payload, payload);
        let last = wire.len() - 1;
        wire[3] ^= 0x01; // corrupt a payload byte, CRC now mismatches
        let _ = last;

        let transforms = no_transforms();
        let mut rolling = RollingBuffer::new();
        rolling.push(&wire);

        let result = rolling.drain_one(5, &transforms);
        assert!(result.frame.is_none());
        assert!(result.resync_steps > 0);
    }

    #[test]
    fn invariant_resync_skips_garbage_prefix() {
        let payload = b"after garbage";
        let wire = encode(5, 0, payload, payload);
        let transforms = no_transforms();

        let mut rolling = RollingBuffer::new();
        let garbage = vec![0xFFu8; 7];
        rolling.push(&garbage);
        rolling.push(&wire);

        let result = rolling.drain_one(5, &transforms);
        assert_eq!(result.frame.unwrap().cleartext_payload, payload);
        assert_eq!(result.resync_steps, garbage.len());
    }

    #[test]
    fn scenario_d_cipher_xor() {
        let cipher_tx = Transforms {
            compress: None,
            cipher: Some(XorCipher::new("abc")),
        };
        let cleartext = b"hello".to_vec();
        let (flags, transformed) = cipher_tx.encode(&cleartext);
        assert_eq!(flags, crate::codec::flag::CIPHER);

        let wire = encode(5, flags, &transformed, &cleartext);

        // Same key recovers the plaintext.
        let same_key = Transforms {
            compress: None,
            cipher: Some(XorCipher::new("abc")),
        };
        match decode(&wire, 5, &same_key) {
            DecodeOutcome::Frame { frame, .. } => {
                assert_eq!(frame.cleartext_payload, cleartext)
            }
            _ => panic!("expected a decoded frame"),
        }

        // No cipher configured: transform fails, frame dropped.
        let no_cipher = Transforms::none();
        match decode(&wire, 5, &no_cipher) {
            DecodeOutcome::Error { kind, .. } => assert_eq!(kind, FrameError::TransformFailure),
            _ => panic!("expected a transform failure"),
        }
    }

    #[test]
    fn scenario_e_compression_rejected_for_incompressible_payload() {
        // 32 pseudo-random bytes that deflate cannot shrink below 32+overhead.
        let payload: Vec<u8> = (0..32u8).map(|i| i.wrapping_mul(137).wrapping_add(53)).collect();
        let tx = Transforms {
            compress: Some(CompressConfig::default()),
            cipher: None,
        };
        let (flags, transformed) = tx.encode(&payload);
        assert_eq!(flags & crate::codec::flag::COMPRESS, 0);
        assert_eq!(transformed, payload);
    }

    #[test]
    fn invariant_lora_address_extraction() {
        for addr in 1u8..=14 {
            let wire = encode(addr, 0, b"x", b"x");
            let addr_flags = wire[2];
            assert_eq!(addr_flags & 0x0F, addr);
        }
    }

    #[test]
    fn invariant_crc_over_cleartext_not_wire_bytes() {
        let cleartext = b"payload".to_vec();
        let cipher = XorCipher::new("k");
        let ciphered = cipher.apply(&cleartext);
        assert_ne!(ciphered, cleartext);

        let addr_flags = 5u8 | (crate::codec::flag::CIPHER << 4);
        let expected_crc = crc16(addr_flags, &cleartext);
        let crc_over_wire = crc16(addr_flags, &ciphered);
        assert_ne!(expected_crc, crc_over_wire);
    }
}
