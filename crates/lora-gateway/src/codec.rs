// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Codec pipeline: per-direction compress/cipher chain driven by the
//! addr_flags bits.
//!
//! Encode order (egress): optional compress, then optional cipher.
//! Decode order (ingress): optional decipher, then optional decompress.
//! ROHC header (de)compression (see [`crate::rohc`]) runs outside this
//! pipeline, on the cleartext datagram before it reaches `encode` and
//! after it leaves `decode` — it is orthogonal and not flag-tracked, so
//! both ends must be configured identically for it.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// Bit flags packed into the addr_flags byte's high nibble.
pub mod flag {
    /// Payload was ciphered.
    pub const CIPHER: u8 = 0b0100;
    /// Payload was compressed.
    pub const COMPRESS: u8 = 0b1000;
}

/// Compression configuration for the `zlib` `compress_mode`.
#[derive(Debug, Clone, Copy)]
pub struct CompressConfig {
    /// Deflate/zlib compression level (0-9).
    pub level: u32,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self { level: 6 }
    }
}

/// Compresses `data` with zlib. Per spec.md §4.2, the compressed form is
/// only used if it is *strictly smaller* than the input; otherwise the
/// caller keeps the original bytes and leaves `compress_bit` unset.
pub fn try_compress(data: &[u8], config: CompressConfig) -> Option<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(config.level));
    encoder.write_all(data).ok()?;
    let compressed = encoder.finish().ok()?;
    if compressed.len() < data.len() {
        Some(compressed)
    } else {
        None
    }
}

/// Decompresses a zlib-compressed buffer. Returns `None` on any failure
/// (truncated stream, bad header, ...); the caller treats this as a
/// transform failure per the error table in spec.md §7.
pub fn decompress(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).ok()?;
    Some(out)
}

/// A keystream XOR cipher: the reference cipher named in spec.md §4.2.
/// `encipher == decipher` — XOR with a repeating key is its own inverse.
#[derive(Debug, Clone)]
pub struct XorCipher {
    key: Vec<u8>,
}

impl XorCipher {
    /// Builds a cipher from a non-empty key. Panics on an empty key since
    /// an empty keystream can never advance — this is a configuration
    /// error that should be caught at config validation time, not here.
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        assert!(!key.is_empty(), "cipher key must not be empty");
        Self { key }
    }

    /// Applies the keystream XOR, producing a new buffer the same length
    /// as `data`.
    pub fn apply(&self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .enumerate()
            .map(|(i, byte)| byte ^ self.key[i % self.key.len()])
            .collect()
    }
}

/// The pluggable transform capability set owned by the gateway engine.
/// Each field is independently optional, mirroring the reference's
/// `func_compress` / `func_cipher` / `func_decompress` / `func_uncipher`
/// hooks, generalized into a `None`-able Rust record.
pub struct Transforms {
    pub compress: Option<CompressConfig>,
    pub cipher: Option<XorCipher>,
}

impl Transforms {
    pub fn none() -> Self {
        Self {
            compress: None,
            cipher: None,
        }
    }

    /// Egress: compress, then cipher. Returns the transformed payload and
    /// the flag bits to OR into addr_flags.
    pub fn encode(&self, cleartext: &[u8]) -> (u8, Vec<u8>) {
        let mut flags = 0u8;
        let mut data = cleartext.to_vec();

        if let Some(cfg) = self.compress {
            if let Some(compressed) = try_compress(&data, cfg) {
                data = compressed;
                flags |= flag::COMPRESS;
            }
        }

        if let Some(cipher) = &self.cipher {
            data = cipher.apply(&data);
            flags |= flag::CIPHER;
        }

        (flags, data)
    }

    /// Ingress: decipher, then decompress, guided by the flag bits decoded
    /// from addr_flags. Returns `None` if a requested inverse transform
    /// has no configured function, or if the transform itself fails —
    /// both are "decode failure" per spec.md §7.
    pub fn decode(&self, flags: u8, transformed: &[u8]) -> Option<Vec<u8>> {
        let mut data = transformed.to_vec();

        if flags & flag::CIPHER != 0 {
            let cipher = self.cipher.as_ref()?;
            data = cipher.apply(&data);
        }

        if flags & flag::COMPRESS != 0 {
            data = decompress(&data)?;
        }

        Some(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_cipher_is_an_involution() {
        let cipher = XorCipher::new("abc");
        let plain = b"hello";
        let ciphered = cipher.apply(plain);
        assert_eq!(ciphered, vec![b'h' ^ b'a', b'e' ^ b'b', b'l' ^ b'c', b'l' ^ b'a', b'o' ^ b'b']);
        assert_eq!(cipher.apply(&ciphered), plain);
    }

    #[test]
    fn xor_cipher_roundtrips_for_any_key_and_payload() {
        for key in ["k", "longer-key", "\u{0}\u{1}\u{2}"] {
            let cipher = XorCipher::new(key.as_bytes().to_vec());
            for payload in [&b""[..], b"x", b"a fairly long payload to exercise wraparound"] {
                assert_eq!(cipher.apply(&cipher.apply(payload)), payload);
            }
        }
    }

    #[test]
    fn compression_rejected_when_not_smaller() {
        // Small random-ish payload: zlib framing overhead makes this grow.
        let payload: Vec<u8> = (0..32).map(|i| (i * 37 + 11) as u8).collect();
        let compressed = try_compress(&payload, CompressConfig::default());
        if let Some(c) = &compressed {
            assert!(c.len() < payload.len());
        }
        // Either way, the caller must fall back to the original bytes
        // whenever this returns None.
    }

    #[test]
    fn compression_roundtrips_when_accepted() {
        let payload = vec![b'a'; 256];
        let compressed = try_compress(&payload, CompressConfig::default()).expect("should shrink");
        assert!(compressed.len() < payload.len());
        assert_eq!(decompress(&compressed).unwrap(), payload);
    }

    #[test]
    fn transforms_encode_decode_roundtrip() {
        let t = Transforms {
            compress: Some(CompressConfig::default()),
            cipher: Some(XorCipher::new("key")),
        };
        let cleartext = vec![b'z'; 300];
        let (flags, transformed) = t.encode(&cleartext);
        let decoded = t.decode(flags, &transformed).expect("decode");
        assert_eq!(decoded, cleartext);
    }

    #[test]
    fn decode_without_configured_cipher_fails() {
        let t = Transforms::none();
        assert!(t.decode(flag::CIPHER, b"whatever").is_none());
    }
}
