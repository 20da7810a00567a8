// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! Optional compression around an encoded payload. A compressor's
//! output is kept only when `compressed / raw <= accept_ratio`;
//! otherwise the payload ships uncompressed. The one-byte tag lives in
//! the chunk header (and the postscript, for the footer).

use bytes::{Buf, BufMut, Bytes};

use crate::encodings::CompressionType;
use crate::{NimbleResult, TracedNimbleError};

#[derive(Clone, Debug)]
pub struct CompressionOptions {
    pub compression: CompressionType,
    /// Maximum `compressed / raw` ratio at which compression is kept.
    pub accept_ratio: f64,
    pub zstd_level: i32,
    /// Payloads below this size are never compressed.
    pub min_size: usize,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            compression: CompressionType::Zstd,
            accept_ratio: 0.9,
            zstd_level: 3,
            min_size: 64,
        }
    }
}

impl CompressionOptions {
    pub fn uncompressed() -> Self {
        Self {
            compression: CompressionType::Uncompressed,
            ..Default::default()
        }
    }
}

/// Compress `payload` if the configured compressor beats the accept
/// ratio; returns the tag to record alongside the bytes. Zstd frames
/// are prefixed with the uncompressed length as a decompression hint.
pub fn maybe_compress(payload: Vec<u8>, opts: &CompressionOptions) -> (CompressionType, Vec<u8>) {
    match opts.compression {
        CompressionType::Zstd if payload.len() >= opts.min_size => {
            let compressed = match zstd::bulk::compress(&payload, opts.zstd_level) {
                Ok(compressed) => compressed,
                // Compression failure is not fatal; fall back to raw.
                Err(_) => return (CompressionType::Uncompressed, payload),
            };
            let total = compressed.len() + 4;
            if (total as f64) <= payload.len() as f64 * opts.accept_ratio {
                let mut out = Vec::with_capacity(total);
                out.put_u32_le(payload.len() as u32);
                out.extend_from_slice(&compressed);
                (CompressionType::Zstd, out)
            } else {
                (CompressionType::Uncompressed, payload)
            }
        }
        _ => (CompressionType::Uncompressed, payload),
    }
}

/// Stateless inverse of [`maybe_compress`]; returns a detached buffer.
pub fn decompress(compression: CompressionType, data: Bytes) -> NimbleResult<Bytes> {
    match compression {
        CompressionType::Uncompressed => Ok(data),
        CompressionType::Zstd => {
            let mut buf = &data[..];
            if buf.remaining() < 4 {
                return Err(TracedNimbleError::corrupt(
                    "zstd payload missing length hint",
                ));
            }
            let uncompressed_len = buf.get_u32_le() as usize;
            let decompressed = zstd::bulk::decompress(buf, uncompressed_len)
                .map_err(|e| TracedNimbleError::corrupt(format!("zstd decompress: {e}")))?;
            if decompressed.len() != uncompressed_len {
                return Err(TracedNimbleError::corrupt(format!(
                    "zstd length hint {uncompressed_len} does not match {} decompressed bytes",
                    decompressed.len()
                )));
            }
            Ok(Bytes::from(decompressed))
        }
        CompressionType::MetaInternal => Err(TracedNimbleError::unsupported(
            "MetaInternal compression is opaque outside its origin environment",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressible_payload_round_trips() {
        let payload = vec![42u8; 4096];
        let (compression, data) = maybe_compress(payload.clone(), &CompressionOptions::default());
        assert_eq!(compression, CompressionType::Zstd);
        assert!(data.len() < payload.len());
        let decompressed = decompress(compression, Bytes::from(data)).unwrap();
        assert_eq!(decompressed.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_incompressible_payload_stays_raw() {
        // High-entropy bytes fail the accept ratio.
        let payload: Vec<u8> = (0..4096u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
            .collect();
        let (compression, data) = maybe_compress(payload.clone(), &CompressionOptions::default());
        assert_eq!(compression, CompressionType::Uncompressed);
        assert_eq!(data, payload);
    }

    #[test]
    fn test_small_payload_skipped() {
        let payload = vec![0u8; 16];
        let (compression, _) = maybe_compress(payload, &CompressionOptions::default());
        assert_eq!(compression, CompressionType::Uncompressed);
    }

    #[test]
    fn test_meta_internal_unsupported() {
        assert!(decompress(CompressionType::MetaInternal, Bytes::new()).is_err());
    }

    #[test]
    fn test_corrupt_frame_surfaces() {
        let payload = vec![7u8; 1024];
        let (compression, mut data) = maybe_compress(payload, &CompressionOptions::default());
        assert_eq!(compression, CompressionType::Zstd);
        let last = data.len() - 1;
        data[last] ^= 0xff;
        assert!(decompress(compression, Bytes::from(data)).is_err());
    }
}
