// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use bytes::{BufMut, Bytes};

use crate::common::{read_u8, read_u32_le};
use crate::encodings::{decompress, maybe_compress, CompressionOptions, CompressionType};
use crate::{NimbleResult, TracedNimbleError};

/// `[compression:u8][item_count:u32][payload_length:u32]`
pub const CHUNK_HEADER_SIZE: usize = 9;

/// Append one chunk to a stream buffer, compressing the payload when
/// the compressor beats the accept ratio.
pub fn append_chunk(
    payload: Vec<u8>,
    item_count: u32,
    compression: &CompressionOptions,
    out: &mut Vec<u8>,
) {
    let (compression_type, payload) = maybe_compress(payload, compression);
    out.reserve(CHUNK_HEADER_SIZE + payload.len());
    out.put_u8(compression_type as u8);
    out.put_u32_le(item_count);
    out.put_u32_le(payload.len() as u32);
    out.extend_from_slice(&payload);
}

/// One decoded chunk header plus its raw payload. Decompression is
/// deferred so seeks can count items without touching payload bytes.
pub struct Chunk {
    pub compression: CompressionType,
    pub item_count: u32,
    raw: Bytes,
}

impl Chunk {
    pub fn payload(&self) -> NimbleResult<Bytes> {
        decompress(self.compression, self.raw.clone())
    }
}

/// Reader over a fully-buffered stream: a concatenation of chunks.
pub struct InMemoryChunkedStream {
    data: Bytes,
    position: usize,
}

impl InMemoryChunkedStream {
    pub fn new(data: Bytes) -> Self {
        Self { data, position: 0 }
    }

    pub fn has_next(&self) -> bool {
        self.position < self.data.len()
    }

    /// Rewind to the first chunk.
    pub fn reset(&mut self) {
        self.position = 0;
    }

    pub fn next_chunk(&mut self) -> NimbleResult<Chunk> {
        let mut buf = &self.data[self.position..];
        let compression = CompressionType::try_from(read_u8(&mut buf)?)?;
        let item_count = read_u32_le(&mut buf)?;
        let payload_length = read_u32_le(&mut buf)? as usize;
        if buf.len() < payload_length {
            return Err(TracedNimbleError::corrupt(format!(
                "chunk payload length {payload_length} overruns stream ({} bytes left)",
                buf.len()
            )));
        }
        let payload_start = self.position + CHUNK_HEADER_SIZE;
        self.position = payload_start + payload_length;
        Ok(Chunk {
            compression,
            item_count,
            raw: self.data.slice(payload_start..payload_start + payload_length),
        })
    }

    /// Total item count across all remaining chunks, by headers only.
    pub fn remaining_items(&mut self) -> NimbleResult<u64> {
        let mut total = 0u64;
        while self.has_next() {
            total += self.next_chunk()?.item_count as u64;
        }
        Ok(total)
    }
}
