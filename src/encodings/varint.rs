// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use std::marker::PhantomData;

use bytes::Bytes;

use crate::common::{read_varint, varint_size, write_varint};
use crate::encodings::{write_prefix, EncodingKind, Primitive, PREFIX_SIZE};
use crate::{NimbleResult, TracedNimbleError};

/// One varint per value, zig-zag mapped for signed types. There is no
/// random access: both `skip` and `materialize` must decode.
pub struct VarintEncoding<T: Primitive> {
    data: Bytes,
    row_count: u32,
    position: u32,
    byte_offset: usize,
    _phantom: PhantomData<T>,
}

impl<T: Primitive> VarintEncoding<T> {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        Ok(Self {
            data,
            row_count,
            position: 0,
            byte_offset: 0,
            _phantom: PhantomData,
        })
    }

    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    pub fn remaining(&self) -> u32 {
        self.row_count - self.position
    }

    pub fn skip(&mut self, count: u32) -> NimbleResult<()> {
        if count > self.remaining() {
            return Err(TracedNimbleError::corrupt("skip past end of encoding"));
        }
        let mut buf = &self.data[self.byte_offset..];
        for _ in 0..count {
            read_varint(&mut buf)?;
        }
        self.byte_offset = self.data.len() - buf.len();
        self.position += count;
        Ok(())
    }

    pub fn materialize(&mut self, count: u32, out: &mut Vec<T>) -> NimbleResult<()> {
        if count > self.remaining() {
            return Err(TracedNimbleError::corrupt(
                "materialize past end of encoding",
            ));
        }
        let mut buf = &self.data[self.byte_offset..];
        out.reserve(count as usize);
        for _ in 0..count {
            out.push(T::from_varint(read_varint(&mut buf)?));
        }
        self.byte_offset = self.data.len() - buf.len();
        self.position += count;
        Ok(())
    }
}

pub fn encode_varint<T: Primitive>(values: &[T], out: &mut Vec<u8>) {
    write_prefix(EncodingKind::Varint, T::DATA_TYPE, values.len() as u32, out);
    for value in values {
        write_varint(value.varint_value(), out);
    }
}

pub fn varint_encoded_size<T: Primitive>(values: &[T]) -> usize {
    PREFIX_SIZE
        + values
            .iter()
            .map(|v| varint_size(v.varint_value()))
            .sum::<usize>()
}
