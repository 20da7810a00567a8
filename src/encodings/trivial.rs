// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use std::marker::PhantomData;

use bytes::Bytes;

use crate::encodings::{write_prefix, EncodingKind, Primitive, PREFIX_SIZE};
use crate::{NimbleResult, TracedNimbleError};

/// Raw little-endian dump. The layout after the prefix is simply
/// `row_count` fixed-width values.
pub struct TrivialEncoding<T: Primitive> {
    data: Bytes,
    row_count: u32,
    position: u32,
    _phantom: PhantomData<T>,
}

impl<T: Primitive> TrivialEncoding<T> {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        let needed = row_count as usize * T::WIDTH;
        if data.len() < needed {
            return Err(TracedNimbleError::corrupt(format!(
                "trivial encoding needs {needed} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            row_count,
            position: 0,
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
        self.position += count;
        Ok(())
    }

    pub fn materialize(&mut self, count: u32, out: &mut Vec<T>) -> NimbleResult<()> {
        if count > self.remaining() {
            return Err(TracedNimbleError::corrupt(
                "materialize past end of encoding",
            ));
        }
        let mut buf = &self.data[self.position as usize * T::WIDTH..];
        out.reserve(count as usize);
        for _ in 0..count {
            out.push(T::decode(&mut buf)?);
        }
        self.position += count;
        Ok(())
    }
}

pub fn encode_trivial<T: Primitive>(values: &[T], out: &mut Vec<u8>) {
    out.reserve(PREFIX_SIZE + values.len() * T::WIDTH);
    write_prefix(
        EncodingKind::Trivial,
        T::DATA_TYPE,
        values.len() as u32,
        out,
    );
    for value in values {
        value.encode(out);
    }
}

pub fn trivial_size<T: Primitive>(count: u32) -> usize {
    PREFIX_SIZE + count as usize * T::WIDTH
}
