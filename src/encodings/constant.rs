// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use bytes::Bytes;

use crate::encodings::{write_prefix, EncodingKind, Primitive, PREFIX_SIZE};
use crate::{NimbleResult, TracedNimbleError};

/// A single value repeated `row_count` times. Layout after the prefix
/// is just the value itself.
pub struct ConstantEncoding<T: Primitive> {
    value: T,
    row_count: u32,
    position: u32,
}

impl<T: Primitive> ConstantEncoding<T> {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let value = T::decode(&mut buf)?;
        Ok(Self {
            value,
            row_count,
            position: 0,
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
        out.extend(std::iter::repeat(self.value).take(count as usize));
        self.position += count;
        Ok(())
    }
}

pub fn encode_constant<T: Primitive>(value: T, row_count: u32, out: &mut Vec<u8>) {
    write_prefix(EncodingKind::Constant, T::DATA_TYPE, row_count, out);
    value.encode(out);
}

pub fn constant_size<T: Primitive>() -> usize {
    PREFIX_SIZE + T::WIDTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut payload = vec![];
        encode_constant(7i32, 10, &mut payload);
        assert_eq!(payload.len(), constant_size::<i32>());

        let body = Bytes::from(payload).slice(PREFIX_SIZE..);
        let mut encoding = ConstantEncoding::<i32>::decode(body, 10).unwrap();
        encoding.skip(4).unwrap();
        let mut out = vec![];
        encoding.materialize(6, &mut out).unwrap();
        assert_eq!(out, vec![7; 6]);
        assert!(encoding.skip(1).is_err());
    }
}
