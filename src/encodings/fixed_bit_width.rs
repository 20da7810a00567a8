// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use std::marker::PhantomData;

use bytes::Bytes;

use crate::common::{pack_fixed_width, read_u8, required_bit_width, FixedBitArray};
use crate::encodings::{write_prefix, EncodingKind, Primitive, PREFIX_SIZE};
use crate::{NimbleResult, TracedNimbleError};

/// Values stored as `baseline + delta`, with deltas bit-packed at the
/// narrowest width covering the batch range. Layout after the prefix:
/// `[baseline:T][bit_width:u8][packed deltas]`.
pub struct FixedBitWidthEncoding<T: Primitive> {
    data: Bytes,
    baseline: T,
    bit_width: u8,
    packed_start: usize,
    row_count: u32,
    position: u32,
    _phantom: PhantomData<T>,
}

impl<T: Primitive> FixedBitWidthEncoding<T> {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let baseline = T::decode(&mut buf)?;
        let bit_width = read_u8(&mut buf)?;
        let packed_start = T::WIDTH + 1;
        // Constructing the array validates the buffer size.
        FixedBitArray::new(
            &data[packed_start.min(data.len())..],
            bit_width as usize,
            row_count as usize,
        )?;
        Ok(Self {
            data,
            baseline,
            bit_width,
            packed_start,
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
        let array = FixedBitArray::new(
            &self.data[self.packed_start..],
            self.bit_width as usize,
            self.row_count as usize,
        )?;
        out.reserve(count as usize);
        for i in self.position..self.position + count {
            out.push(T::add_delta(self.baseline, array.get(i as usize)));
        }
        self.position += count;
        Ok(())
    }
}

/// `baseline` must be the batch minimum so deltas are non-negative.
pub fn encode_fixed_bit_width<T: Primitive>(values: &[T], baseline: T, out: &mut Vec<u8>) {
    let deltas: Vec<u64> = values.iter().map(|v| v.delta_from(baseline)).collect();
    let max_delta = deltas.iter().copied().max().unwrap_or(0);
    let bit_width = required_bit_width(max_delta);

    write_prefix(
        EncodingKind::FixedBitWidth,
        T::DATA_TYPE,
        values.len() as u32,
        out,
    );
    baseline.encode(out);
    out.push(bit_width as u8);
    pack_fixed_width(&deltas, bit_width, out);
}

pub fn fixed_bit_width_size<T: Primitive>(count: u32, max_delta: u64) -> usize {
    PREFIX_SIZE
        + T::WIDTH
        + 1
        + FixedBitArray::buffer_size(count as usize, required_bit_width(max_delta))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Primitive>(values: &[T], baseline: T) -> Vec<T> {
        let mut payload = vec![];
        encode_fixed_bit_width(values, baseline, &mut payload);
        let body = Bytes::from(payload).slice(PREFIX_SIZE..);
        let mut encoding =
            FixedBitWidthEncoding::<T>::decode(body, values.len() as u32).unwrap();
        let mut out = vec![];
        encoding.materialize(values.len() as u32, &mut out).unwrap();
        out
    }

    #[test]
    fn test_round_trip() {
        let values = [100u32, 107, 100, 163];
        assert_eq!(round_trip(&values, 100), values);

        let negatives = [-7i64, -3, -7, 120];
        assert_eq!(round_trip(&negatives, -7), negatives);
    }

    #[test]
    fn test_type_limits() {
        let values = [i64::MIN, i64::MAX, 0];
        assert_eq!(round_trip(&values, i64::MIN), values);
        let values = [u64::MAX, 0, 17];
        assert_eq!(round_trip(&values, 0), values);
    }

    #[test]
    fn test_skip_then_materialize() {
        let values: Vec<u16> = (0..100).map(|i| 500 + i % 17).collect();
        let mut payload = vec![];
        encode_fixed_bit_width(&values, 500, &mut payload);
        let body = Bytes::from(payload).slice(PREFIX_SIZE..);
        let mut encoding = FixedBitWidthEncoding::<u16>::decode(body, 100).unwrap();
        encoding.skip(40).unwrap();
        let mut out = vec![];
        encoding.materialize(10, &mut out).unwrap();
        assert_eq!(out, values[40..50]);
    }

    #[test]
    fn test_truncated_packed_bits() {
        let values = [1000u32, 1100, 1200];
        let mut payload = vec![];
        encode_fixed_bit_width(&values, 1000, &mut payload);
        payload.truncate(payload.len() - 1);
        let body = Bytes::from(payload).slice(PREFIX_SIZE..);
        assert!(FixedBitWidthEncoding::<u32>::decode(body, 3).is_err());
    }
}
