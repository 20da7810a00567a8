// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use bytes::{BufMut, Bytes};

use crate::common::read_u32_le;
use crate::encodings::{
    select_bool, select_numeric, write_prefix, BoolEncoding, EncodingKind, EncodingLayout,
    NumericEncoding, Primitive, SelectionOptions, PREFIX_SIZE,
};
use crate::{NimbleResult, TracedNimbleError};

/// One dominant value plus exceptions. Layout after the prefix:
/// `[common_value:T][is_common_length:u32][is_common bool encoding]
/// [other_values encoding]`. A set bit emits the common value, a clear
/// bit consumes the next exception.
pub struct MainlyConstantEncoding<T: Primitive> {
    common: T,
    is_common: Box<BoolEncoding>,
    others: Box<NumericEncoding<T>>,
    row_count: u32,
    position: u32,
    bool_scratch: Vec<bool>,
}

impl<T: Primitive> MainlyConstantEncoding<T> {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let common = T::decode(&mut buf)?;
        let is_common_length = read_u32_le(&mut buf)? as usize;
        if buf.len() < is_common_length {
            return Err(TracedNimbleError::corrupt(
                "is-common bitmap overruns encoding payload",
            ));
        }
        let bitmap_start = data.len() - buf.len();
        let is_common =
            BoolEncoding::decode(data.slice(bitmap_start..bitmap_start + is_common_length))?;
        if is_common.row_count() != row_count {
            return Err(TracedNimbleError::corrupt(format!(
                "is-common bitmap declares {} rows, parent demands {row_count}",
                is_common.row_count()
            )));
        }
        let others = NumericEncoding::<T>::decode(data.slice(bitmap_start + is_common_length..))?;
        Ok(Self {
            common,
            is_common: Box::new(is_common),
            others: Box::new(others),
            row_count,
            position: 0,
            bool_scratch: vec![],
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
        self.bool_scratch.clear();
        self.is_common.materialize(count, &mut self.bool_scratch)?;
        let exceptions = self.bool_scratch.iter().filter(|v| !**v).count() as u32;
        self.others.skip(exceptions)?;
        self.position += count;
        Ok(())
    }

    pub fn materialize(&mut self, count: u32, out: &mut Vec<T>) -> NimbleResult<()> {
        if count > self.remaining() {
            return Err(TracedNimbleError::corrupt(
                "materialize past end of encoding",
            ));
        }
        self.bool_scratch.clear();
        self.is_common.materialize(count, &mut self.bool_scratch)?;
        let exceptions = self.bool_scratch.iter().filter(|v| !**v).count() as u32;
        let mut others = Vec::with_capacity(exceptions as usize);
        self.others.materialize(exceptions, &mut others)?;
        let mut next = others.iter();
        out.reserve(count as usize);
        for &is_common in &self.bool_scratch {
            if is_common {
                out.push(self.common);
            } else {
                out.push(*next.next().ok_or_else(|| {
                    TracedNimbleError::corrupt("exception values shorter than bitmap demands")
                })?);
            }
        }
        self.position += count;
        Ok(())
    }
}

pub fn encode_mainly_constant<T: Primitive>(
    values: &[T],
    common: T,
    opts: &SelectionOptions,
    layout: Option<&EncodingLayout>,
    out: &mut Vec<u8>,
) -> NimbleResult<()> {
    let is_common: Vec<bool> = values.iter().map(|v| *v == common).collect();
    let others: Vec<T> = values.iter().copied().filter(|v| *v != common).collect();
    let is_common_payload = select_bool(&is_common, opts, layout.and_then(|l| l.child(0)))?;
    let others_payload = select_numeric(&others, opts, layout.and_then(|l| l.child(1)))?;

    write_prefix(
        EncodingKind::MainlyConstant,
        T::DATA_TYPE,
        values.len() as u32,
        out,
    );
    common.encode(out);
    out.put_u32_le(is_common_payload.len() as u32);
    out.extend_from_slice(&is_common_payload);
    out.extend_from_slice(&others_payload);
    Ok(())
}

pub fn mainly_constant_size_estimate<T: Primitive>(count: u32, exception_count: u32) -> usize {
    use crate::common::{bitmap_size, required_bit_width, FixedBitArray};
    let is_common = PREFIX_SIZE
        + 1
        + PREFIX_SIZE
        + 5
        + FixedBitArray::buffer_size(
            exception_count as usize,
            required_bit_width(count as u64),
        );
    let is_common = is_common.min(PREFIX_SIZE + bitmap_size(count as usize));
    PREFIX_SIZE + T::WIDTH + 4 + is_common + PREFIX_SIZE + exception_count as usize * T::WIDTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut values = vec![42i32; 100];
        values[17] = 1;
        values[55] = -9;
        values[56] = -9;
        let mut payload = vec![];
        encode_mainly_constant(&values, 42, &SelectionOptions::default(), None, &mut payload)
            .unwrap();
        let mut encoding = MainlyConstantEncoding::<i32>::decode(
            Bytes::from(payload).slice(PREFIX_SIZE..),
            100,
        )
        .unwrap();
        let mut out = vec![];
        encoding.materialize(100, &mut out).unwrap();
        assert_eq!(out, values);
    }

    #[test]
    fn test_skip_consumes_exceptions() {
        let mut values = vec![0u16; 40];
        values[5] = 7;
        values[25] = 9;
        let mut payload = vec![];
        encode_mainly_constant(&values, 0, &SelectionOptions::default(), None, &mut payload)
            .unwrap();
        let mut encoding = MainlyConstantEncoding::<u16>::decode(
            Bytes::from(payload).slice(PREFIX_SIZE..),
            40,
        )
        .unwrap();
        encoding.skip(20).unwrap();
        let mut out = vec![];
        encoding.materialize(20, &mut out).unwrap();
        assert_eq!(out, values[20..]);
    }
}
