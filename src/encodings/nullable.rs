// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use bitvec::prelude::{BitVec, Lsb0};
use bytes::{BufMut, Bytes};

use crate::common::read_u32_le;
use crate::encodings::{
    select_bool, select_numeric, write_prefix, BoolEncoding, EncodingKind, EncodingLayout,
    NumericEncoding, Primitive, SelectionOptions,
};
use crate::{NimbleResult, TracedNimbleError};

/// Nullable wrapper. Layout after the prefix:
/// `[data_length:u32][data encoding][nulls encoding]`. The data child
/// is decoded over non-null positions only; the nulls child is a bool
/// stream, true at non-null rows.
pub struct NullableEncoding<T: Primitive> {
    data: NumericEncoding<T>,
    nulls: BoolEncoding,
    row_count: u32,
    position: u32,
    nulls_scratch: Vec<bool>,
}

impl<T: Primitive> NullableEncoding<T> {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let data_length = read_u32_le(&mut buf)? as usize;
        if buf.len() < data_length {
            return Err(TracedNimbleError::corrupt(
                "nullable data overruns encoding payload",
            ));
        }
        let data_start = data.len() - buf.len();
        let inner = NumericEncoding::<T>::decode(data.slice(data_start..data_start + data_length))?;
        if inner.is_nullable() {
            return Err(TracedNimbleError::corrupt("nested Nullable encoding"));
        }
        let nulls = BoolEncoding::decode(data.slice(data_start + data_length..))?;
        if nulls.is_nullable() {
            return Err(TracedNimbleError::corrupt("nested Nullable encoding"));
        }
        if nulls.row_count() != row_count {
            return Err(TracedNimbleError::corrupt(format!(
                "nulls bitmap declares {} rows, parent demands {row_count}",
                nulls.row_count()
            )));
        }
        Ok(Self {
            data: inner,
            nulls,
            row_count,
            position: 0,
            nulls_scratch: vec![],
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
        self.nulls_scratch.clear();
        self.nulls.materialize(count, &mut self.nulls_scratch)?;
        let present = self.nulls_scratch.iter().filter(|v| **v).count() as u32;
        self.data.skip(present)?;
        self.position += count;
        Ok(())
    }

    /// Non-nullable materialize fills null slots with the default.
    pub fn materialize(&mut self, count: u32, out: &mut Vec<T>) -> NimbleResult<()> {
        let mut validity = BitVec::new();
        self.materialize_nullable(count, out, &mut validity)
    }

    pub fn materialize_nullable(
        &mut self,
        count: u32,
        out: &mut Vec<T>,
        validity: &mut BitVec<u8, Lsb0>,
    ) -> NimbleResult<()> {
        if count > self.remaining() {
            return Err(TracedNimbleError::corrupt(
                "materialize past end of encoding",
            ));
        }
        self.nulls_scratch.clear();
        self.nulls.materialize(count, &mut self.nulls_scratch)?;
        let present = self.nulls_scratch.iter().filter(|v| **v).count() as u32;
        let mut values = Vec::with_capacity(present as usize);
        self.data.materialize(present, &mut values)?;
        let mut next = values.iter();
        out.reserve(count as usize);
        for &is_present in &self.nulls_scratch {
            validity.push(is_present);
            out.push(if is_present {
                *next.next().ok_or_else(|| {
                    TracedNimbleError::corrupt("nullable data shorter than present count")
                })?
            } else {
                T::default()
            });
        }
        self.position += count;
        Ok(())
    }
}

/// `values` holds the non-null entries in order; `validity` has one
/// bit per logical row.
pub fn encode_nullable<T: Primitive>(
    values: &[T],
    validity: &[bool],
    opts: &SelectionOptions,
    layout: Option<&EncodingLayout>,
    out: &mut Vec<u8>,
) -> NimbleResult<()> {
    let data_payload = select_numeric(values, opts, layout.and_then(|l| l.child(0)))?;
    let nulls_payload = select_bool(validity, opts, layout.and_then(|l| l.child(1)))?;

    write_prefix(
        EncodingKind::Nullable,
        T::DATA_TYPE,
        validity.len() as u32,
        out,
    );
    out.put_u32_le(data_payload.len() as u32);
    out.extend_from_slice(&data_payload);
    out.extend_from_slice(&nulls_payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::encodings::PREFIX_SIZE;

    #[test]
    fn test_round_trip_with_nulls() {
        // [1, null, 3, null, 5]
        let values = [1i32, 3, 5];
        let validity = [true, false, true, false, true];
        let mut payload = vec![];
        encode_nullable(&values, &validity, &SelectionOptions::default(), None, &mut payload)
            .unwrap();
        let mut encoding =
            NullableEncoding::<i32>::decode(Bytes::from(payload).slice(PREFIX_SIZE..), 5).unwrap();
        let mut out = vec![];
        let mut out_validity = BitVec::new();
        encoding
            .materialize_nullable(5, &mut out, &mut out_validity)
            .unwrap();
        assert_eq!(out, vec![1, 0, 3, 0, 5]);
        assert_eq!(
            out_validity.iter().by_vals().collect::<Vec<_>>(),
            validity
        );
    }

    #[test]
    fn test_skip_only_consumes_present() {
        let values = [10i64, 20, 30];
        let validity = [false, true, false, true, false, true];
        let mut payload = vec![];
        encode_nullable(&values, &validity, &SelectionOptions::default(), None, &mut payload)
            .unwrap();
        let mut encoding =
            NullableEncoding::<i64>::decode(Bytes::from(payload).slice(PREFIX_SIZE..), 6).unwrap();
        encoding.skip(3).unwrap();
        let mut out = vec![];
        let mut out_validity = BitVec::new();
        encoding
            .materialize_nullable(3, &mut out, &mut out_validity)
            .unwrap();
        assert_eq!(out, vec![20, 0, 30]);
    }

    #[test]
    fn test_all_null_column() {
        let validity = [false; 8];
        let mut payload = vec![];
        encode_nullable::<f64>(&[], &validity, &SelectionOptions::default(), None, &mut payload)
            .unwrap();
        let mut encoding =
            NullableEncoding::<f64>::decode(Bytes::from(payload).slice(PREFIX_SIZE..), 8).unwrap();
        let mut out = vec![];
        let mut out_validity = BitVec::new();
        encoding
            .materialize_nullable(8, &mut out, &mut out_validity)
            .unwrap();
        assert_eq!(out, vec![0.0; 8]);
        assert!(out_validity.iter().by_vals().all(|v| !v));
    }
}
