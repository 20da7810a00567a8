// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;

use bytes::{BufMut, Bytes};

use crate::common::read_u32_le;
use crate::encodings::{
    select_numeric, write_prefix, EncodingKind, EncodingLayout, NumericEncoding, Primitive,
    SelectionOptions, PREFIX_SIZE,
};
use crate::{NimbleResult, TracedNimbleError};

/// Dictionary encoding. Layout after the prefix:
/// `[alphabet_length:u32][alphabet encoding][indices encoding]`.
/// The alphabet holds the distinct values in first-seen order; indices
/// are u32 positions into it, one per row.
pub struct DictionaryEncoding<T: Primitive> {
    alphabet: Vec<T>,
    indices: Box<NumericEncoding<u32>>,
    row_count: u32,
    position: u32,
    scratch: Vec<u32>,
}

impl<T: Primitive> DictionaryEncoding<T> {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let alphabet_length = read_u32_le(&mut buf)? as usize;
        if buf.len() < alphabet_length {
            return Err(TracedNimbleError::corrupt(
                "dictionary alphabet overruns encoding payload",
            ));
        }
        let alphabet_start = data.len() - buf.len();
        let mut alphabet_encoding =
            NumericEncoding::<T>::decode(data.slice(alphabet_start..alphabet_start + alphabet_length))?;
        let mut alphabet = Vec::with_capacity(alphabet_encoding.row_count() as usize);
        alphabet_encoding.materialize(alphabet_encoding.row_count(), &mut alphabet)?;

        let indices = NumericEncoding::<u32>::decode(data.slice(alphabet_start + alphabet_length..))?;
        if indices.row_count() != row_count {
            return Err(TracedNimbleError::corrupt(format!(
                "dictionary indices declare {} rows, parent demands {row_count}",
                indices.row_count()
            )));
        }
        Ok(Self {
            alphabet,
            indices: Box::new(indices),
            row_count,
            position: 0,
            scratch: vec![],
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
        self.indices.skip(count)?;
        self.position += count;
        Ok(())
    }

    pub fn materialize(&mut self, count: u32, out: &mut Vec<T>) -> NimbleResult<()> {
        if count > self.remaining() {
            return Err(TracedNimbleError::corrupt(
                "materialize past end of encoding",
            ));
        }
        self.scratch.clear();
        self.indices.materialize(count, &mut self.scratch)?;
        out.reserve(count as usize);
        for &index in &self.scratch {
            let value = self.alphabet.get(index as usize).ok_or_else(|| {
                TracedNimbleError::corrupt(format!(
                    "dictionary index {index} out of alphabet range {}",
                    self.alphabet.len()
                ))
            })?;
            out.push(*value);
        }
        self.position += count;
        Ok(())
    }
}

/// Build `(alphabet, indices)` over the batch, first-seen order.
pub fn dictionarize<T: Primitive>(values: &[T]) -> (Vec<T>, Vec<u32>) {
    let mut positions: HashMap<u64, u32> = HashMap::new();
    let mut alphabet = vec![];
    let mut indices = Vec::with_capacity(values.len());
    for &value in values {
        let index = *positions.entry(value.bits_key()).or_insert_with(|| {
            alphabet.push(value);
            alphabet.len() as u32 - 1
        });
        indices.push(index);
    }
    (alphabet, indices)
}

pub fn encode_dictionary<T: Primitive>(
    values: &[T],
    opts: &SelectionOptions,
    layout: Option<&EncodingLayout>,
    out: &mut Vec<u8>,
) -> NimbleResult<()> {
    let (alphabet, indices) = dictionarize(values);
    let alphabet_payload = select_numeric(&alphabet, opts, layout.and_then(|l| l.child(0)))?;
    let indices_payload = select_numeric(&indices, opts, layout.and_then(|l| l.child(1)))?;

    write_prefix(
        EncodingKind::Dictionary,
        T::DATA_TYPE,
        values.len() as u32,
        out,
    );
    out.put_u32_le(alphabet_payload.len() as u32);
    out.extend_from_slice(&alphabet_payload);
    out.extend_from_slice(&indices_payload);
    Ok(())
}

pub fn dictionary_size_estimate<T: Primitive>(count: u32, distinct: u32) -> usize {
    use crate::common::{required_bit_width, FixedBitArray};
    let alphabet = PREFIX_SIZE + distinct as usize * T::WIDTH;
    let indices = PREFIX_SIZE
        + std::mem::size_of::<u32>()
        + 1
        + FixedBitArray::buffer_size(count as usize, required_bit_width(distinct.max(1) as u64 - 1));
    PREFIX_SIZE + 4 + alphabet + indices
}
