// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! String kernels. Values materialize as [`Bytes`] slices into the
//! chunk payload, so callers get zero-copy views that stay valid for
//! as long as they hold them.

use std::collections::HashMap;

use bitvec::prelude::{BitVec, Lsb0};
use bytes::{BufMut, Bytes};

use crate::common::{read_u32_le, required_bit_width, FixedBitArray};
use crate::encodings::{
    read_prefix, select_bool, select_numeric, write_prefix, BoolEncoding, DataType, EncodingKind,
    EncodingLayout, NumericEncoding, SelectionOptions, StringStatistics, PREFIX_SIZE,
};
use crate::{NimbleResult, TracedNimbleError};

pub enum StringEncoding {
    Trivial(TrivialStringEncoding),
    Dictionary(DictionaryStringEncoding),
    Constant(ConstantStringEncoding),
    Nullable(Box<NullableStringEncoding>),
}

impl StringEncoding {
    pub fn decode(data: Bytes) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let prefix = read_prefix(&mut buf)?;
        if prefix.data_type != DataType::String {
            return Err(TracedNimbleError::corrupt(format!(
                "expected String payload, found {:?}",
                prefix.data_type
            )));
        }
        let body = data.slice(PREFIX_SIZE..);
        Ok(match prefix.kind {
            EncodingKind::Trivial => {
                StringEncoding::Trivial(TrivialStringEncoding::decode(body, prefix.row_count)?)
            }
            EncodingKind::Dictionary => StringEncoding::Dictionary(
                DictionaryStringEncoding::decode(body, prefix.row_count)?,
            ),
            EncodingKind::Constant => {
                StringEncoding::Constant(ConstantStringEncoding::decode(body, prefix.row_count)?)
            }
            EncodingKind::Nullable => StringEncoding::Nullable(Box::new(
                NullableStringEncoding::decode(body, prefix.row_count)?,
            )),
            other => {
                return Err(TracedNimbleError::unsupported(format!(
                    "{other:?} over String"
                )))
            }
        })
    }

    pub fn row_count(&self) -> u32 {
        match self {
            StringEncoding::Trivial(e) => e.row_count,
            StringEncoding::Dictionary(e) => e.row_count,
            StringEncoding::Constant(e) => e.row_count,
            StringEncoding::Nullable(e) => e.row_count,
        }
    }

    pub fn remaining(&self) -> u32 {
        match self {
            StringEncoding::Trivial(e) => e.row_count - e.position,
            StringEncoding::Dictionary(e) => e.row_count - e.position,
            StringEncoding::Constant(e) => e.row_count - e.position,
            StringEncoding::Nullable(e) => e.row_count - e.position,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, StringEncoding::Nullable(_))
    }

    pub fn skip(&mut self, count: u32) -> NimbleResult<()> {
        match self {
            StringEncoding::Trivial(e) => e.skip(count),
            StringEncoding::Dictionary(e) => e.skip(count),
            StringEncoding::Constant(e) => e.skip(count),
            StringEncoding::Nullable(e) => e.skip(count),
        }
    }

    pub fn materialize(&mut self, count: u32, out: &mut Vec<Bytes>) -> NimbleResult<()> {
        match self {
            StringEncoding::Trivial(e) => e.materialize(count, out),
            StringEncoding::Dictionary(e) => e.materialize(count, out),
            StringEncoding::Constant(e) => e.materialize(count, out),
            StringEncoding::Nullable(e) => e.materialize(count, out),
        }
    }

    pub fn materialize_nullable(
        &mut self,
        count: u32,
        out: &mut Vec<Bytes>,
        validity: &mut BitVec<u8, Lsb0>,
    ) -> NimbleResult<()> {
        match self {
            StringEncoding::Nullable(e) => e.materialize_nullable(count, out, validity),
            other => {
                other.materialize(count, out)?;
                validity.extend(std::iter::repeat(true).take(count as usize));
                Ok(())
            }
        }
    }
}

/// Lengths encoding followed by the concatenated value bytes. Layout:
/// `[lengths_length:u32][lengths encoding over u32][blob]`.
pub struct TrivialStringEncoding {
    lengths: Box<NumericEncoding<u32>>,
    blob: Bytes,
    blob_offset: usize,
    row_count: u32,
    position: u32,
    scratch: Vec<u32>,
}

impl TrivialStringEncoding {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let lengths_length = read_u32_le(&mut buf)? as usize;
        if buf.len() < lengths_length {
            return Err(TracedNimbleError::corrupt(
                "string lengths overrun encoding payload",
            ));
        }
        let lengths_start = data.len() - buf.len();
        let lengths =
            NumericEncoding::<u32>::decode(data.slice(lengths_start..lengths_start + lengths_length))?;
        if lengths.row_count() != row_count {
            return Err(TracedNimbleError::corrupt(format!(
                "string lengths declare {} rows, parent demands {row_count}",
                lengths.row_count()
            )));
        }
        Ok(Self {
            lengths: Box::new(lengths),
            blob: data.slice(lengths_start + lengths_length..),
            blob_offset: 0,
            row_count,
            position: 0,
            scratch: vec![],
        })
    }

    fn check(&self, count: u32) -> NimbleResult<()> {
        if count > self.row_count - self.position {
            return Err(TracedNimbleError::corrupt("read past end of encoding"));
        }
        Ok(())
    }

    pub fn skip(&mut self, count: u32) -> NimbleResult<()> {
        self.check(count)?;
        self.scratch.clear();
        self.lengths.materialize(count, &mut self.scratch)?;
        let skipped: u64 = self.scratch.iter().map(|l| *l as u64).sum();
        self.blob_offset += skipped as usize;
        if self.blob_offset > self.blob.len() {
            return Err(TracedNimbleError::corrupt(
                "string lengths overrun blob bytes",
            ));
        }
        self.position += count;
        Ok(())
    }

    pub fn materialize(&mut self, count: u32, out: &mut Vec<Bytes>) -> NimbleResult<()> {
        self.check(count)?;
        self.scratch.clear();
        self.lengths.materialize(count, &mut self.scratch)?;
        out.reserve(count as usize);
        for &length in &self.scratch {
            let end = self.blob_offset + length as usize;
            if end > self.blob.len() {
                return Err(TracedNimbleError::corrupt(
                    "string lengths overrun blob bytes",
                ));
            }
            out.push(self.blob.slice(self.blob_offset..end));
            self.blob_offset = end;
        }
        self.position += count;
        Ok(())
    }
}

/// Layout: `[alphabet_length:u32][alphabet string encoding][indices]`.
pub struct DictionaryStringEncoding {
    alphabet: Vec<Bytes>,
    indices: Box<NumericEncoding<u32>>,
    row_count: u32,
    position: u32,
    scratch: Vec<u32>,
}

impl DictionaryStringEncoding {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let alphabet_length = read_u32_le(&mut buf)? as usize;
        if buf.len() < alphabet_length {
            return Err(TracedNimbleError::corrupt(
                "string alphabet overruns encoding payload",
            ));
        }
        let alphabet_start = data.len() - buf.len();
        let mut alphabet_encoding =
            StringEncoding::decode(data.slice(alphabet_start..alphabet_start + alphabet_length))?;
        let mut alphabet = Vec::with_capacity(alphabet_encoding.row_count() as usize);
        alphabet_encoding.materialize(alphabet_encoding.row_count(), &mut alphabet)?;

        let indices =
            NumericEncoding::<u32>::decode(data.slice(alphabet_start + alphabet_length..))?;
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

    pub fn skip(&mut self, count: u32) -> NimbleResult<()> {
        if count > self.row_count - self.position {
            return Err(TracedNimbleError::corrupt("skip past end of encoding"));
        }
        self.indices.skip(count)?;
        self.position += count;
        Ok(())
    }

    pub fn materialize(&mut self, count: u32, out: &mut Vec<Bytes>) -> NimbleResult<()> {
        if count > self.row_count - self.position {
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
            out.push(value.clone());
        }
        self.position += count;
        Ok(())
    }
}

/// Layout: `[length:u32][bytes]`.
pub struct ConstantStringEncoding {
    value: Bytes,
    row_count: u32,
    position: u32,
}

impl ConstantStringEncoding {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let length = read_u32_le(&mut buf)? as usize;
        if buf.len() < length {
            return Err(TracedNimbleError::corrupt(
                "constant string overruns encoding payload",
            ));
        }
        Ok(Self {
            value: data.slice(4..4 + length),
            row_count,
            position: 0,
        })
    }

    pub fn skip(&mut self, count: u32) -> NimbleResult<()> {
        if count > self.row_count - self.position {
            return Err(TracedNimbleError::corrupt("skip past end of encoding"));
        }
        self.position += count;
        Ok(())
    }

    pub fn materialize(&mut self, count: u32, out: &mut Vec<Bytes>) -> NimbleResult<()> {
        if count > self.row_count - self.position {
            return Err(TracedNimbleError::corrupt(
                "materialize past end of encoding",
            ));
        }
        out.extend(std::iter::repeat(self.value.clone()).take(count as usize));
        self.position += count;
        Ok(())
    }
}

/// Layout: `[data_length:u32][data string encoding][nulls encoding]`.
pub struct NullableStringEncoding {
    data: StringEncoding,
    nulls: BoolEncoding,
    row_count: u32,
    position: u32,
    nulls_scratch: Vec<bool>,
}

impl NullableStringEncoding {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let data_length = read_u32_le(&mut buf)? as usize;
        if buf.len() < data_length {
            return Err(TracedNimbleError::corrupt(
                "nullable data overruns encoding payload",
            ));
        }
        let data_start = data.len() - buf.len();
        let inner = StringEncoding::decode(data.slice(data_start..data_start + data_length))?;
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

    pub fn skip(&mut self, count: u32) -> NimbleResult<()> {
        if count > self.row_count - self.position {
            return Err(TracedNimbleError::corrupt("skip past end of encoding"));
        }
        self.nulls_scratch.clear();
        self.nulls.materialize(count, &mut self.nulls_scratch)?;
        let present = self.nulls_scratch.iter().filter(|v| **v).count() as u32;
        self.data.skip(present)?;
        self.position += count;
        Ok(())
    }

    pub fn materialize(&mut self, count: u32, out: &mut Vec<Bytes>) -> NimbleResult<()> {
        let mut validity = BitVec::new();
        self.materialize_nullable(count, out, &mut validity)
    }

    pub fn materialize_nullable(
        &mut self,
        count: u32,
        out: &mut Vec<Bytes>,
        validity: &mut BitVec<u8, Lsb0>,
    ) -> NimbleResult<()> {
        if count > self.row_count - self.position {
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
        for &is_present in &self.nulls_scratch {
            validity.push(is_present);
            out.push(if is_present {
                next.next()
                    .ok_or_else(|| {
                        TracedNimbleError::corrupt("nullable data shorter than present count")
                    })?
                    .clone()
            } else {
                Bytes::new()
            });
        }
        self.position += count;
        Ok(())
    }
}

pub fn encode_trivial_string(
    values: &[Bytes],
    opts: &SelectionOptions,
    layout: Option<&EncodingLayout>,
    out: &mut Vec<u8>,
) -> NimbleResult<()> {
    let lengths: Vec<u32> = values.iter().map(|v| v.len() as u32).collect();
    let lengths_payload = select_numeric(&lengths, opts, layout.and_then(|l| l.child(0)))?;

    write_prefix(
        EncodingKind::Trivial,
        DataType::String,
        values.len() as u32,
        out,
    );
    out.put_u32_le(lengths_payload.len() as u32);
    out.extend_from_slice(&lengths_payload);
    for value in values {
        out.extend_from_slice(value);
    }
    Ok(())
}

pub fn encode_dictionary_string(
    values: &[Bytes],
    opts: &SelectionOptions,
    layout: Option<&EncodingLayout>,
    out: &mut Vec<u8>,
) -> NimbleResult<()> {
    let mut positions: HashMap<Bytes, u32> = HashMap::new();
    let mut alphabet: Vec<Bytes> = vec![];
    let mut indices = Vec::with_capacity(values.len());
    for value in values {
        let index = match positions.get(value) {
            Some(&index) => index,
            None => {
                let index = alphabet.len() as u32;
                alphabet.push(value.clone());
                positions.insert(value.clone(), index);
                index
            }
        };
        indices.push(index);
    }
    let mut alphabet_payload = vec![];
    encode_trivial_string(
        &alphabet,
        opts,
        layout.and_then(|l| l.child(0)),
        &mut alphabet_payload,
    )?;
    let indices_payload = select_numeric(&indices, opts, layout.and_then(|l| l.child(1)))?;

    write_prefix(
        EncodingKind::Dictionary,
        DataType::String,
        values.len() as u32,
        out,
    );
    out.put_u32_le(alphabet_payload.len() as u32);
    out.extend_from_slice(&alphabet_payload);
    out.extend_from_slice(&indices_payload);
    Ok(())
}

pub fn encode_constant_string(value: &Bytes, row_count: u32, out: &mut Vec<u8>) {
    write_prefix(EncodingKind::Constant, DataType::String, row_count, out);
    out.put_u32_le(value.len() as u32);
    out.extend_from_slice(value);
}

pub fn encode_nullable_string(
    values: &[Bytes],
    validity: &[bool],
    opts: &SelectionOptions,
    layout: Option<&EncodingLayout>,
    out: &mut Vec<u8>,
) -> NimbleResult<()> {
    let data_payload = select_string(values, opts, layout.and_then(|l| l.child(0)))?;
    let nulls_payload = select_bool(validity, opts, layout.and_then(|l| l.child(1)))?;

    write_prefix(
        EncodingKind::Nullable,
        DataType::String,
        validity.len() as u32,
        out,
    );
    out.put_u32_le(data_payload.len() as u32);
    out.extend_from_slice(&data_payload);
    out.extend_from_slice(&nulls_payload);
    Ok(())
}

/// Entry point for string streams that may carry nulls; wraps in
/// Nullable only when a null exists.
pub fn select_string_nullable(
    values: &[Bytes],
    validity: Option<&[bool]>,
    opts: &SelectionOptions,
    layout: Option<&EncodingLayout>,
) -> NimbleResult<Vec<u8>> {
    match validity {
        Some(validity) if validity.iter().any(|v| !v) => {
            let mut out = vec![];
            let layout = layout.filter(|l| l.kind == EncodingKind::Nullable);
            encode_nullable_string(values, validity, opts, layout, &mut out)?;
            Ok(out)
        }
        _ => {
            let layout = match layout {
                Some(l) if l.kind == EncodingKind::Nullable => l.child(0),
                other => other,
            };
            select_string(values, opts, layout)
        }
    }
}

/// Size-minimizing selection over the string kernel set.
pub fn select_string(
    values: &[Bytes],
    opts: &SelectionOptions,
    layout: Option<&EncodingLayout>,
) -> NimbleResult<Vec<u8>> {
    if let Some(layout) = layout {
        if let Some(payload) = replay_string(values, opts, layout)? {
            return Ok(payload);
        }
    }

    let stats = StringStatistics::compute(values);
    let mut out = vec![];
    if stats.count > 0 && stats.distinct == 1 && opts.enabled(EncodingKind::Constant) {
        encode_constant_string(&values[0], stats.count, &mut out);
        return Ok(out);
    }

    let lengths_estimate = PREFIX_SIZE
        + 5
        + FixedBitArray::buffer_size(
            stats.count as usize,
            required_bit_width(stats.max_length as u64),
        );
    let trivial = PREFIX_SIZE + 4 + lengths_estimate + stats.total_bytes as usize;
    let mut best = (EncodingKind::Trivial, trivial);

    if opts.enabled(EncodingKind::Dictionary)
        && stats.count > 0
        && (stats.distinct as f64) <= stats.count as f64 * opts.dictionary_distinct_ratio
    {
        let alphabet = PREFIX_SIZE + 4 + lengths_estimate + stats.unique_bytes as usize;
        let indices = PREFIX_SIZE
            + 5
            + FixedBitArray::buffer_size(
                stats.count as usize,
                required_bit_width(stats.distinct.max(1) as u64 - 1),
            );
        let estimate = PREFIX_SIZE + 4 + alphabet + indices;
        if estimate < best.1 {
            best = (EncodingKind::Dictionary, estimate);
        }
    }

    match best.0 {
        EncodingKind::Dictionary => encode_dictionary_string(values, opts, None, &mut out)?,
        _ => encode_trivial_string(values, opts, None, &mut out)?,
    }
    Ok(out)
}

fn replay_string(
    values: &[Bytes],
    opts: &SelectionOptions,
    layout: &EncodingLayout,
) -> NimbleResult<Option<Vec<u8>>> {
    let mut out = vec![];
    match layout.kind {
        EncodingKind::Trivial => encode_trivial_string(values, opts, Some(layout), &mut out)?,
        EncodingKind::Dictionary => encode_dictionary_string(values, opts, Some(layout), &mut out)?,
        EncodingKind::Constant
            if !values.is_empty() && values.iter().all(|v| v == &values[0]) =>
        {
            encode_constant_string(&values[0], values.len() as u32, &mut out)
        }
        _ => return Ok(None),
    }
    Ok(Some(out))
}
