// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! Boolean kernels. Booleans get their own kernel set: Trivial packs
//! bits, RLE stores only run lengths plus the initial value (runs
//! strictly alternate), and SparseBool stores the sorted positions of
//! the rarer side.

use bitvec::prelude::{BitVec, Lsb0};
use bytes::{BufMut, Bytes};

use crate::common::{bitmap_size, get_bit, pack_bools, read_u8, read_u32_le, required_bit_width, FixedBitArray};
use crate::encodings::{
    read_prefix, select_numeric, write_prefix, DataType, EncodingKind, EncodingLayout,
    NumericEncoding, SelectionOptions, PREFIX_SIZE,
};
use crate::{NimbleResult, TracedNimbleError};

pub enum BoolEncoding {
    Trivial(TrivialBoolEncoding),
    Rle(RleBoolEncoding),
    Sparse(SparseBoolEncoding),
    Constant(ConstantBoolEncoding),
    Nullable(Box<NullableBoolEncoding>),
}

impl BoolEncoding {
    pub fn decode(data: Bytes) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let prefix = read_prefix(&mut buf)?;
        if prefix.data_type != DataType::Bool {
            return Err(TracedNimbleError::corrupt(format!(
                "expected Bool payload, found {:?}",
                prefix.data_type
            )));
        }
        let body = data.slice(PREFIX_SIZE..);
        Ok(match prefix.kind {
            EncodingKind::Trivial => {
                BoolEncoding::Trivial(TrivialBoolEncoding::decode(body, prefix.row_count)?)
            }
            EncodingKind::Rle => {
                BoolEncoding::Rle(RleBoolEncoding::decode(body, prefix.row_count)?)
            }
            EncodingKind::SparseBool => {
                BoolEncoding::Sparse(SparseBoolEncoding::decode(body, prefix.row_count)?)
            }
            EncodingKind::Constant => {
                BoolEncoding::Constant(ConstantBoolEncoding::decode(body, prefix.row_count)?)
            }
            EncodingKind::Nullable => BoolEncoding::Nullable(Box::new(
                NullableBoolEncoding::decode(body, prefix.row_count)?,
            )),
            other => {
                return Err(TracedNimbleError::unsupported(format!(
                    "{other:?} over Bool"
                )))
            }
        })
    }

    pub fn row_count(&self) -> u32 {
        match self {
            BoolEncoding::Trivial(e) => e.row_count,
            BoolEncoding::Rle(e) => e.row_count,
            BoolEncoding::Sparse(e) => e.row_count,
            BoolEncoding::Constant(e) => e.row_count,
            BoolEncoding::Nullable(e) => e.row_count,
        }
    }

    pub fn remaining(&self) -> u32 {
        match self {
            BoolEncoding::Trivial(e) => e.row_count - e.position,
            BoolEncoding::Rle(e) => e.row_count - e.position,
            BoolEncoding::Sparse(e) => e.row_count - e.position,
            BoolEncoding::Constant(e) => e.row_count - e.position,
            BoolEncoding::Nullable(e) => e.row_count - e.position,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, BoolEncoding::Nullable(_))
    }

    pub fn skip(&mut self, count: u32) -> NimbleResult<()> {
        match self {
            BoolEncoding::Trivial(e) => e.skip(count),
            BoolEncoding::Rle(e) => e.skip(count),
            BoolEncoding::Sparse(e) => e.skip(count),
            BoolEncoding::Constant(e) => e.skip(count),
            BoolEncoding::Nullable(e) => e.skip(count),
        }
    }

    pub fn materialize(&mut self, count: u32, out: &mut Vec<bool>) -> NimbleResult<()> {
        match self {
            BoolEncoding::Trivial(e) => e.materialize(count, out),
            BoolEncoding::Rle(e) => e.materialize(count, out),
            BoolEncoding::Sparse(e) => e.materialize(count, out),
            BoolEncoding::Constant(e) => e.materialize(count, out),
            BoolEncoding::Nullable(e) => e.materialize(count, out),
        }
    }

    pub fn materialize_nullable(
        &mut self,
        count: u32,
        out: &mut Vec<bool>,
        validity: &mut BitVec<u8, Lsb0>,
    ) -> NimbleResult<()> {
        match self {
            BoolEncoding::Nullable(e) => e.materialize_nullable(count, out, validity),
            other => {
                other.materialize(count, out)?;
                validity.extend(std::iter::repeat(true).take(count as usize));
                Ok(())
            }
        }
    }
}

/// Packed bitmap, LSB-first.
pub struct TrivialBoolEncoding {
    data: Bytes,
    row_count: u32,
    position: u32,
}

impl TrivialBoolEncoding {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        if data.len() < bitmap_size(row_count as usize) {
            return Err(TracedNimbleError::corrupt(
                "bool bitmap shorter than row count",
            ));
        }
        Ok(Self {
            data,
            row_count,
            position: 0,
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
        self.position += count;
        Ok(())
    }

    pub fn materialize(&mut self, count: u32, out: &mut Vec<bool>) -> NimbleResult<()> {
        self.check(count)?;
        out.reserve(count as usize);
        for i in self.position..self.position + count {
            out.push(get_bit(i as usize, &self.data));
        }
        self.position += count;
        Ok(())
    }
}

/// Alternating-run RLE: run lengths plus one byte for the first run's
/// value. Layout: `[runs_length:u32][runs encoding][initial_value:u8]`.
pub struct RleBoolEncoding {
    runs: Box<NumericEncoding<u32>>,
    row_count: u32,
    position: u32,
    current_value: bool,
    copies_remaining: u32,
    scratch: Vec<u32>,
}

impl RleBoolEncoding {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let runs_length = read_u32_le(&mut buf)? as usize;
        if buf.len() < runs_length + 1 {
            return Err(TracedNimbleError::corrupt(
                "bool RLE runs overrun encoding payload",
            ));
        }
        let runs_start = data.len() - buf.len();
        let runs =
            NumericEncoding::<u32>::decode(data.slice(runs_start..runs_start + runs_length))?;
        let initial_value = data[runs_start + runs_length] != 0;
        Ok(Self {
            runs: Box::new(runs),
            row_count,
            position: 0,
            // Primed so the first advance lands on `initial_value`.
            current_value: !initial_value,
            copies_remaining: 0,
            scratch: vec![],
        })
    }

    fn advance_run(&mut self) -> NimbleResult<()> {
        if self.runs.remaining() == 0 {
            return Err(TracedNimbleError::corrupt(
                "bool RLE runs exhausted before declared row count",
            ));
        }
        self.scratch.clear();
        self.runs.materialize(1, &mut self.scratch)?;
        self.copies_remaining = self.scratch[0];
        self.current_value = !self.current_value;
        Ok(())
    }

    pub fn skip(&mut self, count: u32) -> NimbleResult<()> {
        if count > self.row_count - self.position {
            return Err(TracedNimbleError::corrupt("skip past end of encoding"));
        }
        let mut rows_left = count;
        while rows_left > 0 {
            if rows_left < self.copies_remaining {
                self.copies_remaining -= rows_left;
                break;
            }
            rows_left -= self.copies_remaining;
            self.copies_remaining = 0;
            if rows_left > 0 {
                self.advance_run()?;
            }
        }
        self.position += count;
        Ok(())
    }

    pub fn materialize(&mut self, count: u32, out: &mut Vec<bool>) -> NimbleResult<()> {
        if count > self.row_count - self.position {
            return Err(TracedNimbleError::corrupt(
                "materialize past end of encoding",
            ));
        }
        out.reserve(count as usize);
        let mut rows_left = count;
        while rows_left > 0 {
            if self.copies_remaining == 0 {
                self.advance_run()?;
                continue;
            }
            let take = rows_left.min(self.copies_remaining);
            out.extend(std::iter::repeat(self.current_value).take(take as usize));
            self.copies_remaining -= take;
            rows_left -= take;
        }
        self.position += count;
        Ok(())
    }
}

/// Sorted positions of the sparse side. Layout:
/// `[sparse_value:u8][indices encoding over u32]`.
pub struct SparseBoolEncoding {
    sparse_value: bool,
    indices: Box<NumericEncoding<u32>>,
    next_index: Option<u32>,
    row_count: u32,
    position: u32,
    scratch: Vec<u32>,
}

impl SparseBoolEncoding {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let sparse_value = read_u8(&mut buf)? != 0;
        let indices = NumericEncoding::<u32>::decode(data.slice(1..))?;
        let mut this = Self {
            sparse_value,
            indices: Box::new(indices),
            next_index: None,
            row_count,
            position: 0,
            scratch: vec![],
        };
        this.fetch_next_index()?;
        Ok(this)
    }

    fn fetch_next_index(&mut self) -> NimbleResult<()> {
        if self.indices.remaining() == 0 {
            self.next_index = None;
            return Ok(());
        }
        self.scratch.clear();
        self.indices.materialize(1, &mut self.scratch)?;
        self.next_index = Some(self.scratch[0]);
        Ok(())
    }

    fn check(&self, count: u32) -> NimbleResult<()> {
        if count > self.row_count - self.position {
            return Err(TracedNimbleError::corrupt("read past end of encoding"));
        }
        Ok(())
    }

    pub fn skip(&mut self, count: u32) -> NimbleResult<()> {
        self.check(count)?;
        let target = self.position + count;
        while let Some(index) = self.next_index {
            if index >= target {
                break;
            }
            self.fetch_next_index()?;
        }
        self.position = target;
        Ok(())
    }

    pub fn materialize(&mut self, count: u32, out: &mut Vec<bool>) -> NimbleResult<()> {
        self.check(count)?;
        out.reserve(count as usize);
        for row in self.position..self.position + count {
            if self.next_index == Some(row) {
                out.push(self.sparse_value);
                self.fetch_next_index()?;
            } else {
                out.push(!self.sparse_value);
            }
        }
        self.position += count;
        Ok(())
    }
}

pub struct ConstantBoolEncoding {
    value: bool,
    row_count: u32,
    position: u32,
}

impl ConstantBoolEncoding {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let value = read_u8(&mut buf)? != 0;
        Ok(Self {
            value,
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

    pub fn materialize(&mut self, count: u32, out: &mut Vec<bool>) -> NimbleResult<()> {
        if count > self.row_count - self.position {
            return Err(TracedNimbleError::corrupt(
                "materialize past end of encoding",
            ));
        }
        out.extend(std::iter::repeat(self.value).take(count as usize));
        self.position += count;
        Ok(())
    }
}

/// Nullable wrapper for bool columns. Layout:
/// `[data_length:u32][data encoding][nulls encoding]`; data holds
/// non-null positions only, nulls is true at non-null rows.
pub struct NullableBoolEncoding {
    data: BoolEncoding,
    nulls: BoolEncoding,
    row_count: u32,
    position: u32,
    nulls_scratch: Vec<bool>,
}

impl NullableBoolEncoding {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let data_length = read_u32_le(&mut buf)? as usize;
        if buf.len() < data_length {
            return Err(TracedNimbleError::corrupt(
                "nullable data overruns encoding payload",
            ));
        }
        let data_start = data.len() - buf.len();
        let inner = BoolEncoding::decode(data.slice(data_start..data_start + data_length))?;
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

    pub fn materialize(&mut self, count: u32, out: &mut Vec<bool>) -> NimbleResult<()> {
        let mut validity = BitVec::new();
        self.materialize_nullable(count, out, &mut validity)
    }

    pub fn materialize_nullable(
        &mut self,
        count: u32,
        out: &mut Vec<bool>,
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
                *next.next().ok_or_else(|| {
                    TracedNimbleError::corrupt("nullable data shorter than present count")
                })?
            } else {
                false
            });
        }
        self.position += count;
        Ok(())
    }
}

pub fn encode_trivial_bool(values: &[bool], out: &mut Vec<u8>) {
    write_prefix(
        EncodingKind::Trivial,
        DataType::Bool,
        values.len() as u32,
        out,
    );
    out.extend_from_slice(&pack_bools(values));
}

pub fn encode_rle_bool(
    values: &[bool],
    opts: &SelectionOptions,
    layout: Option<&EncodingLayout>,
    out: &mut Vec<u8>,
) -> NimbleResult<()> {
    let mut run_lengths: Vec<u32> = vec![];
    let mut current = values.first().copied().unwrap_or(false);
    let mut length = 0u32;
    for &value in values {
        if value == current {
            length += 1;
        } else {
            run_lengths.push(length);
            current = value;
            length = 1;
        }
    }
    if length > 0 {
        run_lengths.push(length);
    }
    let runs_payload = select_numeric(&run_lengths, opts, layout.and_then(|l| l.child(0)))?;

    write_prefix(EncodingKind::Rle, DataType::Bool, values.len() as u32, out);
    out.put_u32_le(runs_payload.len() as u32);
    out.extend_from_slice(&runs_payload);
    out.push(values.first().copied().unwrap_or(false) as u8);
    Ok(())
}

pub fn encode_sparse_bool(
    values: &[bool],
    sparse_value: bool,
    opts: &SelectionOptions,
    layout: Option<&EncodingLayout>,
    out: &mut Vec<u8>,
) -> NimbleResult<()> {
    let indices: Vec<u32> = values
        .iter()
        .enumerate()
        .filter(|(_, &v)| v == sparse_value)
        .map(|(i, _)| i as u32)
        .collect();
    let indices_payload = select_numeric(&indices, opts, layout.and_then(|l| l.child(0)))?;

    write_prefix(
        EncodingKind::SparseBool,
        DataType::Bool,
        values.len() as u32,
        out,
    );
    out.push(sparse_value as u8);
    out.extend_from_slice(&indices_payload);
    Ok(())
}

pub fn encode_constant_bool(value: bool, row_count: u32, out: &mut Vec<u8>) {
    write_prefix(EncodingKind::Constant, DataType::Bool, row_count, out);
    out.push(value as u8);
}

/// Size-minimizing selection over the bool kernel set.
pub fn select_bool(
    values: &[bool],
    opts: &SelectionOptions,
    layout: Option<&EncodingLayout>,
) -> NimbleResult<Vec<u8>> {
    if let Some(layout) = layout {
        if let Some(payload) = replay_bool(values, opts, layout)? {
            return Ok(payload);
        }
    }

    let count = values.len() as u32;
    let true_count = values.iter().filter(|v| **v).count() as u32;
    let run_count = values
        .iter()
        .zip(values.iter().skip(1))
        .filter(|(a, b)| a != b)
        .count() as u32
        + u32::from(count > 0);

    let mut out = vec![];
    if count > 0 && (true_count == 0 || true_count == count) && opts.enabled(EncodingKind::Constant)
    {
        encode_constant_bool(values[0], count, &mut out);
        return Ok(out);
    }

    let trivial = PREFIX_SIZE + bitmap_size(count as usize);
    let mut best = (EncodingKind::Trivial, trivial);

    if opts.enabled(EncodingKind::Rle) && count > 0 {
        let estimate = PREFIX_SIZE
            + 4
            + PREFIX_SIZE
            + 5
            + FixedBitArray::buffer_size(run_count as usize, required_bit_width(count as u64))
            + 1;
        if estimate < best.1 {
            best = (EncodingKind::Rle, estimate);
        }
    }
    if opts.enabled(EncodingKind::SparseBool) && count > 0 {
        let sparse_count = true_count.min(count - true_count);
        let estimate = PREFIX_SIZE
            + 1
            + PREFIX_SIZE
            + 5
            + FixedBitArray::buffer_size(sparse_count as usize, required_bit_width(count as u64));
        if estimate < best.1 {
            best = (EncodingKind::SparseBool, estimate);
        }
    }

    match best.0 {
        EncodingKind::Rle => encode_rle_bool(values, opts, None, &mut out)?,
        EncodingKind::SparseBool => {
            let sparse_value = true_count <= count - true_count;
            encode_sparse_bool(values, sparse_value, opts, None, &mut out)?;
        }
        _ => encode_trivial_bool(values, &mut out),
    }
    Ok(out)
}

fn replay_bool(
    values: &[bool],
    opts: &SelectionOptions,
    layout: &EncodingLayout,
) -> NimbleResult<Option<Vec<u8>>> {
    let mut out = vec![];
    match layout.kind {
        EncodingKind::Trivial => encode_trivial_bool(values, &mut out),
        EncodingKind::Rle if !values.is_empty() => {
            encode_rle_bool(values, opts, Some(layout), &mut out)?
        }
        EncodingKind::SparseBool if !values.is_empty() => {
            let true_count = values.iter().filter(|v| **v).count();
            encode_sparse_bool(
                values,
                true_count * 2 <= values.len(),
                opts,
                Some(layout),
                &mut out,
            )?
        }
        EncodingKind::Constant
            if !values.is_empty() && values.iter().all(|&v| v == values[0]) =>
        {
            encode_constant_bool(values[0], values.len() as u32, &mut out)
        }
        _ => return Ok(None),
    }
    Ok(Some(out))
}


/// Entry point for bool streams that may carry nulls; wraps in
/// Nullable only when a null exists.
pub fn select_bool_nullable(
    values: &[bool],
    validity: Option<&[bool]>,
    opts: &SelectionOptions,
    layout: Option<&EncodingLayout>,
) -> NimbleResult<Vec<u8>> {
    match validity {
        Some(validity) if validity.iter().any(|v| !v) => {
            let mut out = vec![];
            let layout = layout.filter(|l| l.kind == EncodingKind::Nullable);
            encode_nullable_bool(values, validity, opts, layout, &mut out)?;
            Ok(out)
        }
        _ => {
            let layout = match layout {
                Some(l) if l.kind == EncodingKind::Nullable => l.child(0),
                other => other,
            };
            select_bool(values, opts, layout)
        }
    }
}

/// Encode a nullable bool column: `values` holds non-null entries in
/// order, `validity` one bit per row.
pub fn encode_nullable_bool(
    values: &[bool],
    validity: &[bool],
    opts: &SelectionOptions,
    layout: Option<&EncodingLayout>,
    out: &mut Vec<u8>,
) -> NimbleResult<()> {
    let data_payload = select_bool(values, opts, layout.and_then(|l| l.child(0)))?;
    let nulls_payload = select_bool(validity, opts, layout.and_then(|l| l.child(1)))?;

    write_prefix(
        EncodingKind::Nullable,
        DataType::Bool,
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
    use super::*;

    fn round_trip(values: &[bool]) -> Vec<bool> {
        let payload = select_bool(values, &SelectionOptions::default(), None).unwrap();
        let mut encoding = BoolEncoding::decode(Bytes::from(payload)).unwrap();
        assert_eq!(encoding.row_count(), values.len() as u32);
        let mut out = vec![];
        encoding.materialize(values.len() as u32, &mut out).unwrap();
        out
    }

    #[test]
    fn test_round_trip_shapes() {
        let alternating: Vec<bool> = (0..100).map(|i| i % 2 == 0).collect();
        assert_eq!(round_trip(&alternating), alternating);

        let sparse: Vec<bool> = (0..100).map(|i| i % 31 == 0).collect();
        assert_eq!(round_trip(&sparse), sparse);

        let constant = vec![true; 50];
        assert_eq!(round_trip(&constant), constant);

        let runs: Vec<bool> = (0..90).map(|i| (i / 30) % 2 == 0).collect();
        assert_eq!(round_trip(&runs), runs);
    }

    #[test]
    fn test_rle_bool_skip() {
        let values: Vec<bool> = (0..60).map(|i| (i / 20) % 2 == 0).collect();
        let mut payload = vec![];
        encode_rle_bool(&values, &SelectionOptions::default(), None, &mut payload).unwrap();
        let mut encoding = BoolEncoding::decode(Bytes::from(payload)).unwrap();
        encoding.skip(25).unwrap();
        let mut out = vec![];
        encoding.materialize(10, &mut out).unwrap();
        assert_eq!(out, values[25..35]);
    }

    #[test]
    fn test_sparse_bool_false_side() {
        let values: Vec<bool> = (0..64).map(|i| i % 13 != 0).collect();
        let mut payload = vec![];
        encode_sparse_bool(&values, false, &SelectionOptions::default(), None, &mut payload)
            .unwrap();
        let mut encoding = BoolEncoding::decode(Bytes::from(payload)).unwrap();
        encoding.skip(13).unwrap();
        let mut out = vec![];
        encoding.materialize(26, &mut out).unwrap();
        assert_eq!(out, values[13..39]);
    }

    #[test]
    fn test_nullable_bool() {
        let values = [true, false, true, true];
        let validity = [true, false, true, false, true, true, false];
        let mut out = vec![];
        encode_nullable_bool(&values, &validity, &SelectionOptions::default(), None, &mut out)
            .unwrap();
        let mut encoding = BoolEncoding::decode(Bytes::from(out)).unwrap();
        assert!(encoding.is_nullable());
        let mut decoded = vec![];
        let mut decoded_validity = BitVec::new();
        encoding
            .materialize_nullable(7, &mut decoded, &mut decoded_validity)
            .unwrap();
        assert_eq!(
            decoded_validity.iter().by_vals().collect::<Vec<_>>(),
            validity
        );
        assert_eq!(decoded, vec![true, false, true, false, true, true, false]);
    }
}
