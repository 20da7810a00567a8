// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use bytes::{BufMut, Bytes};

use crate::common::read_u32_le;
use crate::encodings::{
    compute_runs, select_numeric, write_prefix, EncodingKind, EncodingLayout, NumericEncoding,
    Primitive, SelectionOptions, PREFIX_SIZE,
};
use crate::{NimbleResult, TracedNimbleError};

/// Run-length encoding. Layout after the prefix:
/// `[runs_length:u32][runs encoding over u32][values encoding over T]`.
/// Both children are themselves full encoding trees.
pub struct RleEncoding<T: Primitive> {
    runs: Box<NumericEncoding<u32>>,
    values: Box<NumericEncoding<T>>,
    row_count: u32,
    position: u32,
    current_value: T,
    copies_remaining: u32,
    scratch: Vec<T>,
    runs_scratch: Vec<u32>,
}

impl<T: Primitive> RleEncoding<T> {
    pub fn decode(data: Bytes, row_count: u32) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let runs_length = read_u32_le(&mut buf)? as usize;
        if buf.len() < runs_length {
            return Err(TracedNimbleError::corrupt(
                "RLE runs overrun encoding payload",
            ));
        }
        let runs_start = data.len() - buf.len();
        let runs = NumericEncoding::<u32>::decode(data.slice(runs_start..runs_start + runs_length))?;
        let values =
            NumericEncoding::<T>::decode(data.slice(runs_start + runs_length..))?;
        if values.row_count() != runs.row_count() {
            return Err(TracedNimbleError::corrupt(format!(
                "RLE declares {} runs but {} run values",
                runs.row_count(),
                values.row_count()
            )));
        }
        Ok(Self {
            runs: Box::new(runs),
            values: Box::new(values),
            row_count,
            position: 0,
            current_value: T::default(),
            copies_remaining: 0,
            scratch: Vec::with_capacity(1),
            runs_scratch: Vec::with_capacity(1),
        })
    }

    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    pub fn remaining(&self) -> u32 {
        self.row_count - self.position
    }

    fn advance_run(&mut self) -> NimbleResult<()> {
        if self.runs.remaining() == 0 {
            return Err(TracedNimbleError::corrupt(
                "RLE runs exhausted before declared row count",
            ));
        }
        self.runs_scratch.clear();
        self.runs.materialize(1, &mut self.runs_scratch)?;
        self.scratch.clear();
        self.values.materialize(1, &mut self.scratch)?;
        self.copies_remaining = self.runs_scratch[0];
        self.current_value = self.scratch[0];
        Ok(())
    }

    pub fn skip(&mut self, count: u32) -> NimbleResult<()> {
        if count > self.remaining() {
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

    pub fn materialize(&mut self, count: u32, out: &mut Vec<T>) -> NimbleResult<()> {
        if count > self.remaining() {
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

pub fn encode_rle<T: Primitive>(
    values: &[T],
    opts: &SelectionOptions,
    layout: Option<&EncodingLayout>,
    out: &mut Vec<u8>,
) -> NimbleResult<()> {
    let (run_lengths, run_values) = compute_runs(values);
    let runs_payload = select_numeric(
        &run_lengths,
        opts,
        layout.and_then(|l| l.child(0)),
    )?;
    let values_payload = select_numeric(&run_values, opts, layout.and_then(|l| l.child(1)))?;

    write_prefix(EncodingKind::Rle, T::DATA_TYPE, values.len() as u32, out);
    out.put_u32_le(runs_payload.len() as u32);
    out.extend_from_slice(&runs_payload);
    out.extend_from_slice(&values_payload);
    Ok(())
}

pub fn rle_size_estimate<T: Primitive>(run_count: u32, max_run_length: u32) -> usize {
    use crate::common::{required_bit_width, FixedBitArray};
    // Children usually land on FixedBitWidth (runs) and Trivial
    // (values); good enough for candidate ranking.
    let runs = PREFIX_SIZE
        + std::mem::size_of::<u32>()
        + 1
        + FixedBitArray::buffer_size(
            run_count as usize,
            required_bit_width(max_run_length as u64),
        );
    PREFIX_SIZE + 4 + runs + PREFIX_SIZE + run_count as usize * T::WIDTH
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(values: &[i32]) -> RleEncoding<i32> {
        let mut payload = vec![];
        encode_rle(values, &SelectionOptions::default(), None, &mut payload).unwrap();
        RleEncoding::decode(
            Bytes::from(payload).slice(PREFIX_SIZE..),
            values.len() as u32,
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip() {
        let values = [1, 1, 1, 2, 2, 3, 3, 3, 3, 3];
        let mut encoding = make(&values);
        let mut out = vec![];
        encoding.materialize(10, &mut out).unwrap();
        assert_eq!(out, values);
    }

    #[test]
    fn test_skip_within_and_across_runs() {
        let values = [5, 5, 5, 5, 9, 9, 7, 7, 7, 7, 7, 7];
        let mut encoding = make(&values);
        encoding.skip(2).unwrap();
        let mut out = vec![];
        encoding.materialize(4, &mut out).unwrap();
        assert_eq!(out, values[2..6]);
        encoding.skip(3).unwrap();
        out.clear();
        encoding.materialize(3, &mut out).unwrap();
        assert_eq!(out, values[9..12]);
        assert!(encoding.materialize(1, &mut out).is_err());
    }

    #[test]
    fn test_size_beats_trivial_on_long_runs() {
        let values = vec![7i32; 10];
        let mut payload = vec![];
        encode_rle(&values, &SelectionOptions::default(), None, &mut payload).unwrap();
        assert!(payload.len() < values.len() * std::mem::size_of::<i32>());
    }
}
