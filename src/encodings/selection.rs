// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! Encoding selection: given a batch of values, pick the encoding tree
//! with the smallest estimated serialized size among the candidates the
//! statistics admit, then encode it. Children of the chosen kernel
//! (run lengths, dictionary indices, exception values) re-enter
//! selection, so nesting emerges one level per call.

use crate::encodings::{
    dictionary_size_estimate, encode_constant, encode_dictionary, encode_fixed_bit_width,
    encode_mainly_constant, encode_nullable, encode_rle, encode_trivial, encode_varint,
    fixed_bit_width_size, mainly_constant_size_estimate, rle_size_estimate, trivial_size,
    varint_encoded_size, EncodingKind, EncodingLayout, Primitive, Statistics,
};
use crate::NimbleResult;

/// Per-physical-type tuning of the selection policy. Thresholds are
/// fractions of the batch row count.
#[derive(Clone, Debug)]
pub struct SelectionOptions {
    pub disabled: Vec<EncodingKind>,
    /// RLE is a candidate when `run_count <= ratio * count`.
    pub rle_run_ratio: f64,
    /// Dictionary is a candidate when `distinct <= ratio * count`.
    pub dictionary_distinct_ratio: f64,
    /// MainlyConstant is a candidate when
    /// `mode_count >= ratio * count`.
    pub mainly_constant_ratio: f64,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            disabled: vec![],
            rle_run_ratio: 0.5,
            dictionary_distinct_ratio: 0.5,
            mainly_constant_ratio: 0.8,
        }
    }
}

impl SelectionOptions {
    pub fn enabled(&self, kind: EncodingKind) -> bool {
        !self.disabled.contains(&kind)
    }

    pub fn disable(mut self, kind: EncodingKind) -> Self {
        self.disabled.push(kind);
        self
    }
}

/// Decode-cost rank used to break size ties; lower decodes faster.
fn decode_cost(kind: EncodingKind) -> u8 {
    match kind {
        EncodingKind::Constant => 0,
        EncodingKind::Trivial => 1,
        EncodingKind::FixedBitWidth => 2,
        EncodingKind::Varint => 3,
        EncodingKind::MainlyConstant => 4,
        EncodingKind::SparseBool => 4,
        EncodingKind::Dictionary => 5,
        EncodingKind::Rle => 6,
        EncodingKind::Nullable => 7,
    }
}

/// Select and encode a non-null numeric batch.
pub fn select_numeric<T: Primitive>(
    values: &[T],
    opts: &SelectionOptions,
    layout: Option<&EncodingLayout>,
) -> NimbleResult<Vec<u8>> {
    if let Some(layout) = layout {
        if let Some(payload) = replay_numeric(values, opts, layout)? {
            return Ok(payload);
        }
    }

    let stats = Statistics::compute(values);
    let count = stats.count;
    let mut out = vec![];

    if count > 0 && stats.distinct == 1 && opts.enabled(EncodingKind::Constant) {
        encode_constant(values[0], count, &mut out);
        return Ok(out);
    }

    let mut best = (EncodingKind::Trivial, trivial_size::<T>(count));

    let mut consider = |kind: EncodingKind, size: usize, best: &mut (EncodingKind, usize)| {
        if size < best.1 || (size == best.1 && decode_cost(kind) < decode_cost(best.0)) {
            *best = (kind, size);
        }
    };

    if T::IS_INTEGER && count > 0 && opts.enabled(EncodingKind::FixedBitWidth) && !stats.has_nan {
        if let (Some(min), Some(max)) = (stats.min, stats.max) {
            let size = fixed_bit_width_size::<T>(count, max.delta_from(min));
            consider(EncodingKind::FixedBitWidth, size, &mut best);
        }
    }
    if T::IS_INTEGER && count > 0 && opts.enabled(EncodingKind::Varint) {
        consider(EncodingKind::Varint, varint_encoded_size(values), &mut best);
    }
    if count > 0
        && opts.enabled(EncodingKind::Rle)
        && (stats.run_count as f64) <= count as f64 * opts.rle_run_ratio
    {
        let size = rle_size_estimate::<T>(stats.run_count, count);
        consider(EncodingKind::Rle, size, &mut best);
    }
    if count > 0
        && opts.enabled(EncodingKind::Dictionary)
        && (stats.distinct as f64) <= count as f64 * opts.dictionary_distinct_ratio
    {
        let size = dictionary_size_estimate::<T>(count, stats.distinct);
        consider(EncodingKind::Dictionary, size, &mut best);
    }
    if count > 0
        && opts.enabled(EncodingKind::MainlyConstant)
        && (stats.mode_count as f64) >= count as f64 * opts.mainly_constant_ratio
    {
        let size = mainly_constant_size_estimate::<T>(count, count - stats.mode_count);
        consider(EncodingKind::MainlyConstant, size, &mut best);
    }

    match best.0 {
        EncodingKind::FixedBitWidth => {
            // Guarded above: min exists whenever this candidate is in play.
            let baseline = stats.min.unwrap_or_default();
            encode_fixed_bit_width(values, baseline, &mut out);
        }
        EncodingKind::Varint => encode_varint(values, &mut out),
        EncodingKind::Rle => encode_rle(values, opts, None, &mut out)?,
        EncodingKind::Dictionary => encode_dictionary(values, opts, None, &mut out)?,
        EncodingKind::MainlyConstant => {
            let common = stats.mode.unwrap_or_default();
            encode_mainly_constant(values, common, opts, None, &mut out)?;
        }
        _ => encode_trivial(values, &mut out),
    }
    Ok(out)
}

/// Entry point for value streams that may carry nulls: `values` holds
/// the non-null entries in order, `validity` one bit per row (`None`
/// means all present). Wraps in Nullable only when a null exists.
pub fn select_numeric_nullable<T: Primitive>(
    values: &[T],
    validity: Option<&[bool]>,
    opts: &SelectionOptions,
    layout: Option<&EncodingLayout>,
) -> NimbleResult<Vec<u8>> {
    match validity {
        Some(validity) if validity.iter().any(|v| !v) => {
            let mut out = vec![];
            let layout = layout.filter(|l| l.kind == EncodingKind::Nullable);
            encode_nullable(values, validity, opts, layout, &mut out)?;
            Ok(out)
        }
        _ => {
            let layout = match layout {
                Some(l) if l.kind == EncodingKind::Nullable => l.child(0),
                other => other,
            };
            select_numeric(values, opts, layout)
        }
    }
}

fn replay_numeric<T: Primitive>(
    values: &[T],
    opts: &SelectionOptions,
    layout: &EncodingLayout,
) -> NimbleResult<Option<Vec<u8>>> {
    let mut out = vec![];
    match layout.kind {
        EncodingKind::Trivial => encode_trivial(values, &mut out),
        EncodingKind::FixedBitWidth if T::IS_INTEGER && !values.is_empty() => {
            let stats = Statistics::compute(values);
            match (stats.has_nan, stats.min) {
                (false, Some(min)) => encode_fixed_bit_width(values, min, &mut out),
                _ => return Ok(None),
            }
        }
        EncodingKind::Varint if T::IS_INTEGER => encode_varint(values, &mut out),
        EncodingKind::Rle if !values.is_empty() => {
            encode_rle(values, opts, Some(layout), &mut out)?
        }
        EncodingKind::Dictionary if !values.is_empty() => {
            encode_dictionary(values, opts, Some(layout), &mut out)?
        }
        EncodingKind::MainlyConstant if !values.is_empty() => {
            let stats = Statistics::compute(values);
            match stats.mode {
                Some(mode) => encode_mainly_constant(values, mode, opts, Some(layout), &mut out)?,
                None => return Ok(None),
            }
        }
        EncodingKind::Constant
            if !values.is_empty() && values.iter().all(|v| *v == values[0]) =>
        {
            encode_constant(values[0], values.len() as u32, &mut out)
        }
        _ => return Ok(None),
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::encodings::{read_prefix, NumericEncoding};

    fn selected_kind(payload: &[u8]) -> EncodingKind {
        let mut buf = payload;
        read_prefix(&mut buf).unwrap().kind
    }

    #[test]
    fn test_constant_batch() {
        let payload = select_numeric(&[7i32; 10], &SelectionOptions::default(), None).unwrap();
        assert_eq!(selected_kind(&payload), EncodingKind::Constant);
        assert!(payload.len() < 10 * 4);
    }

    #[test]
    fn test_narrow_range_picks_bit_packing() {
        let values: Vec<i64> = (0..1000).map(|i| 1_000_000 + i % 7).collect();
        let payload = select_numeric(&values, &SelectionOptions::default(), None).unwrap();
        assert_eq!(selected_kind(&payload), EncodingKind::FixedBitWidth);
        assert!(payload.len() < values.len() * 8 / 2);
    }

    #[test]
    fn test_runs_pick_rle() {
        let values: Vec<i32> = (0..1024).map(|i| i / 128).collect();
        let payload = select_numeric(&values, &SelectionOptions::default(), None).unwrap();
        assert_eq!(selected_kind(&payload), EncodingKind::Rle);
    }

    #[test]
    fn test_disabled_kind_not_selected() {
        let values: Vec<i32> = (0..1024).map(|i| i / 128).collect();
        let opts = SelectionOptions::default()
            .disable(EncodingKind::Rle)
            .disable(EncodingKind::Dictionary)
            .disable(EncodingKind::MainlyConstant);
        let payload = select_numeric(&values, &opts, None).unwrap();
        assert_eq!(selected_kind(&payload), EncodingKind::FixedBitWidth);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let values: Vec<u32> = (0..500).map(|i| i * 31 % 97).collect();
        let opts = SelectionOptions::default();
        let a = select_numeric(&values, &opts, None).unwrap();
        let b = select_numeric(&values, &opts, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_nullable_only_when_nulls_present() {
        let values = [1i32, 3, 5];
        let opts = SelectionOptions::default();
        let no_nulls =
            select_numeric_nullable(&values, Some(&[true, true, true]), &opts, None).unwrap();
        assert_ne!(selected_kind(&no_nulls), EncodingKind::Nullable);

        let with_nulls =
            select_numeric_nullable(&values, Some(&[true, false, true, false, true]), &opts, None)
                .unwrap();
        assert_eq!(selected_kind(&with_nulls), EncodingKind::Nullable);
        let mut encoding = NumericEncoding::<i32>::decode(Bytes::from(with_nulls)).unwrap();
        assert_eq!(encoding.row_count(), 5);
        let mut out = vec![];
        encoding.materialize(5, &mut out).unwrap();
        assert_eq!(out, vec![1, 0, 3, 0, 5]);
    }

    #[test]
    fn test_replay_layout_wins() {
        let values: Vec<i32> = (0..100).map(|i| i % 3).collect();
        let layout = EncodingLayout::new(EncodingKind::Varint, vec![]);
        let payload = select_numeric(&values, &SelectionOptions::default(), Some(&layout)).unwrap();
        assert_eq!(selected_kind(&payload), EncodingKind::Varint);
    }

    #[test]
    fn test_incompatible_replay_falls_back() {
        let values = [1.5f64, 2.5, 1.5];
        let layout = EncodingLayout::new(EncodingKind::FixedBitWidth, vec![]);
        let payload = select_numeric(&values, &SelectionOptions::default(), Some(&layout)).unwrap();
        assert_ne!(selected_kind(&payload), EncodingKind::FixedBitWidth);
    }

    #[test]
    fn test_empty_batch() {
        let payload = select_numeric::<u64>(&[], &SelectionOptions::default(), None).unwrap();
        let mut encoding = NumericEncoding::<u64>::decode(Bytes::from(payload)).unwrap();
        assert_eq!(encoding.row_count(), 0);
        let mut out = vec![];
        encoding.materialize(0, &mut out).unwrap();
        assert!(out.is_empty());
    }
}
