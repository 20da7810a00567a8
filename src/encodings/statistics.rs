// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! Batch statistics driving encoding selection. Computed once per
//! chunk; every candidate size estimate derives from these numbers.

use std::collections::HashMap;

use bytes::Bytes;

use crate::encodings::Primitive;

#[derive(Clone, Debug)]
pub struct Statistics<T: Primitive> {
    pub count: u32,
    /// Range over non-NaN values; `None` when the batch is empty or
    /// all-NaN. NaN is treated as "unknown" and excluded.
    pub min: Option<T>,
    pub max: Option<T>,
    pub has_nan: bool,
    pub distinct: u32,
    pub run_count: u32,
    pub mode: Option<T>,
    pub mode_count: u32,
}

impl<T: Primitive> Statistics<T> {
    pub fn compute(values: &[T]) -> Self {
        let mut min: Option<T> = None;
        let mut max: Option<T> = None;
        let mut has_nan = false;
        let mut run_count = 0u32;
        let mut frequencies: HashMap<u64, (T, u32)> = HashMap::new();

        let mut previous: Option<T> = None;
        for &value in values {
            if value.is_nan() {
                has_nan = true;
            } else {
                min = Some(match min {
                    Some(m) if m <= value => m,
                    _ => value,
                });
                max = Some(match max {
                    Some(m) if m >= value => m,
                    _ => value,
                });
            }
            if previous != Some(value) {
                run_count += 1;
                previous = Some(value);
            }
            frequencies.entry(value.bits_key()).or_insert((value, 0)).1 += 1;
        }

        // Ties break on the bit pattern so selection stays reproducible
        // regardless of hash iteration order.
        let (mode, mode_count) = frequencies
            .values()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.bits_key().cmp(&a.0.bits_key())))
            .map(|&(value, count)| (Some(value), count))
            .unwrap_or((None, 0));

        Self {
            count: values.len() as u32,
            min,
            max,
            has_nan,
            distinct: frequencies.len() as u32,
            run_count,
            mode,
            mode_count,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StringStatistics {
    pub count: u32,
    pub distinct: u32,
    pub run_count: u32,
    /// Sum of all value lengths.
    pub total_bytes: u64,
    /// Sum of lengths over distinct values only.
    pub unique_bytes: u64,
    pub max_length: u32,
}

impl StringStatistics {
    pub fn compute(values: &[Bytes]) -> Self {
        let mut unique: HashMap<&[u8], ()> = HashMap::new();
        let mut total_bytes = 0u64;
        let mut unique_bytes = 0u64;
        let mut max_length = 0u32;
        let mut run_count = 0u32;
        let mut previous: Option<&Bytes> = None;
        for value in values {
            total_bytes += value.len() as u64;
            max_length = max_length.max(value.len() as u32);
            if unique.insert(value.as_ref(), ()).is_none() {
                unique_bytes += value.len() as u64;
            }
            if previous != Some(value) {
                run_count += 1;
                previous = Some(value);
            }
        }
        Self {
            count: values.len() as u32,
            distinct: unique.len() as u32,
            run_count,
            total_bytes,
            unique_bytes,
            max_length,
        }
    }
}

/// Split a batch into `(run_lengths, run_values)`; adjacent equal
/// values fold into one run.
pub fn compute_runs<T: Primitive>(values: &[T]) -> (Vec<u32>, Vec<T>) {
    let mut lengths: Vec<u32> = vec![];
    let mut runs = vec![];
    for &value in values {
        match (runs.last(), lengths.last_mut()) {
            (Some(&last), Some(length)) if last == value => *length += 1,
            _ => {
                runs.push(value);
                lengths.push(1);
            }
        }
    }
    (lengths, runs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_statistics() {
        let values = [3i32, 3, 3, 7, 7, -1, 3];
        let stats = Statistics::compute(&values);
        assert_eq!(stats.count, 7);
        assert_eq!(stats.min, Some(-1));
        assert_eq!(stats.max, Some(7));
        assert_eq!(stats.distinct, 3);
        assert_eq!(stats.run_count, 4);
        assert_eq!(stats.mode, Some(3));
        assert_eq!(stats.mode_count, 4);
    }

    #[test]
    fn test_nan_skipped_in_range() {
        let values = [1.0f64, f64::NAN, 3.0];
        let stats = Statistics::compute(&values);
        assert!(stats.has_nan);
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(3.0));

        let all_nan = [f64::NAN, f64::NAN];
        let stats = Statistics::compute(&all_nan);
        assert_eq!(stats.min, None);
        assert_eq!(stats.max, None);
    }

    #[test]
    fn test_string_statistics() {
        let values: Vec<Bytes> = ["aa", "aa", "b", "cc", "cc", "cc"]
            .iter()
            .map(|s| Bytes::from_static(s.as_bytes()))
            .collect();
        let stats = StringStatistics::compute(&values);
        assert_eq!(stats.count, 6);
        assert_eq!(stats.distinct, 3);
        assert_eq!(stats.run_count, 3);
        assert_eq!(stats.total_bytes, 11);
        assert_eq!(stats.unique_bytes, 5);
        assert_eq!(stats.max_length, 2);
    }

    #[test]
    fn test_compute_runs() {
        let (lengths, values) = compute_runs(&[7i64, 7, 7, 2, 2, 9]);
        assert_eq!(lengths, vec![3, 2, 1]);
        assert_eq!(values, vec![7, 2, 9]);
        let (lengths, values) = compute_runs::<i64>(&[]);
        assert!(lengths.is_empty() && values.is_empty());
    }
}
