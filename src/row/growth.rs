// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use std::collections::BTreeMap;

/// Controls how per-field input buffers grow between flushes.
pub trait InputBufferGrowthPolicy: Send + Sync {
    /// Capacity (in items) to reserve so `new_size` fits; returns
    /// `capacity` unchanged when it already does.
    fn extended_capacity(&self, new_size: usize, capacity: usize) -> usize;
}

/// Piecewise-geometric schedule: the range bucket containing the
/// target size picks the multiplier, and capacity advances by that
/// factor until it suffices. Sizes below the smallest bucket get the
/// minimum capacity floor.
pub struct DefaultInputBufferGrowthPolicy {
    min_capacity: usize,
    /// `bucket lower bound -> growth factor`.
    range_configs: BTreeMap<usize, f64>,
}

impl DefaultInputBufferGrowthPolicy {
    pub fn new(min_capacity: usize, range_configs: BTreeMap<usize, f64>) -> Self {
        Self {
            min_capacity,
            range_configs,
        }
    }
}

impl Default for DefaultInputBufferGrowthPolicy {
    fn default() -> Self {
        Self::new(
            16,
            BTreeMap::from([(16, 2.0), (4096, 1.5), (65536, 1.25)]),
        )
    }
}

impl InputBufferGrowthPolicy for DefaultInputBufferGrowthPolicy {
    fn extended_capacity(&self, new_size: usize, capacity: usize) -> usize {
        if new_size <= capacity {
            return capacity;
        }
        let factor = match self.range_configs.range(..=new_size).next_back() {
            Some((_, factor)) => *factor,
            None => return self.min_capacity,
        };
        let mut extended = capacity.max(self.min_capacity) as f64;
        while (extended as usize) < new_size {
            extended *= factor;
        }
        extended as usize
    }
}

/// Grow `buffer` toward `additional` more items under the policy.
pub fn reserve_with_policy<T>(
    buffer: &mut Vec<T>,
    additional: usize,
    policy: &dyn InputBufferGrowthPolicy,
) {
    let new_size = buffer.len() + additional;
    let capacity = policy.extended_capacity(new_size, buffer.capacity());
    if capacity > buffer.capacity() {
        buffer.reserve_exact(capacity - buffer.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_applies_below_smallest_bucket() {
        let policy = DefaultInputBufferGrowthPolicy::default();
        assert_eq!(policy.extended_capacity(3, 0), 16);
    }

    #[test]
    fn test_no_growth_when_capacity_suffices() {
        let policy = DefaultInputBufferGrowthPolicy::default();
        assert_eq!(policy.extended_capacity(100, 128), 128);
    }

    #[test]
    fn test_geometric_growth_until_fit() {
        let policy = DefaultInputBufferGrowthPolicy::default();
        // Doubling from the floor: 16 -> 32 -> 64 -> 128.
        assert_eq!(policy.extended_capacity(100, 16), 128);
        // Large targets advance by the slower late-range factor.
        let capacity = policy.extended_capacity(100_000, 65536);
        assert!(capacity >= 100_000);
        assert!(capacity <= (65536.0 * 1.25 * 1.25) as usize);
    }

    #[test]
    fn test_reserve_with_policy() {
        let policy = DefaultInputBufferGrowthPolicy::default();
        let mut buffer: Vec<u32> = vec![];
        reserve_with_policy(&mut buffer, 5, &policy);
        assert!(buffer.capacity() >= 16);
    }
}
