// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! Row-wise batch representation. A [`Vector`] mirrors one schema
//! node: scalars hold compacted values plus an optional validity
//! bitmap, containers hold per-present-row shape data plus child
//! vectors.
//!
//! Layout convention, applied uniformly: positional data (`values`,
//! `lengths`, `in_maps` bits, child rows) exists only for rows whose
//! parent slot is present. `validity` bit `i` covers logical row `i`;
//! `None` means all rows present.

use bitvec::prelude::{BitVec, Lsb0};
use bytes::Bytes;

use crate::encodings::Primitive;

pub type Validity = BitVec<u8, Lsb0>;

#[derive(Clone, Debug, PartialEq)]
pub struct ScalarVector<T> {
    /// Non-null values, in row order.
    pub values: Vec<T>,
    pub validity: Option<Validity>,
}

impl<T> ScalarVector<T> {
    pub fn new(values: Vec<T>) -> Self {
        Self {
            values,
            validity: None,
        }
    }

    pub fn from_options(values: Vec<Option<T>>) -> Self {
        let validity: Validity = values.iter().map(|v| v.is_some()).collect();
        let values = values.into_iter().flatten().collect();
        if validity.all() {
            Self {
                values,
                validity: None,
            }
        } else {
            Self {
                values,
                validity: Some(validity),
            }
        }
    }

    pub fn rows(&self) -> usize {
        match &self.validity {
            Some(validity) => validity.len(),
            None => self.values.len(),
        }
    }

    /// Expand back to one `Option` per row.
    pub fn to_options(&self) -> Vec<Option<T>>
    where
        T: Clone,
    {
        match &self.validity {
            None => self.values.iter().cloned().map(Some).collect(),
            Some(validity) => {
                let mut next = self.values.iter();
                validity
                    .iter()
                    .by_vals()
                    .map(|present| {
                        if present {
                            next.next().cloned()
                        } else {
                            None
                        }
                    })
                    .collect()
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RowVector {
    pub rows: usize,
    pub validity: Option<Validity>,
    /// One child per field; each sized to the present row count.
    pub children: Vec<Vector>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListVector {
    pub validity: Option<Validity>,
    /// One length per present row.
    pub lengths: Vec<u32>,
    pub elements: Box<Vector>,
}

impl ListVector {
    pub fn rows(&self) -> usize {
        match &self.validity {
            Some(validity) => validity.len(),
            None => self.lengths.len(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MapVector {
    pub validity: Option<Validity>,
    /// One entry count per present row.
    pub lengths: Vec<u32>,
    pub keys: Box<Vector>,
    pub values: Box<Vector>,
}

impl MapVector {
    pub fn rows(&self) -> usize {
        match &self.validity {
            Some(validity) => validity.len(),
            None => self.lengths.len(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FlatMapVector {
    pub rows: usize,
    pub validity: Option<Validity>,
    /// Feature names, aligned with `in_maps` and `children`.
    pub keys: Vec<String>,
    /// Per key: one bit per present map row.
    pub in_maps: Vec<Validity>,
    /// Per key: values for rows whose in-map bit is set.
    pub children: Vec<Vector>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Vector {
    Int8(ScalarVector<i8>),
    Uint8(ScalarVector<u8>),
    Int16(ScalarVector<i16>),
    Uint16(ScalarVector<u16>),
    Int32(ScalarVector<i32>),
    Uint32(ScalarVector<u32>),
    Int64(ScalarVector<i64>),
    Uint64(ScalarVector<u64>),
    Float(ScalarVector<f32>),
    Double(ScalarVector<f64>),
    Bool(ScalarVector<bool>),
    String(ScalarVector<Bytes>),
    Row(RowVector),
    Array(ListVector),
    Map(MapVector),
    FlatMap(FlatMapVector),
}

macro_rules! for_all_scalar_variants {
    ($macro:ident) => {
        $macro! {
            { Int8, i8 },
            { Uint8, u8 },
            { Int16, i16 },
            { Uint16, u16 },
            { Int32, i32 },
            { Uint32, u32 },
            { Int64, i64 },
            { Uint64, u64 },
            { Float, f32 },
            { Double, f64 }
        }
    };
}

macro_rules! impl_scalar_conversions {
    ($({ $variant:ident, $ty:ty }),*) => {
        $(
            impl From<Vec<$ty>> for Vector {
                fn from(values: Vec<$ty>) -> Self {
                    Vector::$variant(ScalarVector::new(values))
                }
            }

            impl From<Vec<Option<$ty>>> for Vector {
                fn from(values: Vec<Option<$ty>>) -> Self {
                    Vector::$variant(ScalarVector::from_options(values))
                }
            }
        )*
    };
}

for_all_scalar_variants! { impl_scalar_conversions }

impl From<Vec<bool>> for Vector {
    fn from(values: Vec<bool>) -> Self {
        Vector::Bool(ScalarVector::new(values))
    }
}

impl From<Vec<Option<bool>>> for Vector {
    fn from(values: Vec<Option<bool>>) -> Self {
        Vector::Bool(ScalarVector::from_options(values))
    }
}

impl From<Vec<&str>> for Vector {
    fn from(values: Vec<&str>) -> Self {
        Vector::String(ScalarVector::new(
            values
                .into_iter()
                .map(|s| Bytes::copy_from_slice(s.as_bytes()))
                .collect(),
        ))
    }
}

impl From<Vec<Option<&str>>> for Vector {
    fn from(values: Vec<Option<&str>>) -> Self {
        Vector::String(ScalarVector::from_options(
            values
                .into_iter()
                .map(|v| v.map(|s| Bytes::copy_from_slice(s.as_bytes())))
                .collect(),
        ))
    }
}

impl Vector {
    /// A row batch with no nulls at the top level.
    pub fn batch(children: Vec<Vector>) -> Self {
        let rows = children.first().map(|c| c.rows()).unwrap_or(0);
        Vector::Row(RowVector {
            rows,
            validity: None,
            children,
        })
    }

    pub fn rows(&self) -> usize {
        match self {
            Vector::Int8(v) => v.rows(),
            Vector::Uint8(v) => v.rows(),
            Vector::Int16(v) => v.rows(),
            Vector::Uint16(v) => v.rows(),
            Vector::Int32(v) => v.rows(),
            Vector::Uint32(v) => v.rows(),
            Vector::Int64(v) => v.rows(),
            Vector::Uint64(v) => v.rows(),
            Vector::Float(v) => v.rows(),
            Vector::Double(v) => v.rows(),
            Vector::Bool(v) => v.rows(),
            Vector::String(v) => v.rows(),
            Vector::Row(v) => v.rows,
            Vector::Array(v) => v.rows(),
            Vector::Map(v) => v.rows(),
            Vector::FlatMap(v) => v.rows,
        }
    }

    /// Uncompressed payload estimate; drives the flush policy.
    pub fn raw_byte_size(&self) -> u64 {
        fn scalar_size<T: Primitive>(vector: &ScalarVector<T>) -> u64 {
            (vector.values.len() * T::WIDTH) as u64 + vector.rows().div_ceil(8) as u64
        }
        match self {
            Vector::Int8(v) => scalar_size(v),
            Vector::Uint8(v) => scalar_size(v),
            Vector::Int16(v) => scalar_size(v),
            Vector::Uint16(v) => scalar_size(v),
            Vector::Int32(v) => scalar_size(v),
            Vector::Uint32(v) => scalar_size(v),
            Vector::Int64(v) => scalar_size(v),
            Vector::Uint64(v) => scalar_size(v),
            Vector::Float(v) => scalar_size(v),
            Vector::Double(v) => scalar_size(v),
            Vector::Bool(v) => (v.values.len() + v.rows().div_ceil(8)) as u64,
            Vector::String(v) => {
                v.values.iter().map(|s| s.len() as u64 + 4).sum::<u64>()
                    + v.rows().div_ceil(8) as u64
            }
            Vector::Row(v) => {
                v.rows.div_ceil(8) as u64
                    + v.children.iter().map(|c| c.raw_byte_size()).sum::<u64>()
            }
            Vector::Array(v) => {
                (v.lengths.len() * 4) as u64 + v.elements.raw_byte_size()
            }
            Vector::Map(v) => {
                (v.lengths.len() * 4) as u64
                    + v.keys.raw_byte_size()
                    + v.values.raw_byte_size()
            }
            Vector::FlatMap(v) => {
                v.in_maps.iter().map(|m| m.len().div_ceil(8) as u64).sum::<u64>()
                    + v.children.iter().map(|c| c.raw_byte_size()).sum::<u64>()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_options_round_trip() {
        let vector = ScalarVector::from_options(vec![Some(1i32), None, Some(3), None]);
        assert_eq!(vector.values, vec![1, 3]);
        assert_eq!(vector.rows(), 4);
        assert_eq!(
            vector.to_options(),
            vec![Some(1), None, Some(3), None]
        );
    }

    #[test]
    fn test_all_present_drops_validity() {
        let vector = ScalarVector::from_options(vec![Some(1i64), Some(2)]);
        assert!(vector.validity.is_none());
    }

    #[test]
    fn test_batch_rows() {
        let batch = Vector::batch(vec![
            Vector::from(vec![1i32, 2, 3]),
            Vector::from(vec![1.5f64, 2.5, 3.5]),
        ]);
        assert_eq!(batch.rows(), 3);
        assert!(batch.raw_byte_size() >= 3 * 4 + 3 * 8);
    }
}
