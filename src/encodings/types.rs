// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! Wire-level identifiers shared by every encoded payload: the encoding
//! kind, the physical element type, and the 6-byte prefix
//! `[kind:u8][data_type:u8][row_count:u32]` that opens every encoding.

use bytes::BufMut;

use crate::common::{read_u8, read_u32_le, zigzag_decode, zigzag_encode};
use crate::{NimbleResult, TracedNimbleError};

pub const PREFIX_SIZE: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EncodingKind {
    Trivial = 0,
    Rle = 1,
    Dictionary = 2,
    FixedBitWidth = 3,
    SparseBool = 4,
    Nullable = 5,
    Constant = 6,
    MainlyConstant = 7,
    Varint = 8,
}

impl TryFrom<u8> for EncodingKind {
    type Error = TracedNimbleError;

    fn try_from(value: u8) -> NimbleResult<Self> {
        Ok(match value {
            0 => EncodingKind::Trivial,
            1 => EncodingKind::Rle,
            2 => EncodingKind::Dictionary,
            3 => EncodingKind::FixedBitWidth,
            4 => EncodingKind::SparseBool,
            5 => EncodingKind::Nullable,
            6 => EncodingKind::Constant,
            7 => EncodingKind::MainlyConstant,
            8 => EncodingKind::Varint,
            other => {
                return Err(TracedNimbleError::unsupported(format!(
                    "unknown encoding kind {other}"
                )))
            }
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    Undefined = 0,
    Int8 = 1,
    Uint8 = 2,
    Int16 = 3,
    Uint16 = 4,
    Int32 = 5,
    Uint32 = 6,
    Int64 = 7,
    Uint64 = 8,
    Float = 9,
    Double = 10,
    Bool = 11,
    String = 12,
}

impl TryFrom<u8> for DataType {
    type Error = TracedNimbleError;

    fn try_from(value: u8) -> NimbleResult<Self> {
        Ok(match value {
            0 => DataType::Undefined,
            1 => DataType::Int8,
            2 => DataType::Uint8,
            3 => DataType::Int16,
            4 => DataType::Uint16,
            5 => DataType::Int32,
            6 => DataType::Uint32,
            7 => DataType::Int64,
            8 => DataType::Uint64,
            9 => DataType::Float,
            10 => DataType::Double,
            11 => DataType::Bool,
            12 => DataType::String,
            other => {
                return Err(TracedNimbleError::unsupported(format!(
                    "unknown data type {other}"
                )))
            }
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CompressionType {
    #[default]
    Uncompressed = 0,
    Zstd = 1,
    MetaInternal = 2,
}

impl TryFrom<u8> for CompressionType {
    type Error = TracedNimbleError;

    fn try_from(value: u8) -> NimbleResult<Self> {
        Ok(match value {
            0 => CompressionType::Uncompressed,
            1 => CompressionType::Zstd,
            2 => CompressionType::MetaInternal,
            other => {
                return Err(TracedNimbleError::unsupported(format!(
                    "unknown compression type {other}"
                )))
            }
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncodingPrefix {
    pub kind: EncodingKind,
    pub data_type: DataType,
    pub row_count: u32,
}

pub fn write_prefix(
    kind: EncodingKind,
    data_type: DataType,
    row_count: u32,
    out: &mut impl BufMut,
) {
    out.put_u8(kind as u8);
    out.put_u8(data_type as u8);
    out.put_u32_le(row_count);
}

pub fn read_prefix(buf: &mut &[u8]) -> NimbleResult<EncodingPrefix> {
    let kind = EncodingKind::try_from(read_u8(buf)?)?;
    let data_type = DataType::try_from(read_u8(buf)?)?;
    let row_count = read_u32_le(buf)?;
    Ok(EncodingPrefix {
        kind,
        data_type,
        row_count,
    })
}

/// Fixed-width physical element of a value stream. The integer-only
/// operations (`delta_from`, `add_delta`, varint mapping) are total for
/// float impls via the bit pattern, but selection and decoding gate
/// those kernels on `IS_INTEGER` so they are never reached.
pub trait Primitive:
    Copy + PartialEq + PartialOrd + Send + Sync + std::fmt::Debug + Default + 'static
{
    const DATA_TYPE: DataType;
    const WIDTH: usize;
    const IS_INTEGER: bool;

    fn encode(&self, buf: &mut impl BufMut);
    fn decode(buf: &mut &[u8]) -> NimbleResult<Self>;

    /// Bit pattern widened to u64; hashing/equality key for distinct
    /// and mode statistics (works for floats where `Hash` does not).
    fn bits_key(self) -> u64;

    /// `self - baseline` as an unsigned delta. Requires
    /// `baseline <= self` in the type's own order.
    fn delta_from(self, baseline: Self) -> u64;
    fn add_delta(baseline: Self, delta: u64) -> Self;

    /// Mapping into varint space: zig-zag for signed types, identity
    /// for unsigned.
    fn varint_value(self) -> u64;
    fn from_varint(value: u64) -> Self;

    fn is_nan(self) -> bool {
        false
    }
}

macro_rules! impl_int_primitive {
    ($ty:ty, $data_type:ident, $put:ident, $get:ident, $signed:expr) => {
        impl Primitive for $ty {
            const DATA_TYPE: DataType = DataType::$data_type;
            const WIDTH: usize = std::mem::size_of::<$ty>();
            const IS_INTEGER: bool = true;

            fn encode(&self, buf: &mut impl BufMut) {
                buf.$put(*self);
            }

            fn decode(buf: &mut &[u8]) -> NimbleResult<Self> {
                if buf.len() < Self::WIDTH {
                    return Err(TracedNimbleError::corrupt(concat!(
                        "expected ",
                        stringify!($ty)
                    )));
                }
                Ok(bytes::Buf::$get(buf))
            }

            fn bits_key(self) -> u64 {
                self as u64
            }

            fn delta_from(self, baseline: Self) -> u64 {
                (self as i128 - baseline as i128) as u64
            }

            fn add_delta(baseline: Self, delta: u64) -> Self {
                (baseline as i128 + delta as i128) as $ty
            }

            fn varint_value(self) -> u64 {
                if $signed {
                    zigzag_encode(self as i64)
                } else {
                    self as u64
                }
            }

            fn from_varint(value: u64) -> Self {
                if $signed {
                    zigzag_decode(value) as $ty
                } else {
                    value as $ty
                }
            }
        }
    };
}

impl_int_primitive!(i8, Int8, put_i8, get_i8, true);
impl_int_primitive!(u8, Uint8, put_u8, get_u8, false);
impl_int_primitive!(i16, Int16, put_i16_le, get_i16_le, true);
impl_int_primitive!(u16, Uint16, put_u16_le, get_u16_le, false);
impl_int_primitive!(i32, Int32, put_i32_le, get_i32_le, true);
impl_int_primitive!(u32, Uint32, put_u32_le, get_u32_le, false);
impl_int_primitive!(i64, Int64, put_i64_le, get_i64_le, true);
impl_int_primitive!(u64, Uint64, put_u64_le, get_u64_le, false);

macro_rules! impl_float_primitive {
    ($ty:ty, $bits:ty, $data_type:ident, $put:ident, $get:ident) => {
        impl Primitive for $ty {
            const DATA_TYPE: DataType = DataType::$data_type;
            const WIDTH: usize = std::mem::size_of::<$ty>();
            const IS_INTEGER: bool = false;

            fn encode(&self, buf: &mut impl BufMut) {
                buf.$put(*self);
            }

            fn decode(buf: &mut &[u8]) -> NimbleResult<Self> {
                if buf.len() < Self::WIDTH {
                    return Err(TracedNimbleError::corrupt(concat!(
                        "expected ",
                        stringify!($ty)
                    )));
                }
                Ok(bytes::Buf::$get(buf))
            }

            fn bits_key(self) -> u64 {
                self.to_bits() as u64
            }

            fn delta_from(self, _baseline: Self) -> u64 {
                self.to_bits() as u64
            }

            fn add_delta(_baseline: Self, delta: u64) -> Self {
                <$ty>::from_bits(delta as $bits)
            }

            fn varint_value(self) -> u64 {
                self.to_bits() as u64
            }

            fn from_varint(value: u64) -> Self {
                <$ty>::from_bits(value as $bits)
            }

            fn is_nan(self) -> bool {
                <$ty>::is_nan(self)
            }
        }
    };
}

impl_float_primitive!(f32, u32, Float, put_f32_le, get_f32_le);
impl_float_primitive!(f64, u64, Double, put_f64_le, get_f64_le);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_round_trip() {
        let mut out = vec![];
        write_prefix(EncodingKind::Rle, DataType::Int32, 2333, &mut out);
        assert_eq!(out.len(), PREFIX_SIZE);
        let mut buf = &out[..];
        let prefix = read_prefix(&mut buf).unwrap();
        assert_eq!(prefix.kind, EncodingKind::Rle);
        assert_eq!(prefix.data_type, DataType::Int32);
        assert_eq!(prefix.row_count, 2333);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let data = [99u8, 1, 0, 0, 0, 0];
        let mut buf = &data[..];
        assert!(read_prefix(&mut buf).is_err());
    }

    #[test]
    fn test_signed_delta() {
        assert_eq!((-5i32).delta_from(-10), 5);
        assert_eq!(i32::add_delta(-10, 5), -5);
        assert_eq!(i64::MAX.delta_from(i64::MIN), u64::MAX);
        assert_eq!(i64::add_delta(i64::MIN, u64::MAX), i64::MAX);
        assert_eq!(u64::MAX.delta_from(0), u64::MAX);
        assert_eq!(u64::add_delta(0, u64::MAX), u64::MAX);
    }

    #[test]
    fn test_varint_mapping() {
        assert_eq!((-1i32).varint_value(), 1);
        assert_eq!(i32::from_varint(1), -1);
        assert_eq!(200u8.varint_value(), 200);
        assert_eq!(u8::from_varint(200), 200);
    }
}
