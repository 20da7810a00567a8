// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! Encoding kernels and the selection policy that composes them.
//!
//! Every chunk payload opens with the 6-byte prefix
//! `[kind:u8][data_type:u8][row_count:u32]` and decodes into a tree of
//! encodings. Kernels are grouped by physical value category: numeric
//! ([`NumericEncoding`]), boolean ([`BoolEncoding`]) and string
//! ([`StringEncoding`]). Numeric child slots (run lengths, dictionary
//! indices, sparse indexes) nest recursively.

mod boolean;
mod compression;
mod constant;
mod dictionary;
mod fixed_bit_width;
mod layout;
mod mainly_constant;
mod nullable;
mod rle;
mod selection;
mod statistics;
mod string;
mod trivial;
mod types;
mod varint;

pub use boolean::*;
pub use compression::*;
pub use constant::*;
pub use dictionary::*;
pub use fixed_bit_width::*;
pub use layout::*;
pub use mainly_constant::*;
pub use nullable::*;
pub use rle::*;
pub use selection::*;
pub use statistics::*;
pub use string::*;
pub use trivial::*;
pub use types::*;
pub use varint::*;

use bitvec::prelude::{BitVec, Lsb0};
use bytes::Bytes;

use crate::{NimbleResult, TracedNimbleError};

/// Decoded encoding tree over a numeric stream. Zero-copy: every
/// variant references the chunk payload it was decoded from.
pub enum NumericEncoding<T: Primitive> {
    Trivial(TrivialEncoding<T>),
    FixedBitWidth(FixedBitWidthEncoding<T>),
    Varint(VarintEncoding<T>),
    Rle(RleEncoding<T>),
    Dictionary(DictionaryEncoding<T>),
    MainlyConstant(MainlyConstantEncoding<T>),
    Constant(ConstantEncoding<T>),
    Nullable(Box<NullableEncoding<T>>),
}

impl<T: Primitive> NumericEncoding<T> {
    pub fn decode(data: Bytes) -> NimbleResult<Self> {
        let mut buf = &data[..];
        let prefix = read_prefix(&mut buf)?;
        if prefix.data_type != T::DATA_TYPE {
            return Err(TracedNimbleError::corrupt(format!(
                "expected {:?} payload, found {:?}",
                T::DATA_TYPE,
                prefix.data_type
            )));
        }
        let body = data.slice(PREFIX_SIZE..);
        Ok(match prefix.kind {
            EncodingKind::Trivial => {
                NumericEncoding::Trivial(TrivialEncoding::decode(body, prefix.row_count)?)
            }
            EncodingKind::FixedBitWidth => {
                if !T::IS_INTEGER {
                    return Err(TracedNimbleError::unsupported(format!(
                        "FixedBitWidth over {:?}",
                        T::DATA_TYPE
                    )));
                }
                NumericEncoding::FixedBitWidth(FixedBitWidthEncoding::decode(
                    body,
                    prefix.row_count,
                )?)
            }
            EncodingKind::Varint => {
                if !T::IS_INTEGER {
                    return Err(TracedNimbleError::unsupported(format!(
                        "Varint over {:?}",
                        T::DATA_TYPE
                    )));
                }
                NumericEncoding::Varint(VarintEncoding::decode(body, prefix.row_count)?)
            }
            EncodingKind::Rle => NumericEncoding::Rle(RleEncoding::decode(body, prefix.row_count)?),
            EncodingKind::Dictionary => {
                NumericEncoding::Dictionary(DictionaryEncoding::decode(body, prefix.row_count)?)
            }
            EncodingKind::MainlyConstant => NumericEncoding::MainlyConstant(
                MainlyConstantEncoding::decode(body, prefix.row_count)?,
            ),
            EncodingKind::Constant => {
                NumericEncoding::Constant(ConstantEncoding::decode(body, prefix.row_count)?)
            }
            EncodingKind::Nullable => NumericEncoding::Nullable(Box::new(NullableEncoding::decode(
                body,
                prefix.row_count,
            )?)),
            EncodingKind::SparseBool => {
                return Err(TracedNimbleError::unsupported(format!(
                    "SparseBool over {:?}",
                    T::DATA_TYPE
                )))
            }
        })
    }

    pub fn row_count(&self) -> u32 {
        match self {
            NumericEncoding::Trivial(e) => e.row_count(),
            NumericEncoding::FixedBitWidth(e) => e.row_count(),
            NumericEncoding::Varint(e) => e.row_count(),
            NumericEncoding::Rle(e) => e.row_count(),
            NumericEncoding::Dictionary(e) => e.row_count(),
            NumericEncoding::MainlyConstant(e) => e.row_count(),
            NumericEncoding::Constant(e) => e.row_count(),
            NumericEncoding::Nullable(e) => e.row_count(),
        }
    }

    pub fn remaining(&self) -> u32 {
        match self {
            NumericEncoding::Trivial(e) => e.remaining(),
            NumericEncoding::FixedBitWidth(e) => e.remaining(),
            NumericEncoding::Varint(e) => e.remaining(),
            NumericEncoding::Rle(e) => e.remaining(),
            NumericEncoding::Dictionary(e) => e.remaining(),
            NumericEncoding::MainlyConstant(e) => e.remaining(),
            NumericEncoding::Constant(e) => e.remaining(),
            NumericEncoding::Nullable(e) => e.remaining(),
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, NumericEncoding::Nullable(_))
    }

    pub fn data_type(&self) -> DataType {
        T::DATA_TYPE
    }

    /// Advance past `count` logical values.
    pub fn skip(&mut self, count: u32) -> NimbleResult<()> {
        match self {
            NumericEncoding::Trivial(e) => e.skip(count),
            NumericEncoding::FixedBitWidth(e) => e.skip(count),
            NumericEncoding::Varint(e) => e.skip(count),
            NumericEncoding::Rle(e) => e.skip(count),
            NumericEncoding::Dictionary(e) => e.skip(count),
            NumericEncoding::MainlyConstant(e) => e.skip(count),
            NumericEncoding::Constant(e) => e.skip(count),
            NumericEncoding::Nullable(e) => e.skip(count),
        }
    }

    /// Append the next `count` values to `out`. Null slots (only
    /// possible under the Nullable wrapper) materialize as defaults.
    pub fn materialize(&mut self, count: u32, out: &mut Vec<T>) -> NimbleResult<()> {
        match self {
            NumericEncoding::Trivial(e) => e.materialize(count, out),
            NumericEncoding::FixedBitWidth(e) => e.materialize(count, out),
            NumericEncoding::Varint(e) => e.materialize(count, out),
            NumericEncoding::Rle(e) => e.materialize(count, out),
            NumericEncoding::Dictionary(e) => e.materialize(count, out),
            NumericEncoding::MainlyConstant(e) => e.materialize(count, out),
            NumericEncoding::Constant(e) => e.materialize(count, out),
            NumericEncoding::Nullable(e) => e.materialize(count, out),
        }
    }

    /// Like [`materialize`](Self::materialize) but also appends one
    /// validity bit per value (always `true` outside Nullable).
    pub fn materialize_nullable(
        &mut self,
        count: u32,
        out: &mut Vec<T>,
        validity: &mut BitVec<u8, Lsb0>,
    ) -> NimbleResult<()> {
        match self {
            NumericEncoding::Nullable(e) => e.materialize_nullable(count, out, validity),
            other => {
                other.materialize(count, out)?;
                validity.extend(std::iter::repeat(true).take(count as usize));
                Ok(())
            }
        }
    }
}
