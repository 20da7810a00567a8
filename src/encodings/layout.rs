// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! Captured shape of an encoding tree: the kinds chosen at every node,
//! without the data. Layouts parse back out of any encoded chunk and
//! can be replayed into selection to bias future writes.
//!
//! Child slot order per kind:
//! - `Rle`: `[runs, values]` (`[runs]` for bool)
//! - `Dictionary`: `[alphabet, indices]`
//! - `MainlyConstant`: `[is_common, other_values]`
//! - `SparseBool`: `[indices]`
//! - `Nullable`: `[data, nulls]`
//! - `Trivial` over strings: `[lengths]`; all other kinds: none.

use bytes::BufMut;

use crate::common::{read_bytes, read_u8, read_u32_le};
use crate::encodings::{read_prefix, CompressionType, DataType, EncodingKind};
use crate::{NimbleResult, TracedNimbleError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodingLayout {
    pub kind: EncodingKind,
    pub compression: CompressionType,
    pub children: Vec<Option<EncodingLayout>>,
}

impl EncodingLayout {
    pub fn new(kind: EncodingKind, children: Vec<Option<EncodingLayout>>) -> Self {
        Self {
            kind,
            compression: CompressionType::Uncompressed,
            children,
        }
    }

    pub fn child(&self, index: usize) -> Option<&EncodingLayout> {
        self.children.get(index).and_then(|c| c.as_ref())
    }

    /// Serialized form: `[kind:u8][compression:u8][children:u8]` then,
    /// per child, `[present:u8][child bytes if present]`.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.put_u8(self.kind as u8);
        out.put_u8(self.compression as u8);
        out.put_u8(self.children.len() as u8);
        for child in &self.children {
            match child {
                Some(child) => {
                    out.put_u8(1);
                    child.serialize(out);
                }
                None => out.put_u8(0),
            }
        }
    }

    pub fn deserialize(buf: &mut &[u8]) -> NimbleResult<Self> {
        let kind = EncodingKind::try_from(read_u8(buf)?)?;
        let compression = CompressionType::try_from(read_u8(buf)?)?;
        let child_count = read_u8(buf)?;
        let mut children = Vec::with_capacity(child_count as usize);
        for _ in 0..child_count {
            if read_u8(buf)? != 0 {
                children.push(Some(EncodingLayout::deserialize(buf)?));
            } else {
                children.push(None);
            }
        }
        Ok(Self {
            kind,
            compression,
            children,
        })
    }

    /// Reconstruct the layout tree of an (uncompressed) encoded
    /// payload by walking its structure.
    pub fn from_payload(payload: &[u8]) -> NimbleResult<Self> {
        let mut buf = payload;
        let prefix = read_prefix(&mut buf)?;
        let children = match prefix.kind {
            EncodingKind::Trivial => {
                if prefix.data_type == DataType::String {
                    let lengths = {
                        let mut peek = buf;
                        let len = read_u32_le(&mut peek)? as usize;
                        read_bytes(&mut peek, len)?
                    };
                    vec![Some(EncodingLayout::from_payload(lengths)?)]
                } else {
                    vec![]
                }
            }
            EncodingKind::FixedBitWidth
            | EncodingKind::Varint
            | EncodingKind::Constant => vec![],
            EncodingKind::Rle => {
                let runs_len = read_u32_le(&mut buf)? as usize;
                let runs = read_bytes(&mut buf, runs_len)?;
                let runs_layout = EncodingLayout::from_payload(runs)?;
                if prefix.data_type == DataType::Bool {
                    vec![Some(runs_layout)]
                } else {
                    vec![Some(runs_layout), Some(EncodingLayout::from_payload(buf)?)]
                }
            }
            EncodingKind::Dictionary => {
                let alphabet_len = read_u32_le(&mut buf)? as usize;
                let alphabet = read_bytes(&mut buf, alphabet_len)?;
                vec![
                    Some(EncodingLayout::from_payload(alphabet)?),
                    Some(EncodingLayout::from_payload(buf)?),
                ]
            }
            EncodingKind::MainlyConstant => {
                // Skip the common value: its width is the payload type's.
                let width = data_type_width(prefix.data_type)?;
                read_bytes(&mut buf, width)?;
                let is_common_len = read_u32_le(&mut buf)? as usize;
                let is_common = read_bytes(&mut buf, is_common_len)?;
                vec![
                    Some(EncodingLayout::from_payload(is_common)?),
                    Some(EncodingLayout::from_payload(buf)?),
                ]
            }
            EncodingKind::SparseBool => {
                read_bytes(&mut buf, 1)?;
                vec![Some(EncodingLayout::from_payload(buf)?)]
            }
            EncodingKind::Nullable => {
                let data_len = read_u32_le(&mut buf)? as usize;
                let data = read_bytes(&mut buf, data_len)?;
                vec![
                    Some(EncodingLayout::from_payload(data)?),
                    Some(EncodingLayout::from_payload(buf)?),
                ]
            }
        };
        Ok(Self {
            kind: prefix.kind,
            compression: CompressionType::Uncompressed,
            children,
        })
    }
}

fn data_type_width(data_type: DataType) -> NimbleResult<usize> {
    Ok(match data_type {
        DataType::Int8 | DataType::Uint8 | DataType::Bool => 1,
        DataType::Int16 | DataType::Uint16 => 2,
        DataType::Int32 | DataType::Uint32 | DataType::Float => 4,
        DataType::Int64 | DataType::Uint64 | DataType::Double => 8,
        DataType::String | DataType::Undefined => {
            return Err(TracedNimbleError::unsupported(format!(
                "no fixed width for {data_type:?}"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_round_trip() {
        let layout = EncodingLayout::new(
            EncodingKind::Rle,
            vec![
                Some(EncodingLayout::new(EncodingKind::FixedBitWidth, vec![])),
                Some(EncodingLayout::new(EncodingKind::Trivial, vec![])),
            ],
        );
        let mut out = vec![];
        layout.serialize(&mut out);
        let mut buf = &out[..];
        assert_eq!(EncodingLayout::deserialize(&mut buf).unwrap(), layout);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_from_payload() {
        use crate::encodings::{select_numeric, SelectionOptions};
        let values: Vec<i32> = std::iter::repeat(7).take(64).chain(0..64).collect();
        let payload = select_numeric(&values, &SelectionOptions::default(), None).unwrap();
        let layout = EncodingLayout::from_payload(&payload).unwrap();
        // Whatever was selected, the parse walks the whole tree.
        assert!(!matches!(layout.kind, EncodingKind::Nullable));
    }
}
