// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! Captured encoding choices per schema node, serialized in a compact
//! byte format so an external training pass can persist the choices of
//! one file and bias the writes of future files.

use std::collections::HashMap;

use bytes::BufMut;

use crate::common::{read_bytes, read_u8, read_u16_le, read_u32_le};
use crate::encodings::EncodingLayout;
use crate::schema::Kind;
use crate::{NimbleResult, TracedNimbleError};

/// Stream slots within one tree node.
pub mod stream_identifiers {
    /// The node's primary stream: scalar values, row/flat-map nulls,
    /// array/map lengths, dedup-array offsets.
    pub const MAIN: u8 = 0;
    /// Dedup-array lengths; on flat-map children, the in-map stream.
    pub const SECONDARY: u8 = 1;
}

#[derive(Clone, Debug, PartialEq)]
pub struct EncodingLayoutTree {
    pub schema_kind: Kind,
    pub name: String,
    pub layouts: HashMap<u8, EncodingLayout>,
    pub children: Vec<EncodingLayoutTree>,
}

impl EncodingLayoutTree {
    pub fn new(schema_kind: Kind, name: impl Into<String>) -> Self {
        Self {
            schema_kind,
            name: name.into(),
            layouts: HashMap::new(),
            children: vec![],
        }
    }

    pub fn with_layout(mut self, stream_id: u8, layout: EncodingLayout) -> Self {
        self.layouts.insert(stream_id, layout);
        self
    }

    pub fn with_child(mut self, child: EncodingLayoutTree) -> Self {
        self.children.push(child);
        self
    }

    pub fn layout(&self, stream_id: u8) -> Option<&EncodingLayout> {
        self.layouts.get(&stream_id)
    }

    pub fn child(&self, index: usize) -> Option<&EncodingLayoutTree> {
        self.children.get(index)
    }

    /// Flat-map children are matched by feature name rather than
    /// position, since key order differs between files.
    pub fn child_by_name(&self, name: &str) -> Option<&EncodingLayoutTree> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Serialized layout:
    /// `[schema_kind:u8][name_len:u16][name]`
    /// `[layout_count:u8]([stream_id:u8][layout_len:u16][layout])*`
    /// `[children_count:u32][children...]`
    pub fn serialize(&self, out: &mut Vec<u8>) -> NimbleResult<()> {
        if self.layouts.len() > u8::MAX as usize {
            return Err(TracedNimbleError::invalid_argument(
                "too many encoding layout streams",
            ));
        }
        out.put_u8(self.schema_kind as u8);
        out.put_u16_le(self.name.len() as u16);
        out.extend_from_slice(self.name.as_bytes());

        out.put_u8(self.layouts.len() as u8);
        // Stable order: serialization must not depend on hash order.
        let mut ids: Vec<u8> = self.layouts.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let mut layout_bytes = vec![];
            self.layouts[&id].serialize(&mut layout_bytes);
            out.put_u8(id);
            out.put_u16_le(layout_bytes.len() as u16);
            out.extend_from_slice(&layout_bytes);
        }

        out.put_u32_le(self.children.len() as u32);
        for child in &self.children {
            child.serialize(out)?;
        }
        Ok(())
    }

    pub fn deserialize(buf: &mut &[u8]) -> NimbleResult<Self> {
        let schema_kind = Kind::try_from(read_u8(buf)?)?;
        let name_len = read_u16_le(buf)? as usize;
        let name = String::from_utf8(read_bytes(buf, name_len)?.to_vec())
            .map_err(|_| TracedNimbleError::corrupt("encoding layout tree name is not UTF-8"))?;

        let layout_count = read_u8(buf)?;
        let mut layouts = HashMap::with_capacity(layout_count as usize);
        for _ in 0..layout_count {
            let stream_id = read_u8(buf)?;
            let layout_len = read_u16_le(buf)? as usize;
            let mut layout_bytes = read_bytes(buf, layout_len)?;
            let layout = EncodingLayout::deserialize(&mut layout_bytes)?;
            if !layout_bytes.is_empty() {
                return Err(TracedNimbleError::corrupt(
                    "encoding layout length mismatch",
                ));
            }
            layouts.insert(stream_id, layout);
        }

        let children_count = read_u32_le(buf)?;
        let mut children = Vec::with_capacity(children_count.min(1024) as usize);
        for _ in 0..children_count {
            children.push(EncodingLayoutTree::deserialize(buf)?);
        }
        Ok(Self {
            schema_kind,
            name,
            layouts,
            children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encodings::EncodingKind;

    fn sample_tree() -> EncodingLayoutTree {
        EncodingLayoutTree::new(Kind::Row, "")
            .with_layout(
                stream_identifiers::MAIN,
                EncodingLayout::new(EncodingKind::Trivial, vec![]),
            )
            .with_child(
                EncodingLayoutTree::new(Kind::Scalar, "id").with_layout(
                    stream_identifiers::MAIN,
                    EncodingLayout::new(
                        EncodingKind::Rle,
                        vec![
                            Some(EncodingLayout::new(EncodingKind::FixedBitWidth, vec![])),
                            Some(EncodingLayout::new(EncodingKind::Trivial, vec![])),
                        ],
                    ),
                ),
            )
            .with_child(EncodingLayoutTree::new(Kind::Scalar, "score"))
    }

    #[test]
    fn test_serialize_round_trip() {
        let tree = sample_tree();
        let mut out = vec![];
        tree.serialize(&mut out).unwrap();
        let mut buf = &out[..];
        let parsed = EncodingLayoutTree::deserialize(&mut buf).unwrap();
        assert!(buf.is_empty());
        assert_eq!(parsed, tree);
    }

    #[test]
    fn test_child_by_name() {
        let tree = sample_tree();
        assert!(tree.child_by_name("score").is_some());
        assert!(tree.child_by_name("missing").is_none());
    }

    #[test]
    fn test_truncated_rejected() {
        let tree = sample_tree();
        let mut out = vec![];
        tree.serialize(&mut out).unwrap();
        let mut buf = &out[..out.len() - 3];
        assert!(EncodingLayoutTree::deserialize(&mut buf).is_err());
    }
}
