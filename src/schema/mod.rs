// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! Logical-to-physical type mapping. Every node of the nested type
//! tree owns one or more stream descriptors; a descriptor's `offset`
//! is the global stream index within each stripe.

mod builder;

pub use builder::*;

use itertools::Itertools;
use nimble_proto::tablet as proto;

use crate::encodings::DataType;
use crate::{NimbleResult, TracedNimbleError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    Scalar = 0,
    Row = 1,
    Array = 2,
    Map = 3,
    FlatMap = 4,
    ArrayWithOffsets = 5,
    SlidingWindowMap = 6,
}

impl TryFrom<u8> for Kind {
    type Error = TracedNimbleError;

    fn try_from(value: u8) -> NimbleResult<Self> {
        Ok(match value {
            0 => Kind::Scalar,
            1 => Kind::Row,
            2 => Kind::Array,
            3 => Kind::Map,
            4 => Kind::FlatMap,
            5 => Kind::ArrayWithOffsets,
            6 => Kind::SlidingWindowMap,
            other => {
                return Err(TracedNimbleError::corrupt(format!(
                    "unknown schema kind {other}"
                )))
            }
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ScalarKind {
    Int8 = 0,
    Uint8 = 1,
    Int16 = 2,
    Uint16 = 3,
    Int32 = 4,
    Uint32 = 5,
    Int64 = 6,
    Uint64 = 7,
    Float = 8,
    Double = 9,
    Bool = 10,
    String = 11,
    Binary = 12,
}

impl TryFrom<u8> for ScalarKind {
    type Error = TracedNimbleError;

    fn try_from(value: u8) -> NimbleResult<Self> {
        Ok(match value {
            0 => ScalarKind::Int8,
            1 => ScalarKind::Uint8,
            2 => ScalarKind::Int16,
            3 => ScalarKind::Uint16,
            4 => ScalarKind::Int32,
            5 => ScalarKind::Uint32,
            6 => ScalarKind::Int64,
            7 => ScalarKind::Uint64,
            8 => ScalarKind::Float,
            9 => ScalarKind::Double,
            10 => ScalarKind::Bool,
            11 => ScalarKind::String,
            12 => ScalarKind::Binary,
            other => {
                return Err(TracedNimbleError::corrupt(format!(
                    "unknown scalar kind {other}"
                )))
            }
        })
    }
}

impl ScalarKind {
    /// Physical element type of the backing value stream.
    pub fn data_type(self) -> DataType {
        match self {
            ScalarKind::Int8 => DataType::Int8,
            ScalarKind::Uint8 => DataType::Uint8,
            ScalarKind::Int16 => DataType::Int16,
            ScalarKind::Uint16 => DataType::Uint16,
            ScalarKind::Int32 => DataType::Int32,
            ScalarKind::Uint32 => DataType::Uint32,
            ScalarKind::Int64 => DataType::Int64,
            ScalarKind::Uint64 => DataType::Uint64,
            ScalarKind::Float => DataType::Float,
            ScalarKind::Double => DataType::Double,
            ScalarKind::Bool => DataType::Bool,
            ScalarKind::String | ScalarKind::Binary => DataType::String,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamRole {
    Values,
    Nulls,
    Lengths,
    Offsets,
    InMap,
}

/// Schema-side identity of one stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub offset: u32,
    pub role: StreamRole,
    pub scalar_kind: Option<ScalarKind>,
}

/// User-facing description of a column tree, fed to the writer.
#[derive(Clone, Debug, PartialEq)]
pub enum LogicalType {
    Scalar(ScalarKind),
    Row {
        names: Vec<String>,
        children: Vec<LogicalType>,
    },
    Array(Box<LogicalType>),
    Map {
        keys: Box<LogicalType>,
        values: Box<LogicalType>,
    },
    /// Sparse feature map: each observed key becomes its own child
    /// with an in-map bitmap plus a `value` subtree.
    FlatMap { values: Box<LogicalType> },
    ArrayWithOffsets(Box<LogicalType>),
    SlidingWindowMap { values: Box<LogicalType> },
}

impl LogicalType {
    pub fn row(fields: Vec<(&str, LogicalType)>) -> Self {
        let (names, children) = fields
            .into_iter()
            .map(|(name, child)| (name.to_string(), child))
            .unzip();
        LogicalType::Row { names, children }
    }
}

/// Immutable, fully-bound schema tree as read from (or written into)
/// the footer.
#[derive(Clone, Debug, PartialEq)]
pub struct Type {
    pub kind: Kind,
    pub scalar_kind: Option<ScalarKind>,
    pub name: String,
    /// Descriptor offsets in role order; see [`Type::descriptors`].
    pub offsets: Vec<u32>,
    pub children: Vec<Type>,
}

impl Type {
    /// Role layout of `offsets` per kind:
    /// Scalar `[values]`; Row `[nulls]`; Array/Map `[lengths]`;
    /// FlatMap `[nulls, in_map...]` (one per child);
    /// ArrayWithOffsets/SlidingWindowMap `[offsets, lengths]`.
    pub fn descriptors(&self) -> Vec<StreamDescriptor> {
        match self.kind {
            Kind::Scalar => vec![StreamDescriptor {
                offset: self.offsets[0],
                role: StreamRole::Values,
                scalar_kind: self.scalar_kind,
            }],
            Kind::Row => vec![StreamDescriptor {
                offset: self.offsets[0],
                role: StreamRole::Nulls,
                scalar_kind: None,
            }],
            Kind::Array | Kind::Map => vec![StreamDescriptor {
                offset: self.offsets[0],
                role: StreamRole::Lengths,
                scalar_kind: None,
            }],
            Kind::FlatMap => {
                let mut descriptors = vec![StreamDescriptor {
                    offset: self.offsets[0],
                    role: StreamRole::Nulls,
                    scalar_kind: None,
                }];
                for &offset in &self.offsets[1..] {
                    descriptors.push(StreamDescriptor {
                        offset,
                        role: StreamRole::InMap,
                        scalar_kind: None,
                    });
                }
                descriptors
            }
            Kind::ArrayWithOffsets | Kind::SlidingWindowMap => vec![
                StreamDescriptor {
                    offset: self.offsets[0],
                    role: StreamRole::Offsets,
                    scalar_kind: None,
                },
                StreamDescriptor {
                    offset: self.offsets[1],
                    role: StreamRole::Lengths,
                    scalar_kind: None,
                },
            ],
        }
    }

    pub fn nulls_offset(&self) -> u32 {
        self.offsets[0]
    }

    pub fn in_map_offset(&self, child: usize) -> u32 {
        self.offsets[1 + child]
    }

    /// Append this node's stream offsets and all of its descendants'
    /// in pre-order. For flat maps each child's in-map stream comes
    /// right before its value subtree.
    pub fn append_nested_streams(&self, out: &mut Vec<u32>) {
        match self.kind {
            Kind::Scalar | Kind::Row | Kind::Array | Kind::Map => {
                out.push(self.offsets[0]);
                for child in &self.children {
                    child.append_nested_streams(out);
                }
            }
            Kind::FlatMap => {
                out.push(self.offsets[0]);
                for (i, child) in self.children.iter().enumerate() {
                    out.push(self.in_map_offset(i));
                    child.append_nested_streams(out);
                }
            }
            Kind::ArrayWithOffsets | Kind::SlidingWindowMap => {
                out.push(self.offsets[0]);
                out.push(self.offsets[1]);
                for child in &self.children {
                    child.append_nested_streams(out);
                }
            }
        }
    }

    fn flatten(&self, nodes: &mut Vec<proto::SchemaNode>) {
        nodes.push(proto::SchemaNode {
            kind: self.kind as u32,
            scalar_kind: self.scalar_kind.map(|k| k as u32).unwrap_or_default(),
            name: self.name.clone(),
            children: self.children.len() as u32,
            offsets: self.offsets.clone(),
        });
        for child in &self.children {
            child.flatten(nodes);
        }
    }

    fn unflatten(nodes: &[proto::SchemaNode], position: &mut usize) -> NimbleResult<Type> {
        let node = nodes.get(*position).ok_or_else(|| {
            TracedNimbleError::corrupt("schema node table shorter than children counts demand")
        })?;
        *position += 1;
        let kind = Kind::try_from(node.kind as u8)?;
        let scalar_kind = match kind {
            Kind::Scalar => Some(ScalarKind::try_from(node.scalar_kind as u8)?),
            _ => None,
        };
        let expected_offsets = match kind {
            Kind::Scalar | Kind::Row | Kind::Array | Kind::Map => 1,
            Kind::FlatMap => 1 + node.children as usize,
            Kind::ArrayWithOffsets | Kind::SlidingWindowMap => 2,
        };
        if node.offsets.len() != expected_offsets {
            return Err(TracedNimbleError::corrupt(format!(
                "schema node {:?} carries {} descriptor offsets, expected {expected_offsets}",
                kind,
                node.offsets.len()
            )));
        }
        let mut children = Vec::with_capacity(node.children as usize);
        for _ in 0..node.children {
            children.push(Type::unflatten(nodes, position)?);
        }
        Ok(Type {
            kind,
            scalar_kind,
            name: node.name.clone(),
            offsets: node.offsets.clone(),
            children,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    pub root: Type,
    pub stream_count: u32,
}

impl Schema {
    pub fn to_proto(&self) -> proto::Schema {
        let mut nodes = vec![];
        self.root.flatten(&mut nodes);
        proto::Schema {
            nodes,
            stream_count: self.stream_count,
        }
    }

    pub fn from_proto(schema: &proto::Schema) -> NimbleResult<Self> {
        let mut position = 0;
        let root = Type::unflatten(&schema.nodes, &mut position)?;
        if position != schema.nodes.len() {
            return Err(TracedNimbleError::corrupt(format!(
                "schema node table has {} trailing nodes",
                schema.nodes.len() - position
            )));
        }
        let max_offset = {
            let mut streams = vec![];
            root.append_nested_streams(&mut streams);
            streams.iter().copied().max()
        };
        if let Some(max) = max_offset {
            if max >= schema.stream_count {
                return Err(TracedNimbleError::corrupt(format!(
                    "descriptor offset {max} exceeds stream count {}",
                    schema.stream_count
                )));
            }
        }
        Ok(Self {
            root,
            stream_count: schema.stream_count,
        })
    }

    /// All stream offsets in schema pre-order.
    pub fn pre_order_streams(&self) -> Vec<u32> {
        let mut streams = vec![];
        self.root.append_nested_streams(&mut streams);
        streams
    }

    /// Top-level column lookup by name.
    pub fn column(&self, name: &str) -> Option<(usize, &Type)> {
        self.root
            .children
            .iter()
            .find_position(|child| child.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        let logical = LogicalType::row(vec![
            ("id", LogicalType::Scalar(ScalarKind::Int64)),
            (
                "tags",
                LogicalType::Array(Box::new(LogicalType::Scalar(ScalarKind::String))),
            ),
            (
                "features",
                LogicalType::FlatMap {
                    values: Box::new(LogicalType::Scalar(ScalarKind::Float)),
                },
            ),
        ]);
        let mut builder = SchemaBuilder::new(&logical);
        builder.add_flat_map_child(&[2], "101").unwrap();
        builder.add_flat_map_child(&[2], "7").unwrap();
        builder.schema()
    }

    #[test]
    fn test_proto_round_trip() {
        let schema = sample_schema();
        let proto = schema.to_proto();
        let parsed = Schema::from_proto(&proto).unwrap();
        assert_eq!(parsed, schema);
    }

    #[test]
    fn test_pre_order_streams_dense() {
        let schema = sample_schema();
        let mut streams = schema.pre_order_streams();
        streams.sort_unstable();
        assert_eq!(streams, (0..schema.stream_count).collect::<Vec<_>>());
    }

    #[test]
    fn test_column_lookup() {
        let schema = sample_schema();
        let (index, column) = schema.column("features").unwrap();
        assert_eq!(index, 2);
        assert_eq!(column.kind, Kind::FlatMap);
        assert_eq!(column.children.len(), 2);
        assert!(schema.column("missing").is_none());

        let descriptors = column.descriptors();
        assert_eq!(descriptors[0].role, StreamRole::Nulls);
        assert_eq!(descriptors[1].role, StreamRole::InMap);
        assert_eq!(descriptors[2].role, StreamRole::InMap);
        let (_, id) = schema.column("id").unwrap();
        assert_eq!(id.descriptors()[0].role, StreamRole::Values);
        assert_eq!(id.descriptors()[0].scalar_kind, Some(ScalarKind::Int64));
    }

    #[test]
    fn test_corrupt_offsets_rejected() {
        let schema = sample_schema();
        let mut proto = schema.to_proto();
        proto.nodes[0].offsets = vec![];
        assert!(Schema::from_proto(&proto).is_err());
    }
}
