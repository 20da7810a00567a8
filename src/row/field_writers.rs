// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! Per-field buffering and encoding for the stripe writer. A
//! [`FieldWriter`] tree mirrors the bound schema; `append` routes a
//! batch's vectors into typed buffers, and flushes drain the buffers
//! into encode tasks that produce framed chunks.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::encodings::{
    select_bool, select_bool_nullable, select_numeric_nullable, select_string_nullable,
    CompressionOptions, DataType, EncodingLayout, Primitive, SelectionOptions,
};
use crate::row::layout_tree::{stream_identifiers, EncodingLayoutTree};
use crate::row::{reserve_with_policy, FlatMapVector, InputBufferGrowthPolicy, ScalarVector, Vector};
use crate::schema::{Kind, ScalarKind, SchemaBuilder, Type};
use crate::tablet::append_chunk;
use crate::{NimbleResult, TracedNimbleError};

/// Shared encode configuration cloned into drain tasks.
pub(crate) struct EncodeConfig {
    pub selection: SelectionOptions,
    pub selection_overrides: HashMap<DataType, SelectionOptions>,
    pub compression: CompressionOptions,
    pub growth: Arc<dyn InputBufferGrowthPolicy>,
}

impl EncodeConfig {
    fn selection_for(&self, data_type: DataType) -> SelectionOptions {
        self.selection_overrides
            .get(&data_type)
            .unwrap_or(&self.selection)
            .clone()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushMode {
    /// Drain only buffers at or above the raw-size threshold; nulls
    /// buffers stay put so their streams keep full stripe coverage.
    Chunk { min_raw: u64 },
    Stripe,
}

/// One deferred encode producing a framed chunk for `offset`.
pub(crate) struct PendingChunk {
    pub offset: u32,
    pub encode: Box<dyn FnOnce() -> NimbleResult<Vec<u8>> + Send>,
}

pub(crate) struct PrimitiveFieldWriter<T: Primitive> {
    offset: u32,
    values: Vec<T>,
    validity: Vec<bool>,
    selection: SelectionOptions,
    compression: CompressionOptions,
    layout: Option<EncodingLayout>,
}

impl<T: Primitive> PrimitiveFieldWriter<T> {
    fn append(
        &mut self,
        vector: &ScalarVector<T>,
        growth: &dyn InputBufferGrowthPolicy,
    ) -> NimbleResult<()> {
        reserve_with_policy(&mut self.values, vector.values.len(), growth);
        self.values.extend_from_slice(&vector.values);
        match &vector.validity {
            Some(validity) => {
                let present = validity.count_ones();
                if present != vector.values.len() {
                    return Err(TracedNimbleError::invalid_argument(format!(
                        "scalar vector holds {} values for {present} present rows",
                        vector.values.len()
                    )));
                }
                self.validity.extend(validity.iter().by_vals());
            }
            None => self
                .validity
                .extend(std::iter::repeat(true).take(vector.values.len())),
        }
        Ok(())
    }

    fn buffered_raw(&self) -> u64 {
        (self.values.len() * T::WIDTH + self.validity.len() / 8) as u64
    }

    fn drain(&mut self, out: &mut Vec<PendingChunk>) {
        if self.validity.is_empty() {
            return;
        }
        let values = std::mem::take(&mut self.values);
        let validity = std::mem::take(&mut self.validity);
        let selection = self.selection.clone();
        let compression = self.compression.clone();
        let layout = self.layout.clone();
        let item_count = validity.len() as u32;
        out.push(PendingChunk {
            offset: self.offset,
            encode: Box::new(move || {
                let payload =
                    select_numeric_nullable(&values, Some(&validity), &selection, layout.as_ref())?;
                let mut framed = vec![];
                append_chunk(payload, item_count, &compression, &mut framed);
                Ok(framed)
            }),
        });
    }
}

pub(crate) struct BoolFieldWriter {
    offset: u32,
    values: Vec<bool>,
    validity: Vec<bool>,
    selection: SelectionOptions,
    compression: CompressionOptions,
    layout: Option<EncodingLayout>,
}

impl BoolFieldWriter {
    fn append(&mut self, vector: &ScalarVector<bool>) -> NimbleResult<()> {
        self.values.extend_from_slice(&vector.values);
        match &vector.validity {
            Some(validity) => {
                if validity.count_ones() != vector.values.len() {
                    return Err(TracedNimbleError::invalid_argument(
                        "bool vector value count does not match present rows",
                    ));
                }
                self.validity.extend(validity.iter().by_vals());
            }
            None => self
                .validity
                .extend(std::iter::repeat(true).take(vector.values.len())),
        }
        Ok(())
    }

    fn drain(&mut self, out: &mut Vec<PendingChunk>) {
        if self.validity.is_empty() {
            return;
        }
        let values = std::mem::take(&mut self.values);
        let validity = std::mem::take(&mut self.validity);
        let selection = self.selection.clone();
        let compression = self.compression.clone();
        let layout = self.layout.clone();
        let item_count = validity.len() as u32;
        out.push(PendingChunk {
            offset: self.offset,
            encode: Box::new(move || {
                let payload =
                    select_bool_nullable(&values, Some(&validity), &selection, layout.as_ref())?;
                let mut framed = vec![];
                append_chunk(payload, item_count, &compression, &mut framed);
                Ok(framed)
            }),
        });
    }
}

pub(crate) struct StringFieldWriter {
    offset: u32,
    values: Vec<Bytes>,
    validity: Vec<bool>,
    raw_bytes: u64,
    selection: SelectionOptions,
    compression: CompressionOptions,
    layout: Option<EncodingLayout>,
}

impl StringFieldWriter {
    fn append(&mut self, vector: &ScalarVector<Bytes>) -> NimbleResult<()> {
        self.raw_bytes += vector.values.iter().map(|v| v.len() as u64).sum::<u64>();
        self.values.extend(vector.values.iter().cloned());
        match &vector.validity {
            Some(validity) => {
                if validity.count_ones() != vector.values.len() {
                    return Err(TracedNimbleError::invalid_argument(
                        "string vector value count does not match present rows",
                    ));
                }
                self.validity.extend(validity.iter().by_vals());
            }
            None => self
                .validity
                .extend(std::iter::repeat(true).take(vector.values.len())),
        }
        Ok(())
    }

    fn drain(&mut self, out: &mut Vec<PendingChunk>) {
        if self.validity.is_empty() {
            return;
        }
        self.raw_bytes = 0;
        let values = std::mem::take(&mut self.values);
        let validity = std::mem::take(&mut self.validity);
        let selection = self.selection.clone();
        let compression = self.compression.clone();
        let layout = self.layout.clone();
        let item_count = validity.len() as u32;
        out.push(PendingChunk {
            offset: self.offset,
            encode: Box::new(move || {
                let payload =
                    select_string_nullable(&values, Some(&validity), &selection, layout.as_ref())?;
                let mut framed = vec![];
                append_chunk(payload, item_count, &compression, &mut framed);
                Ok(framed)
            }),
        });
    }
}

/// Presence bitmap stream (row / flat-map nulls). Only materialized
/// when a null was observed in the stripe; an empty stream reads back
/// as all-present.
struct PresenceWriter {
    offset: u32,
    bits: Vec<bool>,
    any_null: bool,
    selection: SelectionOptions,
    compression: CompressionOptions,
    layout: Option<EncodingLayout>,
}

impl PresenceWriter {
    fn append(&mut self, rows: usize, validity: Option<&crate::row::Validity>) -> usize {
        match validity {
            Some(validity) => {
                let present = validity.count_ones();
                self.any_null |= present != validity.len();
                self.bits.extend(validity.iter().by_vals());
                present
            }
            None => {
                self.bits.extend(std::iter::repeat(true).take(rows));
                rows
            }
        }
    }

    fn drain(&mut self, out: &mut Vec<PendingChunk>) {
        let bits = std::mem::take(&mut self.bits);
        if !self.any_null {
            return;
        }
        self.any_null = false;
        let selection = self.selection.clone();
        let compression = self.compression.clone();
        let layout = self.layout.clone();
        let item_count = bits.len() as u32;
        out.push(PendingChunk {
            offset: self.offset,
            encode: Box::new(move || {
                let payload = select_bool(&bits, &selection, layout.as_ref())?;
                let mut framed = vec![];
                append_chunk(payload, item_count, &compression, &mut framed);
                Ok(framed)
            }),
        });
    }
}

/// Lengths / offsets streams: u32 values with container nullability.
struct U32StreamWriter {
    offset: u32,
    values: Vec<u32>,
    validity: Vec<bool>,
    selection: SelectionOptions,
    compression: CompressionOptions,
    layout: Option<EncodingLayout>,
}

impl U32StreamWriter {
    fn append(&mut self, values: &[u32], rows: usize, validity: Option<&crate::row::Validity>) {
        self.values.extend_from_slice(values);
        match validity {
            Some(validity) => self.validity.extend(validity.iter().by_vals()),
            None => self.validity.extend(std::iter::repeat(true).take(rows)),
        }
    }

    fn drain(&mut self, out: &mut Vec<PendingChunk>) {
        if self.validity.is_empty() {
            return;
        }
        let values = std::mem::take(&mut self.values);
        let validity = std::mem::take(&mut self.validity);
        let selection = self.selection.clone();
        let compression = self.compression.clone();
        let layout = self.layout.clone();
        let item_count = validity.len() as u32;
        out.push(PendingChunk {
            offset: self.offset,
            encode: Box::new(move || {
                let payload =
                    select_numeric_nullable(&values, Some(&validity), &selection, layout.as_ref())?;
                let mut framed = vec![];
                append_chunk(payload, item_count, &compression, &mut framed);
                Ok(framed)
            }),
        });
    }
}

/// In-map bitmap for one flat-map key: one bit per present map row.
struct InMapWriter {
    offset: u32,
    bits: Vec<bool>,
    selection: SelectionOptions,
    compression: CompressionOptions,
    layout: Option<EncodingLayout>,
}

impl InMapWriter {
    fn drain(&mut self, out: &mut Vec<PendingChunk>) {
        if self.bits.is_empty() {
            return;
        }
        let bits = std::mem::take(&mut self.bits);
        let selection = self.selection.clone();
        let compression = self.compression.clone();
        let layout = self.layout.clone();
        let item_count = bits.len() as u32;
        out.push(PendingChunk {
            offset: self.offset,
            encode: Box::new(move || {
                let payload = select_bool(&bits, &selection, layout.as_ref())?;
                let mut framed = vec![];
                append_chunk(payload, item_count, &compression, &mut framed);
                Ok(framed)
            }),
        });
    }
}

struct RowFieldWriter {
    nulls: PresenceWriter,
    children: Vec<FieldWriter>,
}

struct ArrayFieldWriter {
    lengths: U32StreamWriter,
    elements: Box<FieldWriter>,
}

struct MapFieldWriter {
    lengths: U32StreamWriter,
    keys: Box<FieldWriter>,
    values: Box<FieldWriter>,
}

struct FlatMapChild {
    in_map: InMapWriter,
    writer: FieldWriter,
}

struct FlatMapFieldWriter {
    nulls: PresenceWriter,
    path: Vec<usize>,
    children: Vec<FlatMapChild>,
    key_index: HashMap<String, usize>,
    /// Present map rows appended so far in the open stripe; new keys
    /// backfill this many `false` bits.
    stripe_rows: usize,
    layout_tree: Option<EncodingLayoutTree>,
}

struct DedupArrayFieldWriter {
    offsets: U32StreamWriter,
    lengths: U32StreamWriter,
    elements: Box<FieldWriter>,
    next_unique: u32,
    /// `(length, serialized element bytes)` of the last unique array.
    last: Option<(u32, Vec<u8>)>,
}

pub(crate) enum FieldWriter {
    Int8(PrimitiveFieldWriter<i8>),
    Uint8(PrimitiveFieldWriter<u8>),
    Int16(PrimitiveFieldWriter<i16>),
    Uint16(PrimitiveFieldWriter<u16>),
    Int32(PrimitiveFieldWriter<i32>),
    Uint32(PrimitiveFieldWriter<u32>),
    Int64(PrimitiveFieldWriter<i64>),
    Uint64(PrimitiveFieldWriter<u64>),
    Float(PrimitiveFieldWriter<f32>),
    Double(PrimitiveFieldWriter<f64>),
    Bool(BoolFieldWriter),
    String(StringFieldWriter),
    Row(RowFieldWriter),
    Array(ArrayFieldWriter),
    Map(MapFieldWriter),
    FlatMap(FlatMapFieldWriter),
    DedupArray(DedupArrayFieldWriter),
}

macro_rules! dispatch_primitive_append {
    ($self:ident, $vector:ident, $growth:expr, $({ $variant:ident }),*) => {
        match ($self, $vector) {
            $(
                (FieldWriter::$variant(writer), Vector::$variant(vector)) => {
                    return writer.append(vector, $growth)
                }
            )*
            (FieldWriter::Bool(writer), Vector::Bool(vector)) => return writer.append(vector),
            (FieldWriter::String(writer), Vector::String(vector)) => return writer.append(vector),
            (this, vector) => {
                return Err(TracedNimbleError::schema_mismatch(format!(
                    "cannot write {} into {} field",
                    vector.type_name(),
                    this.type_name(),
                )))
            }
        }
    };
}

impl FieldWriter {
    /// Build the writer tree for a bound schema node. `layout_tree`
    /// supplies captured encoding choices to replay, matched by
    /// position (flat-map children by name).
    pub fn build(node: &Type, path: Vec<usize>, tree: Option<&EncodingLayoutTree>, cfg: &EncodeConfig) -> NimbleResult<FieldWriter> {
        let main_layout =
            tree.and_then(|t| t.layout(stream_identifiers::MAIN)).cloned();
        Ok(match node.kind {
            Kind::Scalar => {
                let scalar_kind = node.scalar_kind.ok_or_else(|| {
                    TracedNimbleError::internal("scalar node without scalar kind")
                })?;
                let offset = node.offsets[0];
                Self::build_scalar(scalar_kind, offset, main_layout, cfg)
            }
            Kind::Row => FieldWriter::Row(RowFieldWriter {
                nulls: PresenceWriter {
                    offset: node.offsets[0],
                    bits: vec![],
                    any_null: false,
                    selection: cfg.selection_for(DataType::Bool),
                    compression: cfg.compression.clone(),
                    layout: main_layout,
                },
                children: node
                    .children
                    .iter()
                    .enumerate()
                    .map(|(i, child)| {
                        let mut child_path = path.clone();
                        child_path.push(i);
                        FieldWriter::build(child, child_path, tree.and_then(|t| t.child(i)), cfg)
                    })
                    .collect::<NimbleResult<_>>()?,
            }),
            Kind::Array => FieldWriter::Array(ArrayFieldWriter {
                lengths: U32StreamWriter {
                    offset: node.offsets[0],
                    values: vec![],
                    validity: vec![],
                    selection: cfg.selection_for(DataType::Uint32),
                    compression: cfg.compression.clone(),
                    layout: main_layout,
                },
                elements: Box::new(FieldWriter::build(
                    &node.children[0],
                    push_path(&path, 0),
                    tree.and_then(|t| t.child(0)),
                    cfg,
                )?),
            }),
            Kind::Map => FieldWriter::Map(MapFieldWriter {
                lengths: U32StreamWriter {
                    offset: node.offsets[0],
                    values: vec![],
                    validity: vec![],
                    selection: cfg.selection_for(DataType::Uint32),
                    compression: cfg.compression.clone(),
                    layout: main_layout,
                },
                keys: Box::new(FieldWriter::build(
                    &node.children[0],
                    push_path(&path, 0),
                    tree.and_then(|t| t.child(0)),
                    cfg,
                )?),
                values: Box::new(FieldWriter::build(
                    &node.children[1],
                    push_path(&path, 1),
                    tree.and_then(|t| t.child(1)),
                    cfg,
                )?),
            }),
            Kind::FlatMap => FieldWriter::FlatMap(FlatMapFieldWriter {
                nulls: PresenceWriter {
                    offset: node.offsets[0],
                    bits: vec![],
                    any_null: false,
                    selection: cfg.selection_for(DataType::Bool),
                    compression: cfg.compression.clone(),
                    layout: main_layout,
                },
                path,
                children: vec![],
                key_index: HashMap::new(),
                stripe_rows: 0,
                layout_tree: tree.cloned(),
            }),
            Kind::ArrayWithOffsets | Kind::SlidingWindowMap => {
                FieldWriter::DedupArray(DedupArrayFieldWriter {
                    offsets: U32StreamWriter {
                        offset: node.offsets[0],
                        values: vec![],
                        validity: vec![],
                        selection: cfg.selection_for(DataType::Uint32),
                        compression: cfg.compression.clone(),
                        layout: main_layout,
                    },
                    lengths: U32StreamWriter {
                        offset: node.offsets[1],
                        values: vec![],
                        validity: vec![],
                        selection: cfg.selection_for(DataType::Uint32),
                        compression: cfg.compression.clone(),
                        layout: tree
                            .and_then(|t| t.layout(stream_identifiers::SECONDARY))
                            .cloned(),
                    },
                    elements: Box::new(FieldWriter::build(
                        &node.children[0],
                        push_path(&path, 0),
                        tree.and_then(|t| t.child(0)),
                        cfg,
                    )?),
                    next_unique: 0,
                    last: None,
                })
            }
        })
    }

    fn build_scalar(
        scalar_kind: ScalarKind,
        offset: u32,
        layout: Option<EncodingLayout>,
        cfg: &EncodeConfig,
    ) -> FieldWriter {
        macro_rules! primitive {
            ($variant:ident, $ty:ty) => {
                FieldWriter::$variant(PrimitiveFieldWriter::<$ty> {
                    offset,
                    values: vec![],
                    validity: vec![],
                    selection: cfg.selection_for(<$ty as Primitive>::DATA_TYPE),
                    compression: cfg.compression.clone(),
                    layout,
                })
            };
        }
        match scalar_kind {
            ScalarKind::Int8 => primitive!(Int8, i8),
            ScalarKind::Uint8 => primitive!(Uint8, u8),
            ScalarKind::Int16 => primitive!(Int16, i16),
            ScalarKind::Uint16 => primitive!(Uint16, u16),
            ScalarKind::Int32 => primitive!(Int32, i32),
            ScalarKind::Uint32 => primitive!(Uint32, u32),
            ScalarKind::Int64 => primitive!(Int64, i64),
            ScalarKind::Uint64 => primitive!(Uint64, u64),
            ScalarKind::Float => primitive!(Float, f32),
            ScalarKind::Double => primitive!(Double, f64),
            ScalarKind::Bool => FieldWriter::Bool(BoolFieldWriter {
                offset,
                values: vec![],
                validity: vec![],
                selection: cfg.selection_for(DataType::Bool),
                compression: cfg.compression.clone(),
                layout,
            }),
            ScalarKind::String | ScalarKind::Binary => FieldWriter::String(StringFieldWriter {
                offset,
                values: vec![],
                validity: vec![],
                raw_bytes: 0,
                selection: cfg.selection_for(DataType::String),
                compression: cfg.compression.clone(),
                layout,
            }),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            FieldWriter::Int8(_) => "Int8",
            FieldWriter::Uint8(_) => "Uint8",
            FieldWriter::Int16(_) => "Int16",
            FieldWriter::Uint16(_) => "Uint16",
            FieldWriter::Int32(_) => "Int32",
            FieldWriter::Uint32(_) => "Uint32",
            FieldWriter::Int64(_) => "Int64",
            FieldWriter::Uint64(_) => "Uint64",
            FieldWriter::Float(_) => "Float",
            FieldWriter::Double(_) => "Double",
            FieldWriter::Bool(_) => "Bool",
            FieldWriter::String(_) => "String",
            FieldWriter::Row(_) => "Row",
            FieldWriter::Array(_) => "Array",
            FieldWriter::Map(_) => "Map",
            FieldWriter::FlatMap(_) => "FlatMap",
            FieldWriter::DedupArray(_) => "DedupArray",
        }
    }

    /// Route one batch's values into the buffers. `schema` is needed
    /// so flat maps can bind descriptors for newly observed keys.
    pub fn append(
        &mut self,
        vector: &Vector,
        schema: &mut SchemaBuilder,
        cfg: &EncodeConfig,
    ) -> NimbleResult<()> {
        match (self, vector) {
            (FieldWriter::Row(writer), Vector::Row(batch)) => {
                let present = writer.nulls.append(batch.rows, batch.validity.as_ref());
                if batch.children.len() != writer.children.len() {
                    return Err(TracedNimbleError::schema_mismatch(format!(
                        "batch has {} fields, schema has {}",
                        batch.children.len(),
                        writer.children.len()
                    )));
                }
                for (child_writer, child) in writer.children.iter_mut().zip(&batch.children) {
                    if child.rows() != present {
                        return Err(TracedNimbleError::invalid_argument(format!(
                            "field sized to {} rows, {present} present rows expected",
                            child.rows()
                        )));
                    }
                    child_writer.append(child, schema, cfg)?;
                }
                Ok(())
            }
            (FieldWriter::Array(writer), Vector::Array(list)) => {
                let total: u64 = list.lengths.iter().map(|l| *l as u64).sum();
                if list.elements.rows() as u64 != total {
                    return Err(TracedNimbleError::invalid_argument(format!(
                        "array elements hold {} rows, lengths sum to {total}",
                        list.elements.rows()
                    )));
                }
                writer
                    .lengths
                    .append(&list.lengths, list.rows(), list.validity.as_ref());
                writer.elements.append(&list.elements, schema, cfg)
            }
            (FieldWriter::Map(writer), Vector::Map(map)) => {
                let total: u64 = map.lengths.iter().map(|l| *l as u64).sum();
                if map.keys.rows() as u64 != total || map.values.rows() as u64 != total {
                    return Err(TracedNimbleError::invalid_argument(
                        "map keys/values do not match entry counts",
                    ));
                }
                writer
                    .lengths
                    .append(&map.lengths, map.rows(), map.validity.as_ref());
                writer.keys.append(&map.keys, schema, cfg)?;
                writer.values.append(&map.values, schema, cfg)
            }
            (FieldWriter::FlatMap(writer), Vector::FlatMap(flat)) => {
                writer.append(flat, schema, cfg)
            }
            (FieldWriter::DedupArray(writer), Vector::Array(list)) => {
                writer.append(list, schema, cfg)
            }
            (this, vector) => {
                dispatch_primitive_append!(this, vector, cfg.growth.as_ref(),
                    { Int8 }, { Uint8 }, { Int16 }, { Uint16 }, { Int32 },
                    { Uint32 }, { Int64 }, { Uint64 }, { Float }, { Double })
            }
        }
    }

    /// Drain buffers into encode tasks. Presence (nulls) buffers only
    /// drain on `Stripe` so their streams cover the whole stripe.
    pub fn collect_tasks(&mut self, mode: FlushMode, out: &mut Vec<PendingChunk>) {
        let min_raw = match mode {
            FlushMode::Chunk { min_raw } => min_raw,
            FlushMode::Stripe => 0,
        };
        match self {
            FieldWriter::Int8(w) => {
                if w.buffered_raw() >= min_raw {
                    w.drain(out)
                }
            }
            FieldWriter::Uint8(w) => {
                if w.buffered_raw() >= min_raw {
                    w.drain(out)
                }
            }
            FieldWriter::Int16(w) => {
                if w.buffered_raw() >= min_raw {
                    w.drain(out)
                }
            }
            FieldWriter::Uint16(w) => {
                if w.buffered_raw() >= min_raw {
                    w.drain(out)
                }
            }
            FieldWriter::Int32(w) => {
                if w.buffered_raw() >= min_raw {
                    w.drain(out)
                }
            }
            FieldWriter::Uint32(w) => {
                if w.buffered_raw() >= min_raw {
                    w.drain(out)
                }
            }
            FieldWriter::Int64(w) => {
                if w.buffered_raw() >= min_raw {
                    w.drain(out)
                }
            }
            FieldWriter::Uint64(w) => {
                if w.buffered_raw() >= min_raw {
                    w.drain(out)
                }
            }
            FieldWriter::Float(w) => {
                if w.buffered_raw() >= min_raw {
                    w.drain(out)
                }
            }
            FieldWriter::Double(w) => {
                if w.buffered_raw() >= min_raw {
                    w.drain(out)
                }
            }
            FieldWriter::Bool(w) => {
                if w.validity.len() as u64 >= min_raw * 8 || mode == FlushMode::Stripe {
                    w.drain(out)
                }
            }
            FieldWriter::String(w) => {
                if w.raw_bytes >= min_raw || mode == FlushMode::Stripe {
                    w.drain(out)
                }
            }
            FieldWriter::Row(w) => {
                if mode == FlushMode::Stripe {
                    w.nulls.drain(out);
                }
                for child in &mut w.children {
                    child.collect_tasks(mode, out);
                }
            }
            FieldWriter::Array(w) => {
                if mode == FlushMode::Stripe {
                    w.lengths.drain(out);
                }
                w.elements.collect_tasks(mode, out);
            }
            FieldWriter::Map(w) => {
                if mode == FlushMode::Stripe {
                    w.lengths.drain(out);
                }
                w.keys.collect_tasks(mode, out);
                w.values.collect_tasks(mode, out);
            }
            FieldWriter::FlatMap(w) => {
                if mode == FlushMode::Stripe {
                    w.nulls.drain(out);
                    for child in &mut w.children {
                        child.in_map.drain(out);
                    }
                }
                for child in &mut w.children {
                    child.writer.collect_tasks(mode, out);
                }
            }
            FieldWriter::DedupArray(w) => {
                if mode == FlushMode::Stripe {
                    w.offsets.drain(out);
                    w.lengths.drain(out);
                }
                w.elements.collect_tasks(mode, out);
            }
        }
    }

    /// Reset per-stripe state after the stripe was emitted.
    pub fn on_stripe_complete(&mut self) {
        match self {
            FieldWriter::Row(w) => {
                for child in &mut w.children {
                    child.on_stripe_complete();
                }
            }
            FieldWriter::Array(w) => w.elements.on_stripe_complete(),
            FieldWriter::Map(w) => {
                w.keys.on_stripe_complete();
                w.values.on_stripe_complete();
            }
            FieldWriter::FlatMap(w) => {
                w.stripe_rows = 0;
                for child in &mut w.children {
                    child.writer.on_stripe_complete();
                }
            }
            FieldWriter::DedupArray(w) => {
                w.next_unique = 0;
                w.last = None;
                w.elements.on_stripe_complete();
            }
            _ => {}
        }
    }
}

fn push_path(path: &[usize], index: usize) -> Vec<usize> {
    let mut path = path.to_vec();
    path.push(index);
    path
}

impl FlatMapFieldWriter {
    fn ensure_child(
        &mut self,
        key: &str,
        schema: &mut SchemaBuilder,
        cfg: &EncodeConfig,
    ) -> NimbleResult<usize> {
        if let Some(&index) = self.key_index.get(key) {
            return Ok(index);
        }
        let child_index = schema.add_flat_map_child(&self.path, key)?;
        let node = schema.node(&self.path)?;
        let in_map_offset = node.in_map_offset(child_index);
        let child_node = node.children[child_index].clone();
        let child_tree = self
            .layout_tree
            .as_ref()
            .and_then(|t| t.child_by_name(key));
        let writer = FieldWriter::build(
            &child_node,
            push_path(&self.path, child_index),
            child_tree,
            cfg,
        )?;
        let in_map_layout = child_tree
            .and_then(|t| t.layout(stream_identifiers::SECONDARY))
            .cloned();
        self.children.push(FlatMapChild {
            in_map: InMapWriter {
                offset: in_map_offset,
                // Rows already written in this stripe never saw the key.
                bits: vec![false; self.stripe_rows],
                selection: cfg.selection_for(DataType::Bool),
                compression: cfg.compression.clone(),
                layout: in_map_layout,
            },
            writer,
        });
        self.key_index.insert(key.to_string(), child_index);
        Ok(child_index)
    }

    fn append(
        &mut self,
        flat: &FlatMapVector,
        schema: &mut SchemaBuilder,
        cfg: &EncodeConfig,
    ) -> NimbleResult<()> {
        if flat.keys.len() != flat.in_maps.len() || flat.keys.len() != flat.children.len() {
            return Err(TracedNimbleError::invalid_argument(
                "flat map keys, in-maps and children must align",
            ));
        }
        let present = self.nulls.append(flat.rows, flat.validity.as_ref());

        let mut batch_children: HashMap<usize, usize> = HashMap::new();
        for (batch_index, key) in flat.keys.iter().enumerate() {
            let child_index = self.ensure_child(key, schema, cfg)?;
            batch_children.insert(child_index, batch_index);
        }
        for (child_index, child) in self.children.iter_mut().enumerate() {
            match batch_children.get(&child_index) {
                Some(&batch_index) => {
                    let in_map = &flat.in_maps[batch_index];
                    if in_map.len() != present {
                        return Err(TracedNimbleError::invalid_argument(format!(
                            "in-map bitmap for '{}' covers {} rows, expected {present}",
                            flat.keys[batch_index],
                            in_map.len()
                        )));
                    }
                    let set = in_map.count_ones();
                    if flat.children[batch_index].rows() != set {
                        return Err(TracedNimbleError::invalid_argument(format!(
                            "flat map child '{}' holds {} rows for {set} in-map bits",
                            flat.keys[batch_index],
                            flat.children[batch_index].rows()
                        )));
                    }
                    child.in_map.bits.extend(in_map.iter().by_vals());
                    child
                        .writer
                        .append(&flat.children[batch_index], schema, cfg)?;
                }
                None => {
                    // Key absent from this batch.
                    child
                        .in_map
                        .bits
                        .extend(std::iter::repeat(false).take(present));
                }
            }
        }
        self.stripe_rows += present;
        Ok(())
    }
}

impl DedupArrayFieldWriter {
    fn append(
        &mut self,
        list: &crate::row::ListVector,
        schema: &mut SchemaBuilder,
        cfg: &EncodeConfig,
    ) -> NimbleResult<()> {
        let total: u64 = list.lengths.iter().map(|l| *l as u64).sum();
        if list.elements.rows() as u64 != total {
            return Err(TracedNimbleError::invalid_argument(format!(
                "array elements hold {} rows, lengths sum to {total}",
                list.elements.rows()
            )));
        }

        let mut offsets = Vec::with_capacity(list.lengths.len());
        let mut element_start = 0usize;
        for &length in &list.lengths {
            let key = scalar_row_bytes(&list.elements, element_start, length as usize)?;
            match &self.last {
                Some((last_length, last_key)) if *last_length == length && *last_key == key => {
                    offsets.push(self.next_unique - 1);
                }
                _ => {
                    offsets.push(self.next_unique);
                    self.next_unique += 1;
                    self.lengths.append(&[length], 1, None);
                    let slice = slice_scalar(&list.elements, element_start, length as usize)?;
                    self.elements.append(&slice, schema, cfg)?;
                    self.last = Some((length, key));
                }
            }
            element_start += length as usize;
        }
        self.offsets
            .append(&offsets, list.rows(), list.validity.as_ref());
        Ok(())
    }
}

macro_rules! impl_scalar_slice_helpers {
    ($({ $variant:ident, $ty:ty }),*) => {
        /// Byte key of one array's elements, for consecutive dedup.
        fn scalar_row_bytes(vector: &Vector, start: usize, len: usize) -> NimbleResult<Vec<u8>> {
            let mut out = vec![];
            match vector {
                $(
                    Vector::$variant(v) => {
                        if v.validity.is_some() {
                            return Err(TracedNimbleError::invalid_argument(
                                "dictionary arrays require non-nullable elements",
                            ));
                        }
                        for value in &v.values[start..start + len] {
                            Primitive::encode(value, &mut out);
                        }
                    }
                )*
                Vector::Bool(v) => {
                    if v.validity.is_some() {
                        return Err(TracedNimbleError::invalid_argument(
                            "dictionary arrays require non-nullable elements",
                        ));
                    }
                    for &value in &v.values[start..start + len] {
                        out.push(value as u8);
                    }
                }
                Vector::String(v) => {
                    if v.validity.is_some() {
                        return Err(TracedNimbleError::invalid_argument(
                            "dictionary arrays require non-nullable elements",
                        ));
                    }
                    for value in &v.values[start..start + len] {
                        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
                        out.extend_from_slice(value);
                    }
                }
                _ => {
                    return Err(TracedNimbleError::invalid_argument(
                        "dictionary arrays require scalar elements",
                    ))
                }
            }
            Ok(out)
        }

        /// Copy out `len` element rows starting at `start`.
        fn slice_scalar(vector: &Vector, start: usize, len: usize) -> NimbleResult<Vector> {
            Ok(match vector {
                $(
                    Vector::$variant(v) => Vector::$variant(ScalarVector::new(
                        v.values[start..start + len].to_vec(),
                    )),
                )*
                Vector::Bool(v) => Vector::Bool(ScalarVector::new(
                    v.values[start..start + len].to_vec(),
                )),
                Vector::String(v) => Vector::String(ScalarVector::new(
                    v.values[start..start + len].to_vec(),
                )),
                _ => {
                    return Err(TracedNimbleError::invalid_argument(
                        "dictionary arrays require scalar elements",
                    ))
                }
            })
        }
    };
}

impl_scalar_slice_helpers! {
    { Int8, i8 }, { Uint8, u8 }, { Int16, i16 }, { Uint16, u16 },
    { Int32, i32 }, { Uint32, u32 }, { Int64, i64 }, { Uint64, u64 },
    { Float, f32 }, { Double, f64 }
}

impl Vector {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Vector::Int8(_) => "Int8",
            Vector::Uint8(_) => "Uint8",
            Vector::Int16(_) => "Int16",
            Vector::Uint16(_) => "Uint16",
            Vector::Int32(_) => "Int32",
            Vector::Uint32(_) => "Uint32",
            Vector::Int64(_) => "Int64",
            Vector::Uint64(_) => "Uint64",
            Vector::Float(_) => "Float",
            Vector::Double(_) => "Double",
            Vector::Bool(_) => "Bool",
            Vector::String(_) => "String",
            Vector::Row(_) => "Row",
            Vector::Array(_) => "Array",
            Vector::Map(_) => "Map",
            Vector::FlatMap(_) => "FlatMap",
        }
    }
}
