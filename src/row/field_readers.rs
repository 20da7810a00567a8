// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! Decoding stacks for the row reader. A [`StreamReader`] drives one
//! stream's chunk sequence through its encoding kernels (states:
//! idle, decoding a chunk, exhausted); a [`FieldReader`] tree mirrors
//! the schema and reassembles vectors.

use std::collections::HashMap;

use bitvec::prelude::BitVec;
use bytes::Bytes;

use crate::encodings::{BoolEncoding, NumericEncoding, Primitive, StringEncoding};
use crate::row::{
    FlatMapVector, ListVector, MapVector, RowVector, ScalarVector, Validity, Vector,
};
use crate::schema::{Kind, ScalarKind, Type};
use crate::tablet::{InMemoryChunkedStream, StreamLoader};
use crate::{NimbleResult, TracedNimbleError};

/// Uniform surface over the three kernel families so stream readers
/// can be written once.
pub(crate) trait ChunkDecoder: Sized + Send {
    type Value: Clone + Send;

    fn decode(data: Bytes) -> NimbleResult<Self>;
    fn remaining(&self) -> u32;
    fn skip(&mut self, count: u32) -> NimbleResult<()>;
    fn materialize(&mut self, count: u32, out: &mut Vec<Self::Value>) -> NimbleResult<()>;
    fn materialize_nullable(
        &mut self,
        count: u32,
        out: &mut Vec<Self::Value>,
        validity: &mut Validity,
    ) -> NimbleResult<()>;
}

impl<T: Primitive> ChunkDecoder for NumericEncoding<T> {
    type Value = T;

    fn decode(data: Bytes) -> NimbleResult<Self> {
        NumericEncoding::decode(data)
    }

    fn remaining(&self) -> u32 {
        NumericEncoding::remaining(self)
    }

    fn skip(&mut self, count: u32) -> NimbleResult<()> {
        NumericEncoding::skip(self, count)
    }

    fn materialize(&mut self, count: u32, out: &mut Vec<T>) -> NimbleResult<()> {
        NumericEncoding::materialize(self, count, out)
    }

    fn materialize_nullable(
        &mut self,
        count: u32,
        out: &mut Vec<T>,
        validity: &mut Validity,
    ) -> NimbleResult<()> {
        NumericEncoding::materialize_nullable(self, count, out, validity)
    }
}

impl ChunkDecoder for BoolEncoding {
    type Value = bool;

    fn decode(data: Bytes) -> NimbleResult<Self> {
        BoolEncoding::decode(data)
    }

    fn remaining(&self) -> u32 {
        BoolEncoding::remaining(self)
    }

    fn skip(&mut self, count: u32) -> NimbleResult<()> {
        BoolEncoding::skip(self, count)
    }

    fn materialize(&mut self, count: u32, out: &mut Vec<bool>) -> NimbleResult<()> {
        BoolEncoding::materialize(self, count, out)
    }

    fn materialize_nullable(
        &mut self,
        count: u32,
        out: &mut Vec<bool>,
        validity: &mut Validity,
    ) -> NimbleResult<()> {
        BoolEncoding::materialize_nullable(self, count, out, validity)
    }
}

impl ChunkDecoder for StringEncoding {
    type Value = Bytes;

    fn decode(data: Bytes) -> NimbleResult<Self> {
        StringEncoding::decode(data)
    }

    fn remaining(&self) -> u32 {
        StringEncoding::remaining(self)
    }

    fn skip(&mut self, count: u32) -> NimbleResult<()> {
        StringEncoding::skip(self, count)
    }

    fn materialize(&mut self, count: u32, out: &mut Vec<Bytes>) -> NimbleResult<()> {
        StringEncoding::materialize(self, count, out)
    }

    fn materialize_nullable(
        &mut self,
        count: u32,
        out: &mut Vec<Bytes>,
        validity: &mut Validity,
    ) -> NimbleResult<()> {
        StringEncoding::materialize_nullable(self, count, out, validity)
    }
}

/// Drives one stream's chunks through a kernel family, transparently
/// advancing across chunk boundaries.
pub(crate) struct StreamReader<D: ChunkDecoder> {
    chunks: InMemoryChunkedStream,
    current: Option<D>,
    empty: bool,
    stripe: u32,
    stream: u32,
}

impl<D: ChunkDecoder> StreamReader<D> {
    pub fn new(loader: &StreamLoader, stripe: u32, stream: u32) -> Self {
        Self {
            chunks: loader.chunked(),
            current: None,
            empty: loader.is_empty(),
            stripe,
            stream,
        }
    }

    /// True when the stripe simply has no data for this stream.
    pub fn is_empty_stream(&self) -> bool {
        self.empty
    }

    fn corrupt(&self, message: impl std::fmt::Display) -> TracedNimbleError {
        TracedNimbleError::corrupt_at(self.stripe, self.stream, message.to_string())
    }

    fn advance(&mut self) -> NimbleResult<bool> {
        while self.chunks.has_next() {
            let chunk = self
                .chunks
                .next_chunk()
                .map_err(|e| self.corrupt(e.kind()))?;
            let payload = chunk.payload().map_err(|e| self.corrupt(e.kind()))?;
            let decoder = D::decode(payload).map_err(|e| self.corrupt(e.kind()))?;
            if decoder.remaining() != chunk.item_count {
                return Err(self.corrupt(format!(
                    "chunk declares {} items, payload holds {}",
                    chunk.item_count,
                    decoder.remaining()
                )));
            }
            if decoder.remaining() == 0 {
                continue;
            }
            self.current = Some(decoder);
            return Ok(true);
        }
        Ok(false)
    }

    fn ensure_current(&mut self) -> NimbleResult<Option<&mut D>> {
        if self.current.as_ref().map(|c| c.remaining()).unwrap_or(0) == 0 {
            self.current = None;
            if !self.advance()? {
                return Ok(None);
            }
        }
        Ok(self.current.as_mut())
    }

    /// Read `count` rows as per-row values plus a validity bitmap.
    pub fn read_nullable(&mut self, count: u32) -> NimbleResult<(Vec<D::Value>, Validity)> {
        let mut values = Vec::with_capacity(count as usize);
        let mut validity = BitVec::with_capacity(count as usize);
        let mut needed = count;
        while needed > 0 {
            let Some(current) = self.ensure_current()? else {
                return Err(self.corrupt(format!(
                    "stream exhausted with {needed} rows outstanding"
                )));
            };
            let take = needed.min(current.remaining());
            current
                .materialize_nullable(take, &mut values, &mut validity)
                .map_err(|e| {
                    TracedNimbleError::corrupt_at(self.stripe, self.stream, e.kind().to_string())
                })?;
            needed -= take;
        }
        Ok((values, validity))
    }

    /// Read `count` values from a stream that carries no nulls.
    pub fn read(&mut self, count: u32) -> NimbleResult<Vec<D::Value>> {
        let mut values = Vec::with_capacity(count as usize);
        let mut needed = count;
        while needed > 0 {
            let Some(current) = self.ensure_current()? else {
                return Err(self.corrupt(format!(
                    "stream exhausted with {needed} rows outstanding"
                )));
            };
            let take = needed.min(current.remaining());
            current.materialize(take, &mut values).map_err(|e| {
                TracedNimbleError::corrupt_at(self.stripe, self.stream, e.kind().to_string())
            })?;
            needed -= take;
        }
        Ok(values)
    }

    pub fn skip(&mut self, count: u32) -> NimbleResult<()> {
        let mut needed = count;
        while needed > 0 {
            let Some(current) = self.ensure_current()? else {
                return Err(self.corrupt(format!(
                    "stream exhausted with {needed} rows outstanding"
                )));
            };
            let take = needed.min(current.remaining());
            current.skip(take).map_err(|e| {
                TracedNimbleError::corrupt_at(self.stripe, self.stream, e.kind().to_string())
            })?;
            needed -= take;
        }
        Ok(())
    }
}

/// Compact per-row values into the vector convention: values for
/// present rows only, `None` validity when everything is present.
fn compact<V: Clone>(values: Vec<V>, validity: Validity) -> (Vec<V>, Option<Validity>) {
    if validity.all() {
        (values, None)
    } else {
        let compacted = validity
            .iter()
            .by_vals()
            .zip(values)
            .filter(|(present, _)| *present)
            .map(|(_, value)| value)
            .collect();
        (compacted, Some(validity))
    }
}

pub(crate) struct ScalarFieldReader<T: Primitive> {
    stream: StreamReader<NumericEncoding<T>>,
}

pub(crate) struct BoolScalarReader {
    stream: StreamReader<BoolEncoding>,
}

pub(crate) struct StringScalarReader {
    stream: StreamReader<StringEncoding>,
}

pub(crate) struct RowFieldReader {
    pub(crate) nulls: StreamReader<BoolEncoding>,
    pub(crate) children: Vec<FieldReader>,
}

pub(crate) struct ArrayFieldReader {
    lengths: StreamReader<NumericEncoding<u32>>,
    elements: Box<FieldReader>,
}

pub(crate) struct MapFieldReader {
    lengths: StreamReader<NumericEncoding<u32>>,
    keys: Box<FieldReader>,
    values: Box<FieldReader>,
}

pub(crate) struct FlatMapChildReader {
    name: String,
    in_map: StreamReader<BoolEncoding>,
    reader: FieldReader,
}

pub(crate) struct FlatMapFieldReader {
    nulls: StreamReader<BoolEncoding>,
    children: Vec<FlatMapChildReader>,
    as_struct: bool,
}

pub(crate) struct DedupArrayFieldReader {
    offsets: StreamReader<NumericEncoding<u32>>,
    lengths: StreamReader<NumericEncoding<u32>>,
    elements: Box<FieldReader>,
    uniques_consumed: u32,
    /// Length and elements of the most recent unique array; runs can
    /// straddle batch boundaries.
    cache: Option<(u32, Vector)>,
}

pub(crate) enum FieldReader {
    Int8(ScalarFieldReader<i8>),
    Uint8(ScalarFieldReader<u8>),
    Int16(ScalarFieldReader<i16>),
    Uint16(ScalarFieldReader<u16>),
    Int32(ScalarFieldReader<i32>),
    Uint32(ScalarFieldReader<u32>),
    Int64(ScalarFieldReader<i64>),
    Uint64(ScalarFieldReader<u64>),
    Float(ScalarFieldReader<f32>),
    Double(ScalarFieldReader<f64>),
    Bool(BoolScalarReader),
    String(StringScalarReader),
    Row(RowFieldReader),
    Array(ArrayFieldReader),
    Map(MapFieldReader),
    FlatMap(FlatMapFieldReader),
    DedupArray(DedupArrayFieldReader),
}

/// Which flat-map features to materialize for one column.
#[derive(Clone, Debug)]
pub enum FeatureProjection {
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl FeatureProjection {
    fn selects(&self, name: &str) -> bool {
        match self {
            FeatureProjection::All => true,
            FeatureProjection::Include(features) => features.iter().any(|f| f == name),
            FeatureProjection::Exclude(features) => !features.iter().any(|f| f == name),
        }
    }
}

/// Per-column read shaping resolved by the row reader.
pub(crate) struct ColumnShaping {
    pub features: FeatureProjection,
    pub as_struct: bool,
}

impl Default for ColumnShaping {
    fn default() -> Self {
        Self {
            features: FeatureProjection::All,
            as_struct: false,
        }
    }
}

/// Stream offsets this node needs, honoring feature projection.
pub(crate) fn collect_offsets(node: &Type, shaping: &ColumnShaping, out: &mut Vec<u32>) {
    match node.kind {
        Kind::Scalar | Kind::Row | Kind::Array | Kind::Map => {
            out.push(node.offsets[0]);
            for child in &node.children {
                collect_offsets(child, &ColumnShaping::default(), out);
            }
        }
        Kind::FlatMap => {
            out.push(node.offsets[0]);
            for (i, child) in node.children.iter().enumerate() {
                if shaping.features.selects(&child.name) {
                    out.push(node.in_map_offset(i));
                    collect_offsets(child, &ColumnShaping::default(), out);
                }
            }
        }
        Kind::ArrayWithOffsets | Kind::SlidingWindowMap => {
            out.push(node.offsets[0]);
            out.push(node.offsets[1]);
            for child in &node.children {
                collect_offsets(child, &ColumnShaping::default(), out);
            }
        }
    }
}

impl FieldReader {
    pub fn build(
        node: &Type,
        streams: &HashMap<u32, StreamLoader>,
        shaping: &ColumnShaping,
        stripe: u32,
    ) -> NimbleResult<FieldReader> {
        let loader_for = |offset: u32| {
            streams
                .get(&offset)
                .cloned()
                .unwrap_or_else(StreamLoader::empty)
        };
        let stream_for = |offset: u32| (loader_for(offset), stripe, offset);

        Ok(match node.kind {
            Kind::Scalar => {
                let scalar_kind = node.scalar_kind.ok_or_else(|| {
                    TracedNimbleError::internal("scalar node without scalar kind")
                })?;
                let (loader, stripe, offset) = stream_for(node.offsets[0]);
                macro_rules! scalar {
                    ($variant:ident) => {
                        FieldReader::$variant(ScalarFieldReader {
                            stream: StreamReader::new(&loader, stripe, offset),
                        })
                    };
                }
                match scalar_kind {
                    ScalarKind::Int8 => scalar!(Int8),
                    ScalarKind::Uint8 => scalar!(Uint8),
                    ScalarKind::Int16 => scalar!(Int16),
                    ScalarKind::Uint16 => scalar!(Uint16),
                    ScalarKind::Int32 => scalar!(Int32),
                    ScalarKind::Uint32 => scalar!(Uint32),
                    ScalarKind::Int64 => scalar!(Int64),
                    ScalarKind::Uint64 => scalar!(Uint64),
                    ScalarKind::Float => scalar!(Float),
                    ScalarKind::Double => scalar!(Double),
                    ScalarKind::Bool => FieldReader::Bool(BoolScalarReader {
                        stream: StreamReader::new(&loader, stripe, offset),
                    }),
                    ScalarKind::String | ScalarKind::Binary => {
                        FieldReader::String(StringScalarReader {
                            stream: StreamReader::new(&loader, stripe, offset),
                        })
                    }
                }
            }
            Kind::Row => FieldReader::Row(RowFieldReader {
                nulls: StreamReader::new(&loader_for(node.offsets[0]), stripe, node.offsets[0]),
                children: node
                    .children
                    .iter()
                    .map(|child| {
                        FieldReader::build(child, streams, &ColumnShaping::default(), stripe)
                    })
                    .collect::<NimbleResult<_>>()?,
            }),
            Kind::Array => FieldReader::Array(ArrayFieldReader {
                lengths: StreamReader::new(&loader_for(node.offsets[0]), stripe, node.offsets[0]),
                elements: Box::new(FieldReader::build(
                    &node.children[0],
                    streams,
                    &ColumnShaping::default(),
                    stripe,
                )?),
            }),
            Kind::Map => FieldReader::Map(MapFieldReader {
                lengths: StreamReader::new(&loader_for(node.offsets[0]), stripe, node.offsets[0]),
                keys: Box::new(FieldReader::build(
                    &node.children[0],
                    streams,
                    &ColumnShaping::default(),
                    stripe,
                )?),
                values: Box::new(FieldReader::build(
                    &node.children[1],
                    streams,
                    &ColumnShaping::default(),
                    stripe,
                )?),
            }),
            Kind::FlatMap => {
                let mut children = vec![];
                for (i, child) in node.children.iter().enumerate() {
                    if !shaping.features.selects(&child.name) {
                        continue;
                    }
                    let in_map_offset = node.in_map_offset(i);
                    children.push(FlatMapChildReader {
                        name: child.name.clone(),
                        in_map: StreamReader::new(
                            &loader_for(in_map_offset),
                            stripe,
                            in_map_offset,
                        ),
                        reader: FieldReader::build(
                            child,
                            streams,
                            &ColumnShaping::default(),
                            stripe,
                        )?,
                    });
                }
                FieldReader::FlatMap(FlatMapFieldReader {
                    nulls: StreamReader::new(
                        &loader_for(node.offsets[0]),
                        stripe,
                        node.offsets[0],
                    ),
                    children,
                    as_struct: shaping.as_struct,
                })
            }
            Kind::ArrayWithOffsets | Kind::SlidingWindowMap => {
                FieldReader::DedupArray(DedupArrayFieldReader {
                    offsets: StreamReader::new(
                        &loader_for(node.offsets[0]),
                        stripe,
                        node.offsets[0],
                    ),
                    lengths: StreamReader::new(
                        &loader_for(node.offsets[1]),
                        stripe,
                        node.offsets[1],
                    ),
                    elements: Box::new(FieldReader::build(
                        &node.children[0],
                        streams,
                        &ColumnShaping::default(),
                        stripe,
                    )?),
                    uniques_consumed: 0,
                    cache: None,
                })
            }
        })
    }

    /// Materialize the next `count` present-parent rows.
    pub fn read(&mut self, count: u32) -> NimbleResult<Vector> {
        macro_rules! scalar_read {
            ($reader:ident, $variant:ident) => {{
                let (values, validity) = $reader.stream.read_nullable(count)?;
                let (values, validity) = compact(values, validity);
                Vector::$variant(ScalarVector { values, validity })
            }};
        }
        Ok(match self {
            FieldReader::Int8(r) => scalar_read!(r, Int8),
            FieldReader::Uint8(r) => scalar_read!(r, Uint8),
            FieldReader::Int16(r) => scalar_read!(r, Int16),
            FieldReader::Uint16(r) => scalar_read!(r, Uint16),
            FieldReader::Int32(r) => scalar_read!(r, Int32),
            FieldReader::Uint32(r) => scalar_read!(r, Uint32),
            FieldReader::Int64(r) => scalar_read!(r, Int64),
            FieldReader::Uint64(r) => scalar_read!(r, Uint64),
            FieldReader::Float(r) => scalar_read!(r, Float),
            FieldReader::Double(r) => scalar_read!(r, Double),
            FieldReader::Bool(r) => scalar_read!(r, Bool),
            FieldReader::String(r) => scalar_read!(r, String),
            FieldReader::Row(r) => r.read(count)?,
            FieldReader::Array(r) => r.read(count)?,
            FieldReader::Map(r) => r.read(count)?,
            FieldReader::FlatMap(r) => r.read(count)?,
            FieldReader::DedupArray(r) => r.read(count)?,
        })
    }

    pub fn skip(&mut self, count: u32) -> NimbleResult<()> {
        match self {
            FieldReader::Int8(r) => r.stream.skip(count),
            FieldReader::Uint8(r) => r.stream.skip(count),
            FieldReader::Int16(r) => r.stream.skip(count),
            FieldReader::Uint16(r) => r.stream.skip(count),
            FieldReader::Int32(r) => r.stream.skip(count),
            FieldReader::Uint32(r) => r.stream.skip(count),
            FieldReader::Int64(r) => r.stream.skip(count),
            FieldReader::Uint64(r) => r.stream.skip(count),
            FieldReader::Float(r) => r.stream.skip(count),
            FieldReader::Double(r) => r.stream.skip(count),
            FieldReader::Bool(r) => r.stream.skip(count),
            FieldReader::String(r) => r.stream.skip(count),
            FieldReader::Row(r) => r.skip(count),
            FieldReader::Array(r) => r.skip(count),
            FieldReader::Map(r) => r.skip(count),
            FieldReader::FlatMap(r) => r.skip(count),
            FieldReader::DedupArray(r) => {
                // Offsets and lengths must be decoded to keep the
                // unique cache coherent; dropping the result is the
                // skip.
                r.read(count).map(|_| ())
            }
        }
    }
}

impl RowFieldReader {
    fn presence(&mut self, count: u32) -> NimbleResult<(Validity, u32)> {
        if self.nulls.is_empty_stream() {
            let validity: Validity = std::iter::repeat(true).take(count as usize).collect();
            return Ok((validity, count));
        }
        let bits = self.nulls.read(count)?;
        let validity: Validity = bits.iter().copied().collect();
        let present = validity.count_ones() as u32;
        Ok((validity, present))
    }

    fn read(&mut self, count: u32) -> NimbleResult<Vector> {
        let (validity, present) = self.presence(count)?;
        let children = self
            .children
            .iter_mut()
            .map(|child| child.read(present))
            .collect::<NimbleResult<Vec<_>>>()?;
        Ok(Vector::Row(RowVector {
            rows: count as usize,
            validity: (!validity.all()).then_some(validity),
            children,
        }))
    }

    pub(crate) fn skip(&mut self, count: u32) -> NimbleResult<()> {
        let (_, present) = self.presence(count)?;
        for child in &mut self.children {
            child.skip(present)?;
        }
        Ok(())
    }

    pub(crate) fn read_columns(&mut self, count: u32) -> NimbleResult<Vector> {
        self.read(count)
    }
}

impl ArrayFieldReader {
    fn read(&mut self, count: u32) -> NimbleResult<Vector> {
        let (lengths, validity) = self.lengths.read_nullable(count)?;
        let (lengths, validity) = compact(lengths, validity);
        let total: u64 = lengths.iter().map(|l| *l as u64).sum();
        let elements = self.elements.read(total as u32)?;
        Ok(Vector::Array(ListVector {
            validity,
            lengths,
            elements: Box::new(elements),
        }))
    }

    fn skip(&mut self, count: u32) -> NimbleResult<()> {
        let (lengths, validity) = self.lengths.read_nullable(count)?;
        let (lengths, _) = compact(lengths, validity);
        let total: u64 = lengths.iter().map(|l| *l as u64).sum();
        self.elements.skip(total as u32)
    }
}

impl MapFieldReader {
    fn read(&mut self, count: u32) -> NimbleResult<Vector> {
        let (lengths, validity) = self.lengths.read_nullable(count)?;
        let (lengths, validity) = compact(lengths, validity);
        let total: u64 = lengths.iter().map(|l| *l as u64).sum();
        let keys = self.keys.read(total as u32)?;
        let values = self.values.read(total as u32)?;
        Ok(Vector::Map(MapVector {
            validity,
            lengths,
            keys: Box::new(keys),
            values: Box::new(values),
        }))
    }

    fn skip(&mut self, count: u32) -> NimbleResult<()> {
        let (lengths, validity) = self.lengths.read_nullable(count)?;
        let (lengths, _) = compact(lengths, validity);
        let total: u64 = lengths.iter().map(|l| *l as u64).sum();
        self.keys.skip(total as u32)?;
        self.values.skip(total as u32)
    }
}

impl FlatMapFieldReader {
    fn presence(&mut self, count: u32) -> NimbleResult<(Validity, u32)> {
        if self.nulls.is_empty_stream() {
            let validity: Validity = std::iter::repeat(true).take(count as usize).collect();
            return Ok((validity, count));
        }
        let bits = self.nulls.read(count)?;
        let validity: Validity = bits.iter().copied().collect();
        let present = validity.count_ones() as u32;
        Ok((validity, present))
    }

    fn read(&mut self, count: u32) -> NimbleResult<Vector> {
        let (validity, present) = self.presence(count)?;
        let mut keys = vec![];
        let mut in_maps = vec![];
        let mut children = vec![];
        for child in &mut self.children {
            let in_map: Validity = if child.in_map.is_empty_stream() {
                std::iter::repeat(false).take(present as usize).collect()
            } else {
                child.in_map.read(present)?.into_iter().collect()
            };
            let set = in_map.count_ones() as u32;
            let values = child.reader.read(set)?;
            keys.push(child.name.clone());
            in_maps.push(in_map);
            children.push(values);
        }

        if self.as_struct {
            // Deliver as a fixed-field row: each feature becomes a
            // column over present map rows, null where not in map.
            let children = in_maps
                .iter()
                .zip(children)
                .map(|(in_map, child)| expand_validity(child, in_map))
                .collect::<NimbleResult<Vec<_>>>()?;
            return Ok(Vector::Row(RowVector {
                rows: count as usize,
                validity: (!validity.all()).then_some(validity),
                children,
            }));
        }
        Ok(Vector::FlatMap(FlatMapVector {
            rows: count as usize,
            validity: (!validity.all()).then_some(validity),
            keys,
            in_maps,
            children,
        }))
    }

    fn skip(&mut self, count: u32) -> NimbleResult<()> {
        let (_, present) = self.presence(count)?;
        for child in &mut self.children {
            if child.in_map.is_empty_stream() {
                continue;
            }
            let in_map = child.in_map.read(present)?;
            let set = in_map.iter().filter(|v| **v).count() as u32;
            child.reader.skip(set)?;
        }
        Ok(())
    }
}

impl DedupArrayFieldReader {
    fn read(&mut self, count: u32) -> NimbleResult<Vector> {
        let (offsets, validity) = self.offsets.read_nullable(count)?;
        let (offsets, validity) = compact(offsets, validity);

        let mut lengths = Vec::with_capacity(offsets.len());
        let mut parts = vec![];
        for &offset in &offsets {
            if offset.checked_add(1) == Some(self.uniques_consumed) {
                let (length, elements) = self.cache.as_ref().ok_or_else(|| {
                    TracedNimbleError::corrupt("dedup array references evicted unique")
                })?;
                lengths.push(*length);
                parts.push(elements.clone());
            } else if offset == self.uniques_consumed {
                let length = self.lengths.read(1)?[0];
                let elements = self.elements.read(length)?;
                lengths.push(length);
                parts.push(elements.clone());
                self.cache = Some((length, elements));
                self.uniques_consumed += 1;
            } else {
                return Err(TracedNimbleError::corrupt(format!(
                    "dedup array offset {offset} breaks consecutive run order"
                )));
            }
        }
        let elements = if parts.is_empty() {
            // Keeps the element type even when nothing was read.
            self.elements.read(0)?
        } else {
            concat_scalar_vectors(parts)?
        };
        Ok(Vector::Array(ListVector {
            validity,
            lengths,
            elements: Box::new(elements),
        }))
    }
}

/// Spread a child vector (sized to the set bits of `outer`) across
/// all of `outer`'s rows, null where the bit is clear.
fn expand_validity(vector: Vector, outer: &Validity) -> NimbleResult<Vector> {
    fn merge(inner: Option<&Validity>, outer: &Validity) -> Option<Validity> {
        let mut next_inner = inner.map(|v| v.iter().by_vals());
        let merged: Validity = outer
            .iter()
            .by_vals()
            .map(|bit| {
                if !bit {
                    false
                } else {
                    match next_inner.as_mut() {
                        Some(iter) => iter.next().unwrap_or(true),
                        None => true,
                    }
                }
            })
            .collect();
        (!merged.all()).then_some(merged)
    }

    macro_rules! expand_scalar {
        ($vector:ident, $variant:ident) => {{
            let validity = merge($vector.validity.as_ref(), outer);
            Vector::$variant(ScalarVector {
                values: $vector.values,
                validity,
            })
        }};
    }
    Ok(match vector {
        Vector::Int8(v) => expand_scalar!(v, Int8),
        Vector::Uint8(v) => expand_scalar!(v, Uint8),
        Vector::Int16(v) => expand_scalar!(v, Int16),
        Vector::Uint16(v) => expand_scalar!(v, Uint16),
        Vector::Int32(v) => expand_scalar!(v, Int32),
        Vector::Uint32(v) => expand_scalar!(v, Uint32),
        Vector::Int64(v) => expand_scalar!(v, Int64),
        Vector::Uint64(v) => expand_scalar!(v, Uint64),
        Vector::Float(v) => expand_scalar!(v, Float),
        Vector::Double(v) => expand_scalar!(v, Double),
        Vector::Bool(v) => expand_scalar!(v, Bool),
        Vector::String(v) => expand_scalar!(v, String),
        Vector::Array(v) => Vector::Array(ListVector {
            validity: merge(v.validity.as_ref(), outer),
            lengths: v.lengths,
            elements: v.elements,
        }),
        Vector::Map(v) => Vector::Map(MapVector {
            validity: merge(v.validity.as_ref(), outer),
            lengths: v.lengths,
            keys: v.keys,
            values: v.values,
        }),
        Vector::Row(v) => Vector::Row(RowVector {
            rows: outer.len(),
            validity: merge(v.validity.as_ref(), outer),
            children: v.children,
        }),
        Vector::FlatMap(v) => Vector::FlatMap(FlatMapVector {
            rows: outer.len(),
            validity: merge(v.validity.as_ref(), outer),
            keys: v.keys,
            in_maps: v.in_maps,
            children: v.children,
        }),
    })
}

/// Concatenate same-typed scalar vectors (dedup-array elements).
fn concat_scalar_vectors(parts: Vec<Vector>) -> NimbleResult<Vector> {
    macro_rules! concat_impl {
        ($first:ident, $parts:ident, $($variant:ident),*) => {
            match $first {
                $(
                    Vector::$variant(head) => {
                        let mut values = head.values;
                        for part in $parts {
                            match part {
                                Vector::$variant(v) => values.extend(v.values),
                                _ => {
                                    return Err(TracedNimbleError::internal(
                                        "mixed vector types in dedup array elements",
                                    ))
                                }
                            }
                        }
                        Ok(Vector::$variant(ScalarVector::new(values)))
                    }
                )*
                _ => Err(TracedNimbleError::invalid_argument(
                    "dictionary arrays require scalar elements",
                )),
            }
        };
    }
    let mut iter = parts.into_iter();
    let Some(first) = iter.next() else {
        return Err(TracedNimbleError::internal(
            "concat over zero dedup array parts",
        ));
    };
    concat_impl!(first, iter,
        Int8, Uint8, Int16, Uint16, Int32, Uint32, Int64, Uint64,
        Float, Double, Bool, String)
}
