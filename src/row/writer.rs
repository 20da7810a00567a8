// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tracing::debug;

use crate::common::ChecksumType;
use crate::encodings::{CompressionOptions, DataType, SelectionOptions};
use crate::row::field_writers::{EncodeConfig, FieldWriter, FlushMode, PendingChunk};
use crate::row::{
    DefaultInputBufferGrowthPolicy, EncodingLayoutTree, FlushDecision, FlushPolicy,
    InputBufferGrowthPolicy, RawStripeSizeFlushPolicy, StripeProgress, Vector,
};
use crate::schema::{LogicalType, Schema, SchemaBuilder};
use crate::tablet::{
    FlatMapLayoutPlanner, IdentityLayoutPlanner, LayoutPlanner, StreamData, TabletWriter,
    TabletWriterOptions,
};
use crate::{NimbleResult, TracedNimbleError};

pub struct WriterOptions {
    /// Top-level map columns materialized as flat maps.
    pub flat_map_columns: HashSet<String>,
    /// Top-level array columns encoded with offsets dedup.
    pub dictionary_array_columns: HashSet<String>,
    pub flush_policy: Box<dyn FlushPolicy>,
    pub selection: SelectionOptions,
    /// Per-physical-type selection tuning; falls back to `selection`.
    pub selection_overrides: HashMap<DataType, SelectionOptions>,
    pub compression: CompressionOptions,
    pub enable_chunking: bool,
    /// A field's buffer must reach this raw size before a `Chunk`
    /// decision seals it.
    pub min_chunk_raw_size: u64,
    pub metadata: HashMap<String, String>,
    pub parallel_encoding: bool,
    /// Captured encoding choices to replay.
    pub encoding_layout_tree: Option<EncodingLayoutTree>,
    /// Enables the flat-map layout planner when non-empty.
    pub flat_map_feature_order: Vec<(String, Vec<String>)>,
    pub footer_compression: CompressionOptions,
    pub checksum_type: ChecksumType,
    pub growth_policy: Arc<dyn InputBufferGrowthPolicy>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            flat_map_columns: HashSet::new(),
            dictionary_array_columns: HashSet::new(),
            flush_policy: Box::new(RawStripeSizeFlushPolicy::new(8 << 20)),
            selection: SelectionOptions::default(),
            selection_overrides: HashMap::new(),
            compression: CompressionOptions::default(),
            enable_chunking: false,
            min_chunk_raw_size: 512 << 10,
            metadata: HashMap::new(),
            parallel_encoding: false,
            encoding_layout_tree: None,
            flat_map_feature_order: vec![],
            footer_compression: CompressionOptions::default(),
            checksum_type: ChecksumType::Crc32,
            growth_policy: Arc::new(DefaultInputBufferGrowthPolicy::default()),
        }
    }
}

/// Writes row batches into a tablet: buffers per field, encodes at
/// chunk/stripe boundaries, and seals the file on close.
pub struct RowWriter<W> {
    tablet: TabletWriter<W>,
    schema: SchemaBuilder,
    root: FieldWriter,
    cfg: EncodeConfig,
    flush_policy: Box<dyn FlushPolicy>,
    enable_chunking: bool,
    min_chunk_raw_size: u64,
    parallel_encoding: bool,
    stripe_rows: u32,
    raw_stripe_size: u64,
    stream_buffers: HashMap<u32, Vec<u8>>,
}

impl<W: AsyncWrite + Unpin + Send> RowWriter<W> {
    pub fn new(logical: &LogicalType, sink: W, options: WriterOptions) -> NimbleResult<Self> {
        let logical = apply_column_options(
            logical,
            &options.flat_map_columns,
            &options.dictionary_array_columns,
        )?;
        let schema = SchemaBuilder::new(&logical);
        let cfg = EncodeConfig {
            selection: options.selection,
            selection_overrides: options.selection_overrides,
            compression: options.compression,
            growth: options.growth_policy,
        };
        let root = FieldWriter::build(
            schema.root(),
            vec![],
            options.encoding_layout_tree.as_ref(),
            &cfg,
        )?;

        let layout_planner: Arc<dyn LayoutPlanner> = if options.flat_map_feature_order.is_empty() {
            Arc::new(IdentityLayoutPlanner)
        } else {
            Arc::new(FlatMapLayoutPlanner::new(options.flat_map_feature_order))
        };
        let tablet = TabletWriter::new(
            sink,
            TabletWriterOptions {
                footer_compression: options.footer_compression,
                checksum_type: options.checksum_type,
                metadata: options.metadata,
                layout_planner,
            },
        );
        Ok(Self {
            tablet,
            schema,
            root,
            cfg,
            flush_policy: options.flush_policy,
            enable_chunking: options.enable_chunking,
            min_chunk_raw_size: options.min_chunk_raw_size,
            parallel_encoding: options.parallel_encoding,
            stripe_rows: 0,
            raw_stripe_size: 0,
            stream_buffers: HashMap::new(),
        })
    }

    pub fn schema(&self) -> Schema {
        self.schema.schema()
    }

    /// Append one batch (a row vector over the schema's top-level
    /// fields), then let the flush policy decide on chunk or stripe
    /// boundaries.
    pub async fn write(&mut self, batch: &Vector) -> NimbleResult<()> {
        let rows = match batch {
            Vector::Row(row) => row.rows,
            other => {
                return Err(TracedNimbleError::schema_mismatch(format!(
                    "expected a row batch, got {}",
                    other.type_name()
                )))
            }
        };
        self.root.append(batch, &mut self.schema, &self.cfg)?;
        self.stripe_rows = self
            .stripe_rows
            .checked_add(rows as u32)
            .ok_or_else(|| TracedNimbleError::out_of_range("stripe exceeds u32 rows"))?;
        self.raw_stripe_size += batch.raw_byte_size();

        let progress = StripeProgress {
            raw_stripe_size: self.raw_stripe_size,
            stripe_row_count: self.stripe_rows,
        };
        match self.flush_policy.should_flush(&progress) {
            FlushDecision::None => Ok(()),
            FlushDecision::Chunk => {
                if self.enable_chunking {
                    self.run_flush(FlushMode::Chunk {
                        min_raw: self.min_chunk_raw_size,
                    })
                    .await?;
                }
                Ok(())
            }
            FlushDecision::Stripe => self.flush_stripe().await,
        }
    }

    async fn run_flush(&mut self, mode: FlushMode) -> NimbleResult<()> {
        let mut tasks: Vec<PendingChunk> = vec![];
        self.root.collect_tasks(mode, &mut tasks);
        if tasks.is_empty() {
            return Ok(());
        }

        if self.parallel_encoding {
            // Fan out per field; barrier before appending so chunk
            // order within each stream stays deterministic.
            let (offsets, handles): (Vec<_>, Vec<_>) = tasks
                .into_iter()
                .map(|task| (task.offset, tokio::task::spawn_blocking(task.encode)))
                .unzip();
            let results = futures::future::try_join_all(handles)
                .await
                .map_err(|e| TracedNimbleError::internal(format!("encode task failed: {e}")))?;
            for (offset, chunk) in offsets.into_iter().zip(results) {
                self.stream_buffers.entry(offset).or_default().extend(chunk?);
            }
        } else {
            for task in tasks {
                let chunk = (task.encode)()?;
                self.stream_buffers
                    .entry(task.offset)
                    .or_default()
                    .extend(chunk);
            }
        }
        Ok(())
    }

    /// Seal every buffer and emit the stripe.
    pub async fn flush_stripe(&mut self) -> NimbleResult<()> {
        if self.stripe_rows == 0 && self.stream_buffers.is_empty() {
            return Ok(());
        }
        self.run_flush(FlushMode::Stripe).await?;

        // Streams leave in schema pre-order; the layout planner may
        // still reorder them inside the tablet writer.
        let schema = self.schema.schema();
        let mut buffers = std::mem::take(&mut self.stream_buffers);
        let mut streams = vec![];
        for offset in schema.pre_order_streams() {
            if let Some(data) = buffers.remove(&offset) {
                streams.push(StreamData { offset, data });
            }
        }
        if !buffers.is_empty() {
            return Err(TracedNimbleError::internal(
                "stream buffers outside schema pre-order",
            ));
        }

        debug!(
            rows = self.stripe_rows,
            raw_size = self.raw_stripe_size,
            streams = streams.len(),
            "flushing stripe"
        );
        self.tablet
            .write_stripe(&schema, self.stripe_rows, streams)
            .await?;
        self.root.on_stripe_complete();
        self.stripe_rows = 0;
        self.raw_stripe_size = 0;
        Ok(())
    }

    /// Flush any open stripe and seal the file. Returns its size.
    pub async fn close(mut self) -> NimbleResult<u64> {
        self.flush_policy.on_close();
        self.flush_stripe().await?;
        let schema = self.schema.schema();
        self.tablet.close(&schema).await
    }
}

/// Rewrite top-level columns per the writer options: named map
/// columns become flat maps, named array columns become dedup arrays.
fn apply_column_options(
    logical: &LogicalType,
    flat_map_columns: &HashSet<String>,
    dictionary_array_columns: &HashSet<String>,
) -> NimbleResult<LogicalType> {
    let LogicalType::Row { names, children } = logical else {
        return Err(TracedNimbleError::invalid_argument(
            "writer schema root must be a row",
        ));
    };
    for requested in flat_map_columns {
        if !names.contains(requested) {
            return Err(TracedNimbleError::invalid_argument(format!(
                "flat map column '{requested}' does not exist"
            )));
        }
    }
    for requested in dictionary_array_columns {
        if !names.contains(requested) {
            return Err(TracedNimbleError::invalid_argument(format!(
                "dictionary array column '{requested}' does not exist"
            )));
        }
    }

    let children = names
        .iter()
        .zip(children)
        .map(|(name, child)| {
            if flat_map_columns.contains(name) {
                match child {
                    LogicalType::Map { values, .. } => Ok(LogicalType::FlatMap {
                        values: values.clone(),
                    }),
                    LogicalType::FlatMap { .. } => Ok(child.clone()),
                    _ => Err(TracedNimbleError::invalid_argument(format!(
                        "flat map column '{name}' is not a map"
                    ))),
                }
            } else if dictionary_array_columns.contains(name) {
                match child {
                    LogicalType::Array(elements) => {
                        Ok(LogicalType::ArrayWithOffsets(elements.clone()))
                    }
                    LogicalType::ArrayWithOffsets(_) => Ok(child.clone()),
                    _ => Err(TracedNimbleError::invalid_argument(format!(
                        "dictionary array column '{name}' is not an array"
                    ))),
                }
            } else {
                Ok(child.clone())
            }
        })
        .collect::<NimbleResult<Vec<_>>>()?;
    Ok(LogicalType::Row {
        names: names.clone(),
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ScalarKind;

    #[test]
    fn test_apply_column_options() {
        let logical = LogicalType::row(vec![
            (
                "features",
                LogicalType::Map {
                    keys: Box::new(LogicalType::Scalar(ScalarKind::Int32)),
                    values: Box::new(LogicalType::Scalar(ScalarKind::Float)),
                },
            ),
            (
                "ids",
                LogicalType::Array(Box::new(LogicalType::Scalar(ScalarKind::Int64))),
            ),
        ]);
        let rewritten = apply_column_options(
            &logical,
            &HashSet::from(["features".to_string()]),
            &HashSet::from(["ids".to_string()]),
        )
        .unwrap();
        let LogicalType::Row { children, .. } = rewritten else {
            unreachable!()
        };
        assert!(matches!(children[0], LogicalType::FlatMap { .. }));
        assert!(matches!(children[1], LogicalType::ArrayWithOffsets(_)));
    }

    #[test]
    fn test_unknown_flat_map_column_rejected() {
        let logical = LogicalType::row(vec![("a", LogicalType::Scalar(ScalarKind::Int32))]);
        assert!(apply_column_options(
            &logical,
            &HashSet::from(["missing".to_string()]),
            &HashSet::new(),
        )
        .is_err());
    }

    #[test]
    fn test_non_map_flat_map_column_rejected() {
        let logical = LogicalType::row(vec![("a", LogicalType::Scalar(ScalarKind::Int32))]);
        assert!(apply_column_options(
            &logical,
            &HashSet::from(["a".to_string()]),
            &HashSet::new(),
        )
        .is_err());
    }
}
