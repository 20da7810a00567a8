// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BufMut;
use prost::Message;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use nimble_proto::tablet as proto;

use crate::common::{ChecksumBuilder, ChecksumType};
use crate::encodings::{maybe_compress, CompressionOptions};
use crate::schema::Schema;
use crate::tablet::{
    IdentityLayoutPlanner, LayoutPlanner, Postscript, StreamData, MAGIC, MAJOR_VERSION,
    MINOR_VERSION,
};
use crate::{NimbleResult, TracedNimbleError};

#[derive(Clone)]
pub struct TabletWriterOptions {
    pub footer_compression: CompressionOptions,
    pub checksum_type: ChecksumType,
    pub metadata: HashMap<String, String>,
    pub layout_planner: Arc<dyn LayoutPlanner>,
}

impl Default for TabletWriterOptions {
    fn default() -> Self {
        Self {
            footer_compression: CompressionOptions::default(),
            checksum_type: ChecksumType::Crc32,
            metadata: HashMap::new(),
            layout_planner: Arc::new(IdentityLayoutPlanner),
        }
    }
}

/// Owns the file sink. Appends stripes as they are flushed, keeps the
/// stream directory, and seals the file with footer, postscript and
/// magic on close. The checksum covers `[0, footer_end)` and is fed
/// incrementally so close never re-reads what it wrote.
pub struct TabletWriter<W> {
    sink: W,
    options: TabletWriterOptions,
    checksum: ChecksumBuilder,
    position: u64,
    stripes: Vec<proto::StripeMetadata>,
    row_count: u64,
}

impl<W: AsyncWrite + Unpin + Send> TabletWriter<W> {
    pub fn new(sink: W, options: TabletWriterOptions) -> Self {
        let checksum = ChecksumBuilder::new(options.checksum_type);
        Self {
            sink,
            options,
            checksum,
            position: 0,
            stripes: vec![],
            row_count: 0,
        }
    }

    async fn append(&mut self, data: &[u8]) -> NimbleResult<()> {
        self.sink.write_all(data).await?;
        self.checksum.update(data);
        self.position += data.len() as u64;
        Ok(())
    }

    /// Append one stripe. `schema` is the current binding snapshot;
    /// the stream directory entry count follows it, so streams added
    /// by later flat-map growth read back as empty for this stripe.
    pub async fn write_stripe(
        &mut self,
        schema: &Schema,
        row_count: u32,
        streams: Vec<StreamData>,
    ) -> NimbleResult<()> {
        let streams = self.options.layout_planner.layout(schema, streams)?;

        let stripe_offset = self.position;
        let mut entries = vec![
            proto::StreamEntry {
                offset: 0,
                length: 0,
            };
            schema.stream_count as usize
        ];
        let mut within_stripe = 0u32;
        for stream in &streams {
            if stream.data.is_empty() {
                continue;
            }
            let length = u32::try_from(stream.data.len()).map_err(|_| {
                TracedNimbleError::out_of_range(format!(
                    "stream {} exceeds u32 size",
                    stream.offset
                ))
            })?;
            let entry = entries.get_mut(stream.offset as usize).ok_or_else(|| {
                TracedNimbleError::internal(format!(
                    "stream offset {} outside schema stream count {}",
                    stream.offset, schema.stream_count
                ))
            })?;
            *entry = proto::StreamEntry {
                offset: within_stripe,
                length,
            };
            within_stripe = within_stripe.checked_add(length).ok_or_else(|| {
                TracedNimbleError::out_of_range("stripe exceeds u32 size")
            })?;
        }
        for stream in &streams {
            self.append(&stream.data).await?;
        }

        debug!(
            stripe = self.stripes.len(),
            row_count,
            size = within_stripe,
            "stripe appended"
        );
        self.stripes.push(proto::StripeMetadata {
            offset: stripe_offset,
            size: within_stripe,
            row_count,
            streams: entries,
        });
        self.row_count += row_count as u64;
        Ok(())
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    pub fn bytes_written(&self) -> u64 {
        self.position
    }

    /// Serialize the footer, seal postscript and magic, flush the
    /// sink. Returns the final file size.
    pub async fn close(mut self, schema: &Schema) -> NimbleResult<u64> {
        let footer = proto::Footer {
            schema: Some(schema.to_proto()),
            stripes: std::mem::take(&mut self.stripes),
            metadata: self
                .options
                .metadata
                .iter()
                .map(|(key, value)| proto::MetadataEntry {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
            row_count: self.row_count,
        };
        let (footer_compression, footer_bytes) =
            maybe_compress(footer.encode_to_vec(), &self.options.footer_compression);
        let footer_length = u32::try_from(footer_bytes.len())
            .map_err(|_| TracedNimbleError::out_of_range("footer exceeds u32 size"))?;
        self.append(&footer_bytes).await?;

        let checksum_type = self.checksum.checksum_type();
        let checksum = std::mem::take(&mut self.checksum).finish();
        let postscript = Postscript {
            footer_length,
            footer_compression,
            checksum,
            checksum_type,
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
        };
        let mut tail = vec![];
        postscript.encode(&mut tail);
        tail.put_u16_le(MAGIC);
        self.sink.write_all(&tail).await?;
        self.position += tail.len() as u64;
        self.sink.flush().await?;

        info!(
            file_size = self.position,
            row_count = self.row_count,
            footer_length,
            "tablet sealed"
        );
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LogicalType, ScalarKind, SchemaBuilder};

    fn scalar_schema() -> Schema {
        SchemaBuilder::new(&LogicalType::row(vec![(
            "a",
            LogicalType::Scalar(ScalarKind::Int32),
        )]))
        .schema()
    }

    #[tokio::test]
    async fn test_write_empty_tablet() {
        let mut sink = vec![];
        let writer = TabletWriter::new(&mut sink, TabletWriterOptions::default());
        let schema = scalar_schema();
        let size = writer.close(&schema).await.unwrap();
        assert_eq!(size, sink.len() as u64);
        assert_eq!(&sink[sink.len() - 2..], &[0xFA, 0xA1]);
    }

    #[tokio::test]
    async fn test_directory_entries_sum_to_stripe_size() {
        let mut sink = vec![];
        let mut writer = TabletWriter::new(&mut sink, TabletWriterOptions::default());
        let schema = scalar_schema();
        writer
            .write_stripe(
                &schema,
                3,
                vec![
                    StreamData {
                        offset: 0,
                        data: vec![1, 2, 3],
                    },
                    StreamData {
                        offset: 1,
                        data: vec![4, 5],
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(writer.stripe_count(), 1);
        let stripe = &writer.stripes[0];
        let total: u32 = stripe.streams.iter().map(|s| s.length).sum();
        assert_eq!(total, stripe.size);
        assert_eq!(stripe.size, 5);
    }
}
