// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use moka::future::Cache;
use parking_lot::Mutex;
use prost::Message;
use tracing::info;

use nimble_proto::tablet as proto;

use crate::common::{build_checksum, verify_checksum, ChecksumType};
use crate::encodings::{decompress, CompressionType};
use crate::schema::Schema;
use crate::tablet::{InMemoryChunkedStream, Postscript, MAGIC_SIZE, POSTSCRIPT_SIZE};
use crate::{NimbleResult, TracedNimbleError};

/// Random-access byte source for a tablet.
#[derive(Clone)]
pub enum ReadableFile {
    /// `read_exact_at`, no seek contention.
    #[cfg(unix)]
    Positioned(Arc<std::fs::File>),
    /// `seek` + `read` behind a mutex.
    Normal(Arc<Mutex<std::fs::File>>),
    /// Fully buffered in memory.
    Memory(Bytes),
    /// Records every byte range fetched; projection tests and tooling
    /// hang off this.
    Traced(Box<ReadableFile>, Arc<Mutex<Vec<(u64, u64)>>>),
}

impl ReadableFile {
    pub async fn open(path: impl AsRef<Path>) -> NimbleResult<Self> {
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .open(path.as_ref())
            .await?;
        #[cfg(unix)]
        {
            Ok(ReadableFile::Positioned(Arc::new(file.into_std().await)))
        }
        #[cfg(not(unix))]
        {
            Ok(ReadableFile::Normal(Arc::new(Mutex::new(
                file.into_std().await,
            ))))
        }
    }

    pub fn traced(self) -> (Self, Arc<Mutex<Vec<(u64, u64)>>>) {
        let log = Arc::new(Mutex::new(vec![]));
        (ReadableFile::Traced(Box::new(self), log.clone()), log)
    }

    pub async fn size(&self) -> NimbleResult<u64> {
        match self {
            #[cfg(unix)]
            ReadableFile::Positioned(file) => Ok(file.metadata()?.len()),
            ReadableFile::Normal(file) => Ok(file.lock().metadata()?.len()),
            ReadableFile::Memory(data) => Ok(data.len() as u64),
            ReadableFile::Traced(inner, _) => Box::pin(inner.size()).await,
        }
    }

    pub async fn read_at(&self, offset: u64, length: usize) -> NimbleResult<Bytes> {
        match self {
            #[cfg(unix)]
            ReadableFile::Positioned(file) => {
                let file = file.clone();
                tokio::task::spawn_blocking(move || {
                    use std::os::unix::fs::FileExt;
                    let mut data = vec![0; length];
                    file.read_exact_at(&mut data, offset)?;
                    Ok(Bytes::from(data))
                })
                .await
                .map_err(|e| TracedNimbleError::internal(format!("read task failed: {e}")))?
            }
            ReadableFile::Normal(file) => {
                let file = file.clone();
                tokio::task::spawn_blocking(move || {
                    let mut file = file.lock();
                    file.seek(SeekFrom::Start(offset))?;
                    let mut data = vec![0; length];
                    file.read_exact(&mut data)?;
                    Ok(Bytes::from(data))
                })
                .await
                .map_err(|e| TracedNimbleError::internal(format!("read task failed: {e}")))?
            }
            ReadableFile::Memory(data) => {
                let end = offset as usize + length;
                if end > data.len() {
                    return Err(TracedNimbleError::out_of_range(format!(
                        "read [{offset}, {end}) outside file of {} bytes",
                        data.len()
                    )));
                }
                Ok(data.slice(offset as usize..end))
            }
            ReadableFile::Traced(inner, log) => {
                log.lock().push((offset, length as u64));
                Box::pin(inner.read_at(offset, length)).await
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct TabletReadOptions {
    /// Bound the accessible stripes to those fully contained in
    /// `[file_range_start_offset, file_range_end_offset)`.
    pub file_range_start_offset: Option<u64>,
    pub file_range_end_offset: Option<u64>,
    pub should_coalesce: bool,
    /// Adjacent ranges whose gap is below this merge into one read.
    pub coalesce_gap: u64,
    pub cache_capacity: u64,
}

impl Default for TabletReadOptions {
    fn default() -> Self {
        Self {
            file_range_start_offset: None,
            file_range_end_offset: None,
            should_coalesce: true,
            coalesce_gap: 1 << 20,
            cache_capacity: 64 << 20,
        }
    }
}

struct StripeInfo {
    offset: u64,
    size: u32,
    row_count: u32,
    streams: Vec<proto::StreamEntry>,
}

/// A stream's bytes for one stripe, already buffered. Missing or
/// zero-length streams yield empty loaders.
#[derive(Clone)]
pub struct StreamLoader {
    data: Bytes,
}

impl StreamLoader {
    pub fn empty() -> Self {
        Self { data: Bytes::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn chunked(&self) -> InMemoryChunkedStream {
        InMemoryChunkedStream::new(self.data.clone())
    }
}

/// Parses footer and schema on open, then serves ranged stream loads
/// with optional coalescing and a weighted cache.
pub struct TabletReader {
    file: ReadableFile,
    schema: Schema,
    metadata: HashMap<String, String>,
    stripes: Vec<StripeInfo>,
    postscript: Postscript,
    file_size: u64,
    footer_end: u64,
    total_row_count: u64,
    coalesce_gap: Option<u64>,
    cache: Cache<u64, Bytes>,
}

impl TabletReader {
    pub async fn open(file: ReadableFile, options: TabletReadOptions) -> NimbleResult<Self> {
        let file_size = file.size().await?;
        let tail_size = (POSTSCRIPT_SIZE + MAGIC_SIZE) as u64;
        if file_size < tail_size {
            return Err(TracedNimbleError::corrupt(format!(
                "file of {file_size} bytes cannot hold a postscript"
            )));
        }
        let tail = file
            .read_at(file_size - tail_size, tail_size as usize)
            .await?;
        let postscript = Postscript::decode(&tail)?;

        let footer_end = file_size - tail_size;
        let footer_length = postscript.footer_length as u64;
        if footer_length > footer_end {
            return Err(TracedNimbleError::corrupt(format!(
                "footer of {footer_length} bytes overruns file"
            )));
        }
        let footer_raw = file
            .read_at(footer_end - footer_length, footer_length as usize)
            .await?;
        let footer_bytes = decompress(postscript.footer_compression, footer_raw)?;
        let footer = proto::Footer::decode(footer_bytes.as_ref())?;

        let schema = Schema::from_proto(footer.schema.as_ref().ok_or_else(|| {
            TracedNimbleError::corrupt("footer carries no schema")
        })?)?;

        let range_start = options.file_range_start_offset.unwrap_or(0);
        let range_end = options.file_range_end_offset.unwrap_or(u64::MAX);
        let stripes: Vec<StripeInfo> = footer
            .stripes
            .iter()
            .filter(|stripe| {
                stripe.offset >= range_start
                    && stripe.offset + stripe.size as u64 <= range_end
            })
            .map(|stripe| {
                let declared: u64 = stripe.streams.iter().map(|s| s.length as u64).sum();
                if declared != stripe.size as u64 {
                    return Err(TracedNimbleError::corrupt(format!(
                        "stream directory sums to {declared}, stripe size is {}",
                        stripe.size
                    )));
                }
                Ok(StripeInfo {
                    offset: stripe.offset,
                    size: stripe.size,
                    row_count: stripe.row_count,
                    streams: stripe.streams.clone(),
                })
            })
            .collect::<NimbleResult<_>>()?;

        let metadata = footer
            .metadata
            .iter()
            .map(|entry| (entry.key.clone(), entry.value.clone()))
            .collect();

        info!(
            file_size,
            stripes = stripes.len(),
            version = format!("{}.{}", postscript.major_version, postscript.minor_version),
            "tablet opened"
        );
        let cache = Cache::builder()
            .max_capacity(options.cache_capacity)
            .weigher(|_, value: &Bytes| value.len().try_into().unwrap_or(u32::MAX))
            .build();
        Ok(Self {
            file,
            schema,
            metadata,
            stripes,
            postscript,
            file_size,
            footer_end,
            total_row_count: footer.row_count,
            coalesce_gap: options.should_coalesce.then_some(options.coalesce_gap),
            cache,
        })
    }

    pub async fn open_path(
        path: impl AsRef<Path>,
        options: TabletReadOptions,
    ) -> NimbleResult<Self> {
        let file = ReadableFile::open(path).await?;
        Self::open(file, options).await
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Stripes accessible under the configured file range.
    pub fn stripe_count(&self) -> u32 {
        self.stripes.len() as u32
    }

    /// Total rows in the file, including out-of-range stripes.
    pub fn tablet_row_count(&self) -> u64 {
        self.total_row_count
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn footer_size(&self) -> u32 {
        self.postscript.footer_length
    }

    pub fn footer_compression(&self) -> CompressionType {
        self.postscript.footer_compression
    }

    pub fn checksum(&self) -> u64 {
        self.postscript.checksum
    }

    pub fn checksum_type(&self) -> ChecksumType {
        self.postscript.checksum_type
    }

    pub fn major_version(&self) -> u16 {
        self.postscript.major_version
    }

    pub fn minor_version(&self) -> u16 {
        self.postscript.minor_version
    }

    fn stripe(&self, stripe_id: u32) -> NimbleResult<&StripeInfo> {
        self.stripes.get(stripe_id as usize).ok_or_else(|| {
            TracedNimbleError::out_of_range(format!(
                "stripe {stripe_id} outside accessible range of {} stripes",
                self.stripes.len()
            ))
        })
    }

    pub fn stripe_row_count(&self, stripe_id: u32) -> NimbleResult<u32> {
        Ok(self.stripe(stripe_id)?.row_count)
    }

    pub fn stripe_offset(&self, stripe_id: u32) -> NimbleResult<u64> {
        Ok(self.stripe(stripe_id)?.offset)
    }

    pub fn stripe_size(&self, stripe_id: u32) -> NimbleResult<u32> {
        Ok(self.stripe(stripe_id)?.size)
    }

    /// Streams recorded in this stripe's directory. Streams bound
    /// after the stripe was written are simply absent.
    pub fn stream_count(&self, stripe_id: u32) -> NimbleResult<u32> {
        Ok(self.stripe(stripe_id)?.streams.len() as u32)
    }

    pub fn stream_offsets(&self, stripe_id: u32) -> NimbleResult<Vec<u32>> {
        Ok(self.stripe(stripe_id)?.streams.iter().map(|s| s.offset).collect())
    }

    pub fn stream_sizes(&self, stripe_id: u32) -> NimbleResult<Vec<u32>> {
        Ok(self.stripe(stripe_id)?.streams.iter().map(|s| s.length).collect())
    }

    /// Load the requested streams of one stripe. Ranges of uncached
    /// streams are merged into single reads when their gaps fall
    /// below the coalesce threshold.
    pub async fn load(
        &self,
        stripe_id: u32,
        stream_ids: &[u32],
    ) -> NimbleResult<Vec<StreamLoader>> {
        let stripe = self.stripe(stripe_id)?;
        let mut loaders = vec![StreamLoader::empty(); stream_ids.len()];

        // (request index, file offset, length)
        let mut pending: Vec<(usize, u64, u32)> = vec![];
        for (index, &stream_id) in stream_ids.iter().enumerate() {
            let Some(entry) = stripe.streams.get(stream_id as usize) else {
                continue;
            };
            if entry.length == 0 {
                continue;
            }
            let key = stream_cache_key(stripe_id, stream_id);
            if let Some(data) = self.cache.get(&key).await {
                loaders[index] = StreamLoader { data };
                continue;
            }
            pending.push((index, stripe.offset + entry.offset as u64, entry.length));
        }
        pending.sort_by_key(|(_, offset, _)| *offset);

        let mut group_start = 0;
        while group_start < pending.len() {
            let mut group_end = group_start + 1;
            let first = pending[group_start].1;
            let mut end = first + pending[group_start].2 as u64;
            while group_end < pending.len() {
                let (_, offset, length) = pending[group_end];
                match self.coalesce_gap {
                    Some(gap) if offset.saturating_sub(end) <= gap => {
                        end = end.max(offset + length as u64);
                        group_end += 1;
                    }
                    _ => break,
                }
            }
            let buffer = self.file.read_at(first, (end - first) as usize).await?;
            for &(index, offset, length) in &pending[group_start..group_end] {
                let begin = (offset - first) as usize;
                let data = buffer.slice(begin..begin + length as usize);
                let key = stream_cache_key(stripe_id, stream_ids[index]);
                self.cache.insert(key, data.clone()).await;
                loaders[index] = StreamLoader { data };
            }
            group_start = group_end;
        }
        Ok(loaders)
    }

    /// Recompute the checksum over `[0, footer_end)` and compare with
    /// the postscript. Reads the whole prefix; opt-in for that reason.
    pub async fn verify_checksum(&self) -> NimbleResult<()> {
        let data = self.file.read_at(0, self.footer_end as usize).await?;
        verify_checksum(self.postscript.checksum_type, &data, self.postscript.checksum)
    }

    /// Convenience for tooling: checksum the given bytes the way the
    /// writer did.
    pub fn compute_checksum(checksum_type: ChecksumType, data: &[u8]) -> u64 {
        build_checksum(checksum_type, data)
    }
}

fn stream_cache_key(stripe_id: u32, stream_id: u32) -> u64 {
    (stripe_id as u64) << 32 | stream_id as u64
}
