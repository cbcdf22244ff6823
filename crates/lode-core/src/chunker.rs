use std::io::Read;

use fastcdc::v2020::{self, StreamCDC};

use crate::error::{LodeError, Result};
use crate::hash::HashApi;
use lode_types::ChunkHash;

/// Smallest accepted target chunk size; below this the FastCDC minimum
/// bound (target / 4) would fall under the algorithm's floor.
pub const MIN_TARGET_CHUNK_SIZE: u32 = 256;
/// Largest accepted target chunk size (128 MiB).
pub const MAX_TARGET_CHUNK_SIZE: u32 = 128 * 1024 * 1024;

/// Content-defined chunking parameters derived from one target size `T`.
///
/// Boundaries fall in `[T/4, 4T]`, well inside the `[T/8, 8T]` contract,
/// and are a function of the content alone: the same bytes produce the
/// same cuts no matter how the reader buffers them. Only the final chunk
/// of a stream may come in under the minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub target_size: u32,
}

impl ChunkerConfig {
    pub fn new(target_size: u32) -> Result<Self> {
        if !(MIN_TARGET_CHUNK_SIZE..=MAX_TARGET_CHUNK_SIZE).contains(&target_size) {
            return Err(LodeError::InvalidArgument(format!(
                "target chunk size {target_size} outside [{MIN_TARGET_CHUNK_SIZE}, {MAX_TARGET_CHUNK_SIZE}]"
            )));
        }
        Ok(Self { target_size })
    }

    pub fn min_size(&self) -> u32 {
        self.target_size / 4
    }

    pub fn avg_size(&self) -> u32 {
        self.target_size
    }

    pub fn max_size(&self) -> u32 {
        self.target_size * 4
    }
}

/// One chunk emitted by the chunker: where it sits in the stream, how
/// long it is, and its content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEntry {
    pub offset: u64,
    pub size: u32,
    pub hash: ChunkHash,
}

/// Lazy chunker over any byte reader.
pub struct Chunker<'a, R: Read> {
    inner: StreamCDC<R>,
    hash: &'a dyn HashApi,
}

impl<'a, R: Read> Chunker<'a, R> {
    pub fn new(reader: R, config: ChunkerConfig, hash: &'a dyn HashApi) -> Self {
        let inner = StreamCDC::new(
            reader,
            config.min_size(),
            config.avg_size(),
            config.max_size(),
        );
        Self { inner, hash }
    }
}

impl<R: Read> Iterator for Chunker<'_, R> {
    type Item = Result<ChunkEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(chunk) => Some(Ok(ChunkEntry {
                offset: chunk.offset,
                size: chunk.length as u32,
                hash: ChunkHash(self.hash.hash64(&chunk.data)),
            })),
            Err(v2020::Error::Empty) => None,
            Err(v2020::Error::IoError(e)) => Some(Err(LodeError::Io(e))),
            Err(other) => Some(Err(LodeError::Other(format!("chunker: {other}")))),
        }
    }
}

/// Chunk an entire reader into a vector.
pub fn chunk_stream<R: Read>(
    reader: R,
    config: ChunkerConfig,
    hash: &dyn HashApi,
) -> Result<Vec<ChunkEntry>> {
    Chunker::new(reader, config, hash).collect()
}
