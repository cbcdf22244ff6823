use std::collections::HashSet;
use std::sync::Arc;

use crate::blockstore::{BlockStore, BlockStoreStats, StatsCounters, StoredBlock};
use crate::compress;
use crate::error::{LodeError, Result};
use crate::index::StoreIndex;
use lode_types::{BlockHash, ChunkHash};

/// Encodes block payloads on the way down and decodes them on the way
/// up, per the block's compression tag. Addressing is untouched: block
/// hashes are always over the uncompressed chunk contents.
pub struct CompressBlockStore {
    inner: Arc<dyn BlockStore>,
    counters: StatsCounters,
}

impl CompressBlockStore {
    pub fn new(inner: Arc<dyn BlockStore>) -> Self {
        Self {
            inner,
            counters: StatsCounters::new(),
        }
    }
}

impl BlockStore for CompressBlockStore {
    fn get_stored_block(&self, block_hash: BlockHash) -> Result<Option<Arc<StoredBlock>>> {
        self.counters.record_get();
        let Some(block) = self.inner.get_stored_block(block_hash)? else {
            return Ok(None);
        };
        if block.index.tag == compress::TAG_NONE {
            return Ok(Some(block));
        }

        let uncompressed_size = block.index.uncompressed_size() as usize;
        let data = compress::decompress(block.index.tag, &block.data, uncompressed_size)
            .map_err(|e| LodeError::Other(format!("decompressing block {block_hash}: {e}")))?;
        self.counters.record_bytes_read(data.len() as u64);
        Ok(Some(Arc::new(StoredBlock {
            index: block.index.clone(),
            data,
        })))
    }

    fn put_stored_block(&self, block: &StoredBlock) -> Result<()> {
        self.counters.record_put();
        if block.index.tag == compress::TAG_NONE {
            return self.inner.put_stored_block(block);
        }

        let data = compress::compress(block.index.tag, &block.data)
            .map_err(|e| {
                LodeError::Other(format!("compressing block {}: {e}", block.block_hash()))
            })?;
        self.counters.record_bytes_written(data.len() as u64);
        self.inner.put_stored_block(&StoredBlock {
            index: block.index.clone(),
            data,
        })
    }

    fn get_existing_content(
        &self,
        chunk_hashes: &HashSet<ChunkHash>,
        min_block_usage_percent: u8,
    ) -> Result<StoreIndex> {
        self.inner
            .get_existing_content(chunk_hashes, min_block_usage_percent)
    }

    fn prune_blocks(&self, keep: &HashSet<BlockHash>) -> Result<u64> {
        self.inner.prune_blocks(keep)
    }

    fn flush(&self) -> Result<()> {
        self.counters.record_flush();
        self.inner.flush()
    }

    fn stats(&self) -> BlockStoreStats {
        self.counters.snapshot()
    }
}
