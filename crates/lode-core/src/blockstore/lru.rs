use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::blockstore::{BlockStore, BlockStoreStats, StatsCounters, StoredBlock};
use crate::error::Result;
use crate::index::StoreIndex;
use lode_types::{BlockHash, ChunkHash};

pub const DEFAULT_LRU_CAPACITY: usize = 32;

/// Fixed-capacity in-memory cache of decompressed blocks, evicting the
/// least recently used. Sits above the compress layer so repeated chunk
/// reads from one block pay the decode once.
pub struct LruBlockStore {
    inner: Arc<dyn BlockStore>,
    cache: Mutex<LruCache<BlockHash, Arc<StoredBlock>>>,
    counters: StatsCounters,
}

impl LruBlockStore {
    pub fn new(inner: Arc<dyn BlockStore>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            counters: StatsCounters::new(),
        }
    }
}

impl BlockStore for LruBlockStore {
    fn get_stored_block(&self, block_hash: BlockHash) -> Result<Option<Arc<StoredBlock>>> {
        self.counters.record_get();
        if let Some(block) = self.cache.lock().unwrap().get(&block_hash) {
            self.counters.record_hit();
            return Ok(Some(Arc::clone(block)));
        }
        self.counters.record_miss();

        let Some(block) = self.inner.get_stored_block(block_hash)? else {
            return Ok(None);
        };
        self.cache
            .lock()
            .unwrap()
            .put(block_hash, Arc::clone(&block));
        Ok(Some(block))
    }

    fn put_stored_block(&self, block: &StoredBlock) -> Result<()> {
        self.counters.record_put();
        self.inner.put_stored_block(block)
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
        // Drop cached entries for blocks that may be going away.
        self.cache.lock().unwrap().clear();
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
