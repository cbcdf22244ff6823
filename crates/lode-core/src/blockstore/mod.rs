pub mod block;
pub mod cache;
pub mod compress;
pub mod fsblock;
pub mod lru;
pub mod pipeline;
pub mod remote;
pub mod share;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::index::StoreIndex;
use lode_types::{BlockHash, ChunkHash};

pub use block::StoredBlock;
pub use pipeline::{build_block_store, build_block_store_stack, BlockStorePipeline, PipelineOptions};

/// The contract every layer of the block-store stack implements.
///
/// Layers are `Send + Sync` and shared via `Arc`; concurrency comes
/// from worker threads calling into the same stack rather than from an
/// event loop. A `flush` that returns `Ok` guarantees every
/// previously-acked put is durable in the layers below.
pub trait BlockStore: Send + Sync {
    /// Fetch a block by hash. `None` when the store does not have it.
    fn get_stored_block(&self, block_hash: BlockHash) -> Result<Option<Arc<StoredBlock>>>;

    /// Store a block. Blocks are immutable: re-putting an existing hash
    /// is a no-op.
    fn put_stored_block(&self, block: &StoredBlock) -> Result<()>;

    /// Indexed query: which stored blocks cover these chunks, filtered
    /// by minimum block usage.
    fn get_existing_content(
        &self,
        chunk_hashes: &HashSet<ChunkHash>,
        min_block_usage_percent: u8,
    ) -> Result<StoreIndex>;

    /// Delete every block not in `keep`. Returns the number deleted.
    fn prune_blocks(&self, keep: &HashSet<BlockHash>) -> Result<u64>;

    /// Make previously-acked puts durable, transitively.
    fn flush(&self) -> Result<()>;

    /// This layer's own counters.
    fn stats(&self) -> BlockStoreStats;
}

impl BlockStore for Arc<dyn BlockStore> {
    fn get_stored_block(&self, block_hash: BlockHash) -> Result<Option<Arc<StoredBlock>>> {
        (**self).get_stored_block(block_hash)
    }
    fn put_stored_block(&self, block: &StoredBlock) -> Result<()> {
        (**self).put_stored_block(block)
    }
    fn get_existing_content(
        &self,
        chunk_hashes: &HashSet<ChunkHash>,
        min_block_usage_percent: u8,
    ) -> Result<StoreIndex> {
        (**self).get_existing_content(chunk_hashes, min_block_usage_percent)
    }
    fn prune_blocks(&self, keep: &HashSet<BlockHash>) -> Result<u64> {
        (**self).prune_blocks(keep)
    }
    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
    fn stats(&self) -> BlockStoreStats {
        (**self).stats()
    }
}

/// Point-in-time snapshot of one layer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStoreStats {
    pub get_count: u64,
    pub put_count: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub pruned_block_count: u64,
    pub flush_count: u64,
}

/// Lock-free counters each layer owns. Stats failures never abort the
/// primary operation; these cannot fail at all.
#[derive(Debug, Default)]
pub struct StatsCounters {
    get_count: AtomicU64,
    put_count: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    pruned_block_count: AtomicU64,
    flush_count: AtomicU64,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_get(&self) {
        self.get_count.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_put(&self) {
        self.put_count.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_hit(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_miss(&self) {
        self.miss_count.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_bytes_read(&self, n: u64) {
        self.bytes_read.fetch_add(n, Ordering::Relaxed);
    }
    pub fn record_bytes_written(&self, n: u64) {
        self.bytes_written.fetch_add(n, Ordering::Relaxed);
    }
    pub fn record_pruned(&self, n: u64) {
        self.pruned_block_count.fetch_add(n, Ordering::Relaxed);
    }
    pub fn record_flush(&self) {
        self.flush_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BlockStoreStats {
        BlockStoreStats {
            get_count: self.get_count.load(Ordering::Relaxed),
            put_count: self.put_count.load(Ordering::Relaxed),
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            pruned_block_count: self.pruned_block_count.load(Ordering::Relaxed),
            flush_count: self.flush_count.load(Ordering::Relaxed),
        }
    }
}
