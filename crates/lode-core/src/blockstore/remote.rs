use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::blobstore::{BlobStore, ConditionalPut};
use crate::blockstore::{BlockStore, BlockStoreStats, StatsCounters, StoredBlock};
use crate::config::RetryConfig;
use crate::error::{LodeError, Result};
use crate::hash::HashApi;
use crate::index::{merge_store_index, BlockIndex, StoreIndex};
use lode_types::{BlockHash, ChunkHash};

/// Blob key of the canonical store index.
pub const STORE_INDEX_KEY: &str = "store.lsi";
/// Attempt bound for the optimistic store-index write-back.
pub const STORE_INDEX_CAS_ATTEMPTS: u32 = 10;

/// Bottom of the stack: blocks and the canonical store index in a blob
/// store.
///
/// Puts write the `.lrb` blob immediately and append the block's index
/// to an in-memory staging list; `flush` folds the staged entries into
/// the remote `store.lsi` with a read-merge-conditional-write loop.
/// Between flushes the remote index is eventually consistent: a
/// concurrent reader may miss staged blocks, which upsync tolerates by
/// re-checking before packing.
pub struct RemoteBlockStore {
    blob: Arc<dyn BlobStore>,
    hash: Arc<dyn HashApi>,
    staged: Mutex<Vec<BlockIndex>>,
    retry: RetryConfig,
    counters: StatsCounters,
}

impl RemoteBlockStore {
    pub fn new(blob: Arc<dyn BlobStore>, hash: Arc<dyn HashApi>, retry: RetryConfig) -> Self {
        Self {
            blob,
            hash,
            staged: Mutex::new(Vec::new()),
            retry,
            counters: StatsCounters::new(),
        }
    }

    /// Retry a blob operation on transient errors with exponential
    /// backoff.
    fn retry_call<T>(&self, op_name: &str, mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let mut delay_ms = self.retry.retry_delay_ms;
        for attempt in 0..=self.retry.max_retries {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    warn!(
                        "remote {op_name}: transient error (attempt {}/{}), retrying: {e}",
                        attempt + 1,
                        self.retry.max_retries,
                    );
                    std::thread::sleep(Duration::from_millis(delay_ms));
                    delay_ms = (delay_ms * 2).min(self.retry.retry_max_delay_ms);
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("retry loop always returns");
    }

    fn read_remote_index(&self) -> Result<(StoreIndex, Option<u64>)> {
        let current = self.retry_call("read store index", || {
            self.blob.get_with_generation(STORE_INDEX_KEY)
        })?;
        match current {
            Some((bytes, generation)) => Ok((StoreIndex::from_slice(&bytes)?, Some(generation))),
            None => Ok((StoreIndex::new(self.hash.id()), None)),
        }
    }

    fn staged_index(&self) -> StoreIndex {
        StoreIndex::from_blocks(self.hash.id(), self.staged.lock().unwrap().clone())
    }

    /// Ensure the canonical store index blob exists (used by `init`).
    pub fn ensure_store_index(&self) -> Result<()> {
        let empty = StoreIndex::new(self.hash.id());
        match self
            .blob
            .put_if_match(STORE_INDEX_KEY, &empty.to_vec(), None)?
        {
            ConditionalPut::Stored(_) => {
                debug!("created empty canonical store index");
                Ok(())
            }
            ConditionalPut::Conflict => Ok(()),
        }
    }
}

impl BlockStore for RemoteBlockStore {
    fn get_stored_block(&self, block_hash: BlockHash) -> Result<Option<Arc<StoredBlock>>> {
        self.counters.record_get();
        let key = block_hash.storage_key();
        let Some(bytes) = self.retry_call("get block", || self.blob.get(&key))? else {
            self.counters.record_miss();
            return Ok(None);
        };
        self.counters.record_bytes_read(bytes.len() as u64);

        let block = StoredBlock::from_slice(&bytes)
            .map_err(|e| LodeError::Other(format!("remote block {block_hash}: {e}")))?;
        let derived = crate::hash::block_hash_of_chunks(&*self.hash, &block.index.chunk_hashes);
        if block.index.block_hash != block_hash || derived != block_hash {
            return Err(LodeError::BlockDecode(
                block_hash,
                format!(
                    "content addresses to {derived}, header says {}",
                    block.index.block_hash
                ),
            ));
        }
        self.counters.record_hit();
        Ok(Some(Arc::new(block)))
    }

    fn put_stored_block(&self, block: &StoredBlock) -> Result<()> {
        self.counters.record_put();
        let key = block.block_hash().storage_key();

        let exists = self.retry_call("probe block", || self.blob.exists(&key))?;
        if !exists {
            let bytes = block.to_vec();
            self.retry_call("put block", || self.blob.put(&key, &bytes))?;
            self.counters.record_bytes_written(bytes.len() as u64);
        }

        // Stage the index entry either way; merge dedups and the
        // canonical index may not know this block yet.
        self.staged.lock().unwrap().push(block.index.clone());
        Ok(())
    }

    fn get_existing_content(
        &self,
        chunk_hashes: &HashSet<ChunkHash>,
        min_block_usage_percent: u8,
    ) -> Result<StoreIndex> {
        let (remote, _) = self.read_remote_index()?;
        let merged = merge_store_index(&remote, &self.staged_index());
        let mut subset = merged.subset_for_chunks(chunk_hashes, min_block_usage_percent);

        // The canonical index can run ahead of reality (a block deleted
        // out-of-band stays listed); report only blocks whose blob is
        // actually there.
        let mut missing = Vec::new();
        for block in &subset.blocks {
            let key = block.block_hash.storage_key();
            if !self.retry_call("probe block", || self.blob.exists(&key))? {
                missing.push(block.block_hash);
            }
        }
        if !missing.is_empty() {
            warn!(
                count = missing.len(),
                "indexed blocks are gone from the store"
            );
            subset.blocks.retain(|b| !missing.contains(&b.block_hash));
        }
        Ok(subset)
    }

    fn prune_blocks(&self, keep: &HashSet<BlockHash>) -> Result<u64> {
        let keys = self.retry_call("list blocks", || self.blob.list("chunks"))?;
        let mut pruned = 0u64;
        for key in keys {
            let Some(block_hash) = block_hash_from_key(&key) else {
                warn!("skipping unrecognized blob under chunks/: '{key}'");
                continue;
            };
            if keep.contains(&block_hash) {
                continue;
            }
            self.retry_call("delete block", || self.blob.delete(&key))?;
            pruned += 1;
        }
        self.counters.record_pruned(pruned);

        // Rewrite the canonical index to drop the deleted blocks.
        for _ in 0..STORE_INDEX_CAS_ATTEMPTS {
            let (mut index, generation) = self.read_remote_index()?;
            index.blocks.retain(|b| keep.contains(&b.block_hash));
            match self
                .blob
                .put_if_match(STORE_INDEX_KEY, &index.to_vec(), generation)?
            {
                ConditionalPut::Stored(_) => return Ok(pruned),
                ConditionalPut::Conflict => continue,
            }
        }
        Err(LodeError::StoreIndexConflict(STORE_INDEX_CAS_ATTEMPTS))
    }

    fn flush(&self) -> Result<()> {
        self.counters.record_flush();
        let staged: Vec<BlockIndex> = std::mem::take(&mut *self.staged.lock().unwrap());
        if staged.is_empty() {
            return Ok(());
        }
        let staged_index = StoreIndex::from_blocks(self.hash.id(), staged.clone());

        for attempt in 0..STORE_INDEX_CAS_ATTEMPTS {
            let (remote, generation) = match self.read_remote_index() {
                Ok(v) => v,
                Err(e) => {
                    self.staged.lock().unwrap().splice(0..0, staged);
                    return Err(e);
                }
            };
            let merged = merge_store_index(&remote, &staged_index);
            match self
                .blob
                .put_if_match(STORE_INDEX_KEY, &merged.to_vec(), generation)
            {
                Ok(ConditionalPut::Stored(_)) => {
                    debug!(
                        blocks = staged_index.block_count(),
                        attempt, "store index write-back succeeded"
                    );
                    return Ok(());
                }
                Ok(ConditionalPut::Conflict) => {
                    debug!(attempt, "store index write-back conflict, re-merging");
                }
                Err(e) => {
                    self.staged.lock().unwrap().splice(0..0, staged);
                    return Err(e);
                }
            }
        }
        self.staged.lock().unwrap().splice(0..0, staged);
        Err(LodeError::StoreIndexConflict(STORE_INDEX_CAS_ATTEMPTS))
    }

    fn stats(&self) -> BlockStoreStats {
        self.counters.snapshot()
    }
}

/// Parse "chunks/hh/<16 hex>.lrb" back into a block hash.
fn block_hash_from_key(key: &str) -> Option<BlockHash> {
    let name = key.rsplit('/').next()?;
    let hex = name.strip_suffix(".lrb")?;
    if hex.len() != 16 {
        return None;
    }
    hex.parse().ok()
}
