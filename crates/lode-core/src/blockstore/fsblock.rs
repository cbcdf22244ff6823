use std::collections::HashSet;
use std::sync::Arc;

use crate::blobstore::local::LocalBlobStore;
use crate::blobstore::BlobStore;
use crate::blockstore::{BlockStore, BlockStoreStats, StatsCounters, StoredBlock};
use crate::error::{LodeError, Result};
use crate::index::{BlockIndex, StoreIndex};
use lode_types::{BlockHash, ChunkHash};

/// Block store over a local directory, using the same `chunks/<hh>/`
/// layout as the remote layer but with no canonical index: content
/// queries scan the block files on disk. Serves as the cache backing.
pub struct FsBlockStore {
    blob: LocalBlobStore,
    counters: StatsCounters,
}

impl FsBlockStore {
    pub fn new(root: &str) -> Result<Self> {
        Ok(Self {
            blob: LocalBlobStore::new(root)?,
            counters: StatsCounters::new(),
        })
    }

    fn read_block_indexes(&self) -> Result<Vec<BlockIndex>> {
        let mut indexes = Vec::new();
        for key in self.blob.list("chunks")? {
            if !key.ends_with(".lrb") {
                continue;
            }
            let Some(bytes) = self.blob.get(&key)? else {
                continue;
            };
            match StoredBlock::from_slice(&bytes) {
                Ok(block) => indexes.push(block.index),
                Err(e) => {
                    tracing::warn!("ignoring unreadable cached block '{key}': {e}");
                }
            }
        }
        Ok(indexes)
    }
}

impl BlockStore for FsBlockStore {
    fn get_stored_block(&self, block_hash: BlockHash) -> Result<Option<Arc<StoredBlock>>> {
        self.counters.record_get();
        let Some(bytes) = self.blob.get(&block_hash.storage_key())? else {
            self.counters.record_miss();
            return Ok(None);
        };
        self.counters.record_bytes_read(bytes.len() as u64);
        let block = StoredBlock::from_slice(&bytes)
            .map_err(|e| LodeError::Other(format!("cached block {block_hash}: {e}")))?;
        self.counters.record_hit();
        Ok(Some(Arc::new(block)))
    }

    fn put_stored_block(&self, block: &StoredBlock) -> Result<()> {
        self.counters.record_put();
        let key = block.block_hash().storage_key();
        if !self.blob.exists(&key)? {
            let bytes = block.to_vec();
            self.blob.put(&key, &bytes)?;
            self.counters.record_bytes_written(bytes.len() as u64);
        }
        Ok(())
    }

    fn get_existing_content(
        &self,
        chunk_hashes: &HashSet<ChunkHash>,
        min_block_usage_percent: u8,
    ) -> Result<StoreIndex> {
        let index = StoreIndex::from_blocks(0, self.read_block_indexes()?);
        Ok(index.subset_for_chunks(chunk_hashes, min_block_usage_percent))
    }

    fn prune_blocks(&self, keep: &HashSet<BlockHash>) -> Result<u64> {
        let mut pruned = 0u64;
        for key in self.blob.list("chunks")? {
            let is_kept = key
                .rsplit('/')
                .next()
                .and_then(|name| name.strip_suffix(".lrb"))
                .and_then(|hex| hex.parse::<BlockHash>().ok())
                .is_some_and(|hash| keep.contains(&hash));
            if !is_kept {
                self.blob.delete(&key)?;
                pruned += 1;
            }
        }
        self.counters.record_pruned(pruned);
        Ok(pruned)
    }

    fn flush(&self) -> Result<()> {
        self.counters.record_flush();
        Ok(())
    }

    fn stats(&self) -> BlockStoreStats {
        self.counters.snapshot()
    }
}
