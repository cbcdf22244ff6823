use std::path::Path;
use std::sync::Arc;

use crate::blobstore::{blob_store_for_uri, BlobStore};
use crate::blockstore::cache::CacheBlockStore;
use crate::blockstore::compress::CompressBlockStore;
use crate::blockstore::fsblock::FsBlockStore;
use crate::blockstore::lru::{LruBlockStore, DEFAULT_LRU_CAPACITY};
use crate::blockstore::remote::RemoteBlockStore;
use crate::blockstore::share::ShareBlockStore;
use crate::blockstore::{BlockStore, BlockStoreStats};
use crate::config::RetryConfig;
use crate::error::{LodeError, Result};
use crate::hash::HashApi;

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Local cache directory; no cache layer when absent.
    pub cache_path: Option<std::path::PathBuf>,
    /// Capacity of the decompressed-block LRU; 0 means the default.
    pub lru_capacity: usize,
    pub retry: RetryConfig,
}

impl PipelineOptions {
    pub fn with_cache_path(mut self, cache_path: Option<&Path>) -> Self {
        self.cache_path = cache_path.map(Path::to_path_buf);
        self
    }
}

/// The assembled stack, top layer first. The per-layer handles exist
/// for stats reporting; all traffic goes through `top`.
pub struct BlockStorePipeline {
    pub top: Arc<dyn BlockStore>,
    layers: Vec<(&'static str, Arc<dyn BlockStore>)>,
}

impl BlockStorePipeline {
    /// (layer name, stats) for every layer, top first.
    pub fn stats_report(&self) -> Vec<(&'static str, BlockStoreStats)> {
        self.layers
            .iter()
            .map(|(name, layer)| (*name, layer.stats()))
            .collect()
    }
}

/// Stack the layers over an already-built blob store, bottom→top:
/// remote, (fs + cache), compress, lru, share.
pub fn build_block_store_stack(
    blob: Arc<dyn BlobStore>,
    hash: Arc<dyn HashApi>,
    options: &PipelineOptions,
) -> Result<BlockStorePipeline> {
    let mut layers: Vec<(&'static str, Arc<dyn BlockStore>)> = Vec::new();

    let remote: Arc<dyn BlockStore> =
        Arc::new(RemoteBlockStore::new(blob, hash, options.retry.clone()));
    layers.push(("remote", Arc::clone(&remote)));

    let backing: Arc<dyn BlockStore> = match &options.cache_path {
        Some(cache_path) => {
            let cache_root = cache_path
                .to_str()
                .ok_or_else(|| {
                    LodeError::InvalidArgument(format!("non-UTF8 cache path: {cache_path:?}"))
                })?;
            let local: Arc<dyn BlockStore> = Arc::new(FsBlockStore::new(cache_root)?);
            layers.push(("fs-cache", Arc::clone(&local)));
            let cached: Arc<dyn BlockStore> = Arc::new(CacheBlockStore::new(local, remote));
            layers.push(("cache", Arc::clone(&cached)));
            cached
        }
        None => remote,
    };

    let compressed: Arc<dyn BlockStore> = Arc::new(CompressBlockStore::new(backing));
    layers.push(("compress", Arc::clone(&compressed)));

    let capacity = if options.lru_capacity == 0 {
        DEFAULT_LRU_CAPACITY
    } else {
        options.lru_capacity
    };
    let lru: Arc<dyn BlockStore> = Arc::new(LruBlockStore::new(compressed, capacity));
    layers.push(("lru", Arc::clone(&lru)));

    let share: Arc<dyn BlockStore> = Arc::new(ShareBlockStore::new(lru));
    layers.push(("share", Arc::clone(&share)));

    layers.reverse();
    Ok(BlockStorePipeline { top: share, layers })
}

/// Build the full stack for a storage URI.
pub fn build_block_store(
    storage_uri: &str,
    hash: Arc<dyn HashApi>,
    options: &PipelineOptions,
) -> Result<BlockStorePipeline> {
    let blob = blob_store_for_uri(storage_uri)?;
    build_block_store_stack(blob, hash, options)
}
