use std::sync::Arc;

use crate::blobstore::uri;
use crate::error::{LodeError, Result};
use crate::hash::{hash_api_for_id, HashApi};
use crate::index::{StoreIndex, VersionIndex};

/// Read and decode a `.lvi` blob.
pub fn read_version_index(path: &str) -> Result<VersionIndex> {
    let bytes = uri::read_uri(path)
        .map_err(|e| LodeError::Other(format!("reading version index '{path}': {e}")))?;
    VersionIndex::from_slice(&bytes)
}

pub fn write_version_index(path: &str, index: &VersionIndex) -> Result<()> {
    uri::write_uri(path, &index.to_vec())
        .map_err(|e| LodeError::Other(format!("writing version index '{path}': {e}")))
}

/// Read and decode a `.lsi` blob.
pub fn read_store_index(path: &str) -> Result<StoreIndex> {
    let bytes = uri::read_uri(path)
        .map_err(|e| LodeError::Other(format!("reading store index '{path}': {e}")))?;
    StoreIndex::from_slice(&bytes)
}

pub fn write_store_index(path: &str, index: &StoreIndex) -> Result<()> {
    uri::write_uri(path, &index.to_vec())
        .map_err(|e| LodeError::Other(format!("writing store index '{path}': {e}")))
}

/// The hash algorithm a version index was built with.
pub fn hash_api_for_version(index: &VersionIndex) -> Result<Arc<dyn HashApi>> {
    hash_api_for_id(index.hash_id)
}

/// Asset fragmentation: `100 * (fragments / assets) - 100`, where a
/// fragment is a maximal run of consecutive chunks of one asset that
/// reside in the same block. 0 means every chunked asset is contiguous
/// in its blocks.
pub fn asset_fragmentation_percent(version: &VersionIndex, store: &StoreIndex) -> f64 {
    let chunk_to_block = store.chunk_to_block();

    let mut assets = 0u64;
    let mut fragments = 0u64;
    for asset in &version.assets {
        if asset.chunk_count == 0 {
            continue;
        }
        assets += 1;
        let mut last_block = None;
        for chunk in version.asset_chunk_hashes(asset) {
            let block = chunk_to_block.get(&chunk).map(|b| b.block_hash);
            if block != last_block {
                fragments += 1;
                last_block = block;
            }
        }
    }

    if assets == 0 {
        return 0.0;
    }
    100.0 * (fragments as f64 / assets as f64) - 100.0
}
