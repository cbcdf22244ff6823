use crate::blockstore::{BlockStore, PipelineOptions};
use crate::commands::util::{
    asset_fragmentation_percent, hash_api_for_version, read_version_index,
};
use crate::error::Result;

pub struct StatsParams<'a> {
    pub storage_uri: &'a str,
    pub version_index_path: &'a str,
    pub pipeline: PipelineOptions,
}

#[derive(Debug, Clone, Copy)]
pub struct StatsSummary {
    pub asset_count: usize,
    pub chunk_count: usize,
    pub block_count: usize,
    pub total_asset_size: u64,
    pub stored_chunk_count: usize,
    /// `100 * (fragments / assets) - 100`; 0 means chunked assets are
    /// contiguous within their blocks.
    pub asset_fragmentation_percent: f64,
}

/// Report how a version maps onto the store's blocks.
pub fn stats(params: &StatsParams<'_>) -> Result<StatsSummary> {
    let version_index = read_version_index(params.version_index_path)?;
    let hash = hash_api_for_version(&version_index)?;

    let pipeline =
        crate::blockstore::build_block_store(params.storage_uri, hash, &params.pipeline)?;
    let store_index = pipeline
        .top
        .get_existing_content(&version_index.chunk_hash_set(), 0)?;

    Ok(StatsSummary {
        asset_count: version_index.assets.len(),
        chunk_count: version_index.chunk_hashes.len(),
        block_count: store_index.block_count(),
        total_asset_size: version_index.total_asset_size(),
        stored_chunk_count: store_index.chunk_count(),
        asset_fragmentation_percent: asset_fragmentation_percent(&version_index, &store_index),
    })
}
