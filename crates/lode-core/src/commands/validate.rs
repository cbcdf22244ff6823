use crate::blockstore::{BlockStore, PipelineOptions};
use crate::commands::util::{hash_api_for_version, read_version_index};
use crate::error::Result;

pub struct ValidateParams<'a> {
    pub storage_uri: &'a str,
    pub version_index_path: &'a str,
    pub pipeline: PipelineOptions,
}

#[derive(Debug, Clone, Copy)]
pub struct ValidateSummary {
    pub asset_count: usize,
    pub chunk_count: usize,
    pub block_count: usize,
}

/// Check that the store still holds every chunk a version references.
pub fn validate(params: &ValidateParams<'_>) -> Result<ValidateSummary> {
    let version_index = read_version_index(params.version_index_path)?;
    let hash = hash_api_for_version(&version_index)?;

    let pipeline =
        crate::blockstore::build_block_store(params.storage_uri, hash, &params.pipeline)?;
    let store_index = pipeline
        .top
        .get_existing_content(&version_index.chunk_hash_set(), 0)?;

    store_index.validate(&version_index, params.version_index_path)?;

    Ok(ValidateSummary {
        asset_count: version_index.assets.len(),
        chunk_count: version_index.chunk_hashes.len(),
        block_count: store_index.block_count(),
    })
}
