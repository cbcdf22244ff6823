use crate::blockstore::{BlockStore, PipelineOptions};
use crate::commands::util::{hash_api_for_version, read_version_index, write_store_index};
use crate::error::Result;

pub struct CreateVersionStoreIndexParams<'a> {
    pub storage_uri: &'a str,
    pub version_index_path: &'a str,
    pub version_local_store_index_path: &'a str,
    pub pipeline: PipelineOptions,
}

/// Build and persist the version-local store index for an existing
/// version: the subset of the store's blocks that covers it.
pub fn create_version_store_index(params: &CreateVersionStoreIndexParams<'_>) -> Result<usize> {
    let version_index = read_version_index(params.version_index_path)?;
    let hash = hash_api_for_version(&version_index)?;

    let pipeline =
        crate::blockstore::build_block_store(params.storage_uri, hash, &params.pipeline)?;
    let store_index = pipeline
        .top
        .get_existing_content(&version_index.chunk_hash_set(), 0)?;
    store_index.validate(&version_index, params.version_index_path)?;

    write_store_index(params.version_local_store_index_path, &store_index)?;
    Ok(store_index.block_count())
}
