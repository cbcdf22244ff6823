use std::fs;
use std::io::Write;
use std::path::Path;

use crate::blockstore::{BlockStore, PipelineOptions};
use crate::commands::util::{hash_api_for_version, read_version_index};
use crate::error::{LodeError, Result};
use crate::platform;
use lode_types::ChunkHash;

pub struct CpParams<'a> {
    pub storage_uri: &'a str,
    pub version_index_path: &'a str,
    /// Asset path inside the version index.
    pub source_asset_path: &'a str,
    /// Local destination file.
    pub target_file_path: &'a Path,
    pub cache_path: Option<&'a Path>,
    pub retain_permissions: bool,
    pub pipeline: PipelineOptions,
}

/// Extract a single file asset from the store to a local path.
pub fn cp(params: &CpParams<'_>) -> Result<u64> {
    let index = read_version_index(params.version_index_path)?;
    let hash = hash_api_for_version(&index)?;

    let asset = index
        .find_asset(params.source_asset_path)
        .ok_or_else(|| {
            LodeError::NotFound(format!(
                "asset '{}' in {}",
                params.source_asset_path, params.version_index_path
            ))
        })?;
    if asset.is_directory() {
        return Err(LodeError::InvalidArgument(format!(
            "'{}' is a directory",
            params.source_asset_path
        )));
    }

    let pipeline = crate::blockstore::build_block_store(
        params.storage_uri,
        hash.clone(),
        &params
            .pipeline
            .clone()
            .with_cache_path(params.cache_path),
    )?;

    let required: std::collections::HashSet<ChunkHash> =
        index.asset_chunk_hashes(asset).collect();
    let store_index = pipeline.top.get_existing_content(&required, 0)?;
    let chunk_to_block = store_index.chunk_to_block();

    if let Some(parent) = params.target_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut out = fs::File::create(params.target_file_path)?;

    let mut written = 0u64;
    for chunk in index.asset_chunk_hashes(asset) {
        let block_index = chunk_to_block
            .get(&chunk)
            .ok_or(LodeError::MissingContent {
                chunk,
                context: format!("asset '{}'", asset.path),
            })?;
        let block = pipeline
            .top
            .get_stored_block(block_index.block_hash)?
            .ok_or_else(|| LodeError::NotFound(format!("block {}", block_index.block_hash)))?;
        let bytes = block.chunk_bytes(chunk).ok_or_else(|| {
            LodeError::BlockDecode(
                block_index.block_hash,
                format!("does not contain chunk {chunk}"),
            )
        })?;
        if ChunkHash(hash.hash64(bytes)) != chunk {
            return Err(LodeError::HashMismatch {
                chunk,
                context: format!("block {}", block_index.block_hash),
            });
        }
        out.write_all(bytes)?;
        written += bytes.len() as u64;
    }
    out.flush()?;
    drop(out);
    pipeline.top.flush()?;

    if params.retain_permissions {
        platform::apply_permissions(params.target_file_path, asset.permissions)?;
    }
    Ok(written)
}
