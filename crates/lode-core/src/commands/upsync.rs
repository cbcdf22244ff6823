use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::blockstore::{BlockStore, BlockStorePipeline, PipelineOptions, StoredBlock};
use crate::chunker::ChunkerConfig;
use crate::commands::util::{write_store_index, write_version_index};
use crate::compress;
use crate::config;
use crate::error::{LodeError, Result};
use crate::hash::{hash_api_for_name, HashApi};
use crate::index::{
    build_version_index, create_missing_content, merge_store_index, BuiltVersion, PathFilter,
    StoreIndex,
};
use lode_types::ChunkHash;

pub struct UpsyncParams<'a> {
    pub storage_uri: &'a str,
    pub source_path: &'a Path,
    pub target_version_path: &'a str,
    /// When set, write the merged per-version store index here.
    pub version_local_store_index_path: Option<&'a str>,
    pub target_chunk_size: u32,
    pub target_block_size: u32,
    pub max_chunks_per_block: u32,
    pub compression_algorithm: &'a str,
    pub hash_algorithm: &'a str,
    pub min_block_usage_percent: u8,
    pub include_filter_regex: Option<&'a str>,
    pub exclude_filter_regex: Option<&'a str>,
    pub pipeline: PipelineOptions,
}

impl Default for UpsyncParams<'_> {
    fn default() -> Self {
        Self {
            storage_uri: "",
            source_path: Path::new(""),
            target_version_path: "",
            version_local_store_index_path: None,
            target_chunk_size: config::DEFAULT_TARGET_CHUNK_SIZE,
            target_block_size: config::DEFAULT_TARGET_BLOCK_SIZE,
            max_chunks_per_block: config::DEFAULT_MAX_CHUNKS_PER_BLOCK,
            compression_algorithm: config::DEFAULT_COMPRESSION_ALGORITHM,
            hash_algorithm: config::DEFAULT_HASH_ALGORITHM,
            min_block_usage_percent: config::DEFAULT_MIN_BLOCK_USAGE_PERCENT,
            include_filter_regex: None,
            exclude_filter_regex: None,
            pipeline: PipelineOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpsyncSummary {
    pub asset_count: usize,
    pub chunk_count: usize,
    pub blocks_written: usize,
    pub total_asset_size: u64,
}

/// Upload a directory tree: index it, pack the chunks the store lacks
/// into new blocks, and publish the version index.
pub fn upsync(params: &UpsyncParams<'_>) -> Result<UpsyncSummary> {
    let hash = hash_api_for_name(params.hash_algorithm)?;
    let tag = compress::tag_for_name(params.compression_algorithm)?;
    let chunker = ChunkerConfig::new(params.target_chunk_size)?;
    let filter = PathFilter::new(params.include_filter_regex, params.exclude_filter_regex)?;

    let pipeline = crate::blockstore::build_block_store(
        params.storage_uri,
        hash.clone(),
        &params.pipeline,
    )?;

    let built = build_version_index(params.source_path, &filter, &*hash, chunker, tag)?;
    info!(
        assets = built.index.assets.len(),
        chunks = built.index.chunk_hashes.len(),
        source = %params.source_path.display(),
        "indexed source tree"
    );

    let (existing, missing) = push_version(
        &pipeline,
        &built,
        params.source_path,
        &*hash,
        tag,
        params.target_block_size,
        params.max_chunks_per_block,
        params.min_block_usage_percent,
    )?;

    write_version_index(params.target_version_path, &built.index)?;

    if let Some(lsi_path) = params.version_local_store_index_path {
        let merged = merge_store_index(&existing, &missing);
        merged.validate(&built.index, "version-local store index")?;
        write_store_index(lsi_path, &merged)?;
        debug!(path = lsi_path, blocks = merged.block_count(), "wrote version-local store index");
    }

    Ok(UpsyncSummary {
        asset_count: built.index.assets.len(),
        chunk_count: built.index.chunk_hashes.len(),
        blocks_written: missing.block_count(),
        total_asset_size: built.index.total_asset_size(),
    })
}

/// Push a built version's missing content into a store and flush.
/// Returns the pre-existing subset and the newly-written blocks; the
/// caller publishes the version index itself.
#[allow(clippy::too_many_arguments)]
pub(crate) fn push_version(
    pipeline: &BlockStorePipeline,
    built: &BuiltVersion,
    source_root: &Path,
    hash: &dyn HashApi,
    tag: u32,
    target_block_size: u32,
    max_chunks_per_block: u32,
    min_block_usage_percent: u8,
) -> Result<(StoreIndex, StoreIndex)> {
    let referenced = built.index.chunk_hash_set();
    let existing = pipeline
        .top
        .get_existing_content(&referenced, min_block_usage_percent)?;
    debug!(
        existing_blocks = existing.block_count(),
        "queried store for referenced chunks"
    );

    let missing = create_missing_content(
        &existing,
        &built.index,
        target_block_size,
        max_chunks_per_block,
        hash,
        tag,
    )?;
    if missing.block_count() > 0 {
        info!(blocks = missing.block_count(), "writing missing blocks");
    }

    missing
        .blocks
        .par_iter()
        .try_for_each(|block_index| -> Result<()> {
            let data = gather_block_data(built, source_root, hash, block_index)?;
            pipeline.top.put_stored_block(&StoredBlock {
                index: block_index.clone(),
                data,
            })
        })?;

    pipeline.top.flush()?;
    Ok((existing, missing))
}

/// Re-read a new block's chunks from the source tree at the offsets
/// recorded during indexing, verifying each chunk hash. A file that
/// changed underneath us surfaces as `HashMismatch` rather than a
/// silently corrupt block.
fn gather_block_data(
    built: &BuiltVersion,
    source_root: &Path,
    hash: &dyn HashApi,
    block_index: &crate::index::BlockIndex,
) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(block_index.uncompressed_size() as usize);
    let mut open: Option<(u32, File)> = None;

    for (&chunk, &size) in block_index
        .chunk_hashes
        .iter()
        .zip(&block_index.chunk_sizes)
    {
        let location = built.chunk_locations.get(&chunk).ok_or_else(|| {
            LodeError::Other(format!("no source location recorded for chunk {chunk}"))
        })?;
        let asset = &built.index.assets[location.asset_index as usize];

        let same_file = matches!(&open, Some((asset_index, _)) if *asset_index == location.asset_index);
        if !same_file {
            let path = source_root.join(&asset.path);
            let file = File::open(&path)
                .map_err(|e| LodeError::Other(format!("reopening '{}': {e}", path.display())))?;
            open = Some((location.asset_index, file));
        }
        let file = &mut open.as_mut().unwrap().1;

        let start = data.len();
        data.resize(start + size as usize, 0);
        file.seek(SeekFrom::Start(location.offset))?;
        file.read_exact(&mut data[start..])
            .map_err(|e| LodeError::Other(format!("reading '{}': {e}", asset.path)))?;

        let actual = ChunkHash(hash.hash64(&data[start..]));
        if actual != chunk {
            warn!(
                asset = %asset.path,
                "source file changed while upsyncing"
            );
            return Err(LodeError::HashMismatch {
                chunk,
                context: format!("source asset '{}'", asset.path),
            });
        }
    }

    Ok(data)
}
