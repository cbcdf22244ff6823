use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::blockstore::{BlockStore, BlockStorePipeline, PipelineOptions};
use crate::chunker::ChunkerConfig;
use crate::commands::util::{read_store_index, read_version_index};
use crate::error::{LodeError, Result};
use crate::hash::{hash_api_for_id, HashApi};
use crate::index::{
    build_version_index, create_version_diff, required_chunk_hashes, PathFilter, StoreIndex,
    VersionDiff, VersionIndex,
};
use crate::platform;
use lode_types::ChunkHash;

pub struct DownsyncParams<'a> {
    pub storage_uri: &'a str,
    /// URI of the source `.lvi`.
    pub source_path: &'a str,
    pub target_path: &'a Path,
    /// Optional per-version `.lsi` to seed the content query from.
    pub version_local_store_index_path: Option<&'a str>,
    pub cache_path: Option<&'a Path>,
    pub retain_permissions: bool,
    /// Re-index the target afterwards and compare against the source.
    pub validate: bool,
    pub include_filter_regex: Option<&'a str>,
    pub exclude_filter_regex: Option<&'a str>,
    pub pipeline: PipelineOptions,
}

impl Default for DownsyncParams<'_> {
    fn default() -> Self {
        Self {
            storage_uri: "",
            source_path: "",
            target_path: Path::new(""),
            version_local_store_index_path: None,
            cache_path: None,
            retain_permissions: true,
            validate: false,
            include_filter_regex: None,
            exclude_filter_regex: None,
            pipeline: PipelineOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DownsyncSummary {
    pub added_assets: usize,
    pub modified_assets: usize,
    pub removed_assets: usize,
}

/// Reconstruct a target directory at the state a source version
/// describes, fetching only the blocks the target does not already
/// cover.
pub fn downsync(params: &DownsyncParams<'_>) -> Result<DownsyncSummary> {
    let source_index = read_version_index(params.source_path)?;
    let hash = hash_api_for_id(source_index.hash_id)?;
    let chunker = ChunkerConfig::new(source_index.target_chunk_size)?;
    let filter = PathFilter::new(params.include_filter_regex, params.exclude_filter_regex)?;

    fs::create_dir_all(params.target_path)?;
    let target_built =
        build_version_index(params.target_path, &filter, &*hash, chunker, 0)?;

    let diff = create_version_diff(&target_built.index, &source_index);
    info!(
        added = diff.added.len(),
        modified = diff.modified.len(),
        removed = diff.removed.len(),
        "computed version diff"
    );

    let summary = DownsyncSummary {
        added_assets: diff.added.len(),
        modified_assets: diff.modified.len(),
        removed_assets: diff.removed.len(),
    };

    if !diff.is_empty() {
        let pipeline = crate::blockstore::build_block_store(
            params.storage_uri,
            hash.clone(),
            &params.pipeline.clone().with_cache_path(params.cache_path),
        )?;

        let required = required_chunk_hashes(&source_index, &diff);
        let store_index = resolve_store_index(
            &pipeline,
            &source_index,
            &required,
            params.version_local_store_index_path,
        )?;
        ensure_chunks_covered(&store_index, &required, params.source_path)?;

        change_version(
            params.target_path,
            &target_built.index,
            &source_index,
            &diff,
            &store_index,
            &pipeline.top,
            &*hash,
            params.retain_permissions,
        )?;

        // Settles outstanding cache-populate work.
        pipeline.top.flush()?;
    }

    if params.validate {
        let rebuilt = build_version_index(params.target_path, &filter, &*hash, chunker, 0)?;
        validate_against_source(&rebuilt.index, &source_index, params.retain_permissions)?;
        debug!("post-downsync validation passed");
    }

    Ok(summary)
}

/// Pick the store index to reconstruct from: a valid per-version
/// side-file when offered (its usage threshold is not re-applied),
/// otherwise an indexed query against the store.
fn resolve_store_index(
    pipeline: &BlockStorePipeline,
    source_index: &VersionIndex,
    required: &HashSet<ChunkHash>,
    version_local_store_index_path: Option<&str>,
) -> Result<StoreIndex> {
    if let Some(path) = version_local_store_index_path {
        match read_store_index(path) {
            Ok(index) => {
                if index.validate(source_index, "version-local store index").is_ok() {
                    debug!(path, "using version-local store index");
                    return Ok(index);
                }
                warn!(path, "version-local store index does not satisfy the version, querying store");
            }
            Err(e) => {
                warn!(path, "unreadable version-local store index ({e}), querying store");
            }
        }
    }
    pipeline.top.get_existing_content(required, 0)
}

fn ensure_chunks_covered(
    store_index: &StoreIndex,
    required: &HashSet<ChunkHash>,
    context: &str,
) -> Result<()> {
    let present = store_index.chunk_hash_set();
    for &chunk in required {
        if !present.contains(&chunk) {
            return Err(LodeError::MissingContent {
                chunk,
                context: context.to_string(),
            });
        }
    }
    Ok(())
}

/// Apply a version diff to a target tree: delete what is gone, create
/// directories, materialise files from blocks, then settle
/// permissions.
#[allow(clippy::too_many_arguments)]
pub(crate) fn change_version(
    target_root: &Path,
    target_index: &VersionIndex,
    source_index: &VersionIndex,
    diff: &VersionDiff,
    store_index: &StoreIndex,
    block_store: &dyn BlockStore,
    hash: &dyn HashApi,
    retain_permissions: bool,
) -> Result<()> {
    remove_assets(target_root, target_index, diff)?;

    // Directories first so file writes have somewhere to land.
    let source_assets = || {
        diff.added
            .iter()
            .chain(diff.modified.iter().map(|(_, s)| s))
            .map(|&i| &source_index.assets[i as usize])
    };
    for asset in source_assets().filter(|a| a.is_directory()) {
        fs::create_dir_all(target_root.join(asset.path.trim_end_matches('/')))?;
    }

    let chunk_to_block = store_index.chunk_to_block();
    let files: Vec<_> = source_assets().filter(|a| !a.is_directory()).collect();
    files.par_iter().enumerate().try_for_each(|(i, asset)| {
        write_asset(
            target_root,
            source_index,
            asset,
            &chunk_to_block,
            block_store,
            hash,
            retain_permissions,
            i,
        )
    })?;

    // Directory permissions last: a read-only directory applied early
    // would block the file writes inside it.
    if retain_permissions {
        for asset in source_assets().filter(|a| a.is_directory()) {
            platform::apply_permissions(
                &target_root.join(asset.path.trim_end_matches('/')),
                asset.permissions,
            )?;
        }
    }

    Ok(())
}

/// Delete Removed assets: files first, then directories deepest-first.
fn remove_assets(
    target_root: &Path,
    target_index: &VersionIndex,
    diff: &VersionDiff,
) -> Result<()> {
    let mut removed_dirs: Vec<&str> = Vec::new();
    for &i in &diff.removed {
        let asset = &target_index.assets[i as usize];
        if asset.is_directory() {
            removed_dirs.push(&asset.path);
            continue;
        }
        match fs::remove_file(target_root.join(&asset.path)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    removed_dirs.sort_by_key(|path| std::cmp::Reverse(path.matches('/').count()));
    for dir in removed_dirs {
        let path = target_root.join(dir.trim_end_matches('/'));
        match fs::remove_dir_all(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_asset(
    target_root: &Path,
    source_index: &VersionIndex,
    asset: &crate::index::AssetEntry,
    chunk_to_block: &std::collections::HashMap<ChunkHash, &crate::index::BlockIndex>,
    block_store: &dyn BlockStore,
    hash: &dyn HashApi,
    retain_permissions: bool,
    ordinal: usize,
) -> Result<()> {
    let final_path = target_root.join(&asset.path);
    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = target_root.join(format!(
        ".lode-tmp-{}-{ordinal}",
        std::process::id()
    ));
    let mut file = fs::File::create(&tmp_path)?;

    let result = (|| -> Result<()> {
        for chunk in source_index.asset_chunk_hashes(asset) {
            let block_index = chunk_to_block.get(&chunk).ok_or_else(|| {
                LodeError::MissingContent {
                    chunk,
                    context: format!("asset '{}'", asset.path),
                }
            })?;
            let block = block_store
                .get_stored_block(block_index.block_hash)?
                .ok_or_else(|| {
                    LodeError::NotFound(format!(
                        "block {} for asset '{}'",
                        block_index.block_hash, asset.path
                    ))
                })?;
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
            file.write_all(bytes)?;
        }
        file.flush()?;
        Ok(())
    })();

    if let Err(e) = result {
        drop(file);
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    drop(file);

    fs::rename(&tmp_path, &final_path)?;
    if retain_permissions {
        platform::apply_permissions(&final_path, asset.permissions)?;
    }
    Ok(())
}

/// Post-downsync check: the rebuilt target must agree with the source
/// on asset count, sizes, content hashes, and (when retained)
/// permissions.
fn validate_against_source(
    rebuilt: &VersionIndex,
    source: &VersionIndex,
    check_permissions: bool,
) -> Result<()> {
    if rebuilt.assets.len() != source.assets.len() {
        return Err(LodeError::Other(format!(
            "validation failed: target has {} assets, source has {}",
            rebuilt.assets.len(),
            source.assets.len()
        )));
    }
    for source_asset in &source.assets {
        let target_asset = rebuilt.find_asset(&source_asset.path).ok_or_else(|| {
            LodeError::Other(format!(
                "validation failed: asset '{}' missing from target",
                source_asset.path
            ))
        })?;
        if target_asset.size != source_asset.size
            || target_asset.content_hash != source_asset.content_hash
        {
            return Err(LodeError::Other(format!(
                "validation failed: asset '{}' differs from source",
                source_asset.path
            )));
        }
        if check_permissions && target_asset.permissions != source_asset.permissions {
            return Err(LodeError::Other(format!(
                "validation failed: permissions differ on '{}'",
                source_asset.path
            )));
        }
    }
    Ok(())
}
