use std::collections::HashSet;
use std::sync::Mutex;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::blockstore::{BlockStore, BlockStorePipeline, PipelineOptions};
use crate::commands::util::{read_store_index, read_version_index, write_store_index};
use crate::error::{LodeError, Result};
use crate::hash::hash_api_for_name;
use crate::index::{StoreIndex, VersionIndex};
use lode_types::BlockHash;

pub struct PruneParams<'a> {
    pub storage_uri: &'a str,
    /// Version index URIs whose blocks must survive.
    pub source_paths: &'a [String],
    /// Optional parallel list of per-version store index URIs.
    pub version_local_store_index_paths: Option<&'a [String]>,
    /// Refresh the per-version store indices while scanning.
    pub write_version_local_store_index: bool,
    /// Report the keep count without deleting anything.
    pub dry_run: bool,
    pub hash_algorithm: &'a str,
    pub pipeline: PipelineOptions,
}

#[derive(Debug, Clone, Copy)]
pub struct PruneSummary {
    pub version_count: usize,
    pub kept_blocks: usize,
    pub pruned_blocks: u64,
    pub dry_run: bool,
}

/// Delete every block in the store not referenced by the given
/// versions.
pub fn prune_store(params: &PruneParams<'_>) -> Result<PruneSummary> {
    if let Some(lsi_paths) = params.version_local_store_index_paths {
        if lsi_paths.len() != params.source_paths.len() {
            return Err(LodeError::InvalidArgument(format!(
                "{} version index paths but {} store index paths",
                params.source_paths.len(),
                lsi_paths.len()
            )));
        }
    }

    let hash = hash_api_for_name(params.hash_algorithm)?;
    let pipeline =
        crate::blockstore::build_block_store(params.storage_uri, hash, &params.pipeline)?;

    let kept: Mutex<HashSet<BlockHash>> = Mutex::new(HashSet::new());
    params
        .source_paths
        .par_iter()
        .enumerate()
        .try_for_each(|(i, source_path)| -> Result<()> {
            let lsi_path = params
                .version_local_store_index_paths
                .map(|paths| paths[i].as_str());
            let version_index = read_version_index(source_path)?;
            let store_index =
                resolve_version_blocks(&pipeline, &version_index, source_path, lsi_path, params)?;

            let Some(store_index) = store_index else {
                // Dry run tolerates versions with missing data.
                return Ok(());
            };

            if let Some(path) = lsi_path {
                if params.write_version_local_store_index && !params.dry_run {
                    write_store_index(path, &store_index)?;
                }
            }

            kept.lock().unwrap().extend(store_index.block_hashes());
            Ok(())
        })?;

    let kept = kept.into_inner().unwrap();
    if params.dry_run {
        info!(kept = kept.len(), "prune dry run, nothing deleted");
        return Ok(PruneSummary {
            version_count: params.source_paths.len(),
            kept_blocks: kept.len(),
            pruned_blocks: 0,
            dry_run: true,
        });
    }

    let pruned_blocks = pipeline.top.prune_blocks(&kept)?;
    info!(kept = kept.len(), pruned = pruned_blocks, "pruned store");
    Ok(PruneSummary {
        version_count: params.source_paths.len(),
        kept_blocks: kept.len(),
        pruned_blocks,
        dry_run: false,
    })
}

/// Find the block set covering one version: its side-file when present
/// and still valid (threshold not re-applied), otherwise a store query.
/// `Ok(None)` is the dry-run escape for versions with missing content.
fn resolve_version_blocks(
    pipeline: &BlockStorePipeline,
    version_index: &VersionIndex,
    source_path: &str,
    lsi_path: Option<&str>,
    params: &PruneParams<'_>,
) -> Result<Option<StoreIndex>> {
    // An existing side-file can stand in for the store query, but only
    // when we're not about to rewrite it.
    if let Some(path) = lsi_path {
        if !params.write_version_local_store_index {
            if let Ok(index) = read_store_index(path) {
                if index.validate(version_index, path).is_ok() {
                    return Ok(Some(index));
                }
                warn!(path, "stale version-local store index, querying store");
            }
        }
    }

    let store_index = pipeline
        .top
        .get_existing_content(&version_index.chunk_hash_set(), 0)?;
    match store_index.validate(version_index, source_path) {
        Ok(()) => Ok(Some(store_index)),
        Err(e) if params.dry_run => {
            warn!("data missing for version '{source_path}': {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
