use std::fs;
use std::io::Read;
use std::path::{Component, Path};

use tracing::{info, warn};

use crate::blockstore::{BlockStore, BlockStorePipeline, PipelineOptions};
use crate::chunker::ChunkerConfig;
use crate::commands::downsync::change_version;
use crate::commands::upsync::push_version;
use crate::commands::util::{read_version_index, write_store_index, write_version_index};
use crate::compress;
use crate::config;
use crate::error::{LodeError, Result};
use crate::hash::hash_api_for_id;
use crate::index::{
    build_version_index, create_version_diff, merge_store_index, required_chunk_hashes,
    PathFilter, VersionIndex,
};

pub struct CloneParams<'a> {
    pub source_storage_uri: &'a str,
    pub target_storage_uri: &'a str,
    /// Working directory the versions are materialised in.
    pub target_path: &'a Path,
    /// Parallel lists: source version URIs, target version URIs to
    /// write, and optional zip fallbacks per version.
    pub source_paths: &'a [String],
    pub target_paths: &'a [String],
    pub source_zip_paths: Option<&'a [String]>,
    pub target_block_size: u32,
    pub max_chunks_per_block: u32,
    pub compression_algorithm: &'a str,
    pub min_block_usage_percent: u8,
    pub retain_permissions: bool,
    /// Also write `.lsi` side-files next to the target version URIs.
    pub create_version_local_store_index: bool,
    pub pipeline: PipelineOptions,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CloneSummary {
    pub versions_cloned: usize,
    pub versions_from_zip: usize,
    pub blocks_written: usize,
}

/// Copy a sequence of versions from one store to another, reusing the
/// working tree as the incremental baseline between steps. When the
/// source store cannot reconstruct a version and a zip fallback is
/// provided, the zip is unpacked instead; the triggering store error is
/// still reported.
pub fn clone_store(params: &CloneParams<'_>) -> Result<CloneSummary> {
    if params.source_paths.len() != params.target_paths.len() {
        return Err(LodeError::InvalidArgument(format!(
            "{} source paths but {} target paths",
            params.source_paths.len(),
            params.target_paths.len()
        )));
    }
    if let Some(zips) = params.source_zip_paths {
        if zips.len() != params.source_paths.len() {
            return Err(LodeError::InvalidArgument(format!(
                "{} source paths but {} zip paths",
                params.source_paths.len(),
                zips.len()
            )));
        }
    }

    let tag = compress::tag_for_name(params.compression_algorithm)?;
    fs::create_dir_all(params.target_path)?;

    let mut summary = CloneSummary::default();
    let mut current_index: Option<VersionIndex> = None;

    for (i, (source_path, target_path)) in params
        .source_paths
        .iter()
        .zip(params.target_paths)
        .enumerate()
    {
        let source_index = read_version_index(source_path)?;
        let hash = hash_api_for_id(source_index.hash_id)?;
        let chunker = ChunkerConfig::new(source_index.target_chunk_size)?;

        let source_pipeline = crate::blockstore::build_block_store(
            params.source_storage_uri,
            hash.clone(),
            &params.pipeline,
        )?;

        // Baseline: the previous step's index, or a scan on the first
        // iteration.
        let baseline = match current_index.take() {
            Some(index) => index,
            None => {
                build_version_index(
                    params.target_path,
                    &PathFilter::default(),
                    &*hash,
                    chunker,
                    0,
                )?
                .index
            }
        };

        let zip_path = params
            .source_zip_paths
            .map(|zips| zips[i].as_str())
            .filter(|p| !p.is_empty());
        let from_zip = match materialise_version(
            params,
            &source_pipeline,
            &baseline,
            &source_index,
            source_path,
        ) {
            Ok(()) => false,
            Err(store_error) => {
                let Some(zip_path) = zip_path else {
                    return Err(store_error);
                };
                warn!(
                    "reconstructing '{source_path}' from store failed ({store_error}), \
                     falling back to '{zip_path}'"
                );
                if let Err(zip_error) = unpack_zip_over(params.target_path, zip_path) {
                    return Err(LodeError::Other(format!(
                        "reconstruction of '{source_path}' failed: {store_error}; \
                         zip fallback '{zip_path}' failed: {zip_error}"
                    )));
                }
                true
            }
        };

        // Re-index the working tree and push it to the target store.
        let built = build_version_index(
            params.target_path,
            &PathFilter::default(),
            &*hash,
            chunker,
            tag,
        )?;
        let target_pipeline = crate::blockstore::build_block_store(
            params.target_storage_uri,
            hash.clone(),
            &params.pipeline,
        )?;
        let (existing, missing) = push_version(
            &target_pipeline,
            &built,
            params.target_path,
            &*hash,
            tag,
            params.target_block_size,
            params.max_chunks_per_block,
            params.min_block_usage_percent,
        )?;
        write_version_index(target_path, &built.index)?;
        if params.create_version_local_store_index {
            let merged = merge_store_index(&existing, &missing);
            merged.validate(&built.index, "version-local store index")?;
            write_store_index(
                &config::default_version_local_store_index_path(target_path),
                &merged,
            )?;
        }

        info!(
            source = %source_path,
            target = %target_path,
            blocks = missing.block_count(),
            from_zip,
            "cloned version"
        );
        summary.versions_cloned += 1;
        summary.versions_from_zip += usize::from(from_zip);
        summary.blocks_written += missing.block_count();
        current_index = Some(built.index);
    }

    Ok(summary)
}

/// Bring the working tree to `source_index` from the source store.
fn materialise_version(
    params: &CloneParams<'_>,
    source_pipeline: &BlockStorePipeline,
    baseline: &VersionIndex,
    source_index: &VersionIndex,
    source_path: &str,
) -> Result<()> {
    let hash = hash_api_for_id(source_index.hash_id)?;
    let diff = create_version_diff(baseline, source_index);
    if diff.is_empty() {
        return Ok(());
    }

    let required = required_chunk_hashes(source_index, &diff);
    let store_index = source_pipeline.top.get_existing_content(&required, 0)?;
    let present = store_index.chunk_hash_set();
    for &chunk in &required {
        if !present.contains(&chunk) {
            return Err(LodeError::MissingContent {
                chunk,
                context: source_path.to_string(),
            });
        }
    }

    change_version(
        params.target_path,
        baseline,
        source_index,
        &diff,
        &store_index,
        &source_pipeline.top,
        &*hash,
        params.retain_permissions,
    )
}

/// Replace the working tree's contents with a zip archive, refusing
/// entries that escape the target directory.
fn unpack_zip_over(target_root: &Path, zip_path: &str) -> Result<()> {
    let bytes = crate::blobstore::uri::read_uri(zip_path)?;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| LodeError::Other(format!("opening zip '{zip_path}': {e}")))?;

    // Clear the tree so stale assets from the failed reconstruction
    // don't leak into the re-index.
    for entry in fs::read_dir(target_root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| LodeError::Other(format!("reading zip '{zip_path}': {e}")))?;
        let name = entry.name().to_string();
        let rel = sanitize_zip_entry_path(&name)?;
        let out_path = target_root.join(&rel);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&out_path)?;
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| LodeError::Other(format!("extracting '{name}': {e}")))?;
        std::io::Write::write_all(&mut out, &data)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            crate::platform::apply_permissions(&out_path, (mode & 0o7777) as u16)?;
        }
    }
    Ok(())
}

/// Reject absolute paths and parent traversal in zip entry names.
fn sanitize_zip_entry_path(name: &str) -> Result<std::path::PathBuf> {
    let path = Path::new(name);
    if path.is_absolute() || name.contains('\\') {
        return Err(LodeError::ZipSlip(name.to_string()));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir => {}
            _ => return Err(LodeError::ZipSlip(name.to_string())),
        }
    }
    Ok(path.to_path_buf())
}
