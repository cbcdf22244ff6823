use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use crate::chunker::{chunk_stream, ChunkEntry, ChunkerConfig};
use crate::error::{LodeError, Result};
use crate::hash::{hash_of_chunk_hashes, HashApi};
use crate::index::version::{AssetEntry, VersionIndex};
use crate::platform;
use lode_types::ChunkHash;

/// Regex path filter applied during enumeration. The exclude pattern
/// prunes whole subtrees; the include pattern gates files only, so
/// directory structure survives a narrow include.
#[derive(Debug, Default)]
pub struct PathFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl PathFilter {
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                LodeError::InvalidArgument(format!("invalid filter regex '{pattern}': {e}"))
            })
        };
        Ok(Self {
            include: include.map(compile).transpose()?,
            exclude: exclude.map(compile).transpose()?,
        })
    }

    fn excludes(&self, rel_path: &str) -> bool {
        self.exclude
            .as_ref()
            .is_some_and(|re| re.is_match(rel_path))
    }

    fn includes_file(&self, rel_path: &str) -> bool {
        self.include
            .as_ref()
            .map_or(true, |re| re.is_match(rel_path))
    }
}

/// Where one chunk's bytes live in the source tree, recorded during
/// indexing so upsync can re-read block contents without re-chunking
/// whole files.
#[derive(Debug, Clone, Copy)]
pub struct ChunkLocation {
    pub asset_index: u32,
    pub offset: u64,
    pub size: u32,
}

/// A freshly-built version index plus the source locations of every
/// chunk it introduced.
pub struct BuiltVersion {
    pub index: VersionIndex,
    pub chunk_locations: HashMap<ChunkHash, ChunkLocation>,
}

struct ScannedEntry {
    /// Slash-separated path relative to the root; directories carry a
    /// trailing slash.
    rel_path: String,
    abs_path: PathBuf,
    size: u64,
    permissions: u16,
    is_dir: bool,
}

fn rel_path_string(root: &Path, path: &Path, is_dir: bool) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| LodeError::Other(format!("path {path:?} escapes root {root:?}")))?;
    let mut joined = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if is_dir {
        joined.push('/');
    }
    Ok(joined)
}

/// Enumerate assets under `root` in lexicographic path order, the same
/// order on every platform.
fn scan_tree(root: &Path, filter: &PathFilter) -> Result<Vec<ScannedEntry>> {
    let mut entries = Vec::new();

    let mut walker = WalkDir::new(root).follow_links(false).into_iter();
    loop {
        let entry = match walker.next() {
            None => break,
            Some(Ok(entry)) => entry,
            Some(Err(e)) => return Err(LodeError::Io(std::io::Error::other(e))),
        };
        if entry.path() == root {
            continue;
        }
        let is_dir = entry.file_type().is_dir();
        if !is_dir && !entry.file_type().is_file() {
            // Symlinks and special files are not assets.
            continue;
        }
        let rel_path = rel_path_string(root, entry.path(), is_dir)?;

        if filter.excludes(&rel_path) {
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        }
        if !is_dir && !filter.includes_file(&rel_path) {
            continue;
        }

        let metadata = entry.metadata().map_err(|e| {
            LodeError::Io(std::io::Error::other(format!(
                "stat '{}': {e}",
                entry.path().display()
            )))
        })?;
        entries.push(ScannedEntry {
            rel_path,
            abs_path: entry.path().to_path_buf(),
            size: if is_dir { 0 } else { metadata.len() },
            permissions: platform::permission_bits(&metadata),
            is_dir,
        });
    }

    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(entries)
}

/// Scan a directory tree and build its version index.
///
/// Files are chunked in parallel into per-asset buffers; the global
/// chunk table is then assembled sequentially in asset order, so the
/// result is byte-deterministic regardless of scheduling.
pub fn build_version_index(
    root: &Path,
    filter: &PathFilter,
    hash: &dyn HashApi,
    chunker: ChunkerConfig,
    tag: u32,
) -> Result<BuiltVersion> {
    let entries = scan_tree(root, filter)?;
    debug!(assets = entries.len(), root = %root.display(), "scanned source tree");

    let per_asset_chunks: Vec<Result<Vec<ChunkEntry>>> = entries
        .par_iter()
        .map(|entry| {
            if entry.is_dir || entry.size == 0 {
                return Ok(Vec::new());
            }
            let file = File::open(&entry.abs_path)?;
            chunk_stream(BufReader::new(file), chunker, hash)
        })
        .collect();

    let mut chunk_table: HashMap<ChunkHash, u32> = HashMap::new();
    let mut chunk_hashes: Vec<ChunkHash> = Vec::new();
    let mut chunk_sizes: Vec<u32> = Vec::new();
    let mut asset_chunk_indexes: Vec<u32> = Vec::new();
    let mut chunk_locations: HashMap<ChunkHash, ChunkLocation> = HashMap::new();
    let mut assets = Vec::with_capacity(entries.len());

    for (asset_index, (entry, chunks)) in entries.iter().zip(per_asset_chunks).enumerate() {
        let chunks = chunks.map_err(|e| {
            LodeError::Other(format!("chunking '{}': {e}", entry.rel_path))
        })?;

        let chunk_index_start = asset_chunk_indexes.len() as u32;
        let mut asset_hashes = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let table_index = *chunk_table.entry(chunk.hash).or_insert_with(|| {
                chunk_hashes.push(chunk.hash);
                chunk_sizes.push(chunk.size);
                (chunk_hashes.len() - 1) as u32
            });
            asset_chunk_indexes.push(table_index);
            asset_hashes.push(chunk.hash);
            chunk_locations.entry(chunk.hash).or_insert(ChunkLocation {
                asset_index: asset_index as u32,
                offset: chunk.offset,
                size: chunk.size,
            });
        }

        let content_hash = if entry.is_dir {
            0
        } else {
            hash_of_chunk_hashes(hash, &asset_hashes)
        };

        assets.push(AssetEntry {
            path_hash: hash.hash64(entry.rel_path.as_bytes()),
            content_hash,
            size: entry.size,
            permissions: entry.permissions,
            tag: if entry.is_dir { 0 } else { tag },
            chunk_count: chunks.len() as u32,
            chunk_index_start,
            path: entry.rel_path.clone(),
        });
    }

    Ok(BuiltVersion {
        index: VersionIndex {
            hash_id: hash.id(),
            target_chunk_size: chunker.target_size,
            assets,
            chunk_hashes,
            chunk_sizes,
            asset_chunk_indexes,
        },
        chunk_locations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Blake3Hash;

    fn write_tree(root: &Path) {
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("a.txt"), vec![0x41; 1024]).unwrap();
        std::fs::write(root.join("b.bin"), vec![0x42; 100_000]).unwrap();
        std::fs::write(root.join("sub/c.txt"), b"").unwrap();
    }

    fn build(root: &Path, filter: &PathFilter) -> BuiltVersion {
        build_version_index(
            root,
            filter,
            &Blake3Hash,
            ChunkerConfig::new(32768).unwrap(),
            0,
        )
        .unwrap()
    }

    #[test]
    fn asset_enumeration_is_sorted_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());

        let built = build(dir.path(), &PathFilter::default());
        let paths: Vec<_> = built.index.assets.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b.bin", "sub/", "sub/c.txt"]);
    }

    #[test]
    fn empty_file_and_directory_have_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());

        let built = build(dir.path(), &PathFilter::default());
        let sub = built.index.find_asset("sub/").unwrap();
        let empty = built.index.find_asset("sub/c.txt").unwrap();
        assert_eq!(sub.chunk_count, 0);
        assert_eq!(empty.chunk_count, 0);
        assert_eq!(empty.size, 0);
    }

    #[test]
    fn identical_content_shares_chunk_table_entries() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        std::fs::write(dir.path().join("b2.bin"), vec![0x42; 100_000]).unwrap();

        let built = build(dir.path(), &PathFilter::default());
        let b = built.index.find_asset("b.bin").unwrap();
        let b2 = built.index.find_asset("b2.bin").unwrap();
        assert_eq!(b.content_hash, b2.content_hash);
        assert_eq!(
            built.index.asset_chunk_indexes(b),
            built.index.asset_chunk_indexes(b2)
        );
    }

    #[test]
    fn build_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());

        let one = build(dir.path(), &PathFilter::default());
        let two = build(dir.path(), &PathFilter::default());
        assert_eq!(one.index, two.index);
        assert_eq!(one.index.to_vec(), two.index.to_vec());
    }

    #[test]
    fn exclude_filter_prunes_subtrees() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());

        let filter = PathFilter::new(None, Some("^sub/")).unwrap();
        let built = build(dir.path(), &filter);
        let paths: Vec<_> = built.index.assets.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b.bin"]);
    }

    #[test]
    fn include_filter_gates_files_only() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());

        let filter = PathFilter::new(Some(r"\.txt$"), None).unwrap();
        let built = build(dir.path(), &filter);
        let paths: Vec<_> = built.index.assets.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "sub/", "sub/c.txt"]);
    }

    #[test]
    fn bad_regex_is_invalid_argument() {
        assert!(matches!(
            PathFilter::new(Some("["), None),
            Err(LodeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn chunk_locations_point_into_source_files() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());

        let built = build(dir.path(), &PathFilter::default());
        for (chunk, loc) in &built.chunk_locations {
            let asset = &built.index.assets[loc.asset_index as usize];
            assert!(!asset.is_directory());
            assert!(loc.offset + loc.size as u64 <= asset.size);
            let _ = chunk;
        }
    }
}
