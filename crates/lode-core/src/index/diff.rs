use std::collections::{HashMap, HashSet};

use crate::index::version::VersionIndex;
use lode_types::ChunkHash;

/// Per-path classification between the state a target currently has and
/// the state a source version describes. Unchanged assets are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionDiff {
    /// Indices into the source asset table: present in source only.
    pub added: Vec<u32>,
    /// Indices into the target asset table: present in target only.
    pub removed: Vec<u32>,
    /// (target index, source index): present in both, content hash or
    /// permissions differ.
    pub modified: Vec<(u32, u32)>,
}

impl VersionDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}

/// Classify every path across the two versions. Directories are diffed
/// as assets; a permission change alone is a modification.
pub fn create_version_diff(target: &VersionIndex, source: &VersionIndex) -> VersionDiff {
    let target_by_path: HashMap<&str, u32> = target
        .assets
        .iter()
        .enumerate()
        .map(|(i, a)| (a.path.as_str(), i as u32))
        .collect();
    let source_by_path: HashMap<&str, u32> = source
        .assets
        .iter()
        .enumerate()
        .map(|(i, a)| (a.path.as_str(), i as u32))
        .collect();

    let mut diff = VersionDiff::default();

    for (source_index, source_asset) in source.assets.iter().enumerate() {
        match target_by_path.get(source_asset.path.as_str()) {
            None => diff.added.push(source_index as u32),
            Some(&target_index) => {
                let target_asset = &target.assets[target_index as usize];
                if target_asset.content_hash != source_asset.content_hash
                    || target_asset.permissions != source_asset.permissions
                {
                    diff.modified.push((target_index, source_index as u32));
                }
            }
        }
    }
    for (target_index, target_asset) in target.assets.iter().enumerate() {
        if !source_by_path.contains_key(target_asset.path.as_str()) {
            diff.removed.push(target_index as u32);
        }
    }

    diff
}

/// The chunk hashes needed to materialise the diff's Added and Modified
/// assets from the source version.
pub fn required_chunk_hashes(source: &VersionIndex, diff: &VersionDiff) -> HashSet<ChunkHash> {
    let mut required = HashSet::new();
    for &source_index in diff
        .added
        .iter()
        .chain(diff.modified.iter().map(|(_, s)| s))
    {
        let asset = &source.assets[source_index as usize];
        required.extend(source.asset_chunk_hashes(asset));
    }
    required
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::version::AssetEntry;

    fn asset(path: &str, content_hash: u64, permissions: u16) -> AssetEntry {
        AssetEntry {
            path: path.into(),
            path_hash: 0,
            content_hash,
            size: 0,
            permissions,
            tag: 0,
            chunk_count: 0,
            chunk_index_start: 0,
        }
    }

    fn version(assets: Vec<AssetEntry>) -> VersionIndex {
        VersionIndex {
            hash_id: crate::hash::BLAKE3_HASH_ID,
            target_chunk_size: 32768,
            assets,
            chunk_hashes: Vec::new(),
            chunk_sizes: Vec::new(),
            asset_chunk_indexes: Vec::new(),
        }
    }

    #[test]
    fn classification() {
        let target = version(vec![
            asset("same.txt", 1, 0o644),
            asset("changed.txt", 2, 0o644),
            asset("gone.txt", 3, 0o644),
        ]);
        let source = version(vec![
            asset("same.txt", 1, 0o644),
            asset("changed.txt", 20, 0o644),
            asset("new.txt", 4, 0o644),
        ]);

        let diff = create_version_diff(&target, &source);
        assert_eq!(diff.added, vec![2]);
        assert_eq!(diff.removed, vec![2]);
        assert_eq!(diff.modified, vec![(1, 1)]);
    }

    #[test]
    fn permission_change_is_a_modification() {
        let target = version(vec![asset("dir/", 0, 0o755)]);
        let source = version(vec![asset("dir/", 0, 0o700)]);
        let diff = create_version_diff(&target, &source);
        assert_eq!(diff.modified.len(), 1);
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn identical_versions_diff_empty() {
        let v = version(vec![asset("a", 1, 0o644), asset("d/", 0, 0o755)]);
        assert!(create_version_diff(&v, &v).is_empty());
    }

    #[test]
    fn required_chunks_cover_added_and_modified_only() {
        let mut target = version(vec![asset("old.bin", 5, 0o644)]);
        let mut source = version(vec![asset("old.bin", 6, 0o644), asset("new.bin", 7, 0o644)]);

        source.chunk_hashes = vec![ChunkHash(10), ChunkHash(11), ChunkHash(12)];
        source.chunk_sizes = vec![1, 1, 1];
        source.asset_chunk_indexes = vec![0, 1, 2];
        source.assets[0].chunk_count = 2;
        source.assets[0].chunk_index_start = 0;
        source.assets[1].chunk_count = 1;
        source.assets[1].chunk_index_start = 2;

        target.chunk_hashes = vec![ChunkHash(10)];
        target.chunk_sizes = vec![1];
        target.asset_chunk_indexes = vec![0];
        target.assets[0].chunk_count = 1;

        let diff = create_version_diff(&target, &source);
        let required = required_chunk_hashes(&source, &diff);
        assert_eq!(
            required,
            [ChunkHash(10), ChunkHash(11), ChunkHash(12)]
                .into_iter()
                .collect()
        );
    }
}
