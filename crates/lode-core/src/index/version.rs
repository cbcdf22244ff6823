use std::collections::HashSet;

use crate::error::{LodeError, Result};
use crate::index::wire::{put_u16, put_u32, put_u64, Reader};
use lode_types::ChunkHash;

pub const VERSION_INDEX_MAGIC: u32 = u32::from_le_bytes(*b"lvi0");
pub const VERSION_INDEX_VERSION: u32 = 1;

/// One file or directory entry in a version snapshot. Directory paths
/// are slash-terminated; directories and zero-length files reference no
/// chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub path: String,
    pub path_hash: u64,
    /// Hash of the asset's ordered chunk hashes, not of its bytes.
    pub content_hash: u64,
    pub size: u64,
    pub permissions: u16,
    /// Compression tag requested for this asset's content at upsync.
    pub tag: u32,
    pub chunk_count: u32,
    pub chunk_index_start: u32,
}

impl AssetEntry {
    pub fn is_directory(&self) -> bool {
        self.path.ends_with('/')
    }
}

/// Per-snapshot manifest: the asset table, the deduplicated chunk
/// table, and the flat asset→chunk index sequence the per-asset ranges
/// point into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionIndex {
    pub hash_id: u32,
    pub target_chunk_size: u32,
    pub assets: Vec<AssetEntry>,
    pub chunk_hashes: Vec<ChunkHash>,
    pub chunk_sizes: Vec<u32>,
    pub asset_chunk_indexes: Vec<u32>,
}

impl VersionIndex {
    /// The ordered chunk-table indices for one asset.
    pub fn asset_chunk_indexes(&self, asset: &AssetEntry) -> &[u32] {
        let start = asset.chunk_index_start as usize;
        let end = start + asset.chunk_count as usize;
        &self.asset_chunk_indexes[start..end]
    }

    /// The ordered chunk hashes for one asset.
    pub fn asset_chunk_hashes<'a>(
        &'a self,
        asset: &AssetEntry,
    ) -> impl Iterator<Item = ChunkHash> + 'a {
        self.asset_chunk_indexes(asset)
            .iter()
            .map(move |&i| self.chunk_hashes[i as usize])
    }

    pub fn chunk_hash_set(&self) -> HashSet<ChunkHash> {
        self.chunk_hashes.iter().copied().collect()
    }

    pub fn find_asset(&self, path: &str) -> Option<&AssetEntry> {
        self.assets.iter().find(|a| a.path == path)
    }

    pub fn total_asset_size(&self) -> u64 {
        self.assets.iter().map(|a| a.size).sum()
    }

    /// Serialize to the `.lvi` wire format.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut pool = Vec::new();
        let mut name_offsets = Vec::with_capacity(self.assets.len());
        for asset in &self.assets {
            name_offsets.push(pool.len() as u32);
            pool.extend_from_slice(asset.path.as_bytes());
            pool.push(0);
        }

        let mut buf = Vec::new();
        put_u32(&mut buf, VERSION_INDEX_MAGIC);
        put_u32(&mut buf, VERSION_INDEX_VERSION);
        put_u32(&mut buf, self.hash_id);
        put_u32(&mut buf, self.target_chunk_size);
        put_u32(&mut buf, self.assets.len() as u32);
        put_u32(&mut buf, self.chunk_hashes.len() as u32);
        put_u32(&mut buf, self.asset_chunk_indexes.len() as u32);
        put_u32(&mut buf, pool.len() as u32);

        for (asset, name_offset) in self.assets.iter().zip(&name_offsets) {
            put_u64(&mut buf, asset.path_hash);
            put_u64(&mut buf, asset.content_hash);
            put_u64(&mut buf, asset.size);
            put_u16(&mut buf, asset.permissions);
            put_u32(&mut buf, asset.tag);
            put_u32(&mut buf, asset.chunk_count);
            put_u32(&mut buf, asset.chunk_index_start);
            put_u32(&mut buf, *name_offset);
        }
        for hash in &self.chunk_hashes {
            put_u64(&mut buf, hash.0);
        }
        for size in &self.chunk_sizes {
            put_u32(&mut buf, *size);
        }
        for index in &self.asset_chunk_indexes {
            put_u32(&mut buf, *index);
        }
        buf.extend_from_slice(&pool);
        buf
    }

    /// Decode from the `.lvi` wire format, rejecting unknown versions
    /// and out-of-bounds index ranges.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "version index");

        let magic = r.read_u32()?;
        if magic != VERSION_INDEX_MAGIC {
            return Err(LodeError::CorruptIndex(format!(
                "version index: bad magic {magic:#010x}"
            )));
        }
        let version = r.read_u32()?;
        if version != VERSION_INDEX_VERSION {
            return Err(LodeError::CorruptIndex(format!(
                "version index: unsupported version {version}"
            )));
        }

        let hash_id = r.read_u32()?;
        let target_chunk_size = r.read_u32()?;
        let asset_count = r.read_u32()? as usize;
        let chunk_count = r.read_u32()? as usize;
        let asset_chunk_index_count = r.read_u32()? as usize;
        let pool_size = r.read_u32()? as usize;

        struct RawAsset {
            path_hash: u64,
            content_hash: u64,
            size: u64,
            permissions: u16,
            tag: u32,
            chunk_count: u32,
            chunk_index_start: u32,
            name_offset: u32,
        }

        let mut raw_assets = Vec::with_capacity(asset_count);
        for _ in 0..asset_count {
            raw_assets.push(RawAsset {
                path_hash: r.read_u64()?,
                content_hash: r.read_u64()?,
                size: r.read_u64()?,
                permissions: r.read_u16()?,
                tag: r.read_u32()?,
                chunk_count: r.read_u32()?,
                chunk_index_start: r.read_u32()?,
                name_offset: r.read_u32()?,
            });
        }

        let mut chunk_hashes = Vec::with_capacity(chunk_count);
        for _ in 0..chunk_count {
            chunk_hashes.push(ChunkHash(r.read_u64()?));
        }
        let mut chunk_sizes = Vec::with_capacity(chunk_count);
        for _ in 0..chunk_count {
            chunk_sizes.push(r.read_u32()?);
        }
        let mut asset_chunk_indexes = Vec::with_capacity(asset_chunk_index_count);
        for _ in 0..asset_chunk_index_count {
            let index = r.read_u32()?;
            if index as usize >= chunk_count {
                return Err(LodeError::CorruptIndex(format!(
                    "version index: chunk index {index} out of range ({chunk_count} chunks)"
                )));
            }
            asset_chunk_indexes.push(index);
        }

        let pool = r.read_bytes(pool_size)?;
        r.expect_end()?;

        let mut assets = Vec::with_capacity(asset_count);
        for raw in raw_assets {
            let start = raw.chunk_index_start as usize;
            if start
                .checked_add(raw.chunk_count as usize)
                .map_or(true, |end| end > asset_chunk_index_count)
            {
                return Err(LodeError::CorruptIndex(
                    "version index: asset chunk range out of bounds".into(),
                ));
            }

            let name_start = raw.name_offset as usize;
            let tail = pool.get(name_start..).ok_or_else(|| {
                LodeError::CorruptIndex("version index: path offset out of bounds".into())
            })?;
            let name_end = tail
                .iter()
                .position(|&b| b == 0)
                .map(|p| name_start + p)
                .ok_or_else(|| {
                    LodeError::CorruptIndex("version index: unterminated path string".into())
                })?;
            let path = std::str::from_utf8(&pool[name_start..name_end])
                .map_err(|_| {
                    LodeError::CorruptIndex("version index: non-UTF8 path string".into())
                })?
                .to_string();

            assets.push(AssetEntry {
                path,
                path_hash: raw.path_hash,
                content_hash: raw.content_hash,
                size: raw.size,
                permissions: raw.permissions,
                tag: raw.tag,
                chunk_count: raw.chunk_count,
                chunk_index_start: raw.chunk_index_start,
            });
        }

        Ok(Self {
            hash_id,
            target_chunk_size,
            assets,
            chunk_hashes,
            chunk_sizes,
            asset_chunk_indexes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> VersionIndex {
        VersionIndex {
            hash_id: crate::hash::BLAKE3_HASH_ID,
            target_chunk_size: 32768,
            assets: vec![
                AssetEntry {
                    path: "a.txt".into(),
                    path_hash: 0x1111,
                    content_hash: 0x2222,
                    size: 100,
                    permissions: 0o644,
                    tag: 0,
                    chunk_count: 2,
                    chunk_index_start: 0,
                },
                AssetEntry {
                    path: "sub/".into(),
                    path_hash: 0x3333,
                    content_hash: 0,
                    size: 0,
                    permissions: 0o755,
                    tag: 0,
                    chunk_count: 0,
                    chunk_index_start: 2,
                },
            ],
            chunk_hashes: vec![ChunkHash(0xAA), ChunkHash(0xBB)],
            chunk_sizes: vec![60, 40],
            asset_chunk_indexes: vec![0, 1],
        }
    }

    #[test]
    fn wire_roundtrip() {
        let index = sample_index();
        let decoded = VersionIndex::from_slice(&index.to_vec()).unwrap();
        assert_eq!(decoded, index);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample_index().to_vec();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            VersionIndex::from_slice(&bytes),
            Err(LodeError::CorruptIndex(_))
        ));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = sample_index().to_vec();
        bytes[4] = 99;
        assert!(matches!(
            VersionIndex::from_slice(&bytes),
            Err(LodeError::CorruptIndex(_))
        ));
    }

    #[test]
    fn rejects_truncation() {
        let bytes = sample_index().to_vec();
        for cut in [3, 8, 20, bytes.len() - 1] {
            assert!(
                VersionIndex::from_slice(&bytes[..cut]).is_err(),
                "cut at {cut} accepted"
            );
        }
    }

    #[test]
    fn rejects_out_of_range_chunk_index() {
        let mut index = sample_index();
        index.asset_chunk_indexes[1] = 7;
        let bytes = index.to_vec();
        assert!(matches!(
            VersionIndex::from_slice(&bytes),
            Err(LodeError::CorruptIndex(_))
        ));
    }

    #[test]
    fn asset_chunk_lookup() {
        let index = sample_index();
        let hashes: Vec<_> = index.asset_chunk_hashes(&index.assets[0]).collect();
        assert_eq!(hashes, vec![ChunkHash(0xAA), ChunkHash(0xBB)]);
        assert!(index
            .asset_chunk_hashes(&index.assets[1])
            .next()
            .is_none());
    }

    #[test]
    fn directory_detection() {
        let index = sample_index();
        assert!(!index.assets[0].is_directory());
        assert!(index.assets[1].is_directory());
    }
}
