use std::fmt::Write;

use crate::commands::util::{read_store_index, read_version_index};
use crate::compress;
use crate::error::Result;
use crate::hash::hash_name;

/// Render a `.lvi` as text. `compact` gives the one-line summary the
/// scenario tests scrape; `details` appends the asset table.
pub fn print_version_index(path: &str, compact: bool, details: bool) -> Result<String> {
    let index = read_version_index(path)?;
    let mut out = String::new();

    if compact {
        writeln!(
            out,
            "{path}: asset_count={} chunk_count={} hash={} target_chunk_size={}",
            index.assets.len(),
            index.chunk_hashes.len(),
            hash_name(index.hash_id),
            index.target_chunk_size,
        )
        .unwrap();
    } else {
        writeln!(out, "Version Index:       {path}").unwrap();
        writeln!(out, "Hash Algorithm:      {}", hash_name(index.hash_id)).unwrap();
        writeln!(out, "Target Chunk Size:   {}", index.target_chunk_size).unwrap();
        writeln!(out, "Asset Count:         {}", index.assets.len()).unwrap();
        writeln!(out, "Chunk Count:         {}", index.chunk_hashes.len()).unwrap();
        writeln!(out, "Total Asset Size:    {}", index.total_asset_size()).unwrap();
    }

    if details {
        for asset in &index.assets {
            writeln!(
                out,
                "{:>12} {:o} {:>6} chunks {:016x} {}",
                asset.size, asset.permissions, asset.chunk_count, asset.content_hash, asset.path
            )
            .unwrap();
        }
    }
    Ok(out)
}

/// Render a `.lsi` as text.
pub fn print_store_index(path: &str, compact: bool, details: bool) -> Result<String> {
    let index = read_store_index(path)?;
    let mut out = String::new();

    if compact {
        writeln!(
            out,
            "{path}: block_count={} chunk_count={} hash={}",
            index.block_count(),
            index.chunk_count(),
            hash_name(index.hash_id),
        )
        .unwrap();
    } else {
        writeln!(out, "Store Index:         {path}").unwrap();
        writeln!(out, "Hash Algorithm:      {}", hash_name(index.hash_id)).unwrap();
        writeln!(out, "Block Count:         {}", index.block_count()).unwrap();
        writeln!(out, "Chunk Count:         {}", index.chunk_count()).unwrap();
    }

    if details {
        for block in &index.blocks {
            writeln!(
                out,
                "{} {:>5} chunks {:>12} bytes {}",
                block.block_hash,
                block.chunk_count(),
                block.uncompressed_size(),
                compress::name_for_tag(block.tag),
            )
            .unwrap();
        }
    }
    Ok(out)
}
