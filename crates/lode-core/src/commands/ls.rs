use std::collections::BTreeSet;
use std::fmt::Write;

use crate::commands::util::read_version_index;
use crate::error::Result;

/// List the immediate entries of one directory level inside a version
/// index, like `ls` against the snapshot. An empty `dir` lists the
/// root.
pub fn ls(version_index_path: &str, dir: &str) -> Result<String> {
    let index = read_version_index(version_index_path)?;

    let mut prefix = dir.trim_start_matches('/').to_string();
    if !prefix.is_empty() && !prefix.ends_with('/') {
        prefix.push('/');
    }

    let mut entries = BTreeSet::new();
    for asset in &index.assets {
        let Some(rest) = asset.path.strip_prefix(&prefix) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        match rest.split_once('/') {
            // Direct child file.
            None => {
                entries.insert(rest.to_string());
            }
            // Direct child directory (its own slash-terminated asset, or
            // implied by a deeper path).
            Some((child, _)) => {
                entries.insert(format!("{child}/"));
            }
        }
    }

    let mut out = String::new();
    for entry in entries {
        writeln!(out, "{entry}").unwrap();
    }
    Ok(out)
}
