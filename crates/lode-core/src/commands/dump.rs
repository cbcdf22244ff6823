use std::fmt::Write;

use crate::commands::util::read_version_index;
use crate::error::Result;

/// List every asset path in a version index, one per line; `details`
/// prefixes sizes and permissions.
pub fn dump(version_index_path: &str, details: bool) -> Result<String> {
    let index = read_version_index(version_index_path)?;
    let mut out = String::new();
    for asset in &index.assets {
        if details {
            writeln!(out, "{:>12} {:o} {}", asset.size, asset.permissions, asset.path).unwrap();
        } else {
            writeln!(out, "{}", asset.path).unwrap();
        }
    }
    Ok(out)
}
