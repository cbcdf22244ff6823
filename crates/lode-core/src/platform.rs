use std::fs::Metadata;
use std::path::Path;

use crate::error::Result;

/// Extract the 16-bit permission bits recorded in a version index.
pub fn permission_bits(metadata: &Metadata) -> u16 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        (metadata.mode() & 0o7777) as u16
    }

    #[cfg(not(unix))]
    {
        if metadata.permissions().readonly() {
            if metadata.is_dir() {
                0o555
            } else {
                0o444
            }
        } else if metadata.is_dir() {
            0o755
        } else {
            0o644
        }
    }
}

/// Apply recorded permission bits to a path. No-op on platforms without
/// POSIX modes.
pub fn apply_permissions(path: &Path, mode: u16) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode as u32))?;
    }

    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }

    Ok(())
}
