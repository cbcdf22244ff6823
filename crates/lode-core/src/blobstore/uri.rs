//! Whole-file reads and writes addressed by URI, used for version
//! indices, store-index side-files, and get-config documents.

use std::fs;
use std::path::Path;

use crate::blobstore::{parse_storage_uri, ParsedUri};
use crate::error::{LodeError, Result};

/// Read the entire blob at a URI (or bare local path).
pub fn read_uri(raw: &str) -> Result<Vec<u8>> {
    match parse_storage_uri(raw)? {
        ParsedUri::Local { path } => match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LodeError::NotFound(raw.to_string()))
            }
            Err(e) => Err(e.into()),
        },
        ParsedUri::Gcs { .. } => Err(LodeError::UnsupportedBackend(
            "gs (compile with feature 'backend-gcs')".into(),
        )),
        ParsedUri::S3 { .. } => Err(LodeError::UnsupportedBackend(
            "s3 (compile with feature 'backend-s3')".into(),
        )),
    }
}

/// Write an entire blob at a URI (or bare local path), atomically for
/// local targets.
pub fn write_uri(raw: &str, data: &[u8]) -> Result<()> {
    match parse_storage_uri(raw)? {
        ParsedUri::Local { path } => {
            let path = Path::new(&path);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let file_name = path
                .file_name()
                .ok_or_else(|| LodeError::InvalidArgument(format!("bad target path '{raw}'")))?
                .to_string_lossy();
            let tmp = path.with_file_name(format!(
                ".{file_name}.tmp-{}",
                std::process::id()
            ));
            fs::write(&tmp, data)?;
            match fs::rename(&tmp, path) {
                Ok(()) => Ok(()),
                Err(e) => {
                    let _ = fs::remove_file(&tmp);
                    Err(e.into())
                }
            }
        }
        ParsedUri::Gcs { .. } => Err(LodeError::UnsupportedBackend(
            "gs (compile with feature 'backend-gcs')".into(),
        )),
        ParsedUri::S3 { .. } => Err(LodeError::UnsupportedBackend(
            "s3 (compile with feature 'backend-s3')".into(),
        )),
    }
}
