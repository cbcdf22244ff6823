pub mod local;
pub mod uri;

use std::sync::Arc;

use crate::error::{LodeError, Result};

/// Opaque write-generation token for optimistic concurrency. A blob's
/// generation changes on every successful write.
pub type Generation = u64;

/// Outcome of a conditional put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalPut {
    /// The write landed; the blob now has this generation.
    Stored(Generation),
    /// Another writer got there first; re-read and retry.
    Conflict,
}

/// Flat key→bytes object store. Keys are `/`-separated paths
/// (e.g. "chunks/ab/ab01...cd.lrb").
pub trait BlobStore: Send + Sync {
    /// Read a blob. Returns `None` if not found.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Read a blob together with its current generation token.
    fn get_with_generation(&self, key: &str) -> Result<Option<(Vec<u8>, Generation)>>;

    /// Write a blob unconditionally. Overwrites if present.
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Write a blob only if its current generation matches `expected`.
    /// `expected = None` means "only if the blob does not exist yet".
    fn put_if_match(
        &self,
        key: &str,
        data: &[u8],
        expected: Option<Generation>,
    ) -> Result<ConditionalPut>;

    /// Delete a blob. Deleting a missing blob is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Check whether a blob exists.
    fn exists(&self, key: &str) -> Result<bool>;

    /// List all keys under a prefix, full key paths.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

impl BlobStore for Arc<dyn BlobStore> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }
    fn get_with_generation(&self, key: &str) -> Result<Option<(Vec<u8>, Generation)>> {
        (**self).get_with_generation(key)
    }
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        (**self).put(key, data)
    }
    fn put_if_match(
        &self,
        key: &str,
        data: &[u8],
        expected: Option<Generation>,
    ) -> Result<ConditionalPut> {
        (**self).put_if_match(key, data, expected)
    }
    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }
    fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key)
    }
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list(prefix)
    }
}

/// Parsed storage URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedUri {
    /// Local filesystem path.
    Local { path: String },
    /// Google Cloud Storage bucket + prefix.
    Gcs { bucket: String, prefix: String },
    /// S3 bucket + prefix.
    S3 { bucket: String, prefix: String },
}

/// Parse a storage URI.
///
/// Supported forms:
/// - Bare path (`/stores/main`, `./store`, `store`) -> `Local`
/// - `fsblob:///stores/main`, `file:///stores/main` -> `Local`
/// - `gs://bucket/prefix` -> `Gcs`
/// - `s3://bucket/prefix` -> `S3`
/// - `abfs://` / `abfss://` are reserved and rejected
pub fn parse_storage_uri(raw: &str) -> Result<ParsedUri> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(LodeError::InvalidArgument(
            "storage URI must not be empty".into(),
        ));
    }

    if !trimmed.contains("://") {
        return Ok(ParsedUri::Local {
            path: trimmed.to_string(),
        });
    }

    let url = url::Url::parse(trimmed)
        .map_err(|e| LodeError::InvalidArgument(format!("invalid storage URI '{trimmed}': {e}")))?;

    match url.scheme() {
        "fsblob" | "file" => {
            // fsblob://host-less paths keep everything after the scheme.
            let host = url.host_str().unwrap_or("");
            let path = format!("{host}{}", url.path());
            if path.is_empty() {
                return Err(LodeError::InvalidArgument(format!(
                    "'{trimmed}' has an empty path"
                )));
            }
            Ok(ParsedUri::Local { path })
        }
        "gs" => parse_bucket_uri(&url, trimmed).map(|(bucket, prefix)| ParsedUri::Gcs {
            bucket,
            prefix,
        }),
        "s3" => parse_bucket_uri(&url, trimmed).map(|(bucket, prefix)| ParsedUri::S3 {
            bucket,
            prefix,
        }),
        "abfs" | "abfss" => Err(LodeError::UnsupportedBackend(format!(
            "{} (reserved, not implemented)",
            url.scheme()
        ))),
        other => Err(LodeError::InvalidArgument(format!(
            "unsupported URI scheme: '{other}'"
        ))),
    }
}

fn parse_bucket_uri(url: &url::Url, raw: &str) -> Result<(String, String)> {
    let bucket = url
        .host_str()
        .ok_or_else(|| LodeError::InvalidArgument(format!("'{raw}' is missing a bucket")))?;
    let prefix = url.path().trim_start_matches('/').to_string();
    Ok((bucket.to_string(), prefix))
}

/// Build a blob store for a storage URI. Cloud backends are
/// feature-gated; this build serves local stores.
pub fn blob_store_for_uri(raw: &str) -> Result<Arc<dyn BlobStore>> {
    match parse_storage_uri(raw)? {
        ParsedUri::Local { path } => Ok(Arc::new(local::LocalBlobStore::new(&path)?)),
        ParsedUri::Gcs { .. } => Err(LodeError::UnsupportedBackend(
            "gs (compile with feature 'backend-gcs')".into(),
        )),
        ParsedUri::S3 { .. } => Err(LodeError::UnsupportedBackend(
            "s3 (compile with feature 'backend-s3')".into(),
        )),
    }
}
