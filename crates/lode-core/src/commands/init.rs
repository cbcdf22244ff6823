use crate::blobstore::blob_store_for_uri;
use crate::blockstore::remote::RemoteBlockStore;
use crate::config::RetryConfig;
use crate::error::Result;
use crate::hash::hash_api_for_name;

pub struct InitParams<'a> {
    pub storage_uri: &'a str,
    pub hash_algorithm: &'a str,
}

/// Initialize a remote store: make sure the canonical store index blob
/// exists so later readers see an empty index instead of nothing.
pub fn init(params: &InitParams<'_>) -> Result<()> {
    let hash = hash_api_for_name(params.hash_algorithm)?;
    let blob = blob_store_for_uri(params.storage_uri)?;
    let remote = RemoteBlockStore::new(blob, hash, RetryConfig::default());
    remote.ensure_store_index()
}
