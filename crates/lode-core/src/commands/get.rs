use std::path::Path;

use crate::blockstore::PipelineOptions;
use crate::commands::downsync::{downsync, DownsyncParams, DownsyncSummary};
use crate::config::GetConfig;
use crate::error::Result;

pub struct GetParams<'a> {
    /// URI of the get-config JSON document.
    pub get_config_path: &'a str,
    pub target_path: &'a Path,
    pub cache_path: Option<&'a Path>,
    pub retain_permissions: bool,
    pub validate: bool,
    pub include_filter_regex: Option<&'a str>,
    pub exclude_filter_regex: Option<&'a str>,
    pub pipeline: PipelineOptions,
}

/// Downsync a version described by a persisted get-config document.
pub fn get(params: &GetParams<'_>) -> Result<DownsyncSummary> {
    let config = GetConfig::read_from_uri(params.get_config_path)?;
    downsync(&DownsyncParams {
        storage_uri: &config.storage_uri,
        source_path: &config.source_path,
        target_path: params.target_path,
        version_local_store_index_path: config.version_local_store_index_path.as_deref(),
        cache_path: params.cache_path,
        retain_permissions: params.retain_permissions,
        validate: params.validate,
        include_filter_regex: params.include_filter_regex,
        exclude_filter_regex: params.exclude_filter_regex,
        pipeline: params.pipeline.clone(),
    })
}
