use std::path::Path;

use crate::commands::prune::{prune_store, PruneParams};
use crate::commands::upsync::{upsync, UpsyncParams};
use crate::commands::validate::{validate, ValidateParams};
use crate::error::LodeError;
use crate::testutil::{count_store_blocks, seeded_bytes, write_scenario_tree};

fn upsync_tree(store: &Path, source: &Path, version: &Path) {
    upsync(&UpsyncParams {
        storage_uri: store.to_str().unwrap(),
        source_path: source,
        target_version_path: version.to_str().unwrap(),
        ..UpsyncParams::default()
    })
    .unwrap();
}

fn validate_version(store: &Path, version: &Path) -> crate::error::Result<()> {
    validate(&ValidateParams {
        storage_uri: store.to_str().unwrap(),
        version_index_path: version.to_str().unwrap(),
        pipeline: Default::default(),
    })
    .map(|_| ())
}

/// Three distinct versions of the scenario tree in one store.
fn three_versions(tmp: &Path) -> (std::path::PathBuf, Vec<std::path::PathBuf>) {
    let source = tmp.join("A");
    let store = tmp.join("store");
    write_scenario_tree(&source);

    let mut versions = Vec::new();
    for i in 1..=3u64 {
        std::fs::write(source.join("churn.bin"), seeded_bytes(100 + i, 256 * 1024)).unwrap();
        let version = tmp.join(format!("v{i}.lvi"));
        upsync_tree(&store, &source, &version);
        versions.push(version);
    }
    (store, versions)
}

#[test]
fn s4_validate_fails_after_block_deletion() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("A");
    let store = tmp.path().join("store");
    let version = tmp.path().join("v1.lvi");
    write_scenario_tree(&source);
    upsync_tree(&store, &source, &version);

    validate_version(&store, &version).unwrap();

    // Delete one block file out from under the store.
    let victim = walkdir::WalkDir::new(store.join("chunks"))
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file())
        .unwrap();
    std::fs::remove_file(victim.path()).unwrap();

    let err = validate_version(&store, &version).unwrap_err();
    assert!(matches!(err, LodeError::MissingContent { .. }), "{err}");
}

#[test]
fn s5_prune_keeps_named_versions_only() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, versions) = three_versions(tmp.path());

    let keep: Vec<String> = [&versions[0], &versions[2]]
        .iter()
        .map(|p| p.to_str().unwrap().to_string())
        .collect();
    let summary = prune_store(&PruneParams {
        storage_uri: store.to_str().unwrap(),
        source_paths: &keep,
        version_local_store_index_paths: None,
        write_version_local_store_index: false,
        dry_run: false,
        hash_algorithm: "blake3",
        pipeline: Default::default(),
    })
    .unwrap();

    assert!(!summary.dry_run);
    assert!(summary.pruned_blocks >= 1);
    assert_eq!(count_store_blocks(&store), summary.kept_blocks);

    validate_version(&store, &versions[0]).unwrap();
    validate_version(&store, &versions[2]).unwrap();
    let err = validate_version(&store, &versions[1]).unwrap_err();
    assert!(matches!(err, LodeError::MissingContent { .. }), "{err}");
}

#[test]
fn prune_dry_run_deletes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, versions) = three_versions(tmp.path());
    let before = count_store_blocks(&store);

    let keep: Vec<String> = vec![versions[0].to_str().unwrap().to_string()];
    let summary = prune_store(&PruneParams {
        storage_uri: store.to_str().unwrap(),
        source_paths: &keep,
        version_local_store_index_paths: None,
        write_version_local_store_index: false,
        dry_run: true,
        hash_algorithm: "blake3",
        pipeline: Default::default(),
    })
    .unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.pruned_blocks, 0);
    assert_eq!(count_store_blocks(&store), before);
    for version in &versions {
        validate_version(&store, version).unwrap();
    }
}

#[test]
fn prune_rejects_mismatched_list_lengths() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, versions) = three_versions(tmp.path());

    let sources: Vec<String> = versions
        .iter()
        .map(|p| p.to_str().unwrap().to_string())
        .collect();
    let lsis = vec!["only-one.lsi".to_string()];
    let err = prune_store(&PruneParams {
        storage_uri: store.to_str().unwrap(),
        source_paths: &sources,
        version_local_store_index_paths: Some(&lsis),
        write_version_local_store_index: false,
        dry_run: false,
        hash_algorithm: "blake3",
        pipeline: Default::default(),
    })
    .unwrap_err();
    assert!(matches!(err, LodeError::InvalidArgument(_)), "{err}");
}
