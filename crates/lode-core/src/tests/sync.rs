use std::path::Path;

use crate::commands::cp::{cp, CpParams};
use crate::commands::downsync::{downsync, DownsyncParams};
use crate::commands::get::{get, GetParams};
use crate::commands::print::print_version_index;
use crate::commands::upsync::{upsync, UpsyncParams};
use crate::config::GetConfig;
use crate::testutil::{count_store_blocks, read_tree, seeded_bytes, write_scenario_tree};

fn upsync_defaults<'a>(
    storage: &'a str,
    source: &'a Path,
    version: &'a str,
) -> UpsyncParams<'a> {
    UpsyncParams {
        storage_uri: storage,
        source_path: source,
        target_version_path: version,
        ..UpsyncParams::default()
    }
}

#[test]
fn s1_basic_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("A");
    let target = tmp.path().join("B");
    let store = tmp.path().join("store");
    let version = tmp.path().join("v1.lvi");
    write_scenario_tree(&source);

    let summary = upsync(&upsync_defaults(
        store.to_str().unwrap(),
        &source,
        version.to_str().unwrap(),
    ))
    .unwrap();
    assert!(version.exists());
    assert_eq!(summary.asset_count, 4); // 3 files + sub/
    assert!(summary.chunk_count >= 1);

    let compact = print_version_index(version.to_str().unwrap(), true, false).unwrap();
    assert!(compact.contains("asset_count=4"), "{compact}");

    downsync(&DownsyncParams {
        storage_uri: store.to_str().unwrap(),
        source_path: version.to_str().unwrap(),
        target_path: &target,
        validate: true,
        ..DownsyncParams::default()
    })
    .unwrap();

    assert_eq!(read_tree(&source), read_tree(&target));
}

#[test]
fn s2_dedup_across_versions() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("A");
    let source2 = tmp.path().join("A2");
    let store = tmp.path().join("store");
    write_scenario_tree(&source);
    write_scenario_tree(&source2);
    // A2 adds a byte-for-byte copy of b.bin.
    std::fs::copy(source2.join("b.bin"), source2.join("b2.bin")).unwrap();

    upsync(&upsync_defaults(
        store.to_str().unwrap(),
        &source,
        tmp.path().join("v1.lvi").to_str().unwrap(),
    ))
    .unwrap();
    let n1 = count_store_blocks(&store);
    assert!(n1 >= 1);

    let second = upsync(&upsync_defaults(
        store.to_str().unwrap(),
        &source2,
        tmp.path().join("v2.lvi").to_str().unwrap(),
    ))
    .unwrap();
    let n2 = count_store_blocks(&store);

    assert_eq!(second.blocks_written, 0);
    assert_eq!(n1, n2);
}

#[test]
fn uploading_same_tree_twice_writes_no_blocks() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("A");
    let store = tmp.path().join("store");
    write_scenario_tree(&source);

    upsync(&upsync_defaults(
        store.to_str().unwrap(),
        &source,
        tmp.path().join("v1.lvi").to_str().unwrap(),
    ))
    .unwrap();
    let again = upsync(&upsync_defaults(
        store.to_str().unwrap(),
        &source,
        tmp.path().join("v1-again.lvi").to_str().unwrap(),
    ))
    .unwrap();

    assert_eq!(again.blocks_written, 0);
}

#[test]
fn s3_incremental_change_writes_few_blocks() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("A");
    let store = tmp.path().join("store");
    write_scenario_tree(&source);

    upsync(&upsync_defaults(
        store.to_str().unwrap(),
        &source,
        tmp.path().join("v1.lvi").to_str().unwrap(),
    ))
    .unwrap();

    // Flip a single interior 64 KiB region of b.bin.
    let mut payload = seeded_bytes(1, 2 * 1024 * 1024);
    for b in &mut payload[1_000_000..1_000_000 + 64 * 1024] {
        *b ^= 0x5A;
    }
    std::fs::write(source.join("b.bin"), payload).unwrap();

    let second = upsync(&upsync_defaults(
        store.to_str().unwrap(),
        &source,
        tmp.path().join("v2.lvi").to_str().unwrap(),
    ))
    .unwrap();

    assert!(
        (1..=3).contains(&second.blocks_written),
        "expected 1-3 new blocks, wrote {}",
        second.blocks_written
    );
}

#[test]
fn downsync_updates_existing_target_in_place() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("A");
    let target = tmp.path().join("B");
    let store = tmp.path().join("store");
    write_scenario_tree(&source);

    let v1 = tmp.path().join("v1.lvi");
    upsync(&upsync_defaults(
        store.to_str().unwrap(),
        &source,
        v1.to_str().unwrap(),
    ))
    .unwrap();
    downsync(&DownsyncParams {
        storage_uri: store.to_str().unwrap(),
        source_path: v1.to_str().unwrap(),
        target_path: &target,
        ..DownsyncParams::default()
    })
    .unwrap();

    // New version: one file modified, one removed, one added.
    std::fs::write(source.join("a.txt"), vec![0x42; 2048]).unwrap();
    std::fs::remove_file(source.join("sub/c.txt")).unwrap();
    std::fs::write(source.join("d.txt"), b"fresh").unwrap();

    let v2 = tmp.path().join("v2.lvi");
    upsync(&upsync_defaults(
        store.to_str().unwrap(),
        &source,
        v2.to_str().unwrap(),
    ))
    .unwrap();

    let summary = downsync(&DownsyncParams {
        storage_uri: store.to_str().unwrap(),
        source_path: v2.to_str().unwrap(),
        target_path: &target,
        validate: true,
        ..DownsyncParams::default()
    })
    .unwrap();

    assert_eq!(read_tree(&source), read_tree(&target));
    assert_eq!(summary.removed_assets, 1);
    assert!(summary.added_assets >= 1);
}

#[test]
fn downsync_into_identical_target_is_a_noop() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("A");
    let target = tmp.path().join("B");
    let store = tmp.path().join("store");
    write_scenario_tree(&source);

    let v1 = tmp.path().join("v1.lvi");
    upsync(&upsync_defaults(
        store.to_str().unwrap(),
        &source,
        v1.to_str().unwrap(),
    ))
    .unwrap();

    for _ in 0..2 {
        downsync(&DownsyncParams {
            storage_uri: store.to_str().unwrap(),
            source_path: v1.to_str().unwrap(),
            target_path: &target,
            ..DownsyncParams::default()
        })
        .unwrap();
    }
    let summary = downsync(&DownsyncParams {
        storage_uri: store.to_str().unwrap(),
        source_path: v1.to_str().unwrap(),
        target_path: &target,
        ..DownsyncParams::default()
    })
    .unwrap();
    assert_eq!(summary.added_assets + summary.modified_assets + summary.removed_assets, 0);
}

#[cfg(unix)]
#[test]
fn round_trip_retains_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("A");
    let target = tmp.path().join("B");
    let store = tmp.path().join("store");
    write_scenario_tree(&source);
    std::fs::set_permissions(source.join("a.txt"), std::fs::Permissions::from_mode(0o750))
        .unwrap();

    let v1 = tmp.path().join("v1.lvi");
    upsync(&upsync_defaults(
        store.to_str().unwrap(),
        &source,
        v1.to_str().unwrap(),
    ))
    .unwrap();
    downsync(&DownsyncParams {
        storage_uri: store.to_str().unwrap(),
        source_path: v1.to_str().unwrap(),
        target_path: &target,
        validate: true,
        ..DownsyncParams::default()
    })
    .unwrap();

    let mode = std::fs::metadata(target.join("a.txt")).unwrap().permissions().mode();
    assert_eq!(mode & 0o7777, 0o750);
}

#[test]
fn version_local_store_index_seeds_downsync() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("A");
    let target = tmp.path().join("B");
    let store = tmp.path().join("store");
    let version = tmp.path().join("v1.lvi");
    let lsi = tmp.path().join("v1.lsi");
    write_scenario_tree(&source);

    upsync(&UpsyncParams {
        storage_uri: store.to_str().unwrap(),
        source_path: &source,
        target_version_path: version.to_str().unwrap(),
        version_local_store_index_path: Some(lsi.to_str().unwrap()),
        ..UpsyncParams::default()
    })
    .unwrap();
    assert!(lsi.exists());

    downsync(&DownsyncParams {
        storage_uri: store.to_str().unwrap(),
        source_path: version.to_str().unwrap(),
        target_path: &target,
        version_local_store_index_path: Some(lsi.to_str().unwrap()),
        validate: true,
        ..DownsyncParams::default()
    })
    .unwrap();

    assert_eq!(read_tree(&source), read_tree(&target));
}

#[test]
fn get_config_drives_downsync() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("A");
    let target = tmp.path().join("B");
    let store = tmp.path().join("store");
    let version = tmp.path().join("v1.lvi");
    let config_path = tmp.path().join("latest.json");
    write_scenario_tree(&source);

    upsync(&upsync_defaults(
        store.to_str().unwrap(),
        &source,
        version.to_str().unwrap(),
    ))
    .unwrap();

    GetConfig {
        storage_uri: store.to_str().unwrap().to_string(),
        source_path: version.to_str().unwrap().to_string(),
        version_local_store_index_path: None,
    }
    .write_to_uri(config_path.to_str().unwrap())
    .unwrap();

    get(&GetParams {
        get_config_path: config_path.to_str().unwrap(),
        target_path: &target,
        cache_path: None,
        retain_permissions: true,
        validate: true,
        include_filter_regex: None,
        exclude_filter_regex: None,
        pipeline: Default::default(),
    })
    .unwrap();

    assert_eq!(read_tree(&source), read_tree(&target));
}

#[test]
fn cp_extracts_one_asset() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("A");
    let store = tmp.path().join("store");
    let version = tmp.path().join("v1.lvi");
    write_scenario_tree(&source);

    upsync(&upsync_defaults(
        store.to_str().unwrap(),
        &source,
        version.to_str().unwrap(),
    ))
    .unwrap();

    let out = tmp.path().join("extracted.bin");
    let written = cp(&CpParams {
        storage_uri: store.to_str().unwrap(),
        version_index_path: version.to_str().unwrap(),
        source_asset_path: "b.bin",
        target_file_path: &out,
        cache_path: None,
        retain_permissions: true,
        pipeline: Default::default(),
    })
    .unwrap();

    assert_eq!(written, 2 * 1024 * 1024);
    assert_eq!(std::fs::read(out).unwrap(), seeded_bytes(1, 2 * 1024 * 1024));
}

#[test]
fn downsync_with_cache_populates_and_reuses_it() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("A");
    let store = tmp.path().join("store");
    let cache = tmp.path().join("cache");
    let version = tmp.path().join("v1.lvi");
    write_scenario_tree(&source);

    upsync(&upsync_defaults(
        store.to_str().unwrap(),
        &source,
        version.to_str().unwrap(),
    ))
    .unwrap();

    for target_name in ["B1", "B2"] {
        let target = tmp.path().join(target_name);
        downsync(&DownsyncParams {
            storage_uri: store.to_str().unwrap(),
            source_path: version.to_str().unwrap(),
            target_path: &target,
            cache_path: Some(&cache),
            validate: true,
            ..DownsyncParams::default()
        })
        .unwrap();
        assert_eq!(read_tree(&source), read_tree(&target));
    }

    assert!(count_store_blocks(&cache) >= 1);
}
