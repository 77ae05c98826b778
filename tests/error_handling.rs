//! Error handling and edge case tests.

use slot_archive::{
    Archive, ArchiveConfig, ArchiveError, ArchiveOutcome, JsonCodec, RawCodec, SlotStorage,
};
use std::collections::BTreeMap;
use std::fs;
use tempfile::TempDir;

fn test_archive(dir: &TempDir) -> Archive {
    Archive::open(ArchiveConfig {
        root: dir.path().join("archive"),
        sync_writes: false,
    })
    .unwrap()
}

// --- Archive Errors ---

#[test]
fn test_second_instance_is_locked() {
    let dir = TempDir::new().unwrap();
    let _archive = test_archive(&dir);

    let result = Archive::open(ArchiveConfig {
        root: dir.path().join("archive"),
        sync_writes: false,
    });
    assert!(matches!(result, Err(ArchiveError::Locked)));
}

#[test]
fn test_open_on_file_root_fails() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("not-a-dir");
    fs::write(&root, b"x").unwrap();

    let result = Archive::open(ArchiveConfig::at(root));
    assert!(matches!(result, Err(ArchiveError::Io(_))));
}

// --- Retention Errors ---

#[test]
fn test_keep_zero_is_invalid() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);

    let completion = archive.keep("k", 0);
    // Rejected before anything is queued.
    assert!(completion.is_ready());
    assert!(matches!(completion.wait(), Err(ArchiveError::InvalidLimit(0))));
    assert!(!archive.root().join("k").exists());
}

#[test]
fn test_keep_reports_failed_move() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);

    for i in 1..=4u8 {
        archive.archive_current_bytes("k", vec![i]).wait().unwrap();
    }
    // Parking slot 1 fails when its fallback path is a non-empty directory.
    fs::create_dir_all(archive.root().join("k").join("1.tmp").join("x")).unwrap();

    let result = archive.keep("k", 1).wait();
    assert!(matches!(result, Err(ArchiveError::MoveFailed { .. })));

    // Nothing moved, so the chain is intact.
    assert_eq!(
        archive.get_all_bytes("k").wait().unwrap(),
        vec![vec![4], vec![3], vec![2], vec![1]]
    );
}

#[test]
fn test_keep_does_not_replace_stale_fallback() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);

    for i in 1..=4u8 {
        archive.archive_current_bytes("k", vec![i]).wait().unwrap();
    }
    // Left behind by an earlier crash.
    fs::write(archive.root().join("k").join("1.tmp"), b"stale").unwrap();

    let result = archive.keep("k", 1).wait();
    assert!(matches!(result, Err(ArchiveError::MoveFailed { .. })));
    assert_eq!(fs::read(archive.root().join("k").join("1.tmp")).unwrap(), b"stale");
    assert_eq!(
        archive.get_all_bytes("k").wait().unwrap(),
        vec![vec![4], vec![3], vec![2], vec![1]]
    );
}

// --- Write Errors ---

#[test]
fn test_write_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);

    // The key's directory path is taken by a regular file.
    fs::write(archive.root().join("blocked"), b"x").unwrap();

    let result = archive.set_bytes("blocked", b"v".to_vec()).wait();
    assert!(matches!(result, Err(ArchiveError::WriteFailed { .. })));

    let result = archive
        .archive_current_bytes("blocked", b"v".to_vec())
        .wait();
    assert!(matches!(result, Err(ArchiveError::WriteFailed { .. })));
}

#[test]
fn test_set_tolerates_failed_move_to_fallback() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);

    archive.set_bytes("k", b"old".to_vec()).wait().unwrap();
    fs::create_dir_all(archive.root().join("k").join("0.tmp").join("x")).unwrap();

    archive.set_bytes("k", b"new".to_vec()).wait().unwrap();
    assert_eq!(archive.get_bytes("k").wait().unwrap(), b"new");
}

#[test]
fn test_archive_partially() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);

    archive.set_bytes("k", b"old".to_vec()).wait().unwrap();
    fs::create_dir_all(archive.root().join("k").join("1.dat").join("x")).unwrap();

    let outcome = archive
        .archive_current_bytes("k", b"new".to_vec())
        .wait()
        .unwrap();
    match outcome {
        ArchiveOutcome::ArchivedPartially { from, to } => {
            assert_eq!(from, archive.root().join("k").join("0.dat"));
            assert_eq!(to, archive.root().join("k").join("1.dat"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(archive.get_bytes("k").wait().unwrap(), b"new");
}

#[test]
fn test_archive_current_never_overwrites_archive_in_gapped_chain() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);

    // Slot 2 is missing, so the next archive index (count + 1) is taken.
    let slots = SlotStorage::new(archive.root().join("k"), false);
    slots.write(0, b"cur").unwrap();
    slots.write(1, b"a1").unwrap();
    slots.write(3, b"a3").unwrap();

    let outcome = archive
        .archive_current_bytes("k", b"new".to_vec())
        .wait()
        .unwrap();
    assert_eq!(
        outcome,
        ArchiveOutcome::ArchivedPartially {
            from: slots.primary_path(0),
            to: slots.primary_path(3),
        }
    );

    assert_eq!(slots.read_bytes(3).unwrap(), b"a3");
    assert_eq!(slots.read_bytes(1).unwrap(), b"a1");
    assert_eq!(archive.get_bytes("k").wait().unwrap(), b"new");
}

#[test]
fn test_encode_failure() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);

    // JSON object keys must be strings.
    let mut map = BTreeMap::new();
    map.insert((1u32, 2u32), 3u32);

    let result = archive
        .set_value::<JsonCodec<BTreeMap<(u32, u32), u32>>>("map", &map)
        .wait();
    assert!(matches!(result, Err(ArchiveError::Serialization(_))));
    assert!(!archive.root().join("map").exists());
}

// --- Read Errors ---

#[test]
fn test_decode_failure_names_codec() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);

    archive.set_bytes("k", b"definitely not json".to_vec()).wait().unwrap();

    let result = archive.get_value::<JsonCodec<u32>>("k").wait();
    match result {
        Err(ArchiveError::DecodeFailed { path, codec }) => {
            assert_eq!(path, archive.root().join("k").join("0.dat"));
            assert_eq!(codec, "json");
        }
        other => panic!("unexpected result: {:?}", other),
    }

    // The raw bytes are still there.
    assert!(archive.get_value::<RawCodec>("k").wait().is_ok());
}

#[test]
fn test_get_all_decode_failure_in_archive() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);

    archive.archive_current_bytes("k", b"oops".to_vec()).wait().unwrap();
    archive.archive_current_bytes("k", b"1".to_vec()).wait().unwrap();

    let result = archive.get_all_values::<JsonCodec<u32>>("k").wait();
    assert!(matches!(result, Err(ArchiveError::DecodeFailed { .. })));
}

#[test]
fn test_delete_key_failure() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);

    fs::write(archive.root().join("file-key"), b"x").unwrap();

    let result = archive.delete("file-key").wait();
    assert!(matches!(result, Err(ArchiveError::DeleteKeyFailed { .. })));
}
