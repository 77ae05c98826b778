//! Per-key serialization and session tests.

use slot_archive::{Archive, ArchiveConfig, ArchiveError};
use std::collections::HashSet;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// Long enough for a queued job to have run if nothing blocked it.
const BLOCKED: Duration = Duration::from_millis(200);

/// Upper bound for anything that should finish promptly.
const PROMPT: Duration = Duration::from_secs(10);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn test_archive(dir: &TempDir) -> Archive {
    init_tracing();
    Archive::open(ArchiveConfig {
        root: dir.path().join("archive"),
        sync_writes: false,
    })
    .unwrap()
}

fn fill(archive: &Archive, key: &str, versions: u8) {
    for i in 1..=versions {
        archive.archive_current_bytes(key, vec![i]).wait().unwrap();
    }
}

// --- Sessions ---

#[test]
fn test_session_walks_history_newest_first() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);
    fill(&archive, "k", 5);

    let mut session = archive.acquire_session("k").wait().unwrap().unwrap();
    assert_eq!(session.key(), "k");
    assert_eq!(session.archives_at_acquisition(), 4);

    let mut seen = Vec::new();
    loop {
        match session.next_bytes().wait() {
            Ok(bytes) => seen.push(bytes[0]),
            Err(ArchiveError::SessionAlreadyFinished) => break,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(seen, vec![5, 4, 3, 2, 1]);
    assert!(session.is_finished());
}

#[test]
fn test_session_is_pinned_to_acquisition_count() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);
    fill(&archive, "k", 6);

    let mut session = archive.acquire_session("k").wait().unwrap().unwrap();

    // Queued behind the session's lock.
    let archived = archive.archive_current_bytes("k", vec![11]);

    let mut count = 0;
    while session.next_bytes().wait().is_ok() {
        count += 1;
    }
    assert_eq!(count, 6);

    for _ in 0..3 {
        assert!(matches!(
            session.next_bytes().wait(),
            Err(ArchiveError::SessionAlreadyFinished)
        ));
    }

    // Finishing the walk released the lock.
    archived.wait_timeout(PROMPT).unwrap().unwrap();
    assert_eq!(archive.get_all_bytes("k").wait().unwrap().len(), 7);
}

#[test]
fn test_set_waits_for_open_session() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);
    archive.set_bytes("k", b"before".to_vec()).wait().unwrap();

    let mut session = archive.acquire_session("k").wait().unwrap().unwrap();
    let set = archive.set_bytes("k", b"after".to_vec());

    assert!(set.wait_timeout(BLOCKED).is_none());
    assert_eq!(session.next_bytes().wait().unwrap(), b"before");
    assert!(set.wait_timeout(BLOCKED).is_none());

    session.close();
    set.wait_timeout(PROMPT).unwrap().unwrap();

    assert_eq!(archive.get_bytes("k").wait().unwrap(), b"after");
    assert_eq!(archive.archive_count("k"), 0);
}

#[test]
fn test_dropped_session_releases_key() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);
    archive.set_bytes("k", b"v".to_vec()).wait().unwrap();

    let session = archive.acquire_session("k").wait().unwrap().unwrap();
    let set = archive.set_bytes("k", b"w".to_vec());
    assert!(set.wait_timeout(BLOCKED).is_none());

    drop(session);
    set.wait_timeout(PROMPT).unwrap().unwrap();
    assert_eq!(archive.get_bytes("k").wait().unwrap(), b"w");
}

#[test]
fn test_session_sees_writes_queued_before_it() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);
    archive.set_bytes("k", b"first".to_vec()).wait().unwrap();

    let _ = archive.set_bytes("k", b"second".to_vec());
    let mut session = archive.acquire_session("k").wait().unwrap().unwrap();

    assert_eq!(session.next_bytes().wait().unwrap(), b"second");
    session.close();
}

#[test]
fn test_session_on_unknown_key_is_none() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);

    assert!(archive.acquire_session("nobody").wait().unwrap().is_none());
}

#[test]
fn test_session_on_existing_directory_from_previous_run() {
    let dir = TempDir::new().unwrap();
    {
        let archive = test_archive(&dir);
        fill(&archive, "k", 2);
    }

    // Fresh instance: no lock entry yet, but the directory holds data.
    let archive = test_archive(&dir);
    let mut session = archive.acquire_session("k").wait().unwrap().unwrap();
    assert_eq!(session.next_bytes().wait().unwrap(), vec![2]);
    assert_eq!(session.next_bytes().wait().unwrap(), vec![1]);
    assert!(session.next_bytes().wait().is_err());
}

#[test]
fn test_other_keys_proceed_during_session() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);
    archive.set_bytes("a", b"a".to_vec()).wait().unwrap();

    let mut session = archive.acquire_session("a").wait().unwrap().unwrap();

    archive
        .set_bytes("b", b"b".to_vec())
        .wait_timeout(PROMPT)
        .unwrap()
        .unwrap();
    assert_eq!(archive.get_bytes("b").wait().unwrap(), b"b");

    session.close();
}

#[test]
fn test_closed_session_never_touches_disk() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);
    fill(&archive, "k", 3);

    let mut session = archive.acquire_session("k").wait().unwrap().unwrap();
    session.close();

    archive.delete("k").wait().unwrap();

    let next = session.next_bytes();
    assert!(next.is_ready());
    assert!(matches!(next.wait(), Err(ArchiveError::SessionAlreadyFinished)));
}

// --- Serialization ---

#[test]
fn test_concurrent_archiving_keeps_chain_contiguous() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);

    thread::scope(|scope| {
        for t in 0..8u8 {
            let archive = &archive;
            scope.spawn(move || {
                for i in 0..25u8 {
                    archive
                        .archive_current_bytes("shared", vec![t, i])
                        .wait()
                        .unwrap();
                }
            });
        }
    });

    let all = archive.get_all_bytes("shared").wait().unwrap();
    assert_eq!(all.len(), 200);
    assert_eq!(archive.archive_count("shared"), 199);

    let distinct: HashSet<_> = all.iter().collect();
    assert_eq!(distinct.len(), 200);

    // Each thread's own writes appear newest first.
    for t in 0..8u8 {
        let mine: Vec<u8> = all.iter().filter(|v| v[0] == t).map(|v| v[1]).collect();
        let expected: Vec<u8> = (0..25u8).rev().collect();
        assert_eq!(mine, expected);
    }
}

#[test]
fn test_concurrent_keep_and_archive() {
    let dir = TempDir::new().unwrap();
    let archive = test_archive(&dir);

    thread::scope(|scope| {
        let writer = &archive;
        scope.spawn(move || {
            for i in 0..50u8 {
                writer.archive_current_bytes("k", vec![i]).wait().unwrap();
            }
        });

        let keeper = &archive;
        scope.spawn(move || {
            for _ in 0..20 {
                keeper.keep("k", 3).wait().unwrap();
            }
        });
    });

    archive.keep("k", 3).wait().unwrap();
    let all = archive.get_all_bytes("k").wait().unwrap();
    assert_eq!(all, vec![vec![49], vec![48], vec![47], vec![46]]);
}
