//! End-to-end listener tests over the polling backend, which behaves the
//! same on every platform and exercises the full diff pipeline.

use crossbeam_channel::{unbounded, Receiver};
use filetime::FileTime;
use lookout::{watch, Config, Listener};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

type Batch = (Vec<PathBuf>, Vec<PathBuf>, Vec<PathBuf>);

fn fast_polling() -> Config {
    Config {
        force_polling: true,
        latency: Some(Duration::from_millis(50)),
        wait_for_delay: Some(Duration::from_millis(100)),
        ..Config::default()
    }
}

fn start(root: &Path, config: Config) -> (Listener, Receiver<Batch>) {
    let (tx, rx) = unbounded();
    let listener = watch(&[root], config, move |modified, added, removed| {
        let _ = tx.send((modified, added, removed));
    })
    .unwrap();
    (listener, rx)
}

fn recv(rx: &Receiver<Batch>) -> Batch {
    rx.recv_timeout(Duration::from_secs(10))
        .expect("expected a change batch")
}

/// Write a file and push its mtime into the past, so a later rewrite is
/// unambiguously newer than the recorded baseline.
fn write_backdated(path: &Path, contents: &[u8]) {
    fs::write(path, contents).unwrap();
    let past = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(30));
    filetime::set_file_mtime(path, past).unwrap();
}

#[test]
fn test_added_file_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    let (_listener, rx) = start(&root, fast_polling());

    fs::write(root.join("new.txt"), b"hello").unwrap();

    let (modified, added, removed) = recv(&rx);
    assert!(modified.is_empty());
    assert_eq!(added, vec![root.join("new.txt")]);
    assert!(removed.is_empty());
}

#[test]
fn test_modified_file_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    write_backdated(&root.join("a.txt"), b"before");

    let (_listener, rx) = start(&root, fast_polling());
    fs::write(root.join("a.txt"), b"after").unwrap();

    let (modified, added, removed) = recv(&rx);
    assert_eq!(modified, vec![root.join("a.txt")]);
    assert!(added.is_empty());
    assert!(removed.is_empty());
}

#[test]
fn test_removed_file_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    fs::write(root.join("doomed.txt"), b"x").unwrap();

    let (_listener, rx) = start(&root, fast_polling());
    fs::remove_file(root.join("doomed.txt")).unwrap();

    let (modified, added, removed) = recv(&rx);
    assert!(modified.is_empty());
    assert!(added.is_empty());
    assert_eq!(removed, vec![root.join("doomed.txt")]);
}

#[test]
fn test_new_subdirectory_contents_are_reported() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    let (_listener, rx) = start(&root, fast_polling());

    fs::create_dir(root.join("sub")).unwrap();
    fs::write(root.join("sub/inner.txt"), b"x").unwrap();

    // The directory itself is not a reported change; the file inside is.
    let (_, added, _) = recv(&rx);
    assert!(added.contains(&root.join("sub/inner.txt")));
}

#[test]
fn test_burst_coalesces_into_one_batch() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    let (_listener, rx) = start(&root, fast_polling());

    for name in ["one.txt", "two.txt", "three.txt"] {
        fs::write(root.join(name), b"x").unwrap();
    }

    let (_, added, _) = recv(&rx);
    assert_eq!(
        added,
        vec![
            root.join("one.txt"),
            root.join("three.txt"),
            root.join("two.txt"),
        ],
        "burst arrives as one sorted batch"
    );

    // Quiet filesystem: no further batches.
    assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
}

#[test]
fn test_two_quick_edits_coalesce_to_one_modified() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    write_backdated(&root.join("a.txt"), b"v1");

    let config = Config {
        hashing: lookout::HashingMode::Never,
        ..fast_polling()
    };
    let (_listener, rx) = start(&root, config);

    fs::write(root.join("a.txt"), b"v2").unwrap();
    fs::write(root.join("a.txt"), b"v3").unwrap();

    let (modified, _, _) = recv(&rx);
    assert_eq!(modified, vec![root.join("a.txt")]);

    // Both edits landed in one settle window; no trailing batch follows.
    assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
}

#[test]
fn test_pause_holds_and_unpause_delivers() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    let (mut listener, rx) = start(&root, fast_polling());

    listener.pause().unwrap();
    fs::write(root.join("held.txt"), b"x").unwrap();

    assert!(
        rx.recv_timeout(Duration::from_millis(500)).is_err(),
        "paused listener must not deliver"
    );

    listener.unpause().unwrap();
    let (_, added, _) = recv(&rx);
    assert!(added.contains(&root.join("held.txt")));
}

#[test]
fn test_ignored_paths_are_suppressed() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    let config = Config {
        ignore: vec![r"\.log$".to_string()],
        ..fast_polling()
    };
    let (_listener, rx) = start(&root, config);

    fs::write(root.join("noise.log"), b"x").unwrap();
    fs::write(root.join("signal.txt"), b"x").unwrap();

    let (_, added, _) = recv(&rx);
    assert_eq!(added, vec![root.join("signal.txt")]);
}

#[test]
fn test_only_allowlist_filters_files() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    let config = Config {
        only: vec![r"\.rs$".to_string()],
        ..fast_polling()
    };
    let (_listener, rx) = start(&root, config);

    fs::create_dir(root.join("src")).unwrap();
    fs::write(root.join("src/lib.rs"), b"x").unwrap();
    fs::write(root.join("notes.md"), b"x").unwrap();

    let (_, added, _) = recv(&rx);
    assert_eq!(added, vec![root.join("src/lib.rs")]);
}

#[test]
fn test_relative_paths_strip_the_root() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    let config = Config {
        relative_paths: true,
        ..fast_polling()
    };
    let (_listener, rx) = start(&root, config);

    fs::create_dir(root.join("sub")).unwrap();
    fs::write(root.join("sub/rel.txt"), b"x").unwrap();

    let (_, added, _) = recv(&rx);
    assert_eq!(added, vec![PathBuf::from("sub/rel.txt")]);
}

#[test]
fn test_rename_within_root_reports_remove_and_add() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    fs::write(root.join("old.txt"), b"x").unwrap();

    let (_listener, rx) = start(&root, fast_polling());
    fs::rename(root.join("old.txt"), root.join("new.txt")).unwrap();

    // The polling backend has no rename cookies; the move resolves as a
    // removal plus an addition in the same batch.
    let (modified, added, removed) = recv(&rx);
    assert!(modified.is_empty());
    assert_eq!(added, vec![root.join("new.txt")]);
    assert_eq!(removed, vec![root.join("old.txt")]);
}

#[test]
fn test_restart_after_stop_keeps_watching() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    let (mut listener, rx) = start(&root, fast_polling());

    fs::write(root.join("first.txt"), b"x").unwrap();
    recv(&rx);

    listener.stop();
    // Changes made while stopped are invisible; the restart takes a fresh
    // baseline that already includes them.
    fs::write(root.join("while-stopped.txt"), b"x").unwrap();
    listener.start().unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());

    fs::write(root.join("second.txt"), b"x").unwrap();
    let (_, added, _) = recv(&rx);
    assert_eq!(added, vec![root.join("second.txt")]);
}

#[test]
fn test_multiple_roots_are_watched_together() {
    let temp_a = TempDir::new().unwrap();
    let temp_b = TempDir::new().unwrap();
    let root_a = temp_a.path().canonicalize().unwrap();
    let root_b = temp_b.path().canonicalize().unwrap();

    let (tx, rx) = unbounded();
    let _listener = watch(
        &[&root_a, &root_b],
        fast_polling(),
        move |modified, added, removed| {
            let _ = tx.send((modified, added, removed));
        },
    )
    .unwrap();

    fs::write(root_a.join("a.txt"), b"x").unwrap();
    fs::write(root_b.join("b.txt"), b"x").unwrap();

    let (_, added, _) = recv(&rx);
    assert_eq!(added, {
        let mut expected = vec![root_a.join("a.txt"), root_b.join("b.txt")];
        expected.sort();
        expected
    });
}

#[test]
fn test_broadcast_and_receive_over_tcp() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();

    let sender_config = Config {
        broadcast: Some("127.0.0.1:0".to_string()),
        ..fast_polling()
    };
    let (sender, _sender_rx) = start(&root, sender_config);
    let addr = sender.broadcast_addr().expect("broadcasting");

    let (tx, rx) = unbounded();
    let recipient_config = Config {
        tcp_receive: Some(addr.to_string()),
        wait_for_delay: Some(Duration::from_millis(100)),
        ..Config::default()
    };
    let no_dirs: &[&Path] = &[];
    let _recipient = watch(no_dirs, recipient_config, move |modified, added, removed| {
        let _ = tx.send((modified, added, removed));
    })
    .unwrap();

    // Give the accept loop time to register the recipient before the
    // sender resolves its first batch.
    std::thread::sleep(Duration::from_millis(500));
    fs::write(root.join("shared.txt"), b"x").unwrap();

    let (_, added, _) = recv(&rx);
    assert_eq!(added, vec![root.join("shared.txt")]);
}
