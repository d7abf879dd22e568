//! End-to-end tests against a real `inotifywait`.
//!
//! Each test returns early (and passes) when inotify-tools is not installed.

#![cfg(target_os = "linux")]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use inwatch::{EventKind, InotifyWait, WatchEvent, WatchOptions};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Test Helpers
// =============================================================================

fn inotifywait_available() -> bool {
    let available = Command::new("inotifywait")
        .arg("--help")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok();
    if !available {
        eprintln!("inotifywait not found on PATH, skipping");
    }
    available
}

/// Starts a watch on a fresh temporary directory and waits until it is ready.
async fn start(options: WatchOptions) -> (TempDir, InotifyWait, mpsc::Receiver<WatchEvent>) {
    let dir = TempDir::new().unwrap();
    let (tx, mut rx) = mpsc::channel(256);
    let watch = InotifyWait::spawn(dir.path(), options, tx);

    let ready = next_matching(&mut rx, |e| e.kind() == EventKind::Ready).await;
    assert!(matches!(ready, WatchEvent::Ready { .. }));
    (dir, watch, rx)
}

/// Receives events until one satisfies `predicate`.
async fn next_matching<F>(rx: &mut mpsc::Receiver<WatchEvent>, predicate: F) -> WatchEvent
where
    F: Fn(&WatchEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(event) if predicate(&event) => return event,
                Some(WatchEvent::Error { error }) => panic!("unexpected error event: {error}"),
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn is(kind: EventKind, path: &Path) -> impl Fn(&WatchEvent) -> bool + '_ {
    move |e| e.kind() == kind && e.path() == Some(path)
}

/// Collects every event received within `window`.
async fn drain_for(rx: &mut mpsc::Receiver<WatchEvent>, window: Duration) -> Vec<WatchEvent> {
    let deadline = Instant::now() + window;
    let mut events = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, rx.recv()).await {
            Ok(Some(event)) => events.push(event),
            _ => break,
        }
    }
    events
}

// =============================================================================
// Scenario Tests
// =============================================================================

#[tokio::test]
async fn ready_reports_live_pid() {
    if !inotifywait_available() {
        return;
    }

    let (_dir, watch, _rx) = start(WatchOptions::default()).await;
    let pid = watch.pid().expect("pid");
    assert!(Path::new(&format!("/proc/{pid}")).exists());

    watch.close().await.unwrap();
}

#[tokio::test]
async fn file_add_change_unlink() {
    if !inotifywait_available() {
        return;
    }

    let (dir, watch, mut rx) = start(WatchOptions::default()).await;
    let file = dir.path().join("a.txt");

    fs::write(&file, b"first").unwrap();
    let add = next_matching(&mut rx, is(EventKind::Add, &file)).await;
    assert!(!add.meta().unwrap().is_directory);

    fs::write(&file, b"second").unwrap();
    next_matching(&mut rx, is(EventKind::Change, &file)).await;

    fs::remove_file(&file).unwrap();
    next_matching(&mut rx, is(EventKind::Unlink, &file)).await;

    watch.close().await.unwrap();
}

#[tokio::test]
async fn single_write_yields_single_add() {
    if !inotifywait_available() {
        return;
    }

    let (dir, watch, mut rx) = start(WatchOptions::default()).await;
    let file = dir.path().join("once.txt");

    fs::write(&file, vec![b'x'; 64 * 1024]).unwrap();
    next_matching(&mut rx, is(EventKind::Add, &file)).await;

    let rest = drain_for(&mut rx, Duration::from_millis(300)).await;
    assert!(rest.iter().all(|e| e.path() != Some(file.as_path())));

    watch.close().await.unwrap();
}

#[tokio::test]
async fn symlink_is_added_without_close() {
    if !inotifywait_available() {
        return;
    }

    let (dir, watch, mut rx) = start(WatchOptions::default()).await;
    let target = dir.path().join("target");
    let link = dir.path().join("link");

    fs::write(&target, b"x").unwrap();
    next_matching(&mut rx, is(EventKind::Add, &target)).await;

    std::os::unix::fs::symlink(&target, &link).unwrap();
    next_matching(&mut rx, is(EventKind::Add, &link)).await;

    watch.close().await.unwrap();
}

#[tokio::test]
async fn nested_file_in_new_directory_is_added() {
    if !inotifywait_available() {
        return;
    }

    let (dir, watch, mut rx) = start(WatchOptions::default()).await;
    let nested = dir.path().join("x").join("y");
    let file = nested.join("f");

    fs::create_dir_all(&nested).unwrap();
    // Give inotifywait time to add watches for the new directories.
    sleep(Duration::from_millis(200)).await;
    fs::write(&file, b"...").unwrap();

    next_matching(&mut rx, is(EventKind::Add, &file)).await;

    watch.close().await.unwrap();
}

#[tokio::test]
async fn directory_add_suppressed_by_default() {
    if !inotifywait_available() {
        return;
    }

    let (dir, watch, mut rx) = start(WatchOptions::default()).await;
    let sub = dir.path().join("d");

    fs::create_dir(&sub).unwrap();
    let events = drain_for(&mut rx, Duration::from_millis(500)).await;

    assert!(events
        .iter()
        .all(|e| !(e.kind() == EventKind::Add && e.path() == Some(sub.as_path()))));

    watch.close().await.unwrap();
}

#[tokio::test]
async fn directory_add_reported_when_enabled() {
    if !inotifywait_available() {
        return;
    }

    let (dir, watch, mut rx) = start(WatchOptions::default().with_watch_directory(true)).await;
    let sub = dir.path().join("d");

    fs::create_dir(&sub).unwrap();
    let add = next_matching(&mut rx, is(EventKind::Add, &sub)).await;
    assert!(add.meta().unwrap().is_directory);

    watch.close().await.unwrap();
}

#[tokio::test]
async fn close_twice_is_safe() {
    if !inotifywait_available() {
        return;
    }

    let (_dir, watch, mut rx) = start(WatchOptions::default()).await;

    let first = watch.close().await.unwrap();
    assert!(first.is_some());
    let second = timeout(Duration::from_millis(100), watch.close())
        .await
        .expect("second close should complete immediately")
        .unwrap();
    assert_eq!(first, second);

    let close = next_matching(&mut rx, |e| e.kind() == EventKind::Close).await;
    match close {
        WatchEvent::Close { status } => assert_eq!(status, first),
        other => panic!("expected close, got {other:?}"),
    }
}

#[tokio::test]
async fn excluded_paths_are_not_reported() {
    if !inotifywait_available() {
        return;
    }

    let options = WatchOptions::default()
        .with_exclude(r"\.skip$")
        .with_exclude(r"\.tmp$");
    let (dir, watch, mut rx) = start(options).await;
    let skipped: Vec<PathBuf> = vec![dir.path().join("file.skip"), dir.path().join("file.tmp")];
    let kept = dir.path().join("file.keep");

    for path in &skipped {
        fs::write(path, b"x").unwrap();
    }
    fs::write(&kept, b"x").unwrap();

    let events = drain_for(&mut rx, Duration::from_millis(500)).await;
    assert!(events.iter().any(|e| e.path() == Some(kept.as_path())));
    for path in &skipped {
        assert!(events.iter().all(|e| e.path() != Some(path.as_path())));
    }

    watch.close().await.unwrap();
}

#[tokio::test]
async fn files_apply_alongside_excludes() {
    if !inotifywait_available() {
        return;
    }

    let dir = TempDir::new().unwrap();
    let wanted = dir.path().join("wanted");
    let swap = wanted.join("notes.swp");
    let inside = wanted.join("notes.txt");
    let outside = dir.path().join("elsewhere.txt");
    fs::create_dir(&wanted).unwrap();

    let options = WatchOptions::default()
        .with_exclude(r"\.swp$")
        .with_exclude(r"\.tmp$")
        .with_file(wanted.to_string_lossy());
    let (tx, mut rx) = mpsc::channel(256);
    let watch = InotifyWait::spawn(dir.path(), options, tx);
    next_matching(&mut rx, |e| e.kind() == EventKind::Ready).await;

    fs::write(&outside, b"x").unwrap();
    fs::write(&swap, b"x").unwrap();
    fs::write(&inside, b"x").unwrap();

    let events = drain_for(&mut rx, Duration::from_millis(500)).await;
    assert!(events.iter().any(is(EventKind::Add, &inside)));
    assert!(events
        .iter()
        .all(|e| e.path() != Some(outside.as_path()) && e.path() != Some(swap.as_path())));

    watch.close().await.unwrap();
}
