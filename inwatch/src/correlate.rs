//! Correlation of raw inotify records into high-level events.
//!
//! A single file write produces several raw records (`CREATE`, a run of
//! `MODIFY`, then `CLOSE_WRITE,CLOSE`). The [`Correlator`] keeps one pending
//! record per path and emits a single event when the path is closed:
//!
//! | Raw sequence               | Emitted  |
//! |----------------------------|----------|
//! | `CREATE` .. `CLOSE`        | `add`    |
//! | `MOVED_TO` .. `CLOSE`      | `move`   |
//! | `MODIFY`/`ATTRIB` .. `CLOSE` | `change` |
//! | `DELETE`                   | `unlink` |
//! | `CLOSE` with nothing pending | `unknown` |
//!
//! Symlinks and hard links are never opened by their creator, so no `CLOSE`
//! follows their `CREATE`/`MOVED_TO`. Those are resolved on the spot by
//! looking at the path with `lstat`, through the [`LinkProbe`] seam.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::types::{EventMeta, EventTag, RawEvent, WatchEvent};

/// What `lstat` reports about a freshly created path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub is_dir: bool,
    pub is_symlink: bool,
    pub nlink: u64,
}

impl LinkStatus {
    /// Returns `true` if no `CLOSE` will ever arrive for this path.
    #[must_use]
    pub fn never_closes(&self) -> bool {
        !self.is_dir && (self.is_symlink || self.nlink > 1)
    }
}

/// Looks up link information for a path without following symlinks.
pub trait LinkProbe {
    /// Returns `None` if the path no longer exists or cannot be inspected.
    fn probe(&self, path: &Path) -> Option<LinkStatus>;
}

/// [`LinkProbe`] backed by `std::fs::symlink_metadata`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl LinkProbe for FsProbe {
    fn probe(&self, path: &Path) -> Option<LinkStatus> {
        let metadata = std::fs::symlink_metadata(path).ok()?;

        #[cfg(unix)]
        let nlink = {
            use std::os::unix::fs::MetadataExt;
            metadata.nlink()
        };
        #[cfg(not(unix))]
        let nlink = 1;

        Some(LinkStatus {
            is_dir: metadata.is_dir(),
            is_symlink: metadata.file_type().is_symlink(),
            nlink,
        })
    }
}

/// Correlation state of a path awaiting its `CLOSE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Add,
    Move,
    Change,
}

/// Stateful raw-to-high-level event translator.
///
/// Owned by exactly one task; every method takes `&mut self` and there is no
/// internal locking.
#[derive(Debug)]
pub struct Correlator<P = FsProbe> {
    watch_directory: bool,
    pending: HashMap<PathBuf, PendingKind>,
    probe: P,
}

impl Correlator<FsProbe> {
    /// Creates a correlator that inspects the real filesystem.
    #[must_use]
    pub fn new(watch_directory: bool) -> Self {
        Self::with_probe(watch_directory, FsProbe)
    }
}

impl<P: LinkProbe> Correlator<P> {
    /// Creates a correlator with a custom link probe.
    pub fn with_probe(watch_directory: bool, probe: P) -> Self {
        Self {
            watch_directory,
            pending: HashMap::new(),
            probe,
        }
    }

    /// Returns the pending state for `path`, if any.
    #[must_use]
    pub fn pending(&self, path: &Path) -> Option<PendingKind> {
        self.pending.get(path).copied()
    }

    /// Number of paths awaiting resolution.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Feeds one raw record, returning the high-level event it resolves.
    ///
    /// Rules are checked in order and only the first match applies.
    /// `DELETE` does not consult or clear the pending record; a path deleted
    /// before its `CLOSE` keeps a stale entry until the next `CLOSE` for it.
    pub fn process(&mut self, raw: RawEvent) -> Option<WatchEvent> {
        let is_dir = raw.is_dir();
        if is_dir && !self.watch_directory {
            trace!(path = %raw.path.display(), "Ignoring directory event");
            return None;
        }

        if raw.has(&EventTag::Create) {
            self.begin(raw, PendingKind::Add)
        } else if raw.has(&EventTag::MovedTo) {
            self.begin(raw, PendingKind::Move)
        } else if raw.has(&EventTag::Modify) || raw.has(&EventTag::Attrib) {
            let upgraded = matches!(
                self.pending.get(&raw.path),
                Some(PendingKind::Add | PendingKind::Move)
            );
            if !upgraded {
                self.pending.insert(raw.path, PendingKind::Change);
            }
            None
        } else if raw.has(&EventTag::Delete) {
            let meta = meta_of(&raw);
            Some(WatchEvent::Unlink {
                path: raw.path,
                meta,
            })
        } else if raw.has(&EventTag::Close) {
            let meta = meta_of(&raw);
            match self.pending.remove(&raw.path) {
                Some(kind) => Some(resolved(kind, raw.path, meta)),
                None => Some(WatchEvent::Unknown {
                    path: raw.path.clone(),
                    raw,
                    meta,
                }),
            }
        } else {
            None
        }
    }

    fn begin(&mut self, raw: RawEvent, kind: PendingKind) -> Option<WatchEvent> {
        let never_closes = self
            .probe
            .probe(&raw.path)
            .is_some_and(|status| status.never_closes());

        if never_closes {
            self.pending.remove(&raw.path);
            let meta = meta_of(&raw);
            trace!(path = %raw.path.display(), "Resolved link without close");
            return Some(resolved(kind, raw.path, meta));
        }

        self.pending.insert(raw.path, kind);
        None
    }
}

fn meta_of(raw: &RawEvent) -> EventMeta {
    EventMeta {
        is_directory: raw.is_dir(),
        timestamp: raw.timestamp,
    }
}

fn resolved(kind: PendingKind, path: PathBuf, meta: EventMeta) -> WatchEvent {
    match kind {
        PendingKind::Add => WatchEvent::Add { path, meta },
        PendingKind::Move => WatchEvent::Move { path, meta },
        PendingKind::Change => WatchEvent::Change { path, meta },
    }
}
