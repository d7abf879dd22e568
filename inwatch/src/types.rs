//! Event types for inwatch.
//!
//! This module defines the raw records decoded from the notification source
//! and the high-level events delivered to callers. High-level events serialize
//! to camelCase JSON tagged by an `event` field.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::error::WatchError;

/// A single inotify event category, as printed by the source's `%e` format.
///
/// Unrecognised categories are kept verbatim in [`EventTag::Other`] so that
/// they still show up in `unknown` diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventTag {
    Access,
    Modify,
    Attrib,
    CloseWrite,
    CloseNowrite,
    Close,
    Open,
    MovedFrom,
    MovedTo,
    Move,
    MoveSelf,
    Create,
    Delete,
    DeleteSelf,
    Unmount,
    QOverflow,
    Ignored,
    IsDir,
    Other(String),
}

impl EventTag {
    /// Maps a category name to its tag. Matching is exact and case-sensitive.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "ACCESS" => Self::Access,
            "MODIFY" => Self::Modify,
            "ATTRIB" => Self::Attrib,
            "CLOSE_WRITE" => Self::CloseWrite,
            "CLOSE_NOWRITE" => Self::CloseNowrite,
            "CLOSE" => Self::Close,
            "OPEN" => Self::Open,
            "MOVED_FROM" => Self::MovedFrom,
            "MOVED_TO" => Self::MovedTo,
            "MOVE" => Self::Move,
            "MOVE_SELF" => Self::MoveSelf,
            "CREATE" => Self::Create,
            "DELETE" => Self::Delete,
            "DELETE_SELF" => Self::DeleteSelf,
            "UNMOUNT" => Self::Unmount,
            "Q_OVERFLOW" => Self::QOverflow,
            "IGNORED" => Self::Ignored,
            "ISDIR" => Self::IsDir,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the category name as the source prints it.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Access => "ACCESS",
            Self::Modify => "MODIFY",
            Self::Attrib => "ATTRIB",
            Self::CloseWrite => "CLOSE_WRITE",
            Self::CloseNowrite => "CLOSE_NOWRITE",
            Self::Close => "CLOSE",
            Self::Open => "OPEN",
            Self::MovedFrom => "MOVED_FROM",
            Self::MovedTo => "MOVED_TO",
            Self::Move => "MOVE",
            Self::MoveSelf => "MOVE_SELF",
            Self::Create => "CREATE",
            Self::Delete => "DELETE",
            Self::DeleteSelf => "DELETE_SELF",
            Self::Unmount => "UNMOUNT",
            Self::QOverflow => "Q_OVERFLOW",
            Self::Ignored => "IGNORED",
            Self::IsDir => "ISDIR",
            Self::Other(name) => name,
        }
    }
}

impl FromStr for EventTag {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(s))
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One decoded line from the notification source.
///
/// Raw events are immutable and are consumed by the correlation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawEvent {
    /// Event categories reported for this line. Order is not significant.
    #[serde(rename = "types")]
    pub tags: BTreeSet<EventTag>,

    /// Path the event refers to.
    pub path: PathBuf,

    /// When the source recorded the event.
    pub timestamp: DateTime<Utc>,
}

impl RawEvent {
    /// Creates a raw event from its parts.
    pub fn new(
        tags: impl IntoIterator<Item = EventTag>,
        path: impl Into<PathBuf>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            tags: tags.into_iter().collect(),
            path: path.into(),
            timestamp,
        }
    }

    /// An empty record standing in for a line that could not be decoded.
    ///
    /// It carries no tags, so the correlation engine ignores it.
    #[must_use]
    pub fn placeholder(timestamp: DateTime<Utc>) -> Self {
        Self {
            tags: BTreeSet::new(),
            path: PathBuf::new(),
            timestamp,
        }
    }

    /// Returns `true` if the record carries `tag`.
    #[must_use]
    pub fn has(&self, tag: &EventTag) -> bool {
        self.tags.contains(tag)
    }

    /// Returns `true` if the record refers to a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.has(&EventTag::IsDir)
    }
}

/// Metadata attached to every content event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    /// Whether the path is a directory.
    pub is_directory: bool,

    /// Timestamp of the raw event that resolved this one.
    pub timestamp: DateTime<Utc>,
}

/// Handle to the live notification source process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceProcess {
    /// Operating system process id.
    pub pid: u32,
}

/// How the notification source terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,

    /// Terminating signal, if the process was killed by one.
    pub signal: Option<i32>,
}

impl SourceExit {
    /// Returns `true` if the process exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for SourceExit {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for SourceExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// Discriminant of a [`WatchEvent`], useful for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Ready,
    Add,
    Change,
    Move,
    Unlink,
    Unknown,
    Error,
    Close,
}

impl EventKind {
    /// Returns the lowercase event name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Add => "add",
            Self::Change => "change",
            Self::Move => "move",
            Self::Unlink => "unlink",
            Self::Unknown => "unknown",
            Self::Error => "error",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events delivered by an [`InotifyWait`](crate::watcher::InotifyWait) handle.
///
/// Lifecycle events (`Ready`, `Error`, `Close`) and content events (`Add`,
/// `Change`, `Move`, `Unlink`, `Unknown`) share one channel, so their relative
/// order is preserved.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchEvent {
    /// The source finished setting up its watches.
    Ready { process: SourceProcess },

    /// A file (or directory, when enabled) was created.
    Add { path: PathBuf, meta: EventMeta },

    /// A file was modified or had its attributes changed.
    Change { path: PathBuf, meta: EventMeta },

    /// A file was moved into the watched tree.
    Move { path: PathBuf, meta: EventMeta },

    /// A file was deleted.
    Unlink { path: PathBuf, meta: EventMeta },

    /// A close notification arrived with nothing pending for its path.
    Unknown {
        path: PathBuf,
        raw: RawEvent,
        meta: EventMeta,
    },

    /// A decode failure, diagnostic line or process error.
    Error {
        #[serde(serialize_with = "serialize_error")]
        error: Arc<WatchError>,
    },

    /// The source terminated, by request or otherwise.
    Close { status: Option<SourceExit> },
}

fn serialize_error<S: Serializer>(error: &Arc<WatchError>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error.as_ref())
}

impl WatchEvent {
    /// Wraps an error into an `Error` event.
    #[must_use]
    pub fn error(error: WatchError) -> Self {
        Self::Error {
            error: Arc::new(error),
        }
    }

    /// Returns the kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ready { .. } => EventKind::Ready,
            Self::Add { .. } => EventKind::Add,
            Self::Change { .. } => EventKind::Change,
            Self::Move { .. } => EventKind::Move,
            Self::Unlink { .. } => EventKind::Unlink,
            Self::Unknown { .. } => EventKind::Unknown,
            Self::Error { .. } => EventKind::Error,
            Self::Close { .. } => EventKind::Close,
        }
    }

    /// Returns the path of a content event.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Add { path, .. }
            | Self::Change { path, .. }
            | Self::Move { path, .. }
            | Self::Unlink { path, .. }
            | Self::Unknown { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Returns the metadata of a content event.
    #[must_use]
    pub fn meta(&self) -> Option<&EventMeta> {
        match self {
            Self::Add { meta, .. }
            | Self::Change { meta, .. }
            | Self::Move { meta, .. }
            | Self::Unlink { meta, .. }
            | Self::Unknown { meta, .. } => Some(meta),
            _ => None,
        }
    }
}

impl fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready { process } => write!(f, "ready pid={}", process.pid),
            Self::Error { error } => write!(f, "error {error}"),
            Self::Close { status: Some(status) } => write!(f, "close {status}"),
            Self::Close { status: None } => f.write_str("close"),
            Self::Unknown { path, raw, .. } => {
                let tags: Vec<&str> = raw.tags.iter().map(EventTag::as_str).collect();
                write!(f, "unknown {} [{}]", path.display(), tags.join(","))
            }
            other => {
                let suffix = if other.meta().is_some_and(|m| m.is_directory) {
                    "/"
                } else {
                    ""
                };
                let path = other.path().map(Path::display);
                match path {
                    Some(path) => write!(f, "{} {}{}", other.kind(), path, suffix),
                    None => write!(f, "{}", other.kind()),
                }
            }
        }
    }
}
