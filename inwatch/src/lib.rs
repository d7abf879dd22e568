//! inwatch - deduplicated filesystem change events from inotifywait.
//!
//! This crate runs `inotifywait` (from inotify-tools) as a child process and
//! turns its raw, chatty event stream into one high-level event per file
//! operation: a file written from scratch yields a single `add` once the
//! writer closes it, not a `CREATE` followed by a burst of `MODIFY`s.
//!
//! # Overview
//!
//! ```text
//! inotifywait --> parser --> correlate --> InotifyWait --> mpsc::Sender<WatchEvent>
//!   (stdout)       (RawEvent)   (per-path state)
//!   (stderr) --> ready / error
//! ```
//!
//! # Modules
//!
//! - [`types`]: Raw and high-level event types
//! - [`parser`]: Decoding of source output lines
//! - [`correlate`]: Per-path correlation state machine
//! - [`lifecycle`]: Session state machine
//! - [`watcher`]: The [`InotifyWait`] handle
//! - [`config`]: Watch options and environment configuration
//! - [`limits`]: inotify kernel limits
//! - [`error`]: Error types

pub mod config;
pub mod correlate;
pub mod error;
pub mod lifecycle;
pub mod limits;
pub mod parser;
mod source;
pub mod types;
pub mod watcher;

pub use config::{Config, SpawnOptions, WatchOptions};
pub use correlate::{Correlator, LinkProbe, LinkStatus, PendingKind};
pub use error::{Result, WatchError};
pub use lifecycle::SessionState;
pub use limits::{inotify_limits, InotifyLimits};
pub use types::{EventKind, EventMeta, EventTag, RawEvent, SourceExit, SourceProcess, WatchEvent};
pub use watcher::InotifyWait;
