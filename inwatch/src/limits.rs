//! inotify kernel limits.
//!
//! A recursive watch needs one inotify watch per directory. When the tree is
//! larger than `max_user_watches` the source fails part way through setup, so
//! the binary checks these values up front.

use std::io;
use std::path::Path;

/// Directory the kernel exposes inotify tunables in.
pub const PROC_INOTIFY_DIR: &str = "/proc/sys/fs/inotify";

/// Watch limit below which large recursive trees are likely to fail.
pub const LOW_WATCH_LIMIT: u64 = 8192;

/// Per-user inotify limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InotifyLimits {
    pub max_user_watches: u64,
    pub max_user_instances: u64,
    pub max_queued_events: u64,
}

impl InotifyLimits {
    /// Returns `true` if the watch limit is below [`LOW_WATCH_LIMIT`].
    #[must_use]
    pub fn is_watch_limit_low(&self) -> bool {
        self.max_user_watches < LOW_WATCH_LIMIT
    }
}

/// Reads the limits of the running kernel.
///
/// # Errors
///
/// Returns an error if the files under [`PROC_INOTIFY_DIR`] cannot be read or
/// do not hold integers, e.g. on a kernel without inotify.
pub fn inotify_limits() -> io::Result<InotifyLimits> {
    read_limits(Path::new(PROC_INOTIFY_DIR))
}

/// Reads the limits from a directory laid out like [`PROC_INOTIFY_DIR`].
///
/// # Errors
///
/// Returns an error if any of the three files is missing or malformed.
pub fn read_limits(dir: &Path) -> io::Result<InotifyLimits> {
    Ok(InotifyLimits {
        max_user_watches: read_value(dir, "max_user_watches")?,
        max_user_instances: read_value(dir, "max_user_instances")?,
        max_queued_events: read_value(dir, "max_queued_events")?,
    })
}

fn read_value(dir: &Path, name: &str) -> io::Result<u64> {
    let contents = std::fs::read_to_string(dir.join(name))?;
    contents.trim().parse::<u64>().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{name}: expected integer, got '{}': {e}", contents.trim()),
        )
    })
}
