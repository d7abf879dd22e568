//! Configuration for inwatch.
//!
//! [`WatchOptions`] configures a single watch and is what library callers
//! pass to [`InotifyWait::spawn`](crate::watcher::InotifyWait::spawn). The
//! binary builds one from environment variables through [`Config::from_env`],
//! then applies command-line overrides.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `INWATCH_ROOT` | No | current dir | Path to watch |
//! | `INWATCH_RECURSIVE` | No | `true` | Watch all subdirectories |
//! | `INWATCH_WATCH_DIRECTORY` | No | `false` | Report events for directories themselves |
//! | `INWATCH_EXCLUDES` | No | (none) | Comma-separated exclusion patterns (POSIX ERE) |
//! | `INWATCH_FILES` | No | (all) | Comma-separated paths to restrict events to |
//! | `INWATCH_EVENTS` | No | (all) | Comma-separated inotify event names |
//! | `INWATCH_BIN` | No | `inotifywait` | Notification source executable |
//! | `INWATCH_BUFFER_SIZE` | No | 1000 | Event channel capacity |
//!
//! # Example
//!
//! ```no_run
//! use inwatch::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Watching: {}", config.root.display());
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Default notification source executable.
pub const DEFAULT_BIN: &str = "inotifywait";

/// Default capacity of the event channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine the current working directory.
    #[error("failed to determine current working directory")]
    NoWorkingDirectory,
}

/// Process-launch settings passed through to the source unmodified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpawnOptions {
    /// Extra environment variables for the source.
    pub env: BTreeMap<String, String>,

    /// Start the source with an empty environment (before `env` is applied).
    pub env_clear: bool,

    /// Working directory of the source.
    pub current_dir: Option<PathBuf>,
}

/// Options for a single watch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WatchOptions {
    /// Watch all subdirectories of the root.
    pub recursive: bool,

    /// Report events whose subject is a directory.
    pub watch_directory: bool,

    /// POSIX extended regexes for paths to ignore, combined into one `--exclude`.
    pub excludes: Vec<String>,

    /// If non-empty, only these paths (and anything beneath them) are reported.
    pub files: Vec<String>,

    /// If non-empty, only these inotify event categories are reported.
    pub events: Vec<String>,

    /// Notification source executable.
    pub bin: PathBuf,

    /// Settings for launching the source.
    #[serde(rename = "spawnArgs")]
    pub spawn: SpawnOptions,

    /// Capacity of the internal line channel.
    pub channel_capacity: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            watch_directory: false,
            excludes: Vec::new(),
            files: Vec::new(),
            events: Vec::new(),
            bin: PathBuf::from(DEFAULT_BIN),
            spawn: SpawnOptions::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl WatchOptions {
    #[must_use]
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    #[must_use]
    pub fn with_watch_directory(mut self, watch_directory: bool) -> Self {
        self.watch_directory = watch_directory;
        self
    }

    #[must_use]
    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.push(pattern.into());
        self
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.files.push(path.into());
        self
    }

    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.events.push(event.into());
        self
    }

    #[must_use]
    pub fn with_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.bin = bin.into();
        self
    }

    #[must_use]
    pub fn with_spawn(mut self, spawn: SpawnOptions) -> Self {
        self.spawn = spawn;
        self
    }

    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

/// Configuration for the inwatch binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to watch.
    pub root: PathBuf,

    /// Watch options.
    pub options: WatchOptions,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - a boolean variable is not one of `1/0`, `true/false`, `yes/no`, `on/off`
    /// - `INWATCH_BUFFER_SIZE` is not a positive integer
    /// - `INWATCH_ROOT` is unset and the current directory cannot be determined
    pub fn from_env() -> Result<Self, ConfigError> {
        let root = match env::var("INWATCH_ROOT") {
            Ok(root) => PathBuf::from(root),
            Err(_) => env::current_dir().map_err(|_| ConfigError::NoWorkingDirectory)?,
        };

        let defaults = WatchOptions::default();

        let recursive = parse_bool("INWATCH_RECURSIVE")?.unwrap_or(defaults.recursive);
        let watch_directory =
            parse_bool("INWATCH_WATCH_DIRECTORY")?.unwrap_or(defaults.watch_directory);

        let bin = env::var("INWATCH_BIN")
            .map(PathBuf::from)
            .unwrap_or(defaults.bin);

        // Optional: INWATCH_BUFFER_SIZE (default: 1000, must be > 0)
        let channel_capacity = match env::var("INWATCH_BUFFER_SIZE") {
            Ok(val) => {
                let size = val
                    .parse::<usize>()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "INWATCH_BUFFER_SIZE".to_string(),
                        message: format!("expected positive integer, got '{val}'"),
                    })?;
                if size == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "INWATCH_BUFFER_SIZE".to_string(),
                        message: "buffer size must be greater than 0".to_string(),
                    });
                }
                size
            }
            Err(_) => DEFAULT_CHANNEL_CAPACITY,
        };

        let options = WatchOptions {
            recursive,
            watch_directory,
            excludes: parse_list("INWATCH_EXCLUDES"),
            files: parse_list("INWATCH_FILES"),
            events: parse_list("INWATCH_EVENTS"),
            bin,
            spawn: SpawnOptions::default(),
            channel_capacity,
        };

        Ok(Self { root, options })
    }
}

fn parse_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    let Ok(val) = env::var(key) else {
        return Ok(None);
    };

    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{val}'"),
        }),
    }
}

fn parse_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|val| {
            val.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
