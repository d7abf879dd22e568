//! Error types for inwatch.
//!
//! Module-local errors ([`ParseError`], [`ConfigError`]) are aggregated here
//! into [`WatchError`], which is also what `error` events carry.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::parser::ParseError;

/// Errors that can occur while running a watch session.
///
/// Apart from [`WatchError::Config`], none of these are fatal to a session:
/// they are delivered as `error` events and the session keeps running until
/// the source exits.
#[derive(Error, Debug)]
pub enum WatchError {
    /// A line on the source's stdout could not be decoded.
    #[error("failed to decode line {line:?}: {source}")]
    Decode {
        line: String,
        #[source]
        source: ParseError,
    },

    /// The source wrote an unexpected line to stderr.
    #[error("notification source reported: {0}")]
    Diagnostic(String),

    /// The source binary could not be started.
    #[error("failed to spawn {}: {source}", .bin.display())]
    Spawn {
        bin: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Waiting on or signalling the running source failed.
    #[error("notification source process error: {0}")]
    Process(#[source] io::Error),

    /// The session's background tasks ended without reporting a final state.
    #[error("watch supervisor stopped unexpectedly")]
    SupervisorGone,

    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// A specialized `Result` type for inwatch operations.
pub type Result<T> = std::result::Result<T, WatchError>;
