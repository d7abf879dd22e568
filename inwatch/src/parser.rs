//! Raw event decoder for inotifywait output.
//!
//! The source is started with a JSON `--format`, so every stdout line is a
//! small object:
//!
//! ```text
//! { "type": "CREATE,ISDIR", "file": "/tmp/watched/dir", "date": "1700000000" }
//! ```
//!
//! | Field  | Meaning                                                 |
//! |--------|---------------------------------------------------------|
//! | `type` | comma-separated event categories (`%e`)                 |
//! | `file` | watched directory joined with the file name (`%w%f`)    |
//! | `date` | epoch seconds (`%T` with `--timefmt %s`), string or int |
//!
//! Stderr lines are classified separately by [`classify_diagnostic`].

use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::types::{EventTag, RawEvent};

/// Errors that can occur while decoding a stdout line.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The line is not a valid event record.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The `date` field is not an epoch-seconds value.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// A line from the source's stderr, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// `Watches established.`: the source is ready.
    WatchesEstablished,

    /// `Setting up watches.`: informational only.
    SettingUpWatches,

    /// Anything else, usually an error from the source.
    Message(String),
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    kind: String,
    file: String,
    #[serde(default)]
    date: Option<RawDate>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDate {
    Seconds(i64),
    Text(String),
}

impl RawDate {
    fn to_timestamp(&self) -> Result<DateTime<Utc>, ParseError> {
        let seconds = match self {
            Self::Seconds(seconds) => *seconds,
            Self::Text(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|_| ParseError::InvalidTimestamp(text.clone()))?,
        };

        Utc.timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| ParseError::InvalidTimestamp(seconds.to_string()))
    }
}

/// Decodes one stdout line into a [`RawEvent`].
///
/// A record without a `date` is stamped with the current time.
///
/// inotifywait substitutes `%w%f` into the record unescaped, so names are
/// only faithful when they need no JSON escaping. A name containing `"`
/// fails to decode, and a name containing a backslash sequence such as
/// `\n` decodes to a different path.
///
/// # Errors
///
/// Returns [`ParseError::InvalidJson`] if the line is not a record with
/// string `type` and `file` fields, and [`ParseError::InvalidTimestamp`] if
/// `date` is present but not an epoch-seconds value.
pub fn parse_line(line: &str) -> Result<RawEvent, ParseError> {
    let record: RawRecord = serde_json::from_str(line)?;

    let timestamp = match &record.date {
        Some(date) => date.to_timestamp()?,
        None => Utc::now(),
    };

    Ok(RawEvent {
        tags: split_tags(&record.kind).collect(),
        path: PathBuf::from(record.file),
        timestamp,
    })
}

fn split_tags(kind: &str) -> impl Iterator<Item = EventTag> + '_ {
    kind.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(EventTag::from_name)
}

/// Classifies a stderr line. Blank lines yield `None`.
#[must_use]
pub fn classify_diagnostic(line: &str) -> Option<Diagnostic> {
    let line = line.trim_end();
    if line.trim().is_empty() {
        return None;
    }

    if line.starts_with("Watches established") {
        Some(Diagnostic::WatchesEstablished)
    } else if line.starts_with("Setting up watches") {
        Some(Diagnostic::SettingUpWatches)
    } else {
        Some(Diagnostic::Message(line.to_string()))
    }
}
