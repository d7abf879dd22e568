//! Public watch handle.
//!
//! [`InotifyWait`] runs one `inotifywait` session and delivers its lifecycle
//! and content events on a caller-supplied channel.
//!
//! # Architecture
//!
//! The supervisor's reader tasks stay lightweight: they only forward raw
//! lines through an internal channel to a dedicated processing task, which
//! owns the [`Correlator`] and is the single writer of correlation state.
//! The session state machine is shared through a `watch` channel so the
//! handle can observe it without touching the processing task.
//!
//! # Example
//!
//! ```no_run
//! use tokio::sync::mpsc;
//! use inwatch::{InotifyWait, WatchEvent, WatchOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (tx, mut rx) = mpsc::channel(100);
//!     let watch = InotifyWait::spawn("/tmp/watched", WatchOptions::default(), tx);
//!
//!     while let Some(event) = rx.recv().await {
//!         match event {
//!             WatchEvent::Ready { process } => println!("ready, pid {}", process.pid),
//!             WatchEvent::Add { path, .. } => println!("added {}", path.display()),
//!             WatchEvent::Close { .. } => break,
//!             other => println!("{other}"),
//!         }
//!     }
//!
//!     let _ = watch.close().await;
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, trace, warn};

use crate::config::WatchOptions;
use crate::correlate::Correlator;
use crate::error::{Result, WatchError};
use crate::lifecycle::{self, SessionState, Transition};
use crate::parser::{classify_diagnostic, parse_line, Diagnostic};
use crate::source::{self, FileFilter, SourceMessage};
use crate::types::{RawEvent, SourceExit, SourceProcess, WatchEvent};

/// Handle to a running watch session.
///
/// Dropping the handle terminates the source; the `close` event is still
/// delivered if the event receiver is alive.
#[derive(Debug)]
pub struct InotifyWait {
    root: PathBuf,
    options: WatchOptions,
    pid: Option<u32>,
    state: watch::Receiver<SessionState>,
    shutdown: Arc<Notify>,
}

impl InotifyWait {
    /// Starts watching `root`, sending events to `events`.
    ///
    /// This never fails synchronously: if the source cannot be launched an
    /// `error` event followed by `close` is delivered instead.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn spawn(
        root: impl Into<PathBuf>,
        options: WatchOptions,
        events: mpsc::Sender<WatchEvent>,
    ) -> Self {
        let root = root.into();
        let (state_tx, state_rx) = watch::channel(SessionState::Starting);
        let state_tx = Arc::new(state_tx);
        let shutdown = Arc::new(Notify::new());
        let (line_tx, line_rx) = mpsc::channel(options.channel_capacity.max(1));

        let pid = source::launch(
            &root,
            &options,
            line_tx,
            Arc::clone(&state_tx),
            Arc::clone(&shutdown),
        );

        let correlator = Correlator::new(options.watch_directory);
        let files = source::local_file_filter(&options);
        tokio::spawn(process_messages(
            line_rx,
            events,
            correlator,
            files,
            state_tx,
            pid,
        ));

        Self {
            root,
            options,
            pid,
            state: state_rx,
            shutdown,
        }
    }

    /// Path being watched.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Options the session was started with.
    #[must_use]
    pub fn options(&self) -> &WatchOptions {
        &self.options
    }

    /// Process id of the source, if it was started.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Terminates the source and waits for it to exit.
    ///
    /// Returns the exit status, or `None` if the source never started or its
    /// status could not be collected. Calling this again, or after the source
    /// already exited on its own, returns the same status immediately.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::SupervisorGone`] if the session's background
    /// tasks ended without recording a final state, e.g. because the runtime
    /// was shut down.
    pub async fn close(&self) -> Result<Option<SourceExit>> {
        if let SessionState::Closed(status) = self.state() {
            return Ok(status);
        }

        debug!(root = %self.root.display(), "Closing watch");
        self.shutdown.notify_one();

        let mut state = self.state.clone();
        let closed = state
            .wait_for(SessionState::is_closed)
            .await
            .map_err(|_| WatchError::SupervisorGone)?;
        Ok(closed.exit_status())
    }
}

impl Drop for InotifyWait {
    fn drop(&mut self) {
        if !self.state.borrow().is_closed() {
            trace!(root = %self.root.display(), "Watch handle dropped, stopping source");
            self.shutdown.notify_one();
        }
    }
}

/// Turns supervisor messages into events until the source has exited.
///
/// Decoded events outside `files`, when given, are dropped before
/// correlation.
async fn process_messages(
    mut rx: mpsc::Receiver<SourceMessage>,
    events: mpsc::Sender<WatchEvent>,
    mut correlator: Correlator,
    files: Option<FileFilter>,
    state: Arc<watch::Sender<SessionState>>,
    pid: Option<u32>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            SourceMessage::Line(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let raw = match parse_line(&line) {
                    Ok(raw) if files.as_ref().is_some_and(|f| !f.selects(&raw.path)) => {
                        trace!(path = %raw.path.display(), "Outside watched files, skipping");
                        continue;
                    }
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(line = %line, error = %e, "Failed to decode source line");
                        let timestamp = chrono::Utc::now();
                        emit(&events, WatchEvent::error(WatchError::Decode { line, source: e }))
                            .await;
                        RawEvent::placeholder(timestamp)
                    }
                };

                trace!(path = %raw.path.display(), tags = ?raw.tags, "Raw event");
                if let Some(event) = correlator.process(raw) {
                    emit(&events, event).await;
                }
            }
            SourceMessage::Diagnostic(line) => match classify_diagnostic(&line) {
                Some(Diagnostic::WatchesEstablished) => {
                    if !lifecycle::apply(&state, Transition::Established) {
                        continue;
                    }
                    info!(pid = ?pid, "Watches established");
                    if let Some(pid) = pid {
                        emit(
                            &events,
                            WatchEvent::Ready {
                                process: SourceProcess { pid },
                            },
                        )
                        .await;
                    }
                }
                Some(Diagnostic::SettingUpWatches) => {
                    debug!("Setting up watches");
                }
                Some(Diagnostic::Message(message)) => {
                    warn!(message = %message, "Notification source diagnostic");
                    emit(&events, WatchEvent::error(WatchError::Diagnostic(message))).await;
                }
                None => {}
            },
            SourceMessage::Failed(error) => {
                emit(&events, WatchEvent::error(error)).await;
            }
            SourceMessage::Exited(status) => {
                // Covers the spawn-failure path, where no supervisor runs.
                lifecycle::apply(&state, Transition::Exited(status));
                if correlator.pending_count() > 0 {
                    debug!(
                        pending = correlator.pending_count(),
                        "Discarding unresolved events"
                    );
                }
                emit(&events, WatchEvent::Close { status }).await;
                break;
            }
        }
    }

    debug!("Watch processing task finished");
}

async fn emit(events: &mpsc::Sender<WatchEvent>, event: WatchEvent) {
    let kind = event.kind();
    if events.send(event).await.is_err() {
        trace!(event = %kind, "Event receiver dropped");
    }
}
