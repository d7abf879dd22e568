//! Notification source supervisor.
//!
//! Launches `inotifywait` in monitor mode, drains its stdout and stderr on
//! two independent reader tasks and waits for it to exit. Everything the
//! source produces is forwarded as a [`SourceMessage`] on one channel, ending
//! with exactly one [`SourceMessage::Exited`].

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WatchOptions;
use crate::error::WatchError;
use crate::lifecycle::{self, SessionState, Transition};
use crate::types::SourceExit;

/// Output format requested from the source, one JSON object per event.
pub(crate) const EVENT_FORMAT: &str = r#"{ "type": "%e", "file": "%w%f", "date": "%T" }"#;

/// Messages from the supervisor to the processing task.
#[derive(Debug)]
pub(crate) enum SourceMessage {
    /// A line from stdout.
    Line(String),
    /// A line from stderr.
    Diagnostic(String),
    /// A process-level failure.
    Failed(WatchError),
    /// The source is gone and both streams are drained. Always last.
    Exited(Option<SourceExit>),
}

/// Builds the source's argument list.
///
/// No `-q` is passed: the readiness line is printed on stderr and is what
/// moves the session to `Ready`.
///
/// inotifywait holds a single path regex, set by either `--exclude` or
/// `--include`. All excludes are joined into one `--exclude`. When both
/// excludes and files are configured, only the exclude is passed and the
/// files are applied by [`local_file_filter`] instead.
pub(crate) fn build_args(root: &Path, options: &WatchOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();

    if options.recursive {
        args.push("-r".into());
    }
    args.push("-m".into());
    args.push("--format".into());
    args.push(EVENT_FORMAT.into());
    args.push("--timefmt".into());
    args.push("%s".into());

    if let Some(exclude) = exclude_pattern(&options.excludes) {
        args.push("--exclude".into());
        args.push(exclude.into());
    } else if let Some(include) = include_pattern(&options.files) {
        args.push("--include".into());
        args.push(include.into());
    }

    for event in &options.events {
        args.push("--event".into());
        args.push(event.into());
    }

    args.push(root.as_os_str().to_owned());
    args
}

/// The `files` restriction the source cannot apply itself, if any.
pub(crate) fn local_file_filter(options: &WatchOptions) -> Option<FileFilter> {
    if options.excludes.is_empty() || options.files.is_empty() {
        return None;
    }
    Some(FileFilter::new(&options.files))
}

/// Keeps events for a set of literal paths and anything beneath them.
///
/// Matches whole path components, the same selection the `--include` regex
/// from [`include_pattern`] makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileFilter {
    files: Vec<PathBuf>,
}

impl FileFilter {
    pub(crate) fn new<S: AsRef<str>>(files: &[S]) -> Self {
        Self {
            files: files.iter().map(|f| PathBuf::from(f.as_ref())).collect(),
        }
    }

    pub(crate) fn selects(&self, path: &Path) -> bool {
        self.files.iter().any(|file| path.starts_with(file))
    }
}

/// Joins exclude patterns into one extended regex.
fn exclude_pattern(excludes: &[String]) -> Option<String> {
    match excludes {
        [] => None,
        [single] => Some(single.clone()),
        many => {
            let alternatives: Vec<String> = many.iter().map(|p| format!("({p})")).collect();
            Some(alternatives.join("|"))
        }
    }
}

/// Turns literal paths into one extended regex matching each path and
/// anything beneath it.
fn include_pattern(files: &[String]) -> Option<String> {
    if files.is_empty() {
        return None;
    }

    let alternatives: Vec<String> = files.iter().map(|f| escape_regex(f)).collect();
    Some(format!("^({})(/|$)", alternatives.join("|")))
}

fn escape_regex(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(
            c,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Starts the source and its supervisor task.
///
/// Returns the source's pid, or `None` if it could not be started. A failed
/// start is reported on `tx` as `Failed` followed by `Exited(None)`, and the
/// session state is set to `Closed(None)` before this returns.
///
/// Must be called from within a Tokio runtime.
pub(crate) fn launch(
    root: &Path,
    options: &WatchOptions,
    tx: mpsc::Sender<SourceMessage>,
    state: Arc<watch::Sender<SessionState>>,
    shutdown: Arc<Notify>,
) -> Option<u32> {
    let mut command = Command::new(&options.bin);
    command
        .args(build_args(root, options))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let spawn = &options.spawn;
    if spawn.env_clear {
        command.env_clear();
    }
    command.envs(&spawn.env);
    if let Some(dir) = &spawn.current_dir {
        command.current_dir(dir);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!(bin = %options.bin.display(), error = %e, "Failed to spawn notification source");
            lifecycle::apply(&state, Transition::Exited(None));

            let failure = WatchError::Spawn {
                bin: options.bin.clone(),
                source: e,
            };
            tokio::spawn(async move {
                let _ = tx.send(SourceMessage::Failed(failure)).await;
                let _ = tx.send(SourceMessage::Exited(None)).await;
            });
            return None;
        }
    };

    let pid = child.id();
    info!(
        pid = ?pid,
        bin = %options.bin.display(),
        root = %root.display(),
        recursive = options.recursive,
        "Notification source started"
    );

    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(read_lines(
            stdout,
            tx.clone(),
            SourceMessage::Line,
            "stdout",
        )));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(read_lines(
            stderr,
            tx.clone(),
            SourceMessage::Diagnostic,
            "stderr",
        )));
    }

    tokio::spawn(supervise(child, readers, tx, state, shutdown));
    pid
}

/// Forwards each line of `stream` until EOF.
///
/// Invalid UTF-8 is replaced rather than rejected so that odd file names
/// still reach the decoder.
async fn read_lines<R>(
    stream: R,
    tx: mpsc::Sender<SourceMessage>,
    wrap: fn(String) -> SourceMessage,
    name: &'static str,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(wrap(line)).await.is_err() {
                    debug!(stream = name, "Processing task gone, stopping reader");
                    break;
                }
            }
            Err(e) => {
                warn!(stream = name, error = %e, "Failed to read from notification source");
                break;
            }
        }
    }

    debug!(stream = name, "Reader finished");
}

async fn supervise(
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    tx: mpsc::Sender<SourceMessage>,
    state: Arc<watch::Sender<SessionState>>,
    shutdown: Arc<Notify>,
) {
    let waited = tokio::select! {
        status = child.wait() => status,
        () = shutdown.notified() => {
            lifecycle::apply(&state, Transition::CloseRequested);
            debug!(pid = ?child.id(), "Terminating notification source");
            if let Err(e) = terminate(&mut child) {
                warn!(error = %e, "Failed to signal notification source");
                let _ = tx.send(SourceMessage::Failed(WatchError::Process(e))).await;
            }
            child.wait().await
        }
    };

    let status = match waited {
        Ok(status) => Some(SourceExit::from(status)),
        Err(e) => {
            error!(error = %e, "Failed to wait for notification source");
            let _ = tx.send(SourceMessage::Failed(WatchError::Process(e))).await;
            None
        }
    };

    // Publish the final state before draining, so `close()` does not depend
    // on the event consumer making progress.
    lifecycle::apply(&state, Transition::Exited(status));
    match status {
        Some(status) => info!(%status, "Notification source exited"),
        None => info!("Notification source exited with unknown status"),
    }

    for reader in readers {
        let _ = reader.await;
    }
    let _ = tx.send(SourceMessage::Exited(status)).await;
}

/// Asks the source to exit with SIGTERM.
fn terminate(child: &mut Child) -> io::Result<()> {
    match child.id() {
        Some(pid) => send_terminate(child, pid),
        None => Ok(()),
    }
}

#[cfg(unix)]
fn send_terminate(_child: &mut Child, pid: u32) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(errno.into()),
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, _pid: u32) -> io::Result<()> {
    child.start_kill()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(options: &WatchOptions) -> Vec<String> {
        build_args(Path::new("/tmp/w"), options)
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect()
    }

    #[test]
    fn default_args() {
        assert_eq!(
            args(&WatchOptions::default()),
            vec!["-r", "-m", "--format", EVENT_FORMAT, "--timefmt", "%s", "/tmp/w"]
        );
    }

    #[test]
    fn non_recursive_omits_flag() {
        let args = args(&WatchOptions::default().with_recursive(false));
        assert_eq!(args[0], "-m");
        assert!(!args.contains(&"-r".to_string()));
        assert!(!args.contains(&"-q".to_string()));
    }

    #[test]
    fn filters_precede_root() {
        let options = WatchOptions::default()
            .with_exclude(r"\.git")
            .with_exclude("node_modules")
            .with_file("/tmp/w/a.txt")
            .with_event("create")
            .with_event("close_write");

        let args = args(&options);
        let tail: Vec<&str> = args[6..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "--exclude",
                r"(\.git)|(node_modules)",
                "--event",
                "create",
                "--event",
                "close_write",
                "/tmp/w",
            ]
        );
    }

    #[test]
    fn excludes_are_joined_into_one_flag() {
        let options = WatchOptions::default()
            .with_exclude("a$")
            .with_exclude("b$")
            .with_exclude("c$");

        let args = args(&options);
        assert_eq!(args.iter().filter(|a| *a == "--exclude").count(), 1);
        let at = args.iter().position(|a| a == "--exclude").unwrap();
        assert_eq!(args[at + 1], "(a$)|(b$)|(c$)");
    }

    #[test]
    fn single_exclude_is_passed_unchanged() {
        let args = args(&WatchOptions::default().with_exclude(r"\.swp$"));
        assert_eq!(args[6..8], ["--exclude".to_string(), r"\.swp$".to_string()]);
    }

    #[test]
    fn files_alone_become_include() {
        let options = WatchOptions::default()
            .with_file("/tmp/w/a.txt")
            .with_file("/tmp/w/sub");

        let args = args(&options);
        assert!(!args.contains(&"--exclude".to_string()));
        assert_eq!(
            args[6..8],
            [
                "--include".to_string(),
                r"^(/tmp/w/a\.txt|/tmp/w/sub)(/|$)".to_string()
            ]
        );
        assert_eq!(local_file_filter(&options), None);
    }

    #[test]
    fn files_with_excludes_are_filtered_locally() {
        let options = WatchOptions::default()
            .with_exclude("a$")
            .with_exclude("b$")
            .with_file("/w/keep");

        let args = args(&options);
        assert!(!args.contains(&"--include".to_string()));
        assert_eq!(args.iter().filter(|a| *a == "--exclude").count(), 1);

        let filter = local_file_filter(&options).expect("local filter");
        assert_eq!(filter, FileFilter::new(&["/w/keep"]));
    }

    #[test]
    fn file_filter_matches_whole_components() {
        let filter = FileFilter::new(&["/w/keep", "/w/dir/"]);

        assert!(filter.selects(Path::new("/w/keep")));
        assert!(filter.selects(Path::new("/w/keep/inner.txt")));
        assert!(filter.selects(Path::new("/w/dir")));
        assert!(filter.selects(Path::new("/w/dir/x/y")));
        assert!(!filter.selects(Path::new("/w/keeper")));
        assert!(!filter.selects(Path::new("/w/other")));
        assert!(!filter.selects(Path::new("")));
    }

    #[test]
    fn include_pattern_joins_and_escapes() {
        assert_eq!(include_pattern(&[]), None);
        assert_eq!(
            include_pattern(&["/a/b(1).txt".to_string(), "/c".to_string()]),
            Some(r"^(/a/b\(1\)\.txt|/c)(/|$)".to_string())
        );
    }

    #[test]
    fn format_is_decodable() {
        let line = EVENT_FORMAT
            .replace("%e", "CREATE")
            .replace("%w%f", "/tmp/w/a")
            .replace("%T", "1700000000");
        let raw = crate::parser::parse_line(&line).unwrap();
        assert_eq!(raw.path, PathBuf::from("/tmp/w/a"));
    }

    #[tokio::test]
    async fn launch_failure_reports_and_closes() {
        let (tx, mut rx) = mpsc::channel(8);
        let (state, mut state_rx) = watch::channel(SessionState::Starting);
        let options = WatchOptions::default().with_bin("/nonexistent/inwatch-missing-bin");

        let pid = launch(
            Path::new("/tmp"),
            &options,
            tx,
            Arc::new(state),
            Arc::new(Notify::new()),
        );

        assert!(pid.is_none());
        assert_eq!(*state_rx.borrow_and_update(), SessionState::Closed(None));

        match rx.recv().await {
            Some(SourceMessage::Failed(WatchError::Spawn { bin, .. })) => {
                assert_eq!(bin, PathBuf::from("/nonexistent/inwatch-missing-bin"));
            }
            other => panic!("expected spawn failure, got {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some(SourceMessage::Exited(None))));
        assert!(rx.recv().await.is_none());
    }
}
