//! inwatch - deduplicated filesystem change events from inotifywait.
//!
//! This binary watches a directory tree and prints one line per high-level
//! event (`add`, `change`, `move`, `unlink`, ...) on stdout. Logs go to
//! stderr, so stdout can be piped into another program.
//!
//! # Environment Variables
//!
//! See the [`config`](inwatch::config) module for available configuration
//! options. Command-line arguments take precedence.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use inwatch::config::{Config, WatchOptions};
use inwatch::limits;
use inwatch::{InotifyWait, WatchEvent};

/// inwatch - deduplicated filesystem change events.
///
/// Runs inotifywait on a directory tree and reports each file addition,
/// change, move and deletion once, after the writer has closed the file.
#[derive(Parser, Debug)]
#[command(name = "inwatch")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    INWATCH_ROOT               Path to watch (default: current directory)
    INWATCH_RECURSIVE          Watch subdirectories (default: true)
    INWATCH_WATCH_DIRECTORY    Report directory events (default: false)
    INWATCH_EXCLUDES           Comma-separated exclusion patterns
    INWATCH_FILES              Comma-separated paths to restrict events to
    INWATCH_EVENTS             Comma-separated inotify event names
    INWATCH_BIN                inotifywait executable (default: inotifywait)
    INWATCH_BUFFER_SIZE        Event buffer size (default: 1000)

EXAMPLES:
    # Watch the current directory, printing JSON lines
    inwatch

    # Watch a tree, ignoring VCS metadata, with readable output
    inwatch /srv/data --exclude '\\.git/' --format text
")]
struct Cli {
    /// Path to watch (overrides INWATCH_ROOT).
    root: Option<PathBuf>,

    /// Report events for directories themselves.
    #[arg(long)]
    watch_directory: bool,

    /// Watch subdirectories of ROOT (overrides INWATCH_RECURSIVE=false).
    #[arg(long, overrides_with = "no_recursive")]
    recursive: bool,

    /// Only watch the top level of ROOT.
    #[arg(long, overrides_with = "recursive")]
    no_recursive: bool,

    /// Ignore paths matching this POSIX extended regex. Repeatable.
    #[arg(long = "exclude", value_name = "PATTERN")]
    excludes: Vec<String>,

    /// Only report events for this path (and anything beneath it). Repeatable.
    #[arg(long = "file", value_name = "PATH")]
    files: Vec<String>,

    /// Only listen for this inotify event, e.g. `close_write`. Repeatable.
    #[arg(long = "event", value_name = "EVENT")]
    events: Vec<String>,

    /// inotifywait executable to run.
    #[arg(long, value_name = "PATH")]
    bin: Option<PathBuf>,

    /// Output format for events on stdout.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

/// How events are written to stdout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable `<event> <path>` lines.
    Text,
}

impl Cli {
    /// Applies command-line overrides on top of the environment configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(root) = &self.root {
            config.root = root.clone();
        }

        let options = &mut config.options;
        if self.watch_directory {
            options.watch_directory = true;
        }
        if self.recursive {
            options.recursive = true;
        }
        if self.no_recursive {
            options.recursive = false;
        }
        options.excludes.extend(self.excludes.iter().cloned());
        options.files.extend(self.files.iter().cloned());
        options.events.extend(self.events.iter().cloned());
        if let Some(bin) = &self.bin {
            options.bin = bin.clone();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env().context("Failed to load configuration")?;
    cli.apply(&mut config);

    info!(
        root = %config.root.display(),
        recursive = config.options.recursive,
        watch_directory = config.options.watch_directory,
        bin = %config.options.bin.display(),
        "Configuration loaded"
    );

    check_inotify_limits(&config.options);

    let (tx, mut rx) = mpsc::channel(config.options.channel_capacity);
    let watch = InotifyWait::spawn(config.root.clone(), config.options.clone(), tx);

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);
    let mut closing = false;

    loop {
        tokio::select! {
            result = &mut shutdown, if !closing => {
                result.context("Failed to install signal handlers")?;
                info!("Shutdown signal received, closing watch");
                closing = true;

                let status = watch.close().await.context("Failed to close watch")?;
                debug!(status = ?status, "Watch closed, draining remaining events");
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    bail!("event channel closed before the watch reported close");
                };

                print_event(&event, cli.format)?;

                if let WatchEvent::Close { status } = event {
                    if closing {
                        info!("Shutdown complete");
                        return Ok(());
                    }
                    match status {
                        Some(status) if status.success() => {
                            info!("Notification source finished");
                            return Ok(());
                        }
                        Some(status) => bail!("notification source exited unexpectedly ({status})"),
                        None => bail!("notification source could not be run"),
                    }
                }
            }
        }
    }
}

/// Writes one event to stdout in the requested format.
fn print_event(event: &WatchEvent, format: OutputFormat) -> Result<()> {
    let mut stdout = io::stdout().lock();
    let written = match format {
        OutputFormat::Json => {
            serde_json::to_writer(&mut stdout, event).context("Failed to serialize event")?;
            writeln!(stdout)
        }
        OutputFormat::Text => writeln!(stdout, "{event}"),
    };
    written.context("Failed to write event to stdout")?;
    stdout.flush().context("Failed to flush stdout")
}

/// Warns when a recursive watch is likely to exceed the inotify watch limit.
fn check_inotify_limits(options: &WatchOptions) {
    match limits::inotify_limits() {
        Ok(limits) if options.recursive && limits.is_watch_limit_low() => {
            warn!(
                max_user_watches = limits.max_user_watches,
                "inotify watch limit is low, large trees may not be fully watched \
                 (raise fs.inotify.max_user_watches)"
            );
        }
        Ok(limits) => {
            debug!(
                max_user_watches = limits.max_user_watches,
                max_user_instances = limits.max_user_instances,
                max_queued_events = limits.max_queued_events,
                "inotify limits"
            );
        }
        Err(e) => {
            debug!(error = %e, "Could not read inotify limits");
        }
    }
}

/// Initializes the tracing subscriber with environment-based filtering.
///
/// Logs are written to stderr; stdout carries only events.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() -> io::Result<()> {
    #[cfg(unix)]
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    #[cfg(unix)]
    let terminate = async move {
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = signal::ctrl_c() => result,
        () = terminate => Ok(()),
    }
}
