//! Diagnostics for subway.
//!
//! Operator-facing messages (onion address, serving URL, shutdown progress)
//! are plain stdout. Diagnostics go through `tracing`: tor shares the console,
//! so stderr only shows warnings unless `-v` or `RUST_LOG` asks for more,
//! while `--log-file` records debug detail independently of the console.

use std::path::{Path, PathBuf};

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Fallback file name when `--log-file` names a directory-like path
const DEFAULT_LOG_FILE: &str = "subway.log";

/// How chatty stderr diagnostics are, from repeated `-v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Warnings and errors
    #[default]
    Quiet,
    /// Lifecycle stages and other info events
    Normal,
    Verbose,
    Trace,
}

impl Verbosity {
    pub fn from_occurrences(count: u8) -> Self {
        match count {
            0 => Verbosity::Quiet,
            1 => Verbosity::Normal,
            2 => Verbosity::Verbose,
            _ => Verbosity::Trace,
        }
    }

    pub fn as_level_filter(&self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::WARN,
            Verbosity::Normal => LevelFilter::INFO,
            Verbosity::Verbose => LevelFilter::DEBUG,
            Verbosity::Trace => LevelFilter::TRACE,
        }
    }

    /// Level recorded in the log file: never less than debug.
    fn file_level_filter(&self) -> LevelFilter {
        self.as_level_filter().max(LevelFilter::DEBUG)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Stderr verbosity; `RUST_LOG` takes precedence when set.
    pub verbosity: Verbosity,
    /// Optional file that receives debug-level diagnostics.
    pub log_file: Option<PathBuf>,
}

/// Keeps the background log file writer alive; dropping it flushes the file.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
///
/// Keep the returned guard alive until the process exits.
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let (subscriber, guard) = build_subscriber(config);
    subscriber.init();
    guard
}

/// Assemble the stderr layer and, if configured, the file layer.
///
/// Each layer carries its own filter so the file is not limited by the
/// console verbosity.
fn build_subscriber(config: &LogConfig) -> (impl Subscriber + Send + Sync + 'static, LogGuard) {
    let console_filter = EnvFilter::builder()
        .with_default_directive(config.verbosity.as_level_filter().into())
        .from_env_lossy();

    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_timer(fmt::time::uptime())
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let (file_layer, file_guard) = match config.log_file.as_deref() {
        Some(path) => {
            let (dir, name) = split_log_path(path);
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = fmt::layer()
                .with_ansi(false)
                .with_thread_ids(true)
                .with_timer(fmt::time::uptime())
                .with_writer(writer)
                .with_filter(config.verbosity.file_level_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer);

    (
        subscriber,
        LogGuard {
            _file_guard: file_guard,
        },
    )
}

fn split_log_path(path: &Path) -> (&Path, &str) {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    (dir, name)
}
