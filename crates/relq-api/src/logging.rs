//! Logging configuration for relq
//!
//! The engine reports through `tracing`: strategy choices and dropped
//! descriptor keys at `debug`, rendered statements at `trace`. This module
//! installs a subscriber for applications that have none of their own.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter that shows every executed statement
const SQL_FILTER: &str = "info,relq=trace,relq_core=debug";

/// Log output destination
#[derive(Debug, Clone)]
pub enum LogOutput {
    Stdout,
    /// Daily-rotated file
    File(PathBuf),
    /// Stdout and a daily-rotated file
    Both(PathBuf),
}

/// Log format style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human oriented
    Pretty,
    /// One line per event
    Compact,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set
    pub level: String,
    pub output: LogOutput,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stdout,
            format: LogFormat::Compact,
        }
    }
}

impl LogConfig {
    pub fn info() -> Self {
        Self::default()
    }

    /// Strategy decisions and dropped descriptor keys
    pub fn debug() -> Self {
        Self::default().with_level("debug")
    }

    /// Every statement sent to the executor, rendered as SQL
    pub fn sql() -> Self {
        Self::default().with_level(SQL_FILTER)
    }

    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::File(path.into());
        self
    }

    pub fn with_both<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::Both(path.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level<S: Into<String>>(mut self, level: S) -> Self {
        self.level = level.into();
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Install the global subscriber.
    ///
    /// Returns the file writer's guard, which must stay alive for buffered
    /// events to reach the file. Does nothing when a global subscriber is
    /// already installed.
    ///
    /// ```rust,no_run
    /// use relq::logging::LogConfig;
    ///
    /// let _guard = LogConfig::sql().init();
    /// ```
    pub fn init(self) -> Option<WorkerGuard> {
        let filter = self.filter();
        match self.output {
            LogOutput::Stdout => {
                let result = match self.format {
                    LogFormat::Pretty => tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().pretty())
                        .try_init(),
                    LogFormat::Compact => tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().compact())
                        .try_init(),
                };
                if result.is_err() {
                    tracing::debug!("global subscriber already installed");
                }
                None
            }
            LogOutput::File(path) => {
                let (writer, guard) = rolling_writer(&path);
                let result = match self.format {
                    LogFormat::Pretty => tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().with_writer(writer).with_ansi(false).pretty())
                        .try_init(),
                    LogFormat::Compact => tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().with_writer(writer).with_ansi(false).compact())
                        .try_init(),
                };
                result.ok().map(|_| guard)
            }
            LogOutput::Both(path) => {
                let (writer, guard) = rolling_writer(&path);
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().compact())
                    .with(fmt::layer().with_writer(writer).with_ansi(false).compact())
                    .try_init()
                    .ok()
                    .map(|_| guard)
            }
        }
    }
}

fn rolling_writer(path: &Path) -> (NonBlocking, WorkerGuard) {
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("relq.log");
    tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, file_name))
}
