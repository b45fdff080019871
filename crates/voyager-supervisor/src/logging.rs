//! Logging setup
//!
//! The sink is chosen once from configuration. stdout is reserved for the UI
//! channel, so console output goes to stderr.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};
use voyager_config::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Disabled,
    Console,
    /// Append to a file, mirroring to the console when `echo` is set
    File { path: PathBuf, echo: bool },
}

impl LogSink {
    pub fn from_config(config: &Config) -> Self {
        if !config.logging {
            LogSink::Disabled
        } else {
            LogSink::File {
                path: config.main_log_path(),
                echo: config.development,
            }
        }
    }
}

/// Open a log file in append mode, creating it and its parent directory if needed
pub fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber for `sink`
///
/// A subscriber that was already installed (tests, embedding) is left alone.
pub fn init_logging(sink: &LogSink) -> std::io::Result<()> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    match sink {
        LogSink::Disabled => {}
        LogSink::Console => {
            let _ = tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_filter(filter()),
                )
                .try_init();
        }
        LogSink::File { path, echo } => {
            let mut file = open_append(path)?;
            writeln!(file, "{} Running Voyager\r", chrono::Local::now().to_rfc2822())?;
            let file = Arc::new(file);

            let console = echo.then(|| {
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(filter())
            });

            let _ = tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(file)
                        .with_ansi(false)
                        .with_target(true)
                        .with_filter(filter()),
                )
                .with(console)
                .try_init();

            tracing::info!("Redirecting console output to logfile {}", path.display());
        }
    }
    Ok(())
}
