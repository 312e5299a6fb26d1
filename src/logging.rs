//! Tracing setup: console output plus an optional log file.
//!
//! Console lines go to stderr through [`ProgressWriter`], which hides the
//! progress bars while a line is written. The log file gets the same events
//! without ANSI colours.
//!
//! `RUST_LOG` overrides `--log-level` for both outputs.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use indicatif::MultiProgress;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use crate::types::LogLevel;

/// Console writer that suspends every bar in `progress` around each write.
#[derive(Clone)]
pub struct ProgressWriter {
    progress: MultiProgress,
}

impl ProgressWriter {
    pub fn new(progress: MultiProgress) -> Self {
        Self { progress }
    }
}

impl Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.progress.suspend(|| io::stderr().write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for ProgressWriter {
    type Writer = ProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Open `path` for appending, creating it and its parent directory.
pub fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn build_subscriber(
    filter: EnvFilter,
    progress: MultiProgress,
    log_file: Option<File>,
) -> impl Subscriber + Send + Sync {
    let console = tracing_subscriber::fmt::layer().with_writer(ProgressWriter::new(progress));
    let file = log_file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
}

/// Install the global subscriber.
pub fn init(
    level: LogLevel,
    progress: MultiProgress,
    log_file: Option<&Path>,
) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    let file = log_file
        .map(|path| {
            open_log_file(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))
        })
        .transpose()?;
    tracing::subscriber::set_global_default(build_subscriber(filter, progress, file))
        .context("Failed to install tracing subscriber")
}
