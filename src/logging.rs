//! Diagnostics via `tracing`.
//!
//! Diagnostics go to stderr except while a dashboard owns the terminal; an optional log
//! file receives everything regardless.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

static TERMINAL_OWNED: AtomicBool = AtomicBool::new(false);

/// Mark whether a full-screen dashboard currently owns the terminal.
pub fn set_terminal_owned(owned: bool) {
    TERMINAL_OWNED.store(owned, Ordering::Relaxed);
}

pub fn terminal_owned() -> bool {
    TERMINAL_OWNED.load(Ordering::Relaxed)
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: Option<String>,
    pub file: Option<PathBuf>,
}

/// Stderr writer that goes quiet while a dashboard is drawing.
#[derive(Clone, Copy)]
pub struct GatedStderr;

pub enum GatedStderrWriter {
    Stderr(std::io::Stderr),
    Suppressed,
}

impl Write for GatedStderrWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Stderr(w) => w.write(buf),
            Self::Suppressed => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stderr(w) => w.flush(),
            Self::Suppressed => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for GatedStderr {
    type Writer = GatedStderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        if terminal_owned() {
            GatedStderrWriter::Suppressed
        } else {
            GatedStderrWriter::Stderr(std::io::stderr())
        }
    }
}

pub fn init_logging(config: &LogConfig) -> Result<()> {
    let level = config.level.as_deref().unwrap_or("warn");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(GatedStderr).with_target(false))
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(())
}
