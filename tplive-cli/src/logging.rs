//! Logging bootstrap.
//!
//! Stdout carries the host protocol, so console output always goes to stderr.

use anyhow::{Context, Result};
use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSection};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "tiktok_live=info,tplive=info";

/// Filter used with `--verbose`.
const VERBOSE_LOG_FILTER: &str = "tiktok_live=debug,tplive=debug";

/// Timestamps in the local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Pick the filter: verbose, then the configured directive, then `RUST_LOG`,
/// then the default.
pub fn build_filter(config: &LoggingSection, verbose: bool) -> Result<EnvFilter> {
    if verbose {
        return Ok(EnvFilter::new(VERBOSE_LOG_FILTER));
    }
    if let Some(directive) = &config.filter {
        return EnvFilter::try_new(directive)
            .with_context(|| format!("Invalid log filter directive {directive:?}"));
    }
    Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
}

/// Install the global subscriber.
///
/// Returns the file writer guard when a log file is configured; keep it alive
/// for the lifetime of the process.
pub fn init_logging(config: &LoggingSection, verbose: bool) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(config, verbose)?;

    let mut layers: Vec<BoxedLayer> = Vec::with_capacity(2);
    layers.push(match config.format {
        LogFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_timer(LocalTimer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_timer(LocalTimer)
            .boxed(),
    });

    let mut guard = None;
    if let Some(path) = &config.file {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .with_context(|| format!("Log file path {} has no file name", path.display()))?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

        let file_appender = tracing_appender::rolling::daily(dir, file_name);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
        layers.push(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer)
                .boxed(),
        );
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to set global default subscriber")?;

    Ok(guard)
}
