use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Overrides the debug log's filter, e.g. `CJINX_LOG=info`.
pub const LOG_ENV: &str = "CJINX_LOG";

/// Debug file gets everything (`CJINX_LOG`, default `debug`); stdout gets
/// `INFO` and above unless `quiet`.
pub fn init(debug_log: &Path, quiet: bool) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(debug_log)
        .with_context(|| format!("open debug log {}", debug_log.display()))?;
    let file_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("debug"));
    let file_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .with_filter(file_filter);

    let console_layer = (!quiet).then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(std::io::stdout().is_terminal())
            .with_target(false)
            .without_time()
            .with_filter(LevelFilter::INFO)
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(())
}
