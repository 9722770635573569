use std::io::{self, IsTerminal};

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Pretty,
    /// One JSON object per event, span fields included.
    Json,
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("A global tracing subscriber is already installed: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("A `log` logger is already installed: {0}")]
    LogBridge(#[from] log::SetLoggerError),
}

/// Pretty output on a terminal, JSON otherwise.
pub fn default_log_format() -> LogFormat {
    if io::stderr().is_terminal() {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

/// Installs the global subscriber. Filtering follows `RUST_LOG`, defaulting
/// to `info`. Records emitted through the `log` facade are forwarded to it.
/// Output goes to stderr.
pub fn init_logging(format: LogFormat) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => {
            let layer = fmt::layer().with_writer(io::stderr).with_target(false);
            tracing::subscriber::set_global_default(registry.with(layer))?;
        }
        LogFormat::Json => {
            let layer = fmt::layer()
                .with_writer(io::stderr)
                .json()
                .flatten_event(true)
                .with_current_span(true);
            tracing::subscriber::set_global_default(registry.with(layer))?;
        }
    }

    tracing_log::LogTracer::init()?;
    Ok(())
}
