//! Headless structured logging via `tracing` + `tracing-subscriber`.
//!
//! This wrapper has no TUI, so there is no in-memory log buffer to protect
//! from an alternate screen — logs go straight to stdout, with an optional
//! rotating file sink under the session's trace root.

use std::path::Path;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// A guard that must be held for the lifetime of the process when file
/// logging is enabled; dropping it stops the non-blocking writer thread.
pub type LogGuard = Option<tracing_appender::non_blocking::WorkerGuard>;

/// Initialize the global tracing subscriber.
///
/// Precedence: `RUST_LOG` env var > the level baked into `config.logging`
/// by CLI flags > the config file's `[logging]` level > the built-in
/// default `info`.
pub fn init(config: &Config, session_log_dir: Option<&Path>) -> LogGuard {
    let default_filter = format!("tracewrap={},hyper=warn", config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    if config.logging.to_file {
        if let Some(dir) = session_log_dir {
            if std::fs::create_dir_all(dir).is_ok() {
                let file_appender = tracing_appender::rolling::never(dir, "wrapper.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(non_blocking)
                            .with_ansi(false),
                    )
                    .init();
                return Some(guard);
            }
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    None
}
