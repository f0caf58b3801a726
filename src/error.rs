//! Error taxonomy for the wrapper.
//!
//! Each variant corresponds to one entry in the failure taxonomy: some are
//! fatal before the coordinator starts, some are event-local and never stop
//! the session, and some promote the session into its `Error` terminal
//! state. See the component docs for which is which.

use std::path::PathBuf;
use thiserror::Error;

/// The wrapper's structured error type.
///
/// `main` (and anything gluing multiple subsystems together) works in
/// `anyhow::Result` and wraps these with `.context(...)`; internal
/// components return `Result<T, WrapError>` directly so callers can match on
/// the taxonomy instead of string-sniffing an `anyhow::Error`.
#[derive(Debug, Error)]
pub enum WrapError {
    /// Invalid flags, unreadable or unparsable config file. Fatal before the
    /// coordinator starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The wrapped binary could not be located on PATH or in any well-known
    /// install location. Fatal.
    #[error("could not locate wrapped binary '{name}' (searched: {searched:?})")]
    BinaryNotFound { name: String, searched: Vec<PathBuf> },

    /// The proxy's requested port is already bound. Fatal for the proxy; the
    /// coordinator may retry on an adjacent port.
    #[error("port {0} already in use")]
    PortInUse(u16),

    /// An event failed schema validation. Event-local: the event is dropped
    /// and a counter incremented, never fatal to the session.
    #[error("event validation failed: {0}")]
    Validation(String),

    /// Sanitization could not be applied to a payload. Never fatal; the
    /// caller falls back to leaving the payload unsanitized and logs a
    /// warning.
    #[error("sanitization failed: {0}")]
    Sanitization(String),

    /// An upstream connection attempt failed. Turned into a `*_error` event
    /// and a 502 to the client; never fatal to the session.
    #[error("upstream network error: {0}")]
    UpstreamNetwork(String),

    /// The writer exhausted its retry budget appending to the log. The only
    /// per-event failure that aborts the coordinator's select loop outright
    /// and surfaces as an `Err` from `run()`, which is the one thing that
    /// gives the wrapper process itself a non-zero exit code.
    #[error("event lost: writer exhausted retries appending to {path}: {source}")]
    EventLoss {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The wrapped binary exited with a non-zero status. Recorded as an
    /// event and the session's own status, but never propagated into the
    /// wrapper process's own exit code — see `coordinator::Coordinator::run`.
    #[error("wrapped binary exited with code {0:?}")]
    ChildCrash(Option<i32>),

    /// Passthrough for I/O failures that don't fit a more specific variant
    /// (directory creation, temp-file rename, etc).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WrapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_human_readable() {
        let err = WrapError::PortInUse(8080);
        assert_eq!(err.to_string(), "port 8080 already in use");
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let err: WrapError = io_err.into();
        assert!(matches!(err, WrapError::Io(_)));
    }
}
