//! Shared error type across promstat crates.

use thiserror::Error;

/// Shared result type.
pub type Result<T> = std::result::Result<T, StatsError>;

/// Unified error type used by core and server.
#[derive(Debug, Error)]
pub enum StatsError {
    /// The metrics listener could not bind its address (port in use, permission denied).
    #[error("router failed to start on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    /// The listener failed while serving.
    #[error("serve failed: {0}")]
    Serve(String),
    /// A measure sink rejected a flush.
    #[error("sink rejected flush: {0}")]
    Sink(String),
    /// Invalid or unreadable configuration.
    #[error("invalid config: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl StatsError {
    /// Whether this error came from the network listener.
    pub fn is_transport(&self) -> bool {
        matches!(self, StatsError::Bind { .. } | StatsError::Serve(_))
    }
}
