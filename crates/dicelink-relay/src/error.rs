//! Error types for the relay hub.

/// Errors from running the hub. Problems with a single client only end
/// that client's connection and are logged, never returned here.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The listening socket could not be bound.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Reading the bound address failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
