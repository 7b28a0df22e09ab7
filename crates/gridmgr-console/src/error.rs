//! Console client error types.

use thiserror::Error;

/// Result type alias for console operations.
pub type ConsoleResult<T> = Result<T, ConsoleError>;

/// Errors from the remote console protocol.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// The control endpoint rejected the configured credentials.
    #[error("console authentication failed: {0}")]
    AuthFailed(String),

    /// The host could not be contacted (connect error or timeout).
    #[error("host unreachable: {0}")]
    Unreachable(String),

    /// The session was established but a protocol write failed.
    #[error("console transport error: {0}")]
    Transport(String),
}
