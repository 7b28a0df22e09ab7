//! Placement error types.

use thiserror::Error;

/// Errors that can occur during placement and lifecycle operations.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// A lifecycle or placement precondition was violated.
    #[error("{0}")]
    InvalidState(String),

    /// No free port remains on the target host.
    #[error("no available ports on host {0}")]
    NoCapacity(String),

    /// The requested change is a no-op.
    #[error("{0}")]
    NoOp(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Console(#[from] gridmgr_console::ConsoleError),

    #[error("state store error: {0}")]
    State(#[from] gridmgr_state::StateError),
}

pub type PlacementResult<T> = Result<T, PlacementError>;
