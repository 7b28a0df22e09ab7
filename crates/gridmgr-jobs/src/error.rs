//! Job orchestration error types.

use thiserror::Error;

/// Result type alias for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Errors that can occur while creating or advancing jobs.
#[derive(Debug, Error)]
pub enum JobError {
    /// A precondition on the target region or input was violated.
    #[error("{0}")]
    InvalidState(String),

    /// The caller is neither the owning user nor an admin.
    #[error("permission denied")]
    PermissionDenied,

    /// The job exists but is the wrong kind for the requested action.
    #[error("invalid action for job type: {0}")]
    InvalidJobType(String),

    /// Reset token failed signature or expiry verification.
    #[error("invalid token")]
    InvalidToken,

    #[error("not found: {0}")]
    NotFound(String),

    /// Token could not be minted.
    #[error("failed to sign reset token: {0}")]
    Signing(String),

    /// The notification collaborator refused delivery.
    #[error("failed to deliver reset token: {0}")]
    Notify(String),

    #[error("state store error: {0}")]
    State(#[from] gridmgr_state::StateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Placement(#[from] gridmgr_placement::PlacementError),
}
