//! gridmgr-jobs — asynchronous job orchestration.
//!
//! Creates, advances, and finalizes the multi-step background jobs of
//! the control plane: snapshot load (two-phase, completed by an upload
//! signal), snapshot save with a download contract, content purge, job
//! deletion with file cleanup, and credential-reset token issuance.
//! The persisted job record is the single source of truth for work
//! that outlives any single request; its status payload is rewritten
//! wholesale after every externally visible milestone.

pub mod error;
pub mod orchestrator;
pub mod reset;

pub use error::{JobError, JobResult};
pub use orchestrator::{JobOrchestrator, UploadComplete};
pub use reset::ResetTokenSigner;

use async_trait::async_trait;
use uuid::Uuid;

/// Caller identity, supplied by the external auth layer.
#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub user: Uuid,
    pub admin: bool,
}

impl Identity {
    /// Whether this caller may act on work owned by `owner`.
    pub fn can_act_for(&self, owner: Uuid) -> bool {
        self.admin || self.user == owner
    }
}

/// A user account as resolved by the deployment's account store.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
}

/// Lookup and credential updates against the external account store.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> JobResult<Option<Account>>;
    async fn set_credential(&self, account: Uuid, password: &str) -> JobResult<()>;
}

/// Delivers a minted reset token to the account's mailbox.
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn deliver_reset_token(&self, email: &str, token: &str) -> JobResult<()>;
}
