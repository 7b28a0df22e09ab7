//! Bundled collaborator implementations for deployments without an
//! external account store or mailer.
//!
//! `FileAccounts` reads a JSON account list and persists credential
//! updates back to it; `LogNotifier` records minted reset tokens in the
//! daemon log for the operator to relay. Production deployments replace
//! both with their own `AccountDirectory` / `ResetNotifier`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use gridmgr_jobs::{Account, AccountDirectory, JobError, JobResult, ResetNotifier};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredAccount {
    id: Uuid,
    display_name: String,
    email: String,
    #[serde(default)]
    credential: String,
}

/// JSON-file-backed account directory.
pub struct FileAccounts {
    path: PathBuf,
    accounts: RwLock<Vec<StoredAccount>>,
}

impl FileAccounts {
    /// Load the account list; a missing file is an empty directory.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let accounts = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            accounts: RwLock::new(accounts),
        })
    }

    async fn persist(&self, accounts: &[StoredAccount]) -> JobResult<()> {
        let bytes = serde_json::to_vec_pretty(accounts)
            .map_err(|e| JobError::InvalidState(e.to_string()))?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl AccountDirectory for FileAccounts {
    async fn find_by_email(&self, email: &str) -> JobResult<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .map(|a| Account {
                id: a.id,
                display_name: a.display_name.clone(),
                email: a.email.clone(),
            }))
    }

    async fn set_credential(&self, account: Uuid, password: &str) -> JobResult<()> {
        let mut accounts = self.accounts.write().await;
        let entry = accounts
            .iter_mut()
            .find(|a| a.id == account)
            .ok_or_else(|| JobError::NotFound(format!("account {account}")))?;
        entry.credential = password.to_string();
        self.persist(&accounts).await
    }
}

/// Writes minted reset tokens to the daemon log instead of a mailbox.
pub struct LogNotifier;

#[async_trait]
impl ResetNotifier for LogNotifier {
    async fn deliver_reset_token(&self, email: &str, token: &str) -> JobResult<()> {
        info!(%email, %token, "reset token minted; relay it to the account holder");
        Ok(())
    }
}
