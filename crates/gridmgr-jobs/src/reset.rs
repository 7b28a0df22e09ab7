//! Credential-reset tokens and the two-step reset flow.
//!
//! A reset token is a signed, time-limited HS256 claim binding an
//! email address. Issuance and commit each record an audit job row so
//! the account's job history shows both halves of the flow.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use gridmgr_state::{JobKind, JobPayload, store::epoch_secs};

use crate::error::{JobError, JobResult};
use crate::orchestrator::JobOrchestrator;

/// Claims carried by a reset token.
#[derive(Debug, Serialize, Deserialize)]
struct ResetClaims {
    email: String,
    iat: u64,
    exp: u64,
}

/// Mints and verifies reset tokens with a per-deployment secret.
#[derive(Clone)]
pub struct ResetTokenSigner {
    secret: String,
    ttl: Duration,
}

impl ResetTokenSigner {
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    /// Sign a token binding `email`, expiring after the configured TTL.
    pub fn mint(&self, email: &str) -> JobResult<String> {
        let now = epoch_secs();
        let claims = ResetClaims {
            email: email.to_string(),
            iat: now,
            exp: now + self.ttl.as_secs(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| JobError::Signing(e.to_string()))
    }

    /// Verify signature and expiry, returning the bound email.
    ///
    /// Every verification failure collapses into `InvalidToken`; callers
    /// learn nothing about why a token was rejected.
    pub fn verify(&self, token: &str) -> JobResult<String> {
        decode::<ResetClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims.email)
        .map_err(|_| JobError::InvalidToken)
    }
}

impl JobOrchestrator {
    /// Issue a reset token for the account behind `email` and hand it
    /// to the notification collaborator.
    pub async fn request_reset_token(&self, email: &str) -> JobResult<()> {
        if email.is_empty() {
            return Err(JobError::InvalidState("email cannot be blank".to_string()));
        }
        let account = self
            .accounts
            .find_by_email(email)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("account for {email}")))?;

        self.store.create_job(
            JobKind::ResetToken,
            account.id,
            JobPayload::ResetToken {
                status: "Token Requested".to_string(),
            },
        )?;

        let token = self.signer.mint(email)?;
        self.notifier.deliver_reset_token(email, &token).await?;
        info!(account = %account.id, "reset token issued");
        Ok(())
    }

    /// Commit a reset: verify the token, match the submitted display
    /// name against the resolved account, and write the new credential.
    ///
    /// The name check only runs after successful signature and expiry
    /// verification.
    pub async fn commit_reset(&self, token: &str, name: &str, password: &str) -> JobResult<()> {
        if password.is_empty() {
            return Err(JobError::InvalidState(
                "blank passwords not permitted".to_string(),
            ));
        }

        let email = self.signer.verify(token)?;
        let account = self
            .accounts
            .find_by_email(&email)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("account for {email}")))?;
        if !account.display_name.eq_ignore_ascii_case(name) {
            return Err(JobError::PermissionDenied);
        }

        self.accounts.set_credential(account.id, password).await?;
        self.store.create_job(
            JobKind::ResetToken,
            account.id,
            JobPayload::ResetToken {
                status: "Password Reset".to_string(),
            },
        )?;
        info!(account = %account.id, "password reset committed");
        Ok(())
    }
}
