//! gridmgr-console — remote console client for host control endpoints.
//!
//! Each host exposes one REST-console control endpoint guarded by
//! per-deployment shared credentials. A session is a short-lived
//! authenticated channel; callers must not assume it survives past the
//! command that required it. The client performs no retries — retry
//! policy belongs to the caller.

pub mod command;
pub mod error;
pub mod rest;

pub use error::{ConsoleError, ConsoleResult};
pub use rest::RestConsole;

use async_trait::async_trait;

/// Shared credentials for all hosts' control endpoints, configured
/// per-deployment.
#[derive(Debug, Clone)]
pub struct ConsoleCredentials {
    pub username: String,
    pub password: String,
}

/// Opens authenticated sessions to a host's control endpoint.
#[async_trait]
pub trait Console: Send + Sync {
    /// Open a session. Auth rejections map to `AuthFailed`; connect
    /// errors and timeouts map to `Unreachable`.
    async fn open(
        &self,
        address: &str,
        port: u16,
        credentials: &ConsoleCredentials,
    ) -> ConsoleResult<Box<dyn ConsoleSession>>;
}

/// A short-lived authenticated channel for line-oriented commands.
#[async_trait]
pub trait ConsoleSession: Send {
    /// Write one command line. Failures after a session is established
    /// map to `Transport`.
    async fn write(&mut self, command: &str) -> ConsoleResult<()>;

    /// Close the session. Callers issuing a terminal command (quit,
    /// kill) skip this — the remote process tears the channel down
    /// itself.
    async fn close(self: Box<Self>) -> ConsoleResult<()>;
}
