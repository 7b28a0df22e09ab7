//! gridmgr.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub server: ServerConfig,
    pub console: ConsoleConfig,
    pub reset: ResetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port the API listens on.
    pub listen_port: u16,
    /// Directory for the state database and bundled collaborator files.
    pub data_dir: PathBuf,
}

/// Shared credentials for every host's control endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub username: String,
    pub password: String,
    /// Bound timeout for each console exchange, in seconds.
    #[serde(default = "default_console_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetConfig {
    /// HS256 secret for credential-reset tokens.
    pub secret: String,
    /// Token lifetime in seconds.
    #[serde(default = "default_reset_ttl")]
    pub ttl_secs: u64,
    /// Account list for the bundled file-backed directory; defaults to
    /// `accounts.json` under the data dir.
    pub accounts_file: Option<PathBuf>,
}

fn default_console_timeout() -> u64 {
    10
}

fn default_reset_ttl() -> u64 {
    // Two days, matching the operator-facing reset email copy.
    2 * 24 * 60 * 60
}

impl GridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GridConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
