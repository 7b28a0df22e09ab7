//! Domain types for the GridMgr state store.
//!
//! These types represent the persisted state of hosts, regions, and
//! jobs. All types are serializable to/from JSON for storage in redb
//! tables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Network address of a host (unique key, immutable once created).
pub type HostAddress = String;

// ── Host ──────────────────────────────────────────────────────────

/// Inclusive port interval a host offers to regions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotRange {
    pub min: u16,
    pub max: u16,
}

impl SlotRange {
    /// Whether a port lies within the range.
    pub fn contains(&self, port: u16) -> bool {
        port >= self.min && port <= self.max
    }
}

/// A machine capable of running zero or more regions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostRecord {
    /// Network address — the host's identity.
    pub address: HostAddress,
    /// Port slots available for region assignment.
    pub slots: SlotRange,
    /// Port of the host's control endpoint.
    pub console_port: u16,
    /// Unix timestamp (seconds) when the host was registered.
    pub created_at: u64,
}

// ── Region ────────────────────────────────────────────────────────

/// A single simulated-world workload instance.
///
/// `host` and `port` are always written as a pair — a region either
/// has both or neither.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionRecord {
    pub uuid: Uuid,
    /// Display name, unique across all regions.
    pub name: String,
    /// Grid coordinates; the (x, y) pair is unique across all regions.
    pub x: i32,
    pub y: i32,
    /// Edge length of the region in grid units.
    pub size: u32,
    /// Estate the region was assigned to at creation. Estate
    /// administration itself lives outside this store.
    pub estate: u32,
    /// Address of the assigned host, if any.
    pub host: Option<HostAddress>,
    /// Port assigned on that host; meaningful only when `host` is set.
    pub port: Option<u16>,
    /// Whether the region process is believed to be running. Mutated by
    /// lifecycle transitions and the out-of-band host status feed.
    pub running: bool,
    /// Unix timestamp (seconds) when the region was created.
    pub created_at: u64,
}

/// Parameters for creating a region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRegion {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub size: u32,
    pub estate: u32,
}

// ── Job ───────────────────────────────────────────────────────────

/// Kind of asynchronous job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    SnapshotLoad,
    SnapshotSave,
    ContentPurge,
    ResetToken,
}

/// Status payload of a job, keyed by job kind.
///
/// The payload is the only externally visible progress indicator and is
/// replaced wholesale on every transition — never merged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    SnapshotLoad {
        status: String,
        region: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<PathBuf>,
    },
    SnapshotSave {
        status: String,
        region: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<PathBuf>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
    },
    ContentPurge {
        status: String,
        region: Uuid,
    },
    ResetToken {
        status: String,
    },
}

impl JobPayload {
    /// The human-readable status line.
    pub fn status(&self) -> &str {
        match self {
            JobPayload::SnapshotLoad { status, .. }
            | JobPayload::SnapshotSave { status, .. }
            | JobPayload::ContentPurge { status, .. }
            | JobPayload::ResetToken { status } => status,
        }
    }

    /// The transferred file the payload references, if any.
    pub fn file(&self) -> Option<&Path> {
        match self {
            JobPayload::SnapshotLoad { file, .. } | JobPayload::SnapshotSave { file, .. } => {
                file.as_deref()
            }
            _ => None,
        }
    }

    /// The region the payload references, if any.
    pub fn region(&self) -> Option<Uuid> {
        match self {
            JobPayload::SnapshotLoad { region, .. }
            | JobPayload::SnapshotSave { region, .. }
            | JobPayload::ContentPurge { region, .. } => Some(*region),
            JobPayload::ResetToken { .. } => None,
        }
    }
}

/// A persisted record of an asynchronous operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    /// Monotonic id, allocated by the store.
    pub id: u64,
    pub kind: JobKind,
    /// Owning user.
    pub user: Uuid,
    pub payload: JobPayload,
    /// Unix timestamp (seconds) when the job was created.
    pub created_at: u64,
}
