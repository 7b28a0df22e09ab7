//! Command lines understood by the host agent.
//!
//! The exact verbs are a deployment contract with the agent running on
//! each host; they are centralized here so every caller issues the same
//! wire text.

use std::path::Path;
use uuid::Uuid;

/// Bring a placed region's process online.
pub fn start(region: Uuid) -> String {
    format!("start {region}")
}

/// Ask a region's process to shut down gracefully.
pub fn quit(region: Uuid) -> String {
    format!("quit {region}")
}

/// Terminate a region's process forcefully.
pub fn kill(region: Uuid) -> String {
    format!("kill {region}")
}

/// Register a region (and its assigned port) with the host agent.
pub fn add(region: Uuid, port: u16) -> String {
    format!("add {region} {port}")
}

/// Drop a region from the host agent's process table.
pub fn remove(region: Uuid) -> String {
    format!("remove {region}")
}

/// Load a transferred snapshot into a running region.
pub fn load(region: Uuid, file: &Path, job: u64) -> String {
    format!("load {region} {} {job}", file.display())
}

/// Export a running region's content to a snapshot.
pub fn save(region: Uuid, job: u64) -> String {
    format!("save {region} {job}")
}

/// Wipe a running region's content and reseed it empty.
pub fn purge(region: Uuid, job: u64) -> String {
    format!("purge {region} {job}")
}
