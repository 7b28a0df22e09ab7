//! StateStore — redb-backed persistence for the region grid.
//!
//! Provides typed CRUD operations over hosts, regions, and jobs. All
//! values are JSON-serialized into redb's `&[u8]` value columns.
//! Cross-record invariants (coordinate uniqueness, host removal
//! preconditions, the host/port pair) are checked inside the write
//! transaction that applies them. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;
use uuid::Uuid;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(HOSTS).map_err(map_err!(Table))?;
        txn.open_table(REGIONS).map_err(map_err!(Table))?;
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// Register a host, or update its slot range / console port.
    pub fn put_host(&self, host: &HostRecord) -> StateResult<()> {
        if host.slots.min > host.slots.max {
            return Err(StateError::Constraint(format!(
                "invalid slot range {}-{}",
                host.slots.min, host.slots.max
            )));
        }
        let value = serde_json::to_vec(host).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            table
                .insert(host.address.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(address = %host.address, "host stored");
        Ok(())
    }

    /// Get a host by address.
    pub fn get_host(&self, address: &str) -> StateResult<Option<HostRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
        match table.get(address).map_err(map_err!(Read))? {
            Some(guard) => {
                let host: HostRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(host))
            }
            None => Ok(None),
        }
    }

    /// List all hosts.
    pub fn list_hosts(&self) -> StateResult<Vec<HostRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let host: HostRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(host);
        }
        Ok(results)
    }

    /// Delete a host by address. Returns true if it existed.
    ///
    /// Fails if any region is still assigned to the host.
    pub fn delete_host(&self, address: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let regions = txn.open_table(REGIONS).map_err(map_err!(Table))?;
            for entry in regions.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let region: RegionRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if region.host.as_deref() == Some(address) {
                    return Err(StateError::Constraint(format!(
                        "host {address} still has region {} assigned",
                        region.name
                    )));
                }
            }
            drop(regions);
            let mut table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            existed = table.remove(address).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%address, existed, "host deleted");
        Ok(existed)
    }

    // ── Regions ────────────────────────────────────────────────────

    /// Create a region with a fresh UUID and no host assignment.
    ///
    /// Name and coordinate uniqueness are validated inside the write
    /// transaction.
    pub fn create_region(&self, new: &NewRegion) -> StateResult<RegionRecord> {
        let region = RegionRecord {
            uuid: Uuid::new_v4(),
            name: new.name.clone(),
            x: new.x,
            y: new.y,
            size: new.size,
            estate: new.estate,
            host: None,
            port: None,
            running: false,
            created_at: epoch_secs(),
        };
        let key = region.uuid.to_string();
        let value = serde_json::to_vec(&region).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REGIONS).map_err(map_err!(Table))?;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, existing) = entry.map_err(map_err!(Read))?;
                let other: RegionRecord =
                    serde_json::from_slice(existing.value()).map_err(map_err!(Deserialize))?;
                if other.name == region.name {
                    return Err(StateError::Constraint(format!(
                        "region name {} is already taken",
                        region.name
                    )));
                }
                if other.x == region.x && other.y == region.y {
                    return Err(StateError::Constraint(format!(
                        "coordinates ({}, {}) are already taken by {}",
                        region.x, region.y, other.name
                    )));
                }
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(uuid = %region.uuid, name = %region.name, "region created");
        Ok(region)
    }

    /// Get a region by UUID.
    pub fn get_region(&self, uuid: &Uuid) -> StateResult<Option<RegionRecord>> {
        let key = uuid.to_string();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REGIONS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let region: RegionRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(region))
            }
            None => Ok(None),
        }
    }

    /// List all regions.
    pub fn list_regions(&self) -> StateResult<Vec<RegionRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REGIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let region: RegionRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(region);
        }
        Ok(results)
    }

    /// List all regions assigned to a host.
    pub fn regions_on_host(&self, address: &str) -> StateResult<Vec<RegionRecord>> {
        Ok(self
            .list_regions()?
            .into_iter()
            .filter(|r| r.host.as_deref() == Some(address))
            .collect())
    }

    /// Set or clear a region's host/port assignment as a unit.
    pub fn set_region_assignment(
        &self,
        uuid: &Uuid,
        assignment: Option<(&str, u16)>,
    ) -> StateResult<()> {
        self.modify_region(uuid, |region| {
            match assignment {
                Some((host, port)) => {
                    region.host = Some(host.to_string());
                    region.port = Some(port);
                }
                None => {
                    region.host = None;
                    region.port = None;
                }
            }
            Ok(())
        })
    }

    /// Set a region's running flag.
    pub fn set_region_running(&self, uuid: &Uuid, running: bool) -> StateResult<()> {
        self.modify_region(uuid, |region| {
            region.running = running;
            Ok(())
        })
    }

    /// Move a region to new grid coordinates.
    ///
    /// Fails while the region is running or when the coordinates are
    /// held by another region.
    pub fn set_region_coordinates(&self, uuid: &Uuid, x: i32, y: i32) -> StateResult<()> {
        let key = uuid.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REGIONS).map_err(map_err!(Table))?;
            let mut region: RegionRecord = {
                let guard = table
                    .get(key.as_str())
                    .map_err(map_err!(Read))?
                    .ok_or_else(|| StateError::NotFound(format!("region {uuid}")))?;
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
            };
            if region.running {
                return Err(StateError::Constraint(
                    "cannot move a region while it is running".to_string(),
                ));
            }
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let other: RegionRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if other.uuid != region.uuid && other.x == x && other.y == y {
                    return Err(StateError::Constraint(format!(
                        "coordinates ({x}, {y}) are already taken by {}",
                        other.name
                    )));
                }
            }
            region.x = x;
            region.y = y;
            let value = serde_json::to_vec(&region).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Delete a region.
    ///
    /// Fails while the region is running or still allocated a host.
    pub fn delete_region(&self, uuid: &Uuid) -> StateResult<()> {
        let key = uuid.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REGIONS).map_err(map_err!(Table))?;
            let region: RegionRecord = {
                let guard = table
                    .get(key.as_str())
                    .map_err(map_err!(Read))?
                    .ok_or_else(|| StateError::NotFound(format!("region {uuid}")))?;
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
            };
            if region.running {
                return Err(StateError::Constraint(
                    "cannot delete a running region".to_string(),
                ));
            }
            if region.host.is_some() {
                return Err(StateError::Constraint(
                    "region is still allocated a host".to_string(),
                ));
            }
            table.remove(key.as_str()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%uuid, "region deleted");
        Ok(())
    }

    /// Read-modify-write a region inside one write transaction.
    fn modify_region<F>(&self, uuid: &Uuid, apply: F) -> StateResult<()>
    where
        F: FnOnce(&mut RegionRecord) -> StateResult<()>,
    {
        let key = uuid.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REGIONS).map_err(map_err!(Table))?;
            let mut region: RegionRecord = {
                let guard = table
                    .get(key.as_str())
                    .map_err(map_err!(Read))?
                    .ok_or_else(|| StateError::NotFound(format!("region {uuid}")))?;
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
            };
            apply(&mut region)?;
            let value = serde_json::to_vec(&region).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Create a job with the next monotonic id.
    pub fn create_job(
        &self,
        kind: JobKind,
        user: Uuid,
        payload: JobPayload,
    ) -> StateResult<JobRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let job;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let next_id = {
                let last = table.iter().map_err(map_err!(Read))?.last();
                match last {
                    Some(entry) => entry.map_err(map_err!(Read))?.0.value() + 1,
                    None => 1,
                }
            };
            job = JobRecord {
                id: next_id,
                kind,
                user,
                payload,
                created_at: epoch_secs(),
            };
            let value = serde_json::to_vec(&job).map_err(map_err!(Serialize))?;
            table
                .insert(next_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = job.id, kind = ?job.kind, "job created");
        Ok(job)
    }

    /// Get a job by id.
    pub fn get_job(&self, id: u64) -> StateResult<Option<JobRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let job: JobRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// List all jobs owned by a user.
    pub fn jobs_for_user(&self, user: &Uuid) -> StateResult<Vec<JobRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let job: JobRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if job.user == *user {
                results.push(job);
            }
        }
        Ok(results)
    }

    /// Replace a job's status payload wholesale. Returns the updated record.
    pub fn update_job_payload(&self, id: u64, payload: JobPayload) -> StateResult<JobRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let job;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let mut record: JobRecord = {
                let guard = table
                    .get(id)
                    .map_err(map_err!(Read))?
                    .ok_or_else(|| StateError::NotFound(format!("job {id}")))?;
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
            };
            record.payload = payload;
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table.insert(id, value.as_slice()).map_err(map_err!(Write))?;
            job = record;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(job)
    }

    /// Delete a job row by id. Returns true if it existed.
    pub fn delete_job(&self, id: u64) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id, existed, "job deleted");
        Ok(existed)
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
