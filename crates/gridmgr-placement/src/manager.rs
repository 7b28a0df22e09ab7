//! PlacementManager — host assignment and region lifecycle.
//!
//! The manager owns the correctness-critical sections of the control
//! plane: moving a region between hosts (with port allocation), and the
//! start/stop/kill transitions of its run state. The authoritative
//! state is always the region record in the store; the host's live
//! process table is kept in sync by best-effort notifications and an
//! out-of-band status feed.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use gridmgr_console::{Console, ConsoleCredentials, command};
use gridmgr_state::{HostRecord, RegionRecord, StateStore};

use crate::allocator::allocate_port;
use crate::error::{PlacementError, PlacementResult};
use crate::locks::LockRegistry;

/// Orchestrates host reassignment and lifecycle transitions.
pub struct PlacementManager {
    store: StateStore,
    console: Arc<dyn Console>,
    credentials: ConsoleCredentials,
    locks: LockRegistry,
}

impl PlacementManager {
    pub fn new(
        store: StateStore,
        console: Arc<dyn Console>,
        credentials: ConsoleCredentials,
    ) -> Self {
        Self {
            store,
            console,
            credentials,
            locks: LockRegistry::new(),
        }
    }

    // ── Placement ──────────────────────────────────────────────────

    /// Move a region to a new host, or unassign it entirely.
    ///
    /// The region must be stopped. The whole operation is serialized on
    /// the region's lock, and allocation-plus-persist on the target
    /// host's lock, so concurrent moves never pick the same port.
    /// A failure to notify the old host is logged and swallowed; a
    /// failure to bring the region online on the new host is surfaced,
    /// but the persisted assignment stands (the notification is
    /// idempotent and expected to be retried).
    pub async fn move_region(
        &self,
        region_id: Uuid,
        new_host: Option<&str>,
    ) -> PlacementResult<()> {
        let region_lock = self.locks.region(region_id).await;
        let _region_guard = region_lock.lock().await;

        let region = self.require_region(region_id)?;
        if region.running {
            return Err(PlacementError::InvalidState(format!(
                "region {} is currently running",
                region.name
            )));
        }
        if region.host.as_deref() == new_host {
            return Err(PlacementError::NoOp(format!(
                "region {} is already on that host",
                region.name
            )));
        }

        // The old host record may have been removed out from under the
        // region; that only skips the removal notification.
        let old_host = match region.host.as_deref() {
            Some(address) => self.store.get_host(address)?,
            None => None,
        };

        match new_host {
            Some(address) => {
                let target = self
                    .store
                    .get_host(address)?
                    .ok_or_else(|| PlacementError::NotFound(format!("host {address}")))?;

                let host_lock = self.locks.host(&target.address).await;
                let _host_guard = host_lock.lock().await;

                let assigned = self.store.regions_on_host(&target.address)?;
                let port = allocate_port(&target, &assigned, Some(region_id))?;

                if let Some(old) = &old_host {
                    self.notify_removal(old, region_id).await;
                }
                self.store
                    .set_region_assignment(&region_id, Some((&target.address, port)))?;
                info!(region = %region.name, host = %target.address, port, "region placed");

                self.send_command(&target, &command::add(region_id, port))
                    .await?;
                Ok(())
            }
            None => {
                if let Some(old) = &old_host {
                    self.notify_removal(old, region_id).await;
                }
                self.store.set_region_assignment(&region_id, None)?;
                info!(region = %region.name, "region unassigned");
                Ok(())
            }
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Start a stopped region on its assigned host.
    pub async fn start_region(&self, region_id: Uuid) -> PlacementResult<()> {
        let region_lock = self.locks.region(region_id).await;
        let _guard = region_lock.lock().await;

        let region = self.require_region(region_id)?;
        if region.running {
            return Err(PlacementError::InvalidState(format!(
                "region {} is already running",
                region.name
            )));
        }
        let host = self.assigned_host(&region)?;

        // Any console failure here leaves the region stopped.
        let mut session = self
            .console
            .open(&host.address, host.console_port, &self.credentials)
            .await?;
        session.write(&command::start(region_id)).await?;
        if let Err(e) = session.close().await {
            warn!(region = %region.name, error = %e, "failed to close console session after start");
        }

        self.store.set_region_running(&region_id, true)?;
        info!(region = %region.name, host = %host.address, "region started");
        Ok(())
    }

    /// Ask a running region to shut down gracefully.
    ///
    /// Fire-and-forget: success means the transport accepted the quit
    /// command. The running flag is cleared by the host status feed via
    /// [`record_host_status`](Self::record_host_status), not here.
    pub async fn stop_region(&self, region_id: Uuid, requesting_user: Uuid) -> PlacementResult<()> {
        let region_lock = self.locks.region(region_id).await;
        let _guard = region_lock.lock().await;

        let region = self.require_running(region_id)?;
        let host = self.assigned_host(&region)?;

        let mut session = self
            .console
            .open(&host.address, host.console_port, &self.credentials)
            .await?;
        session.write(&command::quit(region_id)).await?;
        // The session is left open on purpose; the terminating process
        // tears the connection down itself.
        info!(region = %region.name, user = %requesting_user, "region stop requested");
        Ok(())
    }

    /// Terminate a running region forcefully. Same fire-and-forget
    /// contract as [`stop_region`](Self::stop_region).
    pub async fn kill_region(&self, region_id: Uuid) -> PlacementResult<()> {
        let region_lock = self.locks.region(region_id).await;
        let _guard = region_lock.lock().await;

        let region = self.require_running(region_id)?;
        let host = self.assigned_host(&region)?;

        let mut session = self
            .console
            .open(&host.address, host.console_port, &self.credentials)
            .await?;
        session.write(&command::kill(region_id)).await?;
        info!(region = %region.name, "region kill requested");
        Ok(())
    }

    /// Reconcile the stored running flag with the host status feed.
    ///
    /// Host-reported status is a lower-trust signal: it never gates a
    /// transition, it only records what the host last observed.
    pub async fn record_host_status(&self, region_id: Uuid, running: bool) -> PlacementResult<()> {
        let region_lock = self.locks.region(region_id).await;
        let _guard = region_lock.lock().await;

        let region = self.require_region(region_id)?;
        if region.running != running {
            info!(region = %region.name, running, "host status feed updated run state");
            self.store.set_region_running(&region_id, running)?;
        }
        Ok(())
    }

    // ── Shared helpers for job orchestration ───────────────────────

    /// The region, required to be running.
    pub fn require_running(&self, region_id: Uuid) -> PlacementResult<RegionRecord> {
        let region = self.require_region(region_id)?;
        if !region.running {
            return Err(PlacementError::InvalidState(format!(
                "region {} is not running",
                region.name
            )));
        }
        Ok(region)
    }

    /// The region and its host, required to be running and placed.
    pub fn running_region(&self, region_id: Uuid) -> PlacementResult<(RegionRecord, HostRecord)> {
        let region = self.require_running(region_id)?;
        let host = self.assigned_host(&region)?;
        Ok((region, host))
    }

    /// Open a session to `host`, write one command, and close.
    pub async fn send_command(&self, host: &HostRecord, line: &str) -> PlacementResult<()> {
        let mut session = self
            .console
            .open(&host.address, host.console_port, &self.credentials)
            .await?;
        session.write(line).await?;
        if let Err(e) = session.close().await {
            warn!(host = %host.address, error = %e, "failed to close console session");
        }
        Ok(())
    }

    fn require_region(&self, region_id: Uuid) -> PlacementResult<RegionRecord> {
        self.store
            .get_region(&region_id)?
            .ok_or_else(|| PlacementError::NotFound(format!("region {region_id}")))
    }

    fn assigned_host(&self, region: &RegionRecord) -> PlacementResult<HostRecord> {
        let address = region.host.as_deref().ok_or_else(|| {
            PlacementError::InvalidState(format!(
                "region {} is not assigned to a host",
                region.name
            ))
        })?;
        self.store
            .get_host(address)?
            .ok_or_else(|| PlacementError::NotFound(format!("host {address}")))
    }

    /// Tell the old host to drop the region. Best-effort: the
    /// authoritative state is the region record, not the host's live
    /// process table, so failures are logged and swallowed.
    async fn notify_removal(&self, host: &HostRecord, region_id: Uuid) {
        if let Err(e) = self.send_command(host, &command::remove(region_id)).await {
            warn!(host = %host.address, %region_id, error = %e, "failed to notify old host of removal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gridmgr_console::{ConsoleError, ConsoleResult, ConsoleSession};
    use gridmgr_state::{NewRegion, SlotRange};
    use std::sync::Mutex as StdMutex;

    /// Records every accepted command; can refuse sessions per-address.
    #[derive(Default)]
    struct FakeConsole {
        log: Arc<StdMutex<Vec<(String, String)>>>,
        refuse_address: Option<String>,
        fail_writes: bool,
    }

    struct FakeSession {
        address: String,
        log: Arc<StdMutex<Vec<(String, String)>>>,
        fail_writes: bool,
    }

    #[async_trait]
    impl Console for FakeConsole {
        async fn open(
            &self,
            address: &str,
            _port: u16,
            _credentials: &ConsoleCredentials,
        ) -> ConsoleResult<Box<dyn ConsoleSession>> {
            if self.refuse_address.as_deref() == Some(address) {
                return Err(ConsoleError::Unreachable(format!("connect {address}")));
            }
            Ok(Box::new(FakeSession {
                address: address.to_string(),
                log: self.log.clone(),
                fail_writes: self.fail_writes,
            }))
        }
    }

    #[async_trait]
    impl ConsoleSession for FakeSession {
        async fn write(&mut self, command: &str) -> ConsoleResult<()> {
            if self.fail_writes {
                return Err(ConsoleError::Transport("write refused".to_string()));
            }
            self.log
                .lock()
                .unwrap()
                .push((self.address.clone(), command.to_string()));
            Ok(())
        }

        async fn close(self: Box<Self>) -> ConsoleResult<()> {
            Ok(())
        }
    }

    struct Fixture {
        store: StateStore,
        manager: PlacementManager,
        log: Arc<StdMutex<Vec<(String, String)>>>,
    }

    fn fixture_with(console: FakeConsole) -> Fixture {
        let store = StateStore::open_in_memory().unwrap();
        let log = console.log.clone();
        let manager = PlacementManager::new(
            store.clone(),
            Arc::new(console),
            ConsoleCredentials {
                username: "console".to_string(),
                password: "secret".to_string(),
            },
        );
        Fixture { store, manager, log }
    }

    fn fixture() -> Fixture {
        fixture_with(FakeConsole::default())
    }

    fn add_host(store: &StateStore, address: &str, min: u16, max: u16) {
        store
            .put_host(&HostRecord {
                address: address.to_string(),
                slots: SlotRange { min, max },
                console_port: 8100,
                created_at: 1000,
            })
            .unwrap();
    }

    fn add_region(store: &StateStore, name: &str, x: i32, y: i32) -> Uuid {
        store
            .create_region(&NewRegion {
                name: name.to_string(),
                x,
                y,
                size: 256,
                estate: 1,
            })
            .unwrap()
            .uuid
    }

    fn commands_for(log: &Arc<StdMutex<Vec<(String, String)>>>, address: &str) -> Vec<String> {
        log.lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, c)| c.clone())
            .collect()
    }

    // ── move_region ────────────────────────────────────────────────

    #[tokio::test]
    async fn move_rejects_running_region() {
        let f = fixture();
        add_host(&f.store, "10.0.0.6", 9000, 9100);
        let region = add_region(&f.store, "alpha", 100, 100);
        f.store
            .set_region_assignment(&region, Some(("10.0.0.5", 9000)))
            .unwrap();
        f.store.set_region_running(&region, true).unwrap();

        let result = f.manager.move_region(region, Some("10.0.0.6")).await;
        assert!(matches!(result, Err(PlacementError::InvalidState(_))));

        // Stored assignment is unchanged.
        let stored = f.store.get_region(&region).unwrap().unwrap();
        assert_eq!(stored.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(stored.port, Some(9000));
    }

    #[tokio::test]
    async fn move_to_current_host_is_noop() {
        let f = fixture();
        add_host(&f.store, "10.0.0.5", 9000, 9100);
        let region = add_region(&f.store, "alpha", 100, 100);
        f.store
            .set_region_assignment(&region, Some(("10.0.0.5", 9000)))
            .unwrap();

        let result = f.manager.move_region(region, Some("10.0.0.5")).await;
        assert!(matches!(result, Err(PlacementError::NoOp(_))));

        let unassigned = add_region(&f.store, "beta", 101, 100);
        let result = f.manager.move_region(unassigned, None).await;
        assert!(matches!(result, Err(PlacementError::NoOp(_))));
    }

    #[tokio::test]
    async fn move_assigns_lowest_free_port() {
        let f = fixture();
        add_host(&f.store, "10.0.0.5", 9000, 9000);
        let region = add_region(&f.store, "alpha", 100, 100);

        f.manager.move_region(region, Some("10.0.0.5")).await.unwrap();

        let stored = f.store.get_region(&region).unwrap().unwrap();
        assert_eq!(stored.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(stored.port, Some(9000));
        assert_eq!(
            commands_for(&f.log, "10.0.0.5"),
            vec![format!("add {region} 9000")]
        );
    }

    #[tokio::test]
    async fn move_to_unknown_host_is_not_found() {
        let f = fixture();
        let region = add_region(&f.store, "alpha", 100, 100);

        let result = f.manager.move_region(region, Some("10.9.9.9")).await;
        assert!(matches!(result, Err(PlacementError::NotFound(_))));
    }

    #[tokio::test]
    async fn move_to_full_host_fails_without_mutation() {
        let f = fixture();
        add_host(&f.store, "10.0.0.5", 9000, 9000);
        let occupant = add_region(&f.store, "occupant", 1, 1);
        f.store
            .set_region_assignment(&occupant, Some(("10.0.0.5", 9000)))
            .unwrap();
        let region = add_region(&f.store, "alpha", 100, 100);

        let result = f.manager.move_region(region, Some("10.0.0.5")).await;
        assert!(matches!(result, Err(PlacementError::NoCapacity(_))));

        let stored = f.store.get_region(&region).unwrap().unwrap();
        assert!(stored.host.is_none());
        assert!(f.log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn move_away_notifies_old_host_and_clears_pair() {
        let f = fixture();
        add_host(&f.store, "10.0.0.5", 9000, 9100);
        let region = add_region(&f.store, "alpha", 100, 100);
        f.store
            .set_region_assignment(&region, Some(("10.0.0.5", 9000)))
            .unwrap();

        f.manager.move_region(region, None).await.unwrap();

        let stored = f.store.get_region(&region).unwrap().unwrap();
        assert!(stored.host.is_none());
        assert!(stored.port.is_none());
        assert_eq!(
            commands_for(&f.log, "10.0.0.5"),
            vec![format!("remove {region}")]
        );
    }

    #[tokio::test]
    async fn move_swallows_old_host_notify_failure() {
        let f = fixture_with(FakeConsole {
            refuse_address: Some("10.0.0.5".to_string()),
            ..FakeConsole::default()
        });
        add_host(&f.store, "10.0.0.5", 9000, 9100);
        add_host(&f.store, "10.0.0.6", 9000, 9100);
        let region = add_region(&f.store, "alpha", 100, 100);
        f.store
            .set_region_assignment(&region, Some(("10.0.0.5", 9000)))
            .unwrap();

        f.manager.move_region(region, Some("10.0.0.6")).await.unwrap();

        let stored = f.store.get_region(&region).unwrap().unwrap();
        assert_eq!(stored.host.as_deref(), Some("10.0.0.6"));
    }

    #[tokio::test]
    async fn move_surfaces_bring_online_failure_but_keeps_assignment() {
        let f = fixture_with(FakeConsole {
            refuse_address: Some("10.0.0.6".to_string()),
            ..FakeConsole::default()
        });
        add_host(&f.store, "10.0.0.6", 9000, 9100);
        let region = add_region(&f.store, "alpha", 100, 100);

        let result = f.manager.move_region(region, Some("10.0.0.6")).await;
        assert!(matches!(result, Err(PlacementError::Console(_))));

        // The assignment itself stands; the online notification is
        // retried out of band.
        let stored = f.store.get_region(&region).unwrap().unwrap();
        assert_eq!(stored.host.as_deref(), Some("10.0.0.6"));
        assert_eq!(stored.port, Some(9000));
    }

    #[tokio::test]
    async fn concurrent_moves_to_one_host_get_distinct_ports() {
        let f = fixture();
        add_host(&f.store, "10.0.0.5", 9000, 9001);
        let a = add_region(&f.store, "alpha", 1, 1);
        let b = add_region(&f.store, "beta", 2, 2);
        let manager = Arc::new(f.manager);

        let (ra, rb) = tokio::join!(
            manager.move_region(a, Some("10.0.0.5")),
            manager.move_region(b, Some("10.0.0.5")),
        );
        ra.unwrap();
        rb.unwrap();

        let pa = f.store.get_region(&a).unwrap().unwrap().port.unwrap();
        let pb = f.store.get_region(&b).unwrap().unwrap().port.unwrap();
        assert_ne!(pa, pb);
        assert!((9000..=9001).contains(&pa));
        assert!((9000..=9001).contains(&pb));
    }

    // ── start / stop / kill ────────────────────────────────────────

    #[tokio::test]
    async fn start_requires_assignment_and_stopped_state() {
        let f = fixture();
        let region = add_region(&f.store, "alpha", 100, 100);

        // No host assigned.
        let result = f.manager.start_region(region).await;
        assert!(matches!(result, Err(PlacementError::InvalidState(_))));

        add_host(&f.store, "10.0.0.5", 9000, 9100);
        f.store
            .set_region_assignment(&region, Some(("10.0.0.5", 9000)))
            .unwrap();
        f.manager.start_region(region).await.unwrap();
        assert!(f.store.get_region(&region).unwrap().unwrap().running);
        assert_eq!(
            commands_for(&f.log, "10.0.0.5"),
            vec![format!("start {region}")]
        );

        // Already running.
        let result = f.manager.start_region(region).await;
        assert!(matches!(result, Err(PlacementError::InvalidState(_))));
    }

    #[tokio::test]
    async fn start_console_failure_leaves_region_stopped() {
        let f = fixture_with(FakeConsole {
            fail_writes: true,
            ..FakeConsole::default()
        });
        add_host(&f.store, "10.0.0.5", 9000, 9100);
        let region = add_region(&f.store, "alpha", 100, 100);
        f.store
            .set_region_assignment(&region, Some(("10.0.0.5", 9000)))
            .unwrap();

        let result = f.manager.start_region(region).await;
        assert!(matches!(result, Err(PlacementError::Console(_))));
        assert!(!f.store.get_region(&region).unwrap().unwrap().running);
    }

    #[tokio::test]
    async fn stop_is_fire_and_forget() {
        let f = fixture();
        add_host(&f.store, "10.0.0.5", 9000, 9100);
        let region = add_region(&f.store, "alpha", 100, 100);
        f.store
            .set_region_assignment(&region, Some(("10.0.0.5", 9000)))
            .unwrap();
        f.store.set_region_running(&region, true).unwrap();

        f.manager.stop_region(region, Uuid::new_v4()).await.unwrap();

        // The quit command went out, but the flag is cleared by the
        // status feed, not by the call.
        assert_eq!(
            commands_for(&f.log, "10.0.0.5"),
            vec![format!("quit {region}")]
        );
        assert!(f.store.get_region(&region).unwrap().unwrap().running);

        f.manager.record_host_status(region, false).await.unwrap();
        assert!(!f.store.get_region(&region).unwrap().unwrap().running);
    }

    #[tokio::test]
    async fn stop_rejects_non_running_region() {
        let f = fixture();
        let region = add_region(&f.store, "alpha", 100, 100);

        let result = f.manager.stop_region(region, Uuid::new_v4()).await;
        assert!(matches!(result, Err(PlacementError::InvalidState(_))));
    }

    #[tokio::test]
    async fn kill_uses_forceful_command() {
        let f = fixture();
        add_host(&f.store, "10.0.0.5", 9000, 9100);
        let region = add_region(&f.store, "alpha", 100, 100);
        f.store
            .set_region_assignment(&region, Some(("10.0.0.5", 9000)))
            .unwrap();
        f.store.set_region_running(&region, true).unwrap();

        f.manager.kill_region(region).await.unwrap();
        assert_eq!(
            commands_for(&f.log, "10.0.0.5"),
            vec![format!("kill {region}")]
        );
        assert!(f.store.get_region(&region).unwrap().unwrap().running);
    }

    #[tokio::test]
    async fn kill_rejects_unplaced_running_region() {
        let f = fixture();
        let region = add_region(&f.store, "alpha", 100, 100);
        f.store.set_region_running(&region, true).unwrap();

        let result = f.manager.kill_region(region).await;
        assert!(matches!(result, Err(PlacementError::InvalidState(_))));
    }
}
