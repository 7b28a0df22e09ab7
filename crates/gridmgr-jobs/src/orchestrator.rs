//! Job pipelines for snapshot transfer and content purge.
//!
//! Every operation follows the same shape: authorize, create (or look
//! up) the job row, then walk a sequence of dependent steps, rewriting
//! the status payload after each externally visible milestone so a
//! concurrently polling client sees progress. A failed step aborts the
//! remainder and leaves already-committed state in place — a job that
//! reached "Loading" stays there for an operator to inspect.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use gridmgr_console::command;
use gridmgr_placement::PlacementManager;
use gridmgr_state::{JobKind, JobPayload, JobRecord, StateStore};

use crate::error::{JobError, JobResult};
use crate::reset::ResetTokenSigner;
use crate::{AccountDirectory, Identity, ResetNotifier};

/// Upload-completion signal from the file-transfer collaborator.
#[derive(Debug, Clone)]
pub struct UploadComplete {
    pub job_id: u64,
    pub file_path: PathBuf,
    pub user: Uuid,
}

/// Creates, advances, and finalizes asynchronous jobs.
pub struct JobOrchestrator {
    pub(crate) store: StateStore,
    pub(crate) placement: Arc<PlacementManager>,
    pub(crate) accounts: Arc<dyn AccountDirectory>,
    pub(crate) notifier: Arc<dyn ResetNotifier>,
    pub(crate) signer: ResetTokenSigner,
}

impl JobOrchestrator {
    pub fn new(
        store: StateStore,
        placement: Arc<PlacementManager>,
        accounts: Arc<dyn AccountDirectory>,
        notifier: Arc<dyn ResetNotifier>,
        signer: ResetTokenSigner,
    ) -> Self {
        Self {
            store,
            placement,
            accounts,
            notifier,
            signer,
        }
    }

    // ── Snapshot load (two-phase) ──────────────────────────────────

    /// Phase 1: create the load job and return it immediately.
    ///
    /// The actual load is triggered later by the upload-completion
    /// signal once the file-transfer collaborator has the snapshot.
    pub async fn create_snapshot_load(
        &self,
        region_id: Uuid,
        identity: Identity,
    ) -> JobResult<JobRecord> {
        self.placement.require_running(region_id)?;
        let job = self.store.create_job(
            JobKind::SnapshotLoad,
            identity.user,
            JobPayload::SnapshotLoad {
                status: "Pending...".to_string(),
                region: region_id,
                file: None,
            },
        )?;
        info!(job = job.id, region = %region_id, "snapshot load job created");
        Ok(job)
    }

    /// Phase 2: the transferred file is on disk; mark the job loading
    /// and hand the load command to the region's host.
    ///
    /// Safe to repeat for a duplicate signal — the payload rewrite and
    /// the load command are both idempotent on the host side.
    pub async fn complete_snapshot_upload(&self, signal: UploadComplete) -> JobResult<()> {
        let job = self
            .store
            .get_job(signal.job_id)?
            .ok_or_else(|| JobError::NotFound(format!("job {}", signal.job_id)))?;
        let region_id = match &job.payload {
            JobPayload::SnapshotLoad { region, .. } => *region,
            _ => return Err(JobError::InvalidJobType(format!("{:?}", job.kind))),
        };
        if job.user != signal.user {
            return Err(JobError::PermissionDenied);
        }

        self.store.update_job_payload(
            job.id,
            JobPayload::SnapshotLoad {
                status: "Loading".to_string(),
                region: region_id,
                file: Some(signal.file_path.clone()),
            },
        )?;

        let (_, host) = self.placement.running_region(region_id)?;
        self.placement
            .send_command(&host, &command::load(region_id, &signal.file_path, job.id))
            .await?;
        info!(job = job.id, region = %region_id, "snapshot load dispatched");
        Ok(())
    }

    // ── Snapshot save ──────────────────────────────────────────────

    /// Create a save job and immediately ask the host to export.
    ///
    /// The host agent writes the result file and reports it back via
    /// [`record_save_result`](Self::record_save_result).
    pub async fn create_snapshot_save(
        &self,
        region_id: Uuid,
        identity: Identity,
    ) -> JobResult<JobRecord> {
        let (_, host) = self.placement.running_region(region_id)?;
        let job = self.store.create_job(
            JobKind::SnapshotSave,
            identity.user,
            JobPayload::SnapshotSave {
                status: "Pending...".to_string(),
                region: region_id,
                file: None,
                file_name: None,
            },
        )?;
        self.placement
            .send_command(&host, &command::save(region_id, job.id))
            .await?;
        info!(job = job.id, region = %region_id, "snapshot save dispatched");
        Ok(job)
    }

    /// Write-back from the host agent: the export finished and the
    /// result file is in place.
    pub async fn record_save_result(
        &self,
        job_id: u64,
        file: PathBuf,
        file_name: String,
    ) -> JobResult<()> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| JobError::NotFound(format!("job {job_id}")))?;
        let region = match &job.payload {
            JobPayload::SnapshotSave { region, .. } => *region,
            _ => return Err(JobError::InvalidJobType(format!("{:?}", job.kind))),
        };
        self.store.update_job_payload(
            job_id,
            JobPayload::SnapshotSave {
                status: "Done".to_string(),
                region,
                file: Some(file),
                file_name: Some(file_name),
            },
        )?;
        info!(job = job_id, "snapshot save result recorded");
        Ok(())
    }

    /// Resolve a finished save job to its file and suggested download
    /// name. Mismatched owners, wrong job kinds, and unfinished jobs
    /// are all refused the same way, without revealing existence.
    pub fn resolve_download(&self, job_id: u64, user: Uuid) -> JobResult<(PathBuf, String)> {
        let refused = || JobError::NotFound(format!("job {job_id}"));
        let job = self.store.get_job(job_id)?.ok_or_else(refused)?;

        match &job.payload {
            JobPayload::SnapshotSave {
                file: Some(file),
                file_name: Some(name),
                ..
            } if job.user == user => Ok((file.clone(), format!("{name}.oar"))),
            _ => {
                warn!(job = job_id, %user, "download request refused");
                Err(refused())
            }
        }
    }

    // ── Content purge ──────────────────────────────────────────────

    /// Wipe a running region's content — conceptually a fresh load of
    /// an empty snapshot.
    pub async fn create_content_purge(
        &self,
        region_id: Uuid,
        identity: Identity,
    ) -> JobResult<JobRecord> {
        let (_, host) = self.placement.running_region(region_id)?;
        let job = self.store.create_job(
            JobKind::ContentPurge,
            identity.user,
            JobPayload::ContentPurge {
                status: "Pending...".to_string(),
                region: region_id,
            },
        )?;
        self.placement
            .send_command(&host, &command::purge(region_id, job.id))
            .await?;
        info!(job = job.id, region = %region_id, "content purge dispatched");
        Ok(job)
    }

    // ── Deletion ───────────────────────────────────────────────────

    /// Remove a job row, deleting any file its payload references.
    ///
    /// File deletion is best-effort: the payload may not carry a file,
    /// or the file may already be gone.
    pub async fn delete_job(&self, job_id: u64, identity: Identity) -> JobResult<()> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| JobError::NotFound(format!("job {job_id}")))?;
        if !identity.can_act_for(job.user) {
            return Err(JobError::PermissionDenied);
        }

        if let Some(file) = job.payload.file() {
            if let Err(e) = tokio::fs::remove_file(file).await {
                warn!(job = job_id, file = %file.display(), error = %e, "failed to delete job file");
            }
        }
        self.store.delete_job(job_id)?;
        info!(job = job_id, "job deleted");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use gridmgr_console::{
        Console, ConsoleCredentials, ConsoleError, ConsoleResult, ConsoleSession,
    };
    use gridmgr_placement::PlacementError;
    use gridmgr_state::{HostRecord, NewRegion, SlotRange};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use crate::Account;

    #[derive(Default)]
    pub(crate) struct FakeConsole {
        pub log: Arc<StdMutex<Vec<(String, String)>>>,
    }

    struct FakeSession {
        address: String,
        log: Arc<StdMutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl Console for FakeConsole {
        async fn open(
            &self,
            address: &str,
            _port: u16,
            _credentials: &ConsoleCredentials,
        ) -> ConsoleResult<Box<dyn ConsoleSession>> {
            Ok(Box::new(FakeSession {
                address: address.to_string(),
                log: self.log.clone(),
            }))
        }
    }

    #[async_trait]
    impl ConsoleSession for FakeSession {
        async fn write(&mut self, command: &str) -> ConsoleResult<()> {
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

    #[derive(Default)]
    pub(crate) struct FakeAccounts {
        pub by_email: HashMap<String, Account>,
        pub credential_updates: StdMutex<Vec<(Uuid, String)>>,
    }

    #[async_trait]
    impl AccountDirectory for FakeAccounts {
        async fn find_by_email(&self, email: &str) -> JobResult<Option<Account>> {
            Ok(self.by_email.get(email).cloned())
        }

        async fn set_credential(&self, account: Uuid, password: &str) -> JobResult<()> {
            self.credential_updates
                .lock()
                .unwrap()
                .push((account, password.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeNotifier {
        pub delivered: StdMutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ResetNotifier for FakeNotifier {
        async fn deliver_reset_token(&self, email: &str, token: &str) -> JobResult<()> {
            self.delivered
                .lock()
                .unwrap()
                .push((email.to_string(), token.to_string()));
            Ok(())
        }
    }

    pub(crate) struct Fixture {
        pub store: StateStore,
        pub orchestrator: JobOrchestrator,
        pub log: Arc<StdMutex<Vec<(String, String)>>>,
        pub accounts: Arc<FakeAccounts>,
        pub notifier: Arc<FakeNotifier>,
    }

    pub(crate) fn fixture_with_accounts(accounts: FakeAccounts) -> Fixture {
        let store = StateStore::open_in_memory().unwrap();
        let console = FakeConsole::default();
        let log = console.log.clone();
        let placement = Arc::new(PlacementManager::new(
            store.clone(),
            Arc::new(console),
            ConsoleCredentials {
                username: "console".to_string(),
                password: "secret".to_string(),
            },
        ));
        let accounts = Arc::new(accounts);
        let notifier = Arc::new(FakeNotifier::default());
        let orchestrator = JobOrchestrator::new(
            store.clone(),
            placement,
            accounts.clone(),
            notifier.clone(),
            ResetTokenSigner::new("test-secret-for-reset-tokens", Duration::from_secs(3600)),
        );
        Fixture {
            store,
            orchestrator,
            log,
            accounts,
            notifier,
        }
    }

    pub(crate) fn fixture() -> Fixture {
        fixture_with_accounts(FakeAccounts::default())
    }

    /// A region placed on 10.0.0.5 with its running flag set.
    pub(crate) fn running_region(store: &StateStore, name: &str, x: i32) -> Uuid {
        store
            .put_host(&HostRecord {
                address: "10.0.0.5".to_string(),
                slots: SlotRange { min: 9000, max: 9100 },
                console_port: 8100,
                created_at: 1000,
            })
            .unwrap();
        let region = store
            .create_region(&NewRegion {
                name: name.to_string(),
                x,
                y: 0,
                size: 256,
                estate: 1,
            })
            .unwrap()
            .uuid;
        store
            .set_region_assignment(&region, Some(("10.0.0.5", 9000 + x as u16)))
            .unwrap();
        store.set_region_running(&region, true).unwrap();
        region
    }

    fn user_identity() -> Identity {
        Identity {
            user: Uuid::new_v4(),
            admin: false,
        }
    }

    fn host_commands(f: &Fixture) -> Vec<String> {
        f.log.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    // ── Snapshot load ──────────────────────────────────────────────

    #[tokio::test]
    async fn load_requires_running_region() {
        let f = fixture();
        let region = running_region(&f.store, "alpha", 1);
        f.store.set_region_running(&region, false).unwrap();

        let result = f
            .orchestrator
            .create_snapshot_load(region, user_identity())
            .await;
        assert!(matches!(
            result,
            Err(JobError::Placement(PlacementError::InvalidState(_)))
        ));
    }

    #[tokio::test]
    async fn load_phase_one_only_creates_the_job() {
        let f = fixture();
        let region = running_region(&f.store, "alpha", 1);

        let job = f
            .orchestrator
            .create_snapshot_load(region, user_identity())
            .await
            .unwrap();

        assert_eq!(job.kind, JobKind::SnapshotLoad);
        assert_eq!(job.payload.status(), "Pending...");
        assert_eq!(job.payload.region(), Some(region));
        // No command until the upload completes.
        assert!(host_commands(&f).is_empty());
    }

    #[tokio::test]
    async fn upload_completion_dispatches_load() {
        let f = fixture();
        let region = running_region(&f.store, "alpha", 1);
        let identity = user_identity();
        let job = f
            .orchestrator
            .create_snapshot_load(region, identity)
            .await
            .unwrap();

        f.orchestrator
            .complete_snapshot_upload(UploadComplete {
                job_id: job.id,
                file_path: "/uploads/in.oar".into(),
                user: identity.user,
            })
            .await
            .unwrap();

        let updated = f.store.get_job(job.id).unwrap().unwrap();
        assert_eq!(updated.payload.status(), "Loading");
        assert_eq!(
            updated.payload.file(),
            Some(std::path::Path::new("/uploads/in.oar"))
        );
        assert_eq!(
            host_commands(&f),
            vec![format!("load {region} /uploads/in.oar {}", job.id)]
        );
    }

    #[tokio::test]
    async fn upload_for_wrong_job_type_is_rejected() {
        let f = fixture();
        let region = running_region(&f.store, "alpha", 1);
        let identity = user_identity();
        let job = f
            .orchestrator
            .create_snapshot_save(region, identity)
            .await
            .unwrap();

        let result = f
            .orchestrator
            .complete_snapshot_upload(UploadComplete {
                job_id: job.id,
                file_path: "/uploads/in.oar".into(),
                user: identity.user,
            })
            .await;
        assert!(matches!(result, Err(JobError::InvalidJobType(_))));
    }

    #[tokio::test]
    async fn upload_from_wrong_user_is_rejected() {
        let f = fixture();
        let region = running_region(&f.store, "alpha", 1);
        let job = f
            .orchestrator
            .create_snapshot_load(region, user_identity())
            .await
            .unwrap();

        let result = f
            .orchestrator
            .complete_snapshot_upload(UploadComplete {
                job_id: job.id,
                file_path: "/uploads/in.oar".into(),
                user: Uuid::new_v4(),
            })
            .await;
        assert!(matches!(result, Err(JobError::PermissionDenied)));
    }

    #[tokio::test]
    async fn upload_for_unknown_job_is_not_found() {
        let f = fixture();
        let result = f
            .orchestrator
            .complete_snapshot_upload(UploadComplete {
                job_id: 99,
                file_path: "/uploads/in.oar".into(),
                user: Uuid::new_v4(),
            })
            .await;
        assert!(matches!(result, Err(JobError::NotFound(_))));
    }

    #[tokio::test]
    async fn upload_after_region_stopped_fails_but_job_stays_loading() {
        let f = fixture();
        let region = running_region(&f.store, "alpha", 1);
        let identity = user_identity();
        let job = f
            .orchestrator
            .create_snapshot_load(region, identity)
            .await
            .unwrap();
        f.store.set_region_running(&region, false).unwrap();

        let result = f
            .orchestrator
            .complete_snapshot_upload(UploadComplete {
                job_id: job.id,
                file_path: "/uploads/in.oar".into(),
                user: identity.user,
            })
            .await;
        assert!(matches!(
            result,
            Err(JobError::Placement(PlacementError::InvalidState(_)))
        ));

        // No rollback: the job row stays where the pipeline stopped,
        // so an operator can inspect it.
        let stuck = f.store.get_job(job.id).unwrap().unwrap();
        assert_eq!(stuck.payload.status(), "Loading");
    }

    #[tokio::test]
    async fn duplicate_upload_signal_is_safe_to_repeat() {
        let f = fixture();
        let region = running_region(&f.store, "alpha", 1);
        let identity = user_identity();
        let job = f
            .orchestrator
            .create_snapshot_load(region, identity)
            .await
            .unwrap();
        let signal = UploadComplete {
            job_id: job.id,
            file_path: "/uploads/in.oar".into(),
            user: identity.user,
        };

        f.orchestrator.complete_snapshot_upload(signal.clone()).await.unwrap();
        f.orchestrator.complete_snapshot_upload(signal).await.unwrap();

        assert_eq!(host_commands(&f).len(), 2);
        let job = f.store.get_job(job.id).unwrap().unwrap();
        assert_eq!(job.payload.status(), "Loading");
    }

    // ── Snapshot save ──────────────────────────────────────────────

    #[tokio::test]
    async fn save_requires_running_region() {
        let f = fixture();
        let region = running_region(&f.store, "alpha", 1);
        f.store.set_region_running(&region, false).unwrap();

        let result = f
            .orchestrator
            .create_snapshot_save(region, user_identity())
            .await;
        assert!(matches!(
            result,
            Err(JobError::Placement(PlacementError::InvalidState(_)))
        ));
    }

    #[tokio::test]
    async fn save_dispatches_immediately_with_job_id() {
        let f = fixture();
        let region = running_region(&f.store, "alpha", 1);

        let job = f
            .orchestrator
            .create_snapshot_save(region, user_identity())
            .await
            .unwrap();

        assert_eq!(job.payload.status(), "Pending...");
        assert_eq!(host_commands(&f), vec![format!("save {region} {}", job.id)]);
    }

    #[tokio::test]
    async fn save_writeback_then_download_round_trip() {
        let f = fixture();
        let region = running_region(&f.store, "alpha", 1);
        let identity = user_identity();
        let job = f
            .orchestrator
            .create_snapshot_save(region, identity)
            .await
            .unwrap();

        f.orchestrator
            .record_save_result(job.id, "/var/lib/gridmgr/out.oar".into(), "alpha".to_string())
            .await
            .unwrap();

        let (file, name) = f
            .orchestrator
            .resolve_download(job.id, identity.user)
            .unwrap();
        assert_eq!(file, PathBuf::from("/var/lib/gridmgr/out.oar"));
        assert_eq!(name, "alpha.oar");
    }

    #[tokio::test]
    async fn download_refusals_do_not_reveal_existence() {
        let f = fixture();
        let region = running_region(&f.store, "alpha", 1);
        let identity = user_identity();
        let job = f
            .orchestrator
            .create_snapshot_save(region, identity)
            .await
            .unwrap();

        // Not finished yet.
        assert!(matches!(
            f.orchestrator.resolve_download(job.id, identity.user),
            Err(JobError::NotFound(_))
        ));

        f.orchestrator
            .record_save_result(job.id, "/var/lib/gridmgr/out.oar".into(), "alpha".to_string())
            .await
            .unwrap();

        // Wrong owner.
        assert!(matches!(
            f.orchestrator.resolve_download(job.id, Uuid::new_v4()),
            Err(JobError::NotFound(_))
        ));

        // Wrong kind.
        let load = f
            .orchestrator
            .create_snapshot_load(region, identity)
            .await
            .unwrap();
        assert!(matches!(
            f.orchestrator.resolve_download(load.id, identity.user),
            Err(JobError::NotFound(_))
        ));
    }

    // ── Content purge ──────────────────────────────────────────────

    #[tokio::test]
    async fn purge_requires_running_and_dispatches() {
        let f = fixture();
        let region = running_region(&f.store, "alpha", 1);

        let job = f
            .orchestrator
            .create_content_purge(region, user_identity())
            .await
            .unwrap();
        assert_eq!(host_commands(&f), vec![format!("purge {region} {}", job.id)]);

        f.store.set_region_running(&region, false).unwrap();
        let result = f
            .orchestrator
            .create_content_purge(region, user_identity())
            .await;
        assert!(result.is_err());
    }

    // ── Deletion ───────────────────────────────────────────────────

    #[tokio::test]
    async fn delete_job_removes_row_and_file() {
        let f = fixture();
        let identity = user_identity();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("upload.oar");
        std::fs::write(&file, b"snapshot").unwrap();

        let job = f
            .store
            .create_job(
                JobKind::SnapshotLoad,
                identity.user,
                JobPayload::SnapshotLoad {
                    status: "Loading".to_string(),
                    region: Uuid::new_v4(),
                    file: Some(file.clone()),
                },
            )
            .unwrap();

        f.orchestrator.delete_job(job.id, identity).await.unwrap();
        assert!(!file.exists());
        assert!(f.store.get_job(job.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_job_without_file_succeeds() {
        let f = fixture();
        let identity = user_identity();
        let job = f
            .store
            .create_job(
                JobKind::ResetToken,
                identity.user,
                JobPayload::ResetToken {
                    status: "Token Requested".to_string(),
                },
            )
            .unwrap();

        f.orchestrator.delete_job(job.id, identity).await.unwrap();
        assert!(f.store.get_job(job.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_job_with_missing_file_still_removes_row() {
        let f = fixture();
        let identity = user_identity();
        let job = f
            .store
            .create_job(
                JobKind::SnapshotLoad,
                identity.user,
                JobPayload::SnapshotLoad {
                    status: "Loading".to_string(),
                    region: Uuid::new_v4(),
                    file: Some("/nonexistent/path.oar".into()),
                },
            )
            .unwrap();

        f.orchestrator.delete_job(job.id, identity).await.unwrap();
        assert!(f.store.get_job(job.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_job_enforces_ownership() {
        let f = fixture();
        let owner = user_identity();
        let job = f
            .store
            .create_job(
                JobKind::ResetToken,
                owner.user,
                JobPayload::ResetToken {
                    status: "Token Requested".to_string(),
                },
            )
            .unwrap();

        let stranger = user_identity();
        let result = f.orchestrator.delete_job(job.id, stranger).await;
        assert!(matches!(result, Err(JobError::PermissionDenied)));

        let admin = Identity {
            user: Uuid::new_v4(),
            admin: true,
        };
        f.orchestrator.delete_job(job.id, admin).await.unwrap();
        assert!(f.store.get_job(job.id).unwrap().is_none());
    }
}
