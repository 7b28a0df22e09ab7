//! REST API handlers.
//!
//! Every handler answers HTTP 200 with the `{Success, Message}`
//! envelope; failures carry the operation's error message. The engine
//! errors are already short human-readable strings, so they pass
//! through unchanged.

use std::fmt::Display;

use axum::Extension;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use gridmgr_jobs::{Identity, UploadComplete};
use gridmgr_state::{HostRecord, NewRegion, SlotRange, store::epoch_secs};

use crate::ApiState;

fn success() -> Json<Value> {
    Json(json!({ "Success": true }))
}

fn failure(message: impl Display) -> Json<Value> {
    Json(json!({ "Success": false, "Message": message.to_string() }))
}

fn admin_only(identity: &Identity) -> Result<(), Json<Value>> {
    if identity.admin {
        Ok(())
    } else {
        Err(failure("Permission Denied"))
    }
}

// ── Regions ────────────────────────────────────────────────────────

/// GET /region
pub async fn list_regions(
    State(state): State<ApiState>,
    Extension(_identity): Extension<Identity>,
) -> Json<Value> {
    match state.store.list_regions() {
        Ok(regions) => Json(json!({ "Success": true, "Regions": regions })),
        Err(e) => failure(e),
    }
}

/// POST /region
pub async fn create_region(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<NewRegion>,
) -> Json<Value> {
    if let Err(resp) = admin_only(&identity) {
        return resp;
    }
    if body.name.is_empty() {
        return failure("Region name cannot be blank");
    }
    match state.store.create_region(&body) {
        Ok(region) => Json(json!({ "Success": true, "Message": region.uuid })),
        Err(e) => failure(e),
    }
}

/// POST /region/destroy/{uuid}
pub async fn destroy_region(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(uuid): Path<Uuid>,
) -> Json<Value> {
    if let Err(resp) = admin_only(&identity) {
        return resp;
    }
    match state.store.delete_region(&uuid) {
        Ok(()) => success(),
        Err(e) => failure(e),
    }
}

#[derive(Deserialize)]
pub struct CoordinatesBody {
    pub x: i32,
    pub y: i32,
}

/// POST /region/coordinates/{uuid}
pub async fn set_region_coordinates(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(uuid): Path<Uuid>,
    Json(body): Json<CoordinatesBody>,
) -> Json<Value> {
    if let Err(resp) = admin_only(&identity) {
        return resp;
    }
    match state.store.set_region_coordinates(&uuid, body.x, body.y) {
        Ok(()) => success(),
        Err(e) => failure(e),
    }
}

#[derive(Deserialize)]
pub struct HostAssignmentBody {
    /// Target host address; empty or absent means "unassign".
    #[serde(default)]
    pub host: String,
}

/// POST /region/host/{uuid}
pub async fn set_region_host(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(uuid): Path<Uuid>,
    Json(body): Json<HostAssignmentBody>,
) -> Json<Value> {
    if let Err(resp) = admin_only(&identity) {
        return resp;
    }
    let target = (!body.host.is_empty()).then_some(body.host.as_str());
    match state.placement.move_region(uuid, target).await {
        Ok(()) => success(),
        Err(e) => failure(e),
    }
}

/// POST /region/start/{uuid}
pub async fn start_region(
    State(state): State<ApiState>,
    Extension(_identity): Extension<Identity>,
    Path(uuid): Path<Uuid>,
) -> Json<Value> {
    match state.placement.start_region(uuid).await {
        Ok(()) => success(),
        Err(e) => failure(e),
    }
}

/// POST /region/stop/{uuid}
pub async fn stop_region(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(uuid): Path<Uuid>,
) -> Json<Value> {
    match state.placement.stop_region(uuid, identity.user).await {
        Ok(()) => success(),
        Err(e) => failure(e),
    }
}

/// POST /region/kill/{uuid}
pub async fn kill_region(
    State(state): State<ApiState>,
    Extension(_identity): Extension<Identity>,
    Path(uuid): Path<Uuid>,
) -> Json<Value> {
    match state.placement.kill_region(uuid).await {
        Ok(()) => success(),
        Err(e) => failure(e),
    }
}

#[derive(Deserialize)]
pub struct StatusFeedBody {
    pub running: bool,
}

/// POST /region/status/{uuid} — out-of-band feed from the host agent.
pub async fn record_region_status(
    State(state): State<ApiState>,
    Path(uuid): Path<Uuid>,
    Json(body): Json<StatusFeedBody>,
) -> Json<Value> {
    match state.placement.record_host_status(uuid, body.running).await {
        Ok(()) => success(),
        Err(e) => failure(e),
    }
}

// ── Hosts ──────────────────────────────────────────────────────────

/// GET /host
pub async fn list_hosts(
    State(state): State<ApiState>,
    Extension(_identity): Extension<Identity>,
) -> Json<Value> {
    match state.store.list_hosts() {
        Ok(hosts) => Json(json!({ "Success": true, "Hosts": hosts })),
        Err(e) => failure(e),
    }
}

#[derive(Deserialize)]
pub struct NewHostBody {
    pub address: String,
    pub slot_min: u16,
    pub slot_max: u16,
    pub console_port: u16,
}

/// POST /host
pub async fn add_host(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<NewHostBody>,
) -> Json<Value> {
    if let Err(resp) = admin_only(&identity) {
        return resp;
    }
    let host = HostRecord {
        address: body.address,
        slots: SlotRange {
            min: body.slot_min,
            max: body.slot_max,
        },
        console_port: body.console_port,
        created_at: epoch_secs(),
    };
    match state.store.put_host(&host) {
        Ok(()) => success(),
        Err(e) => failure(e),
    }
}

/// POST /host/remove/{address}
pub async fn remove_host(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(address): Path<String>,
) -> Json<Value> {
    if let Err(resp) = admin_only(&identity) {
        return resp;
    }
    match state.store.delete_host(&address) {
        Ok(true) => success(),
        Ok(false) => failure(format!("host {address} not found")),
        Err(e) => failure(e),
    }
}

// ── Jobs ───────────────────────────────────────────────────────────

/// GET /job
pub async fn list_jobs(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
) -> Json<Value> {
    match state.store.jobs_for_user(&identity.user) {
        Ok(jobs) => Json(json!({ "Success": true, "Jobs": jobs })),
        Err(e) => failure(e),
    }
}

/// POST /job/delete/{id}
pub async fn delete_job(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<u64>,
) -> Json<Value> {
    match state.jobs.delete_job(id, identity).await {
        Ok(()) => success(),
        Err(e) => failure(e),
    }
}

/// POST /job/loadOar/{uuid}
pub async fn load_oar(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(uuid): Path<Uuid>,
) -> Json<Value> {
    match state.jobs.create_snapshot_load(uuid, identity).await {
        Ok(job) => Json(json!({ "Success": true, "ID": job.id })),
        Err(e) => failure(e),
    }
}

#[derive(Deserialize)]
pub struct UploadBody {
    pub file: String,
}

/// POST /job/upload/{id} — signal from the file-upload collaborator.
pub async fn upload_complete(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<u64>,
    Json(body): Json<UploadBody>,
) -> Json<Value> {
    let signal = UploadComplete {
        job_id: id,
        file_path: body.file.into(),
        user: identity.user,
    };
    match state.jobs.complete_snapshot_upload(signal).await {
        Ok(()) => success(),
        Err(e) => failure(e),
    }
}

/// POST /job/saveOar/{uuid}
pub async fn save_oar(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(uuid): Path<Uuid>,
) -> Json<Value> {
    match state.jobs.create_snapshot_save(uuid, identity).await {
        Ok(job) => Json(json!({ "Success": true, "ID": job.id })),
        Err(e) => failure(e),
    }
}

#[derive(Deserialize)]
pub struct SaveResultBody {
    pub file: String,
    pub file_name: String,
}

/// POST /job/result/{id} — write-back from the host agent.
pub async fn record_save_result(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    Json(body): Json<SaveResultBody>,
) -> Json<Value> {
    match state
        .jobs
        .record_save_result(id, body.file.into(), body.file_name)
        .await
    {
        Ok(()) => success(),
        Err(e) => failure(e),
    }
}

/// GET /job/download/{id}
pub async fn download(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<u64>,
) -> Response {
    let (file, name) = match state.jobs.resolve_download(id, identity.user) {
        Ok(resolved) => resolved,
        Err(e) => return (StatusCode::NOT_FOUND, failure(e)).into_response(),
    };
    match tokio::fs::read(&file).await {
        Ok(bytes) => (
            [
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{name}\""),
                ),
                (
                    header::CONTENT_TYPE,
                    "application/octet-stream".to_string(),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            warn!(job = id, file = %file.display(), error = %e, "failed to read snapshot for download");
            (StatusCode::NOT_FOUND, failure("job not found")).into_response()
        }
    }
}

/// POST /job/nuke/{uuid}
pub async fn nuke_content(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(uuid): Path<Uuid>,
) -> Json<Value> {
    match state.jobs.create_content_purge(uuid, identity).await {
        Ok(job) => Json(json!({ "Success": true, "ID": job.id })),
        Err(e) => failure(e),
    }
}

// ── Credential reset (anonymous) ───────────────────────────────────

#[derive(Deserialize)]
pub struct ResetCodeBody {
    #[serde(default)]
    pub email: String,
}

/// POST /job/resetCode
pub async fn request_reset_code(
    State(state): State<ApiState>,
    Json(body): Json<ResetCodeBody>,
) -> Json<Value> {
    match state.jobs.request_reset_token(&body.email).await {
        Ok(()) => success(),
        Err(e) => failure(e),
    }
}

#[derive(Deserialize)]
pub struct ResetPasswordBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub password: String,
}

/// POST /job/resetPassword
pub async fn commit_reset(
    State(state): State<ApiState>,
    Json(body): Json<ResetPasswordBody>,
) -> Json<Value> {
    match state
        .jobs
        .commit_reset(&body.token, &body.name, &body.password)
        .await
    {
        Ok(()) => success(),
        Err(e) => failure(e),
    }
}
