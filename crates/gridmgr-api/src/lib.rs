//! gridmgr-api — REST API for the region grid.
//!
//! Thin axum handlers over the placement manager and job orchestrator,
//! answering with the `{"Success": bool, "Message": ...}` envelope the
//! operator UI polls. Authentication and session handling live in the
//! deployment's middleware, which installs an [`Identity`] extension on
//! every authenticated request; region-level visibility rules are also
//! that middleware's concern. The two credential-reset routes are
//! deliberately anonymous.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/region` | List regions |
//! | POST | `/region` | Create a region (admin) |
//! | POST | `/region/destroy/{uuid}` | Delete a region (admin) |
//! | POST | `/region/coordinates/{uuid}` | Move a region on the grid (admin) |
//! | POST | `/region/host/{uuid}` | Assign or unassign a host (admin) |
//! | POST | `/region/start/{uuid}` | Start a region |
//! | POST | `/region/stop/{uuid}` | Stop a region gracefully |
//! | POST | `/region/kill/{uuid}` | Kill a region forcefully |
//! | POST | `/region/status/{uuid}` | Host status feed write-back |
//! | GET | `/host` | List hosts |
//! | POST | `/host` | Register a host (admin) |
//! | POST | `/host/remove/{address}` | Remove a host (admin) |
//! | GET | `/job` | List the caller's jobs |
//! | POST | `/job/delete/{id}` | Delete a job (and its file) |
//! | POST | `/job/loadOar/{uuid}` | Create a snapshot-load job |
//! | POST | `/job/upload/{id}` | Upload-completion signal |
//! | POST | `/job/saveOar/{uuid}` | Create a snapshot-save job |
//! | POST | `/job/result/{id}` | Save result write-back |
//! | GET | `/job/download/{id}` | Download a finished snapshot |
//! | POST | `/job/nuke/{uuid}` | Purge a region's content |
//! | POST | `/job/resetCode` | Request a reset token (anonymous) |
//! | POST | `/job/resetPassword` | Commit a reset (anonymous) |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use gridmgr_jobs::JobOrchestrator;
use gridmgr_placement::PlacementManager;
use gridmgr_state::StateStore;

pub use gridmgr_jobs::Identity;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub placement: Arc<PlacementManager>,
    pub jobs: Arc<JobOrchestrator>,
}

/// Build the API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/region", get(handlers::list_regions).post(handlers::create_region))
        .route("/region/destroy/{uuid}", post(handlers::destroy_region))
        .route("/region/coordinates/{uuid}", post(handlers::set_region_coordinates))
        .route("/region/host/{uuid}", post(handlers::set_region_host))
        .route("/region/start/{uuid}", post(handlers::start_region))
        .route("/region/stop/{uuid}", post(handlers::stop_region))
        .route("/region/kill/{uuid}", post(handlers::kill_region))
        .route("/region/status/{uuid}", post(handlers::record_region_status))
        .route("/host", get(handlers::list_hosts).post(handlers::add_host))
        .route("/host/remove/{address}", post(handlers::remove_host))
        .route("/job", get(handlers::list_jobs))
        .route("/job/delete/{id}", post(handlers::delete_job))
        .route("/job/loadOar/{uuid}", post(handlers::load_oar))
        .route("/job/upload/{id}", post(handlers::upload_complete))
        .route("/job/saveOar/{uuid}", post(handlers::save_oar))
        .route("/job/result/{id}", post(handlers::record_save_result))
        .route("/job/download/{id}", get(handlers::download))
        .route("/job/nuke/{uuid}", post(handlers::nuke_content))
        .route("/job/resetCode", post(handlers::request_reset_code))
        .route("/job/resetPassword", post(handlers::commit_reset))
        .with_state(state)
}
