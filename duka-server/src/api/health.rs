//! Health check route
//!
//! | Path | Method | Auth |
//! |------|--------|------|
//! | /api/health | GET | none |

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::core::ServerState;
use crate::utils::{AppResponse, AppResult, ok};

pub fn router() -> Router<ServerState> {
    Router::new().route("/api/health", get(health))
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    /// Callbacks waiting in the durable queue
    pending_callbacks: usize,
    /// Callbacks parked for manual recovery
    dead_letters: usize,
}

async fn health(State(state): State<ServerState>) -> AppResult<Json<AppResponse<HealthResponse>>> {
    let pending_callbacks = state.storage.get_pending_callbacks()?.len();
    let dead_letters = state.storage.get_dead_letters()?.len();
    Ok(ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        pending_callbacks,
        dead_letters,
    }))
}
