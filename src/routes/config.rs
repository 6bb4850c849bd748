//! Session configuration routes
//!
//! - GET /api/config - Current operating parameters
//! - PUT /api/config - Replace the session with new parameters

use axum::{extract::State, routing::get, Json, Router};

use super::StatusResponse;
use crate::error::Result;
use crate::session::SessionParams;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/config", get(get_config).put(update_config))
}

/// Falls back to the startup parameters if no session was ever configured
async fn get_config(State(state): State<AppState>) -> Json<SessionParams> {
    let params = state
        .engine()
        .params()
        .unwrap_or_else(|| state.config().engine.session_params());
    Json(params)
}

async fn update_config(
    State(state): State<AppState>,
    Json(params): Json<SessionParams>,
) -> Result<Json<StatusResponse>> {
    state.engine().reconfigure(params).await?;
    Ok(Json(StatusResponse::success()))
}
