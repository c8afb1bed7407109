//! services/api/src/web/ws_handler.rs
//!
//! Entry point for a community chat WebSocket. The caller is authenticated
//! by the middleware and checked for membership here, before the upgrade,
//! so a refused client gets a plain HTTP status instead of a closed socket.

use axum::{
    extract::{rejection::PathRejection, Path, State, WebSocketUpgrade},
    response::Response,
    Extension,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ApiError, ErrorBody};
use crate::identity::AuthUser;
use crate::realtime::run_session;
use crate::web::{path_id, state::AppState};

/// Upgrades to a chat session bound to the caller and the community.
#[utoipa::path(
    get,
    path = "/api/v1/communities/{id}/chat/ws",
    tag = "chat",
    params(("id" = i64, Path, description = "Community id")),
    responses(
        (status = 101, description = "Switching to the WebSocket protocol"),
        (status = 401, description = "Missing or invalid credential", body = ErrorBody),
        (status = 403, description = "Not a member", body = ErrorBody),
        (status = 404, description = "No such community", body = ErrorBody),
        (status = 503, description = "Server is shutting down", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Response, ApiError> {
    let community_id = path_id(path)?;

    if state.shutdown.is_cancelled() || state.hub.is_shutting_down() {
        return Err(ApiError::Unavailable("server is shutting down".to_string()));
    }

    state
        .chat
        .authorize_session(community_id, user.id)
        .await
        .map_err(|e| {
            warn!(community_id, user_id = user.id, error = %e, "chat session refused");
            e
        })?;

    info!(community_id, user_id = user.id, "upgrading chat session");
    let hub = state.hub.clone();
    let cfg = state.session.clone();
    let chat = state.chat.clone();
    let user_id = user.id;
    let still_member = async move { chat.authorize_session(community_id, user_id).await.is_ok() };
    // Oversized frames fail the read, which ends only this session.
    Ok(ws
        .max_message_size(cfg.max_message_size)
        .max_frame_size(cfg.max_message_size)
        .on_upgrade(move |socket| run_session(socket, hub, user_id, community_id, cfg, still_member)))
}
