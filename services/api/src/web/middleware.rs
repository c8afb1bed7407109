//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes, and the shutdown guard
//! that bounds how long in-flight requests may outlive a shutdown signal.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::identity::TokenError;
use crate::web::state::AppState;

/// Middleware that validates the bearer access credential.
///
/// If valid, inserts the `AuthUser` into request extensions for handlers to use.
/// If invalid or missing, the request ends here with 401.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(TokenError::InvalidFormat)?;

    let user = state.identity.authenticate(header_value).map_err(|e| {
        debug!(error = %e, path = %req.uri().path(), "rejected access credential");
        e
    })?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Runs the request, but once shutdown starts it gets `shutdown_timeout` to
/// finish before it is dropped and answered with 503.
pub async fn cancel_on_shutdown(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let shutdown = state.shutdown.clone();
    let budget = state.config.shutdown_timeout;
    let path = req.uri().path().to_owned();

    tokio::select! {
        response = next.run(req) => response,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(budget).await;
        } => {
            warn!(%path, "request cancelled by shutdown");
            ApiError::Unavailable("server is shutting down".to_string()).into_response()
        }
    }
}
