//! services/api/src/web/router.rs
//!
//! Assembles the complete HTTP surface: public and protected API routes,
//! the uploaded-file server, the Swagger UI, and the shared layers.

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ConfigError;
use crate::error::ApiError;
use crate::web::{
    auth::{login_handler, logout_handler, refresh_handler, register_handler},
    chat::{
        delete_message_handler, get_message_handler, list_messages_handler, send_file_handler,
        send_text_handler,
    },
    middleware::{cancel_on_shutdown, require_auth},
    rest::{
        create_community_handler, delete_community_handler, get_community_handler,
        health_handler, join_community_handler, leave_community_handler, list_members_handler,
        my_communities_handler, upload_profile_photo_handler, ApiDoc,
    },
    state::AppState,
    ws_handler::ws_handler,
};

/// Multipart framing allowance on top of the upload cap.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

pub fn build_router(state: Arc<AppState>) -> Result<Router, ApiError> {
    let config = state.config.clone();

    let origin = HeaderValue::from_str(&config.cors_allowed_origin).map_err(|e| {
        ConfigError::InvalidValue("CORS_ALLOWED_ORIGIN".to_string(), e.to_string())
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/v1/auth/register", post(register_handler))
        .route("/api/v1/auth/login", post(login_handler))
        .route("/api/v1/auth/refresh", post(refresh_handler))
        .route("/api/v1/auth/logout", post(logout_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/api/v1/communities", post(create_community_handler))
        .route(
            "/api/v1/communities/{id}",
            get(get_community_handler).delete(delete_community_handler),
        )
        .route("/api/v1/communities/{id}/members", get(list_members_handler))
        .route("/api/v1/communities/{id}/join", post(join_community_handler))
        .route("/api/v1/communities/{id}/leave", post(leave_community_handler))
        .route("/api/v1/communities/{id}/chat", get(list_messages_handler))
        .route("/api/v1/communities/{id}/chat/text", post(send_text_handler))
        .route("/api/v1/communities/{id}/chat/file", post(send_file_handler))
        .route("/api/v1/communities/{id}/chat/ws", get(ws_handler))
        .route(
            "/api/v1/chat/messages/{id}",
            get(get_message_handler).delete(delete_message_handler),
        )
        .route("/api/v1/users/me/communities", get(my_communities_handler))
        .route("/api/v1/users/me/photo", post(upload_profile_photo_handler))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth));

    let body_limit = usize::try_from(config.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_OVERHEAD_BYTES);

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum_middleware::from_fn_with_state(state.clone(), cancel_on_shutdown))
        .with_state(state);

    Ok(Router::new()
        .merge(api_router)
        .nest_service("/uploads", ServeDir::new(&config.storage_root))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors))
}
