//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the community and profile endpoints, the
//! response payloads shared by the REST surface, and the master definition
//! for the OpenAPI specification.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Multipart, Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use unisphere_core::domain::{ChatMessageDetail, Community, FileRecord, UserSummary};
use utoipa::{OpenApi, ToSchema};

use crate::error::{ApiError, ErrorBody};
use crate::identity::AuthUser;
use crate::services::{CommunityDetail, CommunitySummary};
use crate::web::{auth, chat, json_body, path_id, state::AppState, ws_handler};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        auth::register_handler,
        auth::login_handler,
        auth::refresh_handler,
        auth::logout_handler,
        create_community_handler,
        get_community_handler,
        delete_community_handler,
        list_members_handler,
        join_community_handler,
        leave_community_handler,
        my_communities_handler,
        upload_profile_photo_handler,
        chat::list_messages_handler,
        chat::send_text_handler,
        chat::send_file_handler,
        chat::get_message_handler,
        chat::delete_message_handler,
        ws_handler::ws_handler,
    ),
    components(
        schemas(
            ErrorBody,
            HealthResponse,
            auth::RegisterRequest,
            auth::LoginRequest,
            auth::RefreshRequest,
            auth::UserResponse,
            auth::TokenResponse,
            CreateCommunityRequest,
            CommunityResponse,
            CommunityDetailResponse,
            CommunitySummaryResponse,
            MemberResponse,
            FileResponse,
            ChatMessageResponse,
            chat::SendTextRequest,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Registration and credentials."),
        (name = "communities", description = "Communities and membership."),
        (name = "chat", description = "Community chat history and realtime delivery."),
        (name = "users", description = "The caller's own profile.")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl utoipa::Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateCommunityRequest {
    pub name: String,
    pub abbreviation: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommunityResponse {
    pub id: i64,
    pub name: String,
    pub abbreviation: String,
    pub lead_id: i64,
    pub profile_photo_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Community> for CommunityResponse {
    fn from(c: Community) -> Self {
        Self {
            id: c.id,
            name: c.name,
            abbreviation: c.abbreviation,
            lead_id: c.lead_id,
            profile_photo_id: c.profile_photo_id,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberResponse {
    pub id: i64,
    pub email: String,
    pub role: String,
    pub profile_photo_url: Option<String>,
}

impl From<UserSummary> for MemberResponse {
    fn from(u: UserSummary) -> Self {
        Self {
            id: u.id,
            email: u.email,
            role: u.role.as_str().to_string(),
            profile_photo_url: u.profile_photo_url,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommunityDetailResponse {
    #[serde(flatten)]
    pub community: CommunityResponse,
    pub member_count: i64,
    pub participants: Vec<MemberResponse>,
}

impl From<CommunityDetail> for CommunityDetailResponse {
    fn from(detail: CommunityDetail) -> Self {
        Self {
            community: detail.community.into(),
            member_count: detail.member_count,
            participants: detail.members.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommunitySummaryResponse {
    #[serde(flatten)]
    pub community: CommunityResponse,
    pub member_count: i64,
}

impl From<CommunitySummary> for CommunitySummaryResponse {
    fn from(summary: CommunitySummary) -> Self {
        Self {
            community: summary.community.into(),
            member_count: summary.member_count,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileResponse {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub size_bytes: i64,
    pub mime_type: String,
}

impl From<FileRecord> for FileResponse {
    fn from(f: FileRecord) -> Self {
        Self {
            id: f.id,
            name: f.name,
            url: f.file_url,
            size_bytes: f.size_bytes,
            mime_type: f.mime_type,
        }
    }
}

/// A persisted chat message with its sender and file.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageResponse {
    pub id: i64,
    pub community_id: i64,
    pub sender_id: i64,
    /// `TEXT` or `FILE`.
    pub message_type: String,
    pub content: String,
    pub file_id: Option<i64>,
    pub file_url: Option<String>,
    pub sender_email: String,
    pub sender_photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ChatMessageDetail> for ChatMessageResponse {
    fn from(detail: ChatMessageDetail) -> Self {
        let m = detail.message;
        Self {
            id: m.id,
            community_id: m.community_id,
            sender_id: m.sender_id,
            message_type: m.message_type.as_str().to_string(),
            content: m.content,
            file_id: m.file_id,
            file_url: detail.file.map(|f| f.file_url),
            sender_email: detail.sender.email,
            sender_photo_url: detail.sender.profile_photo_url,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Create a community led by the caller.
#[utoipa::path(
    post,
    path = "/api/v1/communities",
    tag = "communities",
    request_body = CreateCommunityRequest,
    responses(
        (status = 201, description = "Community created", body = CommunityResponse),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 401, description = "Missing or invalid credential", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn create_community_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<CreateCommunityRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = json_body(payload)?;
    let community = state
        .communities
        .create(user.id, &req.name, &req.abbreviation)
        .await?;
    Ok((StatusCode::CREATED, Json(CommunityResponse::from(community))))
}

/// Community detail with its participants.
#[utoipa::path(
    get,
    path = "/api/v1/communities/{id}",
    tag = "communities",
    params(("id" = i64, Path, description = "Community id")),
    responses(
        (status = 200, description = "Community detail", body = CommunityDetailResponse),
        (status = 404, description = "No such community", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn get_community_handler(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<CommunityDetailResponse>, ApiError> {
    let community_id = path_id(path)?;
    let detail = state.communities.get_detail(community_id).await?;
    Ok(Json(detail.into()))
}

/// Delete a community with its messages and files. Lead or administrator only.
#[utoipa::path(
    delete,
    path = "/api/v1/communities/{id}",
    tag = "communities",
    params(("id" = i64, Path, description = "Community id")),
    responses(
        (status = 204, description = "Community deleted"),
        (status = 403, description = "Not the lead", body = ErrorBody),
        (status = 404, description = "No such community", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn delete_community_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let community_id = path_id(path)?;
    state
        .communities
        .delete(community_id, user.id, user.role)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/v1/communities/{id}/members",
    tag = "communities",
    params(("id" = i64, Path, description = "Community id")),
    responses(
        (status = 200, description = "Members in join order", body = [MemberResponse]),
        (status = 404, description = "No such community", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn list_members_handler(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Vec<MemberResponse>>, ApiError> {
    let community_id = path_id(path)?;
    let members = state.communities.members(community_id).await?;
    Ok(Json(members.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/api/v1/communities/{id}/join",
    tag = "communities",
    params(("id" = i64, Path, description = "Community id")),
    responses(
        (status = 204, description = "Joined"),
        (status = 404, description = "No such community", body = ErrorBody),
        (status = 409, description = "Already a member", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn join_community_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let community_id = path_id(path)?;
    state.communities.join(community_id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/communities/{id}/leave",
    tag = "communities",
    params(("id" = i64, Path, description = "Community id")),
    responses(
        (status = 204, description = "Left"),
        (status = 404, description = "No such community", body = ErrorBody),
        (status = 409, description = "Lead cannot leave, or not a member", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn leave_community_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let community_id = path_id(path)?;
    state.communities.leave(community_id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Communities the caller belongs to.
#[utoipa::path(
    get,
    path = "/api/v1/users/me/communities",
    tag = "users",
    responses(
        (status = 200, description = "Memberships with member counts", body = [CommunitySummaryResponse])
    ),
    security(("bearer" = []))
)]
pub async fn my_communities_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<CommunitySummaryResponse>>, ApiError> {
    let summaries = state.communities.list_for_user(user.id).await?;
    Ok(Json(summaries.into_iter().map(Into::into).collect()))
}

/// Replace the caller's profile photo. Images only.
#[utoipa::path(
    post,
    path = "/api/v1/users/me/photo",
    tag = "users",
    request_body(content_type = "multipart/form-data", description = "A `file` part holding an image."),
    responses(
        (status = 201, description = "Photo stored", body = FileResponse),
        (status = 400, description = "Missing file or not an image", body = ErrorBody),
        (status = 413, description = "File too large", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn upload_profile_photo_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    multipart: Result<Multipart, axum::extract::multipart::MultipartRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let form = chat::read_form(multipart, state.config.max_upload_bytes).await?;
    let upload = form
        .file
        .ok_or_else(|| ApiError::bad_request("multipart form must include a file"))?;
    let photo = state.profiles.update_profile_photo(user.id, upload).await?;
    Ok((StatusCode::CREATED, Json(FileResponse::from(photo))))
}
