//! services/api/src/web/chat.rs
//!
//! REST handlers for community chat: history, sending text and file
//! messages, and reading or deleting a single message.

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Multipart, Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use unisphere_core::domain::{MessageFilter, MessageType, Upload};
use unisphere_core::ports::PortError;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, ErrorBody};
use crate::identity::AuthUser;
use crate::web::rest::ChatMessageResponse;
use crate::web::{json_body, path_id, query_params, state::AppState};

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendTextRequest {
    /// Must be `TEXT`.
    pub message_type: String,
    pub content: String,
}

#[derive(Deserialize, IntoParams, Default)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Only messages created strictly before this instant (RFC 3339).
    pub before: Option<DateTime<Utc>>,
    /// Only messages created strictly after this instant (RFC 3339).
    pub after: Option<DateTime<Utc>>,
    pub sender_id: Option<i64>,
    /// Defaults to 50, capped at 200.
    pub limit: Option<i64>,
}

impl From<HistoryQuery> for MessageFilter {
    fn from(q: HistoryQuery) -> Self {
        MessageFilter {
            before: q.before,
            after: q.after,
            sender_id: q.sender_id,
            limit: q.limit,
        }
    }
}

/// The parts of a chat or photo upload form.
#[derive(Debug, Default)]
pub(crate) struct UploadForm {
    pub message_type: Option<String>,
    pub content: Option<String>,
    pub file: Option<Upload>,
}

fn multipart_error(e: MultipartError, max_bytes: u64) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return PortError::PayloadTooLarge(format!("file exceeds the {} byte limit", max_bytes)).into();
    }
    ApiError::bad_request(e.body_text())
}

/// Buffers the multipart form, refusing a `file` part larger than `max_bytes`.
pub(crate) async fn read_form(
    multipart: Result<Multipart, MultipartRejection>,
    max_bytes: u64,
) -> Result<UploadForm, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let mut form = UploadForm::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_bytes))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("messageType") => {
                form.message_type = Some(field.text().await.map_err(|e| multipart_error(e, max_bytes))?);
            }
            Some("content") => {
                form.content = Some(field.text().await.map_err(|e| multipart_error(e, max_bytes))?);
            }
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();

                let mut buf = BytesMut::new();
                while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, max_bytes))? {
                    if (buf.len() + chunk.len()) as u64 > max_bytes {
                        return Err(PortError::PayloadTooLarge(format!(
                            "file exceeds the {} byte limit",
                            max_bytes
                        ))
                        .into());
                    }
                    buf.extend_from_slice(&chunk);
                }
                form.file = Some(Upload::from_bytes(file_name, content_type, buf.freeze()));
            }
            other => debug!(field = ?other, "ignoring unknown form field"),
        }
    }
    Ok(form)
}

fn require_type(given: Option<&str>, expected: MessageType) -> Result<(), ApiError> {
    match given {
        Some(t) if t == expected.as_str() => Ok(()),
        _ => Err(ApiError::bad_request(format!(
            "messageType must be {}",
            expected.as_str()
        ))),
    }
}

/// Community history, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/communities/{id}/chat",
    tag = "chat",
    params(("id" = i64, Path, description = "Community id"), HistoryQuery),
    responses(
        (status = 200, description = "Messages, newest first", body = [ChatMessageResponse]),
        (status = 403, description = "Not a member", body = ErrorBody),
        (status = 404, description = "No such community", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<ChatMessageResponse>>, ApiError> {
    let community_id = path_id(path)?;
    let filter = MessageFilter::from(query_params(query)?);
    let messages = state.chat.list(community_id, user.id, filter).await?;
    Ok(Json(messages.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/api/v1/communities/{id}/chat/text",
    tag = "chat",
    params(("id" = i64, Path, description = "Community id")),
    request_body = SendTextRequest,
    responses(
        (status = 201, description = "Message stored and broadcast", body = ChatMessageResponse),
        (status = 400, description = "Wrong type or empty content", body = ErrorBody),
        (status = 403, description = "Not a member", body = ErrorBody),
        (status = 404, description = "No such community", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn send_text_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<SendTextRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let community_id = path_id(path)?;
    let req = json_body(payload)?;
    require_type(Some(&req.message_type), MessageType::Text)?;

    let detail = state.chat.send_text(community_id, user.id, &req.content).await?;
    Ok((StatusCode::CREATED, Json(ChatMessageResponse::from(detail))))
}

/// Upload a file into the chat. `content` is an optional description.
#[utoipa::path(
    post,
    path = "/api/v1/communities/{id}/chat/file",
    tag = "chat",
    params(("id" = i64, Path, description = "Community id")),
    request_body(content_type = "multipart/form-data", description = "`messageType=FILE`, optional `content`, and a `file` part."),
    responses(
        (status = 201, description = "File stored and broadcast", body = ChatMessageResponse),
        (status = 400, description = "Malformed form or unsupported file type", body = ErrorBody),
        (status = 403, description = "Not a member", body = ErrorBody),
        (status = 404, description = "No such community", body = ErrorBody),
        (status = 413, description = "File too large", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn send_file_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let community_id = path_id(path)?;
    let form = read_form(multipart, state.config.max_upload_bytes).await?;
    require_type(form.message_type.as_deref(), MessageType::File)?;
    let upload = form
        .file
        .ok_or_else(|| ApiError::bad_request("multipart form must include a file"))?;

    let detail = state
        .chat
        .send_file(community_id, user.id, form.content, upload)
        .await?;
    Ok((StatusCode::CREATED, Json(ChatMessageResponse::from(detail))))
}

#[utoipa::path(
    get,
    path = "/api/v1/chat/messages/{id}",
    tag = "chat",
    params(("id" = i64, Path, description = "Message id")),
    responses(
        (status = 200, description = "The message", body = ChatMessageResponse),
        (status = 403, description = "Not a member", body = ErrorBody),
        (status = 404, description = "No such message", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn get_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<ChatMessageResponse>, ApiError> {
    let message_id = path_id(path)?;
    let detail = state.chat.get(message_id, user.id).await?;
    Ok(Json(detail.into()))
}

/// Sender or community lead only.
#[utoipa::path(
    delete,
    path = "/api/v1/chat/messages/{id}",
    tag = "chat",
    params(("id" = i64, Path, description = "Message id")),
    responses(
        (status = 204, description = "Message and attachment removed"),
        (status = 403, description = "Neither sender nor lead", body = ErrorBody),
        (status = 404, description = "No such message", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn delete_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let message_id = path_id(path)?;
    state.chat.delete(message_id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_must_match_the_endpoint() {
        assert!(require_type(Some("TEXT"), MessageType::Text).is_ok());
        assert!(require_type(Some("text"), MessageType::Text).is_err());
        assert!(require_type(Some("FILE"), MessageType::Text).is_err());
        assert!(require_type(None, MessageType::File).is_err());
    }

    #[test]
    fn history_query_becomes_a_filter() {
        let q: HistoryQuery = serde_json::from_str(
            r#"{"before":"2025-01-02T00:00:00Z","senderId":7,"limit":1000}"#,
        )
        .unwrap();
        let filter = MessageFilter::from(q);
        assert_eq!(filter.sender_id, Some(7));
        assert_eq!(filter.effective_limit(), 200);
        assert!(filter.before.is_some());
        assert!(filter.after.is_none());
    }
}
