//! services/api/src/adapters/db/mod.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! the repository ports from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Every call runs under the configured query deadline. Backend conditions are
//! mapped onto `PortError`: no rows become `NotFound`, unique violations
//! `Conflict`, foreign-key violations `ForeignKey`.

mod chat;
mod community;
mod files;
mod identity;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::fmt::Display;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;
use unisphere_core::domain::{
    ChatMessage, ChatMessageDetail, Community, FileRecord, MessageType, ResourceType, Role, User,
    UserSummary,
};
use unisphere_core::ports::{PortError, PortResult};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements every repository port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
    query_timeout: Duration,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self { pool, query_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Runs a query under the deadline and maps its failure. `subject` names
    /// the row the query is about and ends up in `NotFound`/`Conflict` messages.
    async fn timed<T, F>(&self, subject: impl Display, query: F) -> PortResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.query_timeout, query).await {
            Ok(result) => result.map_err(|e| map_db_error(e, &subject)),
            Err(_) => {
                warn!(subject = %subject, timeout = ?self.query_timeout, "database call timed out");
                Err(PortError::Unexpected("database call timed out".to_string()))
            }
        }
    }
}

fn map_db_error(e: sqlx::Error, subject: &dyn Display) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("{} not found", subject)),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            PortError::Conflict(format!("{} already exists", subject))
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            PortError::ForeignKey(format!("{} references a missing row", subject))
        }
        other => PortError::Unexpected(other.to_string()),
    }
}

fn parse_column<T: FromStr>(value: &str, column: &str) -> PortResult<T> {
    value
        .parse()
        .map_err(|_| PortError::Unexpected(format!("unexpected {} value '{}'", column, value)))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const USER_COLUMNS: &str = "id, email, password_hash, role, active, verified, department_id, \
                            profile_photo_id, created_at, updated_at";

#[derive(FromRow)]
struct UserRecord {
    id: i64,
    email: String,
    password_hash: String,
    role: String,
    active: bool,
    verified: bool,
    department_id: Option<i64>,
    profile_photo_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        Ok(User {
            id: self.id,
            email: self.email,
            password_hash: self.password_hash,
            role: parse_column::<Role>(&self.role, "role")?,
            active: self.active,
            verified: self.verified,
            department_id: self.department_id,
            profile_photo_id: self.profile_photo_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct UserSummaryRecord {
    id: i64,
    email: String,
    role: String,
    profile_photo_url: Option<String>,
}
impl UserSummaryRecord {
    fn to_domain(self) -> PortResult<UserSummary> {
        Ok(UserSummary {
            id: self.id,
            email: self.email,
            role: parse_column::<Role>(&self.role, "role")?,
            profile_photo_url: self.profile_photo_url,
        })
    }
}

const COMMUNITY_COLUMNS: &str = "id, name, abbreviation, lead_id, profile_photo_id, created_at, updated_at";

#[derive(FromRow)]
struct CommunityRecord {
    id: i64,
    name: String,
    abbreviation: String,
    lead_id: i64,
    profile_photo_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl CommunityRecord {
    fn to_domain(self) -> Community {
        Community {
            id: self.id,
            name: self.name,
            abbreviation: self.abbreviation,
            lead_id: self.lead_id,
            profile_photo_id: self.profile_photo_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const MESSAGE_COLUMNS: &str =
    "id, community_id, sender_id, message_type, content, file_id, created_at, updated_at";

#[derive(FromRow)]
struct ChatMessageRecord {
    id: i64,
    community_id: i64,
    sender_id: i64,
    message_type: String,
    content: String,
    file_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ChatMessageRecord {
    fn to_domain(self) -> PortResult<ChatMessage> {
        Ok(ChatMessage {
            id: self.id,
            community_id: self.community_id,
            sender_id: self.sender_id,
            message_type: parse_column::<MessageType>(&self.message_type, "message_type")?,
            content: self.content,
            file_id: self.file_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const FILE_COLUMNS: &str = "id, name, file_path, file_url, size_bytes, mime_type, resource_type, \
                            resource_id, uploader_id, created_at, updated_at";

#[derive(FromRow)]
struct FileRecordRow {
    id: i64,
    name: String,
    file_path: String,
    file_url: String,
    size_bytes: i64,
    mime_type: String,
    resource_type: String,
    resource_id: Option<i64>,
    uploader_id: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl FileRecordRow {
    fn to_domain(self) -> PortResult<FileRecord> {
        Ok(FileRecord {
            id: self.id,
            name: self.name,
            file_path: self.file_path,
            file_url: self.file_url,
            size_bytes: self.size_bytes,
            mime_type: self.mime_type,
            resource_type: parse_column::<ResourceType>(&self.resource_type, "resource_type")?,
            resource_id: self.resource_id,
            uploader_id: self.uploader_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// One message joined with its sender and its file, in a single row.
const MESSAGE_DETAIL_SELECT: &str = r#"
SELECT m.id, m.community_id, m.sender_id, m.message_type, m.content, m.file_id,
       m.created_at, m.updated_at,
       u.email AS sender_email, u.role AS sender_role, pf.file_url AS sender_photo_url,
       f.name AS file_name, f.file_path, f.file_url, f.size_bytes AS file_size,
       f.mime_type AS file_mime_type, f.resource_type AS file_resource_type,
       f.resource_id AS file_resource_id, f.uploader_id AS file_uploader_id,
       f.created_at AS file_created_at, f.updated_at AS file_updated_at
FROM chat_messages m
JOIN users u ON u.id = m.sender_id
LEFT JOIN files pf ON pf.id = u.profile_photo_id
LEFT JOIN files f ON f.id = m.file_id
"#;

#[derive(FromRow)]
struct MessageDetailRecord {
    id: i64,
    community_id: i64,
    sender_id: i64,
    message_type: String,
    content: String,
    file_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sender_email: String,
    sender_role: String,
    sender_photo_url: Option<String>,
    file_name: Option<String>,
    file_path: Option<String>,
    file_url: Option<String>,
    file_size: Option<i64>,
    file_mime_type: Option<String>,
    file_resource_type: Option<String>,
    file_resource_id: Option<i64>,
    file_uploader_id: Option<i64>,
    file_created_at: Option<DateTime<Utc>>,
    file_updated_at: Option<DateTime<Utc>>,
}
impl MessageDetailRecord {
    fn to_domain(self) -> PortResult<ChatMessageDetail> {
        let file = match (self.file_id, self.file_name, self.file_path, self.file_url) {
            (Some(id), Some(name), Some(file_path), Some(file_url)) => Some(FileRecord {
                id,
                name,
                file_path,
                file_url,
                size_bytes: self.file_size.unwrap_or_default(),
                mime_type: self.file_mime_type.unwrap_or_default(),
                resource_type: parse_column::<ResourceType>(
                    self.file_resource_type.as_deref().unwrap_or_default(),
                    "resource_type",
                )?,
                resource_id: self.file_resource_id,
                uploader_id: self.file_uploader_id.unwrap_or(self.sender_id),
                created_at: self.file_created_at.unwrap_or(self.created_at),
                updated_at: self.file_updated_at.unwrap_or(self.updated_at),
            }),
            _ => None,
        };

        Ok(ChatMessageDetail {
            message: ChatMessage {
                id: self.id,
                community_id: self.community_id,
                sender_id: self.sender_id,
                message_type: parse_column::<MessageType>(&self.message_type, "message_type")?,
                content: self.content,
                file_id: self.file_id,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            sender: UserSummary {
                id: self.sender_id,
                email: self.sender_email,
                role: parse_column::<Role>(&self.sender_role, "role")?,
                profile_photo_url: self.sender_photo_url,
            },
            file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_names_the_subject() {
        let err = map_db_error(sqlx::Error::RowNotFound, &"community 42");
        assert!(matches!(err, PortError::NotFound(ref m) if m == "community 42 not found"));
    }

    #[test]
    fn other_failures_are_unexpected() {
        let err = map_db_error(sqlx::Error::PoolTimedOut, &"user 7");
        assert!(matches!(err, PortError::Unexpected(_)));
    }

    #[test]
    fn corrupted_enum_columns_are_reported() {
        assert!(parse_column::<Role>("STUDENT", "role").is_ok());
        assert!(matches!(parse_column::<Role>("ROOT", "role"), Err(PortError::Unexpected(_))));
    }
}
