//! crates/unisphere_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.
//! Entities reference each other by numeric id only; relations are
//! materialized by explicit joins in the adapters.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

use crate::ports::{PortError, PortResult};

/// Default page size for chat history queries.
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
/// Upper bound applied to any requested history page size.
pub const MAX_HISTORY_LIMIT: i64 = 200;

//=========================================================================================
// Users
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Instructor => "INSTRUCTOR",
            Role::Admin => "ADMIN",
        }
    }
}

impl FromStr for Role {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STUDENT" => Ok(Role::Student),
            "INSTRUCTOR" => Ok(Role::Instructor),
            "ADMIN" => Ok(Role::Admin),
            other => Err(PortError::BadRequest(format!("unknown role '{}'", other))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered account. Never destroyed, only deactivated.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub active: bool,
    pub verified: bool,
    pub department_id: Option<i64>,
    pub profile_photo_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Only used when registering - contains the already hashed password
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// The public profile basics joined onto messages and member lists.
#[derive(Debug, Clone, PartialEq)]
pub struct UserSummary {
    pub id: i64,
    pub email: String,
    pub role: Role,
    pub profile_photo_url: Option<String>,
}

//=========================================================================================
// Communities
//=========================================================================================

/// A named group of users with exactly one lead.
#[derive(Debug, Clone, PartialEq)]
pub struct Community {
    pub id: i64,
    pub name: String,
    pub abbreviation: String,
    pub lead_id: i64,
    pub profile_photo_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCommunity {
    pub name: String,
    pub abbreviation: String,
    pub lead_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    pub community_id: i64,
    pub user_id: i64,
    pub joined_at: DateTime<Utc>,
}

//=========================================================================================
// Chat Messages
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Text,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "TEXT",
            MessageType::File => "FILE",
        }
    }
}

impl FromStr for MessageType {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEXT" => Ok(MessageType::Text),
            "FILE" => Ok(MessageType::File),
            other => Err(PortError::BadRequest(format!(
                "unknown message type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: i64,
    pub community_id: i64,
    pub sender_id: i64,
    pub message_type: MessageType,
    pub content: String,
    pub file_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message about to be appended. The id and timestamps are server-assigned.
#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub community_id: i64,
    pub sender_id: i64,
    pub message_type: MessageType,
    pub content: String,
    pub file_id: Option<i64>,
}

impl NewChatMessage {
    pub fn text(community_id: i64, sender_id: i64, content: impl Into<String>) -> Self {
        Self {
            community_id,
            sender_id,
            message_type: MessageType::Text,
            content: content.into(),
            file_id: None,
        }
    }

    pub fn file(community_id: i64, sender_id: i64, content: impl Into<String>, file_id: i64) -> Self {
        Self {
            community_id,
            sender_id,
            message_type: MessageType::File,
            content: content.into(),
            file_id: Some(file_id),
        }
    }

    /// TEXT carries no file and non-empty content; FILE always references a file.
    pub fn validate(&self) -> PortResult<()> {
        if self.content.trim().is_empty() {
            return Err(PortError::BadRequest("content must not be empty".to_string()));
        }
        match (self.message_type, self.file_id) {
            (MessageType::Text, None) | (MessageType::File, Some(_)) => Ok(()),
            (MessageType::Text, Some(_)) => Err(PortError::BadRequest(
                "text messages cannot reference a file".to_string(),
            )),
            (MessageType::File, None) => Err(PortError::BadRequest(
                "file messages must reference a file".to_string(),
            )),
        }
    }
}

/// A message with its sender basics and file metadata fetched eagerly.
#[derive(Debug, Clone)]
pub struct ChatMessageDetail {
    pub message: ChatMessage,
    pub sender: UserSummary,
    pub file: Option<FileRecord>,
}

/// Range query over one community's history.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Exclusive upper bound on created-at.
    pub before: Option<DateTime<Utc>>,
    /// Exclusive lower bound on created-at.
    pub after: Option<DateTime<Utc>>,
    pub sender_id: Option<i64>,
    pub limit: Option<i64>,
}

impl MessageFilter {
    /// The page size actually used: defaulted, floored at zero, capped.
    pub fn effective_limit(&self) -> i64 {
        match self.limit {
            None => DEFAULT_HISTORY_LIMIT,
            Some(n) => n.clamp(0, MAX_HISTORY_LIMIT),
        }
    }

    /// True when no row can possibly match.
    pub fn is_empty_range(&self) -> bool {
        if self.effective_limit() == 0 {
            return true;
        }
        matches!((self.before, self.after), (Some(b), Some(a)) if b <= a)
    }
}

//=========================================================================================
// Files
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    ClassNote,
    PastExam,
    ProfilePhoto,
    ChatMessage,
    Community,
    CommunityProfilePhoto,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::ClassNote => "CLASS_NOTE",
            ResourceType::PastExam => "PAST_EXAM",
            ResourceType::ProfilePhoto => "PROFILE_PHOTO",
            ResourceType::ChatMessage => "CHAT_MESSAGE",
            ResourceType::Community => "COMMUNITY",
            ResourceType::CommunityProfilePhoto => "COMMUNITY_PROFILE_PHOTO",
        }
    }

    /// Top-level directory under the storage root.
    pub fn storage_dir(&self) -> &'static str {
        match self {
            ResourceType::ClassNote => "class_notes",
            ResourceType::PastExam => "past_exams",
            ResourceType::ProfilePhoto => "profile_photos",
            ResourceType::ChatMessage => "chat",
            ResourceType::Community => "communities",
            ResourceType::CommunityProfilePhoto => "community_photos",
        }
    }

    /// Whether files of this kind belong to a community and die with it.
    pub fn is_community_scoped(&self) -> bool {
        matches!(
            self,
            ResourceType::ChatMessage | ResourceType::Community | ResourceType::CommunityProfilePhoto
        )
    }
}

impl FromStr for ResourceType {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLASS_NOTE" => Ok(ResourceType::ClassNote),
            "PAST_EXAM" => Ok(ResourceType::PastExam),
            "PROFILE_PHOTO" => Ok(ResourceType::ProfilePhoto),
            "CHAT_MESSAGE" => Ok(ResourceType::ChatMessage),
            "COMMUNITY" => Ok(ResourceType::Community),
            "COMMUNITY_PROFILE_PHOTO" => Ok(ResourceType::CommunityProfilePhoto),
            other => Err(PortError::Unexpected(format!(
                "unknown resource type '{}'",
                other
            ))),
        }
    }
}

/// Where an upload is filed: the owning resource kind and its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTarget {
    pub resource_type: ResourceType,
    pub resource_id: i64,
}

impl FileTarget {
    /// Storage sub-path, e.g. `chat/42` or `profile_photos/7`.
    pub fn sub_path(&self) -> String {
        format!("{}/{}", self.resource_type.storage_dir(), self.resource_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub id: i64,
    pub name: String,
    /// Relative to the storage root.
    pub file_path: String,
    pub file_url: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub resource_type: ResourceType,
    pub resource_id: Option<i64>,
    pub uploader_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub file_path: String,
    pub file_url: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub resource_type: ResourceType,
    pub resource_id: Option<i64>,
    pub uploader_id: i64,
}

/// A streamed request body.
pub type ByteStream = Pin<Box<dyn Stream<Item = PortResult<Bytes>> + Send>>;

/// An upload as received from a client.
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub declared_size: Option<u64>,
    pub body: ByteStream,
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("declared_size", &self.declared_size)
            .finish_non_exhaustive()
    }
}

impl Upload {
    /// Wraps an in-memory buffer as an upload.
    pub fn from_bytes(file_name: impl Into<String>, content_type: impl Into<String>, data: Bytes) -> Self {
        let len = data.len() as u64;
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            declared_size: Some(len),
            body: Box::pin(futures::stream::once(async move { Ok(data) })),
        }
    }

    /// Lowercased extension of the client filename, if it is a plain one.
    pub fn extension(&self) -> Option<String> {
        let (_, ext) = self.file_name.rsplit_once('.')?;
        if ext.is_empty() || ext.len() > 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Result of writing a blob to storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    pub relative_path: String,
    pub url: String,
    pub size: u64,
}

//=========================================================================================
// Identity
//=========================================================================================

/// Long-lived opaque credential. One-time use on refresh.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub token: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Catalog (only what authorization reads)
//=========================================================================================

#[derive(Debug, Clone)]
pub struct Instructor {
    pub id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone)]
pub struct PastExam {
    pub id: i64,
    pub instructor_id: i64,
}

#[derive(Debug, Clone)]
pub struct ClassNote {
    pub id: i64,
    pub uploader_id: i64,
}
