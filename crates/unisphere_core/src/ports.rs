//! crates/unisphere_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or disks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::domain::{
    ByteStream, ChatMessage, ChatMessageDetail, ClassNote, Community, FileRecord, Instructor,
    Membership, MessageFilter, NewChatMessage, NewCommunity, NewFile, NewUser, PastExam,
    RefreshToken, StoredBlob, User, UserSummary,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// The error kinds every port can surface.
/// Adapters map backend-specific conditions onto these; services pass them through.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Referenced row does not exist: {0}")]
    ForeignKey(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    /// The stable kind name reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            PortError::BadRequest(_) => "BadRequest",
            PortError::Unauthorized(_) => "Unauthorized",
            PortError::Forbidden(_) => "Forbidden",
            PortError::NotFound(_) | PortError::ForeignKey(_) => "NotFound",
            PortError::Conflict(_) => "Conflict",
            PortError::PayloadTooLarge(_) => "PayloadTooLarge",
            PortError::Unexpected(_) => "Internal",
        }
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Storage Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `Conflict` when the email is taken.
    async fn create_user(&self, user: NewUser) -> PortResult<User>;

    async fn find_user_by_id(&self, user_id: i64) -> PortResult<User>;

    async fn find_user_by_email(&self, email: &str) -> PortResult<User>;

    /// Points the user at a new profile photo, returning the previous one.
    async fn set_profile_photo(&self, user_id: i64, file_id: Option<i64>) -> PortResult<Option<i64>>;
}

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn insert_refresh_token(&self, token: RefreshToken) -> PortResult<()>;

    async fn find_refresh_token(&self, token: &str) -> PortResult<Option<RefreshToken>>;

    /// Flips the revoked flag. Returns `true` only for the call that flipped it,
    /// which makes refresh exchange one-time even under concurrent callers.
    async fn revoke_refresh_token(&self, token: &str) -> PortResult<bool>;

    /// Deletes tokens that expired before `now` or were revoked before `revoked_before`.
    async fn purge_refresh_tokens(
        &self,
        now: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
    ) -> PortResult<u64>;
}

#[async_trait]
pub trait CommunityRepository: Send + Sync {
    /// Creates the community and the lead's membership together.
    async fn create_community(&self, community: NewCommunity) -> PortResult<Community>;

    async fn find_community(&self, community_id: i64) -> PortResult<Community>;

    /// Removes the community row; memberships go with it.
    async fn delete_community(&self, community_id: i64) -> PortResult<()>;
}

#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn is_member(&self, community_id: i64, user_id: i64) -> PortResult<bool>;

    /// Fails with `Conflict` if already a member.
    async fn add_member(&self, community_id: i64, user_id: i64) -> PortResult<Membership>;

    /// Fails with `NotFound` if not a member.
    async fn remove_member(&self, community_id: i64, user_id: i64) -> PortResult<()>;

    async fn count_members(&self, community_id: i64) -> PortResult<i64>;

    /// Ids missing from the result have zero members.
    async fn count_members_many(&self, community_ids: &[i64]) -> PortResult<HashMap<i64, i64>>;

    async fn list_communities_for_user(&self, user_id: i64) -> PortResult<Vec<Community>>;

    async fn list_members(&self, community_id: i64) -> PortResult<Vec<UserSummary>>;
}

#[async_trait]
pub trait ChatMessageRepository: Send + Sync {
    /// Fails with `ForeignKey` if the community or sender is missing.
    async fn append_message(&self, message: NewChatMessage) -> PortResult<ChatMessage>;

    async fn find_message(&self, message_id: i64) -> PortResult<ChatMessage>;

    async fn find_message_detail(&self, message_id: i64) -> PortResult<ChatMessageDetail>;

    /// Newest first: `created_at DESC, id DESC`.
    async fn list_messages(
        &self,
        community_id: i64,
        filter: &MessageFilter,
    ) -> PortResult<Vec<ChatMessageDetail>>;

    /// Idempotent. Returns the removed row so its file can be cleaned up.
    async fn delete_message(&self, message_id: i64) -> PortResult<Option<ChatMessage>>;

    async fn delete_messages_for_community(&self, community_id: i64) -> PortResult<u64>;
}

#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn insert_file(&self, file: NewFile) -> PortResult<FileRecord>;

    /// Idempotent. Returns the removed row so its blob can be cleaned up.
    async fn delete_file(&self, file_id: i64) -> PortResult<Option<FileRecord>>;

    /// Files whose owner is the community or one of its messages.
    async fn list_community_files(&self, community_id: i64) -> PortResult<Vec<FileRecord>>;
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn find_instructor(&self, instructor_id: i64) -> PortResult<Instructor>;

    async fn find_past_exam(&self, exam_id: i64) -> PortResult<PastExam>;

    async fn find_class_note(&self, note_id: i64) -> PortResult<ClassNote>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Streams `body` to `<sub_path>/<random-id>[.<extension>]`.
    /// Fails with `PayloadTooLarge` once more than `max_bytes` arrive.
    async fn put(
        &self,
        sub_path: &str,
        extension: Option<&str>,
        body: ByteStream,
        max_bytes: u64,
    ) -> PortResult<StoredBlob>;

    /// A blob that is already gone is not an error.
    async fn remove(&self, relative_path: &str) -> PortResult<()>;
}
