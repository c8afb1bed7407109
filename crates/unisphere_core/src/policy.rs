//! crates/unisphere_core/src/policy.rs
//!
//! Authorization policy over community and catalog resources.
//!
//! Decisions depend only on role and ownership. Lookups that cannot resolve a
//! resource surface `NotFound`; policy denials surface `Forbidden` with a
//! generic message. The concrete reason is written to the server log only.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{ChatMessage, Community, Role, User};
use crate::ports::{CatalogRepository, MembershipRepository, PortError, PortResult};

const DENIED: &str = "you are not allowed to perform this action";

fn denied() -> PortError {
    PortError::Forbidden(DENIED.to_string())
}

/// Role check.
pub fn is_instructor(user: &User) -> bool {
    user.role == Role::Instructor
}

/// The sender of a message or the lead of its community may modify it.
pub fn can_modify_chat_message(message: &ChatMessage, user_id: i64, community: &Community) -> bool {
    message.community_id == community.id
        && (message.sender_id == user_id || community.lead_id == user_id)
}

#[derive(Clone)]
pub struct AuthorizationService {
    memberships: Arc<dyn MembershipRepository>,
    catalog: Arc<dyn CatalogRepository>,
}

impl AuthorizationService {
    pub fn new(
        memberships: Arc<dyn MembershipRepository>,
        catalog: Arc<dyn CatalogRepository>,
    ) -> Self {
        Self {
            memberships,
            catalog,
        }
    }

    /// The user must be an instructor and own the instructor row that recorded the exam.
    pub async fn can_modify_past_exam(&self, exam_id: i64, user: &User) -> PortResult<()> {
        let exam = self.catalog.find_past_exam(exam_id).await?;
        let instructor = self.catalog.find_instructor(exam.instructor_id).await?;

        if !is_instructor(user) {
            warn!(user_id = user.id, exam_id, role = %user.role, "past exam denied: not an instructor");
            return Err(denied());
        }
        if instructor.user_id != user.id {
            warn!(user_id = user.id, exam_id, owner = instructor.user_id, "past exam denied: not the author");
            return Err(denied());
        }
        Ok(())
    }

    pub async fn can_modify_class_note(&self, note_id: i64, user: &User) -> PortResult<()> {
        let note = self.catalog.find_class_note(note_id).await?;
        if note.uploader_id != user.id {
            warn!(user_id = user.id, note_id, owner = note.uploader_id, "class note denied: not the uploader");
            return Err(denied());
        }
        Ok(())
    }

    pub fn check_chat_message(
        &self,
        message: &ChatMessage,
        user_id: i64,
        community: &Community,
    ) -> PortResult<()> {
        if can_modify_chat_message(message, user_id, community) {
            return Ok(());
        }
        warn!(
            user_id,
            message_id = message.id,
            sender_id = message.sender_id,
            lead_id = community.lead_id,
            "chat message denied: neither sender nor lead"
        );
        Err(denied())
    }

    pub async fn is_community_member(&self, community_id: i64, user_id: i64) -> PortResult<bool> {
        self.memberships.is_member(community_id, user_id).await
    }

    /// Like `is_community_member`, but a non-member is a `Forbidden` error.
    pub async fn require_member(&self, community_id: i64, user_id: i64) -> PortResult<()> {
        if self.is_community_member(community_id, user_id).await? {
            Ok(())
        } else {
            debug!(community_id, user_id, "denied: not a community member");
            Err(denied())
        }
    }
}
