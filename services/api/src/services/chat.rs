//! services/api/src/services/chat.rs
//!
//! Chat operations reachable over REST. Every successful write is persisted
//! first and then published to the hub, so live sessions only ever see
//! frames that carry a database id.

use std::sync::Arc;
use tracing::{info, warn};
use unisphere_core::domain::{
    ChatMessageDetail, Community, FileTarget, MessageFilter, NewChatMessage, ResourceType, Upload,
};
use unisphere_core::ports::{ChatMessageRepository, CommunityRepository, PortResult};
use unisphere_core::AuthorizationService;

use crate::realtime::HubHandle;
use crate::services::files::{FileService, UploadPolicy};
use crate::web::protocol::ChatFrame;

#[derive(Clone)]
pub struct ChatService {
    communities: Arc<dyn CommunityRepository>,
    messages: Arc<dyn ChatMessageRepository>,
    files: FileService,
    authz: AuthorizationService,
    hub: HubHandle,
}

impl ChatService {
    pub fn new(
        communities: Arc<dyn CommunityRepository>,
        messages: Arc<dyn ChatMessageRepository>,
        files: FileService,
        authz: AuthorizationService,
        hub: HubHandle,
    ) -> Self {
        Self {
            communities,
            messages,
            files,
            authz,
            hub,
        }
    }

    /// The community must exist and the user must belong to it.
    async fn member_of(&self, community_id: i64, user_id: i64) -> PortResult<Community> {
        let community = self.communities.find_community(community_id).await?;
        self.authz.require_member(community_id, user_id).await?;
        Ok(community)
    }

    /// Checked before a WebSocket upgrade.
    pub async fn authorize_session(&self, community_id: i64, user_id: i64) -> PortResult<()> {
        self.member_of(community_id, user_id).await.map(|_| ())
    }

    pub async fn send_text(&self, community_id: i64, sender_id: i64, content: &str) -> PortResult<ChatMessageDetail> {
        let new = NewChatMessage::text(community_id, sender_id, content);
        new.validate()?;
        self.member_of(community_id, sender_id).await?;

        let stored = self.messages.append_message(new).await?;
        self.hub.publish(ChatFrame::from_message(&stored, None)).await;
        info!(message_id = stored.id, community_id, sender_id, "text message sent");

        self.messages.find_message_detail(stored.id).await
    }

    /// Uploads the attachment, then records a FILE message pointing at it.
    /// An empty description falls back to the file's original name.
    pub async fn send_file(
        &self,
        community_id: i64,
        sender_id: i64,
        description: Option<String>,
        upload: Upload,
    ) -> PortResult<ChatMessageDetail> {
        self.member_of(community_id, sender_id).await?;

        let target = FileTarget {
            resource_type: ResourceType::ChatMessage,
            resource_id: community_id,
        };
        let file = self
            .files
            .upload(upload, target, sender_id, UploadPolicy::ChatAttachment)
            .await?;

        let content = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| file.name.clone());
        let new = NewChatMessage::file(community_id, sender_id, content, file.id);

        let stored = match self.messages.append_message(new).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(file_id = file.id, community_id, error = %e, "file message not stored, removing upload");
                if let Err(cleanup) = self.files.delete(file.id).await {
                    warn!(file_id = file.id, error = %cleanup, "compensating file delete failed");
                }
                return Err(e);
            }
        };

        self.hub.publish(ChatFrame::from_message(&stored, Some(&file))).await;
        info!(message_id = stored.id, file_id = file.id, community_id, sender_id, "file message sent");

        Ok(ChatMessageDetail {
            sender: self.messages.find_message_detail(stored.id).await?.sender,
            message: stored,
            file: Some(file),
        })
    }

    /// Newest first. `limit` defaults to 50 and is capped at 200.
    pub async fn list(&self, community_id: i64, user_id: i64, filter: MessageFilter) -> PortResult<Vec<ChatMessageDetail>> {
        self.member_of(community_id, user_id).await?;
        if filter.effective_limit() == 0 || filter.is_empty_range() {
            return Ok(Vec::new());
        }
        self.messages.list_messages(community_id, &filter).await
    }

    pub async fn get(&self, message_id: i64, user_id: i64) -> PortResult<ChatMessageDetail> {
        let detail = self.messages.find_message_detail(message_id).await?;
        self.authz
            .require_member(detail.message.community_id, user_id)
            .await?;
        Ok(detail)
    }

    /// Sender or lead only. Removes the message and its file, then tells live clients.
    pub async fn delete(&self, message_id: i64, user_id: i64) -> PortResult<()> {
        let message = self.messages.find_message(message_id).await?;
        let community = self.communities.find_community(message.community_id).await?;
        self.authz.check_chat_message(&message, user_id, &community)?;

        let Some(removed) = self.messages.delete_message(message_id).await? else {
            return Ok(());
        };
        if let Some(file_id) = removed.file_id {
            if let Err(e) = self.files.delete(file_id).await {
                warn!(message_id, file_id, error = %e, "attached file not removed");
            }
        }

        self.hub.publish(ChatFrame::deleted(&removed, user_id)).await;
        info!(message_id, community_id = removed.community_id, user_id, "message deleted");
        Ok(())
    }
}
