//! Chat message history.

use async_trait::async_trait;
use unisphere_core::domain::{ChatMessage, ChatMessageDetail, MessageFilter, NewChatMessage};
use unisphere_core::ports::{ChatMessageRepository, PortResult};

use super::{ChatMessageRecord, DbAdapter, MessageDetailRecord, MESSAGE_COLUMNS, MESSAGE_DETAIL_SELECT};

#[async_trait]
impl ChatMessageRepository for DbAdapter {
    async fn append_message(&self, message: NewChatMessage) -> PortResult<ChatMessage> {
        let sql = format!(
            "INSERT INTO chat_messages (community_id, sender_id, message_type, content, file_id) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            MESSAGE_COLUMNS
        );
        let record = self
            .timed(
                format!("message in community {}", message.community_id),
                sqlx::query_as::<_, ChatMessageRecord>(&sql)
                    .bind(message.community_id)
                    .bind(message.sender_id)
                    .bind(message.message_type.as_str())
                    .bind(&message.content)
                    .bind(message.file_id)
                    .fetch_one(&self.pool),
            )
            .await?;
        record.to_domain()
    }

    async fn find_message(&self, message_id: i64) -> PortResult<ChatMessage> {
        let sql = format!("SELECT {} FROM chat_messages WHERE id = $1", MESSAGE_COLUMNS);
        let record = self
            .timed(
                format!("message {}", message_id),
                sqlx::query_as::<_, ChatMessageRecord>(&sql)
                    .bind(message_id)
                    .fetch_one(&self.pool),
            )
            .await?;
        record.to_domain()
    }

    async fn find_message_detail(&self, message_id: i64) -> PortResult<ChatMessageDetail> {
        let sql = format!("{} WHERE m.id = $1", MESSAGE_DETAIL_SELECT);
        let record = self
            .timed(
                format!("message {}", message_id),
                sqlx::query_as::<_, MessageDetailRecord>(&sql)
                    .bind(message_id)
                    .fetch_one(&self.pool),
            )
            .await?;
        record.to_domain()
    }

    async fn list_messages(
        &self,
        community_id: i64,
        filter: &MessageFilter,
    ) -> PortResult<Vec<ChatMessageDetail>> {
        let limit = filter.effective_limit();
        if limit == 0 || filter.is_empty_range() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "{} WHERE m.community_id = $1 \
               AND ($2::timestamptz IS NULL OR m.created_at < $2) \
               AND ($3::timestamptz IS NULL OR m.created_at > $3) \
               AND ($4::bigint IS NULL OR m.sender_id = $4) \
             ORDER BY m.created_at DESC, m.id DESC \
             LIMIT $5",
            MESSAGE_DETAIL_SELECT
        );
        let records = self
            .timed(
                format!("messages of community {}", community_id),
                sqlx::query_as::<_, MessageDetailRecord>(&sql)
                    .bind(community_id)
                    .bind(filter.before)
                    .bind(filter.after)
                    .bind(filter.sender_id)
                    .bind(limit)
                    .fetch_all(&self.pool),
            )
            .await?;
        records.into_iter().map(MessageDetailRecord::to_domain).collect()
    }

    async fn delete_message(&self, message_id: i64) -> PortResult<Option<ChatMessage>> {
        let sql = format!("DELETE FROM chat_messages WHERE id = $1 RETURNING {}", MESSAGE_COLUMNS);
        let record = self
            .timed(
                format!("message {}", message_id),
                sqlx::query_as::<_, ChatMessageRecord>(&sql)
                    .bind(message_id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        record.map(ChatMessageRecord::to_domain).transpose()
    }

    async fn delete_messages_for_community(&self, community_id: i64) -> PortResult<u64> {
        let result = self
            .timed(
                format!("messages of community {}", community_id),
                sqlx::query("DELETE FROM chat_messages WHERE community_id = $1")
                    .bind(community_id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }
}
