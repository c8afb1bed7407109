//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket frame exchanged between browser clients and the
//! server for community chat. One JSON object per frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unisphere_core::domain::{ChatMessage, FileRecord, MessageType};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Text,
    File,
    Delete,
}

/// A chat event on the wire.
///
/// On inbound frames the server overwrites `senderId`, `communityId` and
/// `timestamp`; `id` is only ever assigned by the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatFrame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub community_id: i64,
    #[serde(default)]
    pub sender_id: i64,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<i64>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ChatFrame {
    /// The frame announcing a persisted message.
    pub fn from_message(message: &ChatMessage, file: Option<&FileRecord>) -> Self {
        let kind = match message.message_type {
            MessageType::Text => FrameKind::Text,
            MessageType::File => FrameKind::File,
        };
        Self {
            kind,
            id: Some(message.id),
            community_id: message.community_id,
            sender_id: message.sender_id,
            content: message.content.clone(),
            file_url: file.map(|f| f.file_url.clone()),
            file_id: message.file_id,
            timestamp: message.created_at,
        }
    }

    pub fn deleted(message: &ChatMessage, deleted_by: i64) -> Self {
        Self {
            kind: FrameKind::Delete,
            id: Some(message.id),
            community_id: message.community_id,
            sender_id: deleted_by,
            content: String::new(),
            file_url: None,
            file_id: None,
            timestamp: Utc::now(),
        }
    }

    /// A text frame straight off a socket that has not been stored yet.
    pub fn is_pending(&self) -> bool {
        self.kind == FrameKind::Text && self.id.is_none()
    }

    /// Rebinds a client frame to the session it arrived on.
    pub fn bind_to_session(&mut self, user_id: i64, community_id: i64, now: DateTime<Utc>) {
        self.sender_id = user_id;
        self.community_id = community_id;
        self.timestamp = now;
        self.id = None;
        self.file_id = None;
        self.file_url = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_client_frames_parse() {
        let frame: ChatFrame = serde_json::from_str(r#"{"type":"text","content":"hi"}"#).unwrap();
        assert_eq!(frame.kind, FrameKind::Text);
        assert_eq!(frame.content, "hi");
        assert_eq!(frame.id, None);
        assert!(frame.is_pending());
    }

    #[test]
    fn binding_overwrites_spoofed_fields() {
        let mut frame: ChatFrame = serde_json::from_str(
            r#"{"type":"text","id":5,"senderId":999,"communityId":1,"content":"x","fileId":3,"fileUrl":"http://evil"}"#,
        )
        .unwrap();
        let now = Utc::now();
        frame.bind_to_session(7, 42, now);
        assert_eq!(frame.sender_id, 7);
        assert_eq!(frame.community_id, 42);
        assert_eq!(frame.timestamp, now);
        assert_eq!(frame.id, None);
        assert_eq!(frame.file_id, None);
        assert_eq!(frame.file_url, None);
    }

    #[test]
    fn outbound_frames_use_camel_case_and_survive_a_round_trip() {
        let frame = ChatFrame {
            kind: FrameKind::File,
            id: Some(11),
            community_id: 42,
            sender_id: 7,
            content: "notes.pdf".to_string(),
            file_url: Some("http://localhost/uploads/chat/42/a.pdf".to_string()),
            file_id: Some(3),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "file");
        assert_eq!(json["communityId"], 42);
        assert_eq!(json["senderId"], 7);
        assert_eq!(json["fileId"], 3);

        let back: ChatFrame = serde_json::from_value(json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn unknown_frame_types_fail_to_parse() {
        assert!(serde_json::from_str::<ChatFrame>(r#"{"type":"typing"}"#).is_err());
    }
}
