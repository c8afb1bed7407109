//! services/api/src/realtime/message_handler.rs
//!
//! Persists text frames typed into live sessions. The handler taps the hub,
//! stores every pending frame and republishes it with the id and timestamp
//! assigned by the database. Frames that already carry an id were stored by
//! someone else and are ignored, which keeps the handler from feeding itself.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use unisphere_core::domain::NewChatMessage;
use unisphere_core::ports::{ChatMessageRepository, PortError};

use crate::realtime::hub::HubHandle;
use crate::web::protocol::ChatFrame;

#[derive(Clone)]
pub struct MessageHandler {
    messages: Arc<dyn ChatMessageRepository>,
    hub: HubHandle,
}

impl MessageHandler {
    pub fn new(messages: Arc<dyn ChatMessageRepository>, hub: HubHandle) -> Self {
        Self { messages, hub }
    }

    /// Subscribes to the hub and processes frames on a background task until the hub stops.
    pub async fn spawn(self, capacity: usize) -> JoinHandle<()> {
        let (listener_id, rx) = self.hub.add_listener(capacity).await;
        info!(listener_id, "message handler subscribed");
        tokio::spawn(async move {
            self.run(rx).await;
            info!("message handler stopped");
        })
    }

    async fn run(&self, mut rx: mpsc::Receiver<ChatFrame>) {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = self.handle(frame).await {
                match e {
                    PortError::ForeignKey(_) | PortError::BadRequest(_) => {
                        warn!(error = %e, "chat frame rejected")
                    }
                    _ => error!(error = %e, "failed to persist chat frame"),
                }
            }
        }
    }

    /// Stores a pending frame and broadcasts the stored version.
    pub async fn handle(&self, frame: ChatFrame) -> Result<Option<ChatFrame>, PortError> {
        if !frame.is_pending() {
            return Ok(None);
        }

        let new = NewChatMessage::text(frame.community_id, frame.sender_id, frame.content);
        new.validate()?;
        let stored = self.messages.append_message(new).await?;
        debug!(message_id = stored.id, community_id = stored.community_id, "chat frame persisted");

        let published = ChatFrame::from_message(&stored, None);
        self.hub.publish(published.clone()).await;
        Ok(Some(published))
    }
}
