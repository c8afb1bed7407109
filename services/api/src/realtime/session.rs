//! services/api/src/realtime/session.rs
//!
//! One WebSocket connection attached to a community. The socket is split into
//! a reader that turns client frames into hub publishes and a writer that
//! drains the session's bounded queue and keeps the connection alive with
//! pings. Either half ending tears the whole session down.

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use chrono::Utc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::realtime::hub::{HubHandle, SessionHandle, SessionKey};
use crate::web::protocol::{ChatFrame, FrameKind};

/// Upper bound on frames written between two flushes.
const MAX_BATCH: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle time allowed without a pong before the connection is dropped.
    pub pong_wait: Duration,
    /// Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Deadline for a single write or flush.
    pub write_wait: Duration,
    pub max_message_size: usize,
    pub send_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            write_wait: Duration::from_secs(10),
            max_message_size: 512 * 1024,
            send_queue: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadEnd {
    Closed,
    Disconnected,
    TimedOut,
    Failed,
}

/// Drives an upgraded socket until either side gives up.
///
/// `still_member` is awaited once the session is registered. A user who left
/// after the upgrade was authorized is turned away instead of lingering.
pub async fn run_session<F>(
    mut socket: WebSocket,
    hub: HubHandle,
    user_id: i64,
    community_id: i64,
    cfg: SessionConfig,
    still_member: F,
) where
    F: Future<Output = bool>,
{
    let (tx, rx) = mpsc::channel(cfg.send_queue);
    let session = SessionHandle::new(hub.next_session_id(), user_id, community_id, tx);
    let Some(key) = admit(&hub, session, still_member).await else {
        let _ = timeout(cfg.write_wait, socket.send(Message::Close(None))).await;
        return;
    };
    info!(community_id, user_id, session_id = key.session_id, "chat session opened");

    let (sink, stream) = socket.split();

    let mut writer = tokio::spawn(write_loop(sink, rx, cfg.clone()));
    let mut writer_done = false;

    tokio::select! {
        end = read_loop(stream, &hub, user_id, community_id, &cfg) => {
            debug!(community_id, user_id, ?end, "reader finished");
        }
        _ = &mut writer => {
            writer_done = true;
            debug!(community_id, user_id, "writer finished");
        }
    }

    // Unregistering drops the hub's sender, so a live writer sends Close and exits.
    hub.unregister(key).await;
    if !writer_done && timeout(cfg.write_wait, &mut writer).await.is_err() {
        writer.abort();
    }
    info!(community_id, user_id, session_id = key.session_id, "chat session closed");
}

/// Registers the session, then confirms the membership it was authorized on.
pub(crate) async fn admit<F>(hub: &HubHandle, session: SessionHandle, still_member: F) -> Option<SessionKey>
where
    F: Future<Output = bool>,
{
    let key = session.key();
    if !hub.register(session).await {
        warn!(community_id = key.community_id, "hub is not running, dropping connection");
        return None;
    }
    // Registrations are applied before control messages, so this unregister cannot overtake it.
    if !still_member.await {
        info!(community_id = key.community_id, session_id = key.session_id, "membership ended before the session started");
        hub.unregister(key).await;
        return None;
    }
    Some(key)
}

pub(crate) async fn read_loop<S, E>(
    mut stream: S,
    hub: &HubHandle,
    user_id: i64,
    community_id: i64,
    cfg: &SessionConfig,
) -> ReadEnd
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + cfg.pong_wait;
    loop {
        let message = match timeout_at(deadline, stream.next()).await {
            Err(_) => {
                info!(community_id, user_id, "no pong within deadline");
                return ReadEnd::TimedOut;
            }
            Ok(None) => return ReadEnd::Disconnected,
            Ok(Some(Err(e))) => {
                debug!(community_id, user_id, error = %e, "socket read failed");
                return ReadEnd::Failed;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Pong(_) => deadline = Instant::now() + cfg.pong_wait,
            Message::Text(text) => {
                if let Some(frame) = inbound_frame(text.as_str(), user_id, community_id) {
                    hub.publish(frame).await;
                }
            }
            Message::Close(_) => return ReadEnd::Closed,
            Message::Binary(_) => debug!(community_id, user_id, "binary frame ignored"),
            Message::Ping(_) => {}
        }
    }
}

/// Parses and rebinds a client frame. Only non-empty text frames survive.
fn inbound_frame(text: &str, user_id: i64, community_id: i64) -> Option<ChatFrame> {
    let mut frame: ChatFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(community_id, user_id, error = %e, "malformed chat frame");
            return None;
        }
    };
    frame.bind_to_session(user_id, community_id, Utc::now());

    if frame.kind != FrameKind::Text {
        debug!(community_id, user_id, kind = ?frame.kind, "client frame kind not accepted");
        return None;
    }
    if frame.content.trim().is_empty() {
        return None;
    }
    Some(frame)
}

pub(crate) async fn write_loop<S>(mut sink: S, mut rx: mpsc::Receiver<Utf8Bytes>, cfg: SessionConfig)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping = tokio::time::interval_at(Instant::now() + cfg.ping_period, cfg.ping_period);
    loop {
        tokio::select! {
            next = rx.recv() => {
                let Some(first) = next else {
                    let _ = timeout(cfg.write_wait, sink.send(Message::Close(None))).await;
                    return;
                };
                if !write_batch(&mut sink, first, &mut rx, cfg.write_wait).await {
                    return;
                }
            }
            _ = ping.tick() => {
                match timeout(cfg.write_wait, sink.send(Message::Ping(Bytes::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(error = %e, "ping failed");
                        return;
                    }
                    Err(_) => {
                        debug!("ping timed out");
                        return;
                    }
                }
            }
        }
    }
}

/// Feeds whatever is already queued behind `first`, then flushes once.
async fn write_batch<S>(sink: &mut S, first: Utf8Bytes, rx: &mut mpsc::Receiver<Utf8Bytes>, write_wait: Duration) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let batch = async {
        sink.feed(Message::Text(first)).await?;
        let mut written = 1;
        while written < MAX_BATCH {
            match rx.try_recv() {
                Ok(payload) => {
                    sink.feed(Message::Text(payload)).await?;
                    written += 1;
                }
                Err(_) => break,
            }
        }
        sink.flush().await
    };

    match timeout(write_wait, batch).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "socket write failed");
            false
        }
        Err(_) => {
            warn!("socket write timed out");
            false
        }
    }
}
