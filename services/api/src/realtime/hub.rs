//! services/api/src/realtime/hub.rs
//!
//! In-process fan-out of chat frames to the live sessions of a community.
//!
//! A single task owns the session map. Registration, unregistration and
//! publishing arrive as messages on dedicated channels and are applied one at
//! a time, so frames published to a community reach every session of that
//! community in the order the hub received them. Listener taps see every
//! published frame, including text frames that have not been stored yet;
//! those are routed to sessions only once the persister republishes them
//! with their id.

use axum::extract::ws::Utf8Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::web::protocol::ChatFrame;

pub type SessionId = u64;
pub type ListenerId = u64;

/// Configuration for `Hub`.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Buffer of the publish channel.
    pub publish_capacity: usize,
    /// Buffer of the register and control channels.
    pub control_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            publish_capacity: 1024,
            control_capacity: 256,
        }
    }
}

/// The hub's side of one live session.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub user_id: i64,
    pub community_id: i64,
    outbound: mpsc::Sender<Utf8Bytes>,
}

impl SessionHandle {
    pub fn new(id: SessionId, user_id: i64, community_id: i64, outbound: mpsc::Sender<Utf8Bytes>) -> Self {
        Self {
            id,
            user_id,
            community_id,
            outbound,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey {
            community_id: self.community_id,
            session_id: self.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub community_id: i64,
    pub session_id: SessionId,
}

#[derive(Debug)]
enum Control {
    Unregister(SessionKey),
    /// Drops every session a user holds in a community.
    EvictUser { community_id: i64, user_id: i64 },
    CloseCommunity(i64),
}

struct Listener {
    id: ListenerId,
    tx: mpsc::Sender<ChatFrame>,
}

/// Cloneable entry point used by sessions, services and the persister.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<SessionHandle>,
    control_tx: mpsc::Sender<Control>,
    publish_tx: mpsc::Sender<ChatFrame>,
    listeners: Arc<RwLock<Vec<Listener>>>,
    counts: Arc<RwLock<HashMap<i64, usize>>>,
    next_id: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

pub struct Hub {
    register_rx: mpsc::Receiver<SessionHandle>,
    control_rx: mpsc::Receiver<Control>,
    publish_rx: mpsc::Receiver<ChatFrame>,
    sessions: HashMap<i64, HashMap<SessionId, SessionHandle>>,
    listeners: Arc<RwLock<Vec<Listener>>>,
    counts: Arc<RwLock<HashMap<i64, usize>>>,
    shutdown: CancellationToken,
}

impl Hub {
    pub fn new(cfg: HubConfig, shutdown: CancellationToken) -> (Hub, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(cfg.control_capacity);
        let (control_tx, control_rx) = mpsc::channel(cfg.control_capacity);
        let (publish_tx, publish_rx) = mpsc::channel(cfg.publish_capacity);
        let listeners = Arc::new(RwLock::new(Vec::new()));
        let counts = Arc::new(RwLock::new(HashMap::new()));

        let hub = Hub {
            register_rx,
            control_rx,
            publish_rx,
            sessions: HashMap::new(),
            listeners: listeners.clone(),
            counts: counts.clone(),
            shutdown: shutdown.clone(),
        };
        let handle = HubHandle {
            register_tx,
            control_tx,
            publish_tx,
            listeners,
            counts,
            next_id: Arc::new(AtomicU64::new(1)),
            shutdown,
        };
        (hub, handle)
    }

    /// Builds a hub and runs it on its own task.
    pub fn spawn(cfg: HubConfig, shutdown: CancellationToken) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Hub::new(cfg, shutdown);
        let task = tokio::spawn(hub.run());
        (handle, task)
    }

    pub async fn run(mut self) {
        info!("hub started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(session) = self.register_rx.recv() => self.register(session).await,
                Some(control) = self.control_rx.recv() => self.apply(control).await,
                Some(frame) = self.publish_rx.recv() => self.publish(frame).await,
                else => break,
            }
        }
        self.close_all().await;
        info!("hub stopped");
    }

    async fn register(&mut self, session: SessionHandle) {
        let community_id = session.community_id;
        debug!(community_id, user_id = session.user_id, session_id = session.id, "session registered");
        self.sessions
            .entry(community_id)
            .or_default()
            .insert(session.id, session);
        self.sync_count(community_id).await;
    }

    async fn apply(&mut self, control: Control) {
        match control {
            Control::Unregister(key) => self.remove(&[key]).await,
            Control::EvictUser {
                community_id,
                user_id,
            } => {
                let keys: Vec<SessionKey> = self
                    .sessions
                    .get(&community_id)
                    .map(|sessions| {
                        sessions
                            .values()
                            .filter(|s| s.user_id == user_id)
                            .map(SessionHandle::key)
                            .collect()
                    })
                    .unwrap_or_default();
                if !keys.is_empty() {
                    info!(community_id, user_id, sessions = keys.len(), "evicting user sessions");
                }
                self.remove(&keys).await;
            }
            Control::CloseCommunity(community_id) => {
                if let Some(sessions) = self.sessions.remove(&community_id) {
                    info!(community_id, sessions = sessions.len(), "closing community sessions");
                }
                self.sync_count(community_id).await;
            }
        }
    }

    /// Dropping a handle closes its outbound queue, which ends the session's writer.
    async fn remove(&mut self, keys: &[SessionKey]) {
        let mut touched = Vec::new();
        for key in keys {
            let Some(sessions) = self.sessions.get_mut(&key.community_id) else {
                continue;
            };
            if sessions.remove(&key.session_id).is_some() {
                debug!(community_id = key.community_id, session_id = key.session_id, "session unregistered");
                touched.push(key.community_id);
            }
            if sessions.is_empty() {
                self.sessions.remove(&key.community_id);
            }
        }
        touched.sort_unstable();
        touched.dedup();
        for community_id in touched {
            self.sync_count(community_id).await;
        }
    }

    async fn publish(&mut self, frame: ChatFrame) {
        self.notify_listeners(&frame).await;

        if frame.is_pending() {
            return;
        }
        let Some(sessions) = self.sessions.get(&frame.community_id) else {
            return;
        };

        let payload = match serde_json::to_string(&frame) {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                error!(error = %e, "failed to serialize frame");
                return;
            }
        };

        let mut unhealthy = Vec::new();
        for session in sessions.values() {
            match session.outbound.try_send(payload.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        community_id = frame.community_id,
                        user_id = session.user_id,
                        session_id = session.id,
                        "send queue full, dropping slow session"
                    );
                    unhealthy.push(session.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => unhealthy.push(session.key()),
            }
        }
        self.remove(&unhealthy).await;
    }

    async fn notify_listeners(&self, frame: &ChatFrame) {
        let listeners = self.listeners.read().await;
        for listener in listeners.iter() {
            match listener.tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(listener_id = listener.id, "listener buffer full, frame skipped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(listener_id = listener.id, "listener gone");
                }
            }
        }
    }

    async fn sync_count(&self, community_id: i64) {
        let live = self.sessions.get(&community_id).map_or(0, HashMap::len);
        let mut counts = self.counts.write().await;
        if live == 0 {
            counts.remove(&community_id);
        } else {
            counts.insert(community_id, live);
        }
    }

    async fn close_all(&mut self) {
        let live: usize = self.sessions.values().map(HashMap::len).sum();
        self.sessions.clear();
        self.counts.write().await.clear();
        self.listeners.write().await.clear();
        info!(sessions = live, "closed all session queues");
    }
}

impl HubHandle {
    pub fn next_session_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns `false` when the hub is no longer running.
    pub async fn register(&self, session: SessionHandle) -> bool {
        self.register_tx.send(session).await.is_ok()
    }

    pub async fn unregister(&self, key: SessionKey) {
        let _ = self.control_tx.send(Control::Unregister(key)).await;
    }

    pub async fn evict_user(&self, community_id: i64, user_id: i64) {
        let _ = self
            .control_tx
            .send(Control::EvictUser {
                community_id,
                user_id,
            })
            .await;
    }

    /// Drops every session attached to a community.
    pub async fn close_community(&self, community_id: i64) {
        let _ = self.control_tx.send(Control::CloseCommunity(community_id)).await;
    }

    pub async fn publish(&self, frame: ChatFrame) {
        if self.publish_tx.send(frame).await.is_err() {
            debug!("hub stopped, frame discarded");
        }
    }

    /// Taps every published frame into a new bounded channel.
    pub async fn add_listener(&self, capacity: usize) -> (ListenerId, mpsc::Receiver<ChatFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().await.push(Listener { id, tx });
        (id, rx)
    }

    pub async fn remove_listener(&self, id: ListenerId) {
        self.listeners.write().await.retain(|l| l.id != id);
    }

    /// Live sessions attached to a community.
    pub async fn client_count(&self, community_id: i64) -> usize {
        self.counts.read().await.get(&community_id).copied().unwrap_or(0)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops the hub; every session queue is closed.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
