//! Shared harness for the integration tests: an in-memory backend for every
//! repository port and an application wired the same way the binary does it.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use unisphere_api::{
    adapters::LocalFileStore,
    config::Config,
    identity::{AccessClaims, TokenSigner},
    realtime::{Hub, HubConfig, HubHandle, MessageHandler},
    web::{build_router, AppState, Repositories},
};
use unisphere_core::domain::{
    ChatMessage, ChatMessageDetail, ClassNote, Community, FileRecord, Instructor, Membership,
    MessageFilter, NewChatMessage, NewCommunity, NewFile, NewUser, PastExam, RefreshToken, Role,
    User, UserSummary,
};
use unisphere_core::ports::{
    CatalogRepository, ChatMessageRepository, CommunityRepository, FileRepository,
    MembershipRepository, PortError, PortResult, RefreshTokenRepository, UserRepository,
};

pub const SECRET: &str = "integration-secret-0123456789abcdef";
pub const MAX_UPLOAD: usize = 1024 * 1024;

//=========================================================================================
// In-memory backend
//=========================================================================================

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    tokens: HashMap<String, (RefreshToken, Option<DateTime<Utc>>)>,
    communities: BTreeMap<i64, Community>,
    members: Vec<Membership>,
    messages: BTreeMap<i64, ChatMessage>,
    files: BTreeMap<i64, FileRecord>,
}

impl Tables {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn summary(&self, user_id: i64) -> PortResult<UserSummary> {
        let user = self
            .users
            .get(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("user {} not found", user_id)))?;
        Ok(UserSummary {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
            profile_photo_url: user
                .profile_photo_id
                .and_then(|id| self.files.get(&id))
                .map(|f| f.file_url.clone()),
        })
    }

    fn detail(&self, message: &ChatMessage) -> PortResult<ChatMessageDetail> {
        Ok(ChatMessageDetail {
            sender: self.summary(message.sender_id)?,
            file: message.file_id.and_then(|id| self.files.get(&id).cloned()),
            message: message.clone(),
        })
    }
}

/// Enforces the same keys and references as the relational schema.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap()
    }

    pub fn seed_user(&self, email: &str, role: Role) -> i64 {
        let mut t = self.lock();
        let id = t.id();
        let now = Utc::now();
        t.users.insert(
            id,
            User {
                id,
                email: email.to_string(),
                password_hash: String::new(),
                role,
                active: true,
                verified: true,
                department_id: None,
                profile_photo_id: None,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub fn user(&self, user_id: i64) -> User {
        self.lock().users.get(&user_id).cloned().unwrap()
    }

    pub fn file_count(&self) -> usize {
        self.lock().files.len()
    }

    pub fn file(&self, file_id: i64) -> Option<FileRecord> {
        self.lock().files.get(&file_id).cloned()
    }

    pub fn message_count(&self, community_id: i64) -> usize {
        self.lock()
            .messages
            .values()
            .filter(|m| m.community_id == community_id)
            .count()
    }

    pub fn is_member_now(&self, community_id: i64, user_id: i64) -> bool {
        self.lock()
            .members
            .iter()
            .any(|m| m.community_id == community_id && m.user_id == user_id)
    }

    pub fn token_count(&self) -> usize {
        self.lock().tokens.len()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, user: NewUser) -> PortResult<User> {
        let mut t = self.lock();
        if t.users.values().any(|u| u.email == user.email) {
            return Err(PortError::Conflict("email already registered".to_string()));
        }
        let id = t.id();
        let now = Utc::now();
        let created = User {
            id,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            active: true,
            verified: false,
            department_id: None,
            profile_photo_id: None,
            created_at: now,
            updated_at: now,
        };
        t.users.insert(id, created.clone());
        Ok(created)
    }

    async fn find_user_by_id(&self, user_id: i64) -> PortResult<User> {
        self.lock()
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("user {} not found", user_id)))
    }

    async fn find_user_by_email(&self, email: &str) -> PortResult<User> {
        self.lock()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| PortError::NotFound("user not found".to_string()))
    }

    async fn set_profile_photo(&self, user_id: i64, file_id: Option<i64>) -> PortResult<Option<i64>> {
        let mut t = self.lock();
        if let Some(id) = file_id {
            if !t.files.contains_key(&id) {
                return Err(PortError::ForeignKey(format!("file {} does not exist", id)));
            }
        }
        let user = t
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("user {} not found", user_id)))?;
        let previous = user.profile_photo_id;
        user.profile_photo_id = file_id;
        user.updated_at = Utc::now();
        Ok(previous)
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryStore {
    async fn insert_refresh_token(&self, token: RefreshToken) -> PortResult<()> {
        let mut t = self.lock();
        if !t.users.contains_key(&token.user_id) {
            return Err(PortError::ForeignKey("user does not exist".to_string()));
        }
        if t.tokens.contains_key(&token.token) {
            return Err(PortError::Conflict("duplicate refresh token".to_string()));
        }
        t.tokens.insert(token.token.clone(), (token, None));
        Ok(())
    }

    async fn find_refresh_token(&self, token: &str) -> PortResult<Option<RefreshToken>> {
        Ok(self.lock().tokens.get(token).map(|(t, _)| t.clone()))
    }

    async fn revoke_refresh_token(&self, token: &str) -> PortResult<bool> {
        let mut t = self.lock();
        match t.tokens.get_mut(token) {
            Some((record, revoked_at)) if !record.revoked => {
                record.revoked = true;
                *revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_refresh_tokens(&self, now: DateTime<Utc>, revoked_before: DateTime<Utc>) -> PortResult<u64> {
        let mut t = self.lock();
        let before = t.tokens.len();
        t.tokens.retain(|_, (record, revoked_at)| {
            let expired = record.expires_at < now;
            let stale = record.revoked && revoked_at.unwrap_or(record.created_at) < revoked_before;
            !(expired || stale)
        });
        Ok((before - t.tokens.len()) as u64)
    }
}

#[async_trait]
impl CommunityRepository for MemoryStore {
    async fn create_community(&self, community: NewCommunity) -> PortResult<Community> {
        let mut t = self.lock();
        if !t.users.contains_key(&community.lead_id) {
            return Err(PortError::ForeignKey("lead does not exist".to_string()));
        }
        let id = t.id();
        let now = Utc::now();
        let created = Community {
            id,
            name: community.name,
            abbreviation: community.abbreviation,
            lead_id: community.lead_id,
            profile_photo_id: None,
            created_at: now,
            updated_at: now,
        };
        t.communities.insert(id, created.clone());
        t.members.push(Membership {
            community_id: id,
            user_id: community.lead_id,
            joined_at: now,
        });
        Ok(created)
    }

    async fn find_community(&self, community_id: i64) -> PortResult<Community> {
        self.lock()
            .communities
            .get(&community_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("community {} not found", community_id)))
    }

    async fn delete_community(&self, community_id: i64) -> PortResult<()> {
        let mut t = self.lock();
        if t.communities.remove(&community_id).is_none() {
            return Err(PortError::NotFound(format!("community {} not found", community_id)));
        }
        t.members.retain(|m| m.community_id != community_id);
        t.messages.retain(|_, m| m.community_id != community_id);
        Ok(())
    }
}

#[async_trait]
impl MembershipRepository for MemoryStore {
    async fn is_member(&self, community_id: i64, user_id: i64) -> PortResult<bool> {
        Ok(self.is_member_now(community_id, user_id))
    }

    async fn add_member(&self, community_id: i64, user_id: i64) -> PortResult<Membership> {
        let mut t = self.lock();
        if !t.communities.contains_key(&community_id) || !t.users.contains_key(&user_id) {
            return Err(PortError::ForeignKey("community or user does not exist".to_string()));
        }
        if t
            .members
            .iter()
            .any(|m| m.community_id == community_id && m.user_id == user_id)
        {
            return Err(PortError::Conflict("already a member".to_string()));
        }
        let membership = Membership {
            community_id,
            user_id,
            joined_at: Utc::now(),
        };
        t.members.push(membership.clone());
        Ok(membership)
    }

    async fn remove_member(&self, community_id: i64, user_id: i64) -> PortResult<()> {
        let mut t = self.lock();
        let before = t.members.len();
        t.members
            .retain(|m| !(m.community_id == community_id && m.user_id == user_id));
        if t.members.len() == before {
            return Err(PortError::NotFound("membership not found".to_string()));
        }
        Ok(())
    }

    async fn count_members(&self, community_id: i64) -> PortResult<i64> {
        Ok(self
            .lock()
            .members
            .iter()
            .filter(|m| m.community_id == community_id)
            .count() as i64)
    }

    async fn count_members_many(&self, community_ids: &[i64]) -> PortResult<HashMap<i64, i64>> {
        let t = self.lock();
        let mut counts = HashMap::new();
        for m in t.members.iter().filter(|m| community_ids.contains(&m.community_id)) {
            *counts.entry(m.community_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn list_communities_for_user(&self, user_id: i64) -> PortResult<Vec<Community>> {
        let t = self.lock();
        Ok(t.members
            .iter()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| t.communities.get(&m.community_id).cloned())
            .collect())
    }

    async fn list_members(&self, community_id: i64) -> PortResult<Vec<UserSummary>> {
        let t = self.lock();
        t.members
            .iter()
            .filter(|m| m.community_id == community_id)
            .map(|m| t.summary(m.user_id))
            .collect()
    }
}

#[async_trait]
impl ChatMessageRepository for MemoryStore {
    async fn append_message(&self, message: NewChatMessage) -> PortResult<ChatMessage> {
        let mut t = self.lock();
        if !t.communities.contains_key(&message.community_id) || !t.users.contains_key(&message.sender_id) {
            return Err(PortError::ForeignKey("community or sender does not exist".to_string()));
        }
        if let Some(file_id) = message.file_id {
            if !t.files.contains_key(&file_id) {
                return Err(PortError::ForeignKey("file does not exist".to_string()));
            }
        }
        let id = t.id();
        let now = Utc::now();
        let stored = ChatMessage {
            id,
            community_id: message.community_id,
            sender_id: message.sender_id,
            message_type: message.message_type,
            content: message.content,
            file_id: message.file_id,
            created_at: now,
            updated_at: now,
        };
        t.messages.insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_message(&self, message_id: i64) -> PortResult<ChatMessage> {
        self.lock()
            .messages
            .get(&message_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("message {} not found", message_id)))
    }

    async fn find_message_detail(&self, message_id: i64) -> PortResult<ChatMessageDetail> {
        let t = self.lock();
        let message = t
            .messages
            .get(&message_id)
            .ok_or_else(|| PortError::NotFound(format!("message {} not found", message_id)))?;
        t.detail(message)
    }

    async fn list_messages(&self, community_id: i64, filter: &MessageFilter) -> PortResult<Vec<ChatMessageDetail>> {
        let t = self.lock();
        let mut rows: Vec<&ChatMessage> = t
            .messages
            .values()
            .filter(|m| m.community_id == community_id)
            .filter(|m| filter.before.map_or(true, |b| m.created_at < b))
            .filter(|m| filter.after.map_or(true, |a| m.created_at > a))
            .filter(|m| filter.sender_id.map_or(true, |s| m.sender_id == s))
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        rows.into_iter()
            .take(filter.effective_limit() as usize)
            .map(|m| t.detail(m))
            .collect()
    }

    async fn delete_message(&self, message_id: i64) -> PortResult<Option<ChatMessage>> {
        Ok(self.lock().messages.remove(&message_id))
    }

    async fn delete_messages_for_community(&self, community_id: i64) -> PortResult<u64> {
        let mut t = self.lock();
        let before = t.messages.len();
        t.messages.retain(|_, m| m.community_id != community_id);
        Ok((before - t.messages.len()) as u64)
    }
}

#[async_trait]
impl FileRepository for MemoryStore {
    async fn insert_file(&self, file: NewFile) -> PortResult<FileRecord> {
        let mut t = self.lock();
        if !t.users.contains_key(&file.uploader_id) {
            return Err(PortError::ForeignKey("uploader does not exist".to_string()));
        }
        let id = t.id();
        let now = Utc::now();
        let record = FileRecord {
            id,
            name: file.name,
            file_path: file.file_path,
            file_url: file.file_url,
            size_bytes: file.size_bytes,
            mime_type: file.mime_type,
            resource_type: file.resource_type,
            resource_id: file.resource_id,
            uploader_id: file.uploader_id,
            created_at: now,
            updated_at: now,
        };
        t.files.insert(id, record.clone());
        Ok(record)
    }

    async fn delete_file(&self, file_id: i64) -> PortResult<Option<FileRecord>> {
        let mut t = self.lock();
        if t.messages.values().any(|m| m.file_id == Some(file_id)) {
            return Err(PortError::Conflict("file is still referenced by a message".to_string()));
        }
        let removed = t.files.remove(&file_id);
        for user in t.users.values_mut() {
            if user.profile_photo_id == Some(file_id) {
                user.profile_photo_id = None;
            }
        }
        Ok(removed)
    }

    async fn list_community_files(&self, community_id: i64) -> PortResult<Vec<FileRecord>> {
        Ok(self
            .lock()
            .files
            .values()
            .filter(|f| f.resource_type.is_community_scoped() && f.resource_id == Some(community_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn find_instructor(&self, instructor_id: i64) -> PortResult<Instructor> {
        Err(PortError::NotFound(format!("instructor {} not found", instructor_id)))
    }

    async fn find_past_exam(&self, exam_id: i64) -> PortResult<PastExam> {
        Err(PortError::NotFound(format!("past exam {} not found", exam_id)))
    }

    async fn find_class_note(&self, note_id: i64) -> PortResult<ClassNote> {
        Err(PortError::NotFound(format!("class note {} not found", note_id)))
    }
}

//=========================================================================================
// Application harness
//=========================================================================================

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub hub: HubHandle,
    pub shutdown: CancellationToken,
    signer: TokenSigner,
    pub storage: TempDir,
}

pub fn test_config(storage_root: &std::path::Path) -> Config {
    let root = storage_root.to_string_lossy().to_string();
    let max_upload = MAX_UPLOAD.to_string();
    let vars: HashMap<&str, String> = HashMap::from([
        ("DATABASE_URL", "postgres://unused".to_string()),
        ("JWT_SECRET", SECRET.to_string()),
        ("STORAGE_ROOT", root),
        ("PUBLIC_BASE_URL", "http://localhost:8080/uploads".to_string()),
        ("MAX_UPLOAD_BYTES", max_upload),
        ("HUB_LISTENER_CAPACITY", "64".to_string()),
        ("SHUTDOWN_TIMEOUT_SECS", "1".to_string()),
    ]);
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

impl TestApp {
    pub async fn spawn() -> Self {
        let storage = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(storage.path()));

        let store = Arc::new(MemoryStore::default());
        let blobs = Arc::new(LocalFileStore::new(
            config.storage_root.clone(),
            config.public_base_url.clone(),
        ));
        let repos = Repositories::from_store(store.clone(), blobs);

        let shutdown = CancellationToken::new();
        let (hub, _task) = Hub::spawn(HubConfig::default(), shutdown.child_token());
        MessageHandler::new(repos.messages.clone(), hub.clone())
            .spawn(config.hub_listener_capacity)
            .await;

        let state = Arc::new(AppState::new(config.clone(), repos, hub.clone(), shutdown.clone()));
        let router = build_router(state.clone()).unwrap();
        let signer = TokenSigner::new(config.jwt_algorithm, config.jwt_secret.as_bytes(), config.jwt_issuer.clone());

        Self {
            router,
            state,
            store,
            hub,
            shutdown,
            signer,
            storage,
        }
    }

    pub fn user(&self, email: &str) -> i64 {
        self.store.seed_user(email, Role::Student)
    }

    pub async fn community(&self, lead_id: i64, name: &str) -> i64 {
        self.store
            .create_community(NewCommunity {
                name: name.to_string(),
                abbreviation: name.chars().take(4).collect(),
                lead_id,
            })
            .await
            .unwrap()
            .id
    }

    pub async fn join(&self, community_id: i64, user_id: i64) {
        self.store.add_member(community_id, user_id).await.unwrap();
    }

    /// A valid access token for a seeded user.
    pub fn token(&self, user_id: i64) -> String {
        let user = self.store.user(user_id);
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            user_id,
            email: user.email,
            role_type: user.role.as_str().to_string(),
            iss: self.signer.issuer().to_string(),
            iat: now,
            nbf: now,
            exp: now + 600,
            sub: user_id.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        self.signer.sign(&claims).unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    pub async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn upload(&self, uri: &str, token: &str, fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> (StatusCode, Value) {
        let (content_type, body) = multipart_body(fields, file);
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }
}

const BOUNDARY: &str = "unisphere-test-boundary";

/// Encodes text fields and an optional `file` part as `multipart/form-data`.
pub fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content_type, data)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, file_name, content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    (format!("multipart/form-data; boundary={}", BOUNDARY), body)
}
