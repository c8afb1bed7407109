//! services/api/src/web/state.rs
//!
//! Defines the application's shared state, created once at startup and
//! handed to every handler.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use unisphere_core::ports::{
    BlobStore, CatalogRepository, ChatMessageRepository, CommunityRepository, FileRepository,
    MembershipRepository, RefreshTokenRepository, UserRepository,
};
use unisphere_core::AuthorizationService;

use crate::config::Config;
use crate::identity::{IdentityService, TokenSigner};
use crate::realtime::{HubHandle, SessionConfig};
use crate::services::{ChatService, CommunityService, FileService, ProfileService};

/// Every port the services are built from.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub tokens: Arc<dyn RefreshTokenRepository>,
    pub communities: Arc<dyn CommunityRepository>,
    pub memberships: Arc<dyn MembershipRepository>,
    pub messages: Arc<dyn ChatMessageRepository>,
    pub files: Arc<dyn FileRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub blobs: Arc<dyn BlobStore>,
}

impl Repositories {
    /// Uses one backend for every repository port.
    pub fn from_store<S>(store: Arc<S>, blobs: Arc<dyn BlobStore>) -> Self
    where
        S: UserRepository
            + RefreshTokenRepository
            + CommunityRepository
            + MembershipRepository
            + ChatMessageRepository
            + FileRepository
            + CatalogRepository
            + 'static,
    {
        Self {
            users: store.clone(),
            tokens: store.clone(),
            communities: store.clone(),
            memberships: store.clone(),
            messages: store.clone(),
            files: store.clone(),
            catalog: store,
            blobs,
        }
    }
}

/// The shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub identity: Arc<IdentityService>,
    pub chat: ChatService,
    pub communities: CommunityService,
    pub profiles: ProfileService,
    pub hub: HubHandle,
    pub session: SessionConfig,
    /// Cancelled once graceful shutdown starts.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Arc<Config>, repos: Repositories, hub: HubHandle, shutdown: CancellationToken) -> Self {
        let signer = TokenSigner::new(
            config.jwt_algorithm,
            config.jwt_secret.as_bytes(),
            config.jwt_issuer.clone(),
        );
        let identity = Arc::new(IdentityService::new(
            repos.users.clone(),
            repos.tokens.clone(),
            signer,
            config.access_token_ttl,
            config.refresh_token_ttl,
        ));

        let files = FileService::new(repos.files.clone(), repos.blobs.clone(), config.max_upload_bytes);
        let authz = AuthorizationService::new(repos.memberships.clone(), repos.catalog.clone());
        let chat = ChatService::new(
            repos.communities.clone(),
            repos.messages.clone(),
            files.clone(),
            authz,
            hub.clone(),
        );
        let communities = CommunityService::new(
            repos.communities.clone(),
            repos.memberships.clone(),
            repos.messages.clone(),
            repos.files.clone(),
            files.clone(),
            hub.clone(),
        );
        let profiles = ProfileService::new(repos.users.clone(), files);

        Self {
            config,
            identity,
            chat,
            communities,
            profiles,
            hub,
            session: SessionConfig::default(),
            shutdown,
        }
    }
}
