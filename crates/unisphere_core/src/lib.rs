pub mod domain;
pub mod policy;
pub mod ports;

pub use domain::{
    ChatMessage, ChatMessageDetail, Community, FileRecord, FileTarget, Membership, MessageFilter,
    MessageType, NewChatMessage, NewCommunity, NewFile, NewUser, RefreshToken, ResourceType, Role,
    StoredBlob, Upload, User, UserSummary,
};
pub use policy::AuthorizationService;
pub use ports::{
    BlobStore, CatalogRepository, ChatMessageRepository, CommunityRepository, FileRepository,
    MembershipRepository, PortError, PortResult, RefreshTokenRepository, UserRepository,
};
