//! Application services composed from the core ports.

pub mod chat;
pub mod community;
pub mod files;
pub mod profile;

pub use chat::ChatService;
pub use community::{CommunityDetail, CommunityService, CommunitySummary};
pub use files::{FileService, UploadPolicy};
pub use profile::ProfileService;
