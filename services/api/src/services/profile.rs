//! services/api/src/services/profile.rs

use std::sync::Arc;
use tracing::{info, warn};
use unisphere_core::domain::{FileRecord, FileTarget, ResourceType, Upload};
use unisphere_core::ports::{PortResult, UserRepository};

use crate::services::files::{FileService, UploadPolicy};

#[derive(Clone)]
pub struct ProfileService {
    users: Arc<dyn UserRepository>,
    files: FileService,
}

impl ProfileService {
    pub fn new(users: Arc<dyn UserRepository>, files: FileService) -> Self {
        Self { users, files }
    }

    /// Stores a new photo, points the user at it and removes the old one.
    pub async fn update_profile_photo(&self, user_id: i64, upload: Upload) -> PortResult<FileRecord> {
        let target = FileTarget {
            resource_type: ResourceType::ProfilePhoto,
            resource_id: user_id,
        };
        let photo = self
            .files
            .upload(upload, target, user_id, UploadPolicy::ProfilePhoto)
            .await?;

        let previous = match self.users.set_profile_photo(user_id, Some(photo.id)).await {
            Ok(previous) => previous,
            Err(e) => {
                if let Err(cleanup) = self.files.delete(photo.id).await {
                    warn!(file_id = photo.id, error = %cleanup, "new profile photo not removed");
                }
                return Err(e);
            }
        };

        if let Some(old) = previous.filter(|old| *old != photo.id) {
            if let Err(e) = self.files.delete(old).await {
                warn!(user_id, file_id = old, error = %e, "previous profile photo not removed");
            }
        }
        info!(user_id, file_id = photo.id, "profile photo updated");
        Ok(photo)
    }
}
