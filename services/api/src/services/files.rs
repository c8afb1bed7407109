//! services/api/src/services/files.rs
//!
//! Uploads and deletes files: the blob on disk and its `files` row are kept
//! in step. A blob is written before its row; if the row cannot be inserted
//! the blob is removed again.

use std::sync::Arc;
use tracing::{debug, info, warn};
use unisphere_core::domain::{FileRecord, FileTarget, NewFile, Upload};
use unisphere_core::ports::{BlobStore, FileRepository, PortError, PortResult};

/// MIME types accepted as chat attachments besides `image/*`.
const CHAT_ATTACHMENT_TYPES: &[&str] = &[
    "application/pdf",
    "text/plain",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

/// Which MIME types an upload may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPolicy {
    ChatAttachment,
    ProfilePhoto,
}

impl UploadPolicy {
    pub fn allows(&self, content_type: &str) -> bool {
        // Parameters such as `; charset=utf-8` do not change the type.
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence.starts_with("image/") {
            return true;
        }
        match self {
            UploadPolicy::ChatAttachment => CHAT_ATTACHMENT_TYPES.contains(&essence.as_str()),
            UploadPolicy::ProfilePhoto => false,
        }
    }
}

#[derive(Clone)]
pub struct FileService {
    files: Arc<dyn FileRepository>,
    blobs: Arc<dyn BlobStore>,
    max_upload_bytes: u64,
}

impl FileService {
    pub fn new(files: Arc<dyn FileRepository>, blobs: Arc<dyn BlobStore>, max_upload_bytes: u64) -> Self {
        Self {
            files,
            blobs,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Stores the upload under the target's sub-path and records it.
    pub async fn upload(
        &self,
        upload: Upload,
        target: FileTarget,
        uploader_id: i64,
        policy: UploadPolicy,
    ) -> PortResult<FileRecord> {
        if upload.file_name.trim().is_empty() {
            return Err(PortError::BadRequest("file name is required".to_string()));
        }
        if !policy.allows(&upload.content_type) {
            return Err(PortError::BadRequest(format!(
                "file type '{}' is not allowed",
                upload.content_type
            )));
        }
        if let Some(declared) = upload.declared_size {
            if declared > self.max_upload_bytes {
                return Err(PortError::PayloadTooLarge(format!(
                    "file exceeds the {} byte limit",
                    self.max_upload_bytes
                )));
            }
        }

        let extension = upload.extension();
        let blob = self
            .blobs
            .put(&target.sub_path(), extension.as_deref(), upload.body, self.max_upload_bytes)
            .await?;

        let record = NewFile {
            name: upload.file_name,
            file_path: blob.relative_path.clone(),
            file_url: blob.url.clone(),
            size_bytes: i64::try_from(blob.size).unwrap_or(i64::MAX),
            mime_type: upload.content_type,
            resource_type: target.resource_type,
            resource_id: Some(target.resource_id),
            uploader_id,
        };
        match self.files.insert_file(record).await {
            Ok(file) => {
                info!(file_id = file.id, size = file.size_bytes, path = %file.file_path, "file stored");
                Ok(file)
            }
            Err(e) => {
                warn!(path = %blob.relative_path, error = %e, "file row insert failed, removing blob");
                if let Err(cleanup) = self.blobs.remove(&blob.relative_path).await {
                    warn!(path = %blob.relative_path, error = %cleanup, "orphaned blob left behind");
                }
                Err(e)
            }
        }
    }

    /// Removes the row, then the blob. A missing blob is only logged.
    pub async fn delete(&self, file_id: i64) -> PortResult<Option<FileRecord>> {
        let Some(file) = self.files.delete_file(file_id).await? else {
            debug!(file_id, "file already deleted");
            return Ok(None);
        };
        self.remove_blob(&file).await;
        Ok(Some(file))
    }

    /// Deletes every file in `files`, logging failures and continuing.
    pub async fn delete_all_best_effort(&self, files: &[FileRecord]) -> usize {
        let mut removed = 0;
        for file in files {
            match self.delete(file.id).await {
                Ok(_) => removed += 1,
                Err(e) => warn!(file_id = file.id, error = %e, "file cleanup failed"),
            }
        }
        removed
    }

    async fn remove_blob(&self, file: &FileRecord) {
        if let Err(e) = self.blobs.remove(&file.file_path).await {
            warn!(file_id = file.id, path = %file.file_path, error = %e, "blob removal failed");
        }
    }
}
