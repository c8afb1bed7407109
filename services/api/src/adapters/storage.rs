//! services/api/src/adapters/storage.rs
//!
//! This module contains the local-disk implementation of the `BlobStore` port.
//! Blobs live under a per-deployment root and are named by a fresh random id;
//! the client's filename never reaches the disk.

use async_trait::async_trait;
use futures::StreamExt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use unisphere_core::domain::{ByteStream, StoredBlob};
use unisphere_core::ports::{BlobStore, PortError, PortResult};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        let public_base_url = public_base_url.into().trim_end_matches('/').to_string();
        Self {
            root: root.into(),
            public_base_url,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Joins a storage-relative path onto the root, refusing anything that could escape it.
    fn resolve(&self, relative: &str) -> PortResult<PathBuf> {
        let relative = Path::new(relative);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !plain || relative.as_os_str().is_empty() {
            return Err(PortError::BadRequest(format!(
                "invalid storage path '{}'",
                relative.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(e: std::io::Error) -> PortError {
    PortError::Unexpected(format!("storage I/O failed: {}", e))
}

//=========================================================================================
// `BlobStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl BlobStore for LocalFileStore {
    async fn put(
        &self,
        sub_path: &str,
        extension: Option<&str>,
        mut body: ByteStream,
        max_bytes: u64,
    ) -> PortResult<StoredBlob> {
        let id = Uuid::new_v4().simple().to_string();
        let file_name = match extension {
            Some(ext) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
                format!("{}.{}", id, ext)
            }
            Some(ext) => {
                return Err(PortError::BadRequest(format!("invalid file extension '{}'", ext)));
            }
            None => id,
        };
        let relative = format!("{}/{}", sub_path.trim_matches('/'), file_name);
        let path = self.resolve(&relative)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let mut file = fs::File::create(&path).await.map_err(io_error)?;

        let mut written: u64 = 0;
        let copied = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                written += chunk.len() as u64;
                if written > max_bytes {
                    return Err(PortError::PayloadTooLarge(format!(
                        "file exceeds the {} byte limit",
                        max_bytes
                    )));
                }
                file.write_all(&chunk).await.map_err(io_error)?;
            }
            file.flush().await.map_err(io_error)
        }
        .await;

        if let Err(e) = copied {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %cleanup, "partial upload not removed");
            }
            return Err(e);
        }

        debug!(path = %relative, size = written, "blob written");
        Ok(StoredBlob {
            url: format!("{}/{}", self.public_base_url, relative),
            relative_path: relative,
            size: written,
        })
    }

    async fn remove(&self, relative_path: &str) -> PortResult<()> {
        let path = self.resolve(relative_path)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %relative_path, "blob already missing");
                Ok(())
            }
            Err(e) => Err(io_error(e)),
        }
    }
}
