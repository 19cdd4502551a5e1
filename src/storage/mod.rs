//! Local object storage for uploaded files.
//!
//! Objects are addressed by a relative key such as `avatars/<user>-<uuid>.png`
//! and live under a single root directory that is also served at `/uploads`.

use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

/// Image types accepted for uploads, with the extension used on disk
const ALLOWED_IMAGE_TYPES: [(&str, &str); 4] = [
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
    ("image/gif", "gif"),
];

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("File exceeds maximum allowed size of {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Unsupported content type: {0}")]
    UnsupportedType(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    max_bytes: usize,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Store an image under `<prefix>/<name>-<uuid>.<ext>` and return its key.
    ///
    /// The content type falls back to a guess from `file_name` when the client
    /// did not send one.
    pub async fn put_image(
        &self,
        prefix: &str,
        name: &str,
        content_type: Option<&str>,
        file_name: Option<&str>,
        data: Bytes,
    ) -> Result<String, StorageError> {
        if data.len() > self.max_bytes {
            return Err(StorageError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let content_type = resolve_content_type(content_type, file_name);
        let extension = image_extension(&content_type)
            .ok_or_else(|| StorageError::UnsupportedType(content_type.clone()))?;

        let key = format!("{}/{}-{}.{}", prefix, name, uuid::Uuid::new_v4().simple(), extension);
        let path = self.path_for(&key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &data).await?;

        info!(key = %key, size = data.len(), "Stored upload");
        Ok(key)
    }

    /// Remove an object. Missing objects are not an error.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = %key, "Deleted upload");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.path_for(key) {
            Ok(path) => fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Map a key to a path under the root, rejecting anything that could escape it
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let is_plain = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !is_plain {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn resolve_content_type(content_type: Option<&str>, file_name: Option<&str>) -> String {
    match content_type {
        Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.to_lowercase(),
        _ => file_name
            .and_then(|name| mime_guess::from_path(name).first_raw())
            .unwrap_or("application/octet-stream")
            .to_string(),
    }
}

fn image_extension(content_type: &str) -> Option<&'static str> {
    ALLOWED_IMAGE_TYPES
        .iter()
        .find(|(ct, _)| *ct == content_type)
        .map(|(_, ext)| *ext)
}
