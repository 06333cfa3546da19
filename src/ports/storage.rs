use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/MP2T";
pub const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";

const NO_CACHE: &str = "no-cache";
const IMMUTABLE: &str = "public, max-age=31536000, immutable";

/// Headers attached to every object written by the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub content_type: &'static str,
    pub cache_control: Option<&'static str>,
}

impl ObjectMeta {
    /// Playlists must always be refetched; segments and thumbnails never change under a job id.
    pub fn for_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("m3u8") => Self {
                content_type: PLAYLIST_CONTENT_TYPE,
                cache_control: Some(NO_CACHE),
            },
            Some("ts") => Self {
                content_type: SEGMENT_CONTENT_TYPE,
                cache_control: Some(IMMUTABLE),
            },
            Some("jpg") | Some("jpeg") => Self {
                content_type: THUMBNAIL_CONTENT_TYPE,
                cache_control: Some(IMMUTABLE),
            },
            _ => Self {
                content_type: "application/octet-stream",
                cache_control: None,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Network failures, throttling and 5xx responses.
    #[error("transient store error: {0}")]
    Transient(String),
    #[error("store rejected request: {0}")]
    Rejected(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transient(_) => true,
            StoreError::Rejected(_) => false,
            StoreError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `body` under `key`, replacing any existing object.
    async fn put_object(&self, key: &str, body: Bytes, meta: &ObjectMeta)
        -> Result<(), StoreError>;

    /// Public URL a player would use to fetch `key`.
    fn public_url(&self, key: &str) -> String;
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        meta: &ObjectMeta,
    ) -> Result<(), StoreError> {
        (**self).put_object(key, body, meta).await
    }

    fn public_url(&self, key: &str) -> String {
        (**self).public_url(key)
    }
}
