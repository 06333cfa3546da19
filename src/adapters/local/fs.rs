use crate::ports::storage::{ObjectMeta, ObjectStore, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};

/// Stores objects as plain files under `root`, for single-host deployments
/// where a web server exposes the directory.
#[derive(Clone, Debug)]
pub struct FsAdapter {
    root: PathBuf,
    public_base: Option<String>,
}

impl FsAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base: None,
        }
    }

    pub fn with_public_base(mut self, base: impl Into<String>) -> Self {
        self.public_base = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(StoreError::Rejected(format!("invalid key {:?}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsAdapter {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        _meta: &ObjectMeta,
    ) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &body).await?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        match &self.public_base {
            Some(base) => format!("{}/{}", base, key),
            None => format!("file://{}", self.root.join(key).display()),
        }
    }
}
