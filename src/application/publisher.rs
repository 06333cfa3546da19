//! Upload of a finished HLS tree to the object store.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::RetryPolicy;
use crate::domain::hls::{MASTER_PLAYLIST_NAME, THUMBNAIL_NAME};
use crate::error::PublishError;
use crate::ports::storage::{ObjectMeta, ObjectStore};

/// A local file and the key it is published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEntry {
    pub path: PathBuf,
    pub key: String,
}

/// Result of publishing one job's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifact {
    /// Key prefix shared by every object, equal to the job id.
    pub prefix: String,
    /// Uploaded keys, sorted.
    pub keys: Vec<String>,
    pub master_url: String,
    pub thumbnail_url: Option<String>,
}

/// Lazily walk `root` and pair every regular file with `<job_id>/<relative path>`.
///
/// Keys always use `/` separators regardless of platform.
pub fn artifact_entries(
    root: &Path,
    job_id: &str,
) -> impl Iterator<Item = Result<UploadEntry, PublishError>> {
    let root = root.to_path_buf();
    let job_id = job_id.to_string();

    WalkDir::new(root.clone())
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |entry| match entry {
            Ok(entry) if entry.file_type().is_file() => {
                Some(object_key(&root, &job_id, entry.path()).map(|key| UploadEntry {
                    path: entry.into_path(),
                    key,
                }))
            }
            Ok(_) => None,
            Err(err) => Some(Err(err.into())),
        })
}

/// Entries the blocking walker may run ahead of the uploads.
const WALK_BUFFER: usize = 64;

/// [`artifact_entries`] driven on the blocking pool, yielding entries as they are found.
///
/// Dropping the stream stops the walk at its next entry.
pub fn artifact_stream(
    root: &Path,
    job_id: &str,
) -> impl Stream<Item = Result<UploadEntry, PublishError>> {
    let (tx, rx) = mpsc::channel(WALK_BUFFER);
    let root = root.to_path_buf();
    let job_id = job_id.to_string();

    tokio::task::spawn_blocking(move || {
        for entry in artifact_entries(&root, &job_id) {
            if tx.blocking_send(entry).is_err() {
                break;
            }
        }
    });

    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|entry| (entry, rx))
    })
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

fn object_key(root: &Path, job_id: &str, path: &Path) -> Result<String, PublishError> {
    let outside = || PublishError::OutsideRoot {
        path: path.to_path_buf(),
    };
    let relative = path.strip_prefix(root).map_err(|_| outside())?;

    let mut key = String::from(job_id);
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                key.push('/');
                key.push_str(&part.to_string_lossy());
            }
            _ => return Err(outside()),
        }
    }
    Ok(key)
}

/// Uploads every file under an output root with bounded concurrency.
pub struct ArtifactPublisher<'a, S: ?Sized> {
    store: &'a S,
    concurrency: usize,
    retry: &'a RetryPolicy,
    require_thumbnail: bool,
}

impl<'a, S> ArtifactPublisher<'a, S>
where
    S: ObjectStore + ?Sized,
{
    pub fn new(store: &'a S, concurrency: usize, retry: &'a RetryPolicy) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
            retry,
            require_thumbnail: false,
        }
    }

    /// Refuse to publish a tree without a thumbnail.
    pub fn require_thumbnail(mut self) -> Self {
        self.require_thumbnail = true;
        self
    }

    /// Publish the tree rooted at `root` under `job_id/`.
    ///
    /// Local files are left in place. Re-publishing the same tree overwrites
    /// the same keys with the same bytes.
    pub async fn publish(&self, root: &Path, job_id: &str) -> Result<PublishedArtifact, PublishError> {
        if !is_file(&root.join(MASTER_PLAYLIST_NAME)).await {
            return Err(PublishError::MissingMaster);
        }
        if self.require_thumbnail && !is_file(&root.join(THUMBNAIL_NAME)).await {
            return Err(PublishError::MissingThumbnail);
        }

        let mut keys: Vec<String> = artifact_stream(root, job_id)
            .map(|entry| async move {
                match entry {
                    Ok(entry) => self.upload(entry).await,
                    Err(err) => Err(err),
                }
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;
        keys.sort();

        let master_key = format!("{}/{}", job_id, MASTER_PLAYLIST_NAME);
        let thumbnail_key = format!("{}/{}", job_id, THUMBNAIL_NAME);
        let thumbnail_url = keys
            .binary_search(&thumbnail_key)
            .ok()
            .map(|_| self.store.public_url(&thumbnail_key));

        info!(job_id, objects = keys.len(), "Published HLS tree");

        Ok(PublishedArtifact {
            prefix: job_id.to_string(),
            master_url: self.store.public_url(&master_key),
            thumbnail_url,
            keys,
        })
    }

    async fn upload(&self, entry: UploadEntry) -> Result<String, PublishError> {
        let body = tokio::fs::read(&entry.path)
            .await
            .map_err(|source| PublishError::Read {
                path: entry.path.clone(),
                source,
            })?;
        let body = Bytes::from(body);
        let meta = ObjectMeta::for_path(&entry.path);
        let max_attempts = self.retry.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.store.put_object(&entry.key, body.clone(), &meta).await {
                Ok(()) => {
                    debug!(key = %entry.key, attempt, "Uploaded object");
                    return Ok(entry.key);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt - 1);
                    warn!(key = %entry.key, attempt, ?delay, error = %err, "Upload failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(PublishError::Store {
                        key: entry.key,
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }
}
