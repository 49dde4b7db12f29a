//! Filesystem artifact store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <id>.bin    artifact bytes
//! <id>.json   Artifact metadata (serde_json)
//! ```
//!
//! The metadata file is the commit marker. `put` writes the bytes first and
//! the metadata second, each through a temp file renamed into place, so a
//! reader never observes a half-written file. The sweep removes metadata
//! first and bytes second: a `get` that races the sweep either reads both or
//! reports `NotFound`.
//!
//! Temp files carry the [`TEMP_PREFIX`] prefix. Any left behind by a crash
//! are removed by the sweep once they are older than the retention window.

use super::{chrono_retention, Artifact, ArtifactId, ArtifactStore, StoredArtifact};
use crate::clock::{Clock, SystemClock};
use crate::error::ServiceError;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};

const DATA_EXT: &str = "bin";
const META_EXT: &str = "json";
/// Prefix of in-flight temp files; never a valid artifact id.
const TEMP_PREFIX: &str = ".ezread-";

/// [`ArtifactStore`] persisting artifacts as files under a root directory.
#[derive(Clone)]
pub struct FsArtifactStore {
    inner: Arc<FsInner>,
}

struct FsInner {
    root: PathBuf,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl FsArtifactStore {
    /// Open (creating if needed) a store rooted at `root`, using wall-clock time.
    pub fn open(root: impl Into<PathBuf>, retention: Duration) -> Result<Self, ServiceError> {
        Self::open_with_clock(root, retention, Arc::new(SystemClock))
    }

    /// Open a store reading time from `clock`.
    pub fn open_with_clock(
        root: impl Into<PathBuf>,
        retention: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            ServiceError::Storage(format!("Cannot create store at '{}': {e}", root.display()))
        })?;
        Ok(Self {
            inner: Arc::new(FsInner {
                root,
                retention,
                clock,
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&FsInner) -> Result<T, ServiceError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| ServiceError::Internal(format!("Storage task panicked: {e}")))?
    }
}

impl FsInner {
    fn path(&self, id: &ArtifactId, ext: &str) -> PathBuf {
        self.root.join(format!("{}.{}", id.as_str(), ext))
    }

    /// Write `data` to `dest` atomically; fails if `dest` exists.
    fn write_new(&self, dest: &Path, data: &[u8]) -> Result<(), std::io::Error> {
        let mut tmp: NamedTempFile = Builder::new().prefix(TEMP_PREFIX).tempfile_in(&self.root)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(dest).map_err(|e| e.error)?;
        Ok(())
    }

    fn put(
        &self,
        bytes: &Bytes,
        mime_type: &str,
        filename: Option<String>,
    ) -> Result<Artifact, ServiceError> {
        let now = self.clock.now();
        let retention = chrono_retention(self.retention);
        loop {
            let meta = Artifact::new(bytes, mime_type, filename.clone(), now, retention)?;
            match self.write_new(&self.path(&meta.id, DATA_EXT), bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }

            let json = serde_json::to_vec(&meta)
                .map_err(|e| ServiceError::Internal(format!("Metadata encoding failed: {e}")))?;
            if let Err(e) = self.write_new(&self.path(&meta.id, META_EXT), &json) {
                let data = self.path(&meta.id, DATA_EXT);
                if let Err(cleanup) = std::fs::remove_file(&data) {
                    warn!(
                        "Failed to remove '{}' after a failed metadata write: {}",
                        data.display(),
                        cleanup
                    );
                }
                return Err(e.into());
            }

            debug!(id = %meta.id, size = meta.byte_size, "Stored artifact on disk");
            return Ok(meta);
        }
    }

    fn read_meta(&self, id: &ArtifactId) -> Result<Option<Artifact>, ServiceError> {
        match std::fs::read(self.path(id, META_EXT)) {
            Ok(raw) => serde_json::from_slice(&raw).map(Some).map_err(|e| {
                ServiceError::Storage(format!("Corrupt metadata for '{id}': {e}"))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, id: &ArtifactId) -> Result<StoredArtifact, ServiceError> {
        let not_found = || ServiceError::NotFound { id: id.to_string() };

        let meta = self.read_meta(id)?.ok_or_else(not_found)?;
        if meta.is_expired_at(self.clock.now()) {
            return Err(ServiceError::Expired { id: id.to_string() });
        }

        let bytes = match std::fs::read(self.path(id, DATA_EXT)) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        if bytes.len() as u64 != meta.byte_size {
            return Err(ServiceError::Storage(format!(
                "Artifact '{id}' has {} bytes on disk, metadata says {}",
                bytes.len(),
                meta.byte_size
            )));
        }

        Ok(StoredArtifact {
            meta,
            bytes: Bytes::from(bytes),
        })
    }

    fn delete(&self, id: &ArtifactId) -> Result<bool, ServiceError> {
        let had_meta = remove_if_exists(&self.path(id, META_EXT))?;
        let had_data = remove_if_exists(&self.path(id, DATA_EXT))?;
        Ok(had_meta || had_data)
    }

    fn sweep(&self) -> Result<usize, ServiceError> {
        let now = self.clock.now();
        let mut removed = 0;

        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if is_temp_file(&path) {
                if self.orphan_is_stale(&path) && remove_if_exists(&path)? {
                    debug!("Removed stale temp file '{}'", path.display());
                }
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(ArtifactId::parse)
            else {
                continue;
            };

            match path.extension().and_then(|e| e.to_str()) {
                Some(META_EXT) => match self.read_meta(&id) {
                    Ok(Some(meta)) if meta.is_expired_at(now) => {
                        if self.delete(&id)? {
                            removed += 1;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Removing unreadable artifact '{}': {}", id, e);
                        self.delete(&id)?;
                    }
                },
                // Bytes whose metadata never got written: a put interrupted by a crash.
                Some(DATA_EXT) if !self.path(&id, META_EXT).exists() => {
                    if self.orphan_is_stale(&path) {
                        remove_if_exists(&path)?;
                    }
                }
                _ => {}
            }
        }

        Ok(removed)
    }

    fn orphan_is_stale(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| SystemTime::now().duration_since(t).ok())
            .is_some_and(|age| age >= self.retention)
    }

    fn count(&self) -> Result<usize, ServiceError> {
        let mut n = 0;
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(META_EXT) {
                n += 1;
            }
        }
        Ok(n)
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TEMP_PREFIX))
}

fn remove_if_exists(path: &Path) -> Result<bool, ServiceError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        bytes: Bytes,
        mime_type: &str,
        filename: Option<String>,
    ) -> Result<Artifact, ServiceError> {
        let mime_type = mime_type.to_string();
        self.blocking(move |fs| fs.put(&bytes, &mime_type, filename))
            .await
    }

    async fn get(&self, id: &ArtifactId) -> Result<StoredArtifact, ServiceError> {
        let id = id.clone();
        self.blocking(move |fs| fs.get(&id)).await
    }

    async fn delete(&self, id: &ArtifactId) -> Result<bool, ServiceError> {
        let id = id.clone();
        self.blocking(move |fs| fs.delete(&id)).await
    }

    async fn sweep_expired(&self) -> Result<usize, ServiceError> {
        self.blocking(|fs| fs.sweep()).await
    }

    async fn count(&self) -> Result<usize, ServiceError> {
        self.blocking(|fs| fs.count()).await
    }
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.inner.clock.now()
    }
}
