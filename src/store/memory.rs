//! In-memory artifact store.
//!
//! Entries are spread over a fixed number of shards, each behind its own
//! `RwLock`. `put` and `get` touch one shard; the sweep write-locks a shard
//! only for the instant it takes to remove one expired entry. Bytes are held
//! as `Bytes`, so a reader racing a sweep keeps a valid handle to the data it
//! already cloned.

use super::{chrono_retention, Artifact, ArtifactId, ArtifactStore, StoredArtifact};
use crate::clock::{Clock, SystemClock};
use crate::error::ServiceError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const SHARDS: usize = 16;

type Shard = RwLock<HashMap<ArtifactId, StoredArtifact>>;

/// Sharded in-memory [`ArtifactStore`].
pub struct MemoryArtifactStore {
    shards: Vec<Shard>,
    retention: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryArtifactStore {
    /// A store using wall-clock time.
    pub fn new(retention: Duration) -> Self {
        Self::with_clock(retention, Arc::new(SystemClock))
    }

    /// A store reading time from `clock`.
    pub fn with_clock(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            retention: chrono_retention(retention),
            clock,
        }
    }

    fn shard(&self, id: &ArtifactId) -> &Shard {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        bytes: Bytes,
        mime_type: &str,
        filename: Option<String>,
    ) -> Result<Artifact, ServiceError> {
        let now = self.clock.now();
        loop {
            let meta = Artifact::new(&bytes, mime_type, filename.clone(), now, self.retention)?;
            let mut shard = self.shard(&meta.id).write();
            // A collision of 256-bit ids does not happen, but put must never overwrite.
            if let Entry::Vacant(slot) = shard.entry(meta.id.clone()) {
                slot.insert(StoredArtifact {
                    meta: meta.clone(),
                    bytes: bytes.clone(),
                });
                debug!(id = %meta.id, size = meta.byte_size, "Stored artifact");
                return Ok(meta);
            }
        }
    }

    async fn get(&self, id: &ArtifactId) -> Result<StoredArtifact, ServiceError> {
        let found = self.shard(id).read().get(id).cloned();
        match found {
            Some(stored) if stored.meta.is_expired_at(self.clock.now()) => {
                Err(ServiceError::Expired { id: id.to_string() })
            }
            Some(stored) => Ok(stored),
            None => Err(ServiceError::NotFound { id: id.to_string() }),
        }
    }

    async fn delete(&self, id: &ArtifactId) -> Result<bool, ServiceError> {
        Ok(self.shard(id).write().remove(id).is_some())
    }

    async fn sweep_expired(&self) -> Result<usize, ServiceError> {
        let now = self.clock.now();
        let mut removed = 0;

        for shard in &self.shards {
            let expired: Vec<ArtifactId> = shard
                .read()
                .values()
                .filter(|s| s.meta.is_expired_at(now))
                .map(|s| s.meta.id.clone())
                .collect();

            for id in expired {
                let mut guard = shard.write();
                if guard.get(&id).is_some_and(|s| s.meta.is_expired_at(now)) {
                    guard.remove(&id);
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }

    async fn count(&self) -> Result<usize, ServiceError> {
        Ok(self.shards.iter().map(|s| s.read().len()).sum())
    }
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_with_clock(retention_secs: u64) -> (MemoryArtifactStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryArtifactStore::with_clock(
            Duration::from_secs(retention_secs),
            clock.clone() as Arc<dyn Clock>,
        );
        (store, clock)
    }

    #[tokio::test]
    async fn get_after_put_returns_same_bytes() {
        let (store, _clock) = store_with_clock(60);
        let meta = store
            .put(Bytes::from_static(b"%PDF-1.7 body"), "application/pdf", Some("a.pdf".into()))
            .await
            .unwrap();

        let got = store.get(&meta.id).await.unwrap();
        assert_eq!(&got.bytes[..], b"%PDF-1.7 body");
        assert_eq!(got.meta, meta);
        assert_eq!(got.meta.byte_size, 13);
    }

    #[tokio::test]
    async fn puts_of_identical_bytes_get_distinct_ids() {
        let (store, _clock) = store_with_clock(60);
        let a = store.put(Bytes::from_static(b"x"), "image/png", None).await.unwrap();
        let b = store.put(Bytes::from_static(b"x"), "image/png", None).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn expired_then_swept_then_not_found() {
        let (store, clock) = store_with_clock(60);
        let meta = store.put(Bytes::from_static(b"png"), "image/png", None).await.unwrap();

        clock.advance(Duration::from_secs(59));
        assert!(store.get(&meta.id).await.is_ok());
        assert_eq!(store.sweep_expired().await.unwrap(), 0);

        clock.advance(Duration::from_secs(1));
        assert!(matches!(
            store.get(&meta.id).await,
            Err(ServiceError::Expired { .. })
        ));

        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert_eq!(store.sweep_expired().await.unwrap(), 0);
        assert!(matches!(
            store.get(&meta.id).await,
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn sweep_keeps_fresh_entries() {
        let (store, clock) = store_with_clock(60);
        let old = store.put(Bytes::from_static(b"old"), "image/png", None).await.unwrap();
        clock.advance(Duration::from_secs(30));
        let fresh = store.put(Bytes::from_static(b"new"), "image/png", None).await.unwrap();
        clock.advance(Duration::from_secs(30));

        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert!(store.get(&fresh.id).await.is_ok());
        assert!(store.get(&old.id).await.is_err());
    }

    #[tokio::test]
    async fn huge_retention_fails_put_instead_of_panicking() {
        let store = MemoryArtifactStore::new(Duration::from_secs(u64::MAX / 4));
        let err = store
            .put(Bytes::from_static(b"x"), "image/png", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidConfig(_)));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (store, _clock) = store_with_clock(60);
        let meta = store.put(Bytes::from_static(b"x"), "image/png", None).await.unwrap();
        assert!(store.delete(&meta.id).await.unwrap());
        assert!(!store.delete(&meta.id).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
