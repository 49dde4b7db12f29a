//! Artifact storage: keyed, expiring blobs addressed by unguessable ids.
//!
//! Every conversion publishes two artifacts (the preview image and the output
//! PDF). Artifacts are immutable: [`ArtifactStore::put`] always mints a fresh
//! id and never overwrites. They live for a fixed retention window, after
//! which [`ArtifactStore::get`] reports [`ServiceError::Expired`] until the
//! next sweep removes them; from then on the id is [`ServiceError::NotFound`].
//!
//! Two backends ship with the crate:
//!
//! * [`MemoryArtifactStore`] for tests and single-process deployments;
//! * [`FsArtifactStore`] when artifacts must survive a restart within their
//!   retention window.
//!
//! Handlers receive the store as an injected `Arc<dyn ArtifactStore>`.

mod fs;
mod memory;

pub use fs::FsArtifactStore;
pub use memory::MemoryArtifactStore;

use crate::error::ServiceError;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Random bytes per id. 256 bits makes enumeration hopeless.
const ID_BYTES: usize = 32;
/// Length of the base64url (no padding) encoding of [`ID_BYTES`].
const ID_LEN: usize = 43;

/// Opaque, unguessable artifact identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Mint a new id from the operating system's CSPRNG.
    pub fn mint() -> Self {
        let mut buf = [0u8; ID_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut buf);
        Self(URL_SAFE_NO_PAD.encode(buf))
    }

    /// Accept only strings that could have been produced by [`ArtifactId::mint`].
    ///
    /// Anything else (path separators, dots, wrong length) is rejected, which
    /// also keeps ids safe to use as file names.
    pub fn parse(s: &str) -> Option<Self> {
        let well_formed = s.len() == ID_LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        well_formed.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata of a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub mime_type: String,
    pub byte_size: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Suggested download name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl Artifact {
    fn new(
        bytes: &Bytes,
        mime_type: &str,
        filename: Option<String>,
        now: DateTime<Utc>,
        retention: chrono::Duration,
    ) -> Result<Self, ServiceError> {
        let expires_at = now.checked_add_signed(retention).ok_or_else(|| {
            ServiceError::InvalidConfig(format!(
                "retention of {}s puts expiry beyond the supported date range",
                retention.num_seconds()
            ))
        })?;
        Ok(Self {
            id: ArtifactId::mint(),
            mime_type: mime_type.to_string(),
            byte_size: bytes.len() as u64,
            created_at: now,
            expires_at,
            filename,
        })
    }

    /// Whether the retention window has fully elapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Seconds of retention left at `now`, zero once expired.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.expires_at - now).num_seconds().max(0) as u64
    }
}

/// Artifact metadata together with its bytes.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub meta: Artifact,
    pub bytes: Bytes,
}

/// Keyed storage for immutable, expiring binary artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` under a freshly minted id.
    async fn put(
        &self,
        bytes: Bytes,
        mime_type: &str,
        filename: Option<String>,
    ) -> Result<Artifact, ServiceError>;

    /// Fetch an artifact. `Expired` if its window elapsed but it was not swept yet.
    async fn get(&self, id: &ArtifactId) -> Result<StoredArtifact, ServiceError>;

    /// Remove an artifact. Returns whether anything was removed.
    async fn delete(&self, id: &ArtifactId) -> Result<bool, ServiceError>;

    /// Remove every artifact whose retention window has elapsed.
    ///
    /// Idempotent; safe to run while other tasks read.
    async fn sweep_expired(&self) -> Result<usize, ServiceError>;

    /// Number of artifacts currently held, expired-but-unswept included.
    async fn count(&self) -> Result<usize, ServiceError>;

    /// The time this store judges expiry against.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub(crate) fn chrono_retention(retention: Duration) -> chrono::Duration {
    chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX)
}

/// Run [`ArtifactStore::sweep_expired`] every `interval` until the task is aborted.
///
/// The first sweep happens one `interval` after spawning.
pub fn spawn_sweeper(store: Arc<dyn ArtifactStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match store.sweep_expired().await {
                Ok(0) => debug!("Sweep found no expired artifacts"),
                Ok(n) => info!(removed = n, "Swept expired artifacts"),
                Err(e) => warn!("Artifact sweep failed: {}", e),
            }
        }
    })
}
