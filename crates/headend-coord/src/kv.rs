// Shared key-value store contract plus the in-process implementation.
//
// The remote implementation lives in `resp`; both are exercised through the
// same trait so locks and notifications never care which one they run on.
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, broadcast};

pub type KvResult<T> = std::result::Result<T, KvError>;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("key-value store unavailable")]
    Unavailable,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Minimal key-value surface the coordination layer needs.
///
/// `set_nx` is the lock primitive: set only if absent, with an expiry, and
/// report whether the record was newly created. `compare_delete` removes a
/// key only while it still holds the expected marker, so a lock that expired
/// and was re-acquired elsewhere is never clobbered by a stale holder.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set_nx(&self, key: &str, value: Bytes, ttl: Duration) -> KvResult<bool>;
    async fn get(&self, key: &str) -> KvResult<Option<Bytes>>;
    async fn delete(&self, key: &str) -> KvResult<bool>;
    async fn compare_delete(&self, key: &str, expected: &[u8]) -> KvResult<bool>;
    /// Publishes to a named channel, returning the number of receivers.
    async fn publish(&self, channel: &str, payload: Bytes) -> KvResult<u64>;
    async fn ping(&self) -> KvResult<()>;
}

#[derive(Debug)]
struct KvEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process key-value store with lazy TTL expiry.
///
/// Single-process only: locks held here coordinate tasks, not other
/// processes. Used by tests and as the degraded fallback when the shared
/// store is unreachable at startup.
///
/// ```
/// use bytes::Bytes;
/// use headend_coord::kv::{KvStore, MemoryKv};
/// use std::time::Duration;
///
/// let kv = MemoryKv::new();
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     let first = kv
///         .set_nx("k", Bytes::from_static(b"v"), Duration::from_secs(60))
///         .await
///         .expect("set");
///     assert!(first);
/// });
/// ```
#[derive(Debug, Default)]
pub struct MemoryKv {
    // Write lock on every access so reads can evict expired entries.
    entries: RwLock<HashMap<String, KvEntry>>,
    channels: RwLock<HashMap<String, broadcast::Sender<Bytes>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a named channel. Messages published before the
    /// subscription are not replayed.
    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<Bytes> {
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set_nx(&self, key: &str, value: Bytes, ttl: Duration) -> KvResult<bool> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key)
            && !entry.is_expired()
        {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            KvEntry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> KvResult<Option<Bytes>> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.is_expired() {
                // Lazy expiry on read, no background sweeper.
                entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn compare_delete(&self, key: &str, expected: &[u8]) -> KvResult<bool> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if !entry.is_expired() && entry.value.as_ref() == expected => {
                entries.remove(key);
                Ok(true)
            }
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> KvResult<u64> {
        let channels = self.channels.read().await;
        match channels.get(channel) {
            // send() only fails when no receiver exists; treat that as zero
            // listeners rather than an error.
            Some(sender) => Ok(sender.send(payload).map(|n| n as u64).unwrap_or(0)),
            None => Ok(0),
        }
    }

    async fn ping(&self) -> KvResult<()> {
        Ok(())
    }
}
