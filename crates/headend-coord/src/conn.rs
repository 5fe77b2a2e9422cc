// Connection management for the shared key-value store.
//
// # Purpose
// Owns the two process-wide store handles: a command connection with bounded
// socket timeouts, and a pub/sub connection with no read timeout because it
// parks waiting for pushes. Both are dialed lazily on first use, validated
// with a PING round trip, and cached for the life of the process.
//
// # Notes
// Establishment retries with exponential backoff; exhaustion yields `None`
// (the degraded-mode signal), never a panic. Once a handle is cached it is
// not re-dialed — later IO errors surface to callers as `KvError`.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::kv::{KvResult, KvStore};
use crate::resp::{RemoteKv, RespConnection};

#[derive(Debug, Clone)]
pub struct CoordConfig {
    pub host: String,
    pub port: u16,
    pub db: u32,
    pub socket_timeout: Duration,
    pub connect_timeout: Duration,
    pub health_check_interval: Duration,
    pub max_retries: u32,
    pub retry_interval: Duration,
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            socket_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(30),
            max_retries: 5,
            retry_interval: Duration::from_secs(1),
        }
    }
}

impl CoordConfig {
    /// Resolves configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HEADEND_KV_HOST").unwrap_or(defaults.host),
            port: env_parse("HEADEND_KV_PORT", defaults.port),
            db: env_parse("HEADEND_KV_DB", defaults.db),
            socket_timeout: Duration::from_millis(env_parse(
                "HEADEND_KV_TIMEOUT_MS",
                defaults.socket_timeout.as_millis() as u64,
            )),
            connect_timeout: Duration::from_millis(env_parse(
                "HEADEND_KV_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout.as_millis() as u64,
            )),
            health_check_interval: Duration::from_secs(env_parse(
                "HEADEND_KV_HEALTH_CHECK_SECS",
                defaults.health_check_interval.as_secs(),
            )),
            max_retries: env_parse("HEADEND_KV_MAX_RETRIES", defaults.max_retries),
            retry_interval: Duration::from_millis(env_parse(
                "HEADEND_KV_RETRY_INTERVAL_MS",
                defaults.retry_interval.as_millis() as u64,
            )),
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Owns the cached command and pub/sub handles.
///
/// Explicitly constructed and injected — there is no global instance. The
/// mutex around each slot makes concurrent first use converge on a single
/// handle; a failed establishment leaves the slot empty so the next caller
/// retries from scratch.
pub struct ConnectionManager {
    config: CoordConfig,
    command: Mutex<Option<Arc<RemoteKv>>>,
    pubsub: Mutex<Option<Arc<RemoteKv>>>,
}

impl ConnectionManager {
    pub fn new(config: CoordConfig) -> Self {
        Self {
            config,
            command: Mutex::new(None),
            pubsub: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CoordConfig {
        &self.config
    }

    /// Returns the shared command handle, dialing it on first use.
    /// `None` means the store is unavailable after all retries.
    pub async fn command(&self) -> Option<Arc<RemoteKv>> {
        let mut slot = self.command.lock().await;
        if let Some(handle) = slot.as_ref() {
            return Some(handle.clone());
        }
        let handle = Arc::new(
            self.establish(Some(self.config.socket_timeout), "command")
                .await?,
        );
        *slot = Some(handle.clone());
        Some(handle)
    }

    /// Returns the shared pub/sub handle. Configured without a read timeout:
    /// it blocks indefinitely waiting for pushed messages.
    pub async fn pubsub(&self) -> Option<Arc<RemoteKv>> {
        let mut slot = self.pubsub.lock().await;
        if let Some(handle) = slot.as_ref() {
            return Some(handle.clone());
        }
        let handle = Arc::new(self.establish(None, "pubsub").await?);
        *slot = Some(handle.clone());
        Some(handle)
    }

    async fn establish(&self, read_timeout: Option<Duration>, kind: &str) -> Option<RemoteKv> {
        let addr = self.config.addr();
        for attempt in 1..=self.config.max_retries.max(1) {
            match self.try_connect(read_timeout).await {
                Ok(handle) => {
                    tracing::info!(%addr, db = self.config.db, kind, "connected to key-value store");
                    return Some(handle);
                }
                Err(err) if attempt >= self.config.max_retries.max(1) => {
                    tracing::error!(
                        %addr,
                        kind,
                        attempts = attempt,
                        error = %err,
                        "giving up on key-value store connection"
                    );
                    return None;
                }
                Err(err) => {
                    let wait = self.config.retry_interval * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        %addr,
                        kind,
                        attempt,
                        error = %err,
                        "key-value store connection failed, retrying in {wait:?}"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
        None
    }

    async fn try_connect(&self, read_timeout: Option<Duration>) -> KvResult<RemoteKv> {
        let conn = RespConnection::connect(
            &self.config.addr(),
            self.config.connect_timeout,
            read_timeout,
        )
        .await?;
        let handle = RemoteKv::new(conn, self.config.health_check_interval);
        // Validate the link with a round trip before caching it.
        handle.ping().await?;
        if self.config.db != 0 {
            handle.select(self.config.db).await?;
        }
        Ok(handle)
    }
}
