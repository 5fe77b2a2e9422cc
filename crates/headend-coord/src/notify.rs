// Best-effort update notifications.
//
// State changes are announced on the `updates` channel of the shared store.
// The core's correctness never depends on a notification landing: senders
// enqueue onto an in-process channel and move on, a forwarder task drains
// the queue, and publish failures are logged and swallowed.
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::kv::KvStore;

/// Channel name notifications are published on.
pub const UPDATES_CHANNEL: &str = "updates";

/// One notification payload: `{"success": .., "type": .., ...data}`.
#[derive(Debug, Clone, Serialize)]
pub struct Update {
    pub kind: String,
    pub success: bool,
    pub data: Value,
}

impl Update {
    pub fn ok(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            success: true,
            data,
        }
    }

    pub fn failed(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            success: false,
            data,
        }
    }

    fn payload(&self) -> Value {
        let mut payload = json!({
            "success": self.success,
            "type": self.kind,
        });
        if let (Some(target), Some(extra)) = (payload.as_object_mut(), self.data.as_object()) {
            for (key, value) in extra {
                target.insert(key.clone(), value.clone());
            }
        }
        payload
    }
}

/// Cheap clonable sender half of the notification boundary.
#[derive(Clone)]
pub struct NotifyHandle {
    tx: Option<mpsc::UnboundedSender<Update>>,
}

impl NotifyHandle {
    /// Handle that drops every update. Used when the store is unreachable
    /// and in tests that do not care about notifications.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Enqueues an update. Never blocks and never fails the caller.
    pub fn send(&self, update: Update) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(update).is_err() {
            tracing::debug!("notification forwarder stopped, dropping update");
        }
    }
}

/// Spawns the forwarder task that publishes queued updates.
pub struct Notifier;

impl Notifier {
    pub fn spawn(kv: Arc<dyn KvStore>) -> NotifyHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<Update>();
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let payload = match serde_json::to_vec(&update.payload()) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to encode update");
                        continue;
                    }
                };
                match kv.publish(UPDATES_CHANNEL, Bytes::from(payload)).await {
                    Ok(_) => {
                        metrics::counter!("headend_updates_published_total").increment(1);
                    }
                    Err(err) => {
                        // Best effort only: log and keep draining.
                        tracing::warn!(kind = %update.kind, error = %err, "failed to publish update");
                    }
                }
            }
        });
        NotifyHandle { tx: Some(tx) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvError, KvResult, MemoryKv};
    use async_trait::async_trait;
    use std::time::Duration;

    #[tokio::test]
    async fn updates_are_published_to_the_updates_channel() {
        let kv = Arc::new(MemoryKv::new());
        let mut rx = kv.subscribe(UPDATES_CHANNEL).await;
        let handle = Notifier::spawn(kv.clone());

        handle.send(Update::ok(
            "channels_created",
            json!({"count": 2, "channel_ids": [1, 2]}),
        ));

        let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("delivery")
            .expect("recv");
        let value: Value = serde_json::from_slice(&payload).expect("json");
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["type"], json!("channels_created"));
        assert_eq!(value["count"], json!(2));
    }

    struct BrokenKv;

    #[async_trait]
    impl KvStore for BrokenKv {
        async fn set_nx(&self, _: &str, _: Bytes, _: Duration) -> KvResult<bool> {
            Err(KvError::Unavailable)
        }
        async fn get(&self, _: &str) -> KvResult<Option<Bytes>> {
            Err(KvError::Unavailable)
        }
        async fn delete(&self, _: &str) -> KvResult<bool> {
            Err(KvError::Unavailable)
        }
        async fn compare_delete(&self, _: &str, _: &[u8]) -> KvResult<bool> {
            Err(KvError::Unavailable)
        }
        async fn publish(&self, _: &str, _: Bytes) -> KvResult<u64> {
            Err(KvError::Unavailable)
        }
        async fn ping(&self) -> KvResult<()> {
            Err(KvError::Unavailable)
        }
    }

    #[tokio::test]
    async fn publish_failures_are_swallowed() {
        let handle = Notifier::spawn(Arc::new(BrokenKv));
        // Neither send may panic or surface the store failure.
        handle.send(Update::ok("channels_created", json!({"count": 1})));
        handle.send(Update::failed("channels_created", json!({})));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn disabled_handle_drops_updates() {
        NotifyHandle::disabled().send(Update::ok("noop", json!({})));
    }
}
