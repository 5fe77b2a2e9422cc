// Advisory task locks over the shared key-value store.
//
// A lock exists to stop duplicate concurrent runs of the same maintenance
// job across processes — it is coarse and advisory, not a linearizable
// guard over shared data. The record carries a fixed expiry and is never
// renewed: a crashed holder is recovered by TTL alone, and a job that
// overruns the TTL loses its exclusivity by design.
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::kv::KvStore;

/// Fixed lock expiry. There is no per-call override.
pub const LOCK_TTL: Duration = Duration::from_secs(300);

/// Proof of a held lock. Release compares this token against the stored
/// marker, so a lock that expired and was re-acquired by another process is
/// never deleted by the stale holder.
#[derive(Debug)]
pub struct LockToken {
    task: String,
    id: i64,
    token: Uuid,
}

impl LockToken {
    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn id(&self) -> i64 {
        self.id
    }
}

/// Non-blocking mutual exclusion keyed by (task name, target id).
pub struct TaskLock {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl TaskLock {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv, ttl: LOCK_TTL }
    }

    /// Constructor with a custom TTL, for tests that exercise expiry.
    pub fn with_ttl(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub fn key(task: &str, id: i64) -> String {
        format!("task_lock_{task}_{id}")
    }

    /// Attempts to take the lock. Never blocks or retries: the record is
    /// either created now or already held. An unreachable store also reports
    /// "not acquired" — unavailability must never look like ownership.
    pub async fn acquire(&self, task: &str, id: i64) -> Option<LockToken> {
        let key = Self::key(task, id);
        let token = Uuid::new_v4();
        match self
            .kv
            .set_nx(&key, Bytes::from(token.to_string()), self.ttl)
            .await
        {
            Ok(true) => {
                metrics::counter!("headend_task_locks_total", "result" => "acquired").increment(1);
                Some(LockToken {
                    task: task.to_string(),
                    id,
                    token,
                })
            }
            Ok(false) => {
                metrics::counter!("headend_task_locks_total", "result" => "contended").increment(1);
                tracing::warn!(task, id, "task lock already held, skipping run");
                None
            }
            Err(err) => {
                metrics::counter!("headend_task_locks_total", "result" => "unavailable")
                    .increment(1);
                tracing::warn!(task, id, error = %err, "lock store unavailable, treating as not acquired");
                None
            }
        }
    }

    /// Releases a held lock. Releasing an absent record, or one that has
    /// expired and been taken over, is a logged no-op — never an error.
    pub async fn release(&self, token: LockToken) {
        let key = Self::key(&token.task, token.id);
        match self
            .kv
            .compare_delete(&key, token.token.to_string().as_bytes())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(
                    task = %token.task,
                    id = token.id,
                    "lock was already released or re-acquired elsewhere"
                );
            }
            Err(err) => {
                tracing::warn!(
                    task = %token.task,
                    id = token.id,
                    error = %err,
                    "failed to release task lock, expiry will recover it"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn lock_over(kv: &Arc<MemoryKv>) -> TaskLock {
        TaskLock::new(kv.clone() as Arc<dyn KvStore>)
    }

    #[test]
    fn key_combines_task_and_id() {
        assert_eq!(TaskLock::key("epg-refresh", 17), "task_lock_epg-refresh_17");
    }

    #[tokio::test]
    async fn second_acquire_observes_held_lock() {
        let kv = Arc::new(MemoryKv::new());
        let lock = lock_over(&kv);

        let token = lock.acquire("epg-refresh", 17).await.expect("first");
        assert!(lock.acquire("epg-refresh", 17).await.is_none());
        // A different target id is an independent lock.
        let other = lock.acquire("epg-refresh", 18).await.expect("other id");

        lock.release(token).await;
        lock.release(other).await;
        assert!(lock.acquire("epg-refresh", 17).await.is_some());
    }

    #[tokio::test]
    async fn concurrent_acquires_yield_exactly_one_winner() {
        let kv = Arc::new(MemoryKv::new());
        let lock = Arc::new(lock_over(&kv));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            handles.push(tokio::spawn(
                async move { lock.acquire("epg-refresh", 17).await },
            ));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("join").is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired_without_release() {
        let kv = Arc::new(MemoryKv::new());
        let lock = TaskLock::with_ttl(kv.clone(), Duration::from_millis(20));

        let _abandoned = lock.acquire("epg-refresh", 17).await.expect("first");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(lock.acquire("epg-refresh", 17).await.is_some());
    }

    #[tokio::test]
    async fn release_of_absent_lock_is_a_no_op() {
        let kv = Arc::new(MemoryKv::new());
        let lock = lock_over(&kv);

        let token = lock.acquire("refresh", 1).await.expect("acquire");
        lock.release(token).await;
        // Acquire/release again to show nothing lingers.
        let token = lock.acquire("refresh", 1).await.expect("reacquire");
        lock.release(token).await;
    }

    #[tokio::test]
    async fn stale_token_does_not_release_new_holder() {
        let kv = Arc::new(MemoryKv::new());
        let lock = TaskLock::with_ttl(kv.clone(), Duration::from_millis(20));

        let stale = lock.acquire("refresh", 5).await.expect("first");
        tokio::time::sleep(Duration::from_millis(40)).await;
        let current = lock.acquire("refresh", 5).await.expect("takeover");

        // The stale holder's release must not clobber the new record.
        lock.release(stale).await;
        assert!(lock.acquire("refresh", 5).await.is_none());
        lock.release(current).await;
    }
}
