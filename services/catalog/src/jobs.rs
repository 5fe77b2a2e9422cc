//! Lock-guarded maintenance jobs.
//!
//! # Purpose
//! Wraps long-running background work (guide refresh and the like) in the
//! distributed task lock so only one instance of a job per target id runs
//! across all processes at a time. Contention means some other process is
//! already on it — the job is skipped for this cycle, not retried.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use headend_coord::TaskLock;

use crate::store::CatalogStore;

/// Task name for the guide-refresh job.
pub const GUIDE_REFRESH_TASK: &str = "epg-refresh";

#[derive(Debug, PartialEq, Eq)]
pub enum JobOutcome<T> {
    Completed(T),
    /// Another process holds the lock; the job did not run.
    AlreadyRunning,
}

/// Runs `job` under the (task, id) lock. If the lock cannot be acquired —
/// held elsewhere or store unavailable — the job is skipped. The lock is
/// released when the body finishes; if the process dies mid-job, the TTL
/// recovers the lock on its own.
pub async fn run_exclusive<F, T>(lock: &TaskLock, task: &str, id: i64, job: F) -> JobOutcome<T>
where
    F: Future<Output = T>,
{
    let Some(token) = lock.acquire(task, id).await else {
        return JobOutcome::AlreadyRunning;
    };
    let result = job.await;
    lock.release(token).await;
    JobOutcome::Completed(result)
}

/// Periodic guide-refresh loop. The refresh body itself is an opaque
/// maintenance pass; what matters here is that every run is serialized
/// through the task lock across all processes.
pub fn spawn_guide_refresh(
    lock: Arc<TaskLock>,
    store: Arc<dyn CatalogStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let outcome = run_exclusive(&lock, GUIDE_REFRESH_TASK, 0, async {
                match store.list_channels().await {
                    Ok(channels) => {
                        let linked = channels
                            .iter()
                            .filter(|channel| channel.tvg_id.is_some())
                            .count();
                        tracing::info!(
                            channels = channels.len(),
                            linked,
                            "guide refresh pass complete"
                        );
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "guide refresh pass failed");
                    }
                }
            })
            .await;
            if outcome == JobOutcome::AlreadyRunning {
                tracing::info!(task = GUIDE_REFRESH_TASK, "refresh already running elsewhere");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use headend_coord::{KvStore, MemoryKv};

    #[tokio::test]
    async fn job_runs_and_releases_the_lock() {
        let kv = Arc::new(MemoryKv::new());
        let lock = TaskLock::new(kv.clone() as Arc<dyn KvStore>);

        let outcome = run_exclusive(&lock, "epg-refresh", 17, async { 41 + 1 }).await;
        assert_eq!(outcome, JobOutcome::Completed(42));
        // Lock is free again after the body finishes.
        let token = lock.acquire("epg-refresh", 17).await.expect("free");
        lock.release(token).await;
    }

    #[tokio::test]
    async fn held_lock_skips_the_job() {
        let kv = Arc::new(MemoryKv::new());
        let lock = TaskLock::new(kv.clone() as Arc<dyn KvStore>);

        let held = lock.acquire("epg-refresh", 17).await.expect("holder");
        let outcome: JobOutcome<()> = run_exclusive(&lock, "epg-refresh", 17, async {
            panic!("job body must not run while the lock is held")
        })
        .await;
        assert_eq!(outcome, JobOutcome::AlreadyRunning);
        lock.release(held).await;
    }
}
