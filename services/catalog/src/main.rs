//! Headend catalog service entry point.
//!
//! # Purpose
//! Wires configuration, storage, the key-value store connections, the update
//! notifier, and the guarded guide-refresh loop, then runs until shutdown.
use anyhow::Context;
use std::future::Future;
use std::sync::Arc;

use headend_catalog::config::{CatalogConfig, StorageBackend};
use headend_catalog::jobs;
use headend_catalog::observability;
use headend_catalog::provision::BulkProvisioner;
use headend_catalog::store::{CatalogStore, memory::InMemoryStore, postgres::PostgresStore};
use headend_coord::{ConnectionManager, KvStore, MemoryKv, Notifier, NotifyHandle, TaskLock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CatalogConfig::from_env_or_yaml().context("catalog config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: CatalogConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("headend-catalog");
    let store = build_store(&config).await?;

    let manager = ConnectionManager::new(config.kv.clone());
    // Degraded mode: with the shared store unreachable, locks and
    // notifications fall back to process-local coordination rather than
    // taking the service down.
    let (kv, notify): (Arc<dyn KvStore>, NotifyHandle) = match manager.command().await {
        Some(handle) => {
            let kv: Arc<dyn KvStore> = handle;
            (kv.clone(), Notifier::spawn(kv))
        }
        None => {
            tracing::warn!("shared key-value store unavailable, using in-process coordination");
            (Arc::new(MemoryKv::new()), NotifyHandle::disabled())
        }
    };
    let lock = Arc::new(TaskLock::new(kv));
    // The CRUD surface lives elsewhere; it drives provisioning through this
    // handle. This process hosts it alongside the maintenance jobs.
    let _provisioner = BulkProvisioner::new(store.clone(), notify);

    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));
    let refresh_task = jobs::spawn_guide_refresh(
        lock.clone(),
        store.clone(),
        config.guide_refresh_interval,
    );

    tracing::info!(
        backend = store.backend_name(),
        durable = store.is_durable(),
        "catalog core ready"
    );
    shutdown.await;

    refresh_task.abort();
    metrics_task.abort();
    let _ = refresh_task.await;
    let _ = metrics_task.await;
    Ok(())
}

async fn build_store(config: &CatalogConfig) -> anyhow::Result<Arc<dyn CatalogStore>> {
    let store: Arc<dyn CatalogStore> = match config.storage {
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .context("postgres configuration missing")?;
            Arc::new(PostgresStore::connect(pg).await?)
        }
    };
    store
        .health_check()
        .await
        .map_err(|err| anyhow::anyhow!("store health check: {err}"))?;
    Ok(store)
}
