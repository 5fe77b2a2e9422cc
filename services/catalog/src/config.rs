//! Catalog service configuration.
//!
//! # Purpose
//! Resolves service settings from environment variables with defaults, with
//! an optional YAML override file (`HEADEND_CONFIG`) layered on top.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

use headend_coord::CoordConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub guide_refresh_interval: Duration,
    pub kv: CoordConfig,
}

#[derive(Debug, Deserialize)]
struct CatalogConfigOverride {
    metrics_bind: Option<String>,
    storage: Option<String>,
    database_url: Option<String>,
    guide_refresh_interval_secs: Option<u64>,
}

impl CatalogConfig {
    pub fn from_env() -> Result<Self> {
        let metrics_bind = std::env::var("HEADEND_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9784".to_string())
            .parse()
            .with_context(|| "parse HEADEND_METRICS_BIND")?;
        let storage = match std::env::var("HEADEND_STORAGE").as_deref() {
            Ok("postgres") => StorageBackend::Postgres,
            _ => StorageBackend::Memory,
        };
        let postgres = std::env::var("HEADEND_DATABASE_URL")
            .ok()
            .map(|url| PostgresConfig {
                url,
                max_connections: env_parse("HEADEND_DB_MAX_CONNECTIONS", 8),
                connect_timeout_ms: env_parse("HEADEND_DB_CONNECT_TIMEOUT_MS", 5_000),
                acquire_timeout_ms: env_parse("HEADEND_DB_ACQUIRE_TIMEOUT_MS", 5_000),
            });
        let guide_refresh_interval =
            Duration::from_secs(env_parse("HEADEND_GUIDE_REFRESH_SECS", 900));
        Ok(Self {
            metrics_bind,
            storage,
            postgres,
            guide_refresh_interval,
            kv: CoordConfig::from_env(),
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("HEADEND_CONFIG") {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read HEADEND_CONFIG: {path}"))?;
            let override_cfg: CatalogConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse catalog config yaml")?;
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
            }
            if let Some(value) = override_cfg.storage {
                config.storage = match value.as_str() {
                    "postgres" => StorageBackend::Postgres,
                    "memory" => StorageBackend::Memory,
                    other => anyhow::bail!("unknown storage backend: {other}"),
                };
            }
            if let Some(url) = override_cfg.database_url {
                let existing = config.postgres.take();
                config.postgres = Some(PostgresConfig {
                    url,
                    max_connections: existing.as_ref().map(|pg| pg.max_connections).unwrap_or(8),
                    connect_timeout_ms: existing
                        .as_ref()
                        .map(|pg| pg.connect_timeout_ms)
                        .unwrap_or(5_000),
                    acquire_timeout_ms: existing
                        .as_ref()
                        .map(|pg| pg.acquire_timeout_ms)
                        .unwrap_or(5_000),
                });
            }
            if let Some(secs) = override_cfg.guide_refresh_interval_secs {
                config.guide_refresh_interval = Duration::from_secs(secs);
            }
        }
        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
