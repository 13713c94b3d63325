//! Key/value persistence for attempt records.
//!
//! Plays the role the browser's localStorage plays for a web client: small
//! string values addressed by namespaced keys, last writer wins.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::config::{Settings, StoreKind};

pub(crate) mod file;
pub(crate) mod memory;
pub(crate) mod redis;

pub(crate) use file::FileStore;
pub(crate) use memory::MemoryStore;
pub(crate) use redis::RedisStore;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt stored value: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[async_trait]
pub(crate) trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Writes `value` only when `key` is absent. Returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    async fn close(&self) {}
}

pub(crate) async fn from_settings(settings: &Settings) -> Arc<dyn StateStore> {
    match settings.store().kind {
        StoreKind::Memory => Arc::new(MemoryStore::default()),
        StoreKind::File => Arc::new(FileStore::new(settings.store().path.clone())),
        StoreKind::Redis => {
            let store = RedisStore::new(settings.redis().redis_url());
            if let Err(err) = store.connect().await {
                tracing::error!(
                    error = %err,
                    "Failed to connect to Redis; attempt state will not survive reloads"
                );
            } else {
                tracing::info!(health = ?store.health().await, "Redis connected successfully");
            }
            Arc::new(store)
        }
    }
}
