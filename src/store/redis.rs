use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, Client, RedisError};
use tokio::sync::RwLock;

use super::{StateStore, StoreError};

/// Redis-backed store shared by every runner of a kiosk deployment.
#[derive(Clone)]
pub(crate) struct RedisStore {
    url: String,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RedisHealth {
    Healthy,
    Disconnected,
    Unhealthy(String),
}

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl RedisStore {
    pub(crate) fn new(url: String) -> Self {
        Self { url, manager: Arc::new(RwLock::new(None)) }
    }

    pub(crate) async fn connect(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        let mut guard = self.manager.write().await;
        *guard = Some(manager);
        Ok(())
    }

    pub(crate) async fn disconnect(&self) {
        let mut guard = self.manager.write().await;
        *guard = None;
    }

    pub(crate) async fn health(&self) -> RedisHealth {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return RedisHealth::Disconnected;
        };

        match cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => RedisHealth::Healthy,
            Err(err) => RedisHealth::Unhealthy(err.to_string()),
        }
    }

    async fn manager(&self) -> Result<ConnectionManager, StoreError> {
        self.manager
            .read()
            .await
            .clone()
            .ok_or_else(|| StoreError::Unavailable("redis is not connected".to_string()))
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut manager = self.manager().await?;
        Ok(cmd("GET").arg(key).query_async::<_, Option<String>>(&mut manager).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut manager = self.manager().await?;
        cmd("SET").arg(key).arg(value).query_async::<_, ()>(&mut manager).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut manager = self.manager().await?;
        let reply: Option<String> =
            cmd("SET").arg(key).arg(value).arg("NX").query_async(&mut manager).await?;
        Ok(reply.is_some())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut manager = self.manager().await?;
        cmd("DEL").arg(key).query_async::<_, i64>(&mut manager).await?;
        Ok(())
    }

    async fn close(&self) {
        self.disconnect().await;
        tracing::info!("Redis disconnected");
    }
}
