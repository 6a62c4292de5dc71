use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use common::{ConfigProvider, Error, PriorityConfig, Result};

/// In-process config table.
///
/// Stands in for the database in tests and for deployments without
/// `DATABASE_URL` that still want admin edits to survive a `reload`.
/// `set_available(false)` makes every call fail like an unreachable store.
#[derive(Clone, Default)]
pub struct MemoryConfigProvider {
    configs: Arc<RwLock<HashMap<String, PriorityConfig>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, config: PriorityConfig) {
        self.configs.write().await.insert(config.name.clone(), config);
    }

    pub async fn get(&self, config_name: &str) -> Option<PriorityConfig> {
        self.configs.read().await.get(config_name).cloned()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::Other("memory store marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConfigProvider for MemoryConfigProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn try_load(&self, config_name: &str) -> Result<Option<PriorityConfig>> {
        self.check_available()?;
        Ok(self
            .configs
            .read()
            .await
            .get(config_name)
            .filter(|c| c.active)
            .cloned())
    }

    async fn save(&self, config: &PriorityConfig) -> Result<()> {
        self.check_available()?;
        debug!(config = %config.name, "Memory store upsert");
        self.insert(config.clone()).await;
        Ok(())
    }

    fn is_writable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inactive_rows_are_not_returned() {
        let store = MemoryConfigProvider::new();
        let mut cfg = PriorityConfig::defaults("after_hours");
        cfg.active = false;
        store.insert(cfg).await;

        assert!(store.try_load("after_hours").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let store = MemoryConfigProvider::new();
        store.insert(PriorityConfig::default()).await;
        store.set_available(false);

        assert!(store.try_load("default").await.is_err());
        assert!(store.save(&PriorityConfig::default()).await.is_err());

        store.set_available(true);
        assert!(store.try_load("default").await.unwrap().is_some());
    }
}
