use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use common::{ConfigProvider, Error, PriorityConfig, Result};

/// Priority-config lookup across an ordered list of providers.
///
/// `load` never fails: it walks the providers in order, keeps the first
/// config found and falls back to the compiled-in defaults when every link
/// misses or errors. `save` goes to the first writable provider.
pub struct ConfigStore {
    providers: Vec<Arc<dyn ConfigProvider>>,
    /// Last config handed out by `load`, with the provider it came from.
    cached: RwLock<Option<(PriorityConfig, String)>>,
}

impl ConfigStore {
    pub fn new(providers: Vec<Arc<dyn ConfigProvider>>) -> Self {
        Self {
            providers,
            cached: RwLock::new(None),
        }
    }

    pub async fn load(&self, config_name: &str) -> PriorityConfig {
        for provider in &self.providers {
            match provider.try_load(config_name).await {
                Ok(Some(config)) => {
                    info!(
                        config = config_name,
                        source = provider.name(),
                        min_level = %config.min_level,
                        "Priority config loaded"
                    );
                    *self.cached.write().await = Some((config.clone(), provider.name().to_string()));
                    return config;
                }
                Ok(None) => {
                    debug!(config = config_name, source = provider.name(), "No config here, trying next source");
                }
                Err(e) => {
                    warn!(
                        config = config_name,
                        source = provider.name(),
                        error = %e,
                        "Config source unavailable, falling back"
                    );
                }
            }
        }

        warn!(config = config_name, "Every config source missed, using hard-coded defaults");
        let config = PriorityConfig::defaults(config_name);
        *self.cached.write().await = Some((config.clone(), "defaults".to_string()));
        config
    }

    pub async fn save(&self, config: &PriorityConfig) -> Result<()> {
        let provider = self
            .providers
            .iter()
            .find(|p| p.is_writable())
            .ok_or_else(|| Error::ReadOnly("config chain".into()))?;

        provider.save(config).await?;
        *self.cached.write().await = Some((config.clone(), provider.name().to_string()));
        Ok(())
    }

    pub async fn cached(&self) -> Option<PriorityConfig> {
        self.cached.read().await.as_ref().map(|(c, _)| c.clone())
    }

    /// Provider that produced the cached config, if any load has happened.
    pub async fn source(&self) -> Option<String> {
        self.cached.read().await.as_ref().map(|(_, s)| s.clone())
    }
}
