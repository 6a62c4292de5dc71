use async_trait::async_trait;

use crate::{Error, PriorityConfig, Result};

/// One link in the priority-config fallback chain.
///
/// `SqliteConfigProvider` reads the `priority_config` table,
/// `EnvConfigProvider` reads the `PRIORITY_*` / `VIP_*` variables and
/// `DefaultsProvider` always answers. `ConfigStore` in `crates/store` walks
/// them in order and keeps the first hit.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Short label used in logs ("sqlite", "env", "defaults").
    fn name(&self) -> &str;

    /// Look up an active config by name. `Ok(None)` means "not here, ask the
    /// next provider"; `Err` means the provider itself is unavailable.
    async fn try_load(&self, config_name: &str) -> Result<Option<PriorityConfig>>;

    /// Upsert keyed by `config.name`. Read-only providers keep the default.
    async fn save(&self, _config: &PriorityConfig) -> Result<()> {
        Err(Error::ReadOnly(self.name().to_string()))
    }

    fn is_writable(&self) -> bool {
        false
    }
}
