//! In-memory per-guild module settings

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::traits::GuildGate;

/// Tracks which modules are switched off in which guilds. Everything is enabled by default.
#[derive(Clone, Default)]
pub struct GuildModuleSettings {
    disabled: Arc<RwLock<HashMap<String, HashSet<String>>>>,
}

impl GuildModuleSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the module was already disabled there
    pub async fn disable(&self, module_id: &str, guild_id: &str) -> bool {
        let mut disabled = self.disabled.write().await;
        disabled
            .entry(module_id.to_string())
            .or_default()
            .insert(guild_id.to_string())
    }

    /// Returns false if the module was already enabled there
    pub async fn enable(&self, module_id: &str, guild_id: &str) -> bool {
        let mut disabled = self.disabled.write().await;
        let Some(guilds) = disabled.get_mut(module_id) else {
            return false;
        };
        let removed = guilds.remove(guild_id);
        if guilds.is_empty() {
            disabled.remove(module_id);
        }
        removed
    }

    /// Guilds where a module is disabled, sorted
    pub async fn disabled_guilds(&self, module_id: &str) -> Vec<String> {
        let disabled = self.disabled.read().await;
        let mut guilds: Vec<String> = disabled
            .get(module_id)
            .map(|g| g.iter().cloned().collect())
            .unwrap_or_default();
        guilds.sort();
        guilds
    }
}

#[async_trait]
impl GuildGate for GuildModuleSettings {
    async fn is_module_enabled(&self, module_id: &str, guild_id: &str) -> bool {
        let disabled = self.disabled.read().await;
        !disabled
            .get(module_id)
            .map(|guilds| guilds.contains(guild_id))
            .unwrap_or(false)
    }

    async fn set_module_enabled(&self, module_id: &str, guild_id: &str, enabled: bool) -> bool {
        if enabled {
            self.enable(module_id, guild_id).await
        } else {
            self.disable(module_id, guild_id).await
        }
    }
}
