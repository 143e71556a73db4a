//! Core module - always loaded, cannot be disabled per guild

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use crate::application::cron::Schedule;
use crate::application::orchestrator::ModuleContext;
use crate::domain::entities::{CommandData, CommandDefinition, EventKind, HandlerResult, ModuleMetadata};
use crate::domain::traits::{EventBinding, Module};

pub const CORE_MODULE_ID: &str = "core";

/// Bus event emitted once the platform reports ready
pub const READY_EVENT: &str = "core:ready";

pub struct CoreModule {
    metadata: ModuleMetadata,
    started: Instant,
    ctx: Arc<Mutex<Option<ModuleContext>>>,
}

impl CoreModule {
    pub fn new() -> Self {
        Self {
            metadata: Self::default_metadata(),
            started: Instant::now(),
            ctx: Arc::new(Mutex::new(None)),
        }
    }

    pub fn default_metadata() -> ModuleMetadata {
        let mut metadata = ModuleMetadata::new(CORE_MODULE_ID, env!("CARGO_PKG_VERSION"));
        metadata.name = "Core".to_string();
        metadata.is_core = true;
        metadata.is_public = false;
        metadata.priority = 100;
        metadata
    }

    fn context(&self) -> Option<ModuleContext> {
        self.ctx.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for CoreModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for CoreModule {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn commands(&self) -> Vec<CommandDefinition> {
        let started = self.started;
        vec![
            CommandDefinition::new(CommandData::chat_input("ping", "Check that the bot responds"), |ctx| async move {
                ctx.reply("Pong!").await?;
                Ok(())
            })
            .with_cooldown_secs(3),
            CommandDefinition::new(CommandData::chat_input("version", "Show bot version"), |ctx| async move {
                ctx.reply(format!("guildkit v{}", env!("CARGO_PKG_VERSION"))).await?;
                Ok(())
            }),
            CommandDefinition::new(
                CommandData::chat_input("uptime", "Show how long the bot has been running"),
                move |ctx| async move {
                    ctx.reply(format!("Up for {}", format_uptime(started.elapsed().as_secs())))
                        .await?;
                    Ok(())
                },
            ),
        ]
    }

    fn events(&self) -> Vec<EventBinding> {
        let ctx = Arc::clone(&self.ctx);
        vec![EventBinding::once(EventKind::Ready, move |_event| {
            let ctx = ctx.lock().unwrap_or_else(|e| e.into_inner()).clone();
            async move {
                if let Some(ctx) = ctx {
                    let report = ctx.emit(READY_EVENT, json!({ "module": CORE_MODULE_ID })).await;
                    info!("Platform ready, notified {} module subscriber(s)", report.delivered);
                }
                Ok(())
            }
        })]
    }

    async fn on_load(&self, ctx: &ModuleContext) -> HandlerResult {
        let started = self.started;
        ctx.register_job("heartbeat", Schedule::Hourly, move || async move {
            debug!("Heartbeat, up for {}", format_uptime(started.elapsed().as_secs()));
            Ok(())
        })?;
        *self.ctx.lock().unwrap_or_else(|e| e.into_inner()) = Some(ctx.clone());
        Ok(())
    }

    async fn on_unload(&self) -> HandlerResult {
        if let Some(ctx) = self.context() {
            ctx.unregister_jobs();
        }
        *self.ctx.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// `3d 4h 5m 6s`, leading zero units omitted
pub fn format_uptime(total_seconds: u64) -> String {
    let days = total_seconds / 86_400;
    let hours = total_seconds % 86_400 / 3_600;
    let minutes = total_seconds % 3_600 / 60;
    let seconds = total_seconds % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if days > 0 || hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if days > 0 || hours > 0 || minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    parts.push(format!("{}s", seconds));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(5), "5s");
        assert_eq!(format_uptime(65), "1m 5s");
        assert_eq!(format_uptime(3_600), "1h 0m 0s");
        assert_eq!(format_uptime(90_061), "1d 1h 1m 1s");
    }

    #[test]
    fn test_metadata_is_core() {
        let module = CoreModule::new();
        assert!(module.metadata().is_core);
        assert!(module.metadata().dependencies.is_empty());
        assert_eq!(module.commands().len(), 3);
    }
}
