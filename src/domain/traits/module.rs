use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::application::orchestrator::ModuleContext;
use crate::domain::entities::{CommandDefinition, EventKind, HandlerResult, ModuleMetadata, PlatformEvent};

/// A self-contained feature unit: metadata, commands, event listeners and lifecycle hooks.
///
/// Bus subscriptions and cron jobs are registered by the module itself in `on_load`
/// through the [`ModuleContext`]. Jobs must be dropped again in `on_unload`.
#[async_trait]
pub trait Module: Send + Sync {
    fn metadata(&self) -> &ModuleMetadata;

    fn commands(&self) -> Vec<CommandDefinition> {
        Vec::new()
    }

    fn events(&self) -> Vec<EventBinding> {
        Vec::new()
    }

    async fn on_load(&self, ctx: &ModuleContext) -> HandlerResult;

    async fn on_unload(&self) -> HandlerResult;

    /// Called after the module is enabled for a guild
    async fn on_enable(&self, _guild_id: &str) -> HandlerResult {
        Ok(())
    }

    /// Called after the module is disabled for a guild
    async fn on_disable(&self, _guild_id: &str) -> HandlerResult {
        Ok(())
    }
}

/// Handles one platform event
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Arc<PlatformEvent>) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Arc<PlatformEvent>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, event: Arc<PlatformEvent>) -> HandlerResult {
        (self)(event).await
    }
}

/// A platform event listener a module declares
#[derive(Clone)]
pub struct EventBinding {
    pub kind: EventKind,
    pub once: bool,
    pub handler: Arc<dyn EventHandler>,
}

impl EventBinding {
    pub fn on<F, Fut>(kind: EventKind, handler: F) -> Self
    where
        F: Fn(Arc<PlatformEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            kind,
            once: false,
            handler: Arc::new(handler),
        }
    }

    /// Listener removed after its first delivery
    pub fn once<F, Fut>(kind: EventKind, handler: F) -> Self
    where
        F: Fn(Arc<PlatformEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            once: true,
            ..Self::on(kind, handler)
        }
    }
}
