//! The bundle every module receives in `on_load`

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::application::bus::{BusMessage, EmitReport, ModuleEventBus, SubscriptionId};
use crate::application::cron::{CronService, Schedule};
use crate::application::errors::CronError;
use crate::domain::entities::HandlerResult;

/// Host-provided handles keyed by type, e.g. a database pool
#[derive(Clone, Default)]
pub struct ServiceMap {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, service: Arc<T>) {
        self.services.insert(TypeId::of::<T>(), service);
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|s| s.downcast::<T>().ok())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Capabilities handed to one module. Bus subscriptions and cron jobs made through it are
/// owned by that module and cleaned up when it unloads.
#[derive(Clone)]
pub struct ModuleContext {
    module_id: String,
    bus: ModuleEventBus,
    cron: CronService,
    services: ServiceMap,
}

impl ModuleContext {
    pub fn new(module_id: impl Into<String>, bus: ModuleEventBus, cron: CronService, services: ServiceMap) -> Self {
        Self {
            module_id: module_id.into(),
            bus,
            cron,
            services,
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn bus(&self) -> &ModuleEventBus {
        &self.bus
    }

    pub fn cron(&self) -> &CronService {
        &self.cron
    }

    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services.get::<T>()
    }

    pub fn on<F, Fut>(&self, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<BusMessage>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.bus.on(&self.module_id, event, handler)
    }

    pub fn once<F, Fut>(&self, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<BusMessage>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.bus.once(&self.module_id, event, handler)
    }

    /// Emit as this module
    pub async fn emit(&self, event: &str, data: Value) -> EmitReport {
        self.bus.emit(event, &self.module_id, data).await
    }

    pub fn emit_detached(&self, event: &str, data: Value) -> JoinHandle<()> {
        self.bus.emit_detached(event, &self.module_id, data)
    }

    /// Register a job keyed `module_id:job_id`
    pub fn register_job<F, Fut>(&self, job_id: &str, schedule: Schedule, handler: F) -> Result<String, CronError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.cron.register_job(&self.module_id, job_id, schedule, handler)
    }

    /// Drop every job of this module; call from `on_unload`
    pub fn unregister_jobs(&self) -> usize {
        self.cron.unregister_all_for_module(&self.module_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Database {
        url: String,
    }

    #[test]
    fn test_service_lookup_by_type() {
        let mut services = ServiceMap::new();
        services.insert(Arc::new(Database {
            url: "sqlite://bot.db".into(),
        }));

        let ctx = ModuleContext::new("economy", ModuleEventBus::new(), CronService::default(), services);
        assert_eq!(ctx.service::<Database>().unwrap().url, "sqlite://bot.db");
        assert!(ctx.service::<String>().is_none());
    }

    #[tokio::test]
    async fn test_subscriptions_are_owned_by_the_module() {
        let bus = ModuleEventBus::new();
        let ctx = ModuleContext::new("levels", bus.clone(), CronService::default(), ServiceMap::new());

        ctx.on("chat:message", |_msg| async { Ok(()) });
        ctx.register_job("decay", Schedule::Daily, || async { Ok(()) }).unwrap();

        assert_eq!(bus.module_subscription_count("levels"), 1);
        assert_eq!(ctx.cron().module_job_count("levels"), 1);
        assert_eq!(ctx.unregister_jobs(), 1);

        let report = ctx.emit("chat:message", Value::Null).await;
        assert_eq!(report.delivered, 1);
    }
}
