//! Module event bus - in-process pub/sub between modules
//!
//! Event names follow the `producer-module:event-name` convention. Nothing enforces it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::application::errors::HandlerError;
use crate::application::supervisor::{guarded, spawn_supervised};
use crate::domain::entities::HandlerResult;

/// What every subscriber receives
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusMessage {
    pub event: String,
    pub source_module: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl BusMessage {
    /// Decode the payload into a concrete type
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| HandlerError::failed(format!("Invalid payload for {}: {}", self.event, e)))
    }
}

#[async_trait]
pub trait BusHandler: Send + Sync {
    async fn handle(&self, message: Arc<BusMessage>) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> BusHandler for F
where
    F: Fn(Arc<BusMessage>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, message: Arc<BusMessage>) -> HandlerResult {
        (self)(message).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Result of one `emit`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub delivered: usize,
    pub failed: usize,
}

struct Subscription {
    id: SubscriptionId,
    module_id: String,
    event: String,
    once: bool,
    /// Cleared on removal. A subscription is only started while this is set.
    active: AtomicBool,
    handler: Arc<dyn BusHandler>,
}

/// Both indexes live behind one lock so they are always updated together
#[derive(Default)]
struct Indexes {
    by_event: HashMap<String, Vec<Arc<Subscription>>>,
    by_module: HashMap<String, Vec<Arc<Subscription>>>,
}

impl Indexes {
    fn remove(&mut self, sub: &Subscription) {
        sub.active.store(false, Ordering::SeqCst);

        if let Some(subs) = self.by_event.get_mut(&sub.event) {
            subs.retain(|s| s.id != sub.id);
            if subs.is_empty() {
                self.by_event.remove(&sub.event);
            }
        }
        if let Some(subs) = self.by_module.get_mut(&sub.module_id) {
            subs.retain(|s| s.id != sub.id);
            if subs.is_empty() {
                self.by_module.remove(&sub.module_id);
            }
        }
    }
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    indexes: RwLock<Indexes>,
}

/// Cloneable handle to a shared bus
#[derive(Clone, Default)]
pub struct ModuleEventBus {
    inner: Arc<BusInner>,
}

impl ModuleEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `module_id` to `event`
    pub fn on<F, Fut>(&self, module_id: &str, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<BusMessage>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscribe(module_id, event, false, Arc::new(handler))
    }

    /// Subscribe for the next delivery only
    pub fn once<F, Fut>(&self, module_id: &str, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<BusMessage>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.subscribe(module_id, event, true, Arc::new(handler))
    }

    pub fn subscribe(
        &self,
        module_id: &str,
        event: &str,
        once: bool,
        handler: Arc<dyn BusHandler>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let sub = Arc::new(Subscription {
            id,
            module_id: module_id.to_string(),
            event: event.to_string(),
            once,
            active: AtomicBool::new(true),
            handler,
        });

        let mut indexes = self.write();
        indexes
            .by_event
            .entry(sub.event.clone())
            .or_default()
            .push(Arc::clone(&sub));
        indexes
            .by_module
            .entry(sub.module_id.clone())
            .or_default()
            .push(sub);
        trace!("Module {} subscribed to {} ({})", module_id, event, id);
        id
    }

    /// Remove one subscription
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut indexes = self.write();
        let found = indexes
            .by_event
            .values()
            .flatten()
            .find(|s| s.id == id)
            .cloned();
        match found {
            Some(sub) => {
                indexes.remove(&sub);
                true
            }
            None => false,
        }
    }

    /// Remove every subscription of a module from both indexes
    pub fn unsubscribe_all(&self, module_id: &str) -> usize {
        let mut indexes = self.write();
        let subs = indexes.by_module.remove(module_id).unwrap_or_default();
        for sub in &subs {
            indexes.remove(sub);
        }
        if !subs.is_empty() {
            debug!("Removed {} bus subscription(s) of module {}", subs.len(), module_id);
        }
        subs.len()
    }

    /// Deliver to every subscriber of `event` and wait for all of them.
    ///
    /// Subscribers start in subscription order. Each failure is logged on its own.
    pub async fn emit(&self, event: &str, source_module: &str, data: Value) -> EmitReport {
        let subs = self.take_subscribers(event);
        if subs.is_empty() {
            trace!("No subscribers for {}", event);
            return EmitReport::default();
        }

        let message = Arc::new(BusMessage {
            event: event.to_string(),
            source_module: source_module.to_string(),
            data,
            timestamp: Utc::now(),
        });

        let runs = subs.into_iter().map(|sub| {
            let message = Arc::clone(&message);
            async move {
                // Removed between lookup and start
                if !sub.once && !sub.active.load(Ordering::SeqCst) {
                    return None;
                }
                let result = guarded(sub.handler.handle(message)).await;
                if let Err(e) = &result {
                    warn!(
                        "Subscriber of {} in module {} failed: {}",
                        sub.event, sub.module_id, e
                    );
                }
                Some(result.is_ok())
            }
        });

        let mut report = EmitReport::default();
        for outcome in join_all(runs).await.into_iter().flatten() {
            if outcome {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    /// Emit without waiting for subscribers
    pub fn emit_detached(&self, event: &str, source_module: &str, data: Value) -> JoinHandle<()> {
        let bus = self.clone();
        let event = event.to_string();
        let source_module = source_module.to_string();
        spawn_supervised(format!("Emit of {}", event), async move {
            let report = bus.emit(&event, &source_module, data).await;
            if report.failed > 0 {
                debug!("{} of {} subscriber(s) of {} failed", report.failed, report.failed + report.delivered, event);
            }
            Ok(())
        })
    }

    /// Serialize `payload` and emit it
    pub async fn emit_json<T: Serialize>(
        &self,
        event: &str,
        source_module: &str,
        payload: &T,
    ) -> Result<EmitReport, serde_json::Error> {
        let data = serde_json::to_value(payload)?;
        Ok(self.emit(event, source_module, data).await)
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.read().by_event.get(event).map(Vec::len).unwrap_or(0)
    }

    pub fn module_subscription_count(&self, module_id: &str) -> usize {
        self.read().by_module.get(module_id).map(Vec::len).unwrap_or(0)
    }

    /// Snapshot the subscribers of `event`, claiming `once` subscriptions as they are taken
    fn take_subscribers(&self, event: &str) -> Vec<Arc<Subscription>> {
        let has_once = self
            .read()
            .by_event
            .get(event)
            .map(|subs| subs.iter().any(|s| s.once))
            .unwrap_or(false);

        if !has_once {
            return self.read().by_event.get(event).cloned().unwrap_or_default();
        }

        let mut indexes = self.write();
        let subs = indexes.by_event.get(event).cloned().unwrap_or_default();
        let mut taken = Vec::with_capacity(subs.len());
        for sub in subs {
            if sub.once {
                if sub.active.swap(false, Ordering::SeqCst) {
                    indexes.remove(&sub);
                    taken.push(sub);
                }
            } else {
                taken.push(sub);
            }
        }
        taken
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Indexes> {
        self.inner.indexes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Indexes> {
        self.inner.indexes.write().unwrap_or_else(|e| e.into_inner())
    }
}
