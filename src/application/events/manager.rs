//! Event manager - binds module event handlers behind the guild gate

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use futures::FutureExt;
use tracing::{debug, trace, warn};

use crate::application::supervisor::guarded;
use crate::domain::entities::{EventKind, PlatformEvent};
use crate::domain::traits::{EventBinding, EventSource, GuildGate, Listener, ListenerHandle};

/// A listener bound on behalf of a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundListener {
    pub module_id: String,
    pub kind: EventKind,
    pub once: bool,
    pub handle: ListenerHandle,
}

type BoundTable = Arc<Mutex<HashMap<String, Vec<BoundListener>>>>;

/// Owns every listener bound for modules, so each can be unbound exactly.
///
/// A `once` listener leaves the table as soon as it is delivered.
pub struct EventManager {
    source: Arc<dyn EventSource>,
    gate: Option<Arc<dyn GuildGate>>,
    bound: BoundTable,
}

impl EventManager {
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self {
            source,
            gate: None,
            bound: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn GuildGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Bind every event a module declares
    pub fn register_module_events(&self, module_id: &str, bindings: Vec<EventBinding>) -> usize {
        let mut bound = Vec::with_capacity(bindings.len());

        for binding in bindings {
            let slot = Arc::new(OnceLock::new());
            let listener = self.guard(module_id, &binding, binding.once.then(|| Arc::clone(&slot)));
            let handle = self.source.bind(binding.kind.clone(), binding.once, listener);
            let _ = slot.set(handle);
            trace!("Bound {} listener for module {}", binding.kind, module_id);
            bound.push(BoundListener {
                module_id: module_id.to_string(),
                kind: binding.kind,
                once: binding.once,
                handle,
            });
        }

        let count = bound.len();
        self.lock()
            .entry(module_id.to_string())
            .or_default()
            .extend(bound);
        debug!("Registered {} event listener(s) for module {}", count, module_id);
        count
    }

    /// Unbind everything a module registered
    pub fn cleanup_module(&self, module_id: &str) -> usize {
        let bound = self.lock().remove(module_id).unwrap_or_default();
        for listener in &bound {
            // once listeners may already be gone
            self.source.unbind(listener.handle);
        }
        debug!("Removed {} event listener(s) for module {}", bound.len(), module_id);
        bound.len()
    }

    pub fn module_listeners(&self, module_id: &str) -> Vec<BoundListener> {
        self.lock().get(module_id).cloned().unwrap_or_default()
    }

    pub fn listener_count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    /// Wrap a handler so it runs only where its module is enabled, and never lets a fault escape.
    ///
    /// With `consumed` set the listener drops its own entry on first delivery.
    fn guard(
        &self,
        module_id: &str,
        binding: &EventBinding,
        consumed: Option<Arc<OnceLock<ListenerHandle>>>,
    ) -> Listener {
        let gate = self.gate.clone();
        let handler = Arc::clone(&binding.handler);
        let module_id = module_id.to_string();
        let kind = binding.kind.clone();
        let bound = Arc::clone(&self.bound);

        Arc::new(move |event: Arc<PlatformEvent>| {
            if let Some(handle) = consumed.as_ref().and_then(|slot| slot.get()) {
                forget_listener(&bound, &module_id, *handle);
            }
            let gate = gate.clone();
            let handler = Arc::clone(&handler);
            let module_id = module_id.clone();
            let kind = kind.clone();

            async move {
                if let (Some(gate), Some(guild_id)) = (&gate, event.scope_id()) {
                    if !gate.is_module_enabled(&module_id, guild_id).await {
                        trace!("Skipping {} for module {} in guild {}", kind, module_id, guild_id);
                        return;
                    }
                }

                if let Err(e) = guarded(handler.handle(Arc::clone(&event))).await {
                    warn!("Error in {} handler of module {}: {}", kind, module_id, e);
                }
            }
            .boxed()
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<BoundListener>>> {
        self.bound.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn forget_listener(bound: &BoundTable, module_id: &str, handle: ListenerHandle) {
    let mut bound = bound.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(listeners) = bound.get_mut(module_id) {
        listeners.retain(|l| l.handle != handle);
    }
}
