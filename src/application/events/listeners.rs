//! In-process listener table a platform adapter feeds with events

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures::future::join_all;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::application::supervisor::spawn_supervised;
use crate::domain::entities::{EventKind, PlatformEvent};
use crate::domain::traits::{EventSource, Listener, ListenerHandle};

struct Entry {
    handle: ListenerHandle,
    kind: EventKind,
    once: bool,
    listener: Listener,
}

/// Listeners in bind order, each keyed by its own handle
#[derive(Clone, Default)]
pub struct ListenerTable {
    next_id: Arc<AtomicU64>,
    entries: Arc<RwLock<Vec<Entry>>>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every matching listener and wait for all of them.
    ///
    /// `once` listeners are removed before they run, so a concurrent dispatch never sees them twice.
    pub async fn dispatch(&self, event: PlatformEvent) -> usize {
        let kind = event.kind();
        let listeners: Vec<Listener> = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let matching: Vec<Listener> = entries
                .iter()
                .filter(|e| e.kind == kind)
                .map(|e| Arc::clone(&e.listener))
                .collect();
            entries.retain(|e| !(e.once && e.kind == kind));
            matching
        };

        if listeners.is_empty() {
            trace!("No listeners for {}", kind);
            return 0;
        }

        let event = Arc::new(event);
        let count = listeners.len();
        let runs = listeners.into_iter().map(|listener| {
            let event = Arc::clone(&event);
            let kind = kind.clone();
            async move {
                if AssertUnwindSafe(listener(event)).catch_unwind().await.is_err() {
                    warn!("Listener for {} panicked", kind);
                }
            }
        });
        join_all(runs).await;
        count
    }

    /// Deliver an event in the background
    pub fn emit(&self, event: PlatformEvent) -> JoinHandle<()> {
        let table = self.clone();
        let label = format!("Dispatch of {}", event.kind());
        spawn_supervised(label, async move {
            table.dispatch(event).await;
            Ok(())
        })
    }

    pub fn listener_count(&self, kind: &EventKind) -> usize {
        self.read().iter().filter(|e| &e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Entry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventSource for ListenerTable {
    fn bind(&self, kind: EventKind, once: bool, listener: Listener) -> ListenerHandle {
        let handle = ListenerHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Entry {
                handle,
                kind,
                once,
                listener,
            });
        handle
    }

    fn unbind(&self, handle: ListenerHandle) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|e| e.handle != handle);
        entries.len() != before
    }
}
