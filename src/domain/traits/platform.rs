use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::application::errors::PlatformError;
use crate::domain::entities::{AutocompleteChoice, CommandData, EventKind, PlatformEvent, Reply};

/// Responds to a single interaction on behalf of the platform adapter
#[async_trait]
pub trait Responder: Send + Sync {
    /// Send the initial response
    async fn reply(&self, reply: Reply) -> Result<(), PlatformError>;

    /// Acknowledge now, respond later with `edit_reply`
    async fn defer(&self, ephemeral: bool) -> Result<(), PlatformError>;

    /// Replace the content of the deferred or sent response
    async fn edit_reply(&self, content: String) -> Result<(), PlatformError>;

    /// Answer an autocomplete interaction
    async fn respond_autocomplete(&self, choices: Vec<AutocompleteChoice>) -> Result<(), PlatformError>;

    fn is_deferred(&self) -> bool;

    fn is_replied(&self) -> bool;
}

/// Where a full command schema set is deployed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployScope {
    /// Development guild - propagates instantly
    Guild(String),
    /// Every guild - slow propagation, not waited on
    Global,
}

impl fmt::Display for DeployScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployScope::Guild(id) => write!(f, "guild {}", id),
            DeployScope::Global => f.write_str("global"),
        }
    }
}

/// The platform's command catalog
#[async_trait]
pub trait CommandCatalog: Send + Sync {
    /// Replace every registered command in `scope` with `commands`
    async fn deploy(&self, scope: &DeployScope, commands: &[CommandData]) -> Result<usize, PlatformError>;

    /// Allow or deny a command in one guild
    async fn set_command_permission(
        &self,
        guild_id: &str,
        command_name: &str,
        allowed: bool,
    ) -> Result<(), PlatformError>;
}

/// Callback bound to a platform event kind
pub type Listener = Arc<dyn Fn(Arc<PlatformEvent>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Opaque handle returned by [`EventSource::bind`], needed to remove the binding later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Source of platform events that listeners can be bound to
pub trait EventSource: Send + Sync {
    fn bind(&self, kind: EventKind, once: bool, listener: Listener) -> ListenerHandle;

    /// Remove exactly the listener behind `handle`. Returns false if it was already gone.
    fn unbind(&self, handle: ListenerHandle) -> bool;
}
