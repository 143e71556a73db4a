//! Domain traits - Abstractions for modules and platform implementations

pub mod gate;
pub mod module;
pub mod platform;

pub use gate::GuildGate;
pub use module::{EventBinding, EventHandler, Module};
pub use platform::{CommandCatalog, DeployScope, EventSource, Listener, ListenerHandle, Responder};
