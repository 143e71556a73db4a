//! Platform event routing into modules

pub mod listeners;
pub mod manager;

pub use listeners::ListenerTable;
pub use manager::{BoundListener, EventManager};
