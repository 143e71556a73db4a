//! Slash command handling - registration, deployment, cooldowns and dispatch

pub mod cooldown;
pub mod manager;

pub use cooldown::CooldownTable;
pub use manager::{CommandManager, CommandSettings, InvocationOutcome, RegisteredCommand};
