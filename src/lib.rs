//! guildkit - module orchestration runtime for guild-based chat bots
//!
//! Modules contribute commands, platform event listeners, bus subscriptions and cron jobs.
//! The [`ModuleHost`] loads them in dependency order, routes interactions and events to them,
//! and removes everything a module registered when it unloads.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod modules;

pub use application::bus::{BusMessage, EmitReport, ModuleEventBus};
pub use application::commands::{CommandManager, CommandSettings, InvocationOutcome};
pub use application::cron::{CronService, Schedule};
pub use application::errors::{ConfigError, CronError, HandlerError, OrchestratorError, PlatformError};
pub use application::events::{EventManager, ListenerTable};
pub use application::orchestrator::{LoadReport, ModuleContext, ModuleHost};
pub use domain::entities::{HandlerResult, ModuleMetadata};
pub use domain::traits::Module;
pub use infrastructure::config::Config;
