//! Application layer - The orchestration core
//! 
//! This layer contains:
//! - Dependency: Load order resolution
//! - Commands: Command registry, dispatch and cooldowns
//! - Events: Platform event listener bookkeeping
//! - Bus: Module-to-module events
//! - Cron: Scheduled jobs
//! - Orchestrator: Module lifecycle
//! - Errors: Domain-specific errors

pub mod bus;
pub mod commands;
pub mod cron;
pub mod dependency;
pub mod errors;
pub mod events;
pub mod orchestrator;
pub mod supervisor;
