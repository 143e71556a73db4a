//! Infrastructure layer - External concerns
//! 
//! This layer contains:
//! - Config: Configuration loading
//! - Modules: Module discovery and library loading
//! - Storage: Per-guild module settings
//! - Adapters: Platform integrations (console)

pub mod adapters;
pub mod config;
pub mod modules;
pub mod storage;
