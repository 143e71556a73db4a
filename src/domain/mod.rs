//! Domain layer - Core types with no knowledge of how they are hosted
//! 
//! This layer contains:
//! - Entities: Module metadata, commands, interactions, platform events
//! - Traits: Abstractions over the module contract and the host platform

pub mod entities;
pub mod traits;
