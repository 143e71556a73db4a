//! Modules compiled into the host binary

pub mod core;

pub use self::core::CoreModule;
