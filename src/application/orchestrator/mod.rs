//! Module orchestration - lifecycle of every loaded module

pub mod context;
pub mod host;

pub use context::{ModuleContext, ServiceMap};
pub use host::{LoadReport, ModuleHost, ModuleHostBuilder};
