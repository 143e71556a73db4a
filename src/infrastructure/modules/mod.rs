//! Module discovery and loading
//!
//! Each module lives in its own directory under the modules root with a `module.yaml`
//! manifest. Code comes either from a shared library named by the manifest or from a
//! factory compiled into the host.

pub mod loader;
pub mod manifest;
pub mod registry;

pub use loader::{LoadedModule, ModuleFactory, ModuleInitFn, ModuleLoader, MODULE_INIT_SYMBOL};
pub use manifest::{ModuleManifest, MANIFEST_FILE};
pub use registry::{DiscoveredModule, ModuleRegistry, ModuleSource};
