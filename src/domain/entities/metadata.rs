//! Module metadata - the static declaration every module carries

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Static description of a module. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModuleMetadata {
    /// Unique, stable identifier (must match the module directory name)
    pub id: String,

    /// Human-readable name
    pub name: String,

    pub version: String,

    /// Core modules are always enabled and cannot be disabled per guild
    #[serde(default, rename = "core")]
    pub is_core: bool,

    /// Public modules may be listed to end users
    #[serde(default = "default_public", rename = "public")]
    pub is_public: bool,

    /// Modules that must be loaded before this one
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Informational only, never affects load order
    #[serde(default)]
    pub optional_dependencies: Vec<String>,

    /// Higher priority loads first among modules with equal topological rank
    #[serde(default)]
    pub priority: i32,

    /// Location of the module's schema migrations, relative to the module directory
    #[serde(default, rename = "migrations")]
    pub migrations_path: Option<PathBuf>,
}

fn default_public() -> bool {
    true
}

impl ModuleMetadata {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: version.into(),
            is_core: false,
            is_public: true,
            dependencies: Vec::new(),
            optional_dependencies: Vec::new(),
            priority: 0,
            migrations_path: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn with_optional_dependency(mut self, id: impl Into<String>) -> Self {
        self.optional_dependencies.push(id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn core(mut self) -> Self {
        self.is_core = true;
        self
    }

    pub fn private(mut self) -> Self {
        self.is_public = false;
        self
    }

    pub fn with_migrations(mut self, path: impl Into<PathBuf>) -> Self {
        self.migrations_path = Some(path.into());
        self
    }
}
