//! Module manifest - `module.yaml` in each module directory

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::application::errors::ConfigError;
use crate::domain::entities::ModuleMetadata;

pub const MANIFEST_FILE: &str = "module.yaml";

/// Module metadata plus where its code lives
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModuleManifest {
    #[serde(flatten)]
    pub metadata: ModuleMetadata,

    /// Shared library relative to the module directory. Without one the module must be built in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<PathBuf>,
}

impl ModuleManifest {
    pub fn new(metadata: ModuleMetadata) -> Self {
        Self {
            metadata,
            library: None,
        }
    }

    pub fn with_library(mut self, library: impl Into<PathBuf>) -> Self {
        self.library = Some(library.into());
        self
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check the manifest against the directory it was found in
    pub fn validate(&self, dir_name: &str) -> Result<(), String> {
        let meta = &self.metadata;
        if meta.id != dir_name {
            return Err(format!(
                "Module id '{}' does not match directory name '{}'",
                meta.id, dir_name
            ));
        }
        if meta.name.trim().is_empty() {
            return Err("Module name is empty".to_string());
        }
        if meta.version.trim().is_empty() {
            return Err("Module version is empty".to_string());
        }
        if meta.dependencies.iter().any(|d| d == &meta.id) {
            return Err("Module depends on itself".to_string());
        }
        Ok(())
    }
}
