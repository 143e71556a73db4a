//! Module registry - discovers modules on disk and records their metadata

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, warn};

use super::manifest::{ModuleManifest, MANIFEST_FILE};
use crate::domain::entities::ModuleMetadata;

/// Where a module's code comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// A directory under the scan root
    Directory(PathBuf),
    /// Compiled into the host
    Builtin,
}

/// One scan result. Invalid modules carry the reason instead of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredModule {
    pub id: String,
    pub source: ModuleSource,
    pub manifest: Option<ModuleManifest>,
    pub error: Option<String>,
}

impl DiscoveredModule {
    fn valid(id: String, source: ModuleSource, manifest: ModuleManifest) -> Self {
        Self {
            id,
            source,
            manifest: Some(manifest),
            error: None,
        }
    }

    fn invalid(id: String, source: ModuleSource, error: impl Into<String>) -> Self {
        Self {
            id,
            source,
            manifest: None,
            error: Some(error.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.error.is_none() && self.manifest.is_some()
    }

    pub fn metadata(&self) -> Option<&ModuleMetadata> {
        self.manifest.as_ref().map(|m| &m.metadata)
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ModuleSource::Directory(path) => Some(path),
            ModuleSource::Builtin => None,
        }
    }

    /// Absolute path of the shared library, if the manifest names one
    pub fn library_path(&self) -> Option<PathBuf> {
        let library = self.manifest.as_ref()?.library.as_ref()?;
        Some(match self.path() {
            Some(dir) => dir.join(library),
            None => library.clone(),
        })
    }
}

/// Scans `root` for module directories, one module per immediate subdirectory
pub struct ModuleRegistry {
    root: PathBuf,
    builtins: RwLock<BTreeMap<String, ModuleManifest>>,
    discovered: RwLock<BTreeMap<String, DiscoveredModule>>,
}

impl ModuleRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            builtins: RwLock::new(BTreeMap::new()),
            discovered: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Make a compiled-in module discoverable. A directory with the same id takes precedence.
    pub fn register_builtin(&self, metadata: ModuleMetadata) {
        self.builtins
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(metadata.id.clone(), ModuleManifest::new(metadata));
    }

    /// Rescan the root. Invalid modules are recorded with a reason, never fatal.
    pub fn discover(&self) -> Vec<DiscoveredModule> {
        let mut found: BTreeMap<String, DiscoveredModule> = self
            .builtins
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, manifest)| {
                let module = DiscoveredModule::valid(id.clone(), ModuleSource::Builtin, manifest.clone());
                (id.clone(), module)
            })
            .collect();

        for dir in self.module_dirs() {
            let Some(id) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let module = Self::inspect(&id, &dir);
            if let Some(error) = &module.error {
                warn!("Invalid module in {}: {}", dir.display(), error);
            }
            found.insert(id, module);
        }

        debug!("Discovered {} module(s) in {}", found.len(), self.root.display());
        let modules: Vec<DiscoveredModule> = found.values().cloned().collect();
        *self.discovered.write().unwrap_or_else(|e| e.into_inner()) = found;
        modules
    }

    /// Re-read one module's manifest, e.g. before a reload
    pub fn refresh(&self, id: &str) -> Option<DiscoveredModule> {
        let dir = self.root.join(id);
        let module = if dir.join(MANIFEST_FILE).is_file() {
            Self::inspect(id, &dir)
        } else {
            let builtins = self.builtins.read().unwrap_or_else(|e| e.into_inner());
            let manifest = builtins.get(id)?.clone();
            DiscoveredModule::valid(id.to_string(), ModuleSource::Builtin, manifest)
        };

        self.discovered
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), module.clone());
        Some(module)
    }

    pub fn get(&self, id: &str) -> Option<DiscoveredModule> {
        self.read().get(id).cloned()
    }

    /// Metadata of every valid module from the last scan, ordered by id
    pub fn valid_metadata(&self) -> Vec<ModuleMetadata> {
        self.read()
            .values()
            .filter_map(|m| m.metadata().filter(|_| m.is_valid()).cloned())
            .collect()
    }

    pub fn invalid(&self) -> Vec<DiscoveredModule> {
        self.read().values().filter(|m| !m.is_valid()).cloned().collect()
    }

    fn inspect(id: &str, dir: &Path) -> DiscoveredModule {
        let source = ModuleSource::Directory(dir.to_path_buf());
        let manifest_path = dir.join(MANIFEST_FILE);

        if !manifest_path.is_file() {
            return DiscoveredModule::invalid(id.to_string(), source, format!("Missing {}", MANIFEST_FILE));
        }

        let manifest = match ModuleManifest::from_file(&manifest_path) {
            Ok(manifest) => manifest,
            Err(e) => {
                return DiscoveredModule::invalid(id.to_string(), source, format!("Bad {}: {}", MANIFEST_FILE, e))
            }
        };

        match manifest.validate(id) {
            Ok(()) => DiscoveredModule::valid(id.to_string(), source, manifest),
            Err(e) => DiscoveredModule::invalid(id.to_string(), source, e),
        }
    }

    fn module_dirs(&self) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read module directory {}: {}", self.root.display(), e);
                return Vec::new();
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(e) => {
                    warn!("Failed to read directory entry: {}", e);
                    None
                }
            })
            .filter(|path| path.is_dir())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| !n.starts_with('.'))
                    .unwrap_or(false)
            })
            .collect();
        dirs.sort();
        dirs
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, DiscoveredModule>> {
        self.discovered.read().unwrap_or_else(|e| e.into_inner())
    }
}
