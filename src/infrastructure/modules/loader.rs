//! Module loader - instantiates modules from shared libraries or built-in factories
//!
//! Every library load goes through a fresh shadow copy named
//! `<id>-<pid>-<generation>-<file name>`, so a reload never gets the stale mapping back
//! from the OS loader.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use libloading::{Library, Symbol};
use tracing::{debug, info};

use super::registry::DiscoveredModule;
use crate::application::errors::OrchestratorError;
use crate::application::supervisor::contained;
use crate::domain::entities::CommandKind;
use crate::domain::traits::Module;

/// Symbol every module library exports, see [`declare_module!`](crate::declare_module)
pub const MODULE_INIT_SYMBOL: &str = "guildkit_module_init";

/// Signature of [`MODULE_INIT_SYMBOL`]. The double box keeps the pointer thin.
pub type ModuleInitFn = unsafe extern "C" fn() -> *mut Box<dyn Module>;

/// Builds a fresh instance of a compiled-in module
pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn Module> + Send + Sync>;

static GENERATION: AtomicU64 = AtomicU64::new(0);

/// A freshly instantiated and validated module
pub struct LoadedModule {
    instance: Arc<dyn Module>,
    library: Option<Arc<Library>>,
    shadow_path: Option<PathBuf>,
    generation: u64,
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("id", &self.id())
            .field("shadow_path", &self.shadow_path)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl LoadedModule {
    pub fn from_instance(instance: Arc<dyn Module>) -> Self {
        Self {
            instance,
            library: None,
            shadow_path: None,
            generation: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.instance.metadata().id
    }

    pub fn instance(&self) -> &Arc<dyn Module> {
        &self.instance
    }

    pub fn shadow_path(&self) -> Option<&Path> {
        self.shadow_path.as_deref()
    }

    /// Load generation. Zero for built-in modules.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }
}

/// Resolves and instantiates module entry points
pub struct ModuleLoader {
    shadow_dir: PathBuf,
    factories: RwLock<HashMap<String, ModuleFactory>>,
    /// Libraries stay mapped for the loader's lifetime; handlers from an unloaded instance
    /// may still be finishing.
    retained: Mutex<Vec<Arc<Library>>>,
}

impl ModuleLoader {
    pub fn new(shadow_dir: impl Into<PathBuf>) -> Self {
        Self {
            shadow_dir: shadow_dir.into(),
            factories: RwLock::new(HashMap::new()),
            retained: Mutex::new(Vec::new()),
        }
    }

    pub fn register_factory(&self, id: impl Into<String>, factory: ModuleFactory) {
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.into(), factory);
    }

    /// Instantiate a discovered module and validate what it exposes.
    ///
    /// Nothing is registered anywhere; a module that fails or panics here leaves no trace.
    pub fn load(&self, module: &DiscoveredModule) -> Result<LoadedModule, OrchestratorError> {
        if let Some(error) = &module.error {
            return Err(OrchestratorError::load(&module.id, error));
        }

        let loaded = if let Some(library) = module.library_path() {
            self.load_library(&module.id, &library)?
        } else {
            let factory = self
                .factories
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(&module.id)
                .cloned()
                .ok_or_else(|| OrchestratorError::load(&module.id, "No library and no built-in factory"))?;
            let instance = contained(|| factory()).map_err(|e| {
                OrchestratorError::load(&module.id, format!("Constructor failed: {}", e))
            })?;
            LoadedModule::from_instance(Arc::from(instance))
        };

        contained(|| validate_instance(&module.id, loaded.instance.as_ref()))
            .map_err(|e| OrchestratorError::load(&module.id, e))??;
        Ok(loaded)
    }

    fn load_library(&self, id: &str, library_path: &Path) -> Result<LoadedModule, OrchestratorError> {
        if !library_path.is_file() {
            return Err(OrchestratorError::load(
                id,
                format!("Library not found: {}", library_path.display()),
            ));
        }

        let generation = GENERATION.fetch_add(1, Ordering::SeqCst) + 1;
        let shadow_path = self.shadow_copy(id, library_path, generation)?;

        // SAFETY: loading a module library runs its initialisers; module libraries are trusted.
        let library = unsafe { Library::new(&shadow_path) }
            .map_err(|e| OrchestratorError::load(id, format!("Failed to load library: {}", e)))?;

        let instance = {
            // SAFETY: the symbol type matches what `declare_module!` exports.
            let init: Symbol<ModuleInitFn> = unsafe { library.get(MODULE_INIT_SYMBOL.as_bytes()) }
                .map_err(|e| {
                    OrchestratorError::load(id, format!("Missing entry symbol `{}`: {}", MODULE_INIT_SYMBOL, e))
                })?;

            // SAFETY: entry point is trusted by contract; null is checked below.
            let raw = unsafe { init() };
            if raw.is_null() {
                return Err(OrchestratorError::load(
                    id,
                    "Module init returned null (constructor panicked?)",
                ));
            }
            // SAFETY: `raw` came from `Box::into_raw` in `declare_module!` and is owned by us now.
            let boxed: Box<Box<dyn Module>> = unsafe { Box::from_raw(raw) };
            Arc::<dyn Module>::from(*boxed)
        };

        let library = Arc::new(library);
        self.retained
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&library));

        let removed = cleanup_stale_shadows(&self.shadow_dir, id, &shadow_path);
        if removed > 0 {
            debug!("Removed {} stale shadow cop(ies) of module {}", removed, id);
        }
        info!("Loaded module library {} (generation {})", library_path.display(), generation);

        Ok(LoadedModule {
            instance,
            library: Some(library),
            shadow_path: Some(shadow_path),
            generation,
        })
    }

    fn shadow_copy(&self, id: &str, library_path: &Path, generation: u64) -> Result<PathBuf, OrchestratorError> {
        let file_name = library_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| OrchestratorError::load(id, "Library path has no file name"))?;

        std::fs::create_dir_all(&self.shadow_dir)
            .map_err(|e| OrchestratorError::load(id, format!("Cannot create {}: {}", self.shadow_dir.display(), e)))?;

        let shadow_path = self.shadow_dir.join(shadow_file_name(id, generation, file_name));
        std::fs::copy(library_path, &shadow_path)
            .map_err(|e| OrchestratorError::load(id, format!("Cannot copy library: {}", e)))?;
        Ok(shadow_path)
    }
}

pub fn shadow_file_name(id: &str, generation: u64, file_name: &str) -> String {
    format!("{}-{}-{}-{}", id, std::process::id(), generation, file_name)
}

/// Delete shadow copies of `id` other than `keep`. Files that cannot be removed are skipped.
pub fn cleanup_stale_shadows(shadow_dir: &Path, id: &str, keep: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(shadow_dir) else {
        return 0;
    };
    let prefix = format!("{}-", id);

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path == keep || !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        // Another module whose id extends ours has no numeric pid here
        let mut parts = rest.splitn(3, '-');
        let pid_ok = parts.next().map(|p| p.parse::<u32>().is_ok()).unwrap_or(false);
        let generation_ok = parts.next().map(|g| g.parse::<u64>().is_ok()).unwrap_or(false);
        if !(pid_ok && generation_ok) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => debug!("Cannot remove stale shadow copy {}: {}", path.display(), e),
        }
    }
    removed
}

/// Reject instances that do not match their manifest or expose malformed commands
pub fn validate_instance(id: &str, module: &dyn Module) -> Result<(), OrchestratorError> {
    let metadata = module.metadata();
    if metadata.id != id {
        return Err(OrchestratorError::load(
            id,
            format!("Instance reports id '{}'", metadata.id),
        ));
    }

    let mut seen: HashSet<(CommandKind, String)> = HashSet::new();
    for command in module.commands() {
        command
            .data
            .validate()
            .map_err(|e| OrchestratorError::load(id, format!("Invalid command: {}", e)))?;
        if !seen.insert((command.data.kind, command.data.name.clone())) {
            return Err(OrchestratorError::load(
                id,
                format!("Duplicate command name '{}'", command.data.name),
            ));
        }
    }
    Ok(())
}

/// Export a module type from a shared library.
///
/// A constructor that panics makes the entry point return null instead of unwinding into the host.
///
/// ```ignore
/// guildkit::declare_module!(MusicModule::new);
/// ```
#[macro_export]
macro_rules! declare_module {
    ($constructor:path) => {
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn guildkit_module_init() -> *mut Box<dyn $crate::domain::traits::Module> {
            match ::std::panic::catch_unwind(|| {
                let module: Box<dyn $crate::domain::traits::Module> = Box::new($constructor());
                module
            }) {
                Ok(module) => Box::into_raw(Box::new(module)),
                Err(_) => ::std::ptr::null_mut(),
            }
        }
    };
}
