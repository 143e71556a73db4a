//! Module host - drives discovery, load order and the lifecycle of every module

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::context::{ModuleContext, ServiceMap};
use crate::application::bus::ModuleEventBus;
use crate::application::commands::{CommandManager, CommandSettings, InvocationOutcome};
use crate::application::cron::CronService;
use crate::application::dependency;
use crate::application::errors::OrchestratorError;
use crate::application::events::{EventManager, ListenerTable};
use crate::application::supervisor::{contained, guarded};
use crate::domain::entities::{Interaction, ModuleMetadata};
use crate::domain::traits::{CommandCatalog, EventSource, GuildGate, Module, Responder};
use crate::infrastructure::config::Config;
use crate::infrastructure::modules::{
    DiscoveredModule, LoadedModule, ModuleFactory, ModuleLoader, ModuleRegistry,
};
use crate::infrastructure::storage::GuildModuleSettings;

/// Outcome of [`ModuleHost::load_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// In load order
    pub loaded: Vec<String>,
    /// Discovered but rejected before resolution, with the reason
    pub invalid: Vec<(String, String)>,
    /// Failed to load, with the cause
    pub failed: Vec<(String, String)>,
    /// Not attempted because a required dependency did not load
    pub skipped: Vec<String>,
}

#[derive(Default)]
struct HostState {
    loaded: HashMap<String, LoadedModule>,
    /// Ids of loaded modules in the order they were loaded
    order: Vec<String>,
}

impl HostState {
    fn loaded_ids(&self) -> Vec<String> {
        self.order.clone()
    }

    fn loaded_set(&self) -> HashSet<String> {
        self.order.iter().cloned().collect()
    }

    fn loaded_metadata(&self) -> Vec<ModuleMetadata> {
        self.order
            .iter()
            .filter_map(|id| self.loaded.get(id))
            .map(|l| l.instance().metadata().clone())
            .collect()
    }
}

/// Builds a [`ModuleHost`]
pub struct ModuleHostBuilder {
    config: Config,
    source: Option<Arc<dyn EventSource>>,
    catalog: Option<Arc<dyn CommandCatalog>>,
    gate: Option<Arc<dyn GuildGate>>,
    services: ServiceMap,
    builtins: Vec<(ModuleMetadata, ModuleFactory)>,
}

impl ModuleHostBuilder {
    /// Where platform listeners are bound. Defaults to an in-process [`ListenerTable`].
    pub fn with_event_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CommandCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Where per-guild enable state lives. Defaults to an in-memory [`GuildModuleSettings`].
    pub fn with_gate(mut self, gate: Arc<dyn GuildGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Make `service` available to modules through `ctx.service::<T>()`
    pub fn with_service<T: Any + Send + Sync>(mut self, service: Arc<T>) -> Self {
        self.services.insert(service);
        self
    }

    /// Register a compiled-in module
    pub fn with_builtin<F>(mut self, metadata: ModuleMetadata, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        let factory: ModuleFactory = Arc::new(factory);
        self.builtins.push((metadata, factory));
        self
    }

    pub fn build(self) -> ModuleHost {
        let gate: Arc<dyn GuildGate> = match self.gate {
            Some(gate) => gate,
            None => Arc::new(GuildModuleSettings::new()),
        };
        let source: Arc<dyn EventSource> = match self.source {
            Some(source) => source,
            None => Arc::new(ListenerTable::new()),
        };

        let mut commands = CommandManager::new(self.config.command_settings()).with_gate(gate.clone());
        if let Some(catalog) = self.catalog {
            commands = commands.with_catalog(catalog);
        }
        let events = EventManager::new(Arc::clone(&source)).with_gate(gate.clone());

        let registry = ModuleRegistry::new(self.config.modules.directory.clone());
        let loader = ModuleLoader::new(self.config.modules.shadow_directory.clone());
        for (metadata, factory) in self.builtins {
            loader.register_factory(metadata.id.clone(), factory);
            registry.register_builtin(metadata);
        }

        ModuleHost {
            registry,
            loader,
            commands: Arc::new(commands),
            events: Arc::new(events),
            bus: ModuleEventBus::new(),
            cron: CronService::new(self.config.cron_interval()),
            gate,
            source,
            services: self.services,
            state: Mutex::new(HostState::default()),
        }
    }
}

/// Owns every module instance and the components their registrations live in
pub struct ModuleHost {
    registry: ModuleRegistry,
    loader: ModuleLoader,
    commands: Arc<CommandManager>,
    events: Arc<EventManager>,
    bus: ModuleEventBus,
    cron: CronService,
    gate: Arc<dyn GuildGate>,
    source: Arc<dyn EventSource>,
    services: ServiceMap,
    /// Held for the whole of each lifecycle operation, so they never interleave
    state: Mutex<HostState>,
}

impl ModuleHost {
    pub fn builder(config: Config) -> ModuleHostBuilder {
        ModuleHostBuilder {
            config,
            source: None,
            catalog: None,
            gate: None,
            services: ServiceMap::new(),
            builtins: Vec::new(),
        }
    }

    /// Discover, resolve and load every module.
    ///
    /// Graph errors abort before anything loads. A module that fails to load is skipped
    /// along with everything that requires it.
    pub async fn load_all(&self) -> Result<LoadReport, OrchestratorError> {
        let mut state = self.state.lock().await;
        let mut report = LoadReport::default();

        for module in self.registry.discover() {
            if let Some(reason) = module.error {
                warn!("Skipping invalid module {}: {}", module.id, reason);
                report.invalid.push((module.id, reason));
            }
        }

        let candidates: Vec<ModuleMetadata> = self
            .registry
            .valid_metadata()
            .into_iter()
            .filter(|m| !state.loaded.contains_key(&m.id))
            .chain(state.loaded.values().map(|l| l.instance().metadata().clone()))
            .collect();
        let resolution = dependency::resolve(&candidates)?;
        info!("Module load order: {}", resolution.load_order.join(", "));

        for id in &resolution.load_order {
            if state.loaded.contains_key(id) {
                continue;
            }
            let Some(module) = self.registry.get(id) else {
                continue;
            };
            match self.load_into(&mut state, &module, false).await {
                Ok(()) => report.loaded.push(id.clone()),
                Err(OrchestratorError::DependencyNotLoaded { missing, .. }) => {
                    warn!("Skipping module {}: required module(s) not loaded: {}", id, missing.join(", "));
                    report.skipped.push(id.clone());
                }
                Err(e) => {
                    error!("{}", e);
                    report.failed.push((id.clone(), e.to_string()));
                }
            }
        }
        drop(state);

        self.deploy().await;
        info!(
            "Loaded {} module(s), {} failed, {} skipped, {} invalid",
            report.loaded.len(),
            report.failed.len(),
            report.skipped.len(),
            report.invalid.len()
        );
        Ok(report)
    }

    /// Load one module whose dependencies are already loaded
    pub async fn load_module(&self, id: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().await;
        let module = self
            .registry
            .refresh(id)
            .ok_or_else(|| OrchestratorError::load(id, "Module not found"))?;
        self.load_into(&mut state, &module, true).await
    }

    /// Tear a module down and remove everything it registered
    pub async fn unload_module(&self, id: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().await;
        let loaded = state
            .loaded
            .remove(id)
            .ok_or_else(|| OrchestratorError::NotLoaded(id.to_string()))?;
        state.order.retain(|m| m != id);

        // Built from what is loaded now, which may already lack other dependencies
        let dependents = dependency::dependents_of(&state.loaded_metadata());
        let affected = dependency::affected_modules(id, &dependents);
        if !affected.is_empty() {
            warn!(
                "Unloading {} leaves dependent module(s) without it: {}",
                id,
                affected.join(", ")
            );
        }

        self.deactivate(id, &loaded, true).await;
        info!("Unloaded module {}", id);
        Ok(())
    }

    /// Replace a loaded module with a fresh instance.
    ///
    /// The fresh instance is loaded and validated first; if that fails the old one keeps
    /// running. Otherwise the old instance is torn down completely before the new one starts.
    pub async fn reload_module(&self, id: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().await;
        if !state.loaded.contains_key(id) {
            return Err(OrchestratorError::NotLoaded(id.to_string()));
        }

        let module = self
            .registry
            .refresh(id)
            .ok_or_else(|| OrchestratorError::load(id, "Module not found"))?;
        let fresh = self.loader.load(&module)?;

        let others: HashSet<String> = state.order.iter().filter(|m| *m != id).cloned().collect();
        let check = dependency::check_dependencies(id, &fresh.instance().metadata().dependencies, &others);
        if !check.satisfied {
            return Err(OrchestratorError::DependencyNotLoaded {
                module_id: id.to_string(),
                missing: check.missing,
            });
        }

        if let Some(old) = state.loaded.remove(id) {
            self.deactivate(id, &old, false).await;
        }

        let position = state.order.iter().position(|m| m == id);
        state.order.retain(|m| m != id);
        let generation = fresh.generation();
        if let Err(e) = self.activate(&mut state, fresh, true).await {
            error!("Module {} failed to start after reload and is now unloaded", id);
            return Err(e);
        }
        // Keep the module's original place in the load order
        if let Some(position) = position {
            if let Some(current) = state.order.iter().position(|m| m == id) {
                let moved = state.order.remove(current);
                let len = state.order.len();
                state.order.insert(position.min(len), moved);
            }
        }

        info!("Reloaded module {} (generation {})", id, generation);
        Ok(())
    }

    /// Unload everything in reverse load order
    pub async fn unload_all(&self) -> usize {
        let mut state = self.state.lock().await;
        let order: Vec<String> = state.order.drain(..).rev().collect();
        let mut count = 0;
        for id in order {
            if let Some(loaded) = state.loaded.remove(&id) {
                self.deactivate(&id, &loaded, false).await;
                count += 1;
            }
        }
        drop(state);

        self.deploy().await;
        info!("Unloaded {} module(s)", count);
        count
    }

    pub async fn enable_module(&self, id: &str, guild_id: &str) -> Result<(), OrchestratorError> {
        let instance = self.instance(id).await?;

        if self.gate.set_module_enabled(id, guild_id, true).await {
            if let Err(e) = guarded(instance.on_enable(guild_id)).await {
                warn!("on_enable of module {} failed in guild {}: {}", id, guild_id, e);
            }
        }
        self.commands.set_module_commands_enabled(id, guild_id, true).await;
        info!("Enabled module {} in guild {}", id, guild_id);
        Ok(())
    }

    pub async fn disable_module(&self, id: &str, guild_id: &str) -> Result<(), OrchestratorError> {
        let instance = self.instance(id).await?;
        if instance.metadata().is_core {
            return Err(OrchestratorError::CoreModule(id.to_string()));
        }

        if self.gate.set_module_enabled(id, guild_id, false).await {
            if let Err(e) = guarded(instance.on_disable(guild_id)).await {
                warn!("on_disable of module {} failed in guild {}: {}", id, guild_id, e);
            }
        }
        self.commands.set_module_commands_enabled(id, guild_id, false).await;
        info!("Disabled module {} in guild {}", id, guild_id);
        Ok(())
    }

    pub async fn is_module_enabled(&self, id: &str, guild_id: &str) -> bool {
        self.gate.is_module_enabled(id, guild_id).await
    }

    /// Route an inbound interaction to its command
    pub async fn handle_interaction(
        &self,
        interaction: Interaction,
        responder: Arc<dyn Responder>,
    ) -> InvocationOutcome {
        self.commands.handle_interaction(interaction, responder).await
    }

    /// Metadata of loaded modules in load order
    pub async fn loaded_modules(&self) -> Vec<ModuleMetadata> {
        self.state.lock().await.loaded_metadata()
    }

    pub async fn is_loaded(&self, id: &str) -> bool {
        self.state.lock().await.loaded.contains_key(id)
    }

    pub async fn load_order(&self) -> Vec<String> {
        self.state.lock().await.loaded_ids()
    }

    /// Scan the module directory without loading anything
    pub fn discover(&self) -> Vec<DiscoveredModule> {
        self.registry.discover()
    }

    pub fn commands(&self) -> &Arc<CommandManager> {
        &self.commands
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn event_source(&self) -> &Arc<dyn EventSource> {
        &self.source
    }

    pub fn bus(&self) -> &ModuleEventBus {
        &self.bus
    }

    pub fn cron(&self) -> &CronService {
        &self.cron
    }

    pub fn command_settings(&self) -> &CommandSettings {
        self.commands.settings()
    }

    async fn instance(&self, id: &str) -> Result<Arc<dyn Module>, OrchestratorError> {
        self.state
            .lock()
            .await
            .loaded
            .get(id)
            .map(|l| Arc::clone(l.instance()))
            .ok_or_else(|| OrchestratorError::NotLoaded(id.to_string()))
    }

    fn context(&self, id: &str) -> ModuleContext {
        ModuleContext::new(id, self.bus.clone(), self.cron.clone(), self.services.clone())
    }

    async fn load_into(
        &self,
        state: &mut HostState,
        module: &DiscoveredModule,
        redeploy: bool,
    ) -> Result<(), OrchestratorError> {
        let id = module.id.as_str();
        if state.loaded.contains_key(id) {
            return Err(OrchestratorError::AlreadyLoaded(id.to_string()));
        }

        if let Some(metadata) = module.metadata() {
            let check = dependency::check_dependencies(id, &metadata.dependencies, &state.loaded_set());
            if !check.satisfied {
                return Err(OrchestratorError::DependencyNotLoaded {
                    module_id: id.to_string(),
                    missing: check.missing,
                });
            }
        }

        let loaded = self.loader.load(module)?;
        self.activate(state, loaded, redeploy).await
    }

    /// Run `on_load`, then register commands and events
    async fn activate(
        &self,
        state: &mut HostState,
        loaded: LoadedModule,
        redeploy: bool,
    ) -> Result<(), OrchestratorError> {
        let id = loaded.id().to_string();
        let instance = Arc::clone(loaded.instance());
        let ctx = self.context(&id);

        if let Err(e) = guarded(instance.on_load(&ctx)).await {
            // Drop whatever on_load managed to register
            self.bus.unsubscribe_all(&id);
            self.cron.unregister_all_for_module(&id);
            return Err(OrchestratorError::load(&id, e));
        }

        let (definitions, bindings) = match contained(|| (instance.commands(), instance.events())) {
            Ok(exposed) => exposed,
            Err(e) => {
                if let Err(unload) = guarded(instance.on_unload()).await {
                    warn!("on_unload of module {} failed: {}", id, unload);
                }
                self.bus.unsubscribe_all(&id);
                self.cron.unregister_all_for_module(&id);
                return Err(OrchestratorError::load(&id, e));
            }
        };
        let commands = self
            .commands
            .register_module_commands(&id, definitions, redeploy)
            .await;
        let listeners = self.events.register_module_events(&id, bindings);

        let metadata = instance.metadata();
        info!(
            "Loaded module {} v{} ({} command(s), {} listener(s))",
            metadata.name, metadata.version, commands, listeners
        );
        state.order.push(id.clone());
        state.loaded.insert(id, loaded);
        Ok(())
    }

    /// Run `on_unload`, then remove commands, listeners, subscriptions and jobs
    async fn deactivate(&self, id: &str, loaded: &LoadedModule, redeploy: bool) {
        if let Err(e) = guarded(loaded.instance().on_unload()).await {
            warn!("on_unload of module {} failed: {}", id, e);
        }

        self.commands.unregister_module_commands(id, redeploy).await;
        self.events.cleanup_module(id);
        self.bus.unsubscribe_all(id);
        let orphaned = self.cron.unregister_all_for_module(id);
        if orphaned > 0 {
            warn!("Module {} left {} cron job(s) registered after unload", id, orphaned);
        }
        debug!("Deactivated module {}", id);
    }

    async fn deploy(&self) {
        if !self.commands.settings().auto_deploy {
            return;
        }
        if let Err(e) = self.commands.deploy_commands().await {
            error!("Failed to deploy commands: {}", e);
        }
    }
}
