//! Command manager - owns the command table and routes interactions to handlers

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::cooldown::CooldownTable;
use crate::application::errors::PlatformError;
use crate::application::supervisor::guarded;
use crate::domain::entities::{
    missing_permissions, AutocompleteChoice, CommandContext, CommandData, CommandDefinition,
    CommandKind, Interaction, InteractionKind, Permission, Reply,
};
use crate::domain::traits::{CommandCatalog, DeployScope, GuildGate, Responder};

const MAX_AUTOCOMPLETE_CHOICES: usize = 25;

/// A command in the table, with the module that registered it
#[derive(Debug, Clone)]
pub struct RegisteredCommand {
    pub definition: CommandDefinition,
    /// `None` for commands registered by the host itself, which are never gated
    pub module_id: Option<String>,
}

impl RegisteredCommand {
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn kind(&self) -> CommandKind {
        self.definition.data.kind
    }
}

/// Settings for deployment and user-facing replies
#[derive(Debug, Clone)]
pub struct CommandSettings {
    /// Deploy to this guild only (instant propagation) instead of globally
    pub dev_guild_id: Option<String>,
    /// Redeploy the schema set whenever module commands change
    pub auto_deploy: bool,
    pub error_message: String,
    pub disabled_message: String,
    pub guild_only_message: String,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            dev_guild_id: None,
            auto_deploy: true,
            error_message: "There was an error while executing this command.".to_string(),
            disabled_message: "This module is disabled in this server.".to_string(),
            guild_only_message: "This command can only be used in a server.".to_string(),
        }
    }
}

/// What happened to one interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// No command with that name; ignored
    Unknown,
    ModuleDisabled,
    GuildOnly,
    OnCooldown { remaining: Duration },
    MissingPermissions(Vec<Permission>),
    Completed,
    /// The handler failed; the user got the generic error reply
    Failed,
}

/// Chat-input and context-menu commands live in separate namespaces, as on the platform
type CommandKey = (CommandKind, String);

#[derive(Default)]
struct CommandTable {
    by_key: HashMap<CommandKey, Arc<RegisteredCommand>>,
    by_module: HashMap<String, Vec<CommandKey>>,
}

impl CommandTable {
    fn insert(&mut self, command: RegisteredCommand) {
        let key = (command.kind(), command.name().to_string());

        if let Some(previous) = self.by_key.get(&key) {
            warn!(
                "Command '{}' from {} overrides the one from {}",
                key.1,
                command.module_id.as_deref().unwrap_or("host"),
                previous.module_id.as_deref().unwrap_or("host")
            );
            if let Some(owner) = previous.module_id.clone() {
                if let Some(keys) = self.by_module.get_mut(&owner) {
                    keys.retain(|k| k != &key);
                }
            }
        }

        if let Some(module_id) = &command.module_id {
            let keys = self.by_module.entry(module_id.clone()).or_default();
            if !keys.contains(&key) {
                keys.push(key.clone());
            }
        }
        self.by_key.insert(key, Arc::new(command));
    }
}

/// Owns the name -> handler table, cooldowns, gating and schema deployment
pub struct CommandManager {
    table: RwLock<CommandTable>,
    cooldowns: CooldownTable,
    gate: Option<Arc<dyn GuildGate>>,
    catalog: Option<Arc<dyn CommandCatalog>>,
    settings: CommandSettings,
}

impl CommandManager {
    pub fn new(settings: CommandSettings) -> Self {
        Self {
            table: RwLock::new(CommandTable::default()),
            cooldowns: CooldownTable::new(),
            gate: None,
            catalog: None,
            settings,
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn GuildGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CommandCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn settings(&self) -> &CommandSettings {
        &self.settings
    }

    /// Register a host-level command that does not belong to any module
    pub fn register_command(&self, definition: CommandDefinition) -> bool {
        if let Err(e) = definition.data.validate() {
            warn!("Skipping invalid command: {}", e);
            return false;
        }
        self.write_table().insert(RegisteredCommand {
            definition,
            module_id: None,
        });
        true
    }

    /// Store every command of a module, replacing same-named entries.
    ///
    /// With `redeploy` (and auto-deploy enabled) the full schema set is pushed afterwards.
    pub async fn register_module_commands(
        &self,
        module_id: &str,
        commands: Vec<CommandDefinition>,
        redeploy: bool,
    ) -> usize {
        let count = commands.len();
        {
            let mut table = self.write_table();
            table.by_module.entry(module_id.to_string()).or_default();
            for definition in commands {
                table.insert(RegisteredCommand {
                    definition,
                    module_id: Some(module_id.to_string()),
                });
            }
        }
        debug!("Registered {} command(s) for module {}", count, module_id);

        if redeploy {
            self.redeploy().await;
        }
        count
    }

    /// Remove all commands and cooldowns of a module
    pub async fn unregister_module_commands(&self, module_id: &str, redeploy: bool) -> usize {
        let keys = {
            let mut table = self.write_table();
            let keys = table.by_module.remove(module_id).unwrap_or_default();
            for key in &keys {
                let owned = table
                    .by_key
                    .get(key)
                    .map(|c| c.module_id.as_deref() == Some(module_id))
                    .unwrap_or(false);
                if owned {
                    table.by_key.remove(key);
                }
            }
            keys
        };

        for (kind, name) in &keys {
            if *kind == CommandKind::ChatInput {
                self.cooldowns.clear_command(name);
            }
        }
        debug!("Unregistered {} command(s) for module {}", keys.len(), module_id);

        if redeploy {
            self.redeploy().await;
        }
        keys.len()
    }

    async fn redeploy(&self) {
        if !self.settings.auto_deploy {
            return;
        }
        if let Err(e) = self.deploy_commands().await {
            error!("Failed to deploy commands: {}", e);
        }
    }

    /// Push the full schema set to the catalog, replacing what is there
    pub async fn deploy_commands(&self) -> Result<usize, PlatformError> {
        let Some(catalog) = &self.catalog else {
            debug!("No command catalog configured, skipping deployment");
            return Ok(0);
        };

        let scope = match &self.settings.dev_guild_id {
            Some(guild_id) => DeployScope::Guild(guild_id.clone()),
            None => DeployScope::Global,
        };
        let schemas = self.schemas();

        let deployed = catalog.deploy(&scope, &schemas).await?;
        info!("Deployed {} command(s) to {}", deployed, scope);
        if scope == DeployScope::Global {
            info!("Global commands may take a while to propagate");
        }
        Ok(deployed)
    }

    /// Allow or deny a module's commands in one guild. Failures are logged and ignored.
    pub async fn set_module_commands_enabled(&self, module_id: &str, guild_id: &str, enabled: bool) {
        let Some(catalog) = &self.catalog else {
            return;
        };

        for name in self.module_command_names(module_id) {
            if let Err(e) = catalog.set_command_permission(guild_id, &name, enabled).await {
                debug!(
                    "Could not update permissions of '{}' in guild {}: {}",
                    name, guild_id, e
                );
            }
        }
    }

    /// Route an interaction by its kind
    pub async fn handle_interaction(
        &self,
        interaction: Interaction,
        responder: Arc<dyn Responder>,
    ) -> InvocationOutcome {
        match interaction.kind {
            InteractionKind::ChatInput => self.invoke(interaction, responder).await,
            InteractionKind::Autocomplete => self.handle_autocomplete(interaction, responder).await,
            InteractionKind::UserContextMenu | InteractionKind::MessageContextMenu => {
                self.handle_context_menu(interaction, responder).await
            }
        }
    }

    /// Run a chat-input command through gating, cooldown and permission checks
    pub async fn invoke(&self, interaction: Interaction, responder: Arc<dyn Responder>) -> InvocationOutcome {
        let Some(command) = self.get(&interaction.command_name) else {
            debug!("Unknown command: {}", interaction.command_name);
            return InvocationOutcome::Unknown;
        };
        let definition = &command.definition;

        if !self.is_enabled_for(&command, &interaction).await {
            self.send(&responder, &self.settings.disabled_message).await;
            return InvocationOutcome::ModuleDisabled;
        }

        if definition.guild_only && interaction.guild_id.is_none() {
            self.send(&responder, &self.settings.guild_only_message).await;
            return InvocationOutcome::GuildOnly;
        }

        if let Some(window) = definition.cooldown {
            if let Err(remaining) = self.cooldowns.try_start(command.name(), &interaction.user.id, window) {
                let message = format!(
                    "Please wait {:.1} more second(s) before reusing `/{}`.",
                    remaining.as_secs_f64(),
                    command.name()
                );
                self.send(&responder, &message).await;
                return InvocationOutcome::OnCooldown { remaining };
            }
        }

        if !definition.required_permissions.is_empty() {
            if let Some(granted) = &interaction.member_permissions {
                let missing = missing_permissions(&definition.required_permissions, granted);
                if !missing.is_empty() {
                    let list: Vec<&str> = missing.iter().map(Permission::label).collect();
                    let message = format!(
                        "You need the following permissions to use this command: {}",
                        list.join(", ")
                    );
                    self.send(&responder, &message).await;
                    return InvocationOutcome::MissingPermissions(missing);
                }
            }
        }

        if let Some(mode) = definition.defer {
            if let Err(e) = responder.defer(mode.ephemeral).await {
                warn!("Failed to defer /{}: {}", command.name(), e);
            }
        }

        self.execute(&command, interaction, responder).await
    }

    /// Context-menu commands are gated but skip cooldown, permission and defer handling
    pub async fn handle_context_menu(
        &self,
        interaction: Interaction,
        responder: Arc<dyn Responder>,
    ) -> InvocationOutcome {
        let kind = interaction.kind.command_kind();
        let Some(command) = self.get_kind(kind, &interaction.command_name) else {
            debug!("Unknown context menu command: {}", interaction.command_name);
            return InvocationOutcome::Unknown;
        };

        if !self.is_enabled_for(&command, &interaction).await {
            self.send(&responder, &self.settings.disabled_message).await;
            return InvocationOutcome::ModuleDisabled;
        }

        self.execute(&command, interaction, responder).await
    }

    /// Autocomplete never surfaces errors; anything going wrong yields an empty list
    pub async fn handle_autocomplete(
        &self,
        interaction: Interaction,
        responder: Arc<dyn Responder>,
    ) -> InvocationOutcome {
        let Some(command) = self.get(&interaction.command_name) else {
            debug!("Autocomplete for unknown command: {}", interaction.command_name);
            Self::suggest(&responder, Vec::new()).await;
            return InvocationOutcome::Unknown;
        };

        if !self.is_enabled_for(&command, &interaction).await {
            Self::suggest(&responder, Vec::new()).await;
            return InvocationOutcome::ModuleDisabled;
        }

        let Some(handler) = command.definition.autocomplete.clone() else {
            Self::suggest(&responder, Vec::new()).await;
            return InvocationOutcome::Completed;
        };

        let mut choices = Vec::new();
        let result = guarded(async {
            choices = handler.suggest(interaction).await?;
            Ok(())
        })
        .await;

        match result {
            Ok(()) => {
                choices.truncate(MAX_AUTOCOMPLETE_CHOICES);
                Self::suggest(&responder, choices).await;
                InvocationOutcome::Completed
            }
            Err(e) => {
                debug!("Autocomplete for /{} failed: {}", command.name(), e);
                Self::suggest(&responder, Vec::new()).await;
                InvocationOutcome::Failed
            }
        }
    }

    async fn execute(
        &self,
        command: &RegisteredCommand,
        interaction: Interaction,
        responder: Arc<dyn Responder>,
    ) -> InvocationOutcome {
        let ctx = CommandContext::new(interaction, Arc::clone(&responder));
        match guarded(command.definition.handler.handle(ctx)).await {
            Ok(()) => InvocationOutcome::Completed,
            Err(e) => {
                error!("Error executing command {}: {}", command.name(), e);
                self.send(&responder, &self.settings.error_message).await;
                InvocationOutcome::Failed
            }
        }
    }

    async fn is_enabled_for(&self, command: &RegisteredCommand, interaction: &Interaction) -> bool {
        match (&self.gate, &command.module_id, &interaction.guild_id) {
            (Some(gate), Some(module_id), Some(guild_id)) => gate.is_module_enabled(module_id, guild_id).await,
            _ => true,
        }
    }

    /// Ephemeral reply, or an edit when the interaction was already acknowledged
    async fn send(&self, responder: &Arc<dyn Responder>, content: &str) {
        let result = if responder.is_deferred() || responder.is_replied() {
            responder.edit_reply(content.to_string()).await
        } else {
            responder.reply(Reply::ephemeral(content)).await
        };
        if let Err(e) = result {
            warn!("Failed to reply to interaction: {}", e);
        }
    }

    async fn suggest(responder: &Arc<dyn Responder>, choices: Vec<AutocompleteChoice>) {
        if let Err(e) = responder.respond_autocomplete(choices).await {
            debug!("Failed to send autocomplete response: {}", e);
        }
    }

    /// Chat-input command called `name`
    pub fn get(&self, name: &str) -> Option<Arc<RegisteredCommand>> {
        self.get_kind(CommandKind::ChatInput, name)
    }

    pub fn get_kind(&self, kind: CommandKind, name: &str) -> Option<Arc<RegisteredCommand>> {
        self.read_table().by_key.get(&(kind, name.to_string())).cloned()
    }

    /// Every registered command name, sorted. A name used by several kinds appears once.
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.read_table().by_key.keys().map(|(_, n)| n.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn module_command_names(&self, module_id: &str) -> Vec<String> {
        let table = self.read_table();
        let mut names: Vec<String> = Vec::new();
        for (_, name) in table.by_module.get(module_id).into_iter().flatten() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Schema of every registered command, sorted by name
    pub fn schemas(&self) -> Vec<CommandData> {
        let table = self.read_table();
        let mut schemas: Vec<CommandData> = table
            .by_key
            .values()
            .map(|c| c.definition.data.clone())
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn cooldown_count(&self) -> usize {
        self.cooldowns.len()
    }

    pub fn len(&self) -> usize {
        self.read_table().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, CommandTable> {
        self.table.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_table(&self) -> std::sync::RwLockWriteGuard<'_, CommandTable> {
        self.table.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::errors::HandlerError;
    use crate::domain::entities::{CommandOption, OptionType, User};
    use crate::infrastructure::adapters::console::{ConsoleCatalog, ConsoleResponder};
    use crate::infrastructure::storage::GuildModuleSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ping(reply: &'static str) -> CommandDefinition {
        CommandDefinition::new(CommandData::chat_input("ping", "Ping"), move |ctx| async move {
            ctx.reply(reply).await?;
            Ok(())
        })
    }

    fn chat(name: &str) -> Interaction {
        Interaction::chat_input(name, User::new("u1")).with_guild("g1")
    }

    #[tokio::test]
    async fn test_unknown_command_is_ignored() {
        let manager = CommandManager::new(CommandSettings::default());
        let responder = Arc::new(ConsoleResponder::new());

        let outcome = manager.invoke(chat("nope"), responder.clone()).await;
        assert_eq!(outcome, InvocationOutcome::Unknown);
        assert!(responder.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let manager = CommandManager::new(CommandSettings::default());
        manager.register_module_commands("first", vec![ping("first")], false).await;
        manager.register_module_commands("second", vec![ping("second")], false).await;

        let responder = Arc::new(ConsoleResponder::new());
        let outcome = manager.invoke(chat("ping"), responder.clone()).await;

        assert_eq!(outcome, InvocationOutcome::Completed);
        assert_eq!(responder.last_content().as_deref(), Some("second"));
        assert_eq!(manager.get("ping").unwrap().module_id.as_deref(), Some("second"));
        assert!(manager.module_command_names("first").is_empty());
        assert_eq!(manager.module_command_names("second"), vec!["ping"]);
    }

    #[tokio::test]
    async fn test_unregister_only_removes_owned_commands() {
        let manager = CommandManager::new(CommandSettings::default());
        manager.register_module_commands("first", vec![ping("first")], false).await;
        manager.register_module_commands("second", vec![ping("second")], false).await;

        assert_eq!(manager.unregister_module_commands("first", false).await, 0);
        assert!(manager.get("ping").is_some());

        assert_eq!(manager.unregister_module_commands("second", false).await, 1);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_guild_only() {
        let manager = CommandManager::new(CommandSettings::default());
        manager.register_command(ping("pong").guild_only());

        let responder = Arc::new(ConsoleResponder::new());
        let dm = Interaction::chat_input("ping", User::new("u1"));
        assert_eq!(manager.invoke(dm, responder.clone()).await, InvocationOutcome::GuildOnly);
        let reply = responder.last_reply().unwrap();
        assert!(reply.ephemeral);
        assert!(reply.content.contains("server"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown() {
        let manager = CommandManager::new(CommandSettings::default());
        manager.register_command(ping("pong").with_cooldown_secs(10));

        let responder = Arc::new(ConsoleResponder::new());
        assert_eq!(manager.invoke(chat("ping"), responder.clone()).await, InvocationOutcome::Completed);

        let outcome = manager.invoke(chat("ping"), responder.clone()).await;
        assert_eq!(
            outcome,
            InvocationOutcome::OnCooldown {
                remaining: Duration::from_secs(10)
            }
        );
        assert!(responder.last_content().unwrap().contains("10.0"));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(manager.invoke(chat("ping"), responder.clone()).await, InvocationOutcome::Completed);

        // The window restarted
        tokio::time::advance(Duration::from_millis(2500)).await;
        match manager.invoke(chat("ping"), responder.clone()).await {
            InvocationOutcome::OnCooldown { remaining } => {
                assert_eq!(remaining, Duration::from_millis(7500));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(responder.last_content().unwrap().contains("7.5"));
    }

    #[tokio::test]
    async fn test_missing_permissions() {
        let manager = CommandManager::new(CommandSettings::default());
        manager.register_command(
            ping("banned")
                .with_permission(Permission::BanMembers)
                .with_permission(Permission::KickMembers),
        );

        let responder = Arc::new(ConsoleResponder::new());
        let interaction = chat("ping").with_permissions([Permission::KickMembers]);
        let outcome = manager.invoke(interaction, responder.clone()).await;

        assert_eq!(outcome, InvocationOutcome::MissingPermissions(vec![Permission::BanMembers]));
        assert!(responder.last_content().unwrap().contains("Ban Members"));

        // Unknown caller permissions skip the check
        let outcome = manager.invoke(chat("ping"), responder.clone()).await;
        assert_eq!(outcome, InvocationOutcome::Completed);
    }

    #[tokio::test]
    async fn test_handler_error_replies_generic_message() {
        let manager = CommandManager::new(CommandSettings::default());
        manager.register_command(CommandDefinition::new(
            CommandData::chat_input("explode", "Explode"),
            |_ctx| async { Err(HandlerError::failed("database unreachable")) },
        ));

        let responder = Arc::new(ConsoleResponder::new());
        let outcome = manager.invoke(chat("explode"), responder.clone()).await;

        assert_eq!(outcome, InvocationOutcome::Failed);
        let reply = responder.last_reply().unwrap();
        assert!(reply.ephemeral);
        assert_eq!(reply.content, CommandSettings::default().error_message);
    }

    #[tokio::test]
    async fn test_panic_after_defer_edits_reply() {
        let manager = CommandManager::new(CommandSettings::default());
        manager.register_command(
            CommandDefinition::new(CommandData::chat_input("slow", "Slow"), |_ctx| async {
                if true {
                    panic!("handler bug");
                }
                Ok(())
            })
            .deferred(true),
        );

        let responder = Arc::new(ConsoleResponder::new());
        let outcome = manager.invoke(chat("slow"), responder.clone()).await;

        assert_eq!(outcome, InvocationOutcome::Failed);
        assert!(responder.is_deferred());
        let transcript = responder.transcript();
        assert_eq!(transcript.len(), 1);
        assert!(transcript[0].edited);
    }

    #[tokio::test]
    async fn test_module_disabled_for_one_guild_only() {
        let gate = Arc::new(GuildModuleSettings::new());
        let manager = CommandManager::new(CommandSettings::default()).with_gate(gate.clone());
        manager.register_module_commands("fun", vec![ping("pong")], false).await;
        gate.disable("fun", "g1").await;

        let responder = Arc::new(ConsoleResponder::new());
        assert_eq!(manager.invoke(chat("ping"), responder.clone()).await, InvocationOutcome::ModuleDisabled);

        let other = Interaction::chat_input("ping", User::new("u1")).with_guild("g2");
        assert_eq!(manager.invoke(other, responder.clone()).await, InvocationOutcome::Completed);

        // No guild context means no gating
        let dm = Interaction::chat_input("ping", User::new("u1"));
        assert_eq!(manager.invoke(dm, responder.clone()).await, InvocationOutcome::Completed);
    }

    #[tokio::test]
    async fn test_autocomplete() {
        let gate = Arc::new(GuildModuleSettings::new());
        let manager = CommandManager::new(CommandSettings::default()).with_gate(gate.clone());
        let shop = CommandDefinition::new(
            CommandData::chat_input("shop", "Shop").with_option(
                CommandOption::new("item", "Item", OptionType::String).with_autocomplete(),
            ),
            |_ctx| async { Ok(()) },
        )
        .with_autocomplete(|interaction: Interaction| async move {
            let typed = interaction.focused_value().unwrap_or_default().to_string();
            if typed == "fail" {
                return Err(HandlerError::failed("lookup failed"));
            }
            Ok(vec![AutocompleteChoice::new(format!("{} sword", typed), "sword")])
        });
        manager.register_module_commands("economy", vec![shop], false).await;

        let responder = Arc::new(ConsoleResponder::new());
        let typing = |value: &str| {
            Interaction::autocomplete("shop", User::new("u1"), "item")
                .with_guild("g1")
                .with_option("item", value)
        };

        assert_eq!(
            manager.handle_interaction(typing("iron"), responder.clone()).await,
            InvocationOutcome::Completed
        );
        assert_eq!(responder.last_choices().unwrap()[0].name, "iron sword");

        assert_eq!(
            manager.handle_interaction(typing("fail"), responder.clone()).await,
            InvocationOutcome::Failed
        );
        assert!(responder.last_choices().unwrap().is_empty());

        gate.disable("economy", "g1").await;
        assert_eq!(
            manager.handle_interaction(typing("iron"), responder.clone()).await,
            InvocationOutcome::ModuleDisabled
        );
        assert!(responder.last_choices().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_menu_skips_cooldown() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let manager = CommandManager::new(CommandSettings::default());
        manager.register_command(
            CommandDefinition::new(CommandData::user_menu("Profile"), move |_ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .with_cooldown_secs(30),
        );

        let responder = Arc::new(ConsoleResponder::new());
        for _ in 0..3 {
            let interaction = Interaction::new(InteractionKind::UserContextMenu, "Profile", User::new("u1"))
                .with_target("u2");
            assert_eq!(
                manager.handle_interaction(interaction, responder.clone()).await,
                InvocationOutcome::Completed
            );
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(manager.cooldown_count(), 0);
    }

    #[tokio::test]
    async fn test_menu_and_chat_commands_with_same_name_coexist() {
        let manager = CommandManager::new(CommandSettings::default());
        let menu = CommandDefinition::new(CommandData::user_menu("ping"), |ctx| async move {
            ctx.reply("menu").await?;
            Ok(())
        });
        manager.register_module_commands("fun", vec![ping("chat")], false).await;
        manager.register_module_commands("social", vec![menu], false).await;
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.command_names(), vec!["ping"]);

        let responder = Arc::new(ConsoleResponder::new());
        manager.handle_interaction(chat("ping"), responder.clone()).await;
        assert_eq!(responder.last_content().as_deref(), Some("chat"));

        let interaction =
            Interaction::new(InteractionKind::UserContextMenu, "ping", User::new("u1"))
                .with_guild("g1")
            .with_target("u2");
        manager.handle_interaction(interaction, responder.clone()).await;
        assert_eq!(responder.last_content().as_deref(), Some("menu"));

        assert_eq!(manager.unregister_module_commands("social", false).await, 1);
        assert!(manager.get("ping").is_some());
        assert!(manager.get_kind(CommandKind::User, "ping").is_none());
    }

    #[tokio::test]
    async fn test_deploy_scope() {
        let catalog = Arc::new(ConsoleCatalog::new());
        let settings = CommandSettings {
            dev_guild_id: Some("dev".to_string()),
            ..CommandSettings::default()
        };
        let manager = CommandManager::new(settings).with_catalog(catalog.clone());
        manager.register_module_commands("fun", vec![ping("pong")], true).await;

        let deployments = catalog.deployments();
        assert_eq!(deployments.len(), 1);
        assert_eq!(deployments[0].0, DeployScope::Guild("dev".into()));
        assert_eq!(deployments[0].1, vec!["ping"]);

        manager.unregister_module_commands("fun", true).await;
        let deployments = catalog.deployments();
        assert_eq!(deployments.len(), 2);
        assert!(deployments[1].1.is_empty());
    }
}
