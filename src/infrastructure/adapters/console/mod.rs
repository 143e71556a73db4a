//! Console adapter for development/testing

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::application::errors::PlatformError;
use crate::domain::entities::{
    AutocompleteChoice, CommandData, Interaction, InteractionKind, Permission, Reply, User,
};
use crate::domain::traits::{CommandCatalog, DeployScope, Responder};

/// One message the console responder produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleMessage {
    pub content: String,
    pub ephemeral: bool,
    /// Sent through `edit_reply` rather than as the initial reply
    pub edited: bool,
}

/// Responder that records every reply, optionally echoing it to stdout.
///
/// Unlike a real platform it accepts any number of replies, so one responder can be reused
/// across interactions.
#[derive(Default)]
pub struct ConsoleResponder {
    echo: bool,
    deferred: AtomicBool,
    replied: AtomicBool,
    transcript: Mutex<Vec<ConsoleMessage>>,
    choices: Mutex<Option<Vec<AutocompleteChoice>>>,
}

impl ConsoleResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print replies as they are sent
    pub fn printing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    pub fn transcript(&self) -> Vec<ConsoleMessage> {
        self.transcript.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last_reply(&self) -> Option<ConsoleMessage> {
        self.transcript.lock().unwrap_or_else(|e| e.into_inner()).last().cloned()
    }

    pub fn last_content(&self) -> Option<String> {
        self.last_reply().map(|m| m.content)
    }

    pub fn last_choices(&self) -> Option<Vec<AutocompleteChoice>> {
        self.choices.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, message: ConsoleMessage) {
        if self.echo {
            let marker = if message.ephemeral { " (only you)" } else { "" };
            println!("[BOT]{} {}", marker, message.content);
        }
        self.transcript.lock().unwrap_or_else(|e| e.into_inner()).push(message);
    }
}

#[async_trait]
impl Responder for ConsoleResponder {
    async fn reply(&self, reply: Reply) -> Result<(), PlatformError> {
        self.replied.store(true, Ordering::SeqCst);
        self.record(ConsoleMessage {
            content: reply.content,
            ephemeral: reply.ephemeral,
            edited: false,
        });
        Ok(())
    }

    async fn defer(&self, ephemeral: bool) -> Result<(), PlatformError> {
        if self.deferred.swap(true, Ordering::SeqCst) {
            return Err(PlatformError::AlreadyAcknowledged);
        }
        if self.echo {
            println!("[BOT] ...{}", if ephemeral { " (only you)" } else { "" });
        }
        Ok(())
    }

    async fn edit_reply(&self, content: String) -> Result<(), PlatformError> {
        if !self.deferred.load(Ordering::SeqCst) && !self.replied.load(Ordering::SeqCst) {
            return Err(PlatformError::Unsupported("edit before reply".to_string()));
        }
        self.replied.store(true, Ordering::SeqCst);
        self.record(ConsoleMessage {
            content,
            ephemeral: false,
            edited: true,
        });
        Ok(())
    }

    async fn respond_autocomplete(&self, choices: Vec<AutocompleteChoice>) -> Result<(), PlatformError> {
        if self.echo {
            let names: Vec<&str> = choices.iter().map(|c| c.name.as_str()).collect();
            println!("[BOT] choices: {}", names.join(" | "));
        }
        *self.choices.lock().unwrap_or_else(|e| e.into_inner()) = Some(choices);
        Ok(())
    }

    fn is_deferred(&self) -> bool {
        self.deferred.load(Ordering::SeqCst)
    }

    fn is_replied(&self) -> bool {
        self.replied.load(Ordering::SeqCst)
    }
}

/// Command catalog that keeps deployments and permission overrides in memory
#[derive(Default)]
pub struct ConsoleCatalog {
    deployments: Mutex<Vec<(DeployScope, Vec<String>)>>,
    overrides: Mutex<BTreeMap<(String, String), bool>>,
}

impl ConsoleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every deployment so far with the command names it carried
    pub fn deployments(&self) -> Vec<(DeployScope, Vec<String>)> {
        self.deployments.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Override for `command_name` in `guild_id`, if one was set
    pub fn permission(&self, guild_id: &str, command_name: &str) -> Option<bool> {
        self.overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(guild_id.to_string(), command_name.to_string()))
            .copied()
    }
}

#[async_trait]
impl CommandCatalog for ConsoleCatalog {
    async fn deploy(&self, scope: &DeployScope, commands: &[CommandData]) -> Result<usize, PlatformError> {
        let names: Vec<String> = commands.iter().map(|c| c.name.clone()).collect();
        tracing::debug!("Deploying {} command(s) to {}", names.len(), scope);
        self.deployments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((scope.clone(), names));
        Ok(commands.len())
    }

    async fn set_command_permission(
        &self,
        guild_id: &str,
        command_name: &str,
        allowed: bool,
    ) -> Result<(), PlatformError> {
        self.overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((guild_id.to_string(), command_name.to_string()), allowed);
        Ok(())
    }
}

/// Turns console input into interactions.
///
/// `/name key=value ...` invokes a command, `?name option=partial` asks for autocomplete.
/// Interactions are issued by an administrator of `guild_id`, or in a DM when it is unset.
pub struct ConsoleParser {
    user: User,
    guild_id: Option<String>,
}

impl ConsoleParser {
    pub fn new(user: User) -> Self {
        Self { user, guild_id: None }
    }

    pub fn with_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.guild_id = Some(guild_id.into());
        self
    }

    pub fn set_guild(&mut self, guild_id: Option<String>) {
        self.guild_id = guild_id;
    }

    pub fn guild_id(&self) -> Option<&str> {
        self.guild_id.as_deref()
    }

    pub fn parse(&self, line: &str) -> Option<Interaction> {
        let line = line.trim();
        let (autocomplete, rest) = if let Some(rest) = line.strip_prefix('/') {
            (false, rest)
        } else if let Some(rest) = line.strip_prefix('?') {
            (true, rest)
        } else {
            return None;
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next()?;
        let mut focused = None;
        let mut interaction = Interaction::chat_input(name, self.user.clone());

        for arg in parts {
            let (key, value) = arg.split_once('=').unwrap_or((arg, ""));
            focused.get_or_insert_with(|| key.to_string());
            interaction = interaction.with_option(key, parse_value(value));
        }

        if autocomplete {
            interaction.kind = InteractionKind::Autocomplete;
            interaction.focused_option = focused;
        }
        if let Some(guild_id) = &self.guild_id {
            interaction = interaction
                .with_guild(guild_id.clone())
                .with_permissions([Permission::Administrator]);
        }
        Some(interaction)
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
