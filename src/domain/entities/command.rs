use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::application::errors::{HandlerError, PlatformError};
use crate::domain::entities::{AutocompleteChoice, Interaction, Permission, Reply};
use crate::domain::traits::Responder;

static CHAT_INPUT_NAME: Lazy<Regex> = Lazy::new(|| {
    // Compiled from a literal
    Regex::new(r"^[a-z0-9_-]{1,32}$").unwrap()
});

const MAX_OPTIONS: usize = 25;
const MAX_CHOICES: usize = 25;
const MAX_DESCRIPTION: usize = 100;

/// Result returned by every handler the runtime invokes
pub type HandlerResult = Result<(), HandlerError>;

/// Kind of command as registered with the platform catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    ChatInput,
    User,
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptionType {
    String,
    Integer,
    Number,
    Boolean,
    User,
    Channel,
    Role,
    Mentionable,
    Attachment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChoice {
    pub name: String,
    pub value: serde_json::Value,
}

/// A typed option of a chat-input command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOption {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: OptionType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<OptionChoice>,
    #[serde(default)]
    pub autocomplete: bool,
}

impl CommandOption {
    pub fn new(name: impl Into<String>, description: impl Into<String>, kind: OptionType) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
            required: false,
            choices: Vec::new(),
            autocomplete: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_choice(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.choices.push(OptionChoice {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_autocomplete(mut self) -> Self {
        self.autocomplete = true;
        self
    }
}

/// Declarative command schema, deployed in bulk to the platform's command catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandData {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: CommandKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<CommandOption>,
    /// Whether the command shows up in direct messages
    #[serde(default = "default_dm_permission")]
    pub dm_permission: bool,
}

fn default_dm_permission() -> bool {
    true
}

impl CommandData {
    pub fn chat_input(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: CommandKind::ChatInput,
            options: Vec::new(),
            dm_permission: true,
        }
    }

    /// Right-click command on a user
    pub fn user_menu(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind: CommandKind::User,
            options: Vec::new(),
            dm_permission: true,
        }
    }

    /// Right-click command on a message
    pub fn message_menu(name: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Message,
            ..Self::user_menu(name)
        }
    }

    pub fn with_option(mut self, option: CommandOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Check the schema against the platform's structural rules
    pub fn validate(&self) -> Result<(), String> {
        match self.kind {
            CommandKind::ChatInput => {
                if !CHAT_INPUT_NAME.is_match(&self.name) {
                    return Err(format!("invalid command name '{}'", self.name));
                }
                if self.description.is_empty() || self.description.chars().count() > MAX_DESCRIPTION {
                    return Err(format!(
                        "command '{}' needs a description of 1-{} characters",
                        self.name, MAX_DESCRIPTION
                    ));
                }
            }
            CommandKind::User | CommandKind::Message => {
                let len = self.name.chars().count();
                if len == 0 || len > 32 {
                    return Err(format!("invalid context menu name '{}'", self.name));
                }
                if !self.options.is_empty() {
                    return Err(format!("context menu '{}' cannot have options", self.name));
                }
            }
        }

        if self.options.len() > MAX_OPTIONS {
            return Err(format!("command '{}' has more than {} options", self.name, MAX_OPTIONS));
        }

        let mut seen_optional = false;
        for option in &self.options {
            if !CHAT_INPUT_NAME.is_match(&option.name) {
                return Err(format!("invalid option name '{}' on '{}'", option.name, self.name));
            }
            if option.description.is_empty() {
                return Err(format!("option '{}' on '{}' has no description", option.name, self.name));
            }
            if option.required && seen_optional {
                return Err(format!(
                    "required option '{}' on '{}' follows an optional one",
                    option.name, self.name
                ));
            }
            seen_optional |= !option.required;
            if option.choices.len() > MAX_CHOICES {
                return Err(format!("option '{}' has more than {} choices", option.name, MAX_CHOICES));
            }
            if option.autocomplete && !option.choices.is_empty() {
                return Err(format!(
                    "option '{}' cannot use both choices and autocomplete",
                    option.name
                ));
            }
        }
        Ok(())
    }
}

/// Everything a command handler gets for one invocation
#[derive(Clone)]
pub struct CommandContext {
    pub interaction: Interaction,
    pub responder: Arc<dyn Responder>,
}

impl CommandContext {
    pub fn new(interaction: Interaction, responder: Arc<dyn Responder>) -> Self {
        Self {
            interaction,
            responder,
        }
    }

    /// Reply publicly, editing the deferred response if there is one
    pub async fn reply(&self, content: impl Into<String>) -> Result<(), PlatformError> {
        let content = content.into();
        if self.responder.is_deferred() {
            self.responder.edit_reply(content).await
        } else {
            self.responder.reply(Reply::public(content)).await
        }
    }

    pub async fn reply_ephemeral(&self, content: impl Into<String>) -> Result<(), PlatformError> {
        let content = content.into();
        if self.responder.is_deferred() {
            self.responder.edit_reply(content).await
        } else {
            self.responder.reply(Reply::ephemeral(content)).await
        }
    }
}

/// Executes a command invocation
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, ctx: CommandContext) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(CommandContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, ctx: CommandContext) -> HandlerResult {
        (self)(ctx).await
    }
}

/// Produces suggestions for an autocomplete interaction
#[async_trait]
pub trait AutocompleteHandler: Send + Sync {
    async fn suggest(&self, interaction: Interaction) -> Result<Vec<AutocompleteChoice>, HandlerError>;
}

#[async_trait]
impl<F, Fut> AutocompleteHandler for F
where
    F: Fn(Interaction) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<AutocompleteChoice>, HandlerError>> + Send,
{
    async fn suggest(&self, interaction: Interaction) -> Result<Vec<AutocompleteChoice>, HandlerError> {
        (self)(interaction).await
    }
}

/// How a command acknowledges the interaction before its handler runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferMode {
    pub ephemeral: bool,
}

/// A command a module contributes: its schema plus runtime behaviour
#[derive(Clone)]
pub struct CommandDefinition {
    pub data: CommandData,
    pub cooldown: Option<Duration>,
    pub required_permissions: Vec<Permission>,
    pub guild_only: bool,
    pub defer: Option<DeferMode>,
    pub handler: Arc<dyn CommandHandler>,
    pub autocomplete: Option<Arc<dyn AutocompleteHandler>>,
}

impl CommandDefinition {
    pub fn new<F, Fut>(data: CommandData, handler: F) -> Self
    where
        F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::from_handler(data, Arc::new(handler))
    }

    pub fn from_handler(data: CommandData, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            data,
            cooldown: None,
            required_permissions: Vec::new(),
            guild_only: false,
            defer: None,
            handler,
            autocomplete: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn with_cooldown_secs(self, seconds: u64) -> Self {
        self.with_cooldown(Duration::from_secs(seconds))
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.required_permissions.push(permission);
        self
    }

    pub fn guild_only(mut self) -> Self {
        self.guild_only = true;
        self.data.dm_permission = false;
        self
    }

    /// Defer the reply before running the handler
    pub fn deferred(mut self, ephemeral: bool) -> Self {
        self.defer = Some(DeferMode { ephemeral });
        self
    }

    pub fn with_autocomplete<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Interaction) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<AutocompleteChoice>, HandlerError>> + Send + 'static,
    {
        self.autocomplete = Some(Arc::new(handler));
        self
    }
}

impl std::fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("name", &self.data.name)
            .field("cooldown", &self.cooldown)
            .field("required_permissions", &self.required_permissions)
            .field("guild_only", &self.guild_only)
            .field("defer", &self.defer)
            .finish()
    }
}
