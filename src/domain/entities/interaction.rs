//! Inbound interactions (slash commands, context menus, autocomplete) and replies

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{CommandKind, User};

/// Platform permission a command may require from the invoking member
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    Administrator,
    ManageGuild,
    ManageRoles,
    ManageChannels,
    ManageMessages,
    ManageNicknames,
    KickMembers,
    BanMembers,
    ModerateMembers,
    ViewAuditLog,
    MentionEveryone,
    SendMessages,
    EmbedLinks,
    AttachFiles,
    Connect,
    Speak,
    MuteMembers,
    MoveMembers,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Administrator => "administrator",
            Permission::ManageGuild => "manage-guild",
            Permission::ManageRoles => "manage-roles",
            Permission::ManageChannels => "manage-channels",
            Permission::ManageMessages => "manage-messages",
            Permission::ManageNicknames => "manage-nicknames",
            Permission::KickMembers => "kick-members",
            Permission::BanMembers => "ban-members",
            Permission::ModerateMembers => "moderate-members",
            Permission::ViewAuditLog => "view-audit-log",
            Permission::MentionEveryone => "mention-everyone",
            Permission::SendMessages => "send-messages",
            Permission::EmbedLinks => "embed-links",
            Permission::AttachFiles => "attach-files",
            Permission::Connect => "connect",
            Permission::Speak => "speak",
            Permission::MuteMembers => "mute-members",
            Permission::MoveMembers => "move-members",
        }
    }

    /// Human-readable label used in replies
    pub fn label(&self) -> &'static str {
        match self {
            Permission::Administrator => "Administrator",
            Permission::ManageGuild => "Manage Server",
            Permission::ManageRoles => "Manage Roles",
            Permission::ManageChannels => "Manage Channels",
            Permission::ManageMessages => "Manage Messages",
            Permission::ManageNicknames => "Manage Nicknames",
            Permission::KickMembers => "Kick Members",
            Permission::BanMembers => "Ban Members",
            Permission::ModerateMembers => "Timeout Members",
            Permission::ViewAuditLog => "View Audit Log",
            Permission::MentionEveryone => "Mention Everyone",
            Permission::SendMessages => "Send Messages",
            Permission::EmbedLinks => "Embed Links",
            Permission::AttachFiles => "Attach Files",
            Permission::Connect => "Connect",
            Permission::Speak => "Speak",
            Permission::MuteMembers => "Mute Members",
            Permission::MoveMembers => "Move Members",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Permissions that `granted` lacks out of `required`. Administrator implies everything.
pub fn missing_permissions(
    required: &[Permission],
    granted: &BTreeSet<Permission>,
) -> Vec<Permission> {
    if granted.contains(&Permission::Administrator) {
        return Vec::new();
    }
    required
        .iter()
        .filter(|p| !granted.contains(p))
        .copied()
        .collect()
}

/// Kind of inbound interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InteractionKind {
    ChatInput,
    UserContextMenu,
    MessageContextMenu,
    Autocomplete,
}

impl InteractionKind {
    pub fn is_context_menu(&self) -> bool {
        matches!(
            self,
            InteractionKind::UserContextMenu | InteractionKind::MessageContextMenu
        )
    }

    /// Kind of the command this interaction targets. Autocomplete belongs to chat-input commands.
    pub fn command_kind(&self) -> CommandKind {
        match self {
            InteractionKind::ChatInput | InteractionKind::Autocomplete => CommandKind::ChatInput,
            InteractionKind::UserContextMenu => CommandKind::User,
            InteractionKind::MessageContextMenu => CommandKind::Message,
        }
    }
}

/// A command-style interaction delivered by the host platform
#[derive(Debug, Clone)]
pub struct Interaction {
    pub id: String,
    pub kind: InteractionKind,
    pub command_name: String,
    pub user: User,
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    /// `None` when the platform did not resolve the caller's permissions (e.g. in DMs)
    pub member_permissions: Option<BTreeSet<Permission>>,
    pub options: Map<String, Value>,
    /// Name of the option being typed, for autocomplete
    pub focused_option: Option<String>,
    /// User or message targeted by a context-menu command
    pub target_id: Option<String>,
}

impl Interaction {
    pub fn new(kind: InteractionKind, command_name: impl Into<String>, user: User) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            command_name: command_name.into(),
            user,
            guild_id: None,
            channel_id: None,
            member_permissions: None,
            options: Map::new(),
            focused_option: None,
            target_id: None,
        }
    }

    pub fn chat_input(command_name: impl Into<String>, user: User) -> Self {
        Self::new(InteractionKind::ChatInput, command_name, user)
    }

    pub fn autocomplete(
        command_name: impl Into<String>,
        user: User,
        focused: impl Into<String>,
    ) -> Self {
        let mut interaction = Self::new(InteractionKind::Autocomplete, command_name, user);
        interaction.focused_option = Some(focused.into());
        interaction
    }

    pub fn with_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.guild_id = Some(guild_id.into());
        self
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.member_permissions = Some(permissions.into_iter().collect());
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }

    pub fn option_str(&self, name: &str) -> Option<&str> {
        self.options.get(name).and_then(Value::as_str)
    }

    /// Current text of the focused autocomplete option
    pub fn focused_value(&self) -> Option<&str> {
        self.focused_option
            .as_deref()
            .and_then(|name| self.option_str(name))
    }
}

/// A reply sent back for an interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    pub ephemeral: bool,
}

impl Reply {
    pub fn public(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: false,
        }
    }

    /// Only visible to the invoking user
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
        }
    }
}

/// One suggestion returned for an autocomplete interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutocompleteChoice {
    pub name: String,
    pub value: Value,
}

impl AutocompleteChoice {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
