//! Platform events - one variant per event kind the runtime routes to modules

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::User;

/// Kind of platform event a module can listen to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Ready,
    GuildCreate,
    GuildDelete,
    MessageCreate,
    MessageDelete,
    ReactionAdd,
    ReactionRemove,
    MemberJoin,
    MemberLeave,
    VoiceStateUpdate,
    Custom(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Ready => "ready",
            EventKind::GuildCreate => "guild-create",
            EventKind::GuildDelete => "guild-delete",
            EventKind::MessageCreate => "message-create",
            EventKind::MessageDelete => "message-delete",
            EventKind::ReactionAdd => "reaction-add",
            EventKind::ReactionRemove => "reaction-remove",
            EventKind::MemberJoin => "member-join",
            EventKind::MemberLeave => "member-leave",
            EventKind::VoiceStateUpdate => "voice-state-update",
            EventKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub message_id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub author: User,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl MessageEvent {
    pub fn new(
        channel_id: impl Into<String>,
        author: User,
        content: impl Into<String>,
    ) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            channel_id: channel_id.into(),
            guild_id: None,
            author,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn in_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.guild_id = Some(guild_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReactionEvent {
    pub message_id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub user_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberEvent {
    pub guild_id: String,
    pub user: User,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceStateEvent {
    pub guild_id: Option<String>,
    pub user_id: String,
    /// `None` when the user left voice
    pub channel_id: Option<String>,
    pub previous_channel_id: Option<String>,
}

/// An event delivered by the host platform. Every variant that can be scoped to a guild
/// carries that scope explicitly, filled in by the adapter that builds the event.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    Ready,
    GuildCreate { guild_id: String },
    GuildDelete { guild_id: String },
    MessageCreate(MessageEvent),
    MessageDelete {
        message_id: String,
        channel_id: String,
        guild_id: Option<String>,
    },
    ReactionAdd(ReactionEvent),
    ReactionRemove(ReactionEvent),
    MemberJoin(MemberEvent),
    MemberLeave(MemberEvent),
    VoiceStateUpdate(VoiceStateEvent),
    Custom {
        name: String,
        guild_id: Option<String>,
        payload: Value,
    },
}

impl PlatformEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PlatformEvent::Ready => EventKind::Ready,
            PlatformEvent::GuildCreate { .. } => EventKind::GuildCreate,
            PlatformEvent::GuildDelete { .. } => EventKind::GuildDelete,
            PlatformEvent::MessageCreate(_) => EventKind::MessageCreate,
            PlatformEvent::MessageDelete { .. } => EventKind::MessageDelete,
            PlatformEvent::ReactionAdd(_) => EventKind::ReactionAdd,
            PlatformEvent::ReactionRemove(_) => EventKind::ReactionRemove,
            PlatformEvent::MemberJoin(_) => EventKind::MemberJoin,
            PlatformEvent::MemberLeave(_) => EventKind::MemberLeave,
            PlatformEvent::VoiceStateUpdate(_) => EventKind::VoiceStateUpdate,
            PlatformEvent::Custom { name, .. } => EventKind::Custom(name.clone()),
        }
    }

    /// Guild this event belongs to, if any
    pub fn scope_id(&self) -> Option<&str> {
        match self {
            PlatformEvent::Ready => None,
            PlatformEvent::GuildCreate { guild_id } | PlatformEvent::GuildDelete { guild_id } => {
                Some(guild_id)
            }
            PlatformEvent::MessageCreate(msg) => msg.guild_id.as_deref(),
            PlatformEvent::MessageDelete { guild_id, .. } => guild_id.as_deref(),
            PlatformEvent::ReactionAdd(r) | PlatformEvent::ReactionRemove(r) => {
                r.guild_id.as_deref()
            }
            PlatformEvent::MemberJoin(m) | PlatformEvent::MemberLeave(m) => Some(&m.guild_id),
            PlatformEvent::VoiceStateUpdate(v) => v.guild_id.as_deref(),
            PlatformEvent::Custom { guild_id, .. } => guild_id.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_id() {
        let dm = PlatformEvent::MessageCreate(MessageEvent::new("c1", User::new("u"), "hi"));
        assert_eq!(dm.scope_id(), None);

        let guild = PlatformEvent::MessageCreate(
            MessageEvent::new("c1", User::new("u"), "hi").in_guild("g1"),
        );
        assert_eq!(guild.scope_id(), Some("g1"));
        assert_eq!(guild.kind(), EventKind::MessageCreate);

        let join = PlatformEvent::MemberJoin(MemberEvent {
            guild_id: "g2".into(),
            user: User::new("u"),
        });
        assert_eq!(join.scope_id(), Some("g2"));
        assert_eq!(PlatformEvent::Ready.scope_id(), None);
    }

    #[test]
    fn test_custom_kind() {
        let event = PlatformEvent::Custom {
            name: "thread-create".into(),
            guild_id: Some("g".into()),
            payload: Value::Null,
        };
        assert_eq!(event.kind(), EventKind::Custom("thread-create".into()));
        assert_eq!(event.kind().to_string(), "thread-create");
    }
}
