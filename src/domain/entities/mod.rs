//! Domain entities - Core objects the runtime routes and tracks

pub mod command;
pub mod event;
pub mod interaction;
pub mod metadata;
pub mod user;

pub use command::{
    AutocompleteHandler, CommandContext, CommandData, CommandDefinition, CommandHandler,
    CommandKind, CommandOption, DeferMode, HandlerResult, OptionChoice, OptionType,
};
pub use event::{EventKind, MemberEvent, MessageEvent, PlatformEvent, ReactionEvent, VoiceStateEvent};
pub use interaction::{
    missing_permissions, AutocompleteChoice, Interaction, InteractionKind, Permission, Reply,
};
pub use metadata::ModuleMetadata;
pub use user::User;
