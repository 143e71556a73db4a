use async_trait::async_trait;

/// Decides whether a module's behaviour applies in a guild.
///
/// Consulted before any module command or event handler runs for a guild-scoped
/// interaction or event. When no gate is configured nothing is gated.
#[async_trait]
pub trait GuildGate: Send + Sync {
    async fn is_module_enabled(&self, module_id: &str, guild_id: &str) -> bool;

    /// Record an enable/disable made through the host. Returns false if nothing changed.
    ///
    /// The default stores nothing and always reports a change; gates whose state is written
    /// elsewhere can keep it.
    async fn set_module_enabled(&self, _module_id: &str, _guild_id: &str, _enabled: bool) -> bool {
        true
    }
}
