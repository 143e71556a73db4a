//! Per-user command cooldowns

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

type CooldownKey = (String, String);

/// Cooldown entries keyed by `(command, user)`.
///
/// Entries hold their expiry instant and remove themselves once it passes. An expired entry
/// never blocks, whether or not its removal has run yet.
#[derive(Clone, Default)]
pub struct CooldownTable {
    entries: Arc<Mutex<HashMap<CooldownKey, Instant>>>,
}

impl CooldownTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a cooldown for `user_id` on `command` unless one is active.
    ///
    /// Returns the remaining time of the active cooldown as the error.
    pub fn try_start(&self, command: &str, user_id: &str, window: Duration) -> Result<(), Duration> {
        let key = (command.to_string(), user_id.to_string());
        let now = Instant::now();
        let expires_at = now + window;

        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(expiry) = entries.get(&key) {
                if *expiry > now {
                    return Err(*expiry - now);
                }
            }
            entries.insert(key.clone(), expires_at);
        }

        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());
            // A newer window may have replaced ours
            if entries.get(&key) == Some(&expires_at) {
                entries.remove(&key);
            }
        });

        Ok(())
    }

    /// Remaining cooldown for a user, if any
    pub fn remaining(&self, command: &str, user_id: &str) -> Option<Duration> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let expiry = entries.get(&(command.to_string(), user_id.to_string()))?;
        let now = Instant::now();
        (*expiry > now).then(|| *expiry - now)
    }

    /// Drop every cooldown for a command
    pub fn clear_command(&self, command: &str) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|(name, _), _| name != command);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
