//! In-game command names shared with every proxy as a synchronized object.

use nimbus_network::{CommunicationError, SynchronizedObjectAuthority};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Name of the synchronized object holding [`IngameCommands`].
pub const INGAME_COMMANDS_OBJECT: &str = "nimbus-ingamecommands";

/// Commands that proxies must forward to the cluster instead of handling locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngameCommands {
    pub names: BTreeSet<String>,
}

/// Manager-side owner of the command list; every change is published.
pub struct IngameCommandRegistry {
    authority: Arc<SynchronizedObjectAuthority>,
    commands: Mutex<IngameCommands>,
}

impl IngameCommandRegistry {
    /// Creates the registry and publishes the initial (empty) list.
    pub fn new(authority: Arc<SynchronizedObjectAuthority>) -> Result<Self, CommunicationError> {
        let commands = IngameCommands::default();
        authority.publish(INGAME_COMMANDS_OBJECT, &commands)?;
        Ok(Self {
            authority,
            commands: Mutex::new(commands),
        })
    }

    /// Adds a command name. Returns `false` if it was already present.
    pub fn register_command(&self, name: &str) -> Result<bool, CommunicationError> {
        self.modify(|commands| commands.names.insert(name.to_lowercase()))
    }

    pub fn unregister_command(&self, name: &str) -> Result<bool, CommunicationError> {
        self.modify(|commands| commands.names.remove(&name.to_lowercase()))
    }

    pub fn commands(&self) -> IngameCommands {
        self.lock().clone()
    }

    fn modify(&self, change: impl FnOnce(&mut IngameCommands) -> bool) -> Result<bool, CommunicationError> {
        let mut commands = self.lock();
        if !change(&mut commands) {
            return Ok(false);
        }
        // Publishing under the lock keeps versions in change order.
        self.authority.publish(INGAME_COMMANDS_OBJECT, &*commands)?;
        Ok(true)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IngameCommands> {
        self.commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changes_are_published() {
        let authority = SynchronizedObjectAuthority::new();
        let registry = IngameCommandRegistry::new(Arc::clone(&authority)).unwrap();
        assert_eq!(authority.get(INGAME_COMMANDS_OBJECT).unwrap().version, 1);

        assert!(registry.register_command("Hub").unwrap());
        assert!(!registry.register_command("hub").unwrap());
        assert!(registry.register_command("party").unwrap());
        assert!(registry.unregister_command("HUB").unwrap());

        let snapshot = authority.get(INGAME_COMMANDS_OBJECT).unwrap();
        assert_eq!(snapshot.version, 4);
        let published: IngameCommands = serde_json::from_value(snapshot.value).unwrap();
        assert_eq!(published, registry.commands());
        assert_eq!(published.names.into_iter().collect::<Vec<_>>(), vec!["party"]);
    }
}
