use crate::adapter::CommandRegistrar;
use nimbus_manager::{IngameCommands, INGAME_COMMANDS_OBJECT};
use nimbus_network::{CommunicationPromise, Connection, ObjectHolder, SynchronizedObjectClient};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Mirrors the manager's in-game command names into a proxy's command registrar.
pub struct CommandSync {
    registrar: Arc<dyn CommandRegistrar>,
    current: Mutex<Applied>,
}

#[derive(Default)]
struct Applied {
    // Version of the replicated object behind `names`; 0 before the first.
    version: u64,
    names: BTreeSet<String>,
}

impl CommandSync {
    pub fn new(registrar: Arc<dyn CommandRegistrar>) -> Arc<Self> {
        Arc::new(Self {
            registrar,
            current: Mutex::new(Applied::default()),
        })
    }

    /// Unregisters every previous name, then registers the new ones.
    pub fn replace(&self, commands: &IngameCommands) {
        let mut current = self.current();
        self.swap(&mut current, commands);
    }

    /// Like [`replace`](Self::replace), but ignores anything not newer than
    /// the version already applied. Returns whether the names were swapped.
    pub fn replace_versioned(&self, version: u64, commands: &IngameCommands) -> bool {
        let mut current = self.current();
        if version <= current.version {
            debug!(version, applied = current.version, "Skipping outdated in-game commands");
            return false;
        }
        current.version = version;
        self.swap(&mut current, commands);
        true
    }

    /// Applies the holder's value now and on every later replacement.
    pub fn attach(self: &Arc<Self>, holder: &ObjectHolder<IngameCommands>) {
        let sync = Arc::clone(self);
        holder.add_versioned_listener(move |version, commands| {
            sync.replace_versioned(version, commands);
            Ok(())
        });
        let (version, commands) = holder.versioned();
        self.replace_versioned(version, &commands);
    }

    fn swap(&self, current: &mut Applied, commands: &IngameCommands) {
        for name in current.names.iter() {
            self.registrar.unregister_command(name);
        }
        for name in &commands.names {
            self.registrar.register_command(name);
        }
        current.names = commands.names.clone();
        info!(commands = current.names.len(), "⌨️ In-game commands synchronized");
    }

    fn current(&self) -> MutexGuard<'_, Applied> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Requests the command object from the manager and attaches to it.
    pub fn start(
        self: &Arc<Self>,
        client: &Arc<SynchronizedObjectClient>,
        manager: &Connection,
    ) -> CommunicationPromise<ObjectHolder<IngameCommands>> {
        let promise = client.request::<IngameCommands>(manager, INGAME_COMMANDS_OBJECT);
        let sync = Arc::clone(self);
        promise
            .add_result_listener(move |holder| sync.attach(holder))
            .add_failure_listener(|err| warn!("❌ Failed to request in-game commands: {}", err));
        promise
    }
}
