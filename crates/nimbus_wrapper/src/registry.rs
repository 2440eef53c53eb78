//! Registry of the service processes a wrapper owns.
//!
//! A process is registered when it is queued and stays registered until it
//! is unregistered explicitly, its service reaches `Closed`, or the wrapper
//! shuts down. Unregistering a process that is not registered is a no-op.

use crate::error::WrapperError;
use crate::events::{LifecycleEvent, LifecycleEvents};
use crate::process::ServiceProcess;
use crate::state::ServiceState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

pub struct ServiceProcessRegistry {
    processes: DashMap<String, Arc<ServiceProcess>>,
    events: LifecycleEvents,
}

impl ServiceProcessRegistry {
    pub fn new(events: LifecycleEvents) -> Arc<Self> {
        Arc::new(Self {
            processes: DashMap::new(),
            events,
        })
    }

    pub fn events(&self) -> &LifecycleEvents {
        &self.events
    }

    /// Registers `process` under its service name.
    ///
    /// The process is dropped from the registry on its own once the service
    /// reaches `Closed`.
    pub fn register(self: &Arc<Self>, process: Arc<ServiceProcess>) -> Result<(), WrapperError> {
        let name = process.name().to_string();
        match self.processes.entry(name.clone()) {
            Entry::Occupied(_) => return Err(WrapperError::AlreadyRegistered { service: name }),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&process));
            }
        }
        self.events.emit(LifecycleEvent::Registered {
            service: name.clone(),
        });

        let registry = Arc::downgrade(self);
        let watched = Arc::downgrade(&process);
        let mut status = process.service().subscribe();
        tokio::spawn(async move {
            if status.wait_for(|state| *state == ServiceState::Closed).await.is_err() {
                return;
            }
            if let (Some(registry), Some(process)) = (registry.upgrade(), watched.upgrade()) {
                registry.events.emit(LifecycleEvent::Stopped { service: name });
                registry.unregister(&process);
            }
        });
        Ok(())
    }

    /// Removes exactly this process. Returns whether it was registered.
    pub fn unregister(&self, process: &Arc<ServiceProcess>) -> bool {
        let removed = self
            .processes
            .remove_if(process.name(), |_, registered| Arc::ptr_eq(registered, process))
            .is_some();
        if removed {
            self.events.emit(LifecycleEvent::Unregistered {
                service: process.name().to_string(),
            });
        } else {
            debug!(service = %process.name(), "Unregister ignored, process not registered");
        }
        removed
    }

    pub fn unregister_by_name(&self, name: &str) -> Option<Arc<ServiceProcess>> {
        let process = self.get(name)?;
        self.unregister(&process).then_some(process)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServiceProcess>> {
        self.processes.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processes.contains_key(name)
    }

    /// All registered processes, ordered by name.
    pub fn processes(&self) -> Vec<Arc<ServiceProcess>> {
        let mut processes: Vec<_> = self
            .processes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        processes.sort_by(|a, b| a.name().cmp(b.name()));
        processes
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Memory reserved by every registered service, in megabytes.
    pub fn used_memory_mb(&self) -> u64 {
        self.processes
            .iter()
            .map(|entry| entry.value().service().descriptor().max_memory_mb)
            .sum()
    }

    /// Forcibly unregisters everything. Used on shutdown.
    pub fn unregister_all(&self) -> usize {
        self.processes()
            .iter()
            .filter(|process| self.unregister(process))
            .count()
    }
}
