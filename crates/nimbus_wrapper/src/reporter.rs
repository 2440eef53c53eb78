//! Reports service state changes to the manager.

use crate::events::{LifecycleEvent, LifecycleEvents};
use crate::registry::ServiceProcessRegistry;
use crate::service::ServiceHandle;
use crate::state::ServiceState;
use nimbus_network::Connection;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Sends a `service.update` notification to the manager on every state
/// change of every registered service.
///
/// `Registered` events only speed things up. The registry itself is the
/// source of truth: it is scanned at spawn and again whenever the event
/// receiver lags, so a burst of registrations never leaves a service
/// unreported.
pub struct StateReporter;

impl StateReporter {
    pub fn spawn(
        registry: Arc<ServiceProcessRegistry>,
        events: &LifecycleEvents,
        manager: Connection,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let mut events = events.subscribe();
        tokio::spawn(async move {
            let mut watched = Watched::new(manager);
            watched.reconcile(&registry);
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(LifecycleEvent::Registered { service }) => {
                            if let Some(process) = registry.get(&service) {
                                watched.watch(process.service());
                            }
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "State reporter fell behind lifecycle events, rescanning registry");
                            watched.reconcile(&registry);
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

/// Services that already have a report task, by name.
struct Watched {
    manager: Connection,
    services: HashMap<String, ServiceHandle>,
}

impl Watched {
    fn new(manager: Connection) -> Self {
        Self {
            manager,
            services: HashMap::new(),
        }
    }

    /// Starts a report task unless this exact service already has one.
    fn watch(&mut self, service: &ServiceHandle) {
        if let Some(existing) = self.services.get(service.name()) {
            if existing.same_service(service) {
                return;
            }
        }
        self.services
            .insert(service.name().to_string(), service.clone());
        tokio::spawn(report_changes(service.clone(), self.manager.clone()));
    }

    fn reconcile(&mut self, registry: &ServiceProcessRegistry) {
        self.services
            .retain(|_, service| service.state() != ServiceState::Closed);
        for process in registry.processes() {
            self.watch(process.service());
        }
    }
}

async fn report_changes(service: ServiceHandle, manager: Connection) {
    let mut changes = service.subscribe();
    loop {
        let snapshot = service.snapshot();
        if let Err(err) = manager.send_notification(&snapshot) {
            debug!(service = %service.name(), "State report dropped: {}", err);
            return;
        }
        if snapshot.state == ServiceState::Closed || changes.changed().await.is_err() {
            return;
        }
    }
}
