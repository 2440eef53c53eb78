use crate::adapter::{ProxyAdapter, RouteError, ServiceRoute};
use nimbus_manager::ServiceListPacket;
use nimbus_network::{CommunicationError, Connection, HandlerRegistry};
use nimbus_wrapper::{ServiceSnapshot, ServiceState};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Keeps a proxy's routes in line with the cluster's service reports.
///
/// A service is routed while it is `Visible`, unless it is itself a proxy or
/// is hidden from this proxy's group. `Invisible` and `Closed` remove it.
///
/// While a seed from the manager is in flight, relayed reports are held
/// back and replayed after the listing, so a report newer than the listing
/// always wins.
pub struct ProxyRouter {
    adapter: Arc<dyn ProxyAdapter>,
    group: String,
    held: Mutex<Option<Vec<ServiceSnapshot>>>,
}

impl ProxyRouter {
    pub fn new(adapter: Arc<dyn ProxyAdapter>, group: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            group: group.into(),
            held: Mutex::new(None),
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Adds a route for `snapshot`. Returns `false` if the service is not routable here.
    pub fn add_service(&self, snapshot: &ServiceSnapshot) -> Result<bool, RouteError> {
        let service = &snapshot.service;
        if service.proxy {
            return Ok(false);
        }
        if service.is_hidden_at(&self.group) {
            debug!(service = %service.name, group = %self.group, "Service hidden at this proxy group");
            return Ok(false);
        }
        self.adapter.add_route(ServiceRoute {
            name: service.name.clone(),
            address: service.address(),
        })?;
        Ok(true)
    }

    pub fn remove_service(&self, snapshot: &ServiceSnapshot) -> bool {
        self.adapter.remove_route(&snapshot.service.name).is_some()
    }

    /// Applies one state report, or holds it back while a seed is running.
    pub fn apply(&self, snapshot: &ServiceSnapshot) {
        {
            let mut held = self.held();
            if let Some(held) = held.as_mut() {
                held.push(snapshot.clone());
                return;
            }
        }
        self.apply_now(snapshot);
    }

    fn apply_now(&self, snapshot: &ServiceSnapshot) {
        match snapshot.state {
            ServiceState::Visible => {
                if let Err(err) = self.add_service(snapshot) {
                    warn!("⚠️ Cannot route {}: {}", snapshot.service.name, err);
                }
            }
            ServiceState::Invisible | ServiceState::Closed => {
                self.remove_service(snapshot);
            }
            _ => {}
        }
    }

    fn held(&self) -> MutexGuard<'_, Option<Vec<ServiceSnapshot>>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Routes every visible service from an initial listing.
    pub fn seed(&self, services: &[ServiceSnapshot]) -> usize {
        services
            .iter()
            .filter(|snapshot| snapshot.state == ServiceState::Visible)
            .filter(|snapshot| match self.add_service(snapshot) {
                Ok(added) => added,
                Err(err) => {
                    warn!("⚠️ Cannot route {}: {}", snapshot.service.name, err);
                    false
                }
            })
            .count()
    }

    /// Asks the manager for the current services and routes the visible ones.
    ///
    /// Reports relayed while the listing is on its way are replayed on top
    /// of it, in arrival order.
    pub async fn seed_from_manager(&self, manager: &Connection) -> Result<usize, CommunicationError> {
        *self.held() = Some(Vec::new());
        let services = match manager.request(&ServiceListPacket {}).await {
            Ok(services) => services,
            Err(err) => {
                self.release_held();
                return Err(err);
            }
        };

        let mut held = self.held();
        let routed = self.seed(&services);
        let replayed = held.take().unwrap_or_default();
        for snapshot in &replayed {
            match self.add_or_remove(snapshot) {
                // Already in the listing.
                Ok(()) | Err(RouteError::AlreadyRegistered { .. }) => {}
                Err(err) => warn!("⚠️ Cannot route {}: {}", snapshot.service.name, err),
            }
        }
        drop(held);

        info!(routed, known = services.len(), replayed = replayed.len(), "🧭 Routes seeded from manager");
        Ok(routed)
    }

    fn add_or_remove(&self, snapshot: &ServiceSnapshot) -> Result<(), RouteError> {
        match snapshot.state {
            ServiceState::Visible => self.add_service(snapshot).map(|_| ()),
            ServiceState::Invisible | ServiceState::Closed => {
                self.remove_service(snapshot);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn release_held(&self) {
        let replayed = self.held().take().unwrap_or_default();
        for snapshot in &replayed {
            self.apply_now(snapshot);
        }
    }

    /// Handles relayed `service.update` notifications.
    pub fn register_handlers(self: &Arc<Self>, handlers: &HandlerRegistry) {
        let router = Arc::clone(self);
        handlers.register_notification(move |_connection, snapshot: ServiceSnapshot| {
            let router = Arc::clone(&router);
            async move {
                router.apply(&snapshot);
                Ok(())
            }
        });
    }
}
