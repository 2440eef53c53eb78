//! Cluster view of services, fed by wrapper reports and relayed to proxies.

use dashmap::DashMap;
use nimbus_network::{ConnectionRegistry, HandlerRegistry, Packet};
use nimbus_wrapper::{ServiceSnapshot, ServiceState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Asks the manager for every known, not yet closed service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceListPacket {}

impl Packet for ServiceListPacket {
    const NAME: &'static str = "service.list";
    type Response = Vec<ServiceSnapshot>;
}

/// Latest reported snapshot of every live service.
#[derive(Default)]
pub struct ServiceDirectory {
    services: DashMap<String, ServiceSnapshot>,
}

impl ServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a report. Closed services are forgotten.
    ///
    /// Returns whether the state differs from the previous report.
    pub fn apply(&self, snapshot: &ServiceSnapshot) -> bool {
        let previous = if snapshot.state == ServiceState::Closed {
            self.services.remove(&snapshot.service.name).map(|(_, old)| old.state)
        } else {
            self.services
                .insert(snapshot.service.name.clone(), snapshot.clone())
                .map(|old| old.state)
        };
        previous != Some(snapshot.state)
    }

    pub fn get(&self, name: &str) -> Option<ServiceSnapshot> {
        self.services.get(name).map(|entry| entry.value().clone())
    }

    /// All live services, ordered by name.
    pub fn services(&self) -> Vec<ServiceSnapshot> {
        let mut services: Vec<_> = self.services.iter().map(|entry| entry.value().clone()).collect();
        services.sort_by(|a, b| a.service.name.cmp(&b.service.name));
        services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Records `service.update` reports and forwards state changes to every
/// other connection; answers `service.list`.
pub fn register_handlers(
    handlers: &HandlerRegistry,
    directory: Arc<ServiceDirectory>,
    connections: Arc<ConnectionRegistry>,
) {
    let updates = Arc::clone(&directory);
    handlers.register_notification(move |origin, snapshot: ServiceSnapshot| {
        let directory = Arc::clone(&updates);
        let connections = Arc::clone(&connections);
        async move {
            if directory.apply(&snapshot) {
                let relayed = connections.broadcast_notification(&snapshot, Some(origin.id()));
                info!(
                    service = %snapshot.service.name,
                    state = %snapshot.state,
                    relayed,
                    "📣 Service {} is now {}", snapshot.service.name, snapshot.state
                );
            }
            Ok(())
        }
    });

    handlers.register_packet(move |_connection, _packet: ServiceListPacket| {
        let directory = Arc::clone(&directory);
        async move { Ok(directory.services()) }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_wrapper::ServiceDescriptor;

    fn snapshot(name: &str, state: ServiceState) -> ServiceSnapshot {
        ServiceSnapshot {
            service: ServiceDescriptor::new(name, "lobby", 30001),
            state,
        }
    }

    #[test]
    fn test_directory_tracks_live_services() {
        let directory = ServiceDirectory::new();
        assert!(directory.apply(&snapshot("lobby-2", ServiceState::Starting)));
        assert!(directory.apply(&snapshot("lobby-1", ServiceState::Visible)));
        assert!(!directory.apply(&snapshot("lobby-1", ServiceState::Visible)));
        assert!(directory.apply(&snapshot("lobby-2", ServiceState::Visible)));

        let names: Vec<_> = directory.services().into_iter().map(|s| s.service.name).collect();
        assert_eq!(names, vec!["lobby-1", "lobby-2"]);

        assert!(directory.apply(&snapshot("lobby-1", ServiceState::Closed)));
        assert!(directory.get("lobby-1").is_none());
        assert_eq!(directory.len(), 1);
    }
}
