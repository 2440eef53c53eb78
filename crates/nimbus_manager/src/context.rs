use crate::commands::IngameCommandRegistry;
use crate::nodes::{self, NodeDirectory};
use crate::placement::{Placement, PlacementError, ServicePlacer};
use crate::players::{self, PlayerCache};
use crate::relay::{self, ServiceDirectory};
use crate::store::PlayerStore;
use nimbus_network::{
    CommunicationError, ConnectionRegistry, HandlerRegistry, SynchronizedObjectAuthority,
};
use nimbus_wrapper::ServiceDescriptor;
use std::sync::Arc;

/// Everything the manager node shares between its connections.
pub struct ManagerContext {
    pub handlers: Arc<HandlerRegistry>,
    pub connections: Arc<ConnectionRegistry>,
    pub objects: Arc<SynchronizedObjectAuthority>,
    pub commands: Arc<IngameCommandRegistry>,
    pub players: Arc<PlayerCache>,
    pub store: Arc<dyn PlayerStore>,
    pub services: Arc<ServiceDirectory>,
    pub nodes: Arc<NodeDirectory>,
    pub placer: Arc<ServicePlacer>,
}

impl ManagerContext {
    /// Builds the context and registers every manager packet handler.
    pub fn new(store: Arc<dyn PlayerStore>) -> Result<Self, CommunicationError> {
        let handlers = Arc::new(HandlerRegistry::new());
        let connections = ConnectionRegistry::new();
        let objects = SynchronizedObjectAuthority::new();
        let commands = Arc::new(IngameCommandRegistry::new(Arc::clone(&objects))?);
        let players = Arc::new(PlayerCache::new());
        let services = Arc::new(ServiceDirectory::new());
        let nodes = NodeDirectory::new();
        let placer = ServicePlacer::new(Arc::clone(&nodes));

        objects.register_handlers(&handlers);
        players::register_handlers(&handlers, Arc::clone(&players), Arc::clone(&store));
        relay::register_handlers(&handlers, Arc::clone(&services), Arc::clone(&connections));
        nodes::register_handlers(&handlers, Arc::clone(&nodes));

        Ok(Self {
            handlers,
            connections,
            objects,
            commands,
            players,
            store,
            services,
            nodes,
            placer,
        })
    }

    /// Queues `service` on the least loaded connected wrapper.
    pub async fn start_service(&self, service: ServiceDescriptor) -> Result<Placement, PlacementError> {
        self.placer.start_service(service, None).await
    }

    /// Drops everything still queued on the named wrapper.
    pub async fn clear_queue(&self, wrapper: &str) -> Result<usize, PlacementError> {
        self.placer.clear_queue(wrapper).await
    }
}
