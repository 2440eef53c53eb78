//! Placing services on wrappers.

use crate::nodes::{NodeDirectory, NodeInfo, NodeKind};
use crate::relay::ServiceDirectory;
use nimbus_network::CommunicationError;
use nimbus_wrapper::{
    ClearQueuePacket, ServiceDescriptor, ServiceSnapshot, StartServicePacket, WrapperStatusPacket,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    #[error("no wrapper is connected")]
    NoWrapper,
    #[error("wrapper {name} is not connected")]
    UnknownWrapper { name: String },
    #[error("wrapper {wrapper} failed to take {service}: {source}")]
    Wrapper {
        wrapper: String,
        service: String,
        #[source]
        source: CommunicationError,
    },
}

impl From<PlacementError> for CommunicationError {
    fn from(err: PlacementError) -> Self {
        CommunicationError::rejected(err.to_string())
    }
}

/// Where a service went and the state the wrapper reported back.
#[derive(Debug, Clone)]
pub struct Placement {
    pub wrapper: String,
    pub snapshot: ServiceSnapshot,
}

/// Sends start and clear requests to wrappers.
pub struct ServicePlacer {
    nodes: Arc<NodeDirectory>,
}

impl ServicePlacer {
    pub fn new(nodes: Arc<NodeDirectory>) -> Arc<Self> {
        Arc::new(Self { nodes })
    }

    /// The wrapper using the least memory. Wrappers that do not answer
    /// their status request are skipped.
    pub async fn pick_wrapper(&self) -> Result<NodeInfo, PlacementError> {
        let mut best: Option<(u64, NodeInfo)> = None;
        for node in self.nodes.nodes_of(NodeKind::Wrapper) {
            match node.connection.request(&WrapperStatusPacket {}).await {
                Ok(status) => {
                    debug!(wrapper = %node.name, used_memory_mb = status.used_memory_mb, "Wrapper status");
                    if best.as_ref().map_or(true, |(used, _)| status.used_memory_mb < *used) {
                        best = Some((status.used_memory_mb, node));
                    }
                }
                Err(err) => warn!(wrapper = %node.name, "⚠️ Wrapper status unavailable: {}", err),
            }
        }
        best.map(|(_, node)| node).ok_or(PlacementError::NoWrapper)
    }

    /// Queues `service` on the named wrapper, or on the least loaded one.
    pub async fn start_service(
        &self,
        service: ServiceDescriptor,
        wrapper: Option<&str>,
    ) -> Result<Placement, PlacementError> {
        let node = match wrapper {
            Some(name) => self.nodes.wrapper(name).ok_or_else(|| PlacementError::UnknownWrapper {
                name: name.to_string(),
            })?,
            None => self.pick_wrapper().await?,
        };

        let name = service.name.clone();
        let snapshot = node
            .connection
            .request(&StartServicePacket { service })
            .await
            .map_err(|source| PlacementError::Wrapper {
                wrapper: node.name.clone(),
                service: name.clone(),
                source,
            })?;
        info!(service = %name, wrapper = %node.name, "🚀 Service {} placed on {}", name, node.name);
        Ok(Placement {
            wrapper: node.name,
            snapshot,
        })
    }

    /// Drops everything still queued on the named wrapper.
    pub async fn clear_queue(&self, wrapper: &str) -> Result<usize, PlacementError> {
        let node = self
            .nodes
            .wrapper(wrapper)
            .ok_or_else(|| PlacementError::UnknownWrapper {
                name: wrapper.to_string(),
            })?;
        let ack = node
            .connection
            .request(&ClearQueuePacket {})
            .await
            .map_err(|source| PlacementError::Wrapper {
                wrapper: node.name.clone(),
                service: "queue".to_string(),
                source,
            })?;
        Ok(ack.removed)
    }

    /// Places each service once, retrying every `interval` until a wrapper
    /// takes it. Services the directory already knows are skipped.
    pub fn deploy(
        self: &Arc<Self>,
        services: Vec<ServiceDescriptor>,
        directory: Arc<ServiceDirectory>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<usize> {
        let placer = Arc::clone(self);
        tokio::spawn(async move {
            let mut pending: VecDeque<ServiceDescriptor> = services.into();
            let mut placed = 0;
            let mut ticker = tokio::time::interval(interval);
            while !pending.is_empty() {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.recv() => break,
                }

                for _ in 0..pending.len() {
                    let Some(service) = pending.pop_front() else {
                        break;
                    };
                    if directory.get(&service.name).is_some() {
                        debug!(service = %service.name, "Service already running, not placing");
                        continue;
                    }
                    match placer.start_service(service.clone(), None).await {
                        Ok(_) => placed += 1,
                        Err(PlacementError::NoWrapper) => {
                            pending.push_back(service);
                            break;
                        }
                        Err(err) => {
                            warn!("❌ {}", err);
                            pending.push_back(service);
                        }
                    }
                }
            }
            placed
        })
    }
}
