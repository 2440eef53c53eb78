//! Packets the manager sends to a wrapper.

use crate::queue::ServiceProcessQueue;
use crate::service::{ServiceDescriptor, ServiceSnapshot};
use nimbus_network::{CommunicationError, HandlerRegistry, Packet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Queue a service for launch on this wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartServicePacket {
    pub service: ServiceDescriptor,
}

impl Packet for StartServicePacket {
    const NAME: &'static str = "wrapper.start_service";
    type Response = ServiceSnapshot;
}

/// Drop every service still waiting in the queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClearQueuePacket {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearQueueAck {
    pub removed: usize,
}

impl Packet for ClearQueuePacket {
    const NAME: &'static str = "wrapper.clear_queue";
    type Response = ClearQueueAck;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WrapperStatusPacket {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperStatus {
    pub registered: usize,
    pub queued: usize,
    pub starting: usize,
    pub used_memory_mb: u64,
    pub max_simultaneously_starting_services: usize,
}

impl Packet for WrapperStatusPacket {
    const NAME: &'static str = "wrapper.status";
    type Response = WrapperStatus;
}

pub fn register_handlers(handlers: &HandlerRegistry, queue: &Arc<ServiceProcessQueue>) {
    let start_queue = Arc::clone(queue);
    handlers.register_packet(move |_connection, packet: StartServicePacket| {
        let queue = Arc::clone(&start_queue);
        async move {
            let process = queue
                .enqueue(packet.service)
                .await
                .map_err(CommunicationError::from)?;
            Ok(process.service().snapshot())
        }
    });

    let clear_queue = Arc::clone(queue);
    handlers.register_packet(move |_connection, _packet: ClearQueuePacket| {
        let queue = Arc::clone(&clear_queue);
        async move {
            Ok(ClearQueueAck {
                removed: queue.clear().await,
            })
        }
    });

    let status_queue = Arc::clone(queue);
    handlers.register_packet(move |_connection, _packet: WrapperStatusPacket| {
        let queue = Arc::clone(&status_queue);
        async move {
            Ok(WrapperStatus {
                registered: queue.registry().len(),
                queued: queue.queued_len().await,
                starting: queue.starting_len().await,
                used_memory_mb: queue.registry().used_memory_mb(),
                max_simultaneously_starting_services: queue.max_starting(),
            })
        }
    });
}
