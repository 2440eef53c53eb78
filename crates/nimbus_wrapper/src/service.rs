//! Service identity and its live status cell.

use crate::state::ServiceState;
use nimbus_network::Notification;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Static description of one game-server instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub group: String,
    #[serde(default)]
    pub proxy: bool,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    /// Proxy groups this service must not be routed from.
    #[serde(default)]
    pub hidden_at_proxy_groups: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_max_memory_mb() -> u64 {
    512
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, group: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            proxy: false,
            host: default_host(),
            port,
            max_memory_mb: default_max_memory_mb(),
            hidden_at_proxy_groups: Vec::new(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_hidden_at(&self, proxy_group: &str) -> bool {
        self.hidden_at_proxy_groups.iter().any(|group| group == proxy_group)
    }
}

/// Shared handle to a service; its state is read live from one status cell.
///
/// Clones observe and mutate the same cell, so a launcher, the scheduler and
/// any reporter all see the latest state without caching it.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    descriptor: Arc<ServiceDescriptor>,
    status: Arc<watch::Sender<ServiceState>>,
}

impl ServiceHandle {
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        let (status, _) = watch::channel(ServiceState::Queued);
        Self {
            descriptor: Arc::new(descriptor),
            status: Arc::new(status),
        }
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn state(&self) -> ServiceState {
        *self.status.borrow()
    }

    /// Moves to `next` if the lifecycle allows it. Returns whether it changed.
    pub fn set_state(&self, next: ServiceState) -> bool {
        let mut from = None;
        let changed = self.status.send_if_modified(|current| {
            if current.can_transition_to(next) {
                from = Some(*current);
                *current = next;
                true
            } else {
                false
            }
        });
        match from {
            Some(from) => debug!(service = %self.descriptor.name, %from, to = %next, "Service state changed"),
            None => debug!(service = %self.descriptor.name, current = %self.state(), requested = %next, "Ignoring state change"),
        }
        changed
    }

    /// Receiver that observes every later state change.
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.status.subscribe()
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            service: (*self.descriptor).clone(),
            state: self.state(),
        }
    }

    /// Whether both handles share the same status cell.
    pub fn same_service(&self, other: &ServiceHandle) -> bool {
        Arc::ptr_eq(&self.status, &other.status)
    }
}

/// Observed state of a service, reported to the manager and relayed to proxies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    #[serde(flatten)]
    pub service: ServiceDescriptor,
    pub state: ServiceState,
}

impl Notification for ServiceSnapshot {
    const NAME: &'static str = "service.update";
}
