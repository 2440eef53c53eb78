//! The seam between the cluster and a concrete proxy engine.
//!
//! [`ProxyAdapter`] is the only routing surface the cluster needs: add a
//! route for a service that became reachable, remove it when it is not.
//! [`CommandRegistrar`] does the same for in-game command names. The
//! in-memory [`RouteTable`] and [`CommandTable`] implementations back the
//! standalone proxy node and the tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceRoute {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("service {name} is already registered")]
    AlreadyRegistered { name: String },
    #[error("invalid address for service {name}: {address}")]
    InvalidAddress { name: String, address: String },
}

pub trait ProxyAdapter: Send + Sync {
    fn add_route(&self, route: ServiceRoute) -> Result<(), RouteError>;
    /// Removes the route for `name`; unknown names are ignored.
    fn remove_route(&self, name: &str) -> Option<ServiceRoute>;
    fn routes(&self) -> Vec<ServiceRoute>;
}

pub trait CommandRegistrar: Send + Sync {
    fn register_command(&self, name: &str);
    fn unregister_command(&self, name: &str);
}

/// Routes held in memory.
#[derive(Default)]
pub struct RouteTable {
    routes: RwLock<HashMap<String, ServiceRoute>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<ServiceRoute> {
        self.routes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }
}

impl ProxyAdapter for RouteTable {
    fn add_route(&self, route: ServiceRoute) -> Result<(), RouteError> {
        if route.address.rsplit_once(':').and_then(|(_, port)| port.parse::<u16>().ok()).is_none() {
            return Err(RouteError::InvalidAddress {
                name: route.name,
                address: route.address,
            });
        }
        let mut routes = self.routes.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if routes.contains_key(&route.name) {
            return Err(RouteError::AlreadyRegistered { name: route.name });
        }
        info!("🧭 Registered service {} at {}", route.name, route.address);
        routes.insert(route.name.clone(), route);
        Ok(())
    }

    fn remove_route(&self, name: &str) -> Option<ServiceRoute> {
        let removed = self
            .routes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name);
        if removed.is_some() {
            info!("🧭 Unregistered service {}", name);
        }
        removed
    }

    fn routes(&self) -> Vec<ServiceRoute> {
        let mut routes: Vec<_> = self
            .routes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        routes.sort_by(|a, b| a.name.cmp(&b.name));
        routes
    }
}

/// Command names held in memory.
#[derive(Default)]
pub struct CommandTable {
    names: RwLock<BTreeSet<String>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.names
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl CommandRegistrar for CommandTable {
    fn register_command(&self, name: &str) {
        self.names
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string());
    }

    fn unregister_command(&self, name: &str) {
        self.names
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name);
    }
}
