//! Which connected peers are wrappers and which are proxies.
//!
//! Every node introduces itself with a `node.hello` request right after it
//! connects. The manager only places services on peers that said they are
//! wrappers.

use dashmap::DashMap;
use nimbus_network::{Connection, ConnectionId, HandlerRegistry, Packet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Wrapper,
    Proxy,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::Wrapper => "wrapper",
            NodeKind::Proxy => "proxy",
        })
    }
}

/// Sent once by a node after connecting to the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHelloPacket {
    pub name: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeWelcome {
    /// Nodes of the same kind already known under this name are replaced.
    pub replaced: bool,
}

impl Packet for NodeHelloPacket {
    const NAME: &'static str = "node.hello";
    type Response = NodeWelcome;
}

#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: String,
    pub kind: NodeKind,
    pub connection: Connection,
}

/// Introduced nodes by connection. Entries leave when their connection closes.
#[derive(Default)]
pub struct NodeDirectory {
    nodes: DashMap<ConnectionId, NodeInfo>,
}

impl NodeDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records `connection` as the node described by `hello`.
    ///
    /// A second node of the same kind and name replaces the first.
    pub fn introduce(self: &Arc<Self>, connection: Connection, hello: NodeHelloPacket) -> bool {
        let stale: Vec<ConnectionId> = self
            .nodes
            .iter()
            .filter(|entry| {
                entry.key() != &connection.id()
                    && entry.value().kind == hello.kind
                    && entry.value().name == hello.name
            })
            .map(|entry| *entry.key())
            .collect();
        for id in &stale {
            self.nodes.remove(id);
        }

        info!(node = %hello.name, kind = %hello.kind, remote = %connection.remote(), "🤝 Node introduced");
        let id = connection.id();
        let watched = connection.clone();
        self.nodes.insert(
            id,
            NodeInfo {
                name: hello.name,
                kind: hello.kind,
                connection,
            },
        );

        let directory = Arc::downgrade(self);
        tokio::spawn(async move {
            watched.closed().await;
            if let Some(directory) = directory.upgrade() {
                if let Some((_, node)) = directory.nodes.remove(&id) {
                    info!(node = %node.name, kind = %node.kind, "👋 Node left");
                }
            }
        });
        !stale.is_empty()
    }

    /// Open nodes of `kind`, ordered by name.
    pub fn nodes_of(&self, kind: NodeKind) -> Vec<NodeInfo> {
        let mut nodes: Vec<_> = self
            .nodes
            .iter()
            .filter(|entry| entry.value().kind == kind && entry.value().connection.is_open())
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes
    }

    pub fn wrapper(&self, name: &str) -> Option<NodeInfo> {
        self.nodes_of(NodeKind::Wrapper)
            .into_iter()
            .find(|node| node.name == name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

pub fn register_handlers(handlers: &HandlerRegistry, directory: Arc<NodeDirectory>) {
    handlers.register_packet(move |connection, hello: NodeHelloPacket| {
        let directory = Arc::clone(&directory);
        async move {
            Ok(NodeWelcome {
                replaced: directory.introduce(connection, hello),
            })
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_network::DEFAULT_REQUEST_TIMEOUT;
    use std::time::Duration;

    fn hello(name: &str, kind: NodeKind) -> NodeHelloPacket {
        NodeHelloPacket {
            name: name.to_string(),
            kind,
        }
    }

    #[tokio::test]
    async fn test_nodes_are_grouped_by_kind_and_leave_on_close() {
        let directory = NodeDirectory::new();
        let (wrapper_b, _rx1) = Connection::new("10.0.0.3", DEFAULT_REQUEST_TIMEOUT);
        let (wrapper_a, _rx2) = Connection::new("10.0.0.2", DEFAULT_REQUEST_TIMEOUT);
        let (proxy, _rx3) = Connection::new("10.0.0.9", DEFAULT_REQUEST_TIMEOUT);

        assert!(!directory.introduce(wrapper_b.clone(), hello("wrapper-b", NodeKind::Wrapper)));
        assert!(!directory.introduce(wrapper_a.clone(), hello("wrapper-a", NodeKind::Wrapper)));
        assert!(!directory.introduce(proxy, hello("proxy-1", NodeKind::Proxy)));

        let names: Vec<_> = directory
            .nodes_of(NodeKind::Wrapper)
            .into_iter()
            .map(|node| node.name)
            .collect();
        assert_eq!(names, vec!["wrapper-a", "wrapper-b"]);
        assert!(directory.wrapper("proxy-1").is_none());

        wrapper_a.close();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while directory.len() != 2 {
            assert!(tokio::time::Instant::now() < deadline, "closed node never left");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(directory.wrapper("wrapper-a").is_none());
    }

    #[tokio::test]
    async fn test_reconnecting_node_replaces_its_old_entry() {
        let directory = NodeDirectory::new();
        let (first, _rx1) = Connection::new("10.0.0.2", DEFAULT_REQUEST_TIMEOUT);
        let (second, _rx2) = Connection::new("10.0.0.2", DEFAULT_REQUEST_TIMEOUT);

        directory.introduce(first, hello("wrapper-a", NodeKind::Wrapper));
        assert!(directory.introduce(second.clone(), hello("wrapper-a", NodeKind::Wrapper)));
        assert_eq!(directory.len(), 1);
        assert_eq!(
            directory.wrapper("wrapper-a").unwrap().connection.id(),
            second.id()
        );
    }
}
