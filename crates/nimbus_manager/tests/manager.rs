use nimbus_manager::{
    CreateCloudPlayerPacket, JsonPlayerStore, ManagerContext, PlayerConnection, ServiceListPacket,
};
use nimbus_network::{
    spawn_connection, CommunicationError, Connection, Dispatcher, HandlerRegistry, Payload,
    DEFAULT_REQUEST_TIMEOUT,
};
use nimbus_wrapper::{ServiceDescriptor, ServiceSnapshot, ServiceState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Connects a node to the manager; returns the node's handle to the manager.
fn join(manager: &ManagerContext, node_handlers: Arc<HandlerRegistry>, label: &str) -> Connection {
    let (node_side, manager_side) = tokio::io::duplex(64 * 1024);
    let to_manager = spawn_connection(
        node_side,
        "manager",
        &Dispatcher::new(node_handlers),
        DEFAULT_REQUEST_TIMEOUT,
    );
    let to_node = spawn_connection(
        manager_side,
        label,
        &Dispatcher::new(Arc::clone(&manager.handlers)),
        DEFAULT_REQUEST_TIMEOUT,
    );
    manager.connections.insert(to_node);
    to_manager
}

#[tokio::test]
async fn test_service_reports_are_relayed_to_proxies() {
    let directory = tempfile::tempdir().unwrap();
    let store = JsonPlayerStore::open(directory.path()).await.unwrap();
    let manager = ManagerContext::new(Arc::new(store)).unwrap();

    let (relayed_tx, mut relayed) = mpsc::unbounded_channel();
    let proxy_handlers = Arc::new(HandlerRegistry::new());
    proxy_handlers.register_fn("service.update", move |_, payload: Payload| {
        let relayed_tx = relayed_tx.clone();
        async move {
            let snapshot: ServiceSnapshot = payload.decode()?;
            let _ = relayed_tx.send(snapshot);
            Ok(serde_json::Value::Null)
        }
    });

    let wrapper = join(&manager, Arc::new(HandlerRegistry::new()), "wrapper-1");
    let proxy = join(&manager, proxy_handlers, "proxy-1");

    let snapshot = ServiceSnapshot {
        service: ServiceDescriptor::new("lobby-1", "lobby", 30001),
        state: ServiceState::Visible,
    };
    wrapper.send_notification(&snapshot).unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), relayed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, snapshot);

    let listed = proxy.request(&ServiceListPacket {}).await.unwrap();
    assert_eq!(listed, vec![snapshot]);
}

#[tokio::test]
async fn test_player_login_round_trip() {
    let directory = tempfile::tempdir().unwrap();
    let store = JsonPlayerStore::open(directory.path()).await.unwrap();
    let manager = ManagerContext::new(Arc::new(store)).unwrap();
    let proxy = join(&manager, Arc::new(HandlerRegistry::new()), "proxy-1");

    let unique_id = Uuid::new_v4();
    let login = CreateCloudPlayerPacket {
        player_connection: PlayerConnection {
            unique_id,
            name: "Alex".to_string(),
            address: "10.0.0.9:40000".to_string(),
            online_mode: true,
            protocol_version: 763,
        },
        proxy_name: "proxy-1".to_string(),
    };

    let first = proxy.request(&login).await.unwrap();
    assert_eq!(first.connected_proxy, "proxy-1");
    assert!(manager.players.get(unique_id).is_some());
    assert!(directory.path().join(format!("{unique_id}.json")).is_file());

    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = proxy.request(&login).await.unwrap();
    assert_eq!(second.first_login, first.first_login);
    assert!(second.last_login >= first.last_login);

    let missing = proxy
        .send_request("player.create", json!({ "proxy_name": "proxy-1" }))
        .await;
    assert_eq!(missing, Err(CommunicationError::missing_content("player_connection")));
}
