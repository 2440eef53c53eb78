//! End-to-end protocol tests over in-memory streams.

use nimbus_network::{
    spawn_connection, CommunicationError, Connection, Dispatcher, HandlerRegistry, Payload,
    SynchronizedObjectAuthority, SynchronizedObjectClient, DEFAULT_REQUEST_TIMEOUT,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Connects two dispatchers through a duplex pipe; returns (client side, server side).
fn pair(client: Arc<HandlerRegistry>, server: Arc<HandlerRegistry>) -> (Connection, Connection) {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let client = spawn_connection(left, "server", &Dispatcher::new(client), DEFAULT_REQUEST_TIMEOUT);
    let server = spawn_connection(right, "client", &Dispatcher::new(server), DEFAULT_REQUEST_TIMEOUT);
    (client, server)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_are_correlated() {
    let server = Arc::new(HandlerRegistry::new());
    server.register_fn("square", |_, payload: Payload| async move {
        let n: u64 = payload.require("n")?;
        // Later requests answer sooner so responses arrive out of order.
        tokio::time::sleep(Duration::from_millis(50 - n)).await;
        Ok(json!(n * n))
    });
    let (client, _server) = pair(Arc::new(HandlerRegistry::new()), server);

    let promises: Vec<_> = (0..40u64)
        .map(|n| (n, client.send_request("square", json!({ "n": n }))))
        .collect();

    for (n, promise) in promises {
        assert_eq!(promise.await, Ok(json!(n * n)));
    }
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_short_deadline_against_silent_handler() {
    let server = Arc::new(HandlerRegistry::new());
    server.register_fn("silent", |_, _| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Value::Null)
    });
    server.register_fn("ping", |_, _| async { Ok(json!("pong")) });
    let (client, _server) = pair(Arc::new(HandlerRegistry::new()), server);

    let started = Instant::now();
    let silent = client.send_request_with_timeout("silent", json!({}), Duration::from_millis(50));
    let ping = client.send_request("ping", json!({}));

    assert_eq!(silent.await, Err(CommunicationError::Timeout { millis: 50 }));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "fired late: {elapsed:?}");

    // The neighbouring request is unaffected.
    assert_eq!(ping.await, Ok(json!("pong")));
}

#[tokio::test]
async fn test_protocol_failures_surface_as_failed_promises() {
    let server = Arc::new(HandlerRegistry::new());
    server.register_fn("player.lookup", |_, payload: Payload| async move {
        let name: String = payload.require("name")?;
        Ok(json!(name))
    });
    server.register_fn("crash", |_, _| async {
        if true {
            panic!("boom");
        }
        Ok(Value::Null)
    });
    let (client, _server) = pair(Arc::new(HandlerRegistry::new()), server);

    assert_eq!(
        client.send_request("nobody.home", json!({})).await,
        Err(CommunicationError::NoHandler {
            packet: "nobody.home".to_string()
        })
    );
    assert_eq!(
        client.send_request("player.lookup", json!({})).await,
        Err(CommunicationError::missing_content("name"))
    );
    assert!(matches!(
        client.send_request("crash", json!({})).await,
        Err(CommunicationError::Internal { .. })
    ));

    // The connection survives all of the above.
    assert_eq!(
        client.send_request("player.lookup", json!({ "name": "Steve" })).await,
        Ok(json!("Steve"))
    );
}

#[tokio::test]
async fn test_remote_close_fails_pending_requests() {
    let server = Arc::new(HandlerRegistry::new());
    server.register_fn("hang", |_, _| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Value::Null)
    });
    let (client, server_side) = pair(Arc::new(HandlerRegistry::new()), server);

    let first = client.send_request("hang", json!({}));
    let second = client.send_request("hang", json!({}));
    tokio::time::sleep(Duration::from_millis(20)).await;
    server_side.close();

    assert_eq!(first.await, Err(CommunicationError::ConnectionClosed));
    assert_eq!(second.await, Err(CommunicationError::ConnectionClosed));
    client.closed().await;
    assert_eq!(
        client.send_request("hang", json!({})).await,
        Err(CommunicationError::ConnectionClosed)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_synchronized_object_replacement_reaches_listeners_once() {
    let authority = SynchronizedObjectAuthority::new();
    let manager_handlers = Arc::new(HandlerRegistry::new());
    authority.register_handlers(&manager_handlers);

    let client = SynchronizedObjectClient::new();
    let node_handlers = Arc::new(HandlerRegistry::new());
    client.register_handlers(&node_handlers);

    let (to_manager, _from_node) = pair(node_handlers, manager_handlers);

    authority.publish("nimbus-ingamecommands", &vec!["hub"]).unwrap();
    let holder = client
        .request::<Vec<String>>(&to_manager, "nimbus-ingamecommands")
        .await
        .unwrap();
    assert_eq!(holder.get(), vec!["hub".to_string()]);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    holder.add_update_listener(move |commands: &Vec<String>| {
        sink.lock().unwrap().push(commands.clone());
        Ok(())
    });

    for round in 1..=3 {
        let commands: Vec<String> = (0..round).map(|i| format!("cmd{i}")).collect();
        authority.publish("nimbus-ingamecommands", &commands).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    while holder.version() < 4 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let expected_last = vec!["cmd0".to_string(), "cmd1".to_string(), "cmd2".to_string()];
    assert_eq!(holder.get(), expected_last);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0], vec!["cmd0".to_string()]);
    assert_eq!(seen[2], expected_last);
}

#[tokio::test]
async fn test_request_for_unknown_object_fails() {
    let authority = SynchronizedObjectAuthority::new();
    let manager_handlers = Arc::new(HandlerRegistry::new());
    authority.register_handlers(&manager_handlers);
    let client = SynchronizedObjectClient::new();
    let (to_manager, _) = pair(Arc::new(HandlerRegistry::new()), manager_handlers);

    let result = client.request::<Vec<String>>(&to_manager, "missing").await;
    assert!(matches!(result, Err(CommunicationError::Rejected { .. })));
}
