use async_trait::async_trait;
use nimbus_network::{spawn_connection, Dispatcher, HandlerRegistry, DEFAULT_REQUEST_TIMEOUT};
use nimbus_wrapper::{
    register_handlers, ClearQueuePacket, LaunchError, LifecycleEvents, ServiceDescriptor,
    ServiceHandle, ServiceLauncher, ServiceProcessQueue, ServiceProcessRegistry, ServiceState,
    StartServicePacket, WrapperStatusPacket,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Goes `Starting`, then `Visible` after a short boot.
#[derive(Default)]
struct BootingLauncher {
    booting: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    launched: Arc<AtomicUsize>,
}

#[async_trait]
impl ServiceLauncher for BootingLauncher {
    async fn launch(&self, service: &ServiceHandle) -> Result<(), LaunchError> {
        let now = self.booting.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.launched.fetch_add(1, Ordering::SeqCst);
        service.set_state(ServiceState::Starting);

        let booting = Arc::clone(&self.booting);
        let service = service.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            booting.fetch_sub(1, Ordering::SeqCst);
            service.set_state(ServiceState::Visible);
        });
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ceiling_holds_while_five_services_start() {
    let launcher = Arc::new(BootingLauncher::default());
    let peak = Arc::clone(&launcher.peak);
    let registry = ServiceProcessRegistry::new(LifecycleEvents::default());
    let queue = ServiceProcessQueue::new(
        Arc::clone(&registry),
        launcher,
        2,
        Duration::from_millis(10),
    );

    let mut processes = Vec::new();
    for i in 1..=5 {
        let descriptor = ServiceDescriptor::new(format!("lobby-{i}"), "lobby", 30000 + i);
        processes.push(queue.enqueue(descriptor).await.unwrap());
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = queue.spawn(shutdown_rx);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        assert!(queue.starting_len().await <= 2);
        if processes.iter().all(|p| p.state() == ServiceState::Visible) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "services never became visible");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(queue.queued_len().await, 0);
    assert_eq!(registry.len(), 5);

    shutdown_tx.send(()).unwrap();
    scheduler.await.unwrap();
}

#[tokio::test]
async fn test_manager_drives_wrapper_over_connection() {
    let launcher = Arc::new(BootingLauncher::default());
    let launched = Arc::clone(&launcher.launched);
    let registry = ServiceProcessRegistry::new(LifecycleEvents::default());
    let queue = ServiceProcessQueue::new(Arc::clone(&registry), launcher, 1, Duration::from_millis(10));

    let wrapper_handlers = Arc::new(HandlerRegistry::new());
    register_handlers(&wrapper_handlers, &queue);

    let (manager_side, wrapper_side) = tokio::io::duplex(64 * 1024);
    let to_wrapper = spawn_connection(
        manager_side,
        "wrapper",
        &Dispatcher::new(Arc::new(HandlerRegistry::new())),
        DEFAULT_REQUEST_TIMEOUT,
    );
    let _to_manager = spawn_connection(
        wrapper_side,
        "manager",
        &Dispatcher::new(wrapper_handlers),
        DEFAULT_REQUEST_TIMEOUT,
    );

    for i in 1..=3 {
        let snapshot = to_wrapper
            .request(&StartServicePacket {
                service: ServiceDescriptor::new(format!("lobby-{i}"), "lobby", 30000 + i),
            })
            .await
            .unwrap();
        assert_eq!(snapshot.state, ServiceState::Queued);
    }

    // Duplicate names are rejected, not queued twice.
    let duplicate = to_wrapper
        .request(&StartServicePacket {
            service: ServiceDescriptor::new("lobby-1", "lobby", 30001),
        })
        .await;
    assert!(duplicate.is_err());

    let status = to_wrapper.request(&WrapperStatusPacket {}).await.unwrap();
    assert_eq!(status.registered, 3);
    assert_eq!(status.queued, 3);
    assert_eq!(status.used_memory_mb, 3 * 512);

    // Start one, then clear the rest before they get a slot.
    queue.tick().await;
    let cleared = to_wrapper.request(&ClearQueuePacket {}).await.unwrap();
    assert_eq!(cleared.removed, 2);
    assert_eq!(launched.load(Ordering::SeqCst), 1);
    assert!(registry.contains("lobby-1"));
    assert!(!registry.contains("lobby-2"));
    assert!(!registry.contains("lobby-3"));
}
