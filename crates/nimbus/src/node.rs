//! Role-specific node startup.
//!
//! Each role wires the library crates together, runs until the shutdown
//! channel fires (or its manager connection drops) and then tears down in
//! the reverse order it was built.

use crate::config::{AppConfig, NodeRole};
use anyhow::{anyhow, Context};
use nimbus_manager::{JsonPlayerStore, ManagerContext, NodeHelloPacket, NodeKind};
use nimbus_network::{connect, Connection, Dispatcher, HandlerRegistry, NetworkListener, SynchronizedObjectClient};
use nimbus_proxy::{CommandSync, CommandTable, ProxyAdapter, ProxyRouter, RouteTable};
use nimbus_wrapper::{
    CommandLauncher, LifecycleEvents, ServiceLauncher, ServiceProcessQueue, ServiceProcessRegistry,
    StateReporter,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run_node(config: AppConfig, shutdown: broadcast::Sender<()>) -> anyhow::Result<()> {
    match config.node.role {
        NodeRole::Manager => run_manager(&config, &shutdown).await,
        NodeRole::Wrapper => run_wrapper(&config, &shutdown).await,
        NodeRole::Proxy => run_proxy(&config, &shutdown).await,
    }
}

async fn run_manager(config: &AppConfig, shutdown: &broadcast::Sender<()>) -> anyhow::Result<()> {
    let mut shutdown_rx = shutdown.subscribe();
    let store = JsonPlayerStore::open(PathBuf::from(&config.manager.player_directory))
        .await
        .context("failed to open player store")?;
    let context = ManagerContext::new(Arc::new(store))?;
    for command in &config.manager.ingame_commands {
        context.commands.register_command(command)?;
    }

    let dispatcher = Dispatcher::new(Arc::clone(&context.handlers));
    let listener = NetworkListener::bind(
        &config.network.bind_address,
        dispatcher,
        config.request_timeout(),
    )
    .await
    .with_context(|| format!("failed to bind {}", config.network.bind_address))?;

    info!("✅ Manager '{}' accepting cluster members", config.node.name);
    let deployment = context.placer.deploy(
        config.manager.services.clone(),
        Arc::clone(&context.services),
        config.manager.deploy_interval(),
        shutdown.subscribe(),
    );

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(connection) => context.connections.insert(connection),
                Err(err) => warn!("❌ Failed to accept connection: {}", err),
            },
            _ = status.tick() => {
                info!(
                    "📊 {} connections | {} services | {} players online",
                    context.connections.len(),
                    context.services.len(),
                    context.players.len()
                );
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    match deployment.await {
        Ok(placed) => debug!(placed, "Deployment finished"),
        Err(err) => error!("❌ Deployment task failed: {}", err),
    }
    for connection in context.connections.open_connections() {
        connection.close();
    }
    info!("🛑 Manager stopped");
    Ok(())
}

async fn run_wrapper(config: &AppConfig, shutdown: &broadcast::Sender<()>) -> anyhow::Result<()> {
    let mut shutdown_rx = shutdown.subscribe();
    let settings = &config.wrapper;

    let events = LifecycleEvents::default();
    let registry = ServiceProcessRegistry::new(events.clone());
    let launcher: Arc<dyn ServiceLauncher> = Arc::new(CommandLauncher::new(settings.launch_settings()));
    let queue = ServiceProcessQueue::new(
        Arc::clone(&registry),
        launcher,
        settings.max_simultaneously_starting_services,
        settings.poll_interval(),
    );

    let handlers = Arc::new(HandlerRegistry::new());
    nimbus_wrapper::register_handlers(&handlers, &queue);
    let manager = connect_to_manager(config, handlers, NodeKind::Wrapper).await?;

    let reporter = StateReporter::spawn(
        Arc::clone(&registry),
        &events,
        manager.clone(),
        shutdown.subscribe(),
    );
    let scheduler = queue.spawn(shutdown.subscribe());

    info!(
        "✅ Wrapper '{}' ready ({} simultaneous starts)",
        config.node.name, settings.max_simultaneously_starting_services
    );

    let outcome = tokio::select! {
        _ = shutdown_rx.recv() => Ok(()),
        _ = manager.closed() => Err(anyhow!("connection to manager lost")),
    };

    // Stop the scheduler before touching the queue it drains.
    let _ = shutdown.send(());
    if let Err(err) = scheduler.await {
        error!("❌ Scheduler task failed: {}", err);
    }
    let removed = queue.clear().await;
    let unregistered = registry.unregister_all();
    info!(removed, unregistered, "🧹 Wrapper state released");

    if let Err(err) = reporter.await {
        error!("❌ State reporter task failed: {}", err);
    }
    manager.close();
    outcome
}

async fn run_proxy(config: &AppConfig, shutdown: &broadcast::Sender<()>) -> anyhow::Result<()> {
    let mut shutdown_rx = shutdown.subscribe();

    let routes = Arc::new(RouteTable::new());
    let commands = Arc::new(CommandTable::new());
    let router = ProxyRouter::new(routes.clone(), config.proxy.group.clone());
    let objects = SynchronizedObjectClient::new();

    let handlers = Arc::new(HandlerRegistry::new());
    router.register_handlers(&handlers);
    objects.register_handlers(&handlers);
    let manager = connect_to_manager(config, handlers, NodeKind::Proxy).await?;

    let seeded = router
        .seed_from_manager(&manager)
        .await
        .context("failed to fetch the service list")?;
    let sync = CommandSync::new(commands.clone());
    sync.start(&objects, &manager)
        .await
        .context("failed to replicate in-game commands")?;

    info!(
        "✅ Proxy '{}' routing {} services for group {}",
        config.node.name,
        seeded,
        router.group()
    );

    let outcome = tokio::select! {
        _ = shutdown_rx.recv() => Ok(()),
        _ = manager.closed() => Err(anyhow!("connection to manager lost")),
    };

    info!(
        "🛑 Proxy stopped with {} routes and {} commands",
        routes.routes().len(),
        commands.names().len()
    );
    manager.close();
    outcome
}

async fn connect_to_manager(
    config: &AppConfig,
    handlers: Arc<HandlerRegistry>,
    kind: NodeKind,
) -> anyhow::Result<Connection> {
    let dispatcher = Dispatcher::new(handlers);
    let manager = connect(&config.network.manager_address, &dispatcher, config.request_timeout())
        .await
        .with_context(|| format!("failed to connect to manager at {}", config.network.manager_address))?;

    let welcome = manager
        .request(&NodeHelloPacket {
            name: config.node.name.clone(),
            kind,
        })
        .await
        .context("manager did not accept this node")?;
    if welcome.replaced {
        warn!("⚠️ Manager replaced an older {} named '{}'", kind, config.node.name);
    }
    Ok(manager)
}
