//! Named lifecycle events emitted by the registry and the scheduler.
//!
//! Every event is logged for operators and broadcast to in-process
//! subscribers (the state reporter, tests, shutdown logic).

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Registered { service: String },
    Unregistered { service: String },
    Queued { service: String },
    Starting { service: String },
    LaunchFailed { service: String, reason: String },
    Stopped { service: String },
    QueueCleared { removed: usize },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Registered { .. } => "service.registered",
            LifecycleEvent::Unregistered { .. } => "service.unregistered",
            LifecycleEvent::Queued { .. } => "service.queued",
            LifecycleEvent::Starting { .. } => "service.starting",
            LifecycleEvent::LaunchFailed { .. } => "service.launch_failed",
            LifecycleEvent::Stopped { .. } => "service.stopped",
            LifecycleEvent::QueueCleared { .. } => "queue.cleared",
        }
    }

    fn log(&self) {
        match self {
            LifecycleEvent::Registered { service } => info!("📝 Service {} registered", service),
            LifecycleEvent::Unregistered { service } => info!("🗑️ Service {} unregistered", service),
            LifecycleEvent::Queued { service } => info!("📥 Service {} is now queued", service),
            LifecycleEvent::Starting { service } => info!("🚀 Service {} is starting", service),
            LifecycleEvent::LaunchFailed { service, reason } => {
                warn!("❌ Service {} failed to launch: {}", service, reason)
            }
            LifecycleEvent::Stopped { service } => info!("🛑 Service {} stopped", service),
            LifecycleEvent::QueueCleared { removed } => {
                info!("🧹 Queue cleared, {} queued services removed", removed)
            }
        }
    }
}

/// Broadcast channel for [`LifecycleEvent`]s.
#[derive(Debug, Clone)]
pub struct LifecycleEvents {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: LifecycleEvent) {
        event.log();
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Default for LifecycleEvents {
    fn default() -> Self {
        Self::new(256)
    }
}
