//! Admission-bounded launch scheduler.
//!
//! Queued processes wait in a FIFO. On every tick the scheduler first
//! reclaims admission slots from processes that have left `Starting`
//! (`Visible`, `Invisible` or `Closed`), then launches queued processes in
//! order until the number of starting processes reaches the ceiling. Each
//! launch runs on its own task; the scheduler learns about its progress only
//! through the service state.
//!
//! A failed launch leaves the service `Closed`, which frees its slot on the
//! next tick. Failed launches are not retried.

use crate::error::WrapperError;
use crate::events::{LifecycleEvent, LifecycleEvents};
use crate::launcher::ServiceLauncher;
use crate::process::ServiceProcess;
use crate::registry::ServiceProcessRegistry;
use crate::service::{ServiceDescriptor, ServiceHandle};
use crate::state::ServiceState;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

/// Default scheduler poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// What one scheduler tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub reclaimed: usize,
    pub launched: Vec<String>,
    /// Size of the starting set after the tick.
    pub starting: usize,
    /// Processes still queued after the tick.
    pub queued: usize,
}

pub struct ServiceProcessQueue {
    registry: Arc<ServiceProcessRegistry>,
    launcher: Arc<dyn ServiceLauncher>,
    events: LifecycleEvents,
    queue: Mutex<VecDeque<Arc<ServiceProcess>>>,
    starting: Mutex<Vec<Arc<ServiceProcess>>>,
    max_starting: usize,
    poll_interval: Duration,
}

impl ServiceProcessQueue {
    pub fn new(
        registry: Arc<ServiceProcessRegistry>,
        launcher: Arc<dyn ServiceLauncher>,
        max_starting: usize,
        poll_interval: Duration,
    ) -> Arc<Self> {
        let events = registry.events().clone();
        Arc::new(Self {
            registry,
            launcher,
            events,
            queue: Mutex::new(VecDeque::new()),
            starting: Mutex::new(Vec::new()),
            max_starting,
            poll_interval,
        })
    }

    pub fn registry(&self) -> &Arc<ServiceProcessRegistry> {
        &self.registry
    }

    pub fn max_starting(&self) -> usize {
        self.max_starting
    }

    /// Wraps the service in a process, registers it and appends it to the FIFO.
    pub async fn enqueue(&self, descriptor: ServiceDescriptor) -> Result<Arc<ServiceProcess>, WrapperError> {
        let process = ServiceProcess::new(ServiceHandle::new(descriptor), Arc::clone(&self.launcher));
        self.registry.register(Arc::clone(&process))?;
        self.queue.lock().await.push_back(Arc::clone(&process));

        self.events.emit(LifecycleEvent::Queued {
            service: process.name().to_string(),
        });
        debug!(used_memory_mb = self.registry.used_memory_mb(), "Wrapper memory reserved");
        Ok(process)
    }

    /// Runs one reclaim-then-admit pass.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        let mut starting = self.starting.lock().await;

        let before = starting.len();
        starting.retain(|process| !process.state().has_left_starting());
        report.reclaimed = before - starting.len();

        let mut queue = self.queue.lock().await;
        while starting.len() < self.max_starting {
            let Some(process) = queue.pop_front() else {
                break;
            };
            if process.state() != ServiceState::Queued {
                debug!(service = %process.name(), state = %process.state(), "Skipping process that left the queue state");
                continue;
            }
            report.launched.push(process.name().to_string());
            self.launch(Arc::clone(&process));
            starting.push(process);
        }

        report.starting = starting.len();
        report.queued = queue.len();
        if report.reclaimed > 0 || !report.launched.is_empty() {
            trace!(?report, "Scheduler tick");
        }
        report
    }

    fn launch(&self, process: Arc<ServiceProcess>) {
        let events = self.events.clone();
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            events.emit(LifecycleEvent::Starting {
                service: process.name().to_string(),
            });
            if let Err(err) = process.start().await {
                events.emit(LifecycleEvent::LaunchFailed {
                    service: process.name().to_string(),
                    reason: err.to_string(),
                });
                registry.unregister(&process);
            }
        });
    }

    /// Ticks every poll interval until `shutdown` fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            max_starting = self.max_starting,
            interval_ms = self.poll_interval.as_millis() as u64,
            "⏱️ Service scheduler running"
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    info!("🛑 Service scheduler stopping");
                    break;
                }
            }
        }
    }

    pub fn spawn(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.run(shutdown).await })
    }

    /// Drops every queued process and unregisters it. Started processes stay.
    pub async fn clear(&self) -> usize {
        let drained: Vec<_> = self.queue.lock().await.drain(..).collect();
        for process in &drained {
            self.registry.unregister(process);
            process.service().set_state(ServiceState::Closed);
        }
        self.events.emit(LifecycleEvent::QueueCleared {
            removed: drained.len(),
        });
        drained.len()
    }

    pub async fn queued_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn starting_len(&self) -> usize {
        self.starting.lock().await.len()
    }

    pub async fn queued_names(&self) -> Vec<String> {
        self.queue
            .lock()
            .await
            .iter()
            .map(|process| process.name().to_string())
            .collect()
    }
}
