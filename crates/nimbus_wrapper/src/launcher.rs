//! Launching service processes.
//!
//! A [`ServiceLauncher`] performs the actual start of a service and is
//! expected to drive it to `Starting`, then to a running state or `Closed`.
//! The scheduler never waits for readiness; it only watches the state.

use crate::service::ServiceHandle;
use crate::state::ServiceState;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to prepare working directory {path}: {source}")]
    WorkingDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn service {service}: {source}")]
    Spawn {
        service: String,
        #[source]
        source: std::io::Error,
    },
    #[error("service {service} cannot be launched: {reason}")]
    Rejected { service: String, reason: String },
}

#[async_trait]
pub trait ServiceLauncher: Send + Sync {
    /// Starts `service`. Returning `Ok` only means the launch is under way.
    async fn launch(&self, service: &ServiceHandle) -> Result<(), LaunchError>;
}

/// How [`CommandLauncher`] starts a service.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub program: String,
    /// Arguments; `{name}`, `{group}`, `{port}` and `{memory}` are substituted.
    pub args: Vec<String>,
    /// Each service runs in `services_directory/<name>`.
    pub services_directory: PathBuf,
    /// Line fragment on stdout that marks the service ready. `None` means ready on spawn.
    pub ready_marker: Option<String>,
    /// State entered once ready.
    pub running_state: ServiceState,
}

/// Launches services as child processes.
pub struct CommandLauncher {
    settings: LaunchSettings,
}

impl CommandLauncher {
    pub fn new(settings: LaunchSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &LaunchSettings {
        &self.settings
    }

    fn expand(&self, arg: &str, service: &ServiceHandle) -> String {
        let descriptor = service.descriptor();
        arg.replace("{name}", &descriptor.name)
            .replace("{group}", &descriptor.group)
            .replace("{port}", &descriptor.port.to_string())
            .replace("{memory}", &descriptor.max_memory_mb.to_string())
    }
}

#[async_trait]
impl ServiceLauncher for CommandLauncher {
    async fn launch(&self, service: &ServiceHandle) -> Result<(), LaunchError> {
        let directory = self.settings.services_directory.join(service.name());
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|source| LaunchError::WorkingDirectory {
                path: directory.clone(),
                source,
            })?;

        let args: Vec<String> = self
            .settings
            .args
            .iter()
            .map(|arg| self.expand(arg, service))
            .collect();

        let child = Command::new(&self.settings.program)
            .args(&args)
            .current_dir(&directory)
            .env("NIMBUS_SERVICE_NAME", service.name())
            .env("NIMBUS_SERVICE_PORT", service.descriptor().port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                service: service.name().to_string(),
                source,
            })?;

        info!(service = %service.name(), pid = ?child.id(), directory = %directory.display(), "⚙️ Service process spawned");
        service.set_state(ServiceState::Starting);

        tokio::spawn(supervise(
            child,
            service.clone(),
            self.settings.ready_marker.clone(),
            self.settings.running_state,
        ));
        Ok(())
    }
}

/// Follows the child's stdout for readiness, then marks it closed on exit.
async fn supervise(mut child: Child, service: ServiceHandle, marker: Option<String>, running: ServiceState) {
    match (marker, child.stdout.take()) {
        (None, _) => {
            service.set_state(running);
        }
        (Some(marker), Some(stdout)) => {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if service.state() == ServiceState::Starting && line.contains(&marker) {
                            debug!(service = %service.name(), "Readiness marker seen");
                            service.set_state(running);
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(service = %service.name(), "Failed to read service output: {}", err);
                        break;
                    }
                }
            }
        }
        (Some(_), None) => {
            warn!(service = %service.name(), "No stdout to watch for readiness");
        }
    }

    match child.wait().await {
        Ok(status) => info!(service = %service.name(), %status, "Service process exited"),
        Err(err) => warn!(service = %service.name(), "Failed to wait for service process: {}", err),
    }
    service.set_state(ServiceState::Closed);
}
