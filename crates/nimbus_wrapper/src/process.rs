use crate::launcher::{LaunchError, ServiceLauncher};
use crate::service::ServiceHandle;
use crate::state::ServiceState;
use std::fmt;
use std::sync::Arc;

/// A service together with the operation that launches it.
///
/// The state is never cached here; it is always read from the service's
/// status cell.
pub struct ServiceProcess {
    service: ServiceHandle,
    launcher: Arc<dyn ServiceLauncher>,
}

impl ServiceProcess {
    pub fn new(service: ServiceHandle, launcher: Arc<dyn ServiceLauncher>) -> Arc<Self> {
        Arc::new(Self { service, launcher })
    }

    pub fn service(&self) -> &ServiceHandle {
        &self.service
    }

    pub fn name(&self) -> &str {
        self.service.name()
    }

    pub fn state(&self) -> ServiceState {
        self.service.state()
    }

    /// Runs the launcher. A failed launch leaves the service `Closed`.
    pub async fn start(&self) -> Result<(), LaunchError> {
        self.service.set_state(ServiceState::Preparing);
        let result = self.launcher.launch(&self.service).await;
        if result.is_err() {
            self.service.set_state(ServiceState::Closed);
        }
        result
    }
}

impl fmt::Debug for ServiceProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProcess")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}
