//! # Nimbus Wrapper
//!
//! The part of a wrapper node that owns service processes: a registry of
//! everything this node is responsible for, and a scheduler that launches
//! queued services while keeping the number of simultaneously starting
//! services under a ceiling.
//!
//! Service state lives in a shared status cell ([`ServiceHandle`]) that the
//! launcher writes and the scheduler, registry and [`StateReporter`] read.

pub mod error;
pub mod events;
pub mod handlers;
pub mod launcher;
pub mod process;
pub mod queue;
pub mod registry;
pub mod reporter;
pub mod service;
pub mod state;

pub use error::WrapperError;
pub use events::{LifecycleEvent, LifecycleEvents};
pub use handlers::{
    register_handlers, ClearQueueAck, ClearQueuePacket, StartServicePacket, WrapperStatus,
    WrapperStatusPacket,
};
pub use launcher::{CommandLauncher, LaunchError, LaunchSettings, ServiceLauncher};
pub use process::ServiceProcess;
pub use queue::{ServiceProcessQueue, TickReport, DEFAULT_POLL_INTERVAL};
pub use registry::ServiceProcessRegistry;
pub use reporter::StateReporter;
pub use service::{ServiceDescriptor, ServiceHandle, ServiceSnapshot};
pub use state::ServiceState;
