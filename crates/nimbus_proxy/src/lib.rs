//! # Nimbus Proxy
//!
//! Proxy-side glue: turns relayed service reports into route changes on a
//! [`ProxyAdapter`] and keeps the proxy's forwarded in-game commands in
//! step with the manager's synchronized command list.

pub mod adapter;
pub mod commands;
pub mod router;

pub use adapter::{CommandRegistrar, CommandTable, ProxyAdapter, RouteError, RouteTable, ServiceRoute};
pub use commands::CommandSync;
pub use router::ProxyRouter;
