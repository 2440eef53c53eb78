//! # Nimbus Manager
//!
//! The central authority of a Nimbus cluster. It answers player logins from
//! proxies (merging persisted offline records), keeps the cluster-wide
//! service directory current from wrapper reports and relays those reports
//! to proxies, places services on the least loaded wrapper, and owns the
//! synchronized objects every other node replicates.

pub mod commands;
pub mod context;
pub mod nodes;
pub mod placement;
pub mod player;
pub mod players;
pub mod relay;
pub mod store;

pub use commands::{IngameCommandRegistry, IngameCommands, INGAME_COMMANDS_OBJECT};
pub use context::ManagerContext;
pub use nodes::{NodeDirectory, NodeHelloPacket, NodeInfo, NodeKind, NodeWelcome};
pub use placement::{Placement, PlacementError, ServicePlacer};
pub use player::{CloudPlayer, OfflineCloudPlayer, PlayerConnection};
pub use players::{create_cloud_player, CreateCloudPlayerPacket, PlayerCache};
pub use relay::{ServiceDirectory, ServiceListPacket};
pub use store::{JsonPlayerStore, MemoryPlayerStore, PersistenceError, PlayerStore};
