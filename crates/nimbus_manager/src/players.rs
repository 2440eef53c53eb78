//! Online player cache and the `player.create` handler.

use crate::player::{current_millis, CloudPlayer, PlayerConnection};
use crate::store::PlayerStore;
use dashmap::DashMap;
use nimbus_network::{CommunicationError, HandlerRegistry, Packet, Payload};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Sent by a proxy when a player connects to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCloudPlayerPacket {
    pub player_connection: PlayerConnection,
    pub proxy_name: String,
}

impl Packet for CreateCloudPlayerPacket {
    const NAME: &'static str = "player.create";
    type Response = CloudPlayer;
}

/// Players currently online, by unique id.
#[derive(Default)]
pub struct PlayerCache {
    players: DashMap<Uuid, CloudPlayer>,
}

impl PlayerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a player, returning the previous entry.
    pub fn update(&self, player: CloudPlayer) -> Option<CloudPlayer> {
        self.players.insert(player.unique_id, player)
    }

    pub fn get(&self, unique_id: Uuid) -> Option<CloudPlayer> {
        self.players.get(&unique_id).map(|entry| entry.value().clone())
    }

    pub fn get_by_name(&self, name: &str) -> Option<CloudPlayer> {
        self.players
            .iter()
            .find(|entry| entry.value().name.eq_ignore_ascii_case(name))
            .map(|entry| entry.value().clone())
    }

    pub fn remove(&self, unique_id: Uuid) -> Option<CloudPlayer> {
        self.players.remove(&unique_id).map(|(_, player)| player)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

/// Builds the online player for a login, merging the offline record if any.
///
/// The merged player replaces any cached entry and its offline record is
/// saved before the player is returned.
pub async fn create_cloud_player(
    cache: &PlayerCache,
    store: &dyn PlayerStore,
    payload: &Payload,
) -> Result<CloudPlayer, CommunicationError> {
    let connection: PlayerConnection = payload.require("player_connection")?;
    let proxy_name: String = payload.require("proxy_name")?;

    let offline = store
        .get_offline_player(connection.unique_id)
        .await
        .map_err(|err| {
            warn!(player = %connection.name, "Failed to load offline player: {}", err);
            CommunicationError::internal("player store unavailable")
        })?;
    let returning = offline.is_some();

    let player = CloudPlayer::login(connection, proxy_name, offline, current_millis());
    cache.update(player.clone());
    store
        .save_offline_player(&player.to_offline())
        .await
        .map_err(|err| {
            warn!(player = %player.name, "Failed to save offline player: {}", err);
            CommunicationError::internal("player store unavailable")
        })?;

    info!(
        player = %player.name,
        proxy = %player.connected_proxy,
        returning,
        "👤 Player {} connected", player.name
    );
    Ok(player)
}

pub fn register_handlers(handlers: &HandlerRegistry, cache: Arc<PlayerCache>, store: Arc<dyn PlayerStore>) {
    handlers.register_fn(CreateCloudPlayerPacket::NAME, move |_connection, payload: Payload| {
        let cache = Arc::clone(&cache);
        let store = Arc::clone(&store);
        async move {
            let player = create_cloud_player(&cache, store.as_ref(), &payload).await?;
            serde_json::to_value(player).map_err(|err| CommunicationError::internal(err.to_string()))
        }
    });
}
