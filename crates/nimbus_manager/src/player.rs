//! Cloud players and their persisted offline records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// How a player reached the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConnection {
    pub unique_id: Uuid,
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub online_mode: bool,
    #[serde(default)]
    pub protocol_version: i32,
}

/// A player currently connected somewhere in the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudPlayer {
    pub name: String,
    pub unique_id: Uuid,
    pub first_login: u64,
    pub last_login: u64,
    /// Accumulated online time in milliseconds.
    pub online_time: u64,
    pub connected_proxy: String,
    pub connected_server: Option<String>,
    pub connection: PlayerConnection,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl CloudPlayer {
    /// A player logging in at `now` through `proxy`, continuing `offline` if known.
    pub fn login(
        connection: PlayerConnection,
        proxy: String,
        offline: Option<OfflineCloudPlayer>,
        now: u64,
    ) -> Self {
        let (first_login, online_time, properties) = match offline {
            Some(offline) => (offline.first_login, offline.online_time, offline.properties),
            None => (now, 0, BTreeMap::new()),
        };
        Self {
            name: connection.name.clone(),
            unique_id: connection.unique_id,
            first_login,
            last_login: now,
            online_time,
            connected_proxy: proxy,
            connected_server: None,
            connection,
            properties,
        }
    }

    pub fn to_offline(&self) -> OfflineCloudPlayer {
        OfflineCloudPlayer {
            name: self.name.clone(),
            unique_id: self.unique_id,
            first_login: self.first_login,
            last_login: self.last_login,
            online_time: self.online_time,
            properties: self.properties.clone(),
        }
    }
}

/// What survives of a player between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineCloudPlayer {
    pub name: String,
    pub unique_id: Uuid,
    pub first_login: u64,
    pub last_login: u64,
    pub online_time: u64,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connection() -> PlayerConnection {
        PlayerConnection {
            unique_id: Uuid::new_v4(),
            name: "Steve".to_string(),
            address: "10.0.0.7:51234".to_string(),
            online_mode: true,
            protocol_version: 763,
        }
    }

    #[test]
    fn test_first_login_starts_fresh() {
        let player = CloudPlayer::login(connection(), "proxy-1".to_string(), None, 1_000);
        assert_eq!(player.first_login, 1_000);
        assert_eq!(player.last_login, 1_000);
        assert_eq!(player.online_time, 0);
        assert!(player.properties.is_empty());
        assert_eq!(player.connected_server, None);
    }

    #[test]
    fn test_returning_player_keeps_history() {
        let connection = connection();
        let mut properties = BTreeMap::new();
        properties.insert("rank".to_string(), json!("vip"));
        let offline = OfflineCloudPlayer {
            name: "OldName".to_string(),
            unique_id: connection.unique_id,
            first_login: 10,
            last_login: 20,
            online_time: 5_000,
            properties,
        };

        let player = CloudPlayer::login(connection, "proxy-2".to_string(), Some(offline), 9_000);
        assert_eq!(player.name, "Steve");
        assert_eq!(player.first_login, 10);
        assert_eq!(player.last_login, 9_000);
        assert_eq!(player.online_time, 5_000);
        assert_eq!(player.properties["rank"], json!("vip"));
        assert_eq!(player.to_offline().last_login, 9_000);
    }
}
