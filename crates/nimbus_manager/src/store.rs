//! Persistence of offline player records.

use crate::player::OfflineCloudPlayer;
use async_trait::async_trait;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt player record {path}: {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait PlayerStore: Send + Sync {
    async fn get_offline_player(&self, unique_id: Uuid) -> Result<Option<OfflineCloudPlayer>, PersistenceError>;
    async fn save_offline_player(&self, player: &OfflineCloudPlayer) -> Result<(), PersistenceError>;
}

/// Keeps records in memory only.
#[derive(Default)]
pub struct MemoryPlayerStore {
    players: DashMap<Uuid, OfflineCloudPlayer>,
}

impl MemoryPlayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[async_trait]
impl PlayerStore for MemoryPlayerStore {
    async fn get_offline_player(&self, unique_id: Uuid) -> Result<Option<OfflineCloudPlayer>, PersistenceError> {
        Ok(self.players.get(&unique_id).map(|entry| entry.value().clone()))
    }

    async fn save_offline_player(&self, player: &OfflineCloudPlayer) -> Result<(), PersistenceError> {
        self.players.insert(player.unique_id, player.clone());
        Ok(())
    }
}

/// One pretty-printed JSON file per player, named by unique id.
pub struct JsonPlayerStore {
    directory: PathBuf,
}

impl JsonPlayerStore {
    /// Opens the store, creating `directory` if needed.
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|source| PersistenceError::Io {
                path: directory.clone(),
                source,
            })?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, unique_id: Uuid) -> PathBuf {
        self.directory.join(format!("{unique_id}.json"))
    }
}

#[async_trait]
impl PlayerStore for JsonPlayerStore {
    async fn get_offline_player(&self, unique_id: Uuid) -> Result<Option<OfflineCloudPlayer>, PersistenceError> {
        let path = self.path_for(unique_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(PersistenceError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| PersistenceError::Codec { path, source })
    }

    async fn save_offline_player(&self, player: &OfflineCloudPlayer) -> Result<(), PersistenceError> {
        let path = self.path_for(player.unique_id);
        let bytes = serde_json::to_vec_pretty(player).map_err(|source| PersistenceError::Codec {
            path: path.clone(),
            source,
        })?;

        // Write then rename so readers never see a half-written record.
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|source| PersistenceError::Io {
                path: staging.clone(),
                source,
            })?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|source| PersistenceError::Io {
                path: path.clone(),
                source,
            })?;
        debug!(player = %player.name, path = %path.display(), "💾 Offline player saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(name: &str) -> OfflineCloudPlayer {
        OfflineCloudPlayer {
            name: name.to_string(),
            unique_id: Uuid::new_v4(),
            first_login: 1,
            last_login: 2,
            online_time: 3,
            properties: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_json_store_persists_across_instances() {
        let directory = tempfile::tempdir().unwrap();
        let player = record("Alex");

        let store = JsonPlayerStore::open(directory.path().join("players")).await.unwrap();
        assert_eq!(store.get_offline_player(player.unique_id).await.unwrap(), None);
        store.save_offline_player(&player).await.unwrap();

        let reopened = JsonPlayerStore::open(directory.path().join("players")).await.unwrap();
        assert_eq!(
            reopened.get_offline_player(player.unique_id).await.unwrap(),
            Some(player)
        );
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let directory = tempfile::tempdir().unwrap();
        let store = JsonPlayerStore::open(directory.path()).await.unwrap();
        let unique_id = Uuid::new_v4();
        tokio::fs::write(store.path_for(unique_id), b"{ nope").await.unwrap();

        assert!(matches!(
            store.get_offline_player(unique_id).await,
            Err(PersistenceError::Codec { .. })
        ));
    }

    #[tokio::test]
    async fn test_memory_store_overwrites() {
        let store = MemoryPlayerStore::new();
        let mut player = record("Alex");
        store.save_offline_player(&player).await.unwrap();
        player.online_time = 99;
        store.save_offline_player(&player).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get_offline_player(player.unique_id).await.unwrap().unwrap().online_time,
            99
        );
    }
}
