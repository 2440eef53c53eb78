//! Synchronized objects: named, versioned values owned by the manager and
//! replicated to every node that asks for them.
//!
//! A node requests an object once through [`SynchronizedObjectClient::request`].
//! The manager's [`SynchronizedObjectAuthority`] answers with the current
//! snapshot and records the connection as a subscriber; every later
//! [`publish`](SynchronizedObjectAuthority::publish) is pushed to subscribers
//! as a `sync_object.push` notification. The requester's [`ObjectHolder`]
//! replaces its value wholesale on each push and runs its update listeners in
//! registration order.
//!
//! Pushes for one object are sent while its entry is locked, and
//! notifications are applied on a single per-connection lane, so replicas see
//! versions in the order the authority issued them. Replicas ignore any push
//! whose version is not newer than the one they hold.

use crate::connection::Connection;
use crate::dispatch::panic_message;
use crate::error::CommunicationError;
use crate::handler::HandlerRegistry;
use crate::packet::{Notification, Packet};
use crate::promise::CommunicationPromise;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};

/// Asks the authority for an object and subscribes to its pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncObjectRequest {
    pub name: String,
}

impl Packet for SyncObjectRequest {
    const NAME: &'static str = "sync_object.request";
    type Response = SyncObjectSnapshot;
}

/// One version of an object; both the request response and the push packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncObjectSnapshot {
    pub name: String,
    pub version: u64,
    pub value: Value,
}

impl Notification for SyncObjectSnapshot {
    const NAME: &'static str = "sync_object.push";
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct AuthorityEntry {
    version: u64,
    value: Value,
    subscribers: Vec<Connection>,
}

/// Manager-side owner of every synchronized object.
#[derive(Default)]
pub struct SynchronizedObjectAuthority {
    objects: DashMap<String, Arc<Mutex<AuthorityEntry>>>,
}

impl SynchronizedObjectAuthority {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replaces the value of `name` and pushes it to every open subscriber.
    ///
    /// Returns the new version. Subscribers whose connection has closed are
    /// dropped.
    pub fn publish<T: Serialize>(&self, name: &str, value: &T) -> Result<u64, CommunicationError> {
        let value = serde_json::to_value(value).map_err(CommunicationError::malformed)?;
        let entry = self
            .objects
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(AuthorityEntry {
                    version: 0,
                    value: Value::Null,
                    subscribers: Vec::new(),
                }))
            })
            .clone();

        let mut entry = lock(&entry);
        entry.version += 1;
        entry.value = value;
        entry.subscribers.retain(Connection::is_open);

        let snapshot = SyncObjectSnapshot {
            name: name.to_string(),
            version: entry.version,
            value: entry.value.clone(),
        };
        let mut pushed = 0;
        for subscriber in &entry.subscribers {
            match subscriber.send_notification(&snapshot) {
                Ok(()) => pushed += 1,
                Err(err) => debug!(connection = %subscriber.id(), object = name, "Push skipped: {}", err),
            }
        }
        info!(object = name, version = entry.version, subscribers = pushed, "🔄 Synchronized object published");
        Ok(entry.version)
    }

    /// Current snapshot, if the object has ever been published.
    pub fn get(&self, name: &str) -> Option<SyncObjectSnapshot> {
        let entry = self.objects.get(name)?.clone();
        let entry = lock(&entry);
        Some(SyncObjectSnapshot {
            name: name.to_string(),
            version: entry.version,
            value: entry.value.clone(),
        })
    }

    /// Adds `connection` as a subscriber and returns the snapshot it starts from.
    ///
    /// Fails with [`CommunicationError::Rejected`] for an object that was
    /// never published.
    pub fn subscribe(&self, name: &str, connection: Connection) -> Result<SyncObjectSnapshot, CommunicationError> {
        let entry = self
            .objects
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| CommunicationError::rejected(format!("unknown synchronized object '{name}'")))?;

        let mut entry = lock(&entry);
        if !entry.subscribers.contains(&connection) {
            debug!(connection = %connection.id(), object = name, "📡 Subscriber added");
            entry.subscribers.push(connection);
        }
        Ok(SyncObjectSnapshot {
            name: name.to_string(),
            version: entry.version,
            value: entry.value.clone(),
        })
    }

    pub fn subscriber_count(&self, name: &str) -> usize {
        self.objects
            .get(name)
            .map(|entry| lock(entry.value()).subscribers.iter().filter(|c| c.is_open()).count())
            .unwrap_or(0)
    }

    /// Answers `sync_object.request` from remote nodes.
    pub fn register_handlers(self: &Arc<Self>, handlers: &HandlerRegistry) {
        let authority = Arc::clone(self);
        handlers.register_packet(move |connection, request: SyncObjectRequest| {
            let authority = Arc::clone(&authority);
            async move { authority.subscribe(&request.name, connection) }
        });
    }
}

trait Replica: Send + Sync {
    fn apply(&self, snapshot: &SyncObjectSnapshot);
}

type UpdateListener<T> = Arc<dyn Fn(u64, &T) -> anyhow::Result<()> + Send + Sync>;

struct HolderInner<T> {
    name: String,
    state: RwLock<(u64, T)>,
    listeners: Mutex<Vec<UpdateListener<T>>>,
}

/// Local replica of a synchronized object.
pub struct ObjectHolder<T> {
    inner: Arc<HolderInner<T>>,
}

impl<T> Clone for ObjectHolder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> ObjectHolder<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn new(name: String, version: u64, value: T) -> Self {
        Self {
            inner: Arc::new(HolderInner {
                name,
                state: RwLock::new((version, value)),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn version(&self) -> u64 {
        self.read_state().0
    }

    /// A copy of the current value.
    pub fn get(&self) -> T {
        self.read_state().1.clone()
    }

    /// The current version and value, read together.
    pub fn versioned(&self) -> (u64, T) {
        let state = self.read_state();
        (state.0, state.1.clone())
    }

    /// Registers a reaction run on every replacement, after earlier listeners.
    ///
    /// Errors and panics from a listener are logged and do not stop the
    /// remaining listeners.
    pub fn add_update_listener<F>(&self, listener: F) -> &Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_versioned_listener(move |_, value| listener(value))
    }

    /// Like [`add_update_listener`](Self::add_update_listener), but the
    /// listener also receives the version it is being handed.
    pub fn add_versioned_listener<F>(&self, listener: F) -> &Self
    where
        F: Fn(u64, &T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        lock(&self.inner.listeners).push(Arc::new(listener));
        self
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, (u64, T)> {
        self.inner
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn replace(&self, version: u64, value: T) {
        {
            let mut state = self
                .inner
                .state
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if version <= state.0 {
                debug!(object = %self.inner.name, version, current = state.0, "Ignoring stale push");
                return;
            }
            *state = (version, value.clone());
        }

        let listeners: Vec<UpdateListener<T>> = lock(&self.inner.listeners).clone();
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(version, &value))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(object = %self.inner.name, version, "Update listener failed: {:#}", err)
                }
                Err(panic) => {
                    error!(object = %self.inner.name, version, "💥 Update listener panicked: {}", panic_message(panic.as_ref()))
                }
            }
        }
    }
}

impl<T> Replica for ObjectHolder<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn apply(&self, snapshot: &SyncObjectSnapshot) {
        match T::deserialize(&snapshot.value) {
            Ok(value) => self.replace(snapshot.version, value),
            Err(err) => warn!(object = %snapshot.name, version = snapshot.version, "Undecodable push: {}", err),
        }
    }
}

impl<T> fmt::Debug for ObjectHolder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHolder")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct ClientState {
    replicas: HashMap<String, Vec<Arc<dyn Replica>>>,
    // Pushes that overtook the response to their own request.
    early: HashMap<String, SyncObjectSnapshot>,
}

/// Node-side registry of replicas.
#[derive(Default)]
pub struct SynchronizedObjectClient {
    state: Mutex<ClientState>,
}

impl SynchronizedObjectClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Applies `sync_object.push` notifications to local replicas.
    pub fn register_handlers(self: &Arc<Self>, handlers: &HandlerRegistry) {
        let client = Arc::clone(self);
        handlers.register_notification(move |_connection, snapshot: SyncObjectSnapshot| {
            let client = Arc::clone(&client);
            async move {
                client.apply_push(snapshot);
                Ok(())
            }
        });
    }

    /// Requests `name` from the manager on `connection`.
    ///
    /// The promise fails if the request fails or the value does not decode
    /// as `T`.
    pub fn request<T>(self: &Arc<Self>, connection: &Connection, name: &str) -> CommunicationPromise<ObjectHolder<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let client = Arc::clone(self);
        connection
            .request(&SyncObjectRequest {
                name: name.to_string(),
            })
            .then(move |snapshot| {
                let value = T::deserialize(&snapshot.value).map_err(CommunicationError::malformed)?;
                let holder = ObjectHolder::new(snapshot.name.clone(), snapshot.version, value);
                client.attach(&snapshot.name, holder.clone());
                Ok(holder)
            })
    }

    fn attach<T>(&self, name: &str, holder: ObjectHolder<T>)
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let early = {
            let mut state = lock(&self.state);
            state
                .replicas
                .entry(name.to_string())
                .or_default()
                .push(Arc::new(holder.clone()));
            state.early.get(name).cloned()
        };
        if let Some(snapshot) = early {
            holder.apply(&snapshot);
        }
        debug!(object = name, version = holder.version(), "📥 Replica attached");
    }

    fn apply_push(&self, snapshot: SyncObjectSnapshot) {
        let replicas = {
            let mut state = lock(&self.state);
            let newer = state
                .early
                .get(&snapshot.name)
                .map_or(true, |held| held.version < snapshot.version);
            if newer {
                state.early.insert(snapshot.name.clone(), snapshot.clone());
            }
            state.replicas.get(&snapshot.name).cloned().unwrap_or_default()
        };
        for replica in replicas {
            replica.apply(&snapshot);
        }
    }

    pub fn replica_count(&self, name: &str) -> usize {
        lock(&self.state).replicas.get(name).map_or(0, Vec::len)
    }
}
