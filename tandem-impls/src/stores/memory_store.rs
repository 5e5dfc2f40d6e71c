use std::sync::Arc;

use async_trait::async_trait;
use crossbeam::atomic::AtomicCell;
use futures_util::{stream, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tandem_core::{
    DisconnectAction, Id, ReplicatedStore, StoreError, StorePath, StoreResult, Subscription,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use super::tree;

/// How to reach a store. Handed to the adapter at construction.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub endpoint: String,
    /// Every path is scoped under this namespace.
    pub namespace: String,
    pub credentials: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "memory://local".to_string(),
            namespace: "tandem".to_string(),
            credentials: None,
        }
    }
}

pub type ClientId = Id<MemoryStoreClient>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Write,
    Remove,
}

/// A mutation as seen by the store, for inspection in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub client: ClientId,
    pub path: StorePath,
    pub kind: WriteKind,
}

struct Subscriber {
    path: StorePath,
    sender: UnboundedSender<StoreResult<Option<Value>>>,
    /// The last delivered value, `None` if it must be delivered again.
    last: Option<Option<Value>>,
}

struct SharedTree {
    config: StoreConfig,
    namespace: StorePath,
    root: Mutex<Value>,
    subscribers: Mutex<Vec<Subscriber>>,
    reachable: AtomicCell<bool>,
    rejected: Mutex<Vec<StorePath>>,
    write_log: Mutex<Vec<WriteRecord>>,
}

/// An in-process replicated store, shared by every client connected to it.
///
/// Values form a JSON tree. Writing null or an empty object removes a path, and
/// parents left empty by a removal disappear with it.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<SharedTree>,
}

/// One client's connection to a [MemoryStore].
pub struct MemoryStoreClient {
    id: ClientId,
    shared: Arc<SharedTree>,
    connected: AtomicCell<bool>,
    disconnect_actions: Mutex<Vec<(StorePath, DisconnectAction)>>,
}

impl MemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        if config.credentials.is_none() {
            debug!("Opening {} without credentials", config.endpoint);
        }

        let shared = SharedTree {
            namespace: StorePath::parse(&config.namespace),
            config,
            root: Mutex::new(Value::Object(Map::new())),
            subscribers: Default::default(),
            reachable: AtomicCell::new(true),
            rejected: Default::default(),
            write_log: Default::default(),
        };

        Self {
            shared: Arc::new(shared),
        }
    }

    /// Opens a new client connection.
    pub fn connect(&self) -> MemoryStoreClient {
        let client = MemoryStoreClient {
            id: ClientId::new(),
            shared: self.shared.clone(),
            connected: AtomicCell::new(true),
            disconnect_actions: Default::default(),
        };

        info!("Client {} connected to {}", client.id, self.shared.config.endpoint);
        client
    }

    /// Simulates a loss or recovery of connectivity for every client.
    /// Subscribers receive an error on loss, and the current value again on recovery.
    pub fn set_reachable(&self, reachable: bool) {
        let was_reachable = self.shared.reachable.swap(reachable);

        if was_reachable == reachable {
            return;
        }

        if reachable {
            info!("{} is reachable again", self.shared.config.endpoint);
            self.shared.notify(&StorePath::root());
        } else {
            warn!("{} became unreachable", self.shared.config.endpoint);
            self.shared.fail_subscribers();
        }
    }

    /// Makes the store reject every write at or below the path.
    pub fn reject_writes(&self, path: &StorePath) {
        let path = path.prefixed(&self.shared.namespace);
        self.shared.rejected.lock().push(path);
    }

    /// Reads a value directly, bypassing connectivity.
    pub fn value_at(&self, path: &StorePath) -> Option<Value> {
        self.shared.get(&path.prefixed(&self.shared.namespace))
    }

    /// Returns every mutation made so far, in order.
    pub fn write_log(&self) -> Vec<WriteRecord> {
        self.shared.write_log.lock().clone()
    }
}

impl SharedTree {
    fn get(&self, path: &StorePath) -> Option<Value> {
        let root = self.root.lock();
        tree::get(&root, path.segments()).cloned()
    }

    fn set(&self, path: &StorePath, value: Value) {
        tree::set(&mut self.root.lock(), path.segments(), value);
        self.notify(path);
    }

    /// Delivers the current value to every subscriber affected by a change at the path.
    fn notify(&self, changed: &StorePath) {
        if !self.reachable.load() {
            return;
        }

        let mut subscribers = self.subscribers.lock();

        subscribers.retain_mut(|subscriber| {
            if !subscriber.path.overlaps(changed) {
                return true;
            }

            let current = self.get(&subscriber.path);

            if subscriber.last.as_ref() == Some(&current) {
                return true;
            }

            subscriber.last = Some(current.clone());
            subscriber.sender.send(Ok(current)).is_ok()
        });
    }

    fn fail_subscribers(&self) {
        let error = StoreError::Unreachable(self.config.endpoint.clone());

        self.subscribers.lock().retain_mut(|subscriber| {
            subscriber.last = None;
            subscriber.sender.send(Err(error.clone())).is_ok()
        });
    }

    fn log(&self, client: ClientId, path: &StorePath, kind: WriteKind) {
        self.write_log.lock().push(WriteRecord {
            client,
            path: path.clone(),
            kind,
        });
    }
}

impl MemoryStoreClient {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Drops the connection, running every registered disconnect action.
    pub fn disconnect(&self) {
        if !self.connected.swap(false) {
            return;
        }

        let actions = std::mem::take(&mut *self.disconnect_actions.lock());
        info!(
            "Client {} disconnected, running {} cleanup actions",
            self.id,
            actions.len()
        );

        for (path, action) in actions {
            let value = match action {
                DisconnectAction::Remove => Value::Null,
                DisconnectAction::Write(value) => value,
            };

            self.shared.set(&path, value);
        }
    }

    fn check(&self) -> StoreResult<()> {
        if !self.connected.load() {
            return Err(StoreError::Unreachable(format!(
                "client {} is disconnected",
                self.id
            )));
        }

        if !self.shared.reachable.load() {
            return Err(StoreError::Unreachable(self.shared.config.endpoint.clone()));
        }

        Ok(())
    }

    fn scoped(&self, path: &StorePath) -> StorePath {
        path.prefixed(&self.shared.namespace)
    }

    fn mutate(&self, path: &StorePath, value: Value, kind: WriteKind) -> StoreResult<()> {
        self.check()?;

        let scoped = self.scoped(path);
        let is_rejected = self
            .shared
            .rejected
            .lock()
            .iter()
            .any(|rejected| rejected.contains(&scoped));

        if is_rejected {
            return Err(StoreError::Rejected { path: path.clone() });
        }

        self.shared.log(self.id, path, kind);
        self.shared.set(&scoped, value);

        Ok(())
    }
}

#[async_trait]
impl ReplicatedStore for MemoryStoreClient {
    async fn write(&self, path: &StorePath, value: Value) -> StoreResult<()> {
        self.mutate(path, value, WriteKind::Write)
    }

    async fn read(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        self.check()?;
        Ok(self.shared.get(&self.scoped(path)))
    }

    async fn remove(&self, path: &StorePath) -> StoreResult<()> {
        self.mutate(path, Value::Null, WriteKind::Remove)
    }

    fn subscribe(&self, path: &StorePath) -> Subscription {
        let (sender, receiver) = unbounded_channel();
        let scoped = self.scoped(path);

        // Held while reading, so that no change slips in before the subscriber is registered.
        let mut subscribers = self.shared.subscribers.lock();

        let (first, last) = match self.check() {
            Ok(()) => {
                let current = self.shared.get(&scoped);
                (Ok(current.clone()), Some(current))
            }
            Err(error) => (Err(error), None),
        };

        // Nothing can fail here, the receiver is still in scope.
        let _ = sender.send(first);

        subscribers.push(Subscriber {
            path: scoped,
            sender,
            last,
        });

        drop(subscribers);

        stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        })
        .boxed()
    }

    async fn on_disconnect(&self, path: &StorePath, action: DisconnectAction) -> StoreResult<()> {
        self.check()?;

        let scoped = self.scoped(path);
        let mut actions = self.disconnect_actions.lock();

        actions.retain(|(registered, _)| registered != &scoped);
        actions.push((scoped, action));

        Ok(())
    }

    async fn cancel_on_disconnect(&self, path: &StorePath) -> StoreResult<()> {
        self.check()?;

        let scoped = self.scoped(path);
        self.disconnect_actions
            .lock()
            .retain(|(registered, _)| registered != &scoped);

        Ok(())
    }
}
