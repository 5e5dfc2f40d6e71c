//! The contract of the replicated store that carries session state between clients.

use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

mod path;
pub use path::*;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A lazy, infinite stream of values at a path. Absent values are `None`.
/// A stream that ends can be restarted by subscribing again.
pub type Subscription = BoxStream<'static, StoreResult<Option<Value>>>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The store could not be reached, the operation may succeed later
    #[error("Store is unreachable: {0}")]
    Unreachable(String),
    /// The store refused the operation
    #[error("Write to {path} was rejected")]
    Rejected { path: StorePath },
    /// The value at a path could not be interpreted
    #[error("Value at {path} is malformed: {reason}")]
    Malformed { path: StorePath, reason: String },
}

/// What the store should do with a path when the registering client's connection drops.
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectAction {
    Remove,
    Write(Value),
}

/// Represents a path-addressed store with last-writer-wins semantics per path,
/// at-least-once delivery to subscribers, and no cross-path transactions.
#[async_trait]
pub trait ReplicatedStore: Send + Sync + 'static {
    async fn write(&self, path: &StorePath, value: Value) -> StoreResult<()>;
    async fn read(&self, path: &StorePath) -> StoreResult<Option<Value>>;
    async fn remove(&self, path: &StorePath) -> StoreResult<()>;

    /// Subscribes to a path. The current value is delivered first, then every change.
    fn subscribe(&self, path: &StorePath) -> Subscription;

    /// Registers an action the store runs on its own once this client disconnects.
    async fn on_disconnect(&self, path: &StorePath, action: DisconnectAction) -> StoreResult<()>;
    /// Cancels any action registered for the path.
    async fn cancel_on_disconnect(&self, path: &StorePath) -> StoreResult<()>;
}

/// Typed helpers on top of any [ReplicatedStore].
#[async_trait]
pub trait StoreExt: ReplicatedStore {
    async fn write_as<T>(&self, path: &StorePath, value: &T) -> StoreResult<()>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value).map_err(|e| StoreError::Malformed {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        self.write(path, value).await
    }

    /// Returns true if anything is stored at or below the path.
    async fn exists(&self, path: &StorePath) -> StoreResult<bool> {
        Ok(self.read(path).await?.is_some())
    }

    /// Subscribes to the children of an object path as `(key, value)` pairs.
    fn subscribe_children(
        &self,
        path: &StorePath,
    ) -> BoxStream<'static, StoreResult<Vec<(String, Value)>>> {
        self.subscribe(path)
            .map(|item| {
                item.map(|value| match value {
                    Some(Value::Object(map)) => map.into_iter().collect(),
                    _ => vec![],
                })
            })
            .boxed()
    }
}

impl<S> StoreExt for S where S: ReplicatedStore + ?Sized {}
