// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Abstract keyed-document store capability.
//!
//! The ledger talks to persistence exclusively through [`Store`]: five
//! primitives over a JSON document tree. Each primitive is atomic for its
//! own path and nothing more; multi-path workflows compose their own
//! transactional discipline on top (locks plus compensation).

pub mod error;
pub mod path;

pub use error::{StoreError, StoreOp, StoreResult};
pub use path::StorePath;

use async_trait::async_trait;
use futures::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

#[async_trait]
pub trait Store: Send + Sync {
    /// Snapshot of the subtree at `path`; `None` when nothing is stored
    /// there.
    async fn get(&self, path: &StorePath) -> StoreResult<Option<Value>>;

    /// Replace the subtree at `path`. Setting `Value::Null` removes it.
    async fn set(&self, path: &StorePath, value: Value) -> StoreResult<()>;

    /// Merge `fields` into the object at `path`, creating it if absent.
    /// A `Null` field value removes that key.
    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> StoreResult<()>;

    /// Append `value` under a fresh chronologically-ordered child key and
    /// return that key.
    async fn push(&self, path: &StorePath, value: Value) -> StoreResult<String>;

    /// Watch the subtree at `path`. The subscription yields the current
    /// snapshot immediately, then a fresh snapshot after every write that
    /// affects it. Dropping the subscription unsubscribes.
    fn subscribe(&self, path: &StorePath) -> StoreSubscription;
}

/// One observed snapshot of a watched path.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub path: StorePath,
    pub value: Value,
}

pub struct StoreSubscription {
    rx: mpsc::UnboundedReceiver<StoreEvent>,
}

impl StoreSubscription {
    /// Build a subscription plus the sender half a store implementation
    /// feeds. The implementation drops its sender clone once the receiver
    /// goes away.
    pub fn channel() -> (mpsc::UnboundedSender<StoreEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    pub async fn recv(&mut self) -> Option<StoreEvent> {
        self.rx.recv().await
    }
}

impl Stream for StoreSubscription {
    type Item = StoreEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Decode the record at `path`. Undecodable data surfaces as
/// [`StoreError::Corrupt`].
pub async fn get_record<T>(store: &dyn Store, path: &StorePath) -> StoreResult<Option<T>>
where
    T: DeserializeOwned,
{
    let Some(value) = store.get(path).await? else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|err| StoreError::corrupt(path, err.to_string()))
}

pub async fn set_record<T>(store: &dyn Store, path: &StorePath, record: &T) -> StoreResult<()>
where
    T: Serialize,
{
    let value =
        serde_json::to_value(record).map_err(|err| StoreError::corrupt(path, err.to_string()))?;
    store.set(path, value).await
}

/// Convenience for building an `update` field map.
pub fn fields<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    let mut map = Map::with_capacity(N);
    for (key, value) in entries {
        map.insert(key.to_string(), value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_builds_ordered_map() {
        let map = fields([("status", Value::from("sold")), ("price", Value::from(10))]);
        assert_eq!(map.len(), 2);
        assert_eq!(map["status"], "sold");
    }

    #[tokio::test]
    async fn subscription_receives_through_channel() {
        let (tx, mut sub) = StoreSubscription::channel();
        tx.send(StoreEvent {
            path: StorePath::new(["listings"]),
            value: Value::Null,
        })
        .unwrap();
        let event = sub.recv().await.unwrap();
        assert_eq!(event.path.to_string(), "listings");
        drop(sub);
        assert!(tx
            .send(StoreEvent {
                path: StorePath::root(),
                value: Value::Null,
            })
            .is_err());
    }
}
