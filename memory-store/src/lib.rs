// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! In-memory [`Store`] with optional JSON snapshot persistence.
//!
//! The whole document tree lives in one `serde_json::Value` behind a
//! read-write lock, which makes every primitive trivially atomic for its
//! path. A [`FaultPlan`] lets tests script transient failures per primitive
//! and path prefix.

mod faults;

pub use faults::FaultPlan;

use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use core_types::ids::push_id;
use log::debug;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use store_api::{
    Store, StoreError, StoreEvent, StoreOp, StorePath, StoreResult, StoreSubscription,
};
use tokio::sync::mpsc::UnboundedSender;

struct Watcher {
    path: StorePath,
    tx: UnboundedSender<StoreEvent>,
}

struct StoreInner {
    tree: RwLock<Value>,
    watchers: Mutex<Vec<Watcher>>,
    faults: FaultPlan,
    snapshot_path: Option<PathBuf>,
    push_seq: AtomicU64,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_tree(Value::Object(Map::new()), None)
    }

    /// Open a snapshot-backed store: parse `snapshot_path` if it exists,
    /// start empty otherwise. [`MemoryStore::persist`] writes back to the
    /// same file.
    pub fn load_or_init(snapshot_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let snapshot_path = snapshot_path.into();
        let label = snapshot_path.display().to_string();
        let tree = if snapshot_path.exists() {
            let raw = fs::read_to_string(&snapshot_path)
                .map_err(|err| StoreError::io(&label, &err))?;
            if raw.trim().is_empty() {
                Value::Object(Map::new())
            } else {
                serde_json::from_str(&raw)
                    .map_err(|err| StoreError::corrupt(&label, err.to_string()))?
            }
        } else {
            Value::Object(Map::new())
        };
        Ok(Self::with_tree(tree, Some(snapshot_path)))
    }

    fn with_tree(tree: Value, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                tree: RwLock::new(tree),
                watchers: Mutex::new(Vec::new()),
                faults: FaultPlan::new(),
                snapshot_path,
                push_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Write the tree to the snapshot file (tmp file then rename). A
    /// memory-only store skips silently.
    pub fn persist(&self) -> StoreResult<()> {
        let Some(path) = &self.inner.snapshot_path else {
            debug!("[memory-store] no snapshot file configured; skipping persist");
            return Ok(());
        };
        let label = path.display().to_string();
        let rendered = {
            let tree = self.inner.tree.read();
            serde_json::to_string_pretty(&*tree)
                .map_err(|err| StoreError::corrupt(&label, err.to_string()))?
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| StoreError::io(&label, &err))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, rendered).map_err(|err| StoreError::io(&label, &err))?;
        fs::rename(&tmp, path).map_err(|err| StoreError::io(&label, &err))?;
        Ok(())
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.inner.faults
    }

    /// Full tree copy, for tests and debugging.
    pub fn snapshot_value(&self) -> Value {
        self.inner.tree.read().clone()
    }

    fn notify_written(&self, written: &StorePath) {
        let mut watchers = self.inner.watchers.lock();
        if watchers.is_empty() {
            return;
        }
        let tree = self.inner.tree.read().clone();
        watchers.retain(|watcher| {
            let related =
                watcher.path.starts_with(written) || written.starts_with(&watcher.path);
            if !related {
                return true;
            }
            let value = node_at(&tree, &watcher.path)
                .cloned()
                .unwrap_or(Value::Null);
            watcher
                .tx
                .send(StoreEvent {
                    path: watcher.path.clone(),
                    value,
                })
                .is_ok()
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        self.inner.faults.intercept(StoreOp::Get, path)?;
        let tree = self.inner.tree.read();
        Ok(node_at(&tree, path).filter(|v| !v.is_null()).cloned())
    }

    async fn set(&self, path: &StorePath, value: Value) -> StoreResult<()> {
        self.inner.faults.intercept(StoreOp::Set, path)?;
        {
            let mut tree = self.inner.tree.write();
            write_at(&mut tree, path, value);
        }
        self.notify_written(path);
        Ok(())
    }

    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> StoreResult<()> {
        self.inner.faults.intercept(StoreOp::Update, path)?;
        {
            let mut tree = self.inner.tree.write();
            let node = node_at_mut(&mut tree, path);
            let object = ensure_object(node);
            for (key, value) in fields {
                if value.is_null() {
                    object.remove(&key);
                } else {
                    object.insert(key, value);
                }
            }
        }
        self.notify_written(path);
        Ok(())
    }

    async fn push(&self, path: &StorePath, value: Value) -> StoreResult<String> {
        self.inner.faults.intercept(StoreOp::Push, path)?;
        let seq = self.inner.push_seq.fetch_add(1, Ordering::Relaxed);
        let key = push_id(seq);
        let child = path.child(key.clone());
        {
            let mut tree = self.inner.tree.write();
            write_at(&mut tree, &child, value);
        }
        self.notify_written(&child);
        Ok(key)
    }

    fn subscribe(&self, path: &StorePath) -> StoreSubscription {
        let (tx, subscription) = StoreSubscription::channel();
        let initial = {
            let tree = self.inner.tree.read();
            node_at(&tree, path).cloned().unwrap_or(Value::Null)
        };
        let _ = tx.send(StoreEvent {
            path: path.clone(),
            value: initial,
        });
        self.inner.watchers.lock().push(Watcher {
            path: path.clone(),
            tx,
        });
        subscription
    }
}

fn node_at<'a>(root: &'a Value, path: &StorePath) -> Option<&'a Value> {
    let mut node = root;
    for segment in path.segments() {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

/// Descend to `path`, materializing intermediate objects.
fn node_at_mut<'a>(root: &'a mut Value, path: &StorePath) -> &'a mut Value {
    let mut node = root;
    for segment in path.segments() {
        let object = ensure_object(node);
        node = object
            .entry(segment.as_str())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    node
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}

fn write_at(root: &mut Value, path: &StorePath, value: Value) {
    if path.is_root() {
        *root = if value.is_null() {
            Value::Object(Map::new())
        } else {
            value
        };
        return;
    }
    let segments = path.segments();
    let (last, parents) = segments
        .split_last()
        .unwrap_or_else(|| unreachable!("non-root path has a last segment"));
    let mut node = &mut *root;
    for segment in parents {
        let object = ensure_object(node);
        node = object
            .entry(segment.as_str())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let object = ensure_object(node);
    if value.is_null() {
        object.remove(last);
    } else {
        object.insert(last.clone(), value);
    }
}
