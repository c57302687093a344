//! The `StoreClient` trait is the external boundary described in the
//! specification: a synchronous CRUD + one-shot-watch API modeled on
//! ZooKeeper. Nothing upstream of this module knows about jute encoding,
//! TCP framing, or session pings — a production deployment swaps in a real
//! driver behind this trait.
//!
//! [`MemoryStore`] is the reference implementation used by the test suite
//! and the CLI demo: a single process can open multiple independent
//! [`MemoryStoreClient`] "sessions" against one shared store, which is
//! exactly what's needed to exercise lock contention and session-loss
//! scenarios without a real ensemble.

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use registry_errors::{RegistryError, Result};

/// Mirrors the ZooKeeper watch event taxonomy this crate relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Deleted,
    Changed,
    ChildChanged,
    /// Delivered by the store's own reconnect loop; the Subscriber must
    /// never see this (see `Frame::handle_event`'s defensive assertion).
    Session,
    WatchRemoved,
}

/// A single notification from the store's watch-callback sink.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub path: String,
}

/// Whether a created node disappears with its owning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
}

/// The synchronous CRUD-plus-watch contract every component above this
/// module is built against.
pub trait StoreClient: Send + Sync {
    fn create(&self, path: &str, value: &str, mode: CreateMode) -> Result<()>;
    fn get(&self, path: &str, watch: bool) -> Result<String>;
    fn set(&self, path: &str, value: &str) -> Result<()>;
    fn delete(&self, path: &str) -> Result<()>;
    fn exists(&self, path: &str, watch: bool) -> Result<bool>;
    fn get_children(&self, path: &str, watch: bool) -> Result<Vec<String>>;

    /// `create`, swallowing `NodeExists`.
    fn create_if_absent(&self, path: &str, value: &str, mode: CreateMode) -> Result<()> {
        match self.create(path, value, mode) {
            Ok(()) => Ok(()),
            Err(RegistryError::NodeExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// `create`, falling back to `set` when the node already exists.
    fn create_or_set(&self, path: &str, value: &str, mode: CreateMode) -> Result<()> {
        match self.create(path, value, mode) {
            Ok(()) => Ok(()),
            Err(RegistryError::NodeExists(_)) => self.set(path, value),
            Err(e) => Err(e),
        }
    }

    /// Applies a batch of create-if-absent pairs, continuing past
    /// individual `NodeExists` conflicts the way the registrar's
    /// persistent-hierarchy creation does.
    fn multi_create_if_absent(&self, ops: &[(String, String, CreateMode)]) -> Vec<Result<()>> {
        ops.iter()
            .map(|(path, value, mode)| self.create_if_absent(path, value, *mode))
            .collect()
    }
}

fn parent_of(path: &str) -> Option<String> {
    let idx = path.rfind('/')?;
    if idx == 0 {
        return None;
    }
    Some(path[..idx].to_string())
}

type SessionId = u64;

struct NodeData {
    value: String,
    ephemeral_owner: Option<SessionId>,
}

#[derive(Default)]
struct StoreState {
    nodes: BTreeMap<String, NodeData>,
    data_watches: HashMap<String, Vec<(SessionId, Sender<Event>)>>,
    child_watches: HashMap<String, Vec<(SessionId, Sender<Event>)>>,
    next_session: SessionId,
}

impl StoreState {
    fn fire_data(&mut self, path: &str, kind: EventKind) {
        if let Some(watchers) = self.data_watches.remove(path) {
            for (_, tx) in watchers {
                let _ = tx.send(Event { kind, path: path.to_string() });
            }
        }
    }

    fn fire_children(&mut self, path: &str) {
        if let Some(watchers) = self.child_watches.remove(path) {
            for (_, tx) in watchers {
                let _ = tx.send(Event {
                    kind: EventKind::ChildChanged,
                    path: path.to_string(),
                });
            }
        }
    }
}

/// An in-memory, single-process stand-in for a ZooKeeper ensemble.
///
/// Multiple [`MemoryStoreClient`] handles opened against the same
/// `MemoryStore` behave like independent client sessions sharing one
/// server: each gets its own watch-event stream, and [`MemoryStoreClient::close_session`]
/// simulates that session's connection dying (its ephemeral nodes vanish
/// and dependent watches fire), without disturbing any other session.
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryStore {
            state: Mutex::new(StoreState::default()),
        })
    }

    /// Opens a new independent session against this store, returning a
    /// client plus the receiving end of its watch-event stream.
    pub fn open_session(self: &Arc<Self>) -> (MemoryStoreClient, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        let session_id = {
            let mut state = self.state.lock().unwrap();
            let id = state.next_session;
            state.next_session += 1;
            id
        };
        (
            MemoryStoreClient {
                store: self.clone(),
                session_id,
                sender: tx,
            },
            rx,
        )
    }
}

/// One session's handle onto a [`MemoryStore`].
pub struct MemoryStoreClient {
    store: Arc<MemoryStore>,
    session_id: SessionId,
    sender: Sender<Event>,
}

impl MemoryStoreClient {
    /// Simulates this session losing its connection: every ephemeral node
    /// it owns is removed, and data/child watches on affected paths fire
    /// as they would on a real session timeout.
    pub fn close_session(&self) {
        let mut state = self.store.state.lock().unwrap();
        let dead: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(self.session_id))
            .map(|(path, _)| path.clone())
            .collect();

        for path in dead {
            state.nodes.remove(&path);
            state.fire_data(&path, EventKind::Deleted);
            if let Some(parent) = parent_of(&path) {
                state.fire_children(&parent);
            }
        }
    }
}

impl StoreClient for MemoryStoreClient {
    fn create(&self, path: &str, value: &str, mode: CreateMode) -> Result<()> {
        let mut state = self.store.state.lock().unwrap();
        if state.nodes.contains_key(path) {
            return Err(RegistryError::NodeExists(path.to_string()));
        }
        state.nodes.insert(
            path.to_string(),
            NodeData {
                value: value.to_string(),
                ephemeral_owner: matches!(mode, CreateMode::Ephemeral).then_some(self.session_id),
            },
        );
        state.fire_data(path, EventKind::Created);
        if let Some(parent) = parent_of(path) {
            state.fire_children(&parent);
        }
        Ok(())
    }

    fn get(&self, path: &str, watch: bool) -> Result<String> {
        let mut state = self.store.state.lock().unwrap();
        let value = state
            .nodes
            .get(path)
            .map(|n| n.value.clone())
            .ok_or_else(|| RegistryError::StoreError(format!("no such node: {path}")))?;
        if watch {
            state
                .data_watches
                .entry(path.to_string())
                .or_default()
                .push((self.session_id, self.sender.clone()));
        }
        Ok(value)
    }

    fn set(&self, path: &str, value: &str) -> Result<()> {
        let mut state = self.store.state.lock().unwrap();
        match state.nodes.get_mut(path) {
            Some(node) => node.value = value.to_string(),
            None => return Err(RegistryError::StoreError(format!("no such node: {path}"))),
        }
        state.fire_data(path, EventKind::Changed);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let mut state = self.store.state.lock().unwrap();
        if state.nodes.remove(path).is_none() {
            return Err(RegistryError::StoreError(format!("no such node: {path}")));
        }
        state.fire_data(path, EventKind::Deleted);
        if let Some(parent) = parent_of(path) {
            state.fire_children(&parent);
        }
        Ok(())
    }

    fn exists(&self, path: &str, watch: bool) -> Result<bool> {
        let mut state = self.store.state.lock().unwrap();
        let present = state.nodes.contains_key(path);
        if watch {
            state
                .data_watches
                .entry(path.to_string())
                .or_default()
                .push((self.session_id, self.sender.clone()));
        }
        Ok(present)
    }

    fn get_children(&self, path: &str, watch: bool) -> Result<Vec<String>> {
        let mut state = self.store.state.lock().unwrap();
        let prefix = format!("{path}/");
        let mut children = Vec::new();
        for key in state.nodes.keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                if !rest.contains('/') {
                    children.push(rest.to_string());
                }
            }
        }
        if watch {
            state
                .child_watches
                .entry(path.to_string())
                .or_default()
                .push((self.session_id, self.sender.clone()));
        }
        Ok(children)
    }
}
