//! Service registry and discovery client for a ZooKeeper-family
//! coordination store.
//!
//! The store itself is out of scope: [`store::StoreClient`] is the
//! boundary trait every other module is built against, and
//! [`store::MemoryStore`] is a fully-functional in-memory reference
//! implementation used throughout the test suite and the CLI demo. A
//! production deployment supplies its own `StoreClient` wired to a real
//! ensemble.
//!
//! Typical usage goes through [`frame::Frame`], which wires the Registrar,
//! Subscriber, Selector and Recipe together and routes watch events from
//! the store's delivery thread into them.

pub mod config;
pub mod entities;
pub mod frame;
pub mod path;
pub mod recipe;
pub mod registrar;
pub mod selector;
pub mod store;
pub mod subscriber;

pub use config::{FrameConfig, FrameConfigBuilder};
pub use entities::{strategy, Instance, Service};
pub use frame::Frame;
pub use path::PathKind;
pub use recipe::{PropertyCallback, Recipe};
pub use registrar::Registrar;
pub use selector::Selector;
pub use store::{CreateMode, Event, EventKind, MemoryStore, MemoryStoreClient, StoreClient};
pub use subscriber::{CallbackTarget, Subscriber};

pub use registry_errors::{RegistryError, Result};
