use thiserror::Error;

use crate::code::{codes, Code};

/// Errors produced by the service registry and discovery crates.
///
/// `StoreError` wraps whatever the coordination store reported; everything
/// else is raised by the core logic itself (path validation, subscription
/// bookkeeping, lock bookkeeping).
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Malformed path, invalid `host:port`, wrong `PathKind` for the
    /// operation, or a missing callback.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `pick`/`lock`/a property callback was issued against a service the
    /// caller has not subscribed to.
    #[error("not subscribed: {0}")]
    NotSubscribed(String),

    /// The coordination store reported a non-success result other than
    /// "node already exists".
    #[error("store error: {0}")]
    StoreError(String),

    /// A `create` raced against an existing node. Callers composing
    /// `create_if_absent`/`create_or_set` swallow this; it escapes only
    /// from the raw `create` call.
    #[error("node already exists: {0}")]
    NodeExists(String),

    /// A watch event arrived for a path the Subscriber isn't tracking.
    /// Logged and self-healed by the next `periodic_care` sweep.
    #[error("unexpected watch event for untracked path: {0}")]
    Reconcile(String),

    /// Non-blocking lock acquisition found the lock already held by
    /// someone else.
    #[error("lock already held: {0}")]
    LockConflict(String),

    /// Local network interface enumeration failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// The stable numeric code for this error kind.
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => codes::INVALID_ARGUMENT,
            Self::NotSubscribed(_) => codes::NOT_SUBSCRIBED,
            Self::StoreError(_) => codes::STORE_ERROR,
            Self::NodeExists(_) => codes::NODE_EXISTS,
            Self::Reconcile(_) => codes::RECONCILE,
            Self::LockConflict(_) => codes::LOCK_CONFLICT,
            Self::Io(_) => codes::IO_ERROR,
        }
    }
}

/// Result alias used throughout the registry crates.
pub type Result<T> = std::result::Result<T, RegistryError>;
