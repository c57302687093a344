//! Numeric error codes for cross-process reporting.
//!
//! Codes are stable: once assigned, a variant keeps its code across releases
//! so that a CLI exit status or a logged code can be correlated after the
//! fact without re-reading the enum definition.

/// Error code type.
pub type Code = i32;

/// Error code constants, grouped by the 30xx band reserved for the registry.
pub mod codes {
    use super::Code;

    /// No error.
    pub const OK: Code = 0;

    /// Malformed input: bad path, invalid `host:port`, missing callback.
    pub const INVALID_ARGUMENT: Code = 400;

    /// An I/O failure, usually from local network-interface enumeration.
    pub const IO_ERROR: Code = 500;

    /// `pick`/`lock` issued against a service the caller never subscribed to.
    pub const NOT_SUBSCRIBED: Code = 3001;

    /// The coordination store reported a non-success status.
    pub const STORE_ERROR: Code = 3002;

    /// Benign: a create raced against an existing node.
    pub const NODE_EXISTS: Code = 3003;

    /// A watch fired for a path the Subscriber isn't tracking.
    pub const RECONCILE: Code = 3004;

    /// Non-blocking lock acquisition found the lock already held.
    pub const LOCK_CONFLICT: Code = 3005;
}
