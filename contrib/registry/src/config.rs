//! Small typed configuration for building a [`crate::frame::Frame`],
//! favoring a builder over a stringly-typed config map.

use std::time::Duration;

use crate::entities::strategy;

/// Configuration needed to stand up a `Frame`: where the coordination
/// store lives, this process's idc, and the timing knobs that govern
/// session liveness and reconciliation sweeps.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Connection string handed to the `StoreClient` factory (e.g. a
    /// ZooKeeper host list). Unused by the in-memory reference store.
    pub hostline: String,
    pub idc: String,
    pub session_timeout: Duration,
    /// How often `Frame::periodic_care` should be invoked by a caller-owned
    /// timer; the library does not spawn this timer itself.
    pub periodic_care_interval: Duration,
    pub default_strategy: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        FrameConfig {
            hostline: String::new(),
            idc: String::new(),
            session_timeout: Duration::from_millis(30_000),
            periodic_care_interval: Duration::from_secs(60),
            default_strategy: strategy::DEFAULT,
        }
    }
}

impl FrameConfig {
    pub fn builder() -> FrameConfigBuilder {
        FrameConfigBuilder::default()
    }

    /// Reads `REGISTRY_HOSTLINE`, `REGISTRY_IDC`, `REGISTRY_SESSION_TIMEOUT_MS`
    /// from the environment, falling back to defaults for anything unset
    /// or unparsable.
    pub fn from_env() -> Self {
        let mut builder = FrameConfig::builder();
        if let Ok(hostline) = std::env::var("REGISTRY_HOSTLINE") {
            builder = builder.hostline(hostline);
        }
        if let Ok(idc) = std::env::var("REGISTRY_IDC") {
            builder = builder.idc(idc);
        }
        if let Ok(timeout_ms) = std::env::var("REGISTRY_SESSION_TIMEOUT_MS") {
            if let Ok(ms) = timeout_ms.parse::<u64>() {
                builder = builder.session_timeout(Duration::from_millis(ms));
            }
        }
        builder.build()
    }
}

/// Builder for [`FrameConfig`]; every setter takes `self` by value so calls
/// chain without an intermediate variable.
#[derive(Debug, Clone, Default)]
pub struct FrameConfigBuilder {
    inner: FrameConfig,
}

impl FrameConfigBuilder {
    pub fn hostline(mut self, hostline: impl Into<String>) -> Self {
        self.inner.hostline = hostline.into();
        self
    }

    pub fn idc(mut self, idc: impl Into<String>) -> Self {
        self.inner.idc = idc.into();
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.inner.session_timeout = timeout;
        self
    }

    pub fn periodic_care_interval(mut self, interval: Duration) -> Self {
        self.inner.periodic_care_interval = interval;
        self
    }

    pub fn default_strategy(mut self, strategy: u32) -> Self {
        self.inner.default_strategy = strategy;
        self
    }

    pub fn build(self) -> FrameConfig {
        self.inner
    }
}
