//! `Instance` and `Service` value types, plus the path (de)serialization that
//! maps them onto the coordination store's key layout.

use std::collections::BTreeMap;

use registry_errors::{RegistryError, Result};

use crate::path::{self, PathKind};

/// Reserved property names at the instance level. Promoted into typed
/// fields on read; never passed through as an opaque property during
/// publication.
pub const RESERVED_ACTIVE: &str = "active";
pub const RESERVED_IDC: &str = "idc";
pub const RESERVED_WEIGHT: &str = "weight";
pub const RESERVED_PRIORITY: &str = "priority";
pub const RESERVED_PID: &str = "pid";

/// Reserved property key at the service level mirroring the service node's
/// own value.
pub const RESERVED_ENABLE: &str = "enable";
/// Prefix reserving all `lock_<name>` service properties for the lock recipe.
pub const RESERVED_LOCK_PREFIX: &str = "lock_";

/// `priority`/`weight` are clamped to this inclusive range; default 50.
pub const PRIORITY_MIN: u16 = 1;
pub const PRIORITY_MAX: u16 = 100;
pub const PRIORITY_DEFAULT: u16 = 50;
pub const WEIGHT_MIN: u16 = 1;
pub const WEIGHT_MAX: u16 = 100;
pub const WEIGHT_DEFAULT: u16 = 50;

fn clamp_to_range(raw: &str, min: u16, max: u16, default: u16) -> u16 {
    raw.parse::<u16>()
        .ok()
        .filter(|v| *v >= min && *v <= max)
        .unwrap_or(default)
}

/// Strategy bit flags consulted by the selector. Mutually exclusive in
/// practice except `Idc` and `Master`, which compose as filters/overrides
/// ahead of the exclusive pick mode.
pub mod strategy {
    pub const IDC: u32 = 1;
    pub const RANDOM: u32 = 4;
    pub const ROUND_ROBIN: u32 = 8;
    pub const WEIGHTED: u32 = 16;
    pub const MASTER: u32 = 32;

    pub const DEFAULT: u32 = IDC | WEIGHTED;
}

/// One service replica, identified by `host:port` within `department/service`.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub department: String,
    pub service: String,
    /// The raw `host:port` string, also the map key under `Service::instances`.
    pub node: String,
    pub host: String,
    pub port: u16,

    /// Remote liveness, mirrored from the ephemeral `active` child.
    pub active: bool,
    /// Administrative bit, mirrored from the instance node's own value
    /// (`"0"` disables, anything else enables). Distinct from `active`,
    /// which tracks the ephemeral liveness marker instead.
    pub enabled: bool,

    pub idc: String,
    /// Highest value wins in the weighted-priority selector's tie-break.
    pub priority: u16,
    pub weight: u16,

    /// Every property this instance carries, reserved or not, so callbacks
    /// and diagnostics see one authoritative mapping.
    pub properties: BTreeMap<String, String>,
}

impl Instance {
    /// Builds a new instance, promoting any `idc`/`weight`/`priority` found
    /// in `properties` into the typed fields. `active` is not a legal
    /// caller-supplied property (liveness is store-owned) and is dropped
    /// with a warning if present. Freshly constructed instances start
    /// `active = false` and `enabled = true`; `active` only becomes true
    /// once the store confirms the ephemeral marker.
    pub fn new(
        department: impl Into<String>,
        service: impl Into<String>,
        node: impl Into<String>,
        properties: BTreeMap<String, String>,
    ) -> Result<Self> {
        let department = department.into();
        let service = service.into();
        let node = node.into();

        if department.is_empty() || service.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "department and service must be non-empty".into(),
            ));
        }
        let (host, port) = path::parse_host_port(&node).ok_or_else(|| {
            RegistryError::InvalidArgument(format!("invalid instance node: {node}"))
        })?;

        let mut instance = Instance {
            department,
            service,
            node,
            host,
            port,
            active: false,
            enabled: true,
            idc: String::new(),
            priority: PRIORITY_DEFAULT,
            weight: WEIGHT_DEFAULT,
            properties: BTreeMap::new(),
        };
        instance.apply_properties(properties);
        Ok(instance)
    }

    /// `available() == active && enabled`.
    pub fn available(&self) -> bool {
        self.active && self.enabled
    }

    /// Merges `properties` in, promoting reserved keys into typed fields
    /// and keeping every key (reserved or not) in `self.properties` so the
    /// mapping stays authoritative. `active` is rejected here too: it only
    /// ever flows from the dedicated ephemeral-marker read.
    pub fn apply_properties(&mut self, properties: BTreeMap<String, String>) {
        for (key, value) in properties {
            match key.as_str() {
                RESERVED_ACTIVE => {
                    tracing::warn!(
                        node = %self.node,
                        "active is a reserved, store-owned key and cannot be set as a property"
                    );
                    continue;
                }
                RESERVED_IDC => {
                    if !value.is_empty() {
                        self.idc = value.clone();
                    }
                }
                RESERVED_WEIGHT => {
                    self.weight = clamp_to_range(&value, WEIGHT_MIN, WEIGHT_MAX, self.weight);
                }
                RESERVED_PRIORITY => {
                    self.priority = clamp_to_range(&value, PRIORITY_MIN, PRIORITY_MAX, self.priority);
                }
                _ => {}
            }
            self.properties.insert(key, value);
        }
    }

    /// Sets the `active` flag from the ephemeral marker's raw value.
    pub fn set_active_from_raw(&mut self, raw: &str) {
        self.active = raw == "1";
    }

    /// Emits the ordered `(path, value)` pairs needed to materialize this
    /// instance as persistent nodes: the department and service parents,
    /// the instance node itself, every non-reserved property, and finally
    /// `idc`/`weight`/`priority` sourced from the typed fields. `active`
    /// and locks never appear here; they're created separately.
    pub fn to_path_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        pairs.push((format!("/{}", self.department), "1".to_string()));
        pairs.push((path::service_path(&self.department, &self.service), "1".to_string()));

        let node_path = path::instance_path(&self.department, &self.service, &self.node);
        pairs.push((node_path.clone(), "1".to_string()));

        for (key, value) in &self.properties {
            if matches!(
                key.as_str(),
                RESERVED_ACTIVE | RESERVED_IDC | RESERVED_WEIGHT | RESERVED_PRIORITY | RESERVED_PID
            ) {
                continue;
            }
            pairs.push((path::extend_property(&node_path, key), value.clone()));
        }

        pairs.push((path::extend_property(&node_path, RESERVED_IDC), self.idc.clone()));
        pairs.push((
            path::extend_property(&node_path, RESERVED_WEIGHT),
            self.weight.to_string(),
        ));
        pairs.push((
            path::extend_property(&node_path, RESERVED_PRIORITY),
            self.priority.to_string(),
        ));

        pairs
    }

    /// Recovers `(department, service, node)` from an `Instance`-kind path.
    pub fn parse_path(full_path: &str) -> Option<(String, String, String)> {
        if path::classify(full_path) != PathKind::Instance {
            return None;
        }
        let segments = path::split(&path::normalize(full_path), "/");
        Some((segments[0].clone(), segments[1].clone(), segments[2].clone()))
    }

    /// Recovers `(department, service, node, property)` from an
    /// `InstanceProperty`-kind path.
    pub fn parse_property_path(full_path: &str) -> Option<(String, String, String, String)> {
        if path::classify(full_path) != PathKind::InstanceProperty {
            return None;
        }
        let segments = path::split(&path::normalize(full_path), "/");
        Some((
            segments[0].clone(),
            segments[1].clone(),
            segments[2].clone(),
            segments[3].clone(),
        ))
    }
}

impl std::fmt::Display for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "instance {}/{}/{} host={} port={} active={} enabled={} idc={} priority={} weight={}",
            self.department,
            self.service,
            self.node,
            self.host,
            self.port,
            self.active,
            self.enabled,
            self.idc,
            self.priority,
            self.weight
        )?;
        for (key, value) in &self.properties {
            writeln!(f, "  {key} = {value}")?;
        }
        Ok(())
    }
}

/// A logical service: its administrative state, the selection strategy its
/// subscribers should apply by default, and the instances/properties last
/// observed under it.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    pub department: String,
    pub service: String,
    pub enabled: bool,
    pub pick_strategy: u32,
    /// Whether subscription materializes child instances or only tracks
    /// service-level properties.
    pub with_instances: bool,
    pub instances: BTreeMap<String, Instance>,
    pub properties: BTreeMap<String, String>,
}

impl Service {
    pub fn new(department: impl Into<String>, service: impl Into<String>) -> Result<Self> {
        let department = department.into();
        let service = service.into();
        if department.is_empty() || service.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "department and service must be non-empty".into(),
            ));
        }
        Ok(Service {
            department,
            service,
            enabled: true,
            pick_strategy: strategy::DEFAULT,
            with_instances: true,
            instances: BTreeMap::new(),
            properties: BTreeMap::new(),
        })
    }

    /// `available() == enabled`.
    pub fn available(&self) -> bool {
        self.enabled
    }

    pub fn path(&self) -> String {
        path::service_path(&self.department, &self.service)
    }

    /// Recovers `(department, service)` from a `Service`-kind path.
    pub fn parse_path(full_path: &str) -> Option<(String, String)> {
        if path::classify(full_path) != PathKind::Service {
            return None;
        }
        let segments = path::split(&path::normalize(full_path), "/");
        Some((segments[0].clone(), segments[1].clone()))
    }

    /// Recovers `(department, service, property)` from a
    /// `ServiceProperty`-kind path.
    pub fn parse_property_path(full_path: &str) -> Option<(String, String, String)> {
        if path::classify(full_path) != PathKind::ServiceProperty {
            return None;
        }
        let segments = path::split(&path::normalize(full_path), "/");
        Some((segments[0].clone(), segments[1].clone(), segments[2].clone()))
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "service {}/{} enabled={} pick_strategy={:#x} instances={}",
            self.department,
            self.service,
            self.enabled,
            self.pick_strategy,
            self.instances.len()
        )?;
        for (key, value) in &self.properties {
            writeln!(f, "  {key} = {value}")?;
        }
        for instance in self.instances.values() {
            write!(f, "{instance}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn new_instance_promotes_reserved_keys_and_keeps_the_mapping_authoritative() {
        let instance = Instance::new(
            "a",
            "b",
            "10.0.0.1:7",
            props(&[("x", "y"), ("idc", "dc1"), ("priority", "10")]),
        )
        .unwrap();

        assert_eq!(instance.idc, "dc1");
        assert_eq!(instance.priority, 10);
        assert_eq!(instance.weight, WEIGHT_DEFAULT);
        assert_eq!(instance.properties.get("x"), Some(&"y".to_string()));
        assert_eq!(instance.properties.get("idc"), Some(&"dc1".to_string()));
        assert!(!instance.available());
    }

    #[test]
    fn new_instance_drops_reserved_active_property() {
        let instance = Instance::new("a", "b", "10.0.0.1:7", props(&[("active", "1")])).unwrap();
        assert!(instance.properties.get("active").is_none());
        assert!(!instance.active);
    }

    #[test]
    fn new_instance_rejects_bad_node() {
        assert!(Instance::new("a", "b", "not-a-node", BTreeMap::new()).is_err());
    }

    #[test]
    fn to_path_pairs_matches_scenario_one() {
        let instance = Instance::new("a", "b", "10.0.0.1:7", props(&[("x", "y")])).unwrap();
        let pairs = instance.to_path_pairs();

        let as_map: BTreeMap<_, _> = pairs.into_iter().collect();
        assert_eq!(as_map.get("/a"), Some(&"1".to_string()));
        assert_eq!(as_map.get("/a/b"), Some(&"1".to_string()));
        assert_eq!(as_map.get("/a/b/10.0.0.1:7"), Some(&"1".to_string()));
        assert_eq!(as_map.get("/a/b/10.0.0.1:7/x"), Some(&"y".to_string()));
        assert_eq!(as_map.get("/a/b/10.0.0.1:7/weight"), Some(&"50".to_string()));
        assert_eq!(as_map.get("/a/b/10.0.0.1:7/priority"), Some(&"50".to_string()));
        assert!(as_map.get("/a/b/10.0.0.1:7/active").is_none());
    }

    #[test]
    fn parses_instance_and_property_paths() {
        assert_eq!(
            Instance::parse_path("/a/b/10.0.0.1:7"),
            Some(("a".into(), "b".into(), "10.0.0.1:7".into()))
        );
        assert_eq!(
            Instance::parse_property_path("/a/b/10.0.0.1:7/weight"),
            Some(("a".into(), "b".into(), "10.0.0.1:7".into(), "weight".into()))
        );
        assert_eq!(Instance::parse_path("/a/b"), None);
    }

    #[test]
    fn service_rejects_empty_segments() {
        assert!(Service::new("", "b").is_err());
    }
}
