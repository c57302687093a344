//! Publishes local instances into the store and revokes them again.
//!
//! Liveness is carried by a single ephemeral sentinel (`active`) rather than
//! by the instance node itself, so subscribers detect failure via a
//! child-list event on the parent instance regardless of how many
//! intermediate hops exist between publisher and subscriber.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use registry_errors::{RegistryError, Result};

use crate::entities::{Instance, RESERVED_ACTIVE, RESERVED_PID};
use crate::path::{self, PathKind};
use crate::store::{CreateMode, StoreClient};

/// Publishes and revokes this process's service instances.
pub struct Registrar {
    store: Arc<dyn StoreClient>,
    published: parking_lot::Mutex<BTreeMap<String, Instance>>,
}

impl Registrar {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Registrar {
            store,
            published: parking_lot::Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers `instance`. If its node is `0.0.0.0:<port>`, it is expanded
    /// into one instance per local non-loopback IPv4 address first. Returns
    /// `Ok(())` on full or partial success; per-instance failures are
    /// logged rather than aborting the whole batch.
    pub fn register(&self, instance: Instance, overwrite: bool) -> Result<()> {
        let expanded = self.expand_wildcard(instance)?;

        for inst in expanded {
            if let Err(e) = self.register_one(&inst, overwrite) {
                tracing::error!(node = %inst.node, error = %e, "failed to register instance");
            }
        }
        Ok(())
    }

    fn expand_wildcard(&self, instance: Instance) -> Result<Vec<Instance>> {
        if instance.host != "0.0.0.0" {
            return Ok(vec![instance]);
        }

        let ips = path::local_ipv4s()?;
        if ips.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "0.0.0.0 registration requested but no local IPv4 address was found".into(),
            ));
        }

        ips.into_iter()
            .map(|ip| {
                let node = format!("{ip}:{}", instance.port);
                Instance::new(
                    instance.department.clone(),
                    instance.service.clone(),
                    node,
                    instance.properties.clone(),
                )
            })
            .collect()
    }

    fn register_one(&self, instance: &Instance, overwrite: bool) -> Result<()> {
        for (node_path, value) in instance.to_path_pairs() {
            match path::classify(&node_path) {
                PathKind::Department | PathKind::Service | PathKind::Instance => {
                    self.store
                        .create_if_absent(&node_path, &value, CreateMode::Persistent)?;
                }
                PathKind::ServiceProperty | PathKind::InstanceProperty => {
                    if overwrite {
                        self.store.create_or_set(&node_path, &value, CreateMode::Persistent)?;
                    } else {
                        self.store
                            .create_if_absent(&node_path, &value, CreateMode::Persistent)?;
                    }
                }
                PathKind::Undetected => {
                    return Err(RegistryError::InvalidArgument(format!(
                        "unclassifiable path produced during registration: {node_path}"
                    )));
                }
            }
        }

        let instance_path = path::instance_path(&instance.department, &instance.service, &instance.node);
        let active_path = path::extend_property(&instance_path, RESERVED_ACTIVE);
        self.store.create(&active_path, "1", CreateMode::Ephemeral)?;

        let pid_path = path::extend_property(&instance_path, RESERVED_PID);
        if let Err(e) = self
            .store
            .create_if_absent(&pid_path, &std::process::id().to_string(), CreateMode::Ephemeral)
        {
            tracing::warn!(path = %pid_path, error = %e, "failed to publish pid marker");
        }

        self.published.lock().insert(instance_path, instance.clone());
        tracing::info!(node = %instance.node, department = %instance.department, service = %instance.service, "registered instance");
        Ok(())
    }

    /// Revokes a previously registered instance: drops it from the
    /// published set and deletes its ephemeral `active` marker. The
    /// persistent instance node is left behind on purpose — liveness is
    /// communicated solely via `active`.
    pub fn revoke(&self, instance_path: &str) -> Result<()> {
        let normalized = path::normalize(instance_path);
        if path::classify(&normalized) != PathKind::Instance {
            return Err(RegistryError::InvalidArgument(format!(
                "not an instance path: {instance_path}"
            )));
        }

        self.published.lock().remove(&normalized);

        let active_path = path::extend_property(&normalized, RESERVED_ACTIVE);
        match self.store.delete(&active_path) {
            Ok(()) => {}
            Err(e) => tracing::warn!(path = %active_path, error = %e, "active marker already gone"),
        }

        tracing::info!(path = %normalized, "revoked instance");
        Ok(())
    }

    /// Revokes every currently published instance.
    pub fn revoke_all(&self) -> Result<()> {
        let snapshot: Vec<String> = self.published.lock().keys().cloned().collect();
        for instance_path in snapshot {
            self.revoke(&instance_path)?;
        }
        Ok(())
    }

    /// Snapshot of what this process currently believes it has published,
    /// keyed by full instance path.
    pub fn published(&self) -> HashMap<String, Instance> {
        self.published.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}
