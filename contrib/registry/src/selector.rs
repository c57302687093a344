//! Picks one `Instance` out of a subscribed service's snapshot according to
//! a bitflag strategy.
//!
//! The round-robin counter is process-scoped rather than per-caller: every
//! `pick(..., RoundRobin)` against the same service shares one cursor, which
//! is what makes consecutive picks actually round-robin instead of each
//! caller restarting from zero.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use registry_errors::{RegistryError, Result};

use crate::entities::{strategy, Instance};
use crate::path;
use crate::subscriber::Subscriber;

const ROUND_ROBIN_MODULUS: u32 = 65_536;

pub struct Selector {
    subscriber: Arc<Subscriber>,
    local_idc: String,
    round_robin: parking_lot::Mutex<HashMap<String, u32>>,
}

impl Selector {
    pub fn new(subscriber: Arc<Subscriber>, local_idc: impl Into<String>) -> Self {
        Selector {
            subscriber,
            local_idc: local_idc.into(),
            round_robin: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Picks one available instance of `department/service`. `strategy`
    /// overrides the service's subscribed default when given.
    pub fn pick(&self, department: &str, service: &str, strategy: Option<u32>) -> Result<Instance> {
        let service_path = path::service_path(department, service);
        let svc = self
            .subscriber
            .service(department, service)
            .ok_or_else(|| RegistryError::NotSubscribed(service_path.clone()))?;

        let strategy = strategy.unwrap_or(svc.pick_strategy);

        let available: Vec<Instance> = svc.instances.values().filter(|i| i.available()).cloned().collect();
        if available.is_empty() {
            return Err(RegistryError::StoreError(format!(
                "no available instances for {service_path}"
            )));
        }

        if strategy & strategy::MASTER != 0 {
            return self.pick_master(&svc, &available);
        }

        let working = if strategy & strategy::IDC != 0 {
            let idc_matches: Vec<Instance> =
                available.iter().filter(|i| i.idc == self.local_idc).cloned().collect();
            match idc_matches.len() {
                1 => return Ok(idc_matches.into_iter().next().unwrap()),
                0 => available,
                _ => idc_matches,
            }
        } else {
            available
        };

        if strategy & strategy::RANDOM != 0 {
            return self.pick_random(&working);
        }
        if strategy & strategy::ROUND_ROBIN != 0 {
            return self.pick_round_robin(&service_path, &working);
        }
        self.pick_weighted(&working)
    }

    fn pick_master(&self, svc: &crate::entities::Service, available: &[Instance]) -> Result<Instance> {
        let raw = svc.properties.get("lock_master").ok_or_else(|| {
            RegistryError::StoreError(format!("service {} has no lock_master property", svc.path()))
        })?;
        let (ip, pid) = raw
            .rsplit_once('-')
            .ok_or_else(|| RegistryError::StoreError(format!("malformed lock_master value: {raw}")))?;

        available
            .iter()
            .find(|i| i.host == ip && i.properties.get("pid").map(String::as_str) == Some(pid))
            .cloned()
            .ok_or_else(|| RegistryError::StoreError(format!("no instance matches master holder {raw}")))
    }

    fn pick_random(&self, candidates: &[Instance]) -> Result<Instance> {
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Ok(candidates[idx].clone())
    }

    fn pick_round_robin(&self, service_path: &str, candidates: &[Instance]) -> Result<Instance> {
        let mut counters = self.round_robin.lock();
        let counter = counters.entry(service_path.to_string()).or_insert(0);
        let idx = (*counter as usize) % candidates.len();
        *counter = (*counter + 1) % ROUND_ROBIN_MODULUS;
        Ok(candidates[idx].clone())
    }

    fn pick_weighted(&self, candidates: &[Instance]) -> Result<Instance> {
        let max_priority = candidates.iter().map(|i| i.priority).max().unwrap();
        let top: Vec<&Instance> = candidates.iter().filter(|i| i.priority == max_priority).collect();

        let total_weight: u32 = top.iter().map(|i| i.weight as u32).sum();
        let r = rand::thread_rng().gen_range(0..total_weight);

        let mut ladder = 0u32;
        for instance in &top {
            ladder += instance.weight as u32;
            if ladder >= r {
                return Ok((*instance).clone());
            }
        }
        Ok(top.last().unwrap().to_owned().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Instance;
    use crate::store::{CreateMode, MemoryStore, StoreClient};
    use std::collections::BTreeMap;

    fn setup_with(department: &str, service: &str, nodes: &[(&str, &str, u16, u16)]) -> (Arc<Subscriber>, Selector) {
        let store = MemoryStore::new();
        let (writer, _rx) = store.open_session();

        for (node, idc, priority, weight) in nodes {
            let mut props = BTreeMap::new();
            props.insert("idc".to_string(), idc.to_string());
            props.insert("priority".to_string(), priority.to_string());
            props.insert("weight".to_string(), weight.to_string());
            let instance = Instance::new(department, service, *node, props).unwrap();
            for (path, value) in instance.to_path_pairs() {
                writer.create_if_absent(&path, &value, CreateMode::Persistent).unwrap();
            }
            let active_path = path::extend_property(&path::instance_path(department, service, node), "active");
            writer.create(&active_path, "1", CreateMode::Ephemeral).unwrap();
        }

        let (reader, _rx2) = store.open_session();
        let subscriber = Arc::new(Subscriber::new(Arc::new(reader)));
        subscriber.subscribe_service(department, service, strategy::DEFAULT, true).unwrap();
        let selector = Selector::new(subscriber.clone(), "dc1");
        (subscriber, selector)
    }

    #[test]
    fn pick_fails_when_not_subscribed() {
        let store = MemoryStore::new();
        let (reader, _rx) = store.open_session();
        let subscriber = Arc::new(Subscriber::new(Arc::new(reader)));
        let selector = Selector::new(subscriber, "dc1");
        assert!(selector.pick("a", "b", None).is_err());
    }

    #[test]
    fn idc_preference_narrows_to_single_match() {
        let (_sub, selector) = setup_with("a", "b", &[("10.0.0.1:7", "dc1", 50, 50), ("10.0.0.2:7", "dc2", 50, 50)]);
        let picked = selector.pick("a", "b", Some(strategy::IDC)).unwrap();
        assert_eq!(picked.idc, "dc1");
    }

    #[test]
    fn idc_reverts_to_full_list_when_no_match() {
        let (_sub, selector) = setup_with("a", "b", &[("10.0.0.1:7", "dc9", 50, 50)]);
        let picked = selector.pick("a", "b", Some(strategy::IDC)).unwrap();
        assert_eq!(picked.node, "10.0.0.1:7");
    }

    #[test]
    fn weighted_pick_only_considers_top_priority_tier() {
        let (_sub, selector) = setup_with(
            "a",
            "b",
            &[("10.0.0.1:7", "dc1", 90, 50), ("10.0.0.2:7", "dc1", 10, 50)],
        );
        for _ in 0..20 {
            let picked = selector.pick("a", "b", Some(strategy::WEIGHTED)).unwrap();
            assert_eq!(picked.node, "10.0.0.1:7");
        }
    }

    #[test]
    fn round_robin_cycles_through_candidates() {
        let (_sub, selector) =
            setup_with("a", "b", &[("10.0.0.1:7", "dc1", 50, 50), ("10.0.0.2:7", "dc1", 50, 50)]);
        let first = selector.pick("a", "b", Some(strategy::ROUND_ROBIN)).unwrap().node;
        let second = selector.pick("a", "b", Some(strategy::ROUND_ROBIN)).unwrap().node;
        assert_ne!(first, second);
    }
}
