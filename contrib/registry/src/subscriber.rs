//! Maintains the local snapshot of subscribed services by reconciling watch
//! events against the store.
//!
//! Reconciliation is pull-based: a watch only tells the Subscriber *that*
//! something changed, never *what*. Every reconcile re-reads the affected
//! subtree and replaces the corresponding snapshot entry wholesale, which is
//! what lets `periodic_care` paper over a dropped event by just doing the
//! same work again.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use registry_errors::{RegistryError, Result};

use crate::entities::{Service, RESERVED_ACTIVE, RESERVED_IDC, RESERVED_PRIORITY, RESERVED_WEIGHT};
use crate::path::{self, PathKind};
use crate::store::{Event, EventKind, StoreClient};

/// What a reconciled event implies downstream: which callback, if any,
/// should be considered for firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackTarget {
    Service { department: String, service: String },
    Instance { department: String, service: String, node: String },
    None,
}

pub struct Subscriber {
    store: Arc<dyn StoreClient>,
    services: parking_lot::Mutex<BTreeMap<String, Service>>,
    in_flight: parking_lot::Mutex<HashSet<String>>,
}

impl Subscriber {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Subscriber {
            store,
            services: parking_lot::Mutex::new(BTreeMap::new()),
            in_flight: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    /// Reconciles `/dept/srv` from scratch and installs the watches needed
    /// to detect the next change. Returns the fresh snapshot, which also
    /// replaces any prior entry atomically.
    pub fn subscribe_service(
        &self,
        department: &str,
        service: &str,
        strategy: u32,
        with_instances: bool,
    ) -> Result<Service> {
        let service_path = path::service_path(department, service);

        if !self.in_flight.lock().insert(service_path.clone()) {
            return self
                .services
                .lock()
                .get(&service_path)
                .cloned()
                .ok_or_else(|| RegistryError::NotSubscribed(service_path.clone()));
        }
        let result = self.subscribe_service_inner(department, service, strategy, with_instances, &service_path);
        self.in_flight.lock().remove(&service_path);
        result
    }

    fn subscribe_service_inner(
        &self,
        department: &str,
        service: &str,
        strategy: u32,
        with_instances: bool,
        service_path: &str,
    ) -> Result<Service> {
        let mut svc = Service::new(department, service)?;
        svc.pick_strategy = strategy;
        svc.with_instances = with_instances;

        let value = self.store.get(service_path, true)?;
        svc.enabled = value != "0";

        let children = self.store.get_children(service_path, true)?;
        for child in children {
            let child_path = path::extend_property(service_path, &child);
            match path::classify(&child_path) {
                PathKind::ServiceProperty => {
                    let v = self.store.get(&child_path, true)?;
                    svc.properties.insert(child, v);
                }
                PathKind::Instance if with_instances => {
                    if let Ok(instance) = self.subscribe_instance(&child_path) {
                        svc.instances.insert(instance.node.clone(), instance);
                    }
                }
                _ => {}
            }
        }

        self.services.lock().insert(service_path.to_string(), svc.clone());
        Ok(svc)
    }

    /// Reconciles a single instance node: value, properties, and the
    /// reserved-key promotions.
    pub fn subscribe_instance(&self, instance_path: &str) -> Result<crate::entities::Instance> {
        let (department, service, node) = crate::entities::Instance::parse_path(instance_path)
            .ok_or_else(|| RegistryError::InvalidArgument(format!("not an instance path: {instance_path}")))?;

        let mut instance = crate::entities::Instance::new(department, service, node, BTreeMap::new())?;

        if let Ok(value) = self.store.get(instance_path, true) {
            instance.enabled = value != "0";
        }

        let children = self.store.get_children(instance_path, true)?;
        let mut props = BTreeMap::new();
        for child in children {
            let child_path = path::extend_property(instance_path, &child);
            let value = self.store.get(&child_path, true)?;
            if child == RESERVED_ACTIVE {
                instance.set_active_from_raw(&value);
                continue;
            }
            props.insert(child, value);
        }
        instance.apply_properties(props);

        let service_path = path::service_path(&instance.department, &instance.service);
        if let Some(svc) = self.services.lock().get_mut(&service_path) {
            svc.instances.insert(instance.node.clone(), instance.clone());
        }

        Ok(instance)
    }

    /// Re-runs `subscribe_service` for every currently tracked service,
    /// preserving its strategy and `with_instances` setting.
    pub fn periodic_care(&self) {
        let targets: Vec<(String, String, u32, bool)> = self
            .services
            .lock()
            .values()
            .map(|s| (s.department.clone(), s.service.clone(), s.pick_strategy, s.with_instances))
            .collect();

        for (department, service, strategy, with_instances) in targets {
            if let Err(e) = self.subscribe_service(&department, &service, strategy, with_instances) {
                tracing::warn!(department = %department, service = %service, error = %e, "periodic re-subscribe failed");
            }
        }
    }

    /// Applies the event-reconciliation state machine to a single watch
    /// event, returning which callback target (if any) should be notified.
    pub fn handle_event(&self, event: &Event) -> Result<CallbackTarget> {
        if event.kind == EventKind::Session {
            tracing::error!(path = %event.path, "store client leaked a session event into the subscriber");
            return Err(RegistryError::Reconcile(format!(
                "unexpected session event for {}",
                event.path
            )));
        }

        match path::classify(&event.path) {
            PathKind::Service => self.handle_service_event(event),
            PathKind::ServiceProperty => self.handle_service_property_event(event),
            PathKind::Instance => self.handle_instance_event(event),
            PathKind::InstanceProperty => self.handle_instance_property_event(event),
            PathKind::Department | PathKind::Undetected => Ok(CallbackTarget::None),
        }
    }

    fn known_strategy_and_flag(&self, department: &str, service: &str) -> (u32, bool) {
        let service_path = path::service_path(department, service);
        self.services
            .lock()
            .get(&service_path)
            .map(|s| (s.pick_strategy, s.with_instances))
            .unwrap_or((crate::entities::strategy::DEFAULT, true))
    }

    fn handle_service_event(&self, event: &Event) -> Result<CallbackTarget> {
        let (department, service) = Service::parse_path(&event.path)
            .ok_or_else(|| RegistryError::Reconcile(event.path.clone()))?;
        let (strategy, with_instances) = self.known_strategy_and_flag(&department, &service);

        match event.kind {
            EventKind::Created | EventKind::ChildChanged | EventKind::WatchRemoved => {
                self.subscribe_service(&department, &service, strategy, with_instances)?;
            }
            EventKind::Deleted => {
                self.services.lock().remove(&event.path);
                self.store.exists(&event.path, true)?;
            }
            EventKind::Changed => {
                let value = self.store.get(&event.path, true)?;
                if let Some(svc) = self.services.lock().get_mut(&event.path) {
                    svc.enabled = value != "0";
                }
            }
            EventKind::Session => unreachable!(),
        }
        Ok(CallbackTarget::Service { department, service })
    }

    fn handle_service_property_event(&self, event: &Event) -> Result<CallbackTarget> {
        let (department, service, property) = Service::parse_property_path(&event.path)
            .ok_or_else(|| RegistryError::Reconcile(event.path.clone()))?;

        match event.kind {
            EventKind::Changed => {
                let value = self.store.get(&event.path, true)?;
                let service_path = path::service_path(&department, &service);
                if let Some(svc) = self.services.lock().get_mut(&service_path) {
                    svc.properties.insert(property, value);
                }
            }
            EventKind::WatchRemoved => {
                let (strategy, with_instances) = self.known_strategy_and_flag(&department, &service);
                self.subscribe_service(&department, &service, strategy, with_instances)?;
            }
            EventKind::Created | EventKind::ChildChanged => {
                return Err(RegistryError::Reconcile(format!(
                    "unexpected {:?} on service property {}",
                    event.kind, event.path
                )));
            }
            EventKind::Deleted => {}
            EventKind::Session => unreachable!(),
        }
        Ok(CallbackTarget::Service { department, service })
    }

    fn handle_instance_event(&self, event: &Event) -> Result<CallbackTarget> {
        let (department, service, node) = crate::entities::Instance::parse_path(&event.path)
            .ok_or_else(|| RegistryError::Reconcile(event.path.clone()))?;

        match event.kind {
            EventKind::ChildChanged | EventKind::WatchRemoved => {
                self.subscribe_instance(&event.path)?;
            }
            EventKind::Changed => {
                let value = self.store.get(&event.path, true)?;
                let service_path = path::service_path(&department, &service);
                if let Some(svc) = self.services.lock().get_mut(&service_path) {
                    if let Some(instance) = svc.instances.get_mut(&node) {
                        instance.enabled = value != "0";
                    }
                }
            }
            EventKind::Deleted => {}
            EventKind::Created => {
                return Err(RegistryError::Reconcile(format!(
                    "unexpected Created on instance {}",
                    event.path
                )));
            }
            EventKind::Session => unreachable!(),
        }
        Ok(CallbackTarget::Instance { department, service, node })
    }

    fn handle_instance_property_event(&self, event: &Event) -> Result<CallbackTarget> {
        let (department, service, node, property) = crate::entities::Instance::parse_property_path(&event.path)
            .ok_or_else(|| RegistryError::Reconcile(event.path.clone()))?;

        match event.kind {
            EventKind::Changed => {
                let value = self.store.get(&event.path, true)?;
                self.update_instance_property(&department, &service, &node, &property, &value);
            }
            EventKind::WatchRemoved => {
                let instance_path = path::instance_path(&department, &service, &node);
                self.subscribe_instance(&instance_path)?;
            }
            EventKind::Created | EventKind::ChildChanged => {
                return Err(RegistryError::Reconcile(format!(
                    "unexpected {:?} on instance property {}",
                    event.kind, event.path
                )));
            }
            EventKind::Deleted => {}
            EventKind::Session => unreachable!(),
        }
        Ok(CallbackTarget::Instance { department, service, node })
    }

    fn update_instance_property(&self, department: &str, service: &str, node: &str, property: &str, value: &str) {
        let service_path = path::service_path(department, service);
        let mut services = self.services.lock();
        let Some(svc) = services.get_mut(&service_path) else { return };
        let Some(instance) = svc.instances.get_mut(node) else { return };

        match property {
            RESERVED_ACTIVE => instance.set_active_from_raw(value),
            RESERVED_IDC | RESERVED_WEIGHT | RESERVED_PRIORITY => {
                let mut single = BTreeMap::new();
                single.insert(property.to_string(), value.to_string());
                instance.apply_properties(single);
            }
            _ => {
                instance.properties.insert(property.to_string(), value.to_string());
            }
        }
    }

    /// Snapshot of a subscribed service, if tracked.
    pub fn service(&self, department: &str, service: &str) -> Option<Service> {
        self.services.lock().get(&path::service_path(department, service)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Instance;
    use crate::store::{CreateMode, MemoryStore};

    fn publish(client: &dyn StoreClient, department: &str, service: &str, node: &str) {
        let instance = Instance::new(department, service, node, BTreeMap::new()).unwrap();
        for (path, value) in instance.to_path_pairs() {
            client.create_if_absent(&path, &value, CreateMode::Persistent).unwrap();
        }
        let active_path = path::extend_property(&path::instance_path(department, service, node), "active");
        client.create(&active_path, "1", CreateMode::Ephemeral).unwrap();
    }

    #[test]
    fn subscribe_service_picks_up_enabled_and_instances() {
        let store = MemoryStore::new();
        let (writer, _rx) = store.open_session();
        publish(&writer, "a", "b", "10.0.0.1:7");

        let (reader, _rx2) = store.open_session();
        let subscriber = Subscriber::new(Arc::new(reader));
        let svc = subscriber
            .subscribe_service("a", "b", crate::entities::strategy::DEFAULT, true)
            .unwrap();

        assert!(svc.enabled);
        assert_eq!(svc.instances.len(), 1);
        let instance = svc.instances.get("10.0.0.1:7").unwrap();
        assert!(instance.available());
    }

    #[test]
    fn deleted_active_marker_is_visible_after_resubscribe() {
        let store = MemoryStore::new();
        let (writer, _rx) = store.open_session();
        publish(&writer, "a", "b", "10.0.0.1:7");

        let (reader, _rx2) = store.open_session();
        let subscriber = Subscriber::new(Arc::new(reader));
        subscriber.subscribe_service("a", "b", crate::entities::strategy::DEFAULT, true).unwrap();

        writer.delete("/a/b/10.0.0.1:7/active").unwrap();
        let svc = subscriber.subscribe_service("a", "b", crate::entities::strategy::DEFAULT, true).unwrap();
        assert!(!svc.instances.get("10.0.0.1:7").unwrap().available());
    }

    #[test]
    fn periodic_care_resubscribes_all_known_services() {
        let store = MemoryStore::new();
        let (writer, _rx) = store.open_session();
        publish(&writer, "a", "b", "10.0.0.1:7");
        publish(&writer, "a", "c", "10.0.0.2:7");

        let (reader, _rx2) = store.open_session();
        let subscriber = Subscriber::new(Arc::new(reader));
        subscriber.subscribe_service("a", "b", crate::entities::strategy::DEFAULT, true).unwrap();
        subscriber.subscribe_service("a", "c", crate::entities::strategy::DEFAULT, true).unwrap();

        subscriber.periodic_care();
        assert!(subscriber.service("a", "b").is_some());
        assert!(subscriber.service("a", "c").is_some());
    }

    #[test]
    fn handle_event_rejects_session_events() {
        let store = MemoryStore::new();
        let (reader, _rx) = store.open_session();
        let subscriber = Subscriber::new(Arc::new(reader));
        let event = Event { kind: EventKind::Session, path: "/a/b".to_string() };
        assert!(subscriber.handle_event(&event).is_err());
    }
}
