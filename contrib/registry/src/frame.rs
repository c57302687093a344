//! `Frame` is the facade: it owns one `StoreClient` plus the Registrar,
//! Subscriber and Recipe built on top of it, validates arguments at the
//! public boundary, and routes every watch event from the store's
//! background delivery thread into `Subscriber::handle_event` followed by
//! the matching `Recipe::dispatch_*` call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use registry_errors::{RegistryError, Result};

use crate::entities::Instance;
use crate::path::{self, PathKind};
use crate::recipe::{PropertyCallback, Recipe};
use crate::registrar::Registrar;
use crate::selector::Selector;
use crate::store::{Event, StoreClient};
use crate::subscriber::{CallbackTarget, Subscriber};

use std::collections::BTreeMap;

/// Constructs the store client, Registrar, Subscriber, Recipe and Selector,
/// and pumps watch events from the store's delivery thread into the
/// Subscriber/Recipe pipeline until torn down.
pub struct Frame {
    store: Arc<dyn StoreClient>,
    registrar: Arc<Registrar>,
    subscriber: Arc<Subscriber>,
    recipe: Arc<Recipe>,
    selector: Arc<Selector>,
    holder_tag: String,
    shutdown: Arc<AtomicBool>,
    router: Option<JoinHandle<()>>,
}

impl Frame {
    /// Builds a Frame over `store`, consuming watch events from `events` on
    /// a dedicated router thread. Fails if no non-loopback IPv4 address can
    /// be found, since that address is the process's lock-holder identity.
    pub fn new(
        store: Arc<dyn StoreClient>,
        events: std::sync::mpsc::Receiver<Event>,
        local_idc: impl Into<String>,
    ) -> Result<Self> {
        let primary_ip = path::primary_ipv4()?;
        let holder_tag = format!("{primary_ip}-{}", std::process::id());

        let registrar = Arc::new(Registrar::new(store.clone()));
        let subscriber = Arc::new(Subscriber::new(store.clone()));
        let recipe = Arc::new(Recipe::new(store.clone(), subscriber.clone()));
        let selector = Arc::new(Selector::new(subscriber.clone(), local_idc));

        let shutdown = Arc::new(AtomicBool::new(false));
        let router = {
            let subscriber = subscriber.clone();
            let recipe = recipe.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name("registry-router".into())
                .spawn(move || Self::run_router(events, subscriber, recipe, shutdown))
                .map_err(RegistryError::Io)?
        };

        Ok(Frame {
            store,
            registrar,
            subscriber,
            recipe,
            selector,
            holder_tag,
            shutdown,
            router: Some(router),
        })
    }

    fn run_router(
        events: std::sync::mpsc::Receiver<Event>,
        subscriber: Arc<Subscriber>,
        recipe: Arc<Recipe>,
        shutdown: Arc<AtomicBool>,
    ) {
        while let Ok(event) = events.recv() {
            if shutdown.load(Ordering::Acquire) {
                break;
            }
            Self::handle_event(&subscriber, &recipe, &event);
        }
    }

    /// Reconciles one watch event and dispatches the resulting callback, if
    /// any. Reconciliation errors are logged, never propagated — a single
    /// bad event must not take down the router thread.
    fn handle_event(subscriber: &Subscriber, recipe: &Recipe, event: &Event) {
        match subscriber.handle_event(event) {
            Ok(CallbackTarget::Service { department, service }) => {
                recipe.dispatch_service(&department, &service);
            }
            Ok(CallbackTarget::Instance { department, service, node }) => {
                recipe.dispatch_instance(&department, &service, &node);
            }
            Ok(CallbackTarget::None) => {}
            Err(e) => tracing::error!(path = %event.path, error = %e, "failed to reconcile watch event"),
        }
    }

    fn validate_dept_srv(department: &str, service: &str) -> Result<()> {
        if department.is_empty() || service.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "department and service must be non-empty".into(),
            ));
        }
        Ok(())
    }

    // -- registrar ---------------------------------------------------------

    pub fn register(&self, department: &str, service: &str, node: &str, properties: BTreeMap<String, String>, overwrite: bool) -> Result<()> {
        Self::validate_dept_srv(department, service)?;
        let instance = Instance::new(department, service, node, properties)?;
        self.registrar.register(instance, overwrite)
    }

    pub fn revoke(&self, instance_path: &str) -> Result<()> {
        self.registrar.revoke(instance_path)
    }

    pub fn revoke_all(&self) -> Result<()> {
        self.registrar.revoke_all()
    }

    // -- subscriber ----------------------------------------------------

    pub fn subscribe_service(&self, department: &str, service: &str, strategy: u32, with_instances: bool) -> Result<crate::entities::Service> {
        Self::validate_dept_srv(department, service)?;
        self.subscriber.subscribe_service(department, service, strategy, with_instances)
    }

    pub fn periodic_care(&self) {
        self.subscriber.periodic_care();
    }

    // -- selector --------------------------------------------------------

    pub fn pick(&self, department: &str, service: &str, strategy: Option<u32>) -> Result<Instance> {
        Self::validate_dept_srv(department, service)?;
        self.selector.pick(department, service, strategy)
    }

    // -- recipe: callbacks -----------------------------------------------

    pub fn attach_service_property_cb(&self, department: &str, service: &str, callback: PropertyCallback) -> Result<()> {
        Self::validate_dept_srv(department, service)?;
        if self.subscriber.service(department, service).is_none() {
            self.subscriber
                .subscribe_service(department, service, crate::entities::strategy::DEFAULT, false)?;
        }
        self.recipe.attach_service_property_cb(department, service, callback)
    }

    pub fn attach_instance_property_cb(&self, department: &str, service: &str, node: &str, callback: PropertyCallback) -> Result<()> {
        Self::validate_dept_srv(department, service)?;
        if path::classify(&path::instance_path(department, service, node)) != PathKind::Instance {
            return Err(RegistryError::InvalidArgument(format!("invalid instance node: {node}")));
        }
        if self.subscriber.service(department, service).is_none() {
            self.subscriber
                .subscribe_service(department, service, crate::entities::strategy::DEFAULT, true)?;
        }
        self.recipe.attach_instance_property_cb(department, service, node, callback)
    }

    // -- recipe: locks -----------------------------------------------------

    pub fn lock(&self, department: &str, service: &str, name: &str) -> Result<bool> {
        Self::validate_dept_srv(department, service)?;
        self.recipe.lock(department, service, name, &self.holder_tag)
    }

    pub fn try_lock(&self, department: &str, service: &str, name: &str, seconds: u64) -> Result<bool> {
        Self::validate_dept_srv(department, service)?;
        self.recipe.try_lock(department, service, name, &self.holder_tag, seconds)
    }

    pub fn unlock(&self, department: &str, service: &str, name: &str) -> Result<bool> {
        Self::validate_dept_srv(department, service)?;
        self.recipe.unlock(department, service, name, &self.holder_tag)
    }

    pub fn lock_owner(&self, department: &str, service: &str, name: &str) -> Result<bool> {
        Self::validate_dept_srv(department, service)?;
        self.recipe.owner(department, service, name, &self.holder_tag)
    }

    /// The raw `<ip>-<pid>` tag currently holding the named lock, if any.
    pub fn lock_current_holder(&self, department: &str, service: &str, name: &str) -> Result<Option<String>> {
        Self::validate_dept_srv(department, service)?;
        self.recipe.current_holder(department, service, name)
    }

    /// This process's `<primary-ip>-<pid>` identity, used as the default
    /// holder tag for every lock operation issued through this facade.
    pub fn holder_tag(&self) -> &str {
        &self.holder_tag
    }
}

impl Drop for Frame {
    /// Suppresses further event delivery, best-effort revokes every lock
    /// and published instance this process still holds, then joins the
    /// router thread.
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.recipe.revoke_all_locks(&self.holder_tag);
        if let Err(e) = self.registrar.revoke_all() {
            tracing::warn!(error = %e, "failed to revoke all instances during frame teardown");
        }
        if let Some(handle) = self.router.take() {
            let _ = handle.join();
        }
        let _ = &self.store;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn frame_over(store: &Arc<MemoryStore>) -> Frame {
        let (client, rx) = store.open_session();
        Frame::new(Arc::new(client), rx, "dc1").unwrap()
    }

    #[test]
    fn register_then_subscribe_then_pick_round_trips() {
        let store = MemoryStore::new();
        let publisher = frame_over(&store);
        publisher.register("a", "b", "10.0.0.1:7", BTreeMap::new(), false).unwrap();

        let consumer = frame_over(&store);
        consumer.subscribe_service("a", "b", crate::entities::strategy::DEFAULT, true).unwrap();
        let picked = consumer.pick("a", "b", None).unwrap();
        assert_eq!(picked.node, "10.0.0.1:7");
    }

    #[test]
    fn instance_property_callback_fires_when_value_actually_changes() {
        let store = MemoryStore::new();
        let publisher = frame_over(&store);
        let mut initial = BTreeMap::new();
        initial.insert("region".to_string(), "west".to_string());
        publisher.register("a", "b", "10.0.0.1:7", initial, false).unwrap();

        let consumer = frame_over(&store);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        consumer
            .attach_instance_property_cb(
                "a",
                "b",
                "10.0.0.1:7",
                Box::new(move |props| {
                    if props.get("region").map(String::as_str) == Some("east") {
                        calls_clone.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .unwrap();

        let mut updated = BTreeMap::new();
        updated.insert("region".to_string(), "east".to_string());
        publisher.register("a", "b", "10.0.0.1:7", updated, true).unwrap();

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lock_then_unlock_round_trips() {
        let store = MemoryStore::new();
        let frame = frame_over(&store);
        assert!(frame.try_lock("a", "b", "mutex", 0).unwrap());
        assert!(frame.lock_owner("a", "b", "mutex").unwrap());
        assert!(frame.unlock("a", "b", "mutex").unwrap());
        assert!(!frame.lock_owner("a", "b", "mutex").unwrap());
    }
}
