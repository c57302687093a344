//! Property-change callbacks and service-scoped named locks.
//!
//! Both recipes ride on the same primitive: the Subscriber reconciles a
//! path, and this module reacts to the result. Callbacks compare the
//! current property mapping against the last one actually delivered so a
//! `periodic_care` sweep that changes nothing stays silent; locks block on
//! a condition variable that any service-property reconcile wakes, then
//! loop back through `try_acquire` rather than trusting the wakeup alone.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use registry_errors::{RegistryError, Result};

use crate::path::{self, PathKind};
use crate::store::{CreateMode, StoreClient};
use crate::subscriber::Subscriber;

pub type PropertyCallback = Box<dyn Fn(&BTreeMap<String, String>) + Send + Sync>;

struct CallbackEntry {
    callback: PropertyCallback,
    last_delivered: BTreeMap<String, String>,
}

pub struct Recipe {
    store: Arc<dyn StoreClient>,
    subscriber: Arc<Subscriber>,
    service_callbacks: Mutex<HashMap<String, CallbackEntry>>,
    instance_callbacks: Mutex<HashMap<String, CallbackEntry>>,
    held_locks: Mutex<HashMap<String, String>>,
    lock_gate: Mutex<()>,
    lock_cv: Condvar,
}

impl Recipe {
    pub fn new(store: Arc<dyn StoreClient>, subscriber: Arc<Subscriber>) -> Self {
        Recipe {
            store,
            subscriber,
            service_callbacks: Mutex::new(HashMap::new()),
            instance_callbacks: Mutex::new(HashMap::new()),
            held_locks: Mutex::new(HashMap::new()),
            lock_gate: Mutex::new(()),
            lock_cv: Condvar::new(),
        }
    }

    // -- property callbacks -------------------------------------------------

    pub fn attach_service_property_cb(&self, department: &str, service: &str, callback: PropertyCallback) -> Result<()> {
        let service_path = path::service_path(department, service);
        if path::classify(&service_path) != PathKind::Service {
            return Err(RegistryError::InvalidArgument(format!("not a service path: {service_path}")));
        }
        self.service_callbacks.lock().unwrap().insert(
            service_path,
            CallbackEntry { callback, last_delivered: BTreeMap::new() },
        );
        Ok(())
    }

    pub fn attach_instance_property_cb(
        &self,
        department: &str,
        service: &str,
        node: &str,
        callback: PropertyCallback,
    ) -> Result<()> {
        let instance_path = path::instance_path(department, service, node);
        if path::classify(&instance_path) != PathKind::Instance {
            return Err(RegistryError::InvalidArgument(format!("not an instance path: {instance_path}")));
        }
        self.instance_callbacks.lock().unwrap().insert(
            instance_path,
            CallbackEntry { callback, last_delivered: BTreeMap::new() },
        );
        Ok(())
    }

    /// Called by the facade's event router after a service-kind path has
    /// been reconciled. No-op if no callback is attached; otherwise invokes
    /// it only when the property mapping actually changed, and wakes any
    /// thread blocked in `lock`/`try_lock` for this service.
    pub fn dispatch_service(&self, department: &str, service: &str) {
        let service_path = path::service_path(department, service);
        let Some(svc) = self.subscriber.service(department, service) else { return };

        if let Some(entry) = self.service_callbacks.lock().unwrap().get_mut(&service_path) {
            if entry.last_delivered != svc.properties {
                (entry.callback)(&svc.properties);
                entry.last_delivered = svc.properties.clone();
            }
        }

        let _guard = self.lock_gate.lock().unwrap();
        self.lock_cv.notify_all();
    }

    /// Called by the router after an instance-kind path has been
    /// reconciled.
    pub fn dispatch_instance(&self, department: &str, service: &str, node: &str) {
        let instance_path = path::instance_path(department, service, node);
        let Some(svc) = self.subscriber.service(department, service) else { return };
        let Some(instance) = svc.instances.get(node) else { return };

        if let Some(entry) = self.instance_callbacks.lock().unwrap().get_mut(&instance_path) {
            if entry.last_delivered != instance.properties {
                (entry.callback)(&instance.properties);
                entry.last_delivered = instance.properties.clone();
            }
        }
    }

    // -- locks ----------------------------------------------------------

    fn lock_path(department: &str, service: &str, name: &str) -> String {
        path::extend_property(&path::service_path(department, service), &format!("lock_{name}"))
    }

    fn try_acquire(&self, lock_path: &str, tag: &str) -> Result<bool> {
        self.store.create_if_absent(lock_path, tag, CreateMode::Ephemeral)?;
        let observed = self.store.get(lock_path, true)?;
        Ok(observed == tag)
    }

    /// Blocks until the lock is acquired. Ensures the service is subscribed
    /// first so a `ChildChanged` on the incumbent's departure wakes this
    /// waiter via `dispatch_service`.
    pub fn lock(&self, department: &str, service: &str, name: &str, tag: &str) -> Result<bool> {
        if self.subscriber.service(department, service).is_none() {
            self.subscriber
                .subscribe_service(department, service, crate::entities::strategy::DEFAULT, false)?;
        }

        let lock_path = Self::lock_path(department, service, name);
        loop {
            if self.try_acquire(&lock_path, tag)? {
                self.held_locks.lock().unwrap().insert(lock_path, tag.to_string());
                return Ok(true);
            }
            let guard = self.lock_gate.lock().unwrap();
            let _ = self.lock_cv.wait_timeout(guard, Duration::from_millis(200)).unwrap();
        }
    }

    /// Bounded acquisition; `seconds == 0` attempts exactly once.
    pub fn try_lock(&self, department: &str, service: &str, name: &str, tag: &str, seconds: u64) -> Result<bool> {
        if self.subscriber.service(department, service).is_none() {
            self.subscriber
                .subscribe_service(department, service, crate::entities::strategy::DEFAULT, false)?;
        }

        let lock_path = Self::lock_path(department, service, name);
        if seconds == 0 {
            if self.try_acquire(&lock_path, tag)? {
                self.held_locks.lock().unwrap().insert(lock_path, tag.to_string());
                return Ok(true);
            }
            return Ok(false);
        }

        let deadline = Instant::now() + Duration::from_secs(seconds);
        loop {
            if self.try_acquire(&lock_path, tag)? {
                self.held_locks.lock().unwrap().insert(lock_path, tag.to_string());
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            let guard = self.lock_gate.lock().unwrap();
            let _ = self.lock_cv.wait_timeout(guard, remaining.min(Duration::from_millis(200))).unwrap();
        }
    }

    /// Releases a held lock. Not being the holder is a non-fatal `false`.
    pub fn unlock(&self, department: &str, service: &str, name: &str, tag: &str) -> Result<bool> {
        let lock_path = Self::lock_path(department, service, name);
        match self.store.get(&lock_path, false) {
            Ok(value) if value == tag => {
                self.store.delete(&lock_path)?;
                self.held_locks.lock().unwrap().remove(&lock_path);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Reports whether `tag` currently holds the named lock.
    pub fn owner(&self, department: &str, service: &str, name: &str, tag: &str) -> Result<bool> {
        let lock_path = Self::lock_path(department, service, name);
        match self.store.get(&lock_path, false) {
            Ok(value) => Ok(value == tag),
            Err(_) => Ok(false),
        }
    }

    /// The raw holder tag currently recorded for the named lock, if any.
    /// Unlike [`Recipe::owner`], this doesn't presuppose a caller identity —
    /// useful for diagnostics ("who holds this lock right now").
    pub fn current_holder(&self, department: &str, service: &str, name: &str) -> Result<Option<String>> {
        let lock_path = Self::lock_path(department, service, name);
        match self.store.get(&lock_path, false) {
            Ok(value) => Ok(Some(value)),
            Err(_) => Ok(None),
        }
    }

    /// Releases every lock this process still remembers holding with
    /// `tag`. Best-effort teardown step.
    pub fn revoke_all_locks(&self, tag: &str) {
        let snapshot: Vec<String> = self.held_locks.lock().unwrap().keys().cloned().collect();
        for lock_path in snapshot {
            match self.store.get(&lock_path, false) {
                Ok(value) if value == tag => {
                    if let Err(e) = self.store.delete(&lock_path) {
                        tracing::warn!(path = %lock_path, error = %e, "failed to revoke lock during teardown");
                    }
                }
                _ => {}
            }
            self.held_locks.lock().unwrap().remove(&lock_path);
        }
        let _guard = self.lock_gate.lock().unwrap();
        self.lock_cv.notify_all();
    }
}
