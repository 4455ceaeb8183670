//! Property change notifications between shapes.
//!
//! A prototype's shape keeps a registry of the shapes that depend on it, keyed by
//! property name. When the prototype gains, loses or changes a property with that
//! name (or its own prototype changes), every dependent is told once and its
//! registration is dropped. Dependents are held weakly, so the registry never keeps
//! a shape alive.
//!
//! Registries are copy-on-write: a shape inherits its parent's registry, and
//! adding a listener installs a private copy on the shape it is added to.

use crate::key::PropertyKey;
use crate::property::Property;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Receiver of property change notifications
pub trait PropertyListener: Send + Sync {
    /// A property was added
    fn property_added(&self, property: &Property);

    /// A property was deleted
    fn property_deleted(&self, property: &Property);

    /// A property was replaced by a modified copy
    fn property_modified(&self, old: &Property, new: &Property);

    /// The prototype of the notifying object changed
    fn proto_changed(&self);
}

/// Registry of weak listeners per property key
#[derive(Default)]
pub struct PropertyListeners {
    listeners: Mutex<FxHashMap<PropertyKey, Vec<Weak<dyn PropertyListener>>>>,
}

impl PropertyListeners {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of `other`, without dead registrations
    fn copy_of(other: &PropertyListeners) -> Self {
        let listeners = other
            .listeners
            .lock()
            .iter()
            .filter_map(|(key, set)| {
                let live: Vec<_> = set
                    .iter()
                    .filter(|weak| weak.strong_count() > 0)
                    .cloned()
                    .collect();
                (!live.is_empty()).then(|| (key.clone(), live))
            })
            .collect();
        Self {
            listeners: Mutex::new(listeners),
        }
    }

    /// Registry equal to `listeners` plus `listener` for `key`.
    ///
    /// Returns `listeners` itself when the listener is already registered,
    /// otherwise a new registry.
    pub fn add_listener(
        listeners: Option<&Arc<PropertyListeners>>,
        key: &PropertyKey,
        listener: &Arc<dyn PropertyListener>,
    ) -> Arc<PropertyListeners> {
        if let Some(existing) = listeners {
            if existing.contains_listener(key, listener) {
                return existing.clone();
            }
        }
        let copy = listeners.map_or_else(PropertyListeners::new, |l| Self::copy_of(l));
        copy.listeners
            .lock()
            .entry(key.clone())
            .or_default()
            .push(Arc::downgrade(listener));
        Arc::new(copy)
    }

    /// Whether `listener` is registered for `key`
    pub fn contains_listener(&self, key: &PropertyKey, listener: &Arc<dyn PropertyListener>) -> bool {
        let target = Arc::downgrade(listener);
        self.listeners
            .lock()
            .get(key)
            .is_some_and(|set| set.iter().any(|weak| Weak::ptr_eq(weak, &target)))
    }

    /// Number of live listeners for `key`
    pub fn listener_count(&self, key: &PropertyKey) -> usize {
        self.listeners
            .lock()
            .get(key)
            .map_or(0, |set| set.iter().filter(|weak| weak.strong_count() > 0).count())
    }

    /// Number of keys with registrations
    pub fn key_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Remove and return the live listeners for `key`. The lock is released before
    /// any listener runs.
    fn take(&self, key: &PropertyKey) -> Vec<Arc<dyn PropertyListener>> {
        let removed = self.listeners.lock().remove(key);
        removed
            .map(|set| set.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    /// Notify listeners of `property.key()` that it was added
    pub fn property_added(&self, property: &Property) {
        for listener in self.take(property.key()) {
            listener.property_added(property);
        }
    }

    /// Notify listeners of `property.key()` that it was deleted
    pub fn property_deleted(&self, property: &Property) {
        for listener in self.take(property.key()) {
            listener.property_deleted(property);
        }
    }

    /// Notify listeners of `old.key()` that it was modified
    pub fn property_modified(&self, old: &Property, new: &Property) {
        for listener in self.take(old.key()) {
            listener.property_modified(old, new);
        }
    }

    /// Notify every listener that the prototype changed
    pub fn proto_changed(&self) {
        let all: Vec<_> = {
            let mut listeners = self.listeners.lock();
            listeners.drain().flat_map(|(_, set)| set).collect()
        };
        let mut notified: Vec<Arc<dyn PropertyListener>> = Vec::new();
        for listener in all.iter().filter_map(Weak::upgrade) {
            if notified.iter().any(|seen| Arc::ptr_eq(seen, &listener)) {
                continue;
            }
            listener.proto_changed();
            notified.push(listener);
        }
    }
}

impl fmt::Debug for PropertyListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock();
        f.debug_map()
            .entries(listeners.iter().map(|(key, set)| (key, set.len())))
            .finish()
    }
}
