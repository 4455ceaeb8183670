//! Hidden classes (Shapes) for property access optimization.
//!
//! A Shape describes the structure of an object: which properties it has, where
//! each is stored and in which representation. Shapes are immutable; adding,
//! removing or modifying a property derives a new shape. Objects that evolve the
//! same way share successor shapes through a weak transition history, so an
//! inline cache keyed on a shape covers all of them.
//!
//! Shapes also carry the per-key proto switch points that protect lookups through
//! the prototype chain, and the listener registry that invalidates them.

use crate::key::PropertyKey;
use crate::layout::ObjectLayout;
use crate::listeners::{PropertyListener, PropertyListeners};
use crate::property::spill;
use crate::property::{Property, PropertyFlags, PropertyKind, PropertySignature};
use crate::switchpoint::SwitchPoint;
use crate::table::PropertyTable;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_SHAPE_ID: AtomicU64 = AtomicU64::new(1);

bitflags::bitflags! {
    /// Shape-wide flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShapeFlags: u8 {
        /// No properties may be added.
        const NOT_EXTENSIBLE = 1 << 0;
        /// Some property is a getter/setter pair.
        const HAS_USER_ACCESSORS = 1 << 1;
        /// Shared by many objects (e.g. a prototype template); changes invalidate
        /// the shared switch point.
        const IS_SHARED = 1 << 2;
    }
}

/// Transition history key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Transition {
    Add(PropertySignature),
    Replace(PropertySignature, PropertySignature),
}

/// A Shape defines the layout of properties in an object.
pub struct Shape {
    id: u64,
    properties: PropertyTable,
    layout: Arc<ObjectLayout>,
    flags: ShapeFlags,
    /// Field slots in use (one past the highest)
    field_count: usize,
    /// Field slots the layout provides
    field_maximum: usize,
    /// Spill slots in use (one past the highest)
    spill_length: usize,
    /// Slots freed by deletion. Spill slots are offset by `field_maximum`.
    free_slots: Option<Arc<BTreeSet<usize>>>,
    /// Inherited from the parent shape; replaced by a private copy on first add.
    listeners: RwLock<Option<Arc<PropertyListeners>>>,
    proto_switches: Mutex<FxHashMap<PropertyKey, SwitchPoint>>,
    /// Successor shapes, held weakly.
    history: Mutex<FxHashMap<Transition, Weak<Shape>>>,
    shared_switch_point: Option<SwitchPoint>,
}

impl Shape {
    /// Create an empty shape for `layout`
    pub fn new_map(layout: Arc<ObjectLayout>) -> Arc<Self> {
        Self::from_properties(layout, std::iter::empty())
    }

    /// Create a shape holding `properties`, as generated for a class at load time
    pub fn from_properties(
        layout: Arc<ObjectLayout>,
        properties: impl IntoIterator<Item = Property>,
    ) -> Arc<Self> {
        let properties = PropertyTable::from_properties(properties);
        let mut shape = Shape {
            id: NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed),
            field_maximum: layout.field_count(),
            layout,
            flags: ShapeFlags::empty(),
            field_count: 0,
            spill_length: 0,
            free_slots: None,
            listeners: RwLock::new(None),
            proto_switches: Mutex::new(FxHashMap::default()),
            history: Mutex::new(FxHashMap::default()),
            shared_switch_point: None,
            properties: PropertyTable::new(),
        };
        for property in properties.properties().iter() {
            shape.update_boundaries(property);
        }
        shape.properties = properties;
        Arc::new(shape)
    }

    /// Copy of this shape's bookkeeping around a new table
    fn derive(&self, properties: PropertyTable) -> Shape {
        Shape {
            id: NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed),
            properties,
            layout: self.layout.clone(),
            flags: self.flags - ShapeFlags::IS_SHARED,
            field_count: self.field_count,
            field_maximum: self.field_maximum,
            spill_length: self.spill_length,
            free_slots: self.free_slots.clone(),
            listeners: RwLock::new(self.listeners()),
            proto_switches: Mutex::new(FxHashMap::default()),
            history: Mutex::new(FxHashMap::default()),
            shared_switch_point: None,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Unique id, for diagnostics
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Backing layout
    pub fn layout(&self) -> &Arc<ObjectLayout> {
        &self.layout
    }

    /// Shape flags
    pub fn flags(&self) -> ShapeFlags {
        self.flags
    }

    /// Property table
    pub fn table(&self) -> &PropertyTable {
        &self.properties
    }

    /// Look up a property
    pub fn find(&self, key: &PropertyKey) -> Option<Arc<Property>> {
        self.properties.find(key).cloned()
    }

    /// Properties in insertion order
    pub fn properties(&self) -> Arc<[Arc<Property>]> {
        self.properties.properties()
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<PropertyKey> {
        self.properties.keys()
    }

    /// Number of properties
    pub fn size(&self) -> usize {
        self.properties.size()
    }

    /// Field slots in use
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// Field slots the layout provides
    pub fn field_maximum(&self) -> usize {
        self.field_maximum
    }

    /// Spill slots in use
    pub fn spill_length(&self) -> usize {
        self.spill_length
    }

    /// Check if properties may be added
    pub fn is_extensible(&self) -> bool {
        !self.flags.contains(ShapeFlags::NOT_EXTENSIBLE)
    }

    /// Check if non-extensible with only non-configurable properties
    pub fn is_sealed(&self) -> bool {
        !self.is_extensible() && self.properties().iter().all(|p| !p.is_configurable())
    }

    /// Check if sealed with only read-only data properties
    pub fn is_frozen(&self) -> bool {
        self.is_sealed()
            && self
                .properties()
                .iter()
                .all(|p| p.is_user_accessor() || !p.is_writable())
    }

    /// Check if some property is a getter/setter pair
    pub fn has_user_accessors(&self) -> bool {
        self.flags.contains(ShapeFlags::HAS_USER_ACCESSORS)
    }

    /// Check if this is a shared shape
    pub fn is_shared(&self) -> bool {
        self.flags.contains(ShapeFlags::IS_SHARED)
    }

    /// Switch point invalidated when a shared shape is changed
    pub fn shared_switch_point(&self) -> Option<&SwitchPoint> {
        self.shared_switch_point.as_ref()
    }

    /// Same properties, flags and slot counters
    pub fn structurally_equals(&self, other: &Shape) -> bool {
        self.flags == other.flags
            && self.field_count == other.field_count
            && self.spill_length == other.spill_length
            && self.properties.structurally_equals(&other.properties)
    }

    // ========================================================================
    // Slot allocation
    // ========================================================================

    fn free_slot_index(&self, property: &Property) -> usize {
        if property.is_spill() {
            spill::free_slot_index(property.slot(), self.field_maximum)
        } else {
            property.slot()
        }
    }

    /// A field slot for a new property, if the layout has one left
    pub fn free_field_slot(&self) -> Option<usize> {
        if let Some(free) = &self.free_slots {
            if let Some(&slot) = free.iter().next() {
                if slot < self.field_maximum {
                    return Some(slot);
                }
            }
        }
        (self.field_count < self.field_maximum).then_some(self.field_count)
    }

    /// A spill slot for a new property
    pub fn free_spill_slot(&self) -> usize {
        if let Some(free) = &self.free_slots {
            if let Some(&slot) = free.range(self.field_maximum..).next() {
                return slot - self.field_maximum;
            }
        }
        self.spill_length
    }

    /// Accessor property for `key` in a fresh spill slot
    pub fn new_user_accessors(&self, key: PropertyKey, flags: PropertyFlags) -> Property {
        Property::user_accessor(key, flags, self.free_spill_slot())
    }

    fn update_boundaries(&mut self, property: &Property) {
        match property.kind() {
            PropertyKind::Field => {
                self.field_count = self.field_count.max(property.slot() + 1);
            }
            PropertyKind::Spill | PropertyKind::UserAccessor => {
                self.spill_length = self.spill_length.max(property.slot() + 1);
            }
        }
        if property.is_user_accessor() {
            self.flags |= ShapeFlags::HAS_USER_ACCESSORS;
        }
    }

    fn update_free_slots(&mut self, released: Option<&Property>, claimed: Option<&Property>) {
        let released = released.map(|p| self.free_slot_index(p));
        let claimed = claimed.map(|p| self.free_slot_index(p));
        if released == claimed {
            return;
        }
        let mut free = self
            .free_slots
            .as_deref()
            .cloned()
            .unwrap_or_default();
        let mut changed = false;
        if let Some(slot) = released {
            changed |= free.insert(slot);
        }
        if let Some(slot) = claimed {
            changed |= free.remove(&slot);
        }
        if changed {
            self.free_slots = (!free.is_empty()).then(|| Arc::new(free));
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn before_change(&self) {
        if let Some(switch_point) = &self.shared_switch_point {
            if switch_point.invalidate() {
                tracing::debug!(shape = self.id, "shared shape changed");
            }
        }
    }

    fn check_history(&self, transition: &Transition) -> Option<Arc<Shape>> {
        self.history.lock().get(transition).and_then(Weak::upgrade)
    }

    fn add_to_history(&self, transition: Transition, shape: &Arc<Shape>) {
        let mut history = self.history.lock();
        history.retain(|_, successor| successor.strong_count() > 0);
        history.insert(transition, Arc::downgrade(shape));
    }

    fn with_added(&self, property: Property) -> Shape {
        let mut shape = self.derive(self.properties.with_added(Arc::new(property.clone())));
        shape.update_boundaries(&property);
        shape.update_free_slots(None, Some(&property));
        shape
    }

    /// Shape with `property` added. Shapes that made the same addition before
    /// return the same successor.
    pub fn add_property(&self, property: Property) -> Arc<Shape> {
        self.before_change();
        self.notify_added(&property, true);

        let transition = Transition::Add(property.signature());
        if let Some(shape) = self.check_history(&transition) {
            return shape;
        }
        let shape = Arc::new(self.with_added(property));
        tracing::trace!(from = self.id, to = shape.id, "add property transition");
        self.add_to_history(transition, &shape);
        shape
    }

    /// Shape with `property` added, bypassing the transition history
    pub fn add_property_no_history(&self, property: Property) -> Arc<Shape> {
        self.before_change();
        self.notify_added(&property, true);
        Arc::new(self.with_added(property))
    }

    /// Shape without `property`, or `None` if it is not present
    pub fn remove_property(&self, property: &Property) -> Option<Arc<Shape>> {
        if !self.properties.contains(property.key()) {
            return None;
        }
        self.before_change();
        self.notify_deleted(property, true);

        let mut shape = self.derive(self.properties.with_removed(property.key()));
        let slot = property.slot();
        if property.is_spill() && slot + 1 == self.spill_length {
            shape.spill_length -= 1;
        } else if !property.is_spill() && slot + 1 == self.field_count {
            shape.field_count -= 1;
        } else {
            shape.update_free_slots(Some(property), None);
        }
        Some(Arc::new(shape))
    }

    /// Shape with `old` replaced by `new` (flags, type or kind changed)
    pub fn replace_property(&self, old: &Property, new: Property) -> Arc<Shape> {
        self.before_change();
        self.notify_modified(old, &new, true);

        let transition = Transition::Replace(old.signature(), new.signature());
        if let Some(shape) = self.check_history(&transition) {
            return shape;
        }
        let mut shape = self.derive(self.properties.with_replaced(old, Arc::new(new.clone())));
        if old.kind() != new.kind() {
            shape.update_boundaries(&new);
            shape.update_free_slots(Some(old), Some(&new));
        }
        let shape = Arc::new(shape);
        tracing::trace!(from = self.id, to = shape.id, key = %new.key(), "replace property transition");
        self.add_to_history(transition, &shape);
        shape
    }

    /// Fresh shape for an object whose prototype changed
    pub fn change_proto(&self) -> Arc<Shape> {
        Arc::new(self.derive(self.properties.clone()))
    }

    /// Non-extensible copy
    pub fn prevent_extensions(&self) -> Arc<Shape> {
        self.before_change();
        let mut shape = self.derive(self.properties.clone());
        shape.flags |= ShapeFlags::NOT_EXTENSIBLE;
        Arc::new(shape)
    }

    /// Non-extensible copy with every property non-configurable
    pub fn seal(&self) -> Arc<Shape> {
        self.with_all_flags(|_| PropertyFlags::SEALED)
    }

    /// Non-extensible copy with every property non-configurable and every data
    /// property read-only
    pub fn freeze(&self) -> Arc<Shape> {
        self.with_all_flags(|property| {
            if property.is_user_accessor() {
                PropertyFlags::SEALED
            } else {
                PropertyFlags::FROZEN
            }
        })
    }

    fn with_all_flags(&self, flags_for: impl Fn(&Property) -> PropertyFlags) -> Arc<Shape> {
        self.before_change();
        let properties = self.properties();
        let mut table = self.properties.clone();
        for old in properties.iter() {
            let new = old.with_flags(flags_for(old));
            if new.flags() != old.flags() {
                self.notify_modified(old, &new, true);
                table = table.with_replaced(old, Arc::new(new));
            }
        }
        let mut shape = self.derive(table);
        shape.flags |= ShapeFlags::NOT_EXTENSIBLE;
        Arc::new(shape)
    }

    /// Copy flagged as shared, with a fresh shared switch point
    pub fn make_shared(&self) -> Arc<Shape> {
        let mut shape = self.derive(self.properties.clone());
        shape.flags |= ShapeFlags::IS_SHARED;
        shape.shared_switch_point = Some(SwitchPoint::new());
        Arc::new(shape)
    }

    // ========================================================================
    // Listeners and proto switch points
    // ========================================================================

    /// Current listener registry
    pub fn listeners(&self) -> Option<Arc<PropertyListeners>> {
        self.listeners.read().clone()
    }

    /// Register `listener` to be told about changes to `key` on this shape
    pub fn add_listener(&self, key: &PropertyKey, listener: &Arc<Shape>) {
        if std::ptr::eq(self, Arc::as_ptr(listener)) {
            return;
        }
        let listener: Arc<dyn PropertyListener> = listener.clone();
        let mut listeners = self.listeners.write();
        let updated = PropertyListeners::add_listener(listeners.as_ref(), key, &listener);
        *listeners = Some(updated);
    }

    /// Switch point protecting inherited lookups of `key` through this shape
    pub fn switch_point(&self, key: &PropertyKey) -> SwitchPoint {
        self.proto_switches
            .lock()
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Number of live proto switch points
    pub fn proto_switch_point_count(&self) -> usize {
        self.proto_switches.lock().len()
    }

    /// Invalidate the proto switch point for `key`
    pub fn invalidate_proto_switch_point(&self, key: &PropertyKey) {
        let removed = self.proto_switches.lock().remove(key);
        if let Some(switch_point) = removed {
            tracing::debug!(shape = self.id, key = %key, "invalidating proto switch point");
            switch_point.invalidate();
        }
    }

    /// Invalidate every proto switch point
    pub fn invalidate_all_proto_switch_points(&self) {
        let removed: Vec<_> = self.proto_switches.lock().drain().map(|(_, sp)| sp).collect();
        if !removed.is_empty() {
            tracing::debug!(shape = self.id, count = removed.len(), "invalidating all proto switch points");
            SwitchPoint::invalidate_all(&removed);
        }
    }

    fn notify_added(&self, property: &Property, is_self: bool) {
        if !is_self {
            self.invalidate_proto_switch_point(property.key());
        }
        if let Some(listeners) = self.listeners() {
            listeners.property_added(property);
        }
    }

    fn notify_deleted(&self, property: &Property, is_self: bool) {
        if !is_self {
            self.invalidate_proto_switch_point(property.key());
        }
        if let Some(listeners) = self.listeners() {
            listeners.property_deleted(property);
        }
    }

    fn notify_modified(&self, old: &Property, new: &Property, is_self: bool) {
        if !is_self {
            self.invalidate_proto_switch_point(old.key());
        }
        if let Some(listeners) = self.listeners() {
            listeners.property_modified(old, new);
        }
    }
}

impl PropertyListener for Shape {
    fn property_added(&self, property: &Property) {
        self.notify_added(property, false);
    }

    fn property_deleted(&self, property: &Property) {
        self.notify_deleted(property, false);
    }

    fn property_modified(&self, old: &Property, new: &Property) {
        self.notify_modified(old, new, false);
    }

    fn proto_changed(&self) {
        self.invalidate_all_proto_switch_points();
        self.before_change();
        if let Some(listeners) = self.listeners() {
            listeners.proto_changed();
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shape")
            .field("id", &self.id)
            .field("layout", &self.layout)
            .field("keys", &self.keys())
            .field("field_count", &self.field_count)
            .field("spill_length", &self.spill_length)
            .field("flags", &self.flags)
            .finish()
    }
}
