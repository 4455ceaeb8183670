//! Property descriptors.
//!
//! A `Property` describes one named property of a shape: its key, attribute flags,
//! storage slot, storage kind and current representation. Properties are immutable
//! values; changing flags or type yields a new `Property`. The only shared mutable
//! state is the builtin switch-point slot, which every clone of a property sees.
//!
//! Three storage kinds share one contract:
//! - `Field`: slot addresses an in-object field of the layout
//! - `Spill`: slot addresses the per-instance spill array
//! - `UserAccessor`: a spill slot holding a `{getter, setter}` pair

pub mod accessor;
pub mod flags;
pub mod spill;
pub mod user_accessor;

pub use accessor::{Getter, Setter};
pub use flags::PropertyFlags;

use crate::convert::{FromValue, coerce, fits};
use crate::error::{PropertyError, PropertyResult};
use crate::key::PropertyKey;
use crate::object::ObjectRef;
use crate::shape::Shape;
use crate::storage::StorageArea;
use crate::switchpoint::SwitchPoint;
use crate::types::ValueType;
use crate::value::Value;
use accessor::{GetTarget, SetAction};
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Storage kind of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// In-object field
    Field,
    /// Spill array slot
    Spill,
    /// Spill slot holding a getter/setter pair
    UserAccessor,
}

/// Getters built for this property, one per requested representation
#[derive(Default)]
struct GetterCache {
    slots: [OnceLock<Getter>; 4],
}

/// One named property of a shape
pub struct Property {
    key: PropertyKey,
    flags: PropertyFlags,
    slot: usize,
    kind: PropertyKind,
    current_type: ValueType,
    /// Shared by every clone: "was this builtin ever reassigned"
    builtin: Arc<RwLock<Option<SwitchPoint>>>,
    getters: Arc<GetterCache>,
}

/// Structural identity of a property, used as a transition key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PropertySignature {
    key: PropertyKey,
    flags: PropertyFlags,
    slot: usize,
    kind: PropertyKind,
    current_type: ValueType,
}

impl Property {
    fn new(
        key: PropertyKey,
        flags: PropertyFlags,
        slot: usize,
        kind: PropertyKind,
        current_type: ValueType,
    ) -> Self {
        Self {
            key,
            flags,
            slot,
            kind,
            current_type,
            builtin: Arc::new(RwLock::new(None)),
            getters: Arc::new(GetterCache::default()),
        }
    }

    /// Property stored in in-object field `slot`
    pub fn field(key: PropertyKey, flags: PropertyFlags, slot: usize, ty: ValueType) -> Self {
        Self::new(key, flags, slot, PropertyKind::Field, ty)
    }

    /// Property stored in spill slot `slot`
    pub fn spill(key: PropertyKey, flags: PropertyFlags, slot: usize, ty: ValueType) -> Self {
        Self::new(key, flags, slot, PropertyKind::Spill, ty)
    }

    /// Accessor property whose pair lives in spill slot `slot`
    pub fn user_accessor(key: PropertyKey, flags: PropertyFlags, slot: usize) -> Self {
        Self::new(key, flags, slot, PropertyKind::UserAccessor, ValueType::Object)
    }

    /// Property key
    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    /// Attribute flags
    pub fn flags(&self) -> PropertyFlags {
        self.flags
    }

    /// Storage slot
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Storage kind
    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    /// Current representation
    pub fn current_type(&self) -> ValueType {
        self.current_type
    }

    /// Storage area the slot addresses
    pub fn storage_area(&self) -> StorageArea {
        match self.kind {
            PropertyKind::Field => StorageArea::Field,
            PropertyKind::Spill | PropertyKind::UserAccessor => StorageArea::Spill,
        }
    }

    /// Check if writable
    pub fn is_writable(&self) -> bool {
        !self.flags.contains(PropertyFlags::NOT_WRITABLE)
    }

    /// Check if enumerable
    pub fn is_enumerable(&self) -> bool {
        !self.flags.contains(PropertyFlags::NOT_ENUMERABLE)
    }

    /// Check if configurable
    pub fn is_configurable(&self) -> bool {
        !self.flags.contains(PropertyFlags::NOT_CONFIGURABLE)
    }

    /// Check if stored in the spill area
    pub fn is_spill(&self) -> bool {
        self.kind != PropertyKind::Field
    }

    /// Check if this is a getter/setter property
    pub fn is_user_accessor(&self) -> bool {
        self.kind == PropertyKind::UserAccessor
    }

    /// Check if this binding still awaits its declaration
    pub fn needs_declaration(&self) -> bool {
        self.flags.contains(PropertyFlags::NEEDS_DECLARATION)
    }

    /// Check if bound to a fixed scope object
    pub fn is_bound(&self) -> bool {
        self.flags.contains(PropertyFlags::IS_BOUND)
    }

    /// Check if this is a lexical binding
    pub fn is_lexical_binding(&self) -> bool {
        self.flags.contains(PropertyFlags::IS_LEXICAL_BINDING)
    }

    /// Check if created by a function declaration
    pub fn is_function_declaration(&self) -> bool {
        self.flags.contains(PropertyFlags::IS_FUNCTION_DECLARATION)
    }

    /// Check if stored in a dual-field layout
    pub fn has_dual_fields(&self) -> bool {
        self.flags.contains(PropertyFlags::DUAL_FIELDS)
    }

    /// Copy with `flags` added
    pub fn with_flags(&self, flags: PropertyFlags) -> Property {
        self.set_flags(self.flags | flags)
    }

    /// Copy with `flags` removed
    pub fn without_flags(&self, flags: PropertyFlags) -> Property {
        self.set_flags(self.flags - flags)
    }

    /// Copy with exactly `flags`
    pub fn set_flags(&self, flags: PropertyFlags) -> Property {
        Property {
            flags,
            ..self.clone()
        }
    }

    /// Copy with representation `ty`. The getter cache is kept when the type does
    /// not change.
    pub fn with_type(&self, ty: ValueType) -> Property {
        let mut property = self.clone();
        if ty != self.current_type {
            property.current_type = ty;
            property.getters = Arc::new(GetterCache::default());
        }
        property
    }

    /// Whether this property's representation may still widen.
    ///
    /// An `Undefined` property may always widen, even when not writable, so that a
    /// `const` can be initialised.
    pub fn can_change_type(&self) -> bool {
        if !self.has_dual_fields() {
            return false;
        }
        match self.current_type {
            ValueType::Undefined => true,
            ValueType::Object => false,
            _ => self.is_configurable() || self.is_writable(),
        }
    }

    /// Whether this property still guards a builtin
    pub fn is_builtin(&self) -> bool {
        self.builtin
            .read()
            .as_ref()
            .is_some_and(SwitchPoint::is_valid)
    }

    /// Builtin switch point, if one is attached
    pub fn builtin_switch_point(&self) -> Option<SwitchPoint> {
        self.builtin.read().clone()
    }

    /// Attach a builtin switch point (shared by every clone of this property)
    pub fn set_builtin_switch_point(&self, switch_point: Option<SwitchPoint>) {
        *self.builtin.write() = switch_point;
    }

    /// Invalidate the builtin switch point, if any
    pub fn invalidate_builtin(&self) {
        if let Some(switch_point) = self.builtin.read().as_ref() {
            switch_point.invalidate();
        }
    }

    pub(crate) fn signature(&self) -> PropertySignature {
        PropertySignature {
            key: self.key.clone(),
            flags: self.flags,
            slot: self.slot,
            kind: self.kind,
            current_type: self.current_type,
        }
    }

    /// Getter returning the value in representation `requested`
    pub fn get_getter(&self, requested: ValueType) -> Getter {
        self.getters.slots[requested.accessor_index()]
            .get_or_init(|| {
                let target = match self.kind {
                    PropertyKind::UserAccessor => GetTarget::UserAccessor { slot: self.slot },
                    _ => GetTarget::Slot {
                        area: self.storage_area(),
                        slot: self.slot,
                    },
                };
                Getter::new(self.key.clone(), target, requested)
            })
            .clone()
    }

    /// Setter accepting values of representation `requested` on an object of
    /// shape `shape`. Widens the property when `requested` is wider than its
    /// current type and the property may still change type.
    pub fn get_setter(&self, requested: ValueType, shape: &Arc<Shape>) -> Setter {
        Setter::new(self.key.clone(), self.setter_action(requested, shape))
    }

    pub(crate) fn setter_action(&self, requested: ValueType, shape: &Arc<Shape>) -> SetAction {
        let action = match self.kind {
            PropertyKind::UserAccessor => SetAction::UserAccessor { slot: self.slot },
            PropertyKind::Field | PropertyKind::Spill => {
                let store = |repr| SetAction::Store {
                    area: self.storage_area(),
                    slot: self.slot,
                    repr,
                };
                if requested.is_wider_than(self.current_type) && self.can_change_type() {
                    let widened = shape.replace_property(self, self.with_type(requested));
                    tracing::trace!(
                        key = %self.key,
                        from = %self.current_type,
                        to = %requested,
                        "linking widening setter"
                    );
                    SetAction::Transition {
                        from: shape.clone(),
                        to: widened,
                        then: Box::new(store(requested)),
                    }
                } else {
                    store(self.current_type)
                }
            }
        };
        match self.builtin_switch_point() {
            Some(switch_point) => SetAction::InvalidateBuiltin {
                switch_point,
                then: Box::new(action),
            },
            None => action,
        }
    }

    /// Read the value, binding user accessors to `receiver`
    pub fn get_value(&self, receiver: &ObjectRef, owner: &ObjectRef) -> PropertyResult<Value> {
        match self.kind {
            PropertyKind::UserAccessor => {
                user_accessor::invoke_getter(owner, self.slot, receiver)
            }
            PropertyKind::Field | PropertyKind::Spill => {
                Ok(owner.read_slot(self.storage_area(), self.slot))
            }
        }
    }

    /// Read the value as int32
    pub fn get_int_value(&self, receiver: &ObjectRef, owner: &ObjectRef) -> PropertyResult<i32> {
        i32::from_value(&self.get_value(receiver, owner)?)
    }

    /// Read the value as int64
    pub fn get_long_value(&self, receiver: &ObjectRef, owner: &ObjectRef) -> PropertyResult<i64> {
        i64::from_value(&self.get_value(receiver, owner)?)
    }

    /// Read the value as double
    pub fn get_double_value(
        &self,
        receiver: &ObjectRef,
        owner: &ObjectRef,
    ) -> PropertyResult<f64> {
        f64::from_value(&self.get_value(receiver, owner)?)
    }

    /// Write the value, widening the owner's shape when needed.
    pub fn set_value(
        &self,
        receiver: &ObjectRef,
        owner: &ObjectRef,
        value: Value,
        strict: bool,
    ) -> PropertyResult<()> {
        if self.is_user_accessor() {
            let key = strict.then_some(&self.key);
            return user_accessor::invoke_setter(owner, self.slot, receiver, value, key);
        }
        let stored = self.store_value(receiver, owner, value, strict);
        // Invalidate after storing: a relink in between must see the new value.
        if let Some(constants) = owner.global_constants() {
            constants.invalidate_switch_point(&self.key);
        }
        stored
    }

    fn store_value(
        &self,
        receiver: &ObjectRef,
        owner: &ObjectRef,
        value: Value,
        strict: bool,
    ) -> PropertyResult<()> {
        let ty = ValueType::of(&value);
        loop {
            let shape = owner.shape();
            let Some(current) = shape.find(&self.key) else {
                // Deleted concurrently; the write has nowhere to go.
                return Ok(());
            };
            if current.is_user_accessor() {
                let key = strict.then_some(&self.key);
                return user_accessor::invoke_setter(owner, current.slot, receiver, value, key);
            }

            let mut repr = current.current_type;
            if ty.is_wider_than(repr) && current.can_change_type() {
                let widened = shape.replace_property(&current, current.with_type(ty));
                if !owner.compare_and_set_shape(&shape, widened) {
                    continue;
                }
                repr = ty;
            }
            let value = if fits(&value, repr) {
                value
            } else {
                coerce(value, repr)
            };
            return owner
                .write_slot(current.storage_area(), current.slot, repr, value)
                .map_err(|_| {
                    PropertyError::internal(format!("store to '{}' refused", self.key))
                });
        }
    }

    /// Whether the owner holds a getter for this accessor property
    pub fn has_getter_function(&self, owner: &ObjectRef) -> bool {
        self.is_user_accessor()
            && owner
                .accessors(self.slot)
                .is_some_and(|pair| pair.getter().is_some())
    }

    /// Whether the owner holds a setter for this accessor property
    pub fn has_setter_function(&self, owner: &ObjectRef) -> bool {
        self.is_user_accessor()
            && owner
                .accessors(self.slot)
                .is_some_and(|pair| pair.setter().is_some())
    }
}

impl Clone for Property {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            flags: self.flags,
            slot: self.slot,
            kind: self.kind,
            current_type: self.current_type,
            builtin: Arc::clone(&self.builtin),
            getters: Arc::clone(&self.getters),
        }
    }
}

impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.flags == other.flags
            && self.slot == other.slot
            && self.kind == other.kind
            && self.current_type == other.current_type
    }
}

impl Eq for Property {}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("slot", &self.slot)
            .field("type", &self.current_type)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ObjectLayout;

    fn dual(key: &str, ty: ValueType) -> Property {
        Property::field(PropertyKey::from(key), PropertyFlags::DUAL_FIELDS, 0, ty)
    }

    #[test]
    fn test_with_type_keeps_identity_fields() {
        let p = dual("x", ValueType::Int);
        let q = p.with_type(ValueType::Double);
        assert_eq!(q.key(), p.key());
        assert_eq!(q.slot(), p.slot());
        assert_eq!(q.current_type(), ValueType::Double);
        assert_eq!(p.current_type(), ValueType::Int);
        assert_ne!(p, q);
    }

    #[test]
    fn test_getter_cache_reset_only_on_type_change() {
        let p = dual("x", ValueType::Int);
        let same = p.with_type(ValueType::Int);
        assert!(Arc::ptr_eq(&p.getters, &same.getters));
        let wider = p.with_type(ValueType::Object);
        assert!(!Arc::ptr_eq(&p.getters, &wider.getters));
        let flagged = p.with_flags(PropertyFlags::NOT_ENUMERABLE);
        assert!(Arc::ptr_eq(&p.getters, &flagged.getters));
    }

    #[test]
    fn test_can_change_type() {
        assert!(dual("x", ValueType::Int).can_change_type());
        assert!(!dual("x", ValueType::Object).can_change_type());

        let frozen = dual("x", ValueType::Int).with_flags(PropertyFlags::FROZEN);
        assert!(!frozen.can_change_type());

        let uninitialised_const = dual("x", ValueType::Undefined).with_flags(PropertyFlags::FROZEN);
        assert!(uninitialised_const.can_change_type());

        let object_only = Property::field(
            PropertyKey::from("x"),
            PropertyFlags::empty(),
            0,
            ValueType::Object,
        );
        assert!(!object_only.can_change_type());
    }

    #[test]
    fn test_builtin_slot_is_shared_between_clones() {
        let p = dual("apply", ValueType::Object);
        let q = p.with_flags(PropertyFlags::NOT_ENUMERABLE);
        let sp = SwitchPoint::new();
        p.set_builtin_switch_point(Some(sp.clone()));
        assert!(q.is_builtin());
        q.invalidate_builtin();
        assert!(sp.has_been_invalidated());
        assert!(!p.is_builtin());
    }

    #[test]
    fn test_setter_widens_through_new_shape() {
        let layout = ObjectLayout::new("JO", 2, true);
        let root = Shape::new_map(layout);
        let shape = root.add_property(dual("x", ValueType::Int));
        let property = shape.find(&PropertyKey::from("x")).unwrap();

        match property.setter_action(ValueType::Double, &shape) {
            SetAction::Transition { from, to, .. } => {
                assert!(Arc::ptr_eq(&from, &shape));
                assert_eq!(
                    to.find(&PropertyKey::from("x")).unwrap().current_type(),
                    ValueType::Double
                );
            }
            other => panic!("expected widening transition, got {:?}", other),
        }
        assert!(matches!(
            property.setter_action(ValueType::Int, &shape),
            SetAction::Store {
                repr: ValueType::Int,
                ..
            }
        ));
    }
}
