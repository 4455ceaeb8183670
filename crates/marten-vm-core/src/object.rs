//! JavaScript objects with hidden classes (shapes)
//!
//! An object is a shape pointer, a prototype pointer and per-instance storage.
//! Structural changes never mutate a shape: they derive a new one and swap the
//! object's pointer with a compare-and-swap, retrying if another thread won.

use crate::constants::GlobalConstants;
use crate::error::{PropertyError, PropertyResult, WideningRefused};
use crate::find::FindProperty;
use crate::key::PropertyKey;
use crate::linker::CallSiteFlags;
use crate::property::user_accessor::Accessors;
use crate::property::{Property, PropertyFlags};
use crate::shape::Shape;
use crate::storage::{ObjectStorage, StorageArea};
use crate::switchpoint::SwitchPoint;
use crate::types::ValueType;
use crate::value::{JsFunction, Value};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Shared handle to an object
pub type ObjectRef = Arc<JsObject>;

bitflags::bitflags! {
    /// Object kind flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjectFlags: u8 {
        /// Scope object (variables live here)
        const IS_SCOPE = 1 << 0;
        /// The global object
        const IS_GLOBAL = 1 << 1;
        /// Installed by the runtime
        const IS_BUILTIN = 1 << 2;
    }
}

/// A JavaScript object
pub struct JsObject {
    shape: RwLock<Arc<Shape>>,
    proto: RwLock<Option<ObjectRef>>,
    storage: RwLock<ObjectStorage>,
    flags: ObjectFlags,
    /// Constant cache, present on the global object only
    constants: Option<Arc<GlobalConstants>>,
}

fn reject(strict: bool, error: PropertyError) -> PropertyResult<()> {
    if strict {
        Err(error)
    } else {
        Ok(())
    }
}

fn same_object(a: Option<&ObjectRef>, b: Option<&ObjectRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl JsObject {
    fn build(
        shape: Arc<Shape>,
        proto: Option<ObjectRef>,
        flags: ObjectFlags,
        constants: Option<Arc<GlobalConstants>>,
    ) -> ObjectRef {
        let storage = ObjectStorage::new(shape.layout());
        Arc::new(Self {
            shape: RwLock::new(shape),
            proto: RwLock::new(proto),
            storage: RwLock::new(storage),
            flags,
            constants,
        })
    }

    /// Create an ordinary object
    pub fn new(shape: Arc<Shape>, proto: Option<ObjectRef>) -> ObjectRef {
        Self::build(shape, proto, ObjectFlags::empty(), None)
    }

    /// Create an object with kind flags
    pub fn with_flags(shape: Arc<Shape>, proto: Option<ObjectRef>, flags: ObjectFlags) -> ObjectRef {
        Self::build(shape, proto, flags, None)
    }

    /// Create a global object. The global is also a scope.
    pub fn new_global(
        shape: Arc<Shape>,
        proto: Option<ObjectRef>,
        constants: Option<Arc<GlobalConstants>>,
    ) -> ObjectRef {
        Self::build(
            shape,
            proto,
            ObjectFlags::IS_GLOBAL | ObjectFlags::IS_SCOPE,
            constants,
        )
    }

    /// Create a scope object whose parent scope is its prototype
    pub fn new_scope(shape: Arc<Shape>, parent: ObjectRef) -> ObjectRef {
        Self::build(shape, Some(parent), ObjectFlags::IS_SCOPE, None)
    }

    // ========================================================================
    // Shape and prototype
    // ========================================================================

    /// Current shape
    pub fn shape(&self) -> Arc<Shape> {
        self.shape.read().clone()
    }

    /// Check if the object currently has `shape`
    pub fn has_shape(&self, shape: &Arc<Shape>) -> bool {
        Arc::ptr_eq(&self.shape.read(), shape)
    }

    /// Install `new` if the shape is still `expected`
    pub fn compare_and_set_shape(&self, expected: &Arc<Shape>, new: Arc<Shape>) -> bool {
        let mut current = self.shape.write();
        if Arc::ptr_eq(&current, expected) {
            *current = new;
            true
        } else {
            false
        }
    }

    fn transform_shape(&self, f: impl Fn(&Shape) -> Arc<Shape>) {
        loop {
            let shape = self.shape();
            if self.compare_and_set_shape(&shape, f(&shape)) {
                return;
            }
        }
    }

    /// Prototype
    pub fn proto(&self) -> Option<ObjectRef> {
        self.proto.read().clone()
    }

    /// The object `depth` prototypes up (`0` is `self`)
    pub fn ancestor(self: &Arc<Self>, depth: usize) -> Option<ObjectRef> {
        let mut current = self.clone();
        for _ in 0..depth {
            current = current.proto()?;
        }
        Some(current)
    }

    /// Replace the prototype, telling dependent shapes
    pub fn set_proto(&self, proto: Option<ObjectRef>) {
        {
            let mut current = self.proto.write();
            if same_object(current.as_ref(), proto.as_ref()) {
                return;
            }
            *current = proto;
        }
        let shape = self.shape();
        shape.invalidate_all_proto_switch_points();
        if let Some(listeners) = shape.listeners() {
            listeners.proto_changed();
        }
        self.transform_shape(Shape::change_proto);
    }

    /// `[[SetPrototypeOf]]` with extensibility and cycle checks
    pub fn set_prototype_of(self: &Arc<Self>, proto: Option<ObjectRef>) -> PropertyResult<()> {
        if !self.is_extensible() {
            if same_object(self.proto().as_ref(), proto.as_ref()) {
                return Ok(());
            }
            return Err(PropertyError::type_error(
                "Cannot set prototype of a non-extensible object",
            ));
        }
        let mut cursor = proto.clone();
        while let Some(object) = cursor {
            if Arc::ptr_eq(&object, self) {
                return Err(PropertyError::type_error("Cyclic __proto__ value"));
            }
            cursor = object.proto();
        }
        self.set_proto(proto);
        Ok(())
    }

    /// Kind flags
    pub fn flags(&self) -> ObjectFlags {
        self.flags
    }

    /// Check if this is a scope object
    pub fn is_scope(&self) -> bool {
        self.flags.contains(ObjectFlags::IS_SCOPE)
    }

    /// Check if this is the global object
    pub fn is_global(&self) -> bool {
        self.flags.contains(ObjectFlags::IS_GLOBAL)
    }

    /// Check if installed by the runtime
    pub fn is_builtin(&self) -> bool {
        self.flags.contains(ObjectFlags::IS_BUILTIN)
    }

    /// Check if properties may be added
    pub fn is_extensible(&self) -> bool {
        self.shape.read().is_extensible()
    }

    /// Check if sealed
    pub fn is_sealed(&self) -> bool {
        self.shape.read().is_sealed()
    }

    /// Check if frozen
    pub fn is_frozen(&self) -> bool {
        self.shape.read().is_frozen()
    }

    /// Constant cache of the global object
    pub fn global_constants(&self) -> Option<&Arc<GlobalConstants>> {
        self.constants.as_ref()
    }

    /// The global object at the end of this object's prototype chain
    pub fn global_object(self: &Arc<Self>) -> Option<ObjectRef> {
        let mut current = Some(self.clone());
        while let Some(object) = current {
            if object.is_global() {
                return Some(object);
            }
            current = object.proto();
        }
        None
    }

    // ========================================================================
    // Storage
    // ========================================================================

    /// Read a slot
    pub fn read_slot(&self, area: StorageArea, slot: usize) -> Value {
        self.storage.read().read(area, slot)
    }

    pub(crate) fn write_slot(
        &self,
        area: StorageArea,
        slot: usize,
        repr: ValueType,
        value: Value,
    ) -> Result<(), WideningRefused> {
        self.storage.write().write(area, slot, repr, value)
    }

    pub(crate) fn accessors(&self, slot: usize) -> Option<Arc<Accessors>> {
        self.storage.read().accessors(slot)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Find `key` on this object, or with `deep` along the prototype chain
    pub fn find_property(self: &Arc<Self>, key: &PropertyKey, deep: bool) -> Option<FindProperty> {
        let receiver_shape = self.shape();
        if let Some(property) = receiver_shape.find(key) {
            return Some(FindProperty::new(
                self.clone(),
                self.clone(),
                property,
                0,
                receiver_shape,
            ));
        }
        if !deep {
            return None;
        }
        let mut depth = 0;
        let mut current = self.proto();
        while let Some(object) = current {
            depth += 1;
            if let Some(property) = object.shape().find(key) {
                return Some(FindProperty::new(
                    self.clone(),
                    object,
                    property,
                    depth,
                    receiver_shape,
                ));
            }
            current = object.proto();
        }
        None
    }

    /// Check if `key` is present on this object or its prototypes
    pub fn has_property(self: &Arc<Self>, key: &PropertyKey) -> bool {
        self.find_property(key, true).is_some()
    }

    /// Own keys in insertion order
    pub fn own_keys(&self) -> Vec<PropertyKey> {
        self.shape.read().keys()
    }

    /// Proto switch point protecting an inherited lookup of `key` that ends at
    /// `owner` (or at the end of the chain with `None`). Registers this object's
    /// shape as a listener on every prototype in between.
    pub fn get_proto_switch_point(
        self: &Arc<Self>,
        key: &PropertyKey,
        owner: Option<&ObjectRef>,
    ) -> Option<SwitchPoint> {
        if owner.is_some_and(|owner| Arc::ptr_eq(owner, self)) || self.proto().is_none() {
            return None;
        }
        let switch_point = self.shape().switch_point(key);
        let mut object = self.clone();
        while !owner.is_some_and(|owner| Arc::ptr_eq(owner, &object)) {
            let Some(parent) = object.proto() else {
                break;
            };
            parent.shape().add_listener(key, &object.shape());
            object = parent;
        }
        Some(switch_point)
    }

    // ========================================================================
    // Get / set
    // ========================================================================

    /// Read `key`, walking the prototype chain
    pub fn get(self: &Arc<Self>, key: &PropertyKey) -> PropertyResult<Value> {
        match self.find_property(key, true) {
            Some(find) if find.property().needs_declaration() => {
                Err(PropertyError::UndeclaredBinding(key.clone()))
            }
            Some(find) => find.get_object_value(),
            None => Ok(Value::undefined()),
        }
    }

    /// Assign `key`
    pub fn set(self: &Arc<Self>, key: &PropertyKey, value: Value, strict: bool) -> PropertyResult<()> {
        let flags = if strict {
            CallSiteFlags::STRICT
        } else {
            CallSiteFlags::empty()
        };
        self.set_with_flags(key, value, flags)
    }

    /// Assign `key` with full call-site semantics. This is the uncached path every
    /// linked setter falls back to.
    pub fn set_with_flags(
        self: &Arc<Self>,
        key: &PropertyKey,
        value: Value,
        flags: CallSiteFlags,
    ) -> PropertyResult<()> {
        let strict = flags.contains(CallSiteFlags::STRICT);
        let scope = flags.contains(CallSiteFlags::SCOPE);

        let mut find = self.find_property(key, true);
        if let Some(found) = &find {
            let property = found.property();
            if found.is_inherited()
                && !property.is_user_accessor()
                && !(scope && found.owner().is_scope())
            {
                if !property.is_writable() && self.is_extensible() {
                    return reject(strict, PropertyError::NotWritable(key.clone()));
                }
                property.invalidate_builtin();
                find = None;
            }
        }

        let Some(found) = find else {
            return self.add_missing(key, value, flags);
        };
        let property = found.property();
        if property.needs_declaration() {
            if !flags.contains(CallSiteFlags::DECLARE) {
                return Err(PropertyError::UndeclaredBinding(key.clone()));
            }
            return found.owner().declare_and_set(key, value);
        }
        if !property.is_writable() {
            if scope && property.is_lexical_binding() {
                return Err(PropertyError::type_error(format!(
                    "Assignment to constant variable '{}'",
                    key
                )));
            }
            return reject(strict, PropertyError::NotWritable(key.clone()));
        }
        property.invalidate_builtin();
        found.set_value(value, strict)
    }

    fn add_missing(
        self: &Arc<Self>,
        key: &PropertyKey,
        value: Value,
        flags: CallSiteFlags,
    ) -> PropertyResult<()> {
        let strict = flags.contains(CallSiteFlags::STRICT);
        if strict && flags.contains(CallSiteFlags::SCOPE) {
            return Err(PropertyError::StrictAssignmentToUndeclared(key.clone()));
        }
        let target = if self.is_scope() {
            self.global_object()
                .ok_or_else(|| PropertyError::internal("scope object without a global object"))?
        } else {
            self.clone()
        };
        if !target.is_extensible() {
            return reject(strict, PropertyError::NonExtensibleWrite(key.clone()));
        }
        target.add_spill_property(key, PropertyFlags::empty(), Some(value))?;
        Ok(())
    }

    // ========================================================================
    // Adding, modifying and deleting properties
    // ========================================================================

    /// Data property for `key` in the next free field, else spill, slot of `shape`
    pub(crate) fn new_data_property(
        shape: &Shape,
        key: &PropertyKey,
        flags: PropertyFlags,
        ty: Option<ValueType>,
    ) -> Property {
        let (flags, ty) = if shape.layout().uses_dual_fields() {
            (
                flags | PropertyFlags::DUAL_FIELDS,
                ty.unwrap_or(ValueType::Undefined),
            )
        } else {
            (flags, ValueType::Object)
        };
        match shape.free_field_slot() {
            Some(slot) => Property::field(key.clone(), flags, slot, ty),
            None => Property::spill(key.clone(), flags, shape.free_spill_slot(), ty),
        }
    }

    /// Add the property `make` builds against the current shape. `None` if `key`
    /// is already present.
    fn try_add_own(
        &self,
        key: &PropertyKey,
        make: impl Fn(&Shape) -> Property,
    ) -> Option<Arc<Property>> {
        loop {
            let shape = self.shape();
            if shape.find(key).is_some() {
                return None;
            }
            let updated = shape.add_property(make(&shape));
            if self.compare_and_set_shape(&shape, updated.clone()) {
                return updated.find(key);
            }
        }
    }

    /// Add a pre-slotted property
    pub fn add_own_property(&self, property: Property) -> PropertyResult<Arc<Property>> {
        let key = property.key().clone();
        self.try_add_own(&key, |_| property.clone())
            .ok_or_else(|| PropertyError::type_error(format!("Cannot redefine property: {}", key)))
    }

    /// Add `key` in a free slot, storing `value` if given. When `key` already
    /// exists the value is stored into it instead.
    pub fn add_spill_property(
        self: &Arc<Self>,
        key: &PropertyKey,
        flags: PropertyFlags,
        value: Option<Value>,
    ) -> PropertyResult<Arc<Property>> {
        let ty = value.as_ref().map(ValueType::of);
        loop {
            if let Some(existing) = self.shape().find(key) {
                if let Some(value) = value {
                    existing.set_value(self, self, value, false)?;
                }
                return Ok(existing);
            }
            let Some(added) = self.try_add_own(key, |shape| {
                Self::new_data_property(shape, key, flags, ty)
            }) else {
                continue;
            };
            tracing::trace!(key = %key, slot = added.slot(), kind = ?added.kind(), "added property");
            if let Some(value) = value {
                let repr = if added.has_dual_fields() {
                    added.current_type()
                } else {
                    ValueType::Object
                };
                self.write_slot(added.storage_area(), added.slot(), repr, value)
                    .map_err(|_| {
                        PropertyError::internal(format!("initial store to '{}' refused", key))
                    })?;
            }
            return Ok(added);
        }
    }

    /// Define (or redefine) a data property with exactly `flags`
    pub fn define_own_property(
        self: &Arc<Self>,
        key: &PropertyKey,
        value: Value,
        flags: PropertyFlags,
    ) -> PropertyResult<()> {
        if let Some(existing) = self.shape().find(key) {
            let wanted = flags | (existing.flags() & PropertyFlags::DUAL_FIELDS);
            if !existing.is_configurable() {
                if !existing.is_user_accessor() && existing.is_writable() && existing.flags() == wanted
                {
                    return existing.set_value(self, self, value, false);
                }
                return Err(PropertyError::NotConfigurable(key.clone()));
            }
            if existing.is_user_accessor() {
                self.delete_own_property(&existing);
            } else {
                let updated = self.modify_own_property(&existing, existing.set_flags(wanted))?;
                return updated.set_value(self, self, value, false);
            }
        }
        if !self.is_extensible() {
            return Err(PropertyError::NonExtensibleWrite(key.clone()));
        }
        self.add_spill_property(key, flags, Some(value))?;
        Ok(())
    }

    /// Define (or redefine) an accessor property
    pub fn define_accessor(
        &self,
        key: &PropertyKey,
        getter: Option<JsFunction>,
        setter: Option<JsFunction>,
        flags: PropertyFlags,
    ) -> PropertyResult<()> {
        let property = match self.shape().find(key) {
            Some(existing) if !existing.is_configurable() => {
                return Err(PropertyError::NotConfigurable(key.clone()));
            }
            Some(existing) if existing.is_user_accessor() => {
                if existing.flags() == flags {
                    existing
                } else {
                    self.modify_own_property(&existing, existing.set_flags(flags))?
                }
            }
            Some(_) => loop {
                let shape = self.shape();
                let current = shape.find(key).ok_or_else(|| {
                    PropertyError::internal(format!("property '{}' vanished", key))
                })?;
                let accessor = shape.new_user_accessors(key.clone(), flags);
                let updated = shape.replace_property(&current, accessor);
                // Hold storage until the old slot is cleared; it is free in `updated`.
                let mut storage = self.storage.write();
                if self.compare_and_set_shape(&shape, updated.clone()) {
                    storage.erase(current.storage_area(), current.slot());
                    break updated.find(key).ok_or_else(|| {
                        PropertyError::internal(format!("property '{}' vanished", key))
                    })?;
                }
            },
            None => {
                if !self.is_extensible() {
                    return Err(PropertyError::NonExtensibleWrite(key.clone()));
                }
                self.try_add_own(key, |shape| shape.new_user_accessors(key.clone(), flags))
                    .ok_or_else(|| {
                        PropertyError::type_error(format!("Cannot redefine property: {}", key))
                    })?
            }
        };
        self.storage
            .write()
            .set_accessors(property.slot(), Some(Arc::new(Accessors::new(getter, setter))));
        if let Some(constants) = &self.constants {
            constants.delete(key);
        }
        Ok(())
    }

    /// Replace own property `old` with `new` (same key)
    pub fn modify_own_property(&self, old: &Property, new: Property) -> PropertyResult<Arc<Property>> {
        let key = old.key();
        loop {
            let shape = self.shape();
            let current = shape
                .find(key)
                .ok_or_else(|| PropertyError::internal(format!("property '{}' vanished", key)))?;
            let updated = shape.replace_property(&current, new.clone());
            if self.compare_and_set_shape(&shape, updated.clone()) {
                return updated
                    .find(key)
                    .ok_or_else(|| PropertyError::internal(format!("property '{}' vanished", key)));
            }
        }
    }

    /// Remove own property `property`, clearing its slot. Returns `false` if it was
    /// not present.
    pub fn delete_own_property(&self, property: &Property) -> bool {
        let key = property.key();
        loop {
            let shape = self.shape();
            let Some(current) = shape.find(key) else {
                return false;
            };
            let Some(updated) = shape.remove_property(&current) else {
                return false;
            };
            let mut storage = self.storage.write();
            if self.compare_and_set_shape(&shape, updated) {
                storage.erase(current.storage_area(), current.slot());
                drop(storage);
                if let Some(constants) = &self.constants {
                    constants.delete(key);
                }
                return true;
            }
        }
    }

    /// `delete obj[key]`
    pub fn delete(&self, key: &PropertyKey, strict: bool) -> PropertyResult<bool> {
        let Some(property) = self.shape().find(key) else {
            return Ok(true);
        };
        if !property.is_configurable() {
            return if strict {
                Err(PropertyError::NotConfigurable(key.clone()))
            } else {
                Ok(false)
            };
        }
        self.delete_own_property(&property);
        Ok(true)
    }

    /// Create a `let`/`const` binding that throws until declared
    pub fn declare_lexical(&self, key: &PropertyKey, is_const: bool) -> PropertyResult<Arc<Property>> {
        let flags = if is_const {
            PropertyFlags::CONST_DECLARATION
        } else {
            PropertyFlags::LET_DECLARATION
        };
        self.try_add_own(key, |shape| Self::new_data_property(shape, key, flags, None))
            .ok_or_else(|| {
                PropertyError::type_error(format!("Identifier '{}' has already been declared", key))
            })
    }

    /// Clear `NEEDS_DECLARATION` on own binding `key` and store `value`
    pub fn declare_and_set(self: &Arc<Self>, key: &PropertyKey, value: Value) -> PropertyResult<()> {
        loop {
            let shape = self.shape();
            let property = shape
                .find(key)
                .ok_or_else(|| PropertyError::internal(format!("no binding '{}' to declare", key)))?;
            if !property.needs_declaration() {
                return property.set_value(self, self, value, false);
            }
            let updated =
                shape.replace_property(&property, property.without_flags(PropertyFlags::NEEDS_DECLARATION));
            if self.compare_and_set_shape(&shape, updated.clone()) {
                let declared = updated.find(key).ok_or_else(|| {
                    PropertyError::internal(format!("binding '{}' vanished", key))
                })?;
                return declared.set_value(self, self, value, false);
            }
        }
    }

    /// Disallow new properties
    pub fn prevent_extensions(&self) {
        self.transform_shape(Shape::prevent_extensions);
    }

    /// `Object.seal`
    pub fn seal(&self) {
        self.transform_shape(Shape::seal);
    }

    /// `Object.freeze`
    pub fn freeze(&self) {
        self.transform_shape(Shape::freeze);
    }
}

impl fmt::Debug for JsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsObject")
            .field("shape", &self.shape().id())
            .field("keys", &self.own_keys())
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ObjectLayout;

    fn root() -> Arc<Shape> {
        Shape::new_map(ObjectLayout::new("JO2", 2, true))
    }

    fn key(name: &str) -> PropertyKey {
        PropertyKey::from(name)
    }

    #[test]
    fn test_object_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<JsObject>();
    }

    #[test]
    fn test_set_and_get_widen_in_place() {
        let obj = JsObject::new(root(), None);
        obj.set(&key("x"), Value::int32(1), false).unwrap();
        let x = obj.shape().find(&key("x")).unwrap();
        assert_eq!(x.current_type(), ValueType::Int);

        obj.set(&key("x"), Value::number(3.5), false).unwrap();
        assert_eq!(obj.get(&key("x")).unwrap(), Value::number(3.5));
        assert_eq!(obj.shape().find(&key("x")).unwrap().current_type(), ValueType::Double);

        obj.set(&key("x"), Value::string("s"), false).unwrap();
        assert_eq!(obj.get(&key("x")).unwrap(), Value::string("s"));
        assert_eq!(obj.shape().find(&key("x")).unwrap().current_type(), ValueType::Object);

        obj.set(&key("x"), Value::int32(2), false).unwrap();
        assert_eq!(obj.get(&key("x")).unwrap(), Value::int32(2));
        assert_eq!(obj.shape().find(&key("x")).unwrap().current_type(), ValueType::Object);
    }

    #[test]
    fn test_properties_overflow_into_spill() {
        let obj = JsObject::new(root(), None);
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            obj.set(&key(name), Value::int32(i as i32), false).unwrap();
        }
        let shape = obj.shape();
        assert!(!shape.find(&key("b")).unwrap().is_spill());
        assert!(shape.find(&key("c")).unwrap().is_spill());
        assert_eq!(obj.get(&key("d")).unwrap(), Value::int32(3));
        assert_eq!(obj.own_keys(), vec![key("a"), key("b"), key("c"), key("d")]);
    }

    #[test]
    fn test_inherited_write_shadows_on_receiver() {
        let proto = JsObject::new(root(), None);
        proto.set(&key("x"), Value::int32(1), false).unwrap();
        let obj = JsObject::new(root(), Some(proto.clone()));
        obj.set(&key("x"), Value::int32(2), false).unwrap();
        assert_eq!(obj.get(&key("x")).unwrap(), Value::int32(2));
        assert_eq!(proto.get(&key("x")).unwrap(), Value::int32(1));
    }

    #[test]
    fn test_inherited_read_only_blocks_write() {
        let proto = JsObject::new(root(), None);
        proto
            .define_own_property(&key("x"), Value::int32(1), PropertyFlags::NOT_WRITABLE)
            .unwrap();
        let obj = JsObject::new(root(), Some(proto));
        obj.set(&key("x"), Value::int32(2), false).unwrap();
        assert_eq!(obj.get(&key("x")).unwrap(), Value::int32(1));
        assert!(matches!(
            obj.set(&key("x"), Value::int32(2), true),
            Err(PropertyError::NotWritable(_))
        ));
    }

    #[test]
    fn test_accessor_binds_receiver() {
        let proto = JsObject::new(root(), None);
        let getter = JsFunction::new("get", |this, _| {
            let this = this.as_object().ok_or_else(|| PropertyError::type_error("no this"))?;
            this.get(&PropertyKey::from("v"))
        });
        proto
            .define_accessor(&key("p"), Some(getter), None, PropertyFlags::empty())
            .unwrap();
        let obj = JsObject::new(root(), Some(proto.clone()));
        obj.set(&key("v"), Value::int32(9), false).unwrap();
        assert_eq!(obj.get(&key("p")).unwrap(), Value::int32(9));
        assert!(proto.get(&key("p")).unwrap().is_undefined());

        assert!(obj.set(&key("p"), Value::int32(1), false).is_ok());
        assert!(matches!(
            obj.set(&key("p"), Value::int32(1), true),
            Err(PropertyError::NoSetter(_))
        ));
    }

    #[test]
    fn test_delete_frees_slot() {
        let obj = JsObject::new(root(), None);
        obj.set(&key("a"), Value::int32(1), false).unwrap();
        obj.set(&key("b"), Value::int32(2), false).unwrap();
        assert!(obj.delete(&key("a"), false).unwrap());
        assert!(obj.get(&key("a")).unwrap().is_undefined());
        obj.set(&key("c"), Value::int32(3), false).unwrap();
        assert_eq!(obj.shape().find(&key("c")).unwrap().slot(), 0);
        assert!(!obj.shape().find(&key("c")).unwrap().is_spill());
        assert_eq!(obj.get(&key("c")).unwrap(), Value::int32(3));
    }

    #[test]
    fn test_non_configurable_delete() {
        let obj = JsObject::new(root(), None);
        obj.define_own_property(&key("k"), Value::int32(1), PropertyFlags::NOT_CONFIGURABLE)
            .unwrap();
        assert!(!obj.delete(&key("k"), false).unwrap());
        assert!(matches!(
            obj.delete(&key("k"), true),
            Err(PropertyError::NotConfigurable(_))
        ));
    }

    #[test]
    fn test_non_extensible() {
        let obj = JsObject::new(root(), None);
        obj.set(&key("a"), Value::int32(1), false).unwrap();
        obj.prevent_extensions();
        obj.set(&key("b"), Value::int32(1), false).unwrap();
        assert!(!obj.has_property(&key("b")));
        assert!(matches!(
            obj.set(&key("b"), Value::int32(1), true),
            Err(PropertyError::NonExtensibleWrite(_))
        ));
        obj.set(&key("a"), Value::int32(5), true).unwrap();
        assert_eq!(obj.get(&key("a")).unwrap(), Value::int32(5));
    }

    #[test]
    fn test_freeze() {
        let obj = JsObject::new(root(), None);
        obj.set(&key("a"), Value::int32(1), false).unwrap();
        obj.freeze();
        assert!(obj.is_frozen());
        obj.set(&key("a"), Value::int32(2), false).unwrap();
        assert_eq!(obj.get(&key("a")).unwrap(), Value::int32(1));
    }

    #[test]
    fn test_lexical_declaration() {
        let global = JsObject::new_global(root(), None, None);
        global.declare_lexical(&key("c"), true).unwrap();
        assert!(matches!(
            global.get(&key("c")),
            Err(PropertyError::UndeclaredBinding(_))
        ));
        assert!(matches!(
            global.set(&key("c"), Value::int32(1), false),
            Err(PropertyError::UndeclaredBinding(_))
        ));

        let declare = CallSiteFlags::SCOPE | CallSiteFlags::DECLARE;
        global.set_with_flags(&key("c"), Value::int32(1), declare).unwrap();
        assert_eq!(global.get(&key("c")).unwrap(), Value::int32(1));

        let err = global
            .set_with_flags(&key("c"), Value::int32(2), CallSiteFlags::SCOPE)
            .unwrap_err();
        assert!(err.is_type_error());
        assert!(global.declare_lexical(&key("c"), false).is_err());
    }

    #[test]
    fn test_scope_writes_land_on_global() {
        let global = JsObject::new_global(root(), None, None);
        let scope = JsObject::new_scope(root(), global.clone());
        scope
            .set_with_flags(&key("g"), Value::int32(1), CallSiteFlags::SCOPE)
            .unwrap();
        assert!(scope.find_property(&key("g"), false).is_none());
        assert_eq!(global.get(&key("g")).unwrap(), Value::int32(1));

        let strict = CallSiteFlags::SCOPE | CallSiteFlags::STRICT;
        assert!(matches!(
            scope.set_with_flags(&key("h"), Value::int32(1), strict),
            Err(PropertyError::StrictAssignmentToUndeclared(_))
        ));
    }

    #[test]
    fn test_set_proto_invalidates_dependents() {
        let a = JsObject::new(root(), None);
        let b = JsObject::new(root(), None);
        let obj = JsObject::new(root(), Some(a));
        let before = obj.shape();
        obj.set_proto(Some(b));
        assert!(!obj.has_shape(&before));

        let child = JsObject::new(root(), Some(obj.clone()));
        let child_sp = child.get_proto_switch_point(&key("x"), None).unwrap();
        obj.set(&key("x"), Value::int32(1), false).unwrap();
        assert!(child_sp.has_been_invalidated());
    }

    #[test]
    fn test_set_prototype_of_rejects_cycles() {
        let a = JsObject::new(root(), None);
        let b = JsObject::new(root(), Some(a.clone()));
        assert!(a.set_prototype_of(Some(b.clone())).is_err());
        a.prevent_extensions();
        assert!(a.set_prototype_of(None).is_ok());
        assert!(a.set_prototype_of(Some(JsObject::new(root(), None))).is_err());
    }
}
