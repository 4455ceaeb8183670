//! Linking property accesses to guarded getters and setters.
//!
//! A call site asks the linker for a `GuardedInvocation`: the getter or setter to
//! run, a guard the receiver must pass (shape and/or identity), and switch points
//! that must all still be valid. While both hold the invocation may be reused;
//! otherwise the site relinks.

use crate::constants::GlobalConstants;
use crate::error::{PropertyError, PropertyResult};
use crate::find::FindProperty;
use crate::key::PropertyKey;
use crate::object::{JsObject, ObjectRef};
use crate::property::{Getter, Setter};
use crate::set_method::SetMethodCreator;
use crate::shape::Shape;
use crate::switchpoint::SwitchPoint;
use crate::types::ValueType;
use smallvec::SmallVec;
use std::sync::{Arc, Weak};

bitflags::bitflags! {
    /// Properties of a call site
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CallSiteFlags: u8 {
        /// Strict-mode code
        const STRICT = 1 << 0;
        /// Variable access through the scope chain
        const SCOPE = 1 << 1;
        /// Scope access whose receiver is fixed for the site
        const FAST_SCOPE = 1 << 2;
        /// Initialising write of a `let`/`const` declaration
        const DECLARE = 1 << 3;
    }
}

/// What a call site accesses and how
#[derive(Debug, Clone)]
pub struct CallSiteDescriptor {
    name: PropertyKey,
    value_type: ValueType,
    flags: CallSiteFlags,
    optimistic: bool,
}

impl CallSiteDescriptor {
    /// Site accessing `name` with representation `value_type`
    pub fn new(name: impl Into<PropertyKey>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            flags: CallSiteFlags::empty(),
            optimistic: false,
        }
    }

    /// Same site with `flags`
    pub fn with_flags(mut self, flags: CallSiteFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Same site compiled optimistically for its value type
    pub fn optimistic(mut self) -> Self {
        self.optimistic = true;
        self
    }

    /// Property name
    pub fn name(&self) -> &PropertyKey {
        &self.name
    }

    /// Representation the site works in
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Site flags
    pub fn flags(&self) -> CallSiteFlags {
        self.flags
    }

    /// Check if strict
    pub fn is_strict(&self) -> bool {
        self.flags.contains(CallSiteFlags::STRICT)
    }

    /// Check if a scope access (fast or not)
    pub fn is_scope(&self) -> bool {
        self.flags
            .intersects(CallSiteFlags::SCOPE | CallSiteFlags::FAST_SCOPE)
    }

    /// Check if a fast scope access
    pub fn is_fast_scope(&self) -> bool {
        self.flags.contains(CallSiteFlags::FAST_SCOPE)
    }

    /// Check if a declaring write
    pub fn is_declaration(&self) -> bool {
        self.flags.contains(CallSiteFlags::DECLARE)
    }

    /// Check if optimistic
    pub fn is_optimistic(&self) -> bool {
        self.optimistic
    }
}

/// Receiver check of a linked invocation
#[derive(Debug, Clone)]
pub enum Guard {
    /// Receiver has exactly this shape
    Shape(Arc<Shape>),
    /// Receiver has this shape and this prototype (`None`: no prototype)
    ShapeAndProto(Arc<Shape>, Option<Weak<JsObject>>),
    /// Receiver is exactly this object
    Identity(Weak<JsObject>),
    /// Receiver is this object and has this shape
    IdentityAndShape(Weak<JsObject>, Arc<Shape>),
}

impl Guard {
    /// Identity guard on `object`
    pub fn identity(object: &ObjectRef) -> Self {
        Guard::Identity(Arc::downgrade(object))
    }

    /// Shape guard that also pins the receiver's current prototype
    pub fn shape_and_proto(receiver: &ObjectRef, shape: Arc<Shape>) -> Self {
        Guard::ShapeAndProto(shape, receiver.proto().as_ref().map(Arc::downgrade))
    }

    /// Check `receiver`
    pub fn test(&self, receiver: &ObjectRef) -> bool {
        match self {
            Guard::Shape(shape) => receiver.has_shape(shape),
            Guard::ShapeAndProto(shape, proto) => {
                receiver.has_shape(shape)
                    && match (proto, receiver.proto()) {
                        (Some(expected), Some(actual)) => {
                            std::ptr::eq(expected.as_ptr(), Arc::as_ptr(&actual))
                        }
                        (None, None) => true,
                        _ => false,
                    }
            }
            Guard::Identity(object) => std::ptr::eq(object.as_ptr(), Arc::as_ptr(receiver)),
            Guard::IdentityAndShape(object, shape) => {
                std::ptr::eq(object.as_ptr(), Arc::as_ptr(receiver)) && receiver.has_shape(shape)
            }
        }
    }
}

/// A linked invocation with its guard and switch points
#[derive(Debug, Clone)]
pub struct GuardedInvocation<T> {
    invocation: T,
    guard: Option<Guard>,
    switch_points: SmallVec<[SwitchPoint; 2]>,
}

/// Linked property read
pub type GuardedGetter = GuardedInvocation<Getter>;

/// Linked property write
pub type GuardedSetter = GuardedInvocation<Setter>;

impl<T> GuardedInvocation<T> {
    /// Invocation with an optional guard and no switch points
    pub fn new(invocation: T, guard: Option<Guard>) -> Self {
        Self {
            invocation,
            guard,
            switch_points: SmallVec::new(),
        }
    }

    /// Add a switch point, if any
    pub fn with_switch_point(mut self, switch_point: Option<SwitchPoint>) -> Self {
        self.switch_points.extend(switch_point);
        self
    }

    /// Same guard and switch points around another invocation
    pub fn with_invocation<U>(&self, invocation: U) -> GuardedInvocation<U> {
        GuardedInvocation {
            invocation,
            guard: self.guard.clone(),
            switch_points: self.switch_points.clone(),
        }
    }

    /// The invocation
    pub fn invocation(&self) -> &T {
        &self.invocation
    }

    /// The guard
    pub fn guard(&self) -> Option<&Guard> {
        self.guard.as_ref()
    }

    /// Attached switch points
    pub fn switch_points(&self) -> &[SwitchPoint] {
        &self.switch_points
    }

    /// Check if any switch point was invalidated
    pub fn has_been_invalidated(&self) -> bool {
        self.switch_points.iter().any(SwitchPoint::has_been_invalidated)
    }

    /// Check the guard against `receiver`
    pub fn test(&self, receiver: &ObjectRef) -> bool {
        self.guard.as_ref().is_none_or(|guard| guard.test(receiver))
    }

    /// Check if the invocation may run for `receiver`
    pub fn is_valid_for(&self, receiver: &ObjectRef) -> bool {
        !self.has_been_invalidated() && self.test(receiver)
    }
}

/// First valid builtin switch point on a prototype property named `key`
fn find_builtin_switch_point(receiver: &ObjectRef, key: &PropertyKey) -> Option<SwitchPoint> {
    let mut current = receiver.proto();
    while let Some(object) = current {
        if let Some(switch_point) = object
            .shape()
            .find(key)
            .and_then(|property| property.builtin_switch_point())
            .filter(SwitchPoint::is_valid)
        {
            return Some(switch_point);
        }
        current = object.proto();
    }
    None
}

/// Produces guarded getters and setters for call sites
#[derive(Debug, Clone, Default)]
pub struct Linker {
    constants: Option<Arc<GlobalConstants>>,
}

impl Linker {
    /// Linker consulting `constants` for global bindings
    pub fn new(constants: Option<Arc<GlobalConstants>>) -> Self {
        Self { constants }
    }

    /// The constant cache, if enabled
    pub fn constants(&self) -> Option<&Arc<GlobalConstants>> {
        self.constants.as_ref()
    }

    /// Link a property read of `desc.name()` on `receiver`
    pub fn find_get_method(
        &self,
        receiver: &ObjectRef,
        desc: &CallSiteDescriptor,
    ) -> PropertyResult<GuardedGetter> {
        let key = desc.name();
        let ty = desc.value_type();
        let shape = receiver.shape();

        let Some(find) = receiver.find_property(key, true) else {
            let getter = if desc.is_scope() {
                Getter::throwing(key.clone(), PropertyError::NotDefined(key.clone()), ty)
            } else {
                Getter::undefined(key.clone(), ty)
            };
            tracing::trace!(key = %key, "linked missing property getter");
            let guard = Guard::shape_and_proto(receiver, shape);
            return Ok(GuardedInvocation::new(getter, Some(guard))
                .with_switch_point(receiver.get_proto_switch_point(key, None)));
        };

        let guard = Some(Self::guard_for(receiver, &find));
        let proto_switch_point = receiver.get_proto_switch_point(key, Some(find.owner()));

        if find.property().needs_declaration() {
            let getter = Getter::throwing(
                key.clone(),
                PropertyError::UndeclaredBinding(key.clone()),
                ty,
            );
            return Ok(GuardedInvocation::new(getter, guard).with_switch_point(proto_switch_point));
        }

        if let Some(constants) = &self.constants {
            if let Some(invocation) = constants.try_link_getter(&find, receiver, desc) {
                return Ok(invocation);
            }
        }

        tracing::trace!(
            key = %key,
            depth = find.proto_chain_length(),
            ty = %ty,
            "linked getter"
        );
        Ok(GuardedInvocation::new(find.get_getter(ty), guard).with_switch_point(proto_switch_point))
    }

    fn guard_for(receiver: &ObjectRef, find: &FindProperty) -> Guard {
        let shape = find.receiver_shape().clone();
        if find.property().is_bound() && receiver.is_scope() {
            Guard::IdentityAndShape(Arc::downgrade(receiver), shape)
        } else if find.is_self() {
            Guard::Shape(shape)
        } else {
            Guard::shape_and_proto(receiver, shape)
        }
    }

    /// Link a property write of `desc.name()` on `receiver`.
    ///
    /// Fails at link time for strict-mode writes that can never succeed.
    pub fn find_set_method(
        &self,
        receiver: &ObjectRef,
        desc: &CallSiteDescriptor,
    ) -> PropertyResult<GuardedSetter> {
        let key = desc.name();
        let scope = desc.is_scope();

        let mut find = receiver.find_property(key, true);
        if let Some(found) = &find {
            if found.is_inherited()
                && !found.property().is_user_accessor()
                && !(scope && found.owner().is_scope())
            {
                if receiver.is_extensible() && !found.property().is_writable() {
                    return self.empty_setter(receiver, desc, PropertyError::NotWritable(key.clone()));
                }
                find = None;
            }
        }

        match &find {
            Some(found) => {
                let property = found.property();
                if property.needs_declaration() && !desc.is_declaration() {
                    return Err(PropertyError::UndeclaredBinding(key.clone()));
                }
                if !property.is_writable() && !property.needs_declaration() {
                    if scope && property.is_lexical_binding() {
                        return Err(PropertyError::type_error(format!(
                            "Assignment to constant variable '{}'",
                            key
                        )));
                    }
                    return self.empty_setter(receiver, desc, PropertyError::NotWritable(key.clone()));
                }
            }
            None if !receiver.is_extensible() => {
                return self.empty_setter(
                    receiver,
                    desc,
                    PropertyError::NonExtensibleWrite(key.clone()),
                );
            }
            None => {}
        }

        let builtin = find_builtin_switch_point(receiver, key);
        let invocation =
            SetMethodCreator::new(receiver, find.clone(), desc, builtin).create_guarded_invocation()?;

        if let Some(constants) = &self.constants {
            if let Some(wrapped) =
                constants.try_link_setter(find.as_ref(), receiver, &invocation, desc)
            {
                return Ok(wrapped);
            }
        }
        Ok(invocation)
    }

    /// Setter that ignores the write, or the error itself for strict sites
    fn empty_setter(
        &self,
        receiver: &ObjectRef,
        desc: &CallSiteDescriptor,
        error: PropertyError,
    ) -> PropertyResult<GuardedSetter> {
        if desc.is_strict() {
            return Err(error);
        }
        let key = desc.name();
        tracing::trace!(key = %key, reason = %error, "linked empty setter");
        Ok(GuardedInvocation::new(
            Setter::empty(key.clone()),
            Some(Guard::shape_and_proto(receiver, receiver.shape())),
        )
        .with_switch_point(receiver.get_proto_switch_point(key, None)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ObjectLayout;
    use crate::property::PropertyFlags;
    use crate::value::Value;

    fn root() -> Arc<Shape> {
        Shape::new_map(ObjectLayout::new("JO2", 2, true))
    }

    fn key(name: &str) -> PropertyKey {
        PropertyKey::from(name)
    }

    #[test]
    fn test_getter_guarded_by_shape() {
        let a = JsObject::new(root(), None);
        a.set(&key("x"), Value::int32(1), false).unwrap();
        let desc = CallSiteDescriptor::new("x", ValueType::Int);
        let linked = Linker::default().find_get_method(&a, &desc).unwrap();
        assert!(linked.is_valid_for(&a));
        assert_eq!(linked.invocation().invoke(&a).unwrap(), Value::int32(1));

        let b = JsObject::new(root(), None);
        b.set(&key("x"), Value::int32(5), false).unwrap();
        assert!(linked.is_valid_for(&b));
        assert_eq!(linked.invocation().invoke(&b).unwrap(), Value::int32(5));

        b.set(&key("y"), Value::int32(0), false).unwrap();
        assert!(!linked.is_valid_for(&b));
    }

    #[test]
    fn test_inherited_getter_invalidated_by_shadowing_proto() {
        let grand = JsObject::new(root(), None);
        grand.set(&key("x"), Value::int32(1), false).unwrap();
        let parent = JsObject::new(root(), Some(grand));
        let child = JsObject::new(root(), Some(parent.clone()));

        let desc = CallSiteDescriptor::new("x", ValueType::Object);
        let linked = Linker::default().find_get_method(&child, &desc).unwrap();
        assert_eq!(linked.invocation().proto_depth(), 2);
        assert!(linked.is_valid_for(&child));

        parent.set(&key("x"), Value::int32(2), false).unwrap();
        assert!(!linked.is_valid_for(&child));
        assert_eq!(child.get(&key("x")).unwrap(), Value::int32(2));
    }

    #[test]
    fn test_missing_scope_read_throws() {
        let global = JsObject::new_global(root(), None, None);
        let desc = CallSiteDescriptor::new("nope", ValueType::Object).with_flags(CallSiteFlags::SCOPE);
        let linked = Linker::default().find_get_method(&global, &desc).unwrap();
        assert!(matches!(
            linked.invocation().invoke(&global),
            Err(PropertyError::NotDefined(_))
        ));
        let plain = CallSiteDescriptor::new("nope", ValueType::Object);
        let linked = Linker::default().find_get_method(&global, &plain).unwrap();
        assert!(linked.invocation().invoke(&global).unwrap().is_undefined());
    }

    #[test]
    fn test_new_property_setter_transitions_shape() {
        let obj = JsObject::new(root(), None);
        let before = obj.shape();
        let desc = CallSiteDescriptor::new("x", ValueType::Int);
        let linked = Linker::default().find_set_method(&obj, &desc).unwrap();
        assert!(linked.is_valid_for(&obj));
        assert!(obj.has_shape(&before));

        linked.invocation().invoke(&obj, Value::int32(4)).unwrap();
        assert!(!obj.has_shape(&before));
        assert_eq!(obj.get(&key("x")).unwrap(), Value::int32(4));
        assert!(!linked.is_valid_for(&obj));
    }

    #[test]
    fn test_read_only_setters() {
        let obj = JsObject::new(root(), None);
        obj.define_own_property(&key("k"), Value::int32(1), PropertyFlags::NOT_WRITABLE)
            .unwrap();
        let sloppy = CallSiteDescriptor::new("k", ValueType::Int);
        let linked = Linker::default().find_set_method(&obj, &sloppy).unwrap();
        linked.invocation().invoke(&obj, Value::int32(2)).unwrap();
        assert_eq!(obj.get(&key("k")).unwrap(), Value::int32(1));

        let strict = sloppy.clone().with_flags(CallSiteFlags::STRICT);
        assert!(matches!(
            Linker::default().find_set_method(&obj, &strict),
            Err(PropertyError::NotWritable(_))
        ));
    }

    #[test]
    fn test_shadowing_builtin_carries_switch_point() {
        let proto = JsObject::new(root(), None);
        proto
            .define_own_property(&key("apply"), Value::int32(0), PropertyFlags::IS_BUILTIN)
            .unwrap();
        let builtin = SwitchPoint::new();
        proto
            .shape()
            .find(&key("apply"))
            .unwrap()
            .set_builtin_switch_point(Some(builtin.clone()));

        let obj = JsObject::new(root(), Some(proto));
        let desc = CallSiteDescriptor::new("apply", ValueType::Object);
        let linked = Linker::default().find_set_method(&obj, &desc).unwrap();
        assert!(builtin.is_valid());
        linked.invocation().invoke(&obj, Value::int32(1)).unwrap();
        assert!(builtin.has_been_invalidated());
    }

    #[test]
    fn test_identity_guard() {
        let a = JsObject::new(root(), None);
        let b = JsObject::new(root(), None);
        let guard = Guard::identity(&a);
        assert!(guard.test(&a));
        assert!(!guard.test(&b));
    }
}
