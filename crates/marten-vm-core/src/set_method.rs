//! Synthesis of setters for property writes.

use crate::error::{PropertyError, PropertyResult};
use crate::find::FindProperty;
use crate::linker::{CallSiteDescriptor, Guard, GuardedInvocation, GuardedSetter};
use crate::object::{JsObject, ObjectRef};
use crate::property::accessor::{SetAction, SlowPath};
use crate::property::{PropertyFlags, Setter};
use crate::shape::Shape;
use crate::switchpoint::SwitchPoint;
use crate::types::ValueType;
use std::sync::Arc;

/// Builds the setter for one write site against one receiver
pub(crate) struct SetMethodCreator<'a> {
    receiver: &'a ObjectRef,
    find: Option<FindProperty>,
    desc: &'a CallSiteDescriptor,
    builtin: Option<SwitchPoint>,
}

impl<'a> SetMethodCreator<'a> {
    /// `find` is the receiver's own (or scope) property, `None` when the write adds
    /// one. `builtin` is the switch point of a builtin the new property would shadow.
    pub(crate) fn new(
        receiver: &'a ObjectRef,
        find: Option<FindProperty>,
        desc: &'a CallSiteDescriptor,
        builtin: Option<SwitchPoint>,
    ) -> Self {
        Self {
            receiver,
            find,
            desc,
            builtin,
        }
    }

    pub(crate) fn create_guarded_invocation(self) -> PropertyResult<GuardedSetter> {
        let (setter, guard_shape) = self.create_set_method()?;
        let owner = self.find.as_ref().map(FindProperty::owner);
        let guard = match &self.find {
            Some(find) if find.is_self() => Guard::Shape(guard_shape),
            _ => Guard::shape_and_proto(self.receiver, guard_shape),
        };
        Ok(GuardedInvocation::new(
            setter.with_call_site_flags(self.desc.flags()),
            Some(guard),
        )
        .with_switch_point(self.receiver.get_proto_switch_point(self.desc.name(), owner)))
    }

    fn create_set_method(&self) -> PropertyResult<(Setter, Arc<Shape>)> {
        if let Some(find) = &self.find {
            return Ok((
                self.create_existing_property_setter(find),
                find.receiver_shape().clone(),
            ));
        }
        if self.desc.is_scope() && self.desc.is_strict() {
            return Err(PropertyError::StrictAssignmentToUndeclared(
                self.desc.name().clone(),
            ));
        }
        if self.receiver.is_scope() {
            self.create_global_property_setter()
        } else {
            Ok(self.create_new_property_setter())
        }
    }

    fn create_existing_property_setter(&self, find: &FindProperty) -> Setter {
        let property = find.property();
        let key = self.desc.name();
        let ty = self.desc.value_type();
        let owner_shape = find.owner().shape();

        let action = if property.needs_declaration() && self.desc.is_declaration() {
            let declared = property.without_flags(PropertyFlags::NEEDS_DECLARATION);
            let to = owner_shape.replace_property(property, declared.clone());
            let fast = declared.setter_action(ty, &to);
            SetAction::Guarded {
                from: owner_shape,
                to,
                fast: Box::new(fast),
                slow: SlowPath::DeclareAndSet,
            }
        } else {
            property.setter_action(ty, &owner_shape)
        };
        Setter::new(key.clone(), action).with_proto_depth(find.proto_chain_length())
    }

    /// Undeclared assignment from a scope: the setter creates the binding on the
    /// global when it runs.
    fn create_global_property_setter(&self) -> PropertyResult<(Setter, Arc<Shape>)> {
        let key = self.desc.name();
        if self.receiver.global_object().is_none() {
            return Err(PropertyError::internal("scope object without a global object"));
        }
        tracing::trace!(key = %key, "linked setter creating global binding");
        Ok((
            Setter::new(key.clone(), SetAction::ToGlobal),
            self.receiver.shape(),
        ))
    }

    fn create_new_property_setter(&self) -> (Setter, Arc<Shape>) {
        let key = self.desc.name();
        let shape = self.receiver.shape();
        let ty = match self.desc.value_type() {
            ValueType::Undefined => ValueType::Object,
            ty => ty,
        };
        let property = JsObject::new_data_property(&shape, key, PropertyFlags::empty(), Some(ty));
        let new_shape = shape.add_property(property.clone());
        let added = new_shape.find(key).unwrap_or_else(|| Arc::new(property));
        if let Some(switch_point) = &self.builtin {
            added.set_builtin_switch_point(Some(switch_point.clone()));
        }
        let fast = added.setter_action(ty, &new_shape);
        tracing::trace!(
            key = %key,
            slot = added.slot(),
            kind = ?added.kind(),
            from = shape.id(),
            to = new_shape.id(),
            "linked property-adding setter"
        );
        let action = SetAction::ExtensionCheck(Box::new(SetAction::Guarded {
            from: shape.clone(),
            to: new_shape,
            fast: Box::new(fast),
            slow: SlowPath::Set,
        }));
        (Setter::new(key.clone(), action), shape)
    }
}
