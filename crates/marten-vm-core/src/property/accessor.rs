//! Linked getter and setter handles.
//!
//! A `Getter`/`Setter` is what linking produces for a call site: a small, cloneable
//! description of the work to do on a hit. Setters compose: a new-property setter
//! is an extension check around a compare-and-swap shape guard around a store, and
//! so on.

use super::{PropertyFlags, user_accessor};
use crate::constants::GlobalConstants;
use crate::convert::coerce;
use crate::error::{PropertyError, PropertyResult, WideningRefused};
use crate::key::PropertyKey;
use crate::linker::CallSiteFlags;
use crate::object::ObjectRef;
use crate::shape::Shape;
use crate::storage::StorageArea;
use crate::switchpoint::SwitchPoint;
use crate::types::ValueType;
use crate::value::Value;
use std::sync::Arc;

/// Run `f` on the object `depth` prototypes above `receiver`.
fn with_owner<R>(
    receiver: &ObjectRef,
    depth: usize,
    f: impl FnOnce(&ObjectRef) -> R,
) -> PropertyResult<R> {
    if depth == 0 {
        return Ok(f(receiver));
    }
    let owner = receiver.ancestor(depth).ok_or_else(|| {
        PropertyError::internal(format!("prototype chain shorter than {}", depth))
    })?;
    Ok(f(&owner))
}

// ============================================================================
// Getter
// ============================================================================

#[derive(Clone, Debug)]
pub(crate) enum GetTarget {
    Slot { area: StorageArea, slot: usize },
    UserAccessor { slot: usize },
    Constant(Value),
    Undefined,
    Throw(PropertyError),
}

/// Linked property read
#[derive(Clone, Debug)]
pub struct Getter {
    key: PropertyKey,
    target: GetTarget,
    requested: ValueType,
    depth: usize,
}

impl Getter {
    pub(crate) fn new(key: PropertyKey, target: GetTarget, requested: ValueType) -> Self {
        Self {
            key,
            target,
            requested,
            depth: 0,
        }
    }

    /// Getter returning a fixed value, converted to `requested`
    pub fn constant(key: PropertyKey, value: Value, requested: ValueType) -> Self {
        let value = coerce(value, requested);
        Self::new(key, GetTarget::Constant(value), requested)
    }

    /// Getter for a missing property
    pub fn undefined(key: PropertyKey, requested: ValueType) -> Self {
        Self::new(key, GetTarget::Undefined, requested)
    }

    /// Getter that always fails with `error`
    pub fn throwing(key: PropertyKey, error: PropertyError, requested: ValueType) -> Self {
        Self::new(key, GetTarget::Throw(error), requested)
    }

    /// Read from the object `depth` prototypes above the receiver
    pub fn with_proto_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Property key
    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    /// Representation this getter produces
    pub fn requested_type(&self) -> ValueType {
        self.requested
    }

    /// Prototype depth of the owner
    pub fn proto_depth(&self) -> usize {
        self.depth
    }

    /// Whether this getter returns a captured constant
    pub fn is_constant(&self) -> bool {
        matches!(self.target, GetTarget::Constant(_))
    }

    /// Perform the read
    pub fn invoke(&self, receiver: &ObjectRef) -> PropertyResult<Value> {
        let value = match &self.target {
            GetTarget::Constant(value) => return Ok(value.clone()),
            GetTarget::Undefined => Value::undefined(),
            GetTarget::Throw(error) => return Err(error.clone()),
            GetTarget::Slot { area, slot } => {
                with_owner(receiver, self.depth, |owner| owner.read_slot(*area, *slot))?
            }
            GetTarget::UserAccessor { slot } => with_owner(receiver, self.depth, |owner| {
                user_accessor::invoke_getter(owner, *slot, receiver)
            })??,
        };
        Ok(coerce(value, self.requested))
    }
}

// ============================================================================
// Setter
// ============================================================================

/// Fallback taken when a guarded fast path loses its shape race
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SlowPath {
    /// Clear `NEEDS_DECLARATION` and store
    DeclareAndSet,
    /// Full dynamic assignment
    Set,
}

#[derive(Clone, Debug)]
pub(crate) enum SetAction {
    /// Store in representation `repr`
    Store {
        area: StorageArea,
        slot: usize,
        repr: ValueType,
    },
    /// Call the stored setter with the receiver as `this`
    UserAccessor { slot: usize },
    /// Move the owner from `from` to `to` (type widening), then continue
    Transition {
        from: Arc<Shape>,
        to: Arc<Shape>,
        then: Box<SetAction>,
    },
    /// Compare-and-swap the owner's shape; run `fast` on success, `slow` otherwise
    Guarded {
        from: Arc<Shape>,
        to: Arc<Shape>,
        fast: Box<SetAction>,
        slow: SlowPath,
    },
    /// Reject additions to non-extensible objects
    ExtensionCheck(Box<SetAction>),
    /// Record that a builtin was overwritten
    InvalidateBuiltin {
        switch_point: SwitchPoint,
        then: Box<SetAction>,
    },
    /// Invalidate a cached global constant once the store landed
    InvalidateConstant {
        constants: Arc<GlobalConstants>,
        then: Box<SetAction>,
    },
    /// Create or assign the binding on the receiver's global object
    ToGlobal,
    /// Ignore the write
    Empty,
    /// Fail with an error
    Throw(PropertyError),
}

/// How a setter action finished
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Completion {
    /// A linked store wrote the slot
    Stored,
    /// Nothing was written, or the write went through `Property::set_value`,
    /// which invalidates global constants itself
    Untracked,
}

enum SetFailure {
    Error(PropertyError),
    Refused,
}

impl From<PropertyError> for SetFailure {
    fn from(error: PropertyError) -> Self {
        SetFailure::Error(error)
    }
}

impl From<WideningRefused> for SetFailure {
    fn from(_: WideningRefused) -> Self {
        SetFailure::Refused
    }
}

impl SetAction {
    fn run(
        &self,
        setter: &Setter,
        owner: &ObjectRef,
        receiver: &ObjectRef,
        value: Value,
    ) -> Result<Completion, SetFailure> {
        match self {
            SetAction::Store { area, slot, repr } => {
                owner.write_slot(*area, *slot, *repr, value)?;
                Ok(Completion::Stored)
            }
            SetAction::UserAccessor { slot } => {
                let key = setter.is_strict().then_some(&setter.key);
                user_accessor::invoke_setter(owner, *slot, receiver, value, key)?;
                Ok(Completion::Untracked)
            }
            SetAction::Transition { from, to, then } => {
                if owner.compare_and_set_shape(from, to.clone()) || owner.has_shape(to) {
                    then.run(setter, owner, receiver, value)
                } else {
                    Err(SetFailure::Refused)
                }
            }
            SetAction::Guarded {
                from,
                to,
                fast,
                slow,
            } => {
                if owner.compare_and_set_shape(from, to.clone()) {
                    return fast.run(setter, owner, receiver, value);
                }
                tracing::trace!(key = %setter.key, ?slow, "shape guard lost race");
                match slow {
                    SlowPath::DeclareAndSet => owner.declare_and_set(&setter.key, value)?,
                    SlowPath::Set => receiver.set_with_flags(&setter.key, value, setter.flags)?,
                }
                Ok(Completion::Untracked)
            }
            SetAction::ExtensionCheck(then) => {
                if owner.is_extensible() {
                    then.run(setter, owner, receiver, value)
                } else if setter.is_strict() {
                    Err(PropertyError::NonExtensibleWrite(setter.key.clone()).into())
                } else {
                    Ok(Completion::Untracked)
                }
            }
            SetAction::InvalidateBuiltin { switch_point, then } => {
                if switch_point.invalidate() {
                    tracing::debug!(key = %setter.key, "builtin overwritten");
                }
                then.run(setter, owner, receiver, value)
            }
            SetAction::InvalidateConstant { constants, then } => {
                // A refused store is redone by `set_value`, which invalidates.
                let completion = then.run(setter, owner, receiver, value)?;
                if completion == Completion::Stored {
                    constants.invalidate_switch_point(&setter.key);
                }
                Ok(completion)
            }
            SetAction::ToGlobal => {
                let global = receiver.global_object().ok_or_else(|| {
                    PropertyError::internal("scope object without a global object")
                })?;
                if !global.is_extensible() {
                    if setter.is_strict() {
                        return Err(PropertyError::NonExtensibleWrite(setter.key.clone()).into());
                    }
                    return Ok(Completion::Untracked);
                }
                global.add_spill_property(&setter.key, PropertyFlags::empty(), Some(value))?;
                Ok(Completion::Untracked)
            }
            SetAction::Empty => Ok(Completion::Untracked),
            SetAction::Throw(error) => Err(error.clone().into()),
        }
    }
}

/// Linked property write
#[derive(Clone, Debug)]
pub struct Setter {
    key: PropertyKey,
    action: SetAction,
    depth: usize,
    flags: CallSiteFlags,
}

impl Setter {
    pub(crate) fn new(key: PropertyKey, action: SetAction) -> Self {
        Self {
            key,
            action,
            depth: 0,
            flags: CallSiteFlags::empty(),
        }
    }

    /// Setter that ignores the write
    pub fn empty(key: PropertyKey) -> Self {
        Self::new(key, SetAction::Empty)
    }

    /// Setter that always fails with `error`
    pub fn throwing(key: PropertyKey, error: PropertyError) -> Self {
        Self::new(key, SetAction::Throw(error))
    }

    /// Write to the object `depth` prototypes above the receiver
    pub fn with_proto_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Call-site flags used for strictness and the slow path
    pub fn with_call_site_flags(mut self, flags: CallSiteFlags) -> Self {
        self.flags = flags;
        self
    }

    pub(crate) fn map_action(mut self, f: impl FnOnce(SetAction) -> SetAction) -> Self {
        self.action = f(self.action);
        self
    }

    /// Property key
    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    /// Prototype depth of the owner
    pub fn proto_depth(&self) -> usize {
        self.depth
    }

    /// Whether strict-mode errors are raised
    pub fn is_strict(&self) -> bool {
        self.flags.contains(CallSiteFlags::STRICT)
    }

    /// Perform the write
    pub fn invoke(&self, receiver: &ObjectRef, value: Value) -> PropertyResult<()> {
        let outcome = with_owner(receiver, self.depth, |owner| {
            self.action.run(self, owner, receiver, value.clone())
        })?;
        match outcome {
            Ok(_) => Ok(()),
            Err(SetFailure::Error(error)) => Err(error),
            Err(SetFailure::Refused) => {
                tracing::trace!(key = %self.key, "store refused, redoing write on slow path");
                receiver.set_with_flags(&self.key, value, self.flags)
            }
        }
    }
}
