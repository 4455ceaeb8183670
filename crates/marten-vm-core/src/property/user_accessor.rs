//! Getter/setter pairs stored in spill slots.

use crate::error::{PropertyError, PropertyResult};
use crate::key::PropertyKey;
use crate::object::{JsObject, ObjectRef};
use crate::value::{JsFunction, Value};
use parking_lot::RwLock;
use std::fmt;

/// A `{getter, setter}` pair.
///
/// The pair is mutable so that redefining the accessors of an existing property
/// does not need a shape change.
pub struct Accessors {
    pair: RwLock<(Option<JsFunction>, Option<JsFunction>)>,
}

impl Accessors {
    /// Create a pair
    pub fn new(getter: Option<JsFunction>, setter: Option<JsFunction>) -> Self {
        Self {
            pair: RwLock::new((getter, setter)),
        }
    }

    /// Current getter
    pub fn getter(&self) -> Option<JsFunction> {
        self.pair.read().0.clone()
    }

    /// Current setter
    pub fn setter(&self) -> Option<JsFunction> {
        self.pair.read().1.clone()
    }

    /// Replace both callables
    pub fn set(&self, getter: Option<JsFunction>, setter: Option<JsFunction>) {
        *self.pair.write() = (getter, setter);
    }
}

impl fmt::Debug for Accessors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pair = self.pair.read();
        f.debug_struct("Accessors")
            .field("getter", &pair.0)
            .field("setter", &pair.1)
            .finish()
    }
}

/// Invoke the getter stored at `slot` of `owner`, with `receiver` as `this`.
pub(crate) fn invoke_getter(
    owner: &JsObject,
    slot: usize,
    receiver: &ObjectRef,
) -> PropertyResult<Value> {
    match owner.accessors(slot).and_then(|pair| pair.getter()) {
        Some(getter) => getter.call(&Value::object(receiver.clone()), &[]),
        None => Ok(Value::undefined()),
    }
}

/// Invoke the setter stored at `slot` of `owner`, with `receiver` as `this`.
///
/// Without a setter this is a no-op, unless `key` is supplied for strict-mode
/// diagnostics, in which case it fails with `NoSetter`.
pub(crate) fn invoke_setter(
    owner: &JsObject,
    slot: usize,
    receiver: &ObjectRef,
    value: Value,
    key: Option<&PropertyKey>,
) -> PropertyResult<()> {
    match owner.accessors(slot).and_then(|pair| pair.setter()) {
        Some(setter) => setter
            .call(&Value::object(receiver.clone()), &[value])
            .map(|_| ()),
        None => match key {
            Some(key) => Err(PropertyError::NoSetter(key.clone())),
            None => Ok(()),
        },
    }
}
