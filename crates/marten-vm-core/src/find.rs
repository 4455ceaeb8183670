//! Result of a property lookup along the prototype chain.

use crate::error::PropertyResult;
use crate::object::ObjectRef;
use crate::property::{Getter, Property, Setter};
use crate::shape::Shape;
use crate::types::ValueType;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// A property found on `owner` while looking it up from `receiver`.
///
/// `proto_chain_length` is the number of prototype hops from the receiver to the
/// owner. Getters and setters built from a `FindProperty` walk that many hops at
/// invocation time; the chain itself is protected by proto switch points.
#[derive(Clone)]
pub struct FindProperty {
    receiver: ObjectRef,
    owner: ObjectRef,
    property: Arc<Property>,
    depth: usize,
    receiver_shape: Arc<Shape>,
}

impl FindProperty {
    pub(crate) fn new(
        receiver: ObjectRef,
        owner: ObjectRef,
        property: Arc<Property>,
        depth: usize,
        receiver_shape: Arc<Shape>,
    ) -> Self {
        Self {
            receiver,
            owner,
            property,
            depth,
            receiver_shape,
        }
    }

    /// Same lookup with the property replaced (e.g. after clearing a flag)
    pub fn replace_property(&self, property: Arc<Property>) -> Self {
        Self {
            property,
            ..self.clone()
        }
    }

    /// Object the lookup started from
    pub fn receiver(&self) -> &ObjectRef {
        &self.receiver
    }

    /// Object holding the property
    pub fn owner(&self) -> &ObjectRef {
        &self.owner
    }

    /// The property
    pub fn property(&self) -> &Arc<Property> {
        &self.property
    }

    /// Shape the receiver had when the lookup ran
    pub fn receiver_shape(&self) -> &Arc<Shape> {
        &self.receiver_shape
    }

    /// Found on the receiver itself
    pub fn is_self(&self) -> bool {
        self.depth == 0
    }

    /// Found on a prototype
    pub fn is_inherited(&self) -> bool {
        self.depth > 0
    }

    /// Inherited from an object that is not a scope
    pub fn is_inherited_ordinary_property(&self) -> bool {
        self.is_inherited() && !self.owner.is_scope()
    }

    /// Prototype hops from receiver to owner
    pub fn proto_chain_length(&self) -> usize {
        self.depth
    }

    /// Getter producing representation `ty`
    pub fn get_getter(&self, ty: ValueType) -> Getter {
        self.property.get_getter(ty).with_proto_depth(self.depth)
    }

    /// Setter accepting representation `ty`
    pub fn get_setter(&self, ty: ValueType) -> Setter {
        self.property
            .get_setter(ty, &self.owner.shape())
            .with_proto_depth(self.depth)
    }

    /// Current value; accessors bind the receiver
    pub fn get_object_value(&self) -> PropertyResult<Value> {
        self.property.get_value(&self.receiver, &self.owner)
    }

    /// Store a value through the property
    pub fn set_value(&self, value: Value, strict: bool) -> PropertyResult<()> {
        self.property
            .set_value(&self.receiver, &self.owner, value, strict)
    }
}

impl fmt::Debug for FindProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindProperty")
            .field("property", &self.property)
            .field("depth", &self.depth)
            .field("owner_shape", &self.owner.shape().id())
            .finish()
    }
}
