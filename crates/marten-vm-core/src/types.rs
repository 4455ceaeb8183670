//! Storage representation lattice.

use crate::value::Value;
use std::fmt;

/// Representation of a property's stored value.
///
/// Ordered `Undefined < Int < Long < Double < Object`. A property's representation
/// only ever moves up this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Never assigned; may widen to anything
    Undefined,
    /// 32-bit integer
    Int,
    /// 64-bit integer, only when a call site asks for it
    Long,
    /// IEEE double
    Double,
    /// Generic value
    Object,
}

impl ValueType {
    /// Accessor representations, in cache index order
    pub const ACCESSOR_TYPES: [ValueType; 4] = [
        ValueType::Int,
        ValueType::Long,
        ValueType::Double,
        ValueType::Object,
    ];

    /// Position in the widening order (`Undefined` is -1)
    pub const fn index(self) -> i32 {
        match self {
            ValueType::Undefined => -1,
            ValueType::Int => 0,
            ValueType::Long => 1,
            ValueType::Double => 2,
            ValueType::Object => 3,
        }
    }

    /// Slot in a per-type accessor cache
    pub(crate) const fn accessor_index(self) -> usize {
        match self {
            ValueType::Int => 0,
            ValueType::Long => 1,
            ValueType::Double => 2,
            ValueType::Undefined | ValueType::Object => 3,
        }
    }

    /// Whether `self` is strictly wider than `other`
    pub fn is_wider_than(self, other: ValueType) -> bool {
        self.index() > other.index()
    }

    /// The wider of two representations
    pub fn widest(a: ValueType, b: ValueType) -> ValueType {
        if a.is_wider_than(b) { a } else { b }
    }

    /// Whether this is one of the primitive numeric representations
    pub fn is_primitive(self) -> bool {
        matches!(self, ValueType::Int | ValueType::Long | ValueType::Double)
    }

    /// Narrowest representation that holds `value` without loss.
    ///
    /// Never yields `Long`.
    pub fn of(value: &Value) -> ValueType {
        match value {
            Value::Int(_) => ValueType::Int,
            Value::Number(_) => ValueType::Double,
            _ => ValueType::Object,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Undefined => "undefined",
            ValueType::Int => "int",
            ValueType::Long => "long",
            ValueType::Double => "double",
            ValueType::Object => "object",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widening_order() {
        assert!(ValueType::Int.is_wider_than(ValueType::Undefined));
        assert!(ValueType::Long.is_wider_than(ValueType::Int));
        assert!(ValueType::Double.is_wider_than(ValueType::Long));
        assert!(ValueType::Object.is_wider_than(ValueType::Double));
        assert!(!ValueType::Int.is_wider_than(ValueType::Int));
        assert_eq!(
            ValueType::widest(ValueType::Double, ValueType::Int),
            ValueType::Double
        );
    }

    #[test]
    fn test_type_of_value() {
        assert_eq!(ValueType::of(&Value::int32(1)), ValueType::Int);
        assert_eq!(ValueType::of(&Value::number(3.5)), ValueType::Double);
        assert_eq!(ValueType::of(&Value::string("x")), ValueType::Object);
        assert_eq!(ValueType::of(&Value::undefined()), ValueType::Object);
    }
}
