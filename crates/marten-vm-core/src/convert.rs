//! Value conversions between JS values and storage representations.
//!
//! `FromValue` converts a JS `Value` into a Rust type (used by the typed property
//! getters). `IntoValue` converts a Rust type back into a JS `Value`.

use crate::error::PropertyResult;
use crate::types::ValueType;
use crate::value::Value;

/// Convert a JS `Value` into a Rust type.
pub trait FromValue: Sized {
    /// Convert from a JS Value using the abstract numeric conversions.
    fn from_value(value: &Value) -> PropertyResult<Self>;
}

/// Convert a Rust type into a JS `Value`.
pub trait IntoValue {
    /// Convert into a JS Value.
    fn into_value(self) -> Value;
}

// ---------------------------------------------------------------------------
// FromValue implementations
// ---------------------------------------------------------------------------

impl FromValue for f64 {
    fn from_value(value: &Value) -> PropertyResult<Self> {
        Ok(to_number(value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> PropertyResult<Self> {
        if let Some(n) = value.as_int32() {
            Ok(n)
        } else {
            Ok(to_int32(to_number(value)))
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> PropertyResult<Self> {
        if let Some(n) = value.as_int32() {
            Ok(n as i64)
        } else {
            Ok(to_int64(to_number(value)))
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> PropertyResult<Self> {
        Ok(to_boolean(value))
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> PropertyResult<Self> {
        Ok(value.clone())
    }
}

// ---------------------------------------------------------------------------
// IntoValue implementations
// ---------------------------------------------------------------------------

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::number(self)
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> Value {
        Value::int32(self)
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Value {
        Value::number(self as f64)
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::boolean(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::string(self)
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::undefined()
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::undefined(),
        }
    }
}

// ---------------------------------------------------------------------------
// Abstract operations
// ---------------------------------------------------------------------------

/// ToNumber
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Int(n) => *n as f64,
        Value::Number(n) => *n,
        Value::Undefined => f64::NAN,
        Value::Null => 0.0,
        Value::Boolean(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
        Value::Symbol(_) | Value::Object(_) | Value::Function(_) => f64::NAN,
    }
}

/// ToBoolean
pub fn to_boolean(value: &Value) -> bool {
    match value {
        Value::Undefined | Value::Null => false,
        Value::Boolean(b) => *b,
        Value::Int(n) => *n != 0,
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::String(s) => !s.is_empty(),
        Value::Symbol(_) | Value::Object(_) | Value::Function(_) => true,
    }
}

/// ToInt32
pub fn to_int32(n: f64) -> i32 {
    if n.is_nan() || n.is_infinite() || n == 0.0 {
        return 0;
    }
    // |m| < 2^32, so the i64 cast is exact and the u32 cast wraps modulo 2^32.
    let m = n.trunc() % 4_294_967_296.0;
    m as i64 as u32 as i32
}

/// Truncating conversion to a 64-bit integer
pub fn to_int64(n: f64) -> i64 {
    if n.is_nan() || n.is_infinite() {
        return 0;
    }
    n.trunc() as i64
}

/// Largest integer a double represents exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Whether `value` is representable in `repr` without loss.
pub fn fits(value: &Value, repr: ValueType) -> bool {
    match repr {
        ValueType::Undefined => false,
        ValueType::Int => value.is_int32(),
        ValueType::Long => match value {
            Value::Int(_) => true,
            Value::Number(n) => n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER,
            _ => false,
        },
        ValueType::Double => value.is_number(),
        ValueType::Object => true,
    }
}

/// Convert `value` to the representation a call site asked for.
///
/// Lossy for narrow targets, matching the non-optimistic conversions.
pub fn coerce(value: Value, requested: ValueType) -> Value {
    match requested {
        ValueType::Undefined | ValueType::Object => value,
        ValueType::Int => match value {
            Value::Int(_) => value,
            other => Value::int32(to_int32(to_number(&other))),
        },
        ValueType::Long => match value {
            Value::Int(_) => value,
            other => Value::number(to_int64(to_number(&other)) as f64),
        },
        ValueType::Double => match value {
            Value::Int(_) | Value::Number(_) => value,
            other => Value::number(to_number(&other)),
        },
    }
}
