//! JavaScript values as seen by the property layer.
//!
//! Numbers are canonicalised: an integral double that fits `i32` (other than `-0`)
//! is always held as `Value::Int`, so the narrowest representation of a number is
//! visible from the value itself.

use crate::error::PropertyResult;
use crate::key::Symbol;
use crate::object::ObjectRef;
use std::fmt;
use std::sync::Arc;

/// Native callable signature: `(this, args) -> result`
pub type NativeFn = Arc<dyn Fn(&Value, &[Value]) -> PropertyResult<Value> + Send + Sync>;

/// A callable value (used for user accessors)
#[derive(Clone)]
pub struct JsFunction {
    name: Arc<str>,
    func: NativeFn,
}

impl JsFunction {
    /// Wrap a native closure
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> PropertyResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke with an explicit `this`
    pub fn call(&self, this: &Value, args: &[Value]) -> PropertyResult<Value> {
        (self.func)(this, args)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &JsFunction) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for JsFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function: {}]", self.name)
    }
}

/// A JavaScript value
#[derive(Clone, Default)]
pub enum Value {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Boolean(bool),
    /// Number that fits a 32-bit integer
    Int(i32),
    /// Any other number
    Number(f64),
    /// String
    String(Arc<str>),
    /// Symbol
    Symbol(Symbol),
    /// Object
    Object(ObjectRef),
    /// Function
    Function(JsFunction),
}

impl Value {
    /// Create undefined value
    #[inline]
    pub fn undefined() -> Self {
        Value::Undefined
    }

    /// Create null value
    #[inline]
    pub fn null() -> Self {
        Value::Null
    }

    /// Create boolean value
    #[inline]
    pub fn boolean(b: bool) -> Self {
        Value::Boolean(b)
    }

    /// Create int32 value
    #[inline]
    pub fn int32(n: i32) -> Self {
        Value::Int(n)
    }

    /// Create number value, narrowing integral doubles to int32
    #[inline]
    pub fn number(n: f64) -> Self {
        // 1.0 / -0.0 is -inf, which keeps negative zero a double
        if n.fract() == 0.0
            && n >= i32::MIN as f64
            && n <= i32::MAX as f64
            && !(n == 0.0 && (1.0 / n).is_sign_negative())
        {
            Value::Int(n as i32)
        } else {
            Value::Number(n)
        }
    }

    /// Create string value
    pub fn string(s: &str) -> Self {
        Value::String(Arc::from(s))
    }

    /// Create object value
    pub fn object(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }

    /// Create function value
    pub fn function(func: JsFunction) -> Self {
        Value::Function(func)
    }

    /// Check if undefined
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Check if null
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if int32
    #[inline]
    pub fn is_int32(&self) -> bool {
        matches!(self, Value::Int(_))
    }

    /// Check if number (int32 or double)
    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Number(_))
    }

    /// Check if object
    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Get as int32
    pub fn as_int32(&self) -> Option<i32> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as f64 (int32 or double)
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as object
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Get as function
    pub fn as_function(&self) -> Option<&JsFunction> {
        match self {
            Value::Function(func) => Some(func),
            _ => None,
        }
    }

    /// `typeof` name
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Int(_) | Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Int(a), Value::Number(b)) | (Value::Number(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Symbol(sym) => write!(f, "{:?}", sym),
            Value::Object(obj) => write!(f, "[object {}]", obj.shape().id()),
            Value::Function(func) => write!(f, "{:?}", func),
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_canonicalisation() {
        assert!(Value::number(3.0).is_int32());
        assert!(!Value::number(3.5).is_int32());
        assert!(!Value::number(-0.0).is_int32());
        assert!(!Value::number(1e12).is_int32());
        assert_eq!(Value::number(3.0), Value::int32(3));
    }

    #[test]
    fn test_function_identity() {
        let f = JsFunction::new("f", |_, _| Ok(Value::undefined()));
        let g = JsFunction::new("f", |_, _| Ok(Value::undefined()));
        assert_eq!(Value::function(f.clone()), Value::function(f));
        assert_ne!(
            Value::function(g),
            Value::function(JsFunction::new("f", |_, _| Ok(Value::undefined())))
        );
    }

    #[test]
    fn test_value_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Value>();
    }
}
