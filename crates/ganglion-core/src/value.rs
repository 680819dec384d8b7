//! Dynamic field values and their declared types

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A dynamic value stored in, or written to, a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// No value
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Sequence of values; also the shape used for vec reads and scatter writes
    List(Vec<Value>),
}

/// `f` as an `i64` when it is integral and in range
fn exact_int(f: f64) -> Option<i64> {
    // 2^63; the lower bound -2^63 is itself representable
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (f.fract() == 0.0 && f >= -LIMIT && f < LIMIT).then_some(f as i64)
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => exact_int(*f),
            _ => None,
        }
    }

    /// Try to get this value as a float (integers widen)
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "double",
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }

    /// Compare two values with their native ordering
    ///
    /// Numbers compare numerically (int against float widens), strings
    /// lexically, booleans with `false < true`. Mixed kinds are unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            _ => match (self.as_float(), other.as_float()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::List(list) => {
                write!(f, "[")?;
                for (i, v) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(vec: Vec<T>) -> Self {
        Value::List(vec.into_iter().map(Into::into).collect())
    }
}

/// Declared data type of a field or port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    String,
    FloatList,
    /// A type the introspection layer cannot represent
    Opaque,
}

impl ValueType {
    /// Coarse data-type tag used by field introspection
    pub fn tag(&self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "double",
            ValueType::String => "string",
            ValueType::FloatList => "vector<double>",
            ValueType::Opaque => "bad",
        }
    }

    /// Whether a `Value::List` is a single value of this type
    pub fn is_list(&self) -> bool {
        matches!(self, ValueType::FloatList)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Int | ValueType::Float)
    }

    /// The value a freshly created field of this type holds
    pub fn zero(&self) -> Value {
        match self {
            ValueType::Bool => Value::Bool(false),
            ValueType::Int => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::String => Value::String(String::new()),
            ValueType::FloatList => Value::List(Vec::new()),
            ValueType::Opaque => Value::Null,
        }
    }

    /// Whether data of type `self` may flow into a slot of type `dst`
    pub fn flows_into(&self, dst: ValueType) -> bool {
        *self == dst || (*self == ValueType::Int && dst == ValueType::Float)
    }

    /// Convert `value` to this type, or fail with a type error
    pub fn coerce(&self, value: Value) -> Result<Value> {
        let got = value.type_name();
        let converted = match (self, value) {
            (ValueType::Bool, Value::Bool(b)) => Some(Value::Bool(b)),
            (ValueType::Int, Value::Int(i)) => Some(Value::Int(i)),
            (ValueType::Int, Value::Float(f)) => exact_int(f).map(Value::Int),
            (ValueType::Float, Value::Float(f)) => Some(Value::Float(f)),
            (ValueType::Float, Value::Int(i)) => Some(Value::Float(i as f64)),
            (ValueType::String, Value::String(s)) => Some(Value::String(s)),
            (ValueType::FloatList, Value::List(items)) => items
                .into_iter()
                .map(|v| v.as_float().map(Value::Float))
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            _ => None,
        };
        converted.ok_or_else(|| Error::type_error(self.tag(), got))
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Key of a lookup field entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl Key {
    /// Interpret a value as a lookup key
    pub fn from_value(value: &Value) -> Result<Key> {
        match value {
            Value::String(s) => Ok(Key::Str(s.clone())),
            other => other
                .as_int()
                .map(Key::Int)
                .ok_or_else(|| Error::type_error("int or string key", other.type_name())),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Int(i as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(42).as_float(), Some(42.0));
        assert_eq!(Value::Float(3.0).as_int(), Some(3));
        assert_eq!(Value::Float(3.5).as_int(), None);
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
    }

    #[test]
    fn test_native_ordering() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
        assert_eq!(
            Value::from("b").compare(&Value::from("a")),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Bool(false).compare(&Value::Bool(true)), Some(Ordering::Less));
        assert_eq!(Value::from("1").compare(&Value::Int(1)), None);
    }

    #[test]
    fn test_coerce() {
        assert_eq!(ValueType::Float.coerce(Value::Int(3)).unwrap(), Value::Float(3.0));
        assert_eq!(ValueType::Int.coerce(Value::Float(4.0)).unwrap(), Value::Int(4));
        assert!(matches!(
            ValueType::Int.coerce(Value::Float(4.5)),
            Err(Error::TypeError { .. })
        ));
        assert!(ValueType::Bool.coerce(Value::from("yes")).is_err());
        assert_eq!(
            ValueType::FloatList.coerce(vec![1i64, 2].into()).unwrap(),
            Value::List(vec![Value::Float(1.0), Value::Float(2.0)])
        );
    }

    #[test]
    fn test_coerce_rejects_out_of_range_floats() {
        assert!(ValueType::Int.coerce(Value::Float(1e19)).is_err());
        assert!(ValueType::Int.coerce(Value::Float(-1e19)).is_err());
        assert!(ValueType::Int.coerce(Value::Float(f64::INFINITY)).is_err());
        assert!(ValueType::Int.coerce(Value::Float(f64::NAN)).is_err());
        assert_eq!(
            ValueType::Int.coerce(Value::Float(-9_223_372_036_854_775_808.0)).unwrap(),
            Value::Int(i64::MIN)
        );
        assert_eq!(Value::Float(9.3e18).as_int(), None);
    }

    #[test]
    fn test_key_from_value() {
        assert_eq!(Key::from_value(&Value::from("A")).unwrap(), Key::from("A"));
        assert_eq!(Key::from_value(&Value::Float(2.0)).unwrap(), Key::Int(2));
        assert!(Key::from_value(&Value::Bool(true)).is_err());
    }
}
