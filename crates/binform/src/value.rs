//! A generic in-memory tree for decoded documents.

use crate::error::DecodeError;
use crate::event::{Context, Tag, Visitor};

/// A decoded value of any supported shape.
///
/// Object members keep wire order, and duplicate keys are preserved rather
/// than collapsed. Equality is structural and order-sensitive, with one
/// numeric widening: a non-negative `Int` equals the `UInt` with the same
/// magnitude and tag, so a value round-tripped through a format that
/// re-encodes small integers compactly still compares equal.
#[derive(Debug, Clone)]
pub enum Value {
    Null(Tag),
    Bool(bool),
    Int(i64, Tag),
    UInt(u64, Tag),
    Double(f64, Tag),
    Str(String, Tag),
    Bytes(Vec<u8>, Tag),
    /// Integer too wide for 64 bits: sign plus big-endian magnitude.
    Bignum { negative: bool, magnitude: Vec<u8> },
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
}

impl Value {
    /// Returns the semantic tag carried by this value.
    pub fn tag(&self) -> Tag {
        match self {
            Value::Null(tag)
            | Value::Int(_, tag)
            | Value::UInt(_, tag)
            | Value::Double(_, tag)
            | Value::Str(_, tag)
            | Value::Bytes(_, tag) => *tag,
            Value::Bignum { .. } => Tag::Bignum,
            Value::Bool(_) | Value::Array(_) | Value::Object(_) => Tag::None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as a signed 64-bit integer if it fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v, _) => Some(*v),
            Value::UInt(v, _) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Returns the value as an unsigned 64-bit integer if it fits.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v, _) => Some(*v),
            Value::Int(v, _) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Returns the value as a double, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v, _) => Some(*v),
            Value::Int(v, _) => Some(*v as f64),
            Value::UInt(v, _) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s, _) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b, _) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Object(members) => Some(members),
            _ => None,
        }
    }

    /// Looks up the first member with the given key in an object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(members) => members.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Returns the element at `index` in an array.
    pub fn at(&self, index: usize) -> Option<&Value> {
        match self {
            Value::Array(items) => items.get(index),
            _ => None,
        }
    }

    /// Number of elements or members; zero for scalars.
    pub fn len(&self) -> usize {
        match self {
            Value::Array(items) => items.len(),
            Value::Object(members) => members.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replays this value as events against a visitor.
    ///
    /// Emits the value sub-tree only. Callers that need a full document wrap
    /// the call in `begin_document`/`end_document` themselves. Stops early
    /// and returns `Ok(false)` as soon as the visitor does.
    pub fn emit_to<V: Visitor + ?Sized>(
        &self,
        visitor: &mut V,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        match self {
            Value::Null(tag) => visitor.null_value(*tag, ctx),
            Value::Bool(b) => visitor.bool_value(*b, ctx),
            Value::Int(v, tag) => visitor.int64_value(*v, *tag, ctx),
            Value::UInt(v, tag) => visitor.uint64_value(*v, *tag, ctx),
            Value::Double(v, tag) => visitor.double_value(*v, *tag, ctx),
            Value::Str(s, tag) => visitor.string_value(s, *tag, ctx),
            Value::Bytes(b, tag) => visitor.byte_string_value(b, *tag, ctx),
            Value::Bignum { negative, magnitude } => {
                visitor.bignum_value(*negative, magnitude, ctx)
            }
            Value::Array(items) => {
                if !visitor.begin_array(Some(items.len()), ctx)? {
                    return Ok(false);
                }
                for item in items {
                    if !item.emit_to(visitor, ctx)? {
                        return Ok(false);
                    }
                }
                visitor.end_array(ctx)
            }
            Value::Object(members) => {
                if !visitor.begin_object(Some(members.len()), ctx)? {
                    return Ok(false);
                }
                for (name, value) in members {
                    if !visitor.key(name, ctx)? {
                        return Ok(false);
                    }
                    if !value.emit_to(visitor, ctx)? {
                        return Ok(false);
                    }
                }
                visitor.end_object(ctx)
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null(a), Value::Null(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a, ta), Value::Int(b, tb)) => a == b && ta == tb,
            (Value::UInt(a, ta), Value::UInt(b, tb)) => a == b && ta == tb,
            (Value::Int(a, ta), Value::UInt(b, tb))
            | (Value::UInt(b, tb), Value::Int(a, ta)) => {
                *a >= 0 && *a as u64 == *b && ta == tb
            }
            (Value::Double(a, ta), Value::Double(b, tb)) => a == b && ta == tb,
            (Value::Str(a, ta), Value::Str(b, tb)) => a == b && ta == tb,
            (Value::Bytes(a, ta), Value::Bytes(b, tb)) => a == b && ta == tb,
            (
                Value::Bignum { negative: na, magnitude: ma },
                Value::Bignum { negative: nb, magnitude: mb },
            ) => na == nb && ma == mb,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Int(v, Tag::None)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Value {
        Value::UInt(v, Tag::None)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Double(v, Tag::None)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Str(v.to_owned(), Tag::None)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Str(v, Tag::None)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Value {
        Value::Array(items)
    }
}
