//! The decoded representation of a pack-format value.
//!
//! [`Value`] borrows string and blob payloads from the buffer it was decoded
//! out of wherever possible, so decoding a tuple's fields for comparison or
//! key extraction doesn't allocate.

use std::fmt;

/// An extension type tag plus its opaque payload (the pack format's "typed
/// extension wrapper").
#[derive(Clone, PartialEq)]
pub struct Ext<'a> {
    pub kind: i8,
    pub data: &'a [u8],
}

impl fmt::Debug for Ext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Ext")
            .field("kind", &self.kind)
            .field("len", &self.data.len())
            .finish()
    }
}

/// A single decoded value from the pack format.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Nil,
    Bool(bool),
    UInt(u64),
    Int(i64),
    F32(f32),
    F64(f64),
    Str(&'a str),
    Bin(&'a [u8]),
    Array(Vec<Value<'a>>),
    Map(Vec<(Value<'a>, Value<'a>)>),
    Ext(Ext<'a>),
}

impl<'a> Value<'a> {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Numeric value as `i64`, if the variant holds an integer representable
    /// as one (used by the sequential-key comparator fast path).
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(i) => Some(i),
            Value::UInt(u) => i64::try_from(u).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F64(f) => Some(f),
            Value::F32(f) => Some(f as f64),
            Value::Int(i) => Some(i as f64),
            Value::UInt(u) => Some(u as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match *self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bin(&self) -> Option<&'a [u8]> {
        match *self {
            Value::Bin(b) => Some(b),
            _ => None,
        }
    }

    /// Ordinal used to order values of differing type, e.g. when a key part
    /// is declared `scalar`/`any` and must compare values of mixed type.
    /// Matches the conventional scalar ordering: numbers < strings < blobs <
    /// booleans < everything else, with `Nil` always least.
    pub fn type_rank(&self) -> u8 {
        match self {
            Value::Nil => 0,
            Value::UInt(_) | Value::Int(_) | Value::F32(_) | Value::F64(_) => 1,
            Value::Str(_) => 2,
            Value::Bin(_) => 3,
            Value::Bool(_) => 4,
            Value::Array(_) => 5,
            Value::Map(_) => 6,
            Value::Ext(_) => 7,
        }
    }
}

impl<'a> From<&'a str> for Value<'a> {
    fn from(s: &'a str) -> Self {
        Value::Str(s)
    }
}

impl From<u64> for Value<'_> {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<i64> for Value<'_> {
    fn from(v: i64) -> Self {
        if v >= 0 {
            Value::UInt(v as u64)
        } else {
            Value::Int(v)
        }
    }
}

impl From<bool> for Value<'_> {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// An owned, `'static` scalar, used wherever a value must outlive the buffer
/// it came from: field default expressions, statistics samples, SQL bind
/// results.
#[derive(Debug, Clone, PartialEq)]
pub enum OwnedScalar {
    Nil,
    Bool(bool),
    UInt(u64),
    Int(i64),
    F64(f64),
    Str(String),
    Bin(Vec<u8>),
}

impl OwnedScalar {
    pub fn as_value(&self) -> Value<'_> {
        match self {
            OwnedScalar::Nil => Value::Nil,
            OwnedScalar::Bool(b) => Value::Bool(*b),
            OwnedScalar::UInt(u) => Value::UInt(*u),
            OwnedScalar::Int(i) => Value::Int(*i),
            OwnedScalar::F64(f) => Value::F64(*f),
            OwnedScalar::Str(s) => Value::Str(s),
            OwnedScalar::Bin(b) => Value::Bin(b),
        }
    }

    pub fn from_value(v: &Value) -> Self {
        match v {
            Value::Nil => OwnedScalar::Nil,
            Value::Bool(b) => OwnedScalar::Bool(*b),
            Value::UInt(u) => OwnedScalar::UInt(*u),
            Value::Int(i) => OwnedScalar::Int(*i),
            Value::F32(f) => OwnedScalar::F64(*f as f64),
            Value::F64(f) => OwnedScalar::F64(*f),
            Value::Str(s) => OwnedScalar::Str((*s).to_owned()),
            Value::Bin(b) => OwnedScalar::Bin((*b).to_owned()),
            Value::Array(_) | Value::Map(_) | Value::Ext(_) => OwnedScalar::Nil,
        }
    }
}
