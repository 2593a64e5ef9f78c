//! SQL bind & parameter pipe: decodes a packed parameter list from the wire
//! format and resolves each entry against a prepared statement's parameter
//! table.

use crate::error::{ClientErrorKind, Error, Result};
use crate::msgpack::{self, Value};
use crate::runtime::Limits;

/// The normalized SQL bind type a decoded value is coerced to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BindType {
    Integer,
    Float,
    Text,
    Blob,
    Null,
}

/// A single bound parameter value, already coerced to one of the five
/// SQL bind types.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl BindValue {
    pub fn bind_type(&self) -> BindType {
        match self {
            BindValue::Null => BindType::Null,
            BindValue::Integer(_) => BindType::Integer,
            BindValue::Float(_) => BindType::Float,
            BindValue::Text(_) => BindType::Text,
            BindValue::Blob(_) => BindType::Blob,
        }
    }
}

/// One element of a decoded bind list: either a positional bind (1-based
/// ordinal, in order of appearance) or a named bind.
#[derive(Debug, Clone)]
pub enum BindParam {
    Positional(u32, BindValue),
    Named(String, BindValue),
}

fn to_bind_value(v: Value) -> Result<BindValue> {
    Ok(match v {
        Value::Nil => BindValue::Null,
        Value::Bool(b) => BindValue::Integer(b as i64),
        Value::UInt(u) => BindValue::Integer(i64::try_from(u).map_err(|_| {
            Error::client(ClientErrorKind::BindValue, "unsigned bind value out of i64 range")
        })?),
        Value::Int(i) => BindValue::Integer(i),
        Value::F32(f) => BindValue::Float(f as f64),
        Value::F64(f) => BindValue::Float(f),
        Value::Str(s) => BindValue::Text(s.to_owned()),
        Value::Bin(b) => BindValue::Blob(b.to_owned()),
        Value::Array(_) | Value::Map(_) | Value::Ext(_) => {
            return Err(Error::client(ClientErrorKind::BindType, "arrays and maps cannot be bound"))
        }
    })
}

/// Decode the wire-format bind list: a top-level array whose elements are
/// either a scalar (positional) or a one-entry map (named).
pub fn decode_params(data: &[u8], limits: &Limits) -> Result<Vec<BindParam>> {
    let (count, mut rest) = msgpack::decode_array_header(data)?;
    if count > limits.bind_parameter_max {
        return Err(Error::client(
            ClientErrorKind::BindParameterMax,
            format!("{count} parameters exceeds the limit of {}", limits.bind_parameter_max),
        ));
    }
    let mut params = Vec::with_capacity(count as usize);
    for i in 0..count {
        let (value, r) = msgpack::decode(rest)?;
        rest = r;
        let param = match value {
            Value::Map(mut entries) if entries.len() == 1 => {
                let (k, v) = entries.pop().unwrap();
                let name = k
                    .as_str()
                    .ok_or_else(|| Error::client(ClientErrorKind::BindType, "named bind key must be a string"))?
                    .to_owned();
                BindParam::Named(name, to_bind_value(v)?)
            }
            other => BindParam::Positional(i + 1, to_bind_value(other)?),
        };
        params.push(param);
    }
    Ok(params)
}

/// A prepared statement's declared parameter table: one slot per `?`/`:name`
/// placeholder, in source order.
#[derive(Debug, Clone, Default)]
pub struct ParamTable {
    names: Vec<Option<String>>,
}

impl ParamTable {
    pub fn new(names: Vec<Option<String>>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn index_of_name(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n.as_deref() == Some(name))
    }

    /// Resolve decoded `params` against this table, returning one slot per
    /// declared parameter (`None` for any left unbound).
    pub fn resolve(&self, params: Vec<BindParam>) -> Result<Vec<Option<BindValue>>> {
        let mut slots: Vec<Option<BindValue>> = vec![None; self.names.len()];
        for param in params {
            match param {
                BindParam::Positional(ord, value) => {
                    let idx = ord as usize - 1;
                    if idx >= slots.len() {
                        return Err(Error::client(
                            ClientErrorKind::BindNotFound,
                            format!("bind parameter {ord} not declared by this statement"),
                        ));
                    }
                    slots[idx] = Some(value);
                }
                BindParam::Named(name, value) => {
                    let idx = self.index_of_name(&name).ok_or_else(|| {
                        Error::client(ClientErrorKind::BindNotFound, format!("no bind parameter named {name}"))
                    })?;
                    slots[idx] = Some(value);
                }
            }
        }
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(values: &[Value]) -> Vec<u8> {
        let mut out = Vec::new();
        msgpack::encode(&Value::Array(values.to_vec()), &mut out);
        out
    }

    #[test]
    fn decodes_positional_scalars() {
        let data = encode(&[Value::UInt(1), Value::Str("x")]);
        let params = decode_params(&data, &Limits::default()).unwrap();
        assert!(matches!(params[0], BindParam::Positional(1, BindValue::Integer(1))));
        assert!(matches!(&params[1], BindParam::Positional(2, BindValue::Text(s)) if s == "x"));
    }

    #[test]
    fn booleans_coerce_to_integer() {
        let data = encode(&[Value::Bool(true)]);
        let params = decode_params(&data, &Limits::default()).unwrap();
        assert!(matches!(params[0], BindParam::Positional(1, BindValue::Integer(1))));
    }

    #[test]
    fn named_bind_is_single_entry_map() {
        let data = encode(&[Value::Map(vec![(Value::Str("id"), Value::UInt(5))])]);
        let params = decode_params(&data, &Limits::default()).unwrap();
        assert!(matches!(&params[0], BindParam::Named(n, BindValue::Integer(5)) if n == "id"));
    }

    #[test]
    fn arrays_are_rejected() {
        let data = encode(&[Value::Array(vec![Value::UInt(1)])]);
        assert!(decode_params(&data, &Limits::default()).is_err());
    }

    #[test]
    fn exceeding_bind_parameter_max_is_an_error() {
        let mut limits = Limits::default();
        limits.bind_parameter_max = 1;
        let data = encode(&[Value::UInt(1), Value::UInt(2)]);
        assert!(decode_params(&data, &limits).is_err());
    }

    #[test]
    fn resolve_by_name_fills_correct_slot() {
        let table = ParamTable::new(vec![Some("a".into()), Some("b".into())]);
        let resolved = table
            .resolve(vec![BindParam::Named("b".into(), BindValue::Integer(2))])
            .unwrap();
        assert_eq!(resolved[0], None);
        assert_eq!(resolved[1], Some(BindValue::Integer(2)));
    }

    #[test]
    fn resolve_unknown_ordinal_is_bind_not_found() {
        let table = ParamTable::new(vec![Some("a".into())]);
        let err = table
            .resolve(vec![BindParam::Positional(2, BindValue::Integer(1))])
            .unwrap_err();
        assert_eq!(err.code(), Error::client(ClientErrorKind::BindNotFound, "").code());
    }
}
