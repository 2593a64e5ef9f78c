//! Tuple object: an immutable row — an encoded pack-format array plus a
//! per-format offset index — shared by refcount.
//!
//! Refcounting here rides on [`Rc`], which already gives a wait-free,
//! never-a-dangling-reference guarantee without hand rolling unsafe
//! bookkeeping; [`Tuple::ref_`]/[`Tuple::unref`] are kept as named
//! operations (mirroring `tuple_ref`/`tuple_unref` in the original) that
//! simply wrap `Clone`/`Drop`, and [`Tuple::is_bigref`] exposes the
//! two-tier inline/promoted refcount marker, even though `Rc` itself never
//! actually needs a side table to hold an arbitrarily large count.

use super::format::Format;
use crate::error::{ClientErrorKind, Error, Result};
use crate::msgpack::{self, Value};
use std::cell::Cell;
use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;

/// Refcount threshold past which a tuple is considered "promoted" to the
/// slow/bigref representation. Purely a diagnostic marker here.
const INLINE_REF_MAX: usize = 2000;

struct TupleInner {
    format: Format,
    data: Box<[u8]>,
    /// Byte offset of each of `format.cached_field_nos()`'s fields, in the
    /// same order.
    offsets: Box<[u32]>,
    bigref: Cell<bool>,
}

/// An immutable, refcounted row.
#[derive(Clone)]
pub struct Tuple(Rc<TupleInner>);

impl Debug for Tuple {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match msgpack::decode(&self.0.data) {
            Ok((v, _)) => f.debug_tuple("Tuple").field(&v).finish(),
            Err(_) => f.debug_tuple("Tuple").field(&self.0.data).finish(),
        }
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Validate that `data` is a pack-format array compatible with `format`:
/// every field present matches its declared type/nullability, and any
/// field missing from the tail is either optional or default-valued.
pub fn check_tuple_raw(data: &[u8], format: &Format) -> Result<()> {
    let (n, mut rest) = msgpack::decode_array_header(data)
        .map_err(|e| Error::client(ClientErrorKind::InvalidMsgPack, e.to_string()))?;
    let n = n as usize;
    let min = format.min_field_count();
    if n < min {
        return Err(Error::client(
            ClientErrorKind::FieldType,
            format!(
                "tuple has {n} field(s), format requires at least {min}"
            ),
        ));
    }
    for i in 0..n {
        let (v, r) = msgpack::decode(rest)
            .map_err(|e| Error::client(ClientErrorKind::InvalidMsgPack, e.to_string()))?;
        rest = r;
        if let Some(field) = format.field(i as u32) {
            if v.is_nil() {
                if !field.is_nullable && field.default.is_none() {
                    return Err(Error::constraint(
                        crate::error::ConstraintKind::NotNull,
                        format!("field {i} is not nullable"),
                    ));
                }
            } else if !field.field_type.accepts(&v) {
                return Err(Error::client(
                    ClientErrorKind::FieldType,
                    format!("field {i} does not match declared type {:?}", field.field_type),
                ));
            }
        }
    }
    for field in format.fields().iter().skip(n) {
        if !field.is_optional && field.default.is_none() {
            return Err(Error::constraint(
                crate::error::ConstraintKind::NotNull,
                "missing required trailing field",
            ));
        }
    }
    Ok(())
}

fn compute_offsets(data: &[u8], format: &Format) -> Result<Box<[u32]>> {
    let cached = format.cached_field_nos();
    if cached.is_empty() {
        return Ok(Box::new([]));
    }
    let max_wanted = *cached.iter().max().unwrap();
    let (n, mut rest) = msgpack::decode_array_header(data)
        .map_err(|e| Error::client(ClientErrorKind::InvalidMsgPack, e.to_string()))?;
    let mut offsets = vec![u32::MAX; cached.len()];
    let base = data.len() - rest.len();
    let mut pos = base;
    for i in 0..n.min(max_wanted + 1) {
        if let Ok(slot) = cached.binary_search(&i) {
            offsets[slot] = pos as u32;
        }
        let before = rest.len();
        rest = msgpack::skip(rest)
            .map_err(|e| Error::client(ClientErrorKind::InvalidMsgPack, e.to_string()))?;
        pos += before - rest.len();
    }
    Ok(offsets.into_boxed_slice())
}

impl Tuple {
    /// Build a new tuple from raw pack-format array bytes, validating
    /// against `format` and computing the cached field-offset vector.
    pub fn new(format: Format, data: &[u8]) -> Result<Self> {
        check_tuple_raw(data, &format)?;
        let offsets = compute_offsets(data, &format)?;
        Ok(Tuple(Rc::new(TupleInner {
            format,
            data: data.to_vec().into_boxed_slice(),
            offsets,
            bigref: Cell::new(false),
        })))
    }

    pub fn format(&self) -> Format {
        self.0.format.clone()
    }

    /// Number of fields (the size of the pack-format array).
    pub fn len(&self) -> u32 {
        msgpack::decode_array_header(&self.0.data)
            .map(|(n, _)| n)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw encoded bytes, the single top-level pack-format `array`.
    pub fn data(&self) -> &[u8] {
        &self.0.data
    }

    pub fn bsize(&self) -> usize {
        self.0.data.len()
    }

    /// Deserialize the field at zero-based `fieldno`. Uses the cached
    /// offset if the format indexed this field; otherwise walks the array.
    pub fn field(&self, fieldno: u32) -> Result<Option<Value<'_>>> {
        let cached = self.0.format.cached_field_nos();
        if let Ok(slot) = cached.binary_search(&fieldno) {
            let off = self.0.offsets[slot];
            if off == u32::MAX {
                return Ok(None);
            }
            let (v, _) = msgpack::decode(&self.0.data[off as usize..])
                .map_err(|e| Error::client(ClientErrorKind::InvalidMsgPack, e.to_string()))?;
            return Ok(Some(v));
        }
        let (n, mut rest) = msgpack::decode_array_header(&self.0.data)
            .map_err(|e| Error::client(ClientErrorKind::InvalidMsgPack, e.to_string()))?;
        if fieldno >= n {
            return Ok(None);
        }
        for i in 0..=fieldno {
            if i == fieldno {
                let (v, _) = msgpack::decode(rest)
                    .map_err(|e| Error::client(ClientErrorKind::InvalidMsgPack, e.to_string()))?;
                return Ok(Some(v));
            }
            rest = msgpack::skip(rest)
                .map_err(|e| Error::client(ClientErrorKind::InvalidMsgPack, e.to_string()))?;
        }
        unreachable!()
    }

    /// Deserialize the field at `fieldno`, then follow `path` into it.
    pub fn field_by_path(&self, fieldno: u32, path: &str) -> Result<Option<Value<'_>>> {
        let Some(root) = self.field(fieldno)? else {
            return Ok(None);
        };
        Ok(follow_json_path(root, path))
    }

    /// Increment the refcount, returning a new handle. Named for parity
    /// with `ref(tuple)`; equivalent to [`Clone::clone`].
    pub fn ref_(&self) -> Self {
        let n = Rc::strong_count(&self.0);
        if n + 1 > INLINE_REF_MAX {
            self.0.bigref.set(true);
        }
        self.clone()
    }

    /// Decrement the refcount. Named for parity with `unref(tuple)`;
    /// equivalent to dropping the handle.
    pub fn unref(self) {
        drop(self)
    }

    pub fn refcount(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Whether this tuple's refcount has ever crossed the inline threshold
    /// and been "promoted" to the side-table representation.
    pub fn is_bigref(&self) -> bool {
        self.0.bigref.get()
    }
}

#[derive(Debug, Clone, Copy)]
enum PathSegment<'a> {
    Key(&'a str),
    Index(usize),
}

fn parse_json_path(path: &str) -> Vec<PathSegment<'_>> {
    let mut segments = Vec::new();
    for dot_part in path.trim_start_matches('.').split('.') {
        let mut rest = dot_part;
        if let Some(bracket) = rest.find('[') {
            let (key, tail) = rest.split_at(bracket);
            if !key.is_empty() {
                segments.push(PathSegment::Key(key));
            }
            rest = tail;
            while let Some(close) = rest.find(']') {
                let idx_str = &rest[1..close];
                if let Ok(idx) = idx_str.parse::<usize>() {
                    segments.push(PathSegment::Index(idx));
                } else {
                    segments.push(PathSegment::Key(idx_str.trim_matches('"')));
                }
                rest = &rest[close + 1..];
            }
        } else if !rest.is_empty() {
            segments.push(PathSegment::Key(rest));
        }
    }
    segments
}

fn follow_json_path<'a>(mut value: Value<'a>, path: &str) -> Option<Value<'a>> {
    for segment in parse_json_path(path) {
        value = match (segment, value) {
            (PathSegment::Index(i), Value::Array(mut items)) => {
                if i >= items.len() {
                    return None;
                }
                items.swap_remove(i)
            }
            (PathSegment::Key(k), Value::Map(items)) => {
                items
                    .into_iter()
                    .find(|(key, _)| key.as_str() == Some(k))
                    .map(|(_, v)| v)?
            }
            _ => return None,
        };
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgpack::Value;
    use crate::tuple::format::{FieldDef, FieldType, FormatRegistry};

    fn encode_array(values: &[Value]) -> Vec<u8> {
        let mut out = Vec::new();
        msgpack::encode(&Value::Array(values.to_vec()), &mut out);
        out
    }

    #[test]
    fn field_access_by_index() {
        let mut reg = FormatRegistry::new();
        let format = reg
            .register(
                vec![
                    FieldDef::new("id", FieldType::Unsigned),
                    FieldDef::new("name", FieldType::String),
                ],
                &[0],
            )
            .unwrap();
        let data = encode_array(&[Value::UInt(1), Value::Str("alice")]);
        let tuple = Tuple::new(format, &data).unwrap();
        assert_eq!(tuple.len(), 2);
        assert_eq!(tuple.field(0).unwrap(), Some(Value::UInt(1)));
        assert_eq!(tuple.field(1).unwrap(), Some(Value::Str("alice")));
        assert_eq!(tuple.field(2).unwrap(), None);
    }

    #[test]
    fn rejects_wrong_type() {
        let mut reg = FormatRegistry::new();
        let format = reg
            .register(vec![FieldDef::new("id", FieldType::Unsigned)], &[])
            .unwrap();
        let data = encode_array(&[Value::Str("not a number")]);
        assert!(Tuple::new(format, &data).is_err());
    }

    #[test]
    fn rejects_missing_required_trailing_field() {
        let mut reg = FormatRegistry::new();
        let format = reg
            .register(
                vec![
                    FieldDef::new("id", FieldType::Unsigned),
                    FieldDef::new("name", FieldType::String),
                ],
                &[],
            )
            .unwrap();
        let data = encode_array(&[Value::UInt(1)]);
        assert!(Tuple::new(format, &data).is_err());
    }

    #[test]
    fn accepts_missing_optional_trailing_field() {
        let mut reg = FormatRegistry::new();
        let format = reg
            .register(
                vec![
                    FieldDef::new("id", FieldType::Unsigned),
                    FieldDef::new("nick", FieldType::String).optional(),
                ],
                &[],
            )
            .unwrap();
        let data = encode_array(&[Value::UInt(1)]);
        let tuple = Tuple::new(format, &data).unwrap();
        assert_eq!(tuple.field(1).unwrap(), None);
    }

    #[test]
    fn refcount_tracks_clones() {
        let mut reg = FormatRegistry::new();
        let format = reg
            .register(vec![FieldDef::new("id", FieldType::Unsigned)], &[])
            .unwrap();
        let data = encode_array(&[Value::UInt(7)]);
        let t1 = Tuple::new(format, &data).unwrap();
        assert_eq!(t1.refcount(), 1);
        let t2 = t1.ref_();
        assert_eq!(t1.refcount(), 2);
        t2.unref();
        assert_eq!(t1.refcount(), 1);
    }

    #[test]
    fn json_sub_path_navigates_nested_value() {
        let nested = Value::Map(vec![(
            Value::Str("a"),
            Value::Array(vec![Value::UInt(10), Value::UInt(20)]),
        )]);
        let got = follow_json_path(nested, "a[1]");
        assert_eq!(got, Some(Value::UInt(20)));
    }
}
