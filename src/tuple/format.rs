//! Tuple format registry: interns "formats" (field-type vectors plus the
//! set of key parts whose offsets get cached) and assigns them compact ids.

use crate::error::{Error, Result};
use crate::msgpack::OwnedScalar;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

pub type FormatId = u32;

/// Declared SQL-ish type of a field, used both for tuple validation and for
/// `OP_ApplyType` coercion.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Unsigned,
    Integer,
    Float,
    Double,
    Boolean,
    String,
    Varbinary,
    Array,
    Map,
    Scalar,
    Any,
}

impl FieldType {
    /// Whether `value`'s runtime type is compatible with this declared type.
    pub fn accepts(&self, value: &crate::msgpack::Value) -> bool {
        use crate::msgpack::Value as V;
        match (self, value) {
            (_, V::Nil) => true, // nullability is checked separately
            (FieldType::Any, _) => true,
            (FieldType::Scalar, V::Array(_) | V::Map(_) | V::Ext(_)) => false,
            (FieldType::Scalar, _) => true,
            (FieldType::Unsigned, V::UInt(_)) => true,
            (FieldType::Integer, V::UInt(_) | V::Int(_)) => true,
            (FieldType::Float, V::F32(_) | V::F64(_) | V::UInt(_) | V::Int(_)) => true,
            (FieldType::Double, V::F64(_) | V::F32(_) | V::UInt(_) | V::Int(_)) => true,
            (FieldType::Boolean, V::Bool(_)) => true,
            (FieldType::String, V::Str(_)) => true,
            (FieldType::Varbinary, V::Bin(_)) => true,
            (FieldType::Array, V::Array(_)) => true,
            (FieldType::Map, V::Map(_)) => true,
            _ => false,
        }
    }
}

/// One field in a tuple format.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: Option<String>,
    pub field_type: FieldType,
    pub is_nullable: bool,
    pub is_optional: bool,
    pub default: Option<OwnedScalar>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: Some(name.into()),
            field_type,
            is_nullable: false,
            is_optional: false,
            default: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.is_nullable = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    pub fn with_default(mut self, default: OwnedScalar) -> Self {
        self.default = Some(default);
        self
    }

    // Structural equality ignores `name`/`default`, matching the
    // registry's interning key: two formats with the same shape but
    // different column names are still the same physical layout.
    fn structural_key(&self) -> (FieldType, bool, bool) {
        (self.field_type, self.is_nullable, self.is_optional)
    }
}

struct FormatInner {
    id: FormatId,
    fields: Vec<FieldDef>,
    cached_field_nos: Vec<u32>,
}

impl fmt::Debug for FormatInner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Format")
            .field("id", &self.id)
            .field("fields", &self.fields.len())
            .finish()
    }
}

/// A refcounted handle to an interned tuple format, shared by refcount and
/// immutable once created.
#[derive(Clone, Debug)]
pub struct Format(Rc<FormatInner>);

impl PartialEq for Format {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl Eq for Format {}

impl Format {
    pub fn id(&self) -> FormatId {
        self.0.id
    }

    pub fn field_count(&self) -> usize {
        self.0.fields.len()
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.0.fields
    }

    pub fn field(&self, fieldno: u32) -> Option<&FieldDef> {
        self.0.fields.get(fieldno as usize)
    }

    /// Field indices this format caches offsets for (the key parts named at
    /// registration time).
    pub fn cached_field_nos(&self) -> &[u32] {
        &self.0.cached_field_nos
    }

    /// Number of fields that must be materialized at minimum: every field
    /// up to the last non-optional one.
    pub fn min_field_count(&self) -> usize {
        self.0
            .fields
            .iter()
            .rposition(|f| !f.is_optional)
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    /// Live strong-reference count: a diagnostic view of the "no live tuple
    /// / key definition references it" eligibility rule for reclaiming a
    /// format's id.
    pub fn refcount(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

/// Interns formats by structural equality of field descriptors and assigns
/// compact, reusable ids.
#[derive(Default)]
pub struct FormatRegistry {
    slots: Vec<Option<Weak<FormatInner>>>,
    interned: HashMap<Vec<(FieldType, bool, bool)>, FormatId>,
    next_id: Cell<FormatId>,
}

const MAX_FORMATS: FormatId = 1 << 20;

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a format for `fields`, where `key_field_nos` lists every
    /// field index that some key definition will want cached offsets for.
    pub fn register(&mut self, fields: Vec<FieldDef>, key_field_nos: &[u32]) -> Result<Format> {
        let struct_key: Vec<_> = fields.iter().map(FieldDef::structural_key).collect();

        if let Some(&id) = self.interned.get(&struct_key) {
            if let Some(slot) = self.slots.get(id as usize).and_then(Option::as_ref) {
                if let Some(existing) = slot.upgrade() {
                    return Ok(Format(existing));
                }
            }
        }

        let id = self.alloc_id()?;
        let mut cached_field_nos: Vec<u32> = key_field_nos.to_vec();
        cached_field_nos.sort_unstable();
        cached_field_nos.dedup();

        let inner = Rc::new(FormatInner {
            id,
            fields,
            cached_field_nos,
        });
        self.put_slot(id, Rc::downgrade(&inner));
        self.interned.insert(struct_key, id);
        Ok(Format(inner))
    }

    pub fn by_id(&self, id: FormatId) -> Option<Format> {
        self.slots
            .get(id as usize)
            .and_then(Option::as_ref)
            .and_then(Weak::upgrade)
            .map(Format)
    }

    fn alloc_id(&mut self) -> Result<FormatId> {
        // Reuse the first dead slot before minting a new id.
        for (i, slot) in self.slots.iter().enumerate() {
            let dead = match slot {
                None => continue,
                Some(w) => w.upgrade().is_none(),
            };
            if dead {
                return Ok(i as FormatId);
            }
        }
        let id = self.next_id.get();
        if id >= MAX_FORMATS {
            return Err(Error::logic("too many formats"));
        }
        self.next_id.set(id + 1);
        Ok(id)
    }

    fn put_slot(&mut self, id: FormatId, weak: Weak<FormatInner>) {
        let idx = id as usize;
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        self.slots[idx] = Some(weak);
    }
}
