//! Key definition & comparators: describes how to pull a sort key out of a
//! tuple and how two such keys compare.

use crate::collation::{CollationId, CollationRegistry};
use crate::error::{Error, Result};
use crate::msgpack::{self, Value};
use crate::region::{Region, RegionSlice};
use crate::tuple::{FieldType, Tuple};
use std::cmp::Ordering;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// How a comparator should treat a pair of `nil`s. The default order (nulls
/// equal each other, greater than any non-null) can be overridden per call
/// to NULLEQ semantics (nulls equal each other, least of all).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NullMode {
    Default,
    Nulleq,
}

/// One field a key definition pulls out of a tuple.
#[derive(Debug, Clone)]
pub struct KeyPart {
    pub field_no: u32,
    pub field_type: FieldType,
    pub is_nullable: bool,
    pub is_optional: bool,
    pub sort_order: SortOrder,
    pub collation: Option<CollationId>,
    pub path: Option<String>,
}

impl KeyPart {
    pub fn new(field_no: u32, field_type: FieldType) -> Self {
        Self {
            field_no,
            field_type,
            is_nullable: false,
            is_optional: false,
            sort_order: SortOrder::Asc,
            collation: None,
            path: None,
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

    pub fn desc(mut self) -> Self {
        self.sort_order = SortOrder::Desc;
        self
    }

    pub fn with_collation(mut self, id: CollationId) -> Self {
        self.collation = Some(id);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// A compiled key definition: a list of [`KeyPart`]s plus the classification
/// flags that select which of the eight extractor variants to dispatch to.
#[derive(Debug, Clone)]
pub struct KeyDef {
    parts: Vec<KeyPart>,
    sequential: bool,
    contains_sequential_parts: bool,
    has_optional_parts: bool,
    has_json_paths: bool,
}

impl KeyDef {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        let has_json_paths = parts.iter().any(|p| p.path.is_some());
        let has_optional_parts = parts.iter().any(|p| p.is_optional);

        let mut contiguous = !parts.is_empty() && !has_json_paths;
        for w in parts.windows(2) {
            if w[1].field_no != w[0].field_no + 1 {
                contiguous = false;
                break;
            }
        }
        let sequential = contiguous;

        let contains_sequential_parts = parts.windows(2).any(|w| w[1].field_no == w[0].field_no + 1);

        Self {
            parts,
            sequential,
            contains_sequential_parts,
            has_optional_parts,
            has_json_paths,
        }
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// All parts cover a contiguous, ascending field range with no JSON
    /// sub-paths: eligible for the raw memcompare fast path.
    pub fn is_sequential(&self) -> bool {
        self.sequential
    }

    pub fn contains_sequential_parts(&self) -> bool {
        self.contains_sequential_parts
    }

    pub fn has_optional_parts(&self) -> bool {
        self.has_optional_parts
    }

    pub fn has_json_paths(&self) -> bool {
        self.has_json_paths
    }

    /// Which of the eight pre-compiled extractor variants this key
    /// definition dispatches to, named by its classification flags.
    pub fn variant(&self) -> ExtractorVariant {
        ExtractorVariant {
            sequential: self.sequential,
            contains_sequential_parts: self.contains_sequential_parts,
            has_optional_parts: self.has_optional_parts,
            has_json_paths: self.has_json_paths,
        }
    }

    fn fetch<'a>(&self, tuple: &'a Tuple, part: &KeyPart) -> Result<Option<Value<'a>>> {
        match &part.path {
            Some(path) => tuple.field_by_path(part.field_no, path),
            None => tuple.field(part.field_no),
        }
    }

    /// Compare two tuples' keys, honoring each part's sort order and the
    /// caller-supplied null mode.
    pub fn compare(
        &self,
        a: &Tuple,
        b: &Tuple,
        collations: &CollationRegistry,
        null_mode: NullMode,
    ) -> Result<Ordering> {
        for part in &self.parts {
            let va = self.fetch(a, part)?;
            let vb = self.fetch(b, part)?;
            let ord = compare_parts(va.as_ref(), vb.as_ref(), part, collations, null_mode);
            if ord != Ordering::Equal {
                return Ok(match part.sort_order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                });
            }
        }
        Ok(Ordering::Equal)
    }

    /// Build the pack-format `array` of length `part_count` this key
    /// definition extracts from `tuple`, allocated from `region`.
    pub fn extract_key(&self, tuple: &Tuple, region: &mut Region) -> Result<RegionSlice> {
        let mut values = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            let v = self.fetch(tuple, part)?.unwrap_or(Value::Nil);
            values.push(v);
        }
        let mut bytes = Vec::new();
        msgpack::encode(&Value::Array(values), &mut bytes);
        Ok(region.alloc_from(&bytes))
    }
}

/// The eight extractor/comparator variants, selected by a key definition's
/// classification flags.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExtractorVariant {
    pub sequential: bool,
    pub contains_sequential_parts: bool,
    pub has_optional_parts: bool,
    pub has_json_paths: bool,
}

fn compare_parts(
    a: Option<&Value>,
    b: Option<&Value>,
    part: &KeyPart,
    collations: &CollationRegistry,
    null_mode: NullMode,
) -> Ordering {
    let a_nil = a.map(Value::is_nil).unwrap_or(true);
    let b_nil = b.map(Value::is_nil).unwrap_or(true);
    match (a_nil, b_nil, null_mode) {
        (true, true, _) => return Ordering::Equal,
        (true, false, NullMode::Default) => return Ordering::Greater,
        (false, true, NullMode::Default) => return Ordering::Less,
        (true, false, NullMode::Nulleq) => return Ordering::Less,
        (false, true, NullMode::Nulleq) => return Ordering::Greater,
        (false, false, _) => {}
    }
    compare_values(a.unwrap(), b.unwrap(), part.collation, collations)
}

/// Compare two non-nil values, dispatching strings through a collation if
/// one is declared for the part, falling back to type-rank ordering for any
/// cross-type comparison a `scalar`/`any` key part permits.
pub fn compare_values(
    a: &Value,
    b: &Value,
    collation: Option<CollationId>,
    collations: &CollationRegistry,
) -> Ordering {
    match (a, b) {
        (Value::Str(s1), Value::Str(s2)) => {
            if let Some(c) = collation.and_then(|id| collations.lookup(id)) {
                c.compare(s1, s2)
            } else {
                s1.cmp(s2)
            }
        }
        (Value::Bin(b1), Value::Bin(b2)) => b1.cmp(b2),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => {
            if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                if matches!(a, Value::Int(_) | Value::UInt(_)) && matches!(b, Value::Int(_) | Value::UInt(_)) {
                    return x.cmp(&y);
                }
            }
            if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            }
            a.type_rank().cmp(&b.type_rank())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{FieldDef, FormatRegistry};

    fn tuple_of(values: &[Value]) -> Tuple {
        let mut reg = FormatRegistry::new();
        let fields = values
            .iter()
            .enumerate()
            .map(|(i, _)| FieldDef::new(format!("f{i}"), FieldType::Any).nullable())
            .collect();
        let format = reg.register(fields, &[]).unwrap();
        let mut bytes = Vec::new();
        msgpack::encode(&Value::Array(values.to_vec()), &mut bytes);
        Tuple::new(format, &bytes).unwrap()
    }

    #[test]
    fn classifies_contiguous_parts_as_sequential() {
        let kd = KeyDef::new(vec![
            KeyPart::new(0, FieldType::Unsigned),
            KeyPart::new(1, FieldType::Unsigned),
        ]);
        assert!(kd.is_sequential());
        assert!(!kd.has_json_paths());
    }

    #[test]
    fn json_path_part_disqualifies_sequential() {
        let kd = KeyDef::new(vec![KeyPart::new(0, FieldType::Any).with_path("a.b")]);
        assert!(!kd.is_sequential());
        assert!(kd.has_json_paths());
    }

    #[test]
    fn compare_honors_descending_sort_order() {
        let collations = CollationRegistry::new();
        let kd = KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned).desc()]);
        let a = tuple_of(&[Value::UInt(1)]);
        let b = tuple_of(&[Value::UInt(2)]);
        assert_eq!(
            kd.compare(&a, &b, &collations, NullMode::Default).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn default_null_mode_orders_nil_greatest() {
        let collations = CollationRegistry::new();
        let kd = KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned).nullable()]);
        let a = tuple_of(&[Value::Nil]);
        let b = tuple_of(&[Value::UInt(0)]);
        assert_eq!(
            kd.compare(&a, &b, &collations, NullMode::Default).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn nulleq_mode_orders_nil_least() {
        let collations = CollationRegistry::new();
        let kd = KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned).nullable()]);
        let a = tuple_of(&[Value::Nil]);
        let b = tuple_of(&[Value::UInt(0)]);
        assert_eq!(
            kd.compare(&a, &b, &collations, NullMode::Nulleq).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn extract_key_builds_array_of_part_count() {
        let kd = KeyDef::new(vec![KeyPart::new(1, FieldType::String)]);
        let t = tuple_of(&[Value::UInt(1), Value::Str("x")]);
        let mut region = Region::new();
        let slice = kd.extract_key(&t, &mut region).unwrap();
        let (n, _) = msgpack::decode_array_header(region.get(slice)).unwrap();
        assert_eq!(n, 1);
    }
}
