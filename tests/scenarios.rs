//! End-to-end scenarios driving the crate purely through its public API:
//! the SQL statement lifecycle (S4–S6) and the streaming merger (S1–S3).

use std::collections::HashMap;

use tarantool_core::collation::CollationRegistry;
use tarantool_core::index::{IndexIterator, VecIndexIterator};
use tarantool_core::keydef::{KeyDef, KeyPart, NullMode};
use tarantool_core::merger::{MergeOptions, Merger, MergerSource};
use tarantool_core::msgpack::{self, Value};
use tarantool_core::rowio::Envelope;
use tarantool_core::runtime::Runtime;
use tarantool_core::sequence::Sequence;
use tarantool_core::sql::bind::{BindParam, BindValue};
use tarantool_core::sql::stmt::{Statement, StmtStep};
use tarantool_core::sql::vm::Storage;
use tarantool_core::sql::TableCatalog;
use tarantool_core::tuple::{FieldDef, FieldType, Format, FormatRegistry, Tuple};

struct FakeStorage {
    format: Format,
    rows: Vec<Tuple>,
}

impl Storage for FakeStorage {
    fn format(&self) -> &Format {
        &self.format
    }
    fn insert(&mut self, tuple: Tuple) -> tarantool_core::Result<()> {
        self.rows.push(tuple);
        Ok(())
    }
    fn delete_by_secondary_key(&mut self, key_def: &KeyDef, probe: &Tuple) -> tarantool_core::Result<Option<Tuple>> {
        let collations = CollationRegistry::new();
        if let Some(pos) = self
            .rows
            .iter()
            .position(|r| key_def.compare(r, probe, &collations, NullMode::Default).unwrap() == std::cmp::Ordering::Equal)
        {
            return Ok(Some(self.rows.remove(pos)));
        }
        Ok(None)
    }
    fn iter(&self) -> Box<dyn IndexIterator> {
        Box::new(VecIndexIterator::new(self.rows.clone()))
    }
    fn len(&self) -> usize {
        self.rows.len()
    }
}

struct FakeCatalog {
    tables: HashMap<String, FakeStorage>,
    secondary: HashMap<String, Vec<KeyDef>>,
}

impl TableCatalog for FakeCatalog {
    fn storage_mut(&mut self, table: &str) -> tarantool_core::Result<&mut dyn Storage> {
        Ok(self.tables.get_mut(table).expect("unknown table in test catalog") as &mut dyn Storage)
    }
    fn unique_secondary_keys(&self, table: &str) -> &[KeyDef] {
        self.secondary.get(table).map(|v| v.as_slice()).unwrap_or(&[])
    }
    fn sequence(&self, _table: &str) -> Option<&Sequence> {
        None
    }
}

fn row(format: &Format, id: u64, b: &str) -> Tuple {
    let mut bytes = Vec::new();
    msgpack::encode(&Value::Array(vec![Value::UInt(id), Value::Str(b)]), &mut bytes);
    Tuple::new(format.clone(), &bytes).unwrap()
}

// S4. select :x + :y -> one row [5], then completion.
#[test]
fn s4_bound_addition_yields_one_row_then_completes() {
    let rt = Runtime::default();
    let mut stmt = Statement::prepare("select :x + :y", &rt).unwrap();
    stmt.bind(vec![
        BindParam::Named("x".into(), BindValue::Integer(2)),
        BindParam::Named("y".into(), BindValue::Integer(3)),
    ])
    .unwrap();
    match stmt.step(None).unwrap() {
        StmtStep::Row(row) => assert_eq!(row.len(), 1),
        StmtStep::Done { .. } => panic!("expected a row before completion"),
    }
    match stmt.step(None).unwrap() {
        StmtStep::Done { changes, autoinc_ids } => {
            assert_eq!(changes, 0);
            assert!(autoinc_ids.is_empty());
        }
        StmtStep::Row(_) => panic!("select yields exactly one row here"),
    }
}

// S5. insert into t select * from u -> xfer-copies every row, changes == row count.
#[test]
fn s5_insert_select_star_xfers_every_row() {
    let rt = Runtime::default();
    let mut reg = FormatRegistry::new();
    let format = reg
        .register(vec![FieldDef::new("id", FieldType::Unsigned), FieldDef::new("b", FieldType::String)], &[0])
        .unwrap();
    let src_rows: Vec<Tuple> = (0..500).map(|i| row(&format, i, "v")).collect();
    let mut tables = HashMap::new();
    tables.insert("u".to_string(), FakeStorage { format: format.clone(), rows: src_rows });
    tables.insert("t".to_string(), FakeStorage { format: format.clone(), rows: Vec::new() });
    let mut catalog = FakeCatalog { tables, secondary: HashMap::new() };

    let mut stmt = Statement::prepare("insert into t select * from u", &rt).unwrap();
    match stmt.step(Some(&mut catalog)).unwrap() {
        StmtStep::Done { changes, .. } => assert_eq!(changes, 500),
        StmtStep::Row(_) => panic!("DML never yields rows"),
    }
    assert_eq!(catalog.tables["t"].len(), 500);
    assert_eq!(catalog.tables["u"].len(), 500, "source table is untouched");
}

// S6. insert or replace into s values (2, 'x') -> deletes the row sharing
// the unique secondary key, replaces it with the new primary key.
#[test]
fn s6_insert_or_replace_resolves_via_secondary_key_probe() {
    let rt = Runtime::default();
    let mut reg = FormatRegistry::new();
    let format = reg
        .register(vec![FieldDef::new("id", FieldType::Unsigned), FieldDef::new("b", FieldType::String)], &[0])
        .unwrap();
    let existing = row(&format, 1, "x");
    let mut tables = HashMap::new();
    tables.insert("s".to_string(), FakeStorage { format: format.clone(), rows: vec![existing] });
    let key_def = KeyDef::new(vec![KeyPart::new(1, FieldType::String)]);
    let mut secondary = HashMap::new();
    secondary.insert("s".to_string(), vec![key_def]);
    let mut catalog = FakeCatalog { tables, secondary };

    let mut stmt = Statement::prepare("insert or replace into s values (2, 'x')", &rt).unwrap();
    match stmt.step(Some(&mut catalog)).unwrap() {
        StmtStep::Done { changes, .. } => assert_eq!(changes, 1),
        StmtStep::Row(_) => panic!("DML never yields rows"),
    }
    let rows = &catalog.tables["s"].rows;
    assert_eq!(rows.len(), 1, "the conflicting row was replaced, not duplicated");
    assert_eq!(rows[0].field(0).unwrap(), Some(Value::UInt(2)));
}

fn int_buffer(values: &[i64]) -> Vec<u8> {
    let mut body = Vec::new();
    msgpack::encode_array_header(values.len() as u32, &mut body);
    for &v in values {
        msgpack::encode(&Value::Array(vec![Value::Int(v)]), &mut body);
    }
    body
}

// S1. Single buffer source merges into the same sorted order it was given.
#[test]
fn s1_single_buffer_source_merge() {
    let rt = Runtime::default();
    let merger = Merger::new(vec![KeyPart::new(0, FieldType::Integer)], &rt).unwrap();
    let collations = CollationRegistry::new();
    let rows = merger
        .select(vec![MergerSource::Buffer(int_buffer(&[1, 2, 3]))], MergeOptions::default(), &collations)
        .unwrap();
    let values: Vec<i64> = rows.iter().map(|t| t.field(0).unwrap().unwrap().as_i64().unwrap()).collect();
    assert_eq!(values, vec![1, 2, 3]);
}

// S2. Two sources merged in descending order interleave correctly.
#[test]
fn s2_two_source_descending_merge() {
    let rt = Runtime::default();
    let merger = Merger::new(vec![KeyPart::new(0, FieldType::Integer)], &rt).unwrap();
    let collations = CollationRegistry::new();
    let options = MergeOptions { descending: true, ..MergeOptions::default() };
    let rows = merger
        .select(
            vec![MergerSource::Buffer(int_buffer(&[5, 3, 1])), MergerSource::Buffer(int_buffer(&[6, 4, 2]))],
            options,
            &collations,
        )
        .unwrap();
    let values: Vec<i64> = rows.iter().map(|t| t.field(0).unwrap().unwrap().as_i64().unwrap()).collect();
    assert_eq!(values, vec![6, 5, 4, 3, 2, 1]);
}

// S3. An initially-empty buffer source is refilled by `fetch_source` until
// the callback itself reports drained; expects exactly three invocations.
#[test]
fn s3_fetch_on_drain_refills_an_empty_buffer_source() {
    let rt = Runtime::default();
    let merger = Merger::new(vec![KeyPart::new(0, FieldType::Integer)], &rt).unwrap();
    let collations = CollationRegistry::new();
    let mut chunks = vec![int_buffer(&[2]), int_buffer(&[1])];
    let calls = std::rc::Rc::new(std::cell::Cell::new(0u32));
    let calls_inner = calls.clone();
    let options = MergeOptions {
        decode_envelope: Envelope::Raw,
        fetch_source: Some(Box::new(move |_ordinal, _last, _processed| {
            calls_inner.set(calls_inner.get() + 1);
            Ok(chunks.pop())
        })),
        ..MergeOptions::default()
    };
    let rows = merger.select(vec![MergerSource::Buffer(Vec::new())], options, &collations).unwrap();
    let values: Vec<i64> = rows.iter().map(|t| t.field(0).unwrap().unwrap().as_i64().unwrap()).collect();
    assert_eq!(values, vec![1, 2]);
    assert_eq!(calls.get(), 3);
}
