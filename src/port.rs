//! Row sink ("port"): a polymorphic row collector with a dump-to-wire-buffer
//! operation and, for the host-language variant, a dump-to-host-stack
//! operation.
//!
//! The original represents the three shapes as one tagged struct living in
//! a fixed-size opaque slot so any variant can be placed into the same
//! stack storage. An enum dispatching over owned variants is the idiomatic
//! equivalent here — there's no stack-allocation trick to replicate once
//! the storage no longer has to be ABI-compatible with a C union.

use crate::error::Result;
use crate::tuple::{FieldType, Tuple};

/// Column metadata surfaced in the `METADATA` array of a rows-with-metadata
/// SQL response.
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
    pub field_type: FieldType,
}

/// Anything a host-language port can push decoded rows onto. Implemented
/// by the embedding layer, out of scope here — an external collaborator
/// contract only.
pub trait HostSink {
    fn push(&mut self, tuple: &Tuple) -> Result<()>;
}

/// An append-only sequence of tuple references: the shared base every port
/// shape builds on.
#[derive(Debug, Default)]
pub struct TuplePort {
    tuples: Vec<Tuple>,
}

impl TuplePort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tuple: Tuple) {
        self.tuples.push(tuple);
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    /// Encode held tuples as a pack-format array of tuples, appended to
    /// `out` only if the whole encode succeeds: a failed dump must not
    /// disturb the buffer's observable write cursor.
    pub fn dump_msgpack(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut scratch = Vec::new();
        crate::msgpack::encode_array_header(self.tuples.len() as u32, &mut scratch);
        for tuple in &self.tuples {
            scratch.extend_from_slice(tuple.data());
        }
        out.extend_from_slice(&scratch);
        Ok(())
    }

    /// Drop every held tuple reference.
    pub fn destroy(self) {
        drop(self)
    }
}

/// The SQL sink: a tuple port plus the bookkeeping the wire envelope needs —
/// result-set metadata, a row-modification counter, and the autoinc trail —
/// plus the prepared statement it was created for, so that destroying the
/// sink also finalizes the statement.
pub struct SqlPort {
    rows: TuplePort,
    metadata: Vec<ColumnMeta>,
    row_count: u64,
    autoinc_ids: Vec<i64>,
    stmt: Option<crate::sql::stmt::Statement>,
}

impl SqlPort {
    pub fn new(metadata: Vec<ColumnMeta>, stmt: crate::sql::stmt::Statement) -> Self {
        Self {
            rows: TuplePort::new(),
            metadata,
            row_count: 0,
            autoinc_ids: Vec::new(),
            stmt: Some(stmt),
        }
    }

    pub fn push_row(&mut self, tuple: Tuple) {
        self.rows.push(tuple);
    }

    pub fn record_change(&mut self) {
        self.row_count += 1;
    }

    pub fn record_autoinc_id(&mut self, id: i64) {
        self.autoinc_ids.push(id);
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Encode the envelope: rows+metadata if any row was produced,
    /// otherwise `SQL_INFO` (with `AUTOINCREMENT_IDS` when the autoinc
    /// trail is non-empty).
    pub fn dump_msgpack(&self, out: &mut Vec<u8>) -> Result<()> {
        use crate::msgpack::Value;

        let envelope = if !self.rows.is_empty() {
            let metadata = Value::Array(
                self.metadata
                    .iter()
                    .map(|c| {
                        Value::Map(vec![
                            (Value::Str("FIELD_NAME"), Value::Str(&c.name)),
                            (Value::Str("FIELD_TYPE"), Value::Str(field_type_name(c.field_type))),
                        ])
                    })
                    .collect(),
            );
            let mut data = Vec::with_capacity(self.rows.len());
            for tuple in self.rows.tuples() {
                let (v, _) = crate::msgpack::decode(tuple.data())?;
                data.push(v);
            }
            Value::Map(vec![
                (Value::Str("METADATA"), metadata),
                (Value::Str("DATA"), Value::Array(data)),
            ])
        } else if self.autoinc_ids.is_empty() {
            Value::Map(vec![(
                Value::Str("SQL_INFO"),
                Value::Map(vec![(Value::Str("ROW_COUNT"), Value::UInt(self.row_count))]),
            )])
        } else {
            Value::Map(vec![(
                Value::Str("SQL_INFO"),
                Value::Map(vec![
                    (Value::Str("ROW_COUNT"), Value::UInt(self.row_count)),
                    (
                        Value::Str("AUTOINCREMENT_IDS"),
                        Value::Array(self.autoinc_ids.iter().map(|&id| Value::from(id)).collect()),
                    ),
                ]),
            )])
        };

        let mut scratch = Vec::new();
        crate::msgpack::encode(&envelope, &mut scratch);
        out.extend_from_slice(&scratch);
        Ok(())
    }

    /// Drop held tuple references and finalize the embedded statement.
    pub fn destroy(mut self) {
        if let Some(stmt) = self.stmt.take() {
            stmt.finalize();
        }
    }
}

fn field_type_name(t: FieldType) -> &'static str {
    match t {
        FieldType::Unsigned => "unsigned",
        FieldType::Integer => "integer",
        FieldType::Float => "float",
        FieldType::Double => "double",
        FieldType::Boolean => "boolean",
        FieldType::String => "string",
        FieldType::Varbinary => "varbinary",
        FieldType::Array => "array",
        FieldType::Map => "map",
        FieldType::Scalar => "scalar",
        FieldType::Any => "any",
    }
}

/// An adapter that pushes decoded rows onto a host-language stack instead
/// of (or in addition to) a wire buffer.
pub struct HostPort<'a> {
    sink: &'a mut dyn HostSink,
}

impl<'a> HostPort<'a> {
    pub fn new(sink: &'a mut dyn HostSink) -> Self {
        Self { sink }
    }

    pub fn dump_host(&mut self, tuple: &Tuple) -> Result<()> {
        self.sink.push(tuple)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgpack::{self, Value};
    use crate::tuple::{FieldDef, FormatRegistry};

    fn sample_tuple() -> Tuple {
        let mut reg = FormatRegistry::new();
        let format = reg
            .register(vec![FieldDef::new("id", FieldType::Unsigned)], &[])
            .unwrap();
        let mut bytes = Vec::new();
        msgpack::encode(&Value::Array(vec![Value::UInt(1)]), &mut bytes);
        Tuple::new(format, &bytes).unwrap()
    }

    #[test]
    fn tuple_port_dumps_array_of_tuples() {
        let mut port = TuplePort::new();
        port.push(sample_tuple());
        port.push(sample_tuple());
        let mut out = Vec::new();
        port.dump_msgpack(&mut out).unwrap();
        let (n, _) = msgpack::decode_array_header(&out).unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn sql_port_without_rows_emits_sql_info() {
        let stmt = crate::sql::stmt::Statement::for_test("select 1");
        let mut port = SqlPort::new(vec![], stmt);
        port.record_change();
        port.record_change();
        let mut out = Vec::new();
        port.dump_msgpack(&mut out).unwrap();
        let (v, _) = msgpack::decode(&out).unwrap();
        match v {
            Value::Map(entries) => {
                assert_eq!(entries[0].0, Value::Str("SQL_INFO"));
            }
            _ => panic!("expected a map"),
        }
    }

    #[test]
    fn sql_port_with_autoinc_ids_includes_trail() {
        let stmt = crate::sql::stmt::Statement::for_test("insert into t values (null)");
        let mut port = SqlPort::new(vec![], stmt);
        port.record_change();
        port.record_autoinc_id(7);
        let mut out = Vec::new();
        port.dump_msgpack(&mut out).unwrap();
        let (v, _) = msgpack::decode(&out).unwrap();
        let Value::Map(entries) = v else { panic!("expected a map") };
        let Value::Map(info) = &entries[0].1 else { panic!("expected SQL_INFO map") };
        assert_eq!(info.len(), 2);
    }
}
