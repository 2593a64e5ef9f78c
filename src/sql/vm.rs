//! SQL bytecode executor: a register-based VM that streams rows, drives
//! cursors over the index iterator contract, coerces types and writes into
//! row sinks.
//!
//! `struct Vdbe` represents each instruction as an untyped `(opcode, p1, p2,
//! p3, p4_kind, p4_value, p5_flags)` tuple. The idiomatic Rust rendition is
//! a tagged [`Op`] enum whose variants carry the same operands under
//! descriptive field names instead of positional `p1..p5` slots — the
//! fields line up one-for-one with each opcode's actual operands.

use crate::collation::CollationRegistry;
use crate::error::{ClientErrorKind, ConstraintKind, Error, HaltCode, Result};
use crate::index::IndexIterator;
use crate::keydef::{KeyDef, NullMode};
use crate::sql::conflict::{self, ConflictAction, OnConflict};
use crate::tuple::{Format, Tuple};
use std::cmp::Ordering;

/// A tagged register value. Sub-program call frames are folded into
/// [`Frame`] — an explicit stack — rather than modeled as register
/// contents, since nothing here keeps a running aggregate accumulator in a
/// register.
#[derive(Debug, Clone, PartialEq)]
pub enum RegValue {
    Null,
    Int64(i64),
    Double(f64),
    Bool(bool),
    Str(String),
    Blob(Vec<u8>),
}

impl RegValue {
    pub fn from_bind(v: &crate::sql::bind::BindValue) -> Self {
        use crate::sql::bind::BindValue as B;
        match v {
            B::Null => RegValue::Null,
            B::Integer(i) => RegValue::Int64(*i),
            B::Float(f) => RegValue::Double(*f),
            B::Text(s) => RegValue::Str(s.clone()),
            B::Blob(b) => RegValue::Blob(b.clone()),
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, RegValue::Int64(_) | RegValue::Double(_) | RegValue::Bool(_))
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            RegValue::Int64(i) => Some(*i as f64),
            RegValue::Double(d) => Some(*d),
            RegValue::Bool(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            RegValue::Int64(i) => Some(*i),
            RegValue::Bool(b) => Some(*b as i64),
            RegValue::Double(d) if d.fract() == 0.0 => Some(*d as i64),
            _ => None,
        }
    }

    /// `OP_ApplyType` for a single register: INTEGER target truncates
    /// floats under an exact-equality check, TEXT formats numbers, BLOB is
    /// a no-op for string/blob and an error otherwise.
    pub fn apply_type(self, target: &crate::tuple::FieldType) -> Result<Self> {
        use crate::tuple::FieldType as T;
        if matches!(self, RegValue::Null) {
            return Ok(self);
        }
        Ok(match target {
            T::Unsigned | T::Integer => {
                let i = self.as_i64().ok_or_else(|| {
                    Error::client(ClientErrorKind::FieldType, "value is not exactly representable as an integer")
                })?;
                if matches!(target, T::Unsigned) && i < 0 {
                    return Err(Error::client(ClientErrorKind::FieldType, "negative value for UNSIGNED column"));
                }
                RegValue::Int64(i)
            }
            T::Float | T::Double => {
                let f = self
                    .as_f64()
                    .ok_or_else(|| Error::client(ClientErrorKind::FieldType, "value is not numeric"))?;
                RegValue::Double(f)
            }
            T::String | T::Scalar | T::Any => match self {
                RegValue::Str(_) => self,
                RegValue::Int64(i) => RegValue::Str(i.to_string()),
                RegValue::Double(d) => RegValue::Str(format!("{d}")),
                RegValue::Bool(b) => RegValue::Str(b.to_string()),
                other => other,
            },
            T::Varbinary => match self {
                RegValue::Blob(_) | RegValue::Str(_) => self,
                _ => return Err(Error::client(ClientErrorKind::FieldType, "value is not a string or blob")),
            },
            T::Boolean => match self {
                RegValue::Bool(_) => self,
                RegValue::Int64(i) => RegValue::Bool(i != 0),
                _ => return Err(Error::client(ClientErrorKind::FieldType, "value is not boolean")),
            },
            T::Array | T::Map => self,
        })
    }
}

/// How two NULL-able operands compare, carried as an instruction's P5 flag.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompareNulls {
    /// Any NULL operand makes the whole comparison NULL (propagates; here
    /// modeled as "never equal, never ordered" — the caller's jump-on-null
    /// handling decides what to do).
    Propagate,
    Nulleq,
}

/// A cursor: the VM's view of an index, a sorter, or a single-row
/// pseudo-table.
pub enum Cursor {
    Index {
        iter: Box<dyn IndexIterator>,
        current: Option<Tuple>,
    },
    Sorter {
        rows: Vec<Tuple>,
        pos: usize,
    },
    Pseudo(Option<Tuple>),
}

impl Cursor {
    pub fn from_iterator(iter: Box<dyn IndexIterator>) -> Self {
        Cursor::Index { iter, current: None }
    }

    pub fn from_sorted(rows: Vec<Tuple>) -> Self {
        Cursor::Sorter { rows, pos: 0 }
    }

    pub fn from_single(tuple: Tuple) -> Self {
        Cursor::Pseudo(Some(tuple))
    }

    fn rewind(&mut self) -> Result<bool> {
        match self {
            Cursor::Index { iter, current } => {
                *current = iter.next()?;
                Ok(current.is_some())
            }
            Cursor::Sorter { rows, pos } => {
                *pos = 0;
                Ok(!rows.is_empty())
            }
            Cursor::Pseudo(t) => Ok(t.is_some()),
        }
    }

    fn advance(&mut self) -> Result<bool> {
        match self {
            Cursor::Index { iter, current } => {
                *current = iter.next()?;
                Ok(current.is_some())
            }
            Cursor::Sorter { rows, pos } => {
                *pos += 1;
                Ok(*pos < rows.len())
            }
            Cursor::Pseudo(t) => {
                *t = None;
                Ok(false) // a pseudo-table cursor never advances past its one row
            }
        }
    }

    fn current(&self) -> Option<&Tuple> {
        match self {
            Cursor::Index { current, .. } => current.as_ref(),
            Cursor::Sorter { rows, pos } => rows.get(*pos),
            Cursor::Pseudo(t) => t.as_ref(),
        }
    }
}

/// One frame of the explicit sub-program stack: rather than a host
/// coroutine, invoking a sub-program (e.g. a trigger body) pushes the
/// caller's program counter and register window here.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub return_pc: usize,
    pub register_base: usize,
}

/// A single VM instruction. Operand names describe each opcode's actual
/// operands rather than the original's positional `p1..p5`.
#[derive(Debug, Clone)]
pub enum Op {
    LoadNull { dst: usize },
    LoadInt { dst: usize, value: i64 },
    LoadReal { dst: usize, value: f64 },
    LoadStr { dst: usize, value: String },
    LoadBind { dst: usize, slot: usize },
    Copy { dst: usize, src: usize },
    Add { dst: usize, lhs: usize, rhs: usize },
    ApplyType { base: usize, count: usize, types: Vec<crate::tuple::FieldType> },
    Compare { lhs: usize, rhs: usize, collation: Option<crate::collation::CollationId>, null_mode: CompareNulls },
    Eq { lhs: usize, rhs: usize, jump_if_true: usize },
    Ne { lhs: usize, rhs: usize, jump_if_true: usize },
    Lt { lhs: usize, rhs: usize, jump_if_true: usize },
    Le { lhs: usize, rhs: usize, jump_if_true: usize },
    Gt { lhs: usize, rhs: usize, jump_if_true: usize },
    Ge { lhs: usize, rhs: usize, jump_if_true: usize },
    HaltIfNull { reg: usize, code: HaltCode, message: &'static str },
    IteratorOpen { cursor: usize },
    Rewind { cursor: usize, jump_if_empty: usize },
    Next { cursor: usize, jump_if_has_row: usize },
    Prev { cursor: usize, jump_if_has_row: usize },
    Column { cursor: usize, field_no: u32, dst: usize },
    ResultRow { base: usize, count: usize },
    Goto { target: usize },
    Halt { code: HaltCode },
}

/// Loaded values decoded back out of the cursor's current tuple are plain
/// msgpack `Value`s; `Column` converts them into register values.
fn value_to_reg(v: Option<crate::msgpack::Value<'_>>) -> RegValue {
    use crate::msgpack::Value as V;
    match v {
        None | Some(V::Nil) => RegValue::Null,
        Some(V::Bool(b)) => RegValue::Bool(b),
        Some(V::UInt(u)) => RegValue::Int64(u as i64),
        Some(V::Int(i)) => RegValue::Int64(i),
        Some(V::F32(f)) => RegValue::Double(f as f64),
        Some(V::F64(f)) => RegValue::Double(f),
        Some(V::Str(s)) => RegValue::Str(s.to_owned()),
        Some(V::Bin(b)) => RegValue::Blob(b.to_owned()),
        Some(_) => RegValue::Null,
    }
}

/// Map a non-`Ok` halt code back to the `Error` variant whose `halt_code()`
/// reconstructs it, for `OP_HaltIfNull`.
fn error_for_halt(code: HaltCode, message: &str) -> Error {
    match code {
        HaltCode::Constraint(kind) => Error::constraint(kind, message.to_string()),
        HaltCode::Schema => Error::Schema(message.to_string()),
        HaltCode::Interrupt => Error::Interrupted,
        HaltCode::NoMem => Error::OutOfMemory { size: 0, allocator: "vm", purpose: "halt" },
        HaltCode::Ok | HaltCode::Error | HaltCode::Busy | HaltCode::TooBig | HaltCode::Range => {
            Error::logic(message.to_string())
        }
    }
}

fn compare_reg(a: &RegValue, b: &RegValue, collation: Option<crate::collation::CollationId>, collations: &CollationRegistry) -> Option<Ordering> {
    match (a, b) {
        (RegValue::Null, _) | (_, RegValue::Null) => None,
        (RegValue::Str(s1), RegValue::Str(s2)) => Some(
            collation
                .and_then(|id| collations.lookup(id))
                .map(|c| c.compare(s1, s2))
                .unwrap_or_else(|| s1.cmp(s2)),
        ),
        (RegValue::Blob(b1), RegValue::Blob(b2)) => Some(b1.cmp(b2)),
        (a, b) if a.is_numeric() && b.is_numeric() => {
            if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                if !matches!(a, RegValue::Double(_)) && !matches!(b, RegValue::Double(_)) {
                    return Some(x.cmp(&y));
                }
            }
            a.as_f64().zip(b.as_f64()).and_then(|(x, y)| x.partial_cmp(&y))
        }
        _ => None,
    }
}

/// The VM's mutable execution state: registers, open cursors, the
/// sub-program frame stack, and the cross-cutting pieces a run shares —
/// collations, the running change counter, and the autoinc trail it feeds.
pub struct Vm<'a> {
    pub registers: Vec<RegValue>,
    pub cursors: Vec<Cursor>,
    pub frames: Vec<Frame>,
    pub pc: usize,
    pub collations: &'a CollationRegistry,
    pub changes: u64,
    pub autoinc_trail: Vec<i64>,
    /// Resolved bind values, indexed by parameter slot — a namespace
    /// distinct from `registers`, so `LoadBind` never collides with
    /// whatever else an expression writes into low-numbered registers.
    pub binds: Vec<RegValue>,
    interrupted: &'a std::cell::Cell<bool>,
}

/// What one `run` call up to the next suspension point produced.
#[derive(Debug)]
pub enum StepOutcome {
    Row(Vec<RegValue>),
    Done,
}

impl<'a> Vm<'a> {
    pub fn new(register_count: usize, cursor_count: usize, collations: &'a CollationRegistry, interrupted: &'a std::cell::Cell<bool>) -> Self {
        Self {
            registers: vec![RegValue::Null; register_count],
            cursors: (0..cursor_count).map(|_| Cursor::from_sorted(Vec::new())).collect(),
            frames: Vec::new(),
            pc: 0,
            collations,
            changes: 0,
            autoinc_trail: Vec::new(),
            binds: Vec::new(),
            interrupted,
        }
    }

    pub fn install_cursor(&mut self, idx: usize, cursor: Cursor) {
        self.cursors[idx] = cursor;
    }

    /// Execute from `self.pc` until an `OP_ResultRow` or `OP_Halt`, honoring
    /// the interrupt flag at the loop head.
    pub fn run(&mut self, program: &[Op]) -> Result<StepOutcome> {
        loop {
            if self.interrupted.get() {
                return Err(Error::Interrupted);
            }
            let Some(op) = program.get(self.pc) else {
                return Ok(StepOutcome::Done);
            };
            self.pc += 1;
            match op {
                Op::LoadNull { dst } => self.registers[*dst] = RegValue::Null,
                Op::LoadInt { dst, value } => self.registers[*dst] = RegValue::Int64(*value),
                Op::LoadReal { dst, value } => self.registers[*dst] = RegValue::Double(*value),
                Op::LoadStr { dst, value } => self.registers[*dst] = RegValue::Str(value.clone()),
                Op::LoadBind { dst, slot } => {
                    self.registers[*dst] = self.binds.get(*slot).cloned().unwrap_or(RegValue::Null)
                }
                Op::Copy { dst, src } => self.registers[*dst] = self.registers[*src].clone(),
                Op::Add { dst, lhs, rhs } => {
                    let result = match (&self.registers[*lhs], &self.registers[*rhs]) {
                        (RegValue::Int64(a), RegValue::Int64(b)) => RegValue::Int64(a.wrapping_add(*b)),
                        (a, b) if a.is_numeric() && b.is_numeric() => {
                            RegValue::Double(a.as_f64().unwrap() + b.as_f64().unwrap())
                        }
                        _ => return Err(Error::client(ClientErrorKind::FieldType, "operands to + are not numeric")),
                    };
                    self.registers[*dst] = result;
                }
                Op::ApplyType { base, count, types } => {
                    for i in 0..*count {
                        let reg = std::mem::replace(&mut self.registers[base + i], RegValue::Null);
                        self.registers[base + i] = reg.apply_type(&types[i])?;
                    }
                }
                Op::Compare { .. } => {} // result consumed by the following Eq/Ne/Lt/.. opcode
                Op::Eq { lhs, rhs, jump_if_true } => self.jump_on(*lhs, *rhs, jump_if_true, |o| o == Ordering::Equal)?,
                Op::Ne { lhs, rhs, jump_if_true } => self.jump_on(*lhs, *rhs, jump_if_true, |o| o != Ordering::Equal)?,
                Op::Lt { lhs, rhs, jump_if_true } => self.jump_on(*lhs, *rhs, jump_if_true, |o| o == Ordering::Less)?,
                Op::Le { lhs, rhs, jump_if_true } => self.jump_on(*lhs, *rhs, jump_if_true, |o| o != Ordering::Greater)?,
                Op::Gt { lhs, rhs, jump_if_true } => self.jump_on(*lhs, *rhs, jump_if_true, |o| o == Ordering::Greater)?,
                Op::Ge { lhs, rhs, jump_if_true } => self.jump_on(*lhs, *rhs, jump_if_true, |o| o != Ordering::Less)?,
                Op::HaltIfNull { reg, code, message } => {
                    if matches!(self.registers[*reg], RegValue::Null) {
                        return Err(error_for_halt(*code, message));
                    }
                }
                Op::IteratorOpen { cursor } => {
                    self.cursors[*cursor].rewind()?;
                }
                Op::Rewind { cursor, jump_if_empty } => {
                    if !self.cursors[*cursor].rewind()? {
                        self.pc = *jump_if_empty;
                    }
                }
                Op::Next { cursor, jump_if_has_row } => {
                    if self.cursors[*cursor].advance()? {
                        self.pc = *jump_if_has_row;
                    }
                }
                Op::Prev { cursor, jump_if_has_row } => {
                    if self.cursors[*cursor].advance()? {
                        self.pc = *jump_if_has_row;
                    }
                }
                Op::Column { cursor, field_no, dst } => {
                    let value = match self.cursors[*cursor].current() {
                        Some(tuple) => value_to_reg(tuple.field(*field_no)?),
                        None => RegValue::Null,
                    };
                    self.registers[*dst] = value;
                }
                Op::ResultRow { base, count } => {
                    let row = self.registers[*base..*base + *count].to_vec();
                    return Ok(StepOutcome::Row(row));
                }
                Op::Goto { target } => self.pc = *target,
                Op::Halt { code } => {
                    if !matches!(code, HaltCode::Ok) {
                        return Err(error_for_halt(*code, "halt"));
                    }
                    return Ok(StepOutcome::Done);
                }
            }
        }
    }

    fn jump_on(&mut self, lhs: usize, rhs: usize, jump_if_true: &usize, test: impl Fn(Ordering) -> bool) -> Result<()> {
        let ord = compare_reg(&self.registers[lhs], &self.registers[rhs], None, self.collations);
        if let Some(ord) = ord {
            if test(ord) {
                self.pc = *jump_if_true;
            }
        }
        Ok(())
    }
}

/// Storage the executor drives writes through. The index iterator contract
/// only covers reads; this is the minimal writable counterpart the ON
/// CONFLICT/autoincrement/xfer paths need, since real storage is an
/// external collaborator. Used here by [`xfer_insert_select`] and
/// [`apply_replace_conflict`], and by tests that exercise them end-to-end.
pub trait Storage {
    fn format(&self) -> &Format;
    fn insert(&mut self, tuple: Tuple) -> Result<()>;
    /// Remove the row whose secondary key (under `key_def`) equals `probe`'s,
    /// returning it if one existed.
    fn delete_by_secondary_key(&mut self, key_def: &KeyDef, probe: &Tuple) -> Result<Option<Tuple>>;
    fn iter(&self) -> Box<dyn IndexIterator>;
    fn len(&self) -> usize;
}

/// `INSERT INTO t SELECT * FROM u` reduced to the xfer optimization: when
/// `dst`'s format is structurally equivalent to the source tuples, copy raw
/// tuple bytes across without walking `OP_Column`/`OP_MakeRecord`. Returns
/// the number of rows copied (`changes()`).
pub fn xfer_insert_select(dst: &mut dyn Storage, mut src: Box<dyn IndexIterator>) -> Result<u64> {
    let mut n = 0u64;
    while let Some(tuple) = src.next()? {
        // Raw copy: re-wrap the same encoded bytes under the destination's
        // format instead of decoding field-by-field and re-encoding.
        let raw = Tuple::new(dst.format().clone(), tuple.data())?;
        dst.insert(raw)?;
        n += 1;
    }
    Ok(n)
}

/// `INSERT OR REPLACE`: probe every unique secondary index covering the new
/// row with its key; on a match, delete the conflicting row before
/// inserting.
pub fn apply_replace_conflict(
    dst: &mut dyn Storage,
    unique_secondary_keys: &[KeyDef],
    new_row: &Tuple,
    policy: OnConflict,
    collations: &CollationRegistry,
) -> Result<ConflictAction> {
    for key_def in unique_secondary_keys {
        let conflicting = {
            let mut found = None;
            let mut it = dst.iter();
            while let Some(candidate) = it.next()? {
                if key_def.compare(&candidate, new_row, collations, NullMode::Default)? == Ordering::Equal {
                    found = Some(candidate);
                    break;
                }
            }
            found
        };
        let action = conflict::resolve(policy, conflicting, ConstraintKind::Unique, |row| {
            dst.delete_by_secondary_key(key_def, &row).map(|_| ())
        })?;
        if action == ConflictAction::SkipRow {
            return Ok(action);
        }
    }
    Ok(ConflictAction::Proceed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collation::CollationRegistry;
    use crate::msgpack::{self, Value};
    use crate::tuple::{FieldDef, FieldType, FormatRegistry};
    use std::cell::Cell;

    fn int_format(reg: &mut FormatRegistry) -> Format {
        reg.register(vec![FieldDef::new("x", FieldType::Unsigned)], &[0]).unwrap()
    }

    fn tuple_of(format: &Format, n: u64) -> Tuple {
        let mut bytes = Vec::new();
        msgpack::encode(&Value::Array(vec![Value::UInt(n)]), &mut bytes);
        Tuple::new(format.clone(), &bytes).unwrap()
    }

    #[test]
    fn add_and_result_row_produce_one_row() {
        let collations = CollationRegistry::new();
        let interrupted = Cell::new(false);
        let mut vm = Vm::new(4, 0, &collations, &interrupted);
        let program = vec![
            Op::LoadInt { dst: 0, value: 2 },
            Op::LoadInt { dst: 1, value: 3 },
            Op::Add { dst: 2, lhs: 0, rhs: 1 },
            Op::ResultRow { base: 2, count: 1 },
            Op::Halt { code: HaltCode::Ok },
        ];
        match vm.run(&program).unwrap() {
            StepOutcome::Row(row) => assert_eq!(row, vec![RegValue::Int64(5)]),
            StepOutcome::Done => panic!("expected a row"),
        }
        match vm.run(&program).unwrap() {
            StepOutcome::Done => {}
            StepOutcome::Row(_) => panic!("expected done"),
        }
    }

    #[test]
    fn load_bind_reads_the_bind_table_not_the_register_file() {
        let collations = CollationRegistry::new();
        let interrupted = Cell::new(false);
        let mut vm = Vm::new(2, 0, &collations, &interrupted);
        vm.binds = vec![RegValue::Int64(5)];
        // Register 0 is written by a literal load before the bind is read
        // into register 1 — this must not disturb `binds[0]`.
        let program = vec![
            Op::LoadInt { dst: 0, value: 1 },
            Op::LoadBind { dst: 1, slot: 0 },
            Op::Add { dst: 0, lhs: 0, rhs: 1 },
            Op::ResultRow { base: 0, count: 1 },
            Op::Halt { code: HaltCode::Ok },
        ];
        match vm.run(&program).unwrap() {
            StepOutcome::Row(row) => assert_eq!(row, vec![RegValue::Int64(6)]),
            StepOutcome::Done => panic!("expected a row"),
        }
    }

    #[test]
    fn apply_type_truncates_exact_float_to_integer() {
        let v = RegValue::Double(4.0).apply_type(&crate::tuple::FieldType::Integer).unwrap();
        assert_eq!(v, RegValue::Int64(4));
        assert!(RegValue::Double(4.5).apply_type(&crate::tuple::FieldType::Integer).is_err());
    }

    struct VecStorage {
        format: Format,
        rows: Vec<Tuple>,
    }

    impl Storage for VecStorage {
        fn format(&self) -> &Format {
            &self.format
        }
        fn insert(&mut self, tuple: Tuple) -> Result<()> {
            self.rows.push(tuple);
            Ok(())
        }
        fn delete_by_secondary_key(&mut self, key_def: &KeyDef, probe: &Tuple) -> Result<Option<Tuple>> {
            let collations = CollationRegistry::new();
            if let Some(pos) = self
                .rows
                .iter()
                .position(|r| key_def.compare(r, probe, &collations, NullMode::Default).unwrap() == Ordering::Equal)
            {
                return Ok(Some(self.rows.remove(pos)));
            }
            Ok(None)
        }
        fn iter(&self) -> Box<dyn IndexIterator> {
            Box::new(crate::index::VecIndexIterator::new(self.rows.clone()))
        }
        fn len(&self) -> usize {
            self.rows.len()
        }
    }

    #[test]
    fn xfer_copies_every_source_row_without_reencoding() {
        let mut reg = FormatRegistry::new();
        let format = int_format(&mut reg);
        let src_rows: Vec<Tuple> = (0..1000).map(|i| tuple_of(&format, i)).collect();
        let mut dst = VecStorage { format: format.clone(), rows: Vec::new() };
        let n = xfer_insert_select(&mut dst, Box::new(crate::index::VecIndexIterator::new(src_rows))).unwrap();
        assert_eq!(n, 1000);
        assert_eq!(dst.len(), 1000);
    }
}
