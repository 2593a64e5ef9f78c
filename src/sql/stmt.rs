//! SQL prepared-statement lifecycle: a statement is compiled once from SQL
//! text, stepped until exhausted, and either reset for another run with
//! fresh bindings or finalized to release the compiled plan.

use crate::error::{Error, Result};
use crate::msgpack::{self, Value};
use crate::runtime::Runtime;
use crate::sql::bind::{BindParam, BindValue, ParamTable};
use crate::sql::compiler::{self, Expr, Plan};
use crate::sql::conflict::ConflictAction;
use crate::sql::vm::{self, RegValue, StepOutcome, Vm};
use crate::sql::TableCatalog;
use crate::tuple::{FieldType, Tuple};
use std::cell::Cell;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StmtState {
    Init,
    Run,
    Halt,
    Reset,
    Dead,
}

/// One outcome of stepping a statement: either a produced row, or
/// completion with the row-modification count and autoincrement trail
/// accumulated along the way.
#[derive(Debug)]
pub enum StmtStep {
    Row(Vec<RegValue>),
    Done { changes: u64, autoinc_ids: Vec<i64> },
}

/// Bytecode lazily compiled for a `Select` plan the first time it's
/// stepped, then reused across `reset()`s.
struct CompiledSelect {
    ops: Vec<vm::Op>,
    register_count: usize,
}

pub struct Statement {
    sql_text: String,
    plan: Plan,
    params: ParamTable,
    binds: Vec<Option<BindValue>>,
    state: StmtState,
    interrupted: Cell<bool>,
    compiled: Option<CompiledSelect>,
    vm_pc: usize,
    dml_done: bool,
    changes: u64,
    autoinc_ids: Vec<i64>,
}

impl Statement {
    pub fn prepare(sql: &str, _runtime: &Runtime) -> Result<Self> {
        let (plan, params) = compiler::compile(sql)?;
        let n = params.len();
        Ok(Self {
            sql_text: sql.to_string(),
            plan,
            params,
            binds: vec![None; n],
            state: StmtState::Init,
            interrupted: Cell::new(false),
            compiled: None,
            vm_pc: 0,
            dml_done: false,
            changes: 0,
            autoinc_ids: Vec::new(),
        })
    }

    /// A compiled statement for tests that never execute DML against real
    /// storage (the exercised paths here are the metadata/envelope tests
    /// in `crate::port`).
    #[cfg(test)]
    pub fn for_test(sql: &str) -> Self {
        Self::prepare(sql, &Runtime::default()).expect("test statement text must compile")
    }

    pub fn sql(&self) -> &str {
        &self.sql_text
    }

    pub fn state(&self) -> StmtState {
        self.state
    }

    pub fn bind(&mut self, params: Vec<BindParam>) -> Result<()> {
        self.binds = self.params.resolve(params)?;
        Ok(())
    }

    pub fn clear_bindings(&mut self) {
        self.binds = vec![None; self.params.len()];
    }

    pub fn column_count(&self) -> usize {
        self.plan.column_names().len()
    }

    pub fn column_name(&self, i: usize) -> Option<String> {
        self.plan.column_names().into_iter().nth(i)
    }

    pub fn column_type(&self, i: usize) -> Option<FieldType> {
        match &self.plan {
            Plan::Select { columns, .. } => columns.get(i).map(compiler::column_field_type),
            _ => None,
        }
    }

    /// Mark this statement for cancellation; the next `step()` returns
    /// `Error::Interrupted`.
    pub fn interrupt(&self) {
        self.interrupted.set(true);
    }

    /// Advance execution by one row (for `SELECT`) or run a DML plan to
    /// completion. `catalog` is required for `INSERT` plans and ignored by
    /// `SELECT`.
    pub fn step(&mut self, catalog: Option<&mut dyn TableCatalog>) -> Result<StmtStep> {
        if self.state == StmtState::Dead {
            return Err(Error::logic("step() called on a finalized statement"));
        }
        if self.interrupted.get() {
            self.state = StmtState::Halt;
            return Err(Error::Interrupted);
        }
        self.state = StmtState::Run;
        match self.plan.clone() {
            Plan::Select { columns, .. } => self.step_select(&columns),
            Plan::InsertValues { .. } | Plan::InsertSelectStar { .. } => {
                let catalog = catalog
                    .ok_or_else(|| Error::logic("INSERT statements require a table catalog to step"))?;
                self.step_dml(catalog)
            }
        }
    }

    fn step_select(&mut self, columns: &[Expr]) -> Result<StmtStep> {
        if self.compiled.is_none() {
            let (ops, register_count) = compiler::compile_select_to_ops(columns);
            self.compiled = Some(CompiledSelect { ops, register_count });
            self.vm_pc = 0;
        }
        let compiled = self.compiled.as_ref().unwrap();
        let collations = crate::collation::CollationRegistry::new();
        let mut vm = Vm::new(compiled.register_count.max(1), 0, &collations, &self.interrupted);
        vm.pc = self.vm_pc;
        vm.binds = self
            .binds
            .iter()
            .map(|b| b.as_ref().map(RegValue::from_bind).unwrap_or(RegValue::Null))
            .collect();
        match vm.run(&compiled.ops)? {
            StepOutcome::Row(row) => {
                self.vm_pc = vm.pc;
                Ok(StmtStep::Row(row))
            }
            StepOutcome::Done => {
                self.state = StmtState::Halt;
                Ok(StmtStep::Done { changes: 0, autoinc_ids: Vec::new() })
            }
        }
    }

    fn step_dml(&mut self, catalog: &mut dyn TableCatalog) -> Result<StmtStep> {
        if self.dml_done {
            self.state = StmtState::Halt;
            return Ok(StmtStep::Done { changes: self.changes, autoinc_ids: self.autoinc_ids.clone() });
        }
        match self.plan.clone() {
            Plan::InsertSelectStar { dst_table, src_table } => {
                let src_iter = catalog.storage_mut(&src_table)?.iter();
                let dst = catalog.storage_mut(&dst_table)?;
                self.changes = vm::xfer_insert_select(dst, src_iter)?;
            }
            Plan::InsertValues { table, values, on_conflict } => {
                let mut regs: Vec<RegValue> =
                    values.iter().map(|e| compiler::eval(e, &self.binds)).collect::<Result<_>>()?;
                if let (Some(RegValue::Null), Some(seq)) = (regs.first(), catalog.sequence(&table)) {
                    let id = seq.next()?;
                    regs[0] = RegValue::Int64(id);
                    self.autoinc_ids.push(id);
                }
                let keys = catalog.unique_secondary_keys(&table).to_vec();
                let format = catalog.storage_mut(&table)?.format().clone();
                let tuple = row_to_tuple(&format, &regs)?;
                if !keys.is_empty() {
                    let collations = crate::collation::CollationRegistry::new();
                    let dst = catalog.storage_mut(&table)?;
                    let action = vm::apply_replace_conflict(dst, &keys, &tuple, on_conflict, &collations)?;
                    if action == ConflictAction::SkipRow {
                        self.dml_done = true;
                        self.state = StmtState::Halt;
                        return Ok(StmtStep::Done { changes: self.changes, autoinc_ids: self.autoinc_ids.clone() });
                    }
                }
                catalog.storage_mut(&table)?.insert(tuple)?;
                self.changes = 1;
            }
            Plan::Select { .. } => unreachable!("step_dml only called for DML plans"),
        }
        self.dml_done = true;
        self.state = StmtState::Halt;
        Ok(StmtStep::Done { changes: self.changes, autoinc_ids: self.autoinc_ids.clone() })
    }

    /// Rewind execution without recompiling, ready for another `step()`
    /// sequence with whatever bindings are currently set.
    pub fn reset(&mut self) {
        self.vm_pc = 0;
        self.dml_done = false;
        self.changes = 0;
        self.autoinc_ids.clear();
        self.state = StmtState::Reset;
    }

    /// Release the compiled plan. Consuming `self` makes re-use after
    /// finalize a compile error instead of a runtime footgun.
    pub fn finalize(mut self) {
        self.state = StmtState::Dead;
    }
}

fn reg_to_value(r: &RegValue) -> Value<'_> {
    match r {
        RegValue::Null => Value::Nil,
        RegValue::Bool(b) => Value::Bool(*b),
        RegValue::Int64(i) => Value::from(*i),
        RegValue::Double(d) => Value::F64(*d),
        RegValue::Str(s) => Value::Str(s.as_str()),
        RegValue::Blob(b) => Value::Bin(b.as_slice()),
    }
}

fn row_to_tuple(format: &crate::tuple::Format, regs: &[RegValue]) -> Result<Tuple> {
    let values: Vec<Value> = regs.iter().map(reg_to_value).collect();
    let mut bytes = Vec::new();
    msgpack::encode(&Value::Array(values), &mut bytes);
    Tuple::new(format.clone(), &bytes)
}
