//! Autoincrement sequence generator backing the next-autoincrement-value
//! operation (driven directly by `sql::stmt::Statement::step_dml`) and the
//! statement-level autoinc trail.
//!
//! Mirrors a box `Sequence` handle's shape (`find`/`next`/`set`/`reset`),
//! but reimplemented as an in-process counter, since there is no
//! space/sequence system space to look one up in here.

use crate::error::{Error, Result};
use std::cell::Cell;

/// A single autoincrement generator, one per space with an autoincrement
/// primary key.
#[derive(Debug)]
pub struct Sequence {
    start: i64,
    min: i64,
    max: i64,
    increment: i64,
    cycle: bool,
    prev: Cell<Option<i64>>,
}

impl Sequence {
    pub fn new(start: i64, min: i64, max: i64, increment: i64, cycle: bool) -> Self {
        Self {
            start,
            min,
            max,
            increment,
            cycle,
            prev: Cell::new(None),
        }
    }

    /// A plain ascending-by-one sequence starting at 1, matching the
    /// default `box.sequence` parameters.
    pub fn autoincrement() -> Self {
        Self::new(1, 1, i64::MAX, 1, false)
    }

    /// Generate the next value and return it.
    ///
    /// If this is the first call, returns `start`. Otherwise advances by
    /// `increment`; on overflowing `min`/`max`, either wraps (`cycle`) or
    /// fails.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> Result<i64> {
        let next = match self.prev.get() {
            None => self.start,
            Some(prev) => match prev.checked_add(self.increment) {
                Some(v) if v >= self.min && v <= self.max => v,
                _ if self.cycle => {
                    if self.increment >= 0 {
                        self.min
                    } else {
                        self.max
                    }
                }
                _ => return Err(Error::logic("sequence overflow")),
            },
        };
        self.prev.set(Some(next));
        Ok(next)
    }

    /// Set the "previous value" directly, as an explicit integer binding
    /// overriding the sequence does.
    pub fn set(&self, new_value: i64) {
        self.prev.set(Some(new_value));
    }

    /// Reset to the initial state; the next [`Sequence::next`] call
    /// returns `start` again.
    pub fn reset(&self) {
        self.prev.set(None);
    }
}
