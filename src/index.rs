//! Index iterator contract: a uniform "next tuple" contract over any index
//! implementation. The core only consumes this contract — it never
//! implements the index storage behind it.
//!
//! `IteratorType` keeps the original `box.index` vocabulary for the
//! directional/equality iteration kinds a key comparator can serve;
//! bitset/overlap/neighbor kinds are storage-engine specific iteration
//! modes outside this core's scope and are dropped.

use crate::error::Result;
use crate::tuple::Tuple;

/// How to iterate relative to a search key.
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IteratorType {
    /// key == x, ascending order.
    Eq = 0,
    /// key == x, descending order.
    Req = 1,
    /// every tuple in the index.
    All = 2,
    /// key < x.
    Lt = 3,
    /// key <= x.
    Le = 4,
    /// key >= x.
    Ge = 5,
    /// key > x.
    Gt = 6,
}

/// `iterator_next(it, &tuple) -> 0 on ok (tuple may be null at end) | -1 on
/// error`; `iterator_destroy(it)`. Implemented here as a plain trait: `next`
/// returns `Ok(None)` at end-of-iteration, and destruction is simply
/// dropping the iterator.
pub trait IndexIterator {
    fn next(&mut self) -> Result<Option<Tuple>>;
}

impl IndexIterator for Box<dyn IndexIterator> {
    fn next(&mut self) -> Result<Option<Tuple>> {
        (**self).next()
    }
}

/// A simple in-memory iterator over an already-ordered `Vec<Tuple>`, used
/// by tests and by any in-process cursor that doesn't need a real storage
/// engine behind it.
pub struct VecIndexIterator {
    tuples: std::vec::IntoIter<Tuple>,
}

impl VecIndexIterator {
    pub fn new(tuples: Vec<Tuple>) -> Self {
        Self {
            tuples: tuples.into_iter(),
        }
    }
}

impl IndexIterator for VecIndexIterator {
    fn next(&mut self) -> Result<Option<Tuple>> {
        Ok(self.tuples.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgpack::{self, Value};
    use crate::tuple::{FieldDef, FieldType, FormatRegistry};

    fn tuple_of(n: u64) -> Tuple {
        let mut reg = FormatRegistry::new();
        let format = reg
            .register(vec![FieldDef::new("id", FieldType::Unsigned)], &[0])
            .unwrap();
        let mut bytes = Vec::new();
        msgpack::encode(&Value::Array(vec![Value::UInt(n)]), &mut bytes);
        Tuple::new(format, &bytes).unwrap()
    }

    #[test]
    fn vec_iterator_yields_in_order_then_none() {
        let mut it = VecIndexIterator::new(vec![tuple_of(1), tuple_of(2)]);
        assert_eq!(it.next().unwrap().unwrap().field(0).unwrap(), Some(Value::UInt(1)));
        assert_eq!(it.next().unwrap().unwrap().field(0).unwrap(), Some(Value::UInt(2)));
        assert!(it.next().unwrap().is_none());
    }
}
