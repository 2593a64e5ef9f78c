//! Runtime handle: threads the format registry, collation registry and
//! per-connection numeric limits through every component explicitly,
//! instead of reaching for global statics the way the FFI-bound original
//! leans on a single live `box.cfg`'d process.

use crate::collation::CollationRegistry;
use crate::tuple::FormatRegistry;
use std::cell::RefCell;
use std::rc::Rc;

/// Per-connection numeric limits, each with a compile-time upper bound the
/// connection-supplied value is clamped against.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Max byte length of a single value.
    pub length: u32,
    /// Max SQL source text length; must not exceed `length`.
    pub sql_length: u32,
    /// Max columns in a result set.
    pub column: u16,
    /// Max expression nesting depth.
    pub expr_depth: u32,
    /// Max arms in a compound (UNION/INTERSECT/EXCEPT) select.
    pub compound_select: u32,
    /// Max arguments to a single function call.
    pub function_arg: u8,
    /// Max LIKE pattern length.
    pub like_pattern_length: u32,
    /// Max recursive trigger depth.
    pub trigger_depth: u32,
    /// Hard cap on the number of SQL bind parameters.
    pub bind_parameter_max: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            length: (1u32 << 31) - 1,
            sql_length: (1u32 << 31) - 1,
            column: 32767,
            expr_depth: 1000,
            compound_select: 30,
            function_arg: 127,
            like_pattern_length: 50_000,
            trigger_depth: 32,
            bind_parameter_max: 999,
        }
    }
}

struct RuntimeInner {
    formats: RefCell<FormatRegistry>,
    collations: RefCell<CollationRegistry>,
    limits: Limits,
}

/// The single handle every component (tuple construction, key comparators,
/// the SQL compiler/executor, the merger) takes a reference to instead of
/// reaching for ambient global state.
#[derive(Clone)]
pub struct Runtime(Rc<RuntimeInner>);

impl Runtime {
    pub fn new(limits: Limits) -> Self {
        Runtime(Rc::new(RuntimeInner {
            formats: RefCell::new(FormatRegistry::new()),
            collations: RefCell::new(CollationRegistry::new()),
            limits,
        }))
    }

    pub fn formats(&self) -> std::cell::RefMut<'_, FormatRegistry> {
        self.0.formats.borrow_mut()
    }

    pub fn collations(&self) -> std::cell::Ref<'_, CollationRegistry> {
        self.0.collations.borrow()
    }

    pub fn limits(&self) -> &Limits {
        &self.0.limits
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}
