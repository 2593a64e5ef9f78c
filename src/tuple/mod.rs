//! Tuple object and tuple format registry.

pub mod format;
pub mod tuple;

pub use format::{FieldDef, FieldType, Format, FormatId, FormatRegistry};
pub use tuple::{check_tuple_raw, Tuple};
