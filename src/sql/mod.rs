//! SQL execution substrate: the bind/parameter pipe, ON CONFLICT policy
//! resolution, a minimal SQL-text compiler, the register-based bytecode
//! executor, and the prepared-statement lifecycle built on top of all four.

pub mod bind;
pub mod compiler;
pub mod conflict;
pub mod stmt;
pub mod vm;

use crate::error::Result;
use crate::keydef::KeyDef;
use crate::sequence::Sequence;
use crate::sql::vm::Storage;

/// The table storage and sequence lookups the executor needs for DML
/// plans. Implemented by the embedding layer — real storage is an
/// external collaborator, exactly as [`crate::port::HostSink`] stands in
/// for the host-language row stack.
pub trait TableCatalog {
    fn storage_mut(&mut self, table: &str) -> Result<&mut dyn Storage>;
    /// Unique secondary-index key definitions covering `table`, probed in
    /// order by `ON CONFLICT REPLACE`.
    fn unique_secondary_keys(&self, table: &str) -> &[KeyDef];
    /// The autoincrement sequence backing `table`'s primary key, if it has
    /// one.
    fn sequence(&self, table: &str) -> Option<&Sequence>;
}
