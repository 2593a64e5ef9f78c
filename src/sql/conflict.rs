//! ON CONFLICT policy resolution, shared by `OP_HaltIfNull`'s constraint
//! path and the executor's unique-secondary-index probe before an
//! insert/update applies.

use crate::error::{ConstraintKind, Error, Result};
use crate::tuple::Tuple;

/// The policy chosen at compile time for a constraint violation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OnConflict {
    Abort,
    Fail,
    Ignore,
    Rollback,
    Replace,
}

/// What the executor should do next after resolving a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictAction {
    /// No conflicting row (or `Replace` already removed it): proceed.
    Proceed,
    /// `Ignore`: short-circuit to the loop-end label without applying the row.
    SkipRow,
}

/// Resolve a single unique-index conflict. `conflicting` is the tuple the
/// probe found (if any) with a matching key; `delete` removes it, used only
/// by the `Replace` policy.
pub fn resolve(
    policy: OnConflict,
    conflicting: Option<Tuple>,
    kind: ConstraintKind,
    mut delete: impl FnMut(Tuple) -> Result<()>,
) -> Result<ConflictAction> {
    let Some(existing) = conflicting else {
        return Ok(ConflictAction::Proceed);
    };
    match policy {
        OnConflict::Replace => {
            delete(existing)?;
            Ok(ConflictAction::Proceed)
        }
        OnConflict::Ignore => Ok(ConflictAction::SkipRow),
        OnConflict::Abort | OnConflict::Fail | OnConflict::Rollback => {
            Err(Error::constraint(kind, "unique constraint violated"))
        }
    }
}
