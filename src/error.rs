//! Error handling utils.
//!
//! Every status the core returns has a stable integer code (see
//! [`Error::code`]) and a human readable [`Display`] message, so that a wire
//! boundary can surface both without re-deriving either from the variant
//! name. Low-level codec and comparator helpers never unwind: they return a
//! [`Result`] all the way up to the statement/merger API, which is the only
//! place a diagnostic message is attached to an owning object (see
//! `sql::Statement::diagnostic`).

use std::fmt::{self, Display, Formatter};

/// A specialized [`Result`] type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Sub-kinds of [`Error::Client`], mirroring the original client-error
/// taxonomy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClientErrorKind {
    BindNotFound,
    BindType,
    BindValue,
    BindParameterMax,
    InvalidMsgPack,
    NoSuchField,
    FieldType,
    InvalidUuid,
    NoSuchSpace,
    CursorNoTransaction,
    SqlExecute,
}

impl Display for ClientErrorKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match self {
            Self::BindNotFound => "BindNotFound",
            Self::BindType => "BindType",
            Self::BindValue => "BindValue",
            Self::BindParameterMax => "BindParameterMax",
            Self::InvalidMsgPack => "InvalidMsgPack",
            Self::NoSuchField => "NoSuchField",
            Self::FieldType => "FieldType",
            Self::InvalidUuid => "InvalidUuid",
            Self::NoSuchSpace => "NoSuchSpace",
            Self::CursorNoTransaction => "CursorNoTransaction",
            Self::SqlExecute => "SqlExecute",
        };
        f.write_str(s)
    }
}

/// Sub-kinds of [`Error::Constraint`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConstraintKind {
    NotNull,
    Check,
    Unique,
    ForeignKey,
}

impl Display for ConstraintKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match self {
            Self::NotNull => "NotNull",
            Self::Check => "Check",
            Self::Unique => "Unique",
            Self::ForeignKey => "ForeignKey",
        };
        f.write_str(s)
    }
}

/// Halt codes produced by the bytecode executor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HaltCode {
    Ok,
    Error,
    Busy,
    Constraint(ConstraintKind),
    TooBig,
    NoMem,
    Interrupt,
    Range,
    Schema,
}

/// Represents all error cases produced by this crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("client error ({kind}): {message}")]
    Client {
        kind: ClientErrorKind,
        message: String,
    },

    #[error("constraint violated ({kind}): {message}")]
    Constraint {
        kind: ConstraintKind,
        message: String,
    },

    #[error("failed to allocate {size} bytes from {allocator} for {purpose}")]
    OutOfMemory {
        size: usize,
        allocator: &'static str,
        purpose: &'static str,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("logic error: {0}")]
    Logic(String),

    #[error("operation interrupted")]
    Interrupted,

    #[error("schema changed under a compiled plan: {0}")]
    Schema(String),

    #[error("msgpack encode error: {0}")]
    MsgpackEncode(#[from] crate::msgpack::EncodeError),

    #[error("msgpack decode error: {0}")]
    MsgpackDecode(#[from] crate::msgpack::DecodeError),

    #[error("msgpack read error: {0}")]
    RmpDecode(#[from] rmp_serde::decode::Error),

    #[error("msgpack write error: {0}")]
    RmpEncode(#[from] rmp_serde::encode::Error),

    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Error>();
};

impl Error {
    #[inline]
    pub fn client(kind: ClientErrorKind, message: impl Into<String>) -> Self {
        Self::Client {
            kind,
            message: message.into(),
        }
    }

    #[inline]
    pub fn constraint(kind: ConstraintKind, message: impl Into<String>) -> Self {
        Self::Constraint {
            kind,
            message: message.into(),
        }
    }

    #[inline]
    pub fn logic(message: impl Into<String>) -> Self {
        Self::Logic(message.into())
    }

    #[inline]
    pub fn other<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Other(error.into())
    }

    /// A stable integer code for this error. Interrupt and out-of-memory
    /// errors are always distinguishable at the wire boundary from
    /// semantic errors.
    pub fn code(&self) -> i64 {
        match self {
            Self::Client { .. } => 1,
            Self::Constraint { .. } => 2,
            Self::OutOfMemory { .. } => 3,
            Self::Io(_) => 4,
            Self::Logic(_) => 5,
            Self::Interrupted => 6,
            Self::Schema(_) => 7,
            Self::MsgpackEncode(_) => 8,
            Self::MsgpackDecode(_) => 9,
            Self::RmpDecode(_) => 10,
            Self::RmpEncode(_) => 11,
            Self::Other(_) => 127,
        }
    }

    /// The [`HaltCode`] a statement should report for this error.
    pub fn halt_code(&self) -> HaltCode {
        match self {
            Self::Constraint { kind, .. } => HaltCode::Constraint(*kind),
            Self::OutOfMemory { .. } => HaltCode::NoMem,
            Self::Interrupted => HaltCode::Interrupt,
            Self::Schema(_) => HaltCode::Schema,
            _ => HaltCode::Error,
        }
    }
}
