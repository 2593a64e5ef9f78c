//! `tarantool-core` — the tuple engine, SQL execution substrate and
//! supporting row-level I/O that sit underneath an in-memory, persistent
//! database server.
//!
//! This crate covers the core only: the embedded scripting host used to
//! register stored procedures, the networking front-end that decodes
//! client frames, the write-ahead log and snapshotter, the replication
//! gossip overlay, and CLI/configuration loading are external
//! collaborators — named here only by the contracts the core consumes
//! from or exposes to them.
//!
//! - The [`msgpack`] module is the self-describing binary pack format every
//!   other module encodes into and decodes out of.
//! - [`tuple`] owns the immutable, refcounted row object and the format
//!   registry that interns its shape.
//! - [`keydef`] and [`collation`] describe composite keys and compile their
//!   comparators and extractors.
//! - [`index`] is the iterator contract the core consumes without
//!   implementing.
//! - [`port`] is the polymorphic row sink result rows are appended to.
//! - [`sql`] holds the bind pipe, the prepared-statement lifecycle and the
//!   register-based bytecode executor.
//! - [`stats`] loads per-index histograms used by the (external) planner.
//! - [`merger`] is the streaming k-way merge of already-sorted row streams.
//! - [`rowio`] packs/unpacks row batches into the wire envelopes [`merger`]
//!   and the SQL wire protocol share.
//! - [`swim`] carries the wire shapes of the replication overlay's gossip
//!   datagrams, bit-exact but otherwise inert: the protocol itself lives
//!   outside the core.
//! - [`runtime`] is the single handle every other component is threaded
//!   through instead of reaching for ambient global state.

pub mod collation;
pub mod error;
pub mod index;
pub mod keydef;
pub mod log;
pub mod merger;
pub mod msgpack;
pub mod port;
pub mod region;
pub mod rowio;
pub mod runtime;
pub mod sequence;
pub mod sql;
pub mod stats;
pub mod swim;
pub mod tuple;

pub use error::{Error, Result};
pub use runtime::Runtime;
