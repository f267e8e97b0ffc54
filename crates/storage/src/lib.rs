//! # Storage — MVCC ordered key-value engine
//!
//! The storage adapter behind the table layer: named sub-databases over
//! copy-on-write snapshots with a single writer, many readers, ordered
//! duplicates, cursors, per-dbi sequences and WAL-backed durability.
//!
//! ## Architecture
//!
//! ```text
//! Env
//!  ├── committed: Arc<Snapshot>      (readers pin this)
//!  │     ├── dbis[slot] -> Arc<SubDb>   ordered maps, one per sub-database
//!  │     └── names -> slot
//!  ├── writer slot                   (one write txn at a time)
//!  └── WAL                           (framed, CRC32, fsync per durability)
//! ```
//!
//! A write transaction clones only the sub-databases it touches and
//! publishes a new snapshot at commit; committed state is immutable, so
//! read transactions are wait-free after begin. On open the WAL is
//! replayed to rebuild the committed snapshot; a truncated tail frame is a
//! clean end of log.
//!
//! | Module     | Purpose                                          |
//! |------------|--------------------------------------------------|
//! | [`subdb`]  | One sorted map: flags, comparators, duplicates   |
//! | [`env`]    | Environment, snapshots, durability, geometry     |
//! | [`txn`]    | Read/write transactions, dbi open, put/del/replace |
//! | [`cursor`] | Cursor primitives over a transaction             |
//! | [`wal`]    | Framed commit log                                |

pub mod cursor;
pub mod env;
pub mod subdb;
pub mod txn;
pub mod wal;

pub use cursor::{Cursor, CursorOp};
pub use env::{Durability, Env, EnvBuilder, EnvInfo, Geometry, RegimeFlags};
pub use subdb::{DbiFlags, DbiStat, KeyMode};
pub use txn::{Dbi, PutFlags, Txn, TxnInfo, TxnMode};

use thiserror::Error;

/// Engine errors, mapped one-to-one from the catalog-wide code set the
/// table layer exposes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Key (or key/data pair) not found.
    #[error("key/data pair not found")]
    NotFound,
    /// Key (or key/data pair) already exists.
    #[error("key/data pair already exists")]
    KeyExist,
    /// A sub-database exists under this name with different flags.
    #[error("sub-database flags are incompatible")]
    Incompatible,
    /// The database reached its configured size limit.
    #[error("database is full")]
    DbFull,
    /// The dbi handle does not name a live sub-database.
    #[error("bad dbi handle")]
    BadDbi,
    /// Write access denied (read-only environment or read transaction).
    #[error("permission denied")]
    Perm,
    /// The operation needs a positioned cursor.
    #[error("cursor is not positioned")]
    NoCurrent,
    /// Stored data failed validation during WAL replay.
    #[error("commit log corrupted")]
    Corrupt,
    /// Sequence counter would overflow.
    #[error("sequence overflow")]
    SequenceOverflow,
    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests;
