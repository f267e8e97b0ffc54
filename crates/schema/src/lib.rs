//! # Schema — table descriptions and the symbolic-name machinery
//!
//! Tables and columns are identified by a **shove**: a 64-bit packed id
//! holding a 54-bit hash of the upper-cased symbolic name, 5 bits of index
//! flags, and a 5-bit data type. Shoves are stable across processes and
//! platforms, order the catalog, and derive the names of the underlying
//! key-value sub-databases.
//!
//! A table description starts life as a [`ColumnSet`] (builder), is
//! validated and sorted into the canonical column order (primary index
//! first, then secondary indexes, then non-indexed non-nullable, then
//! non-indexed nullable), and is serialized as a checksummed
//! [`StoredSchema`] record into the catalog.
//!
//! | Module        | Purpose                                            |
//! |---------------|----------------------------------------------------|
//! | [`shove`]     | Shove packing, index-type flags, name hashing, dbi names |
//! | [`columns`]   | Column-set builder, composite validation, canonical sort |
//! | [`record`]    | Stored schema record codec + the catalog dictionary |

pub mod columns;
pub mod record;
pub mod shove;

pub use columns::ColumnSet;
pub use record::{Dictionary, StoredSchema, TableSchema};
pub use shove::{
    dbi_name, dbi_shove, dbi_shove_is_pk, name_to_shove, shove_eq, table_shove, IndexType, Shove,
};

use thiserror::Error;

/// Hard limit on tables per database.
pub const MAX_TABLES: usize = 1024;

/// Hard limit on columns per table (the descriptor format's column space
/// minus the dead marker).
pub const MAX_COLS: usize = tuple::COLUMN_DEAD as usize - 1;

/// Hard limit on indexed columns per table (the ordinal fits the low bits
/// of a dbi shove).
pub const MAX_INDEXES: usize = 1 << 10;

/// Sub-database budget: every table costs one primary plus its secondaries.
pub const MAX_DBI: usize = MAX_TABLES * 4;

/// Symbolic-name length bounds.
pub const NAME_LEN_MIN: usize = 1;
pub const NAME_LEN_MAX: usize = 64;

/// Signature stamped into every stored schema record.
pub const SCHEMA_SIGNATURE: u32 = 1_636_722_823;

/// Seed of the schema-record checksum.
pub const SCHEMA_CHECKSEED: u64 = 67_413_473;

/// Errors of schema description and catalog record handling.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SchemaError {
    /// The symbolic name is empty, too long, or holds a forbidden char.
    #[error("bad symbolic name")]
    BadName,
    /// The index-type flag combination is not one of the legal set.
    #[error("bad index flags")]
    BadFlags,
    /// The data type cannot be used here.
    #[error("bad column type")]
    BadType,
    /// A column with the same name already exists, or a duplicate primary.
    #[error("column already exists")]
    Exists,
    /// A count limit (columns, indexes) would be exceeded.
    #[error("too many columns or indexes")]
    TooMany,
    /// A stored schema record failed validation.
    #[error("schema record corrupted")]
    Corrupt,
    /// A composite definition is malformed (self-reference, duplicate or
    /// prefix member sets, unknown member).
    #[error("bad composite definition")]
    BadComposite,
}

pub type Result<T> = std::result::Result<T, SchemaError>;
