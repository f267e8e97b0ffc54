//! # Table — ACID, MVCC tables of tuples
//!
//! The top layer of the engine: typed schemas declared at runtime, primary
//! and secondary indexes kept mutually consistent on every write, range
//! cursors with filters, sequences, and saturated in-place arithmetic —
//! all over snapshot-isolated transactions of the [`storage`] engine.
//!
//! ## Architecture
//!
//! ```text
//! caller
//!   |
//!   v
//! ┌──────────────────────────────────────────────────┐
//! │                    TABLE                         │
//! │                                                  │
//! │ catalog.rs  schema records, dictionary, handles  │
//! │ txn.rs      levels, schema TSN, restart, abort   │
//! │ db.rs       handle cache keyed by (shove, tsn)   │
//! │ key.rs      value/row -> comparison-stable key   │
//! │ row.rs      put/delete + secondary maintenance   │
//! │ cursor.rs   ranged filtered scans, rerere        │
//! │ filter.rs   predicate trees over rows            │
//! └──────────────────────────────────────────────────┘
//!   |                |
//!   v                v
//! tuple codec     storage (MVCC ordered KV + WAL)
//! ```
//!
//! ## Write path
//!
//! 1. Non-nullable columns are checked, the primary key derived.
//! 2. Unique secondaries are probed (`validate_put` stops here).
//! 3. The primary store is changed; every secondary whose derived key
//!    changed is re-homed. A constraint failure after step 3 aborts the
//!    whole transaction — secondaries are never left half-updated.
//!
//! ## Read path
//!
//! Cursors range over one index, clamp against `[from, to)` (with epsilon
//! pseudo-endpoints for single-key slices), re-check bounds only until the
//! scan has provably crossed them, and evaluate filters against the full
//! row — one primary-store lookup per candidate on secondary indexes.

mod catalog;
mod cursor;
mod db;
mod error;
mod filter;
mod key;
mod row;
mod txn;
mod value;

pub use catalog::{ColumnHandle, IndexCost, SchemaInfo, TableHandle, TableStat};
pub use cursor::{apply_visitor, estimate, Cursor, CursorOptions, CursorStat, SeekOp};
pub use db::{Database, Level, TableDef};
pub use error::{Error, Result};
pub use filter::{cmp_field_value, CmpOp, Filter, Lge};
pub use key::{
    denil_key, key_to_value, row_to_key, value_to_key, Key, OwnedValue, MAX_KEYLEN, NOTNIL_PREFIX,
    SHOVED_KEYLEN,
};
pub use row::{
    column_inplace, delete, get, put, read_column, read_column_or_composite, upsert_column,
    validate_put, BesFactor, InplaceOp, PutOp,
};
pub use txn::{set_panic_hook, Txn};
pub use value::{index_is_compat, Value};

// the building blocks callers compose with
pub use schema::{ColumnSet, IndexType, Shove};
pub use storage::{Durability, Geometry, RegimeFlags};
pub use tuple::{DateTime, FieldType, TupleRo, TupleRw};

#[cfg(test)]
mod tests;
