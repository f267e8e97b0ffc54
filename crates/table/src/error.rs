//! The catalog-wide error code set.
//!
//! Everything the engine can report funnels into [`Error`]; there are no
//! panics on library paths and no error state outside the returned value.
//! `NoData` is a soft condition (end of data, nothing changed) that most
//! callers branch on rather than propagate.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Internal invariant broken; the transaction is not salvageable.
    #[error("internal invariant violated")]
    Oops,
    #[error("schema is corrupted")]
    SchemaCorrupted,
    #[error("value type mismatches the column type")]
    TypeMismatch,
    #[error("data length mismatches the column type")]
    DataLenMismatch,
    /// A row's key column disagrees with the cursor position.
    #[error("key mismatch")]
    KeyMismatch,
    #[error("required column is missing from the row")]
    ColumnMissing,
    #[error("index is corrupted")]
    IndexCorrupted,
    #[error("column has no suitable index")]
    NoIndex,
    /// The schema changed past this transaction; refresh and retry.
    #[error("schema has changed")]
    SchemaChanged,
    /// The cursor is unpositioned or poisoned.
    #[error("cursor is not positioned")]
    Cursor,
    #[error("too many columns, indexes or tables")]
    TooMany,
    /// Abort-after-failure itself failed; terminate promptly.
    #[error("unrecoverable failure, terminate")]
    WannaDie,
    #[error("transaction is cancelled")]
    TxnCancelled,
    /// An index with the same definition already exists.
    #[error("similar index already exists")]
    SimilarIndex,
    /// A stale dbi handle may still be in use by another transaction.
    #[error("tardy dbi handle")]
    TardyDbi,
    /// The schema would pair a costly primary with ordinal secondaries.
    #[error("clumsy index combination")]
    ClumsyIndex,
    /// End of data; not a failure.
    #[error("no data")]
    NoData,
    #[error("key already exists")]
    KeyExist,
    #[error("not found")]
    NotFound,
    #[error("database is full")]
    DbFull,
    #[error("stale dbi handle")]
    BadDbi,
    #[error("permission denied")]
    Perm,
    #[error("invalid argument")]
    Invalid,
    #[error("bad symbolic name")]
    BadName,
    #[error("bad flags")]
    BadFlags,
    /// A value is out of range for the column type.
    #[error("bad value")]
    BadValue,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("already exists")]
    Exists,
    #[error("resource is busy")]
    Busy,
    /// A tuple buffer ran out of space.
    #[error("no space")]
    NoSpace,
    #[error("not implemented")]
    NoImp,
    #[error("storage: {0}")]
    Storage(storage::StorageError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<storage::StorageError> for Error {
    fn from(err: storage::StorageError) -> Error {
        use storage::StorageError as S;
        match err {
            S::NotFound => Error::NotFound,
            S::KeyExist => Error::KeyExist,
            S::DbFull => Error::DbFull,
            S::BadDbi => Error::BadDbi,
            S::Perm => Error::Perm,
            S::NoCurrent => Error::Cursor,
            S::SequenceOverflow => Error::Overflow,
            S::Incompatible | S::Corrupt => Error::Storage(err),
            S::Io(_) => Error::Storage(err),
        }
    }
}

impl From<tuple::TupleError> for Error {
    fn from(err: tuple::TupleError) -> Error {
        use tuple::TupleError as T;
        match err {
            T::NoSpace => Error::NoSpace,
            T::Limit => Error::TooMany,
            T::Invalid => Error::Invalid,
            T::Corrupt(_) => Error::SchemaCorrupted,
            T::FieldMissing => Error::ColumnMissing,
        }
    }
}

impl From<schema::SchemaError> for Error {
    fn from(err: schema::SchemaError) -> Error {
        use schema::SchemaError as E;
        match err {
            E::BadName => Error::BadName,
            E::BadFlags | E::BadComposite => Error::BadFlags,
            E::BadType => Error::TypeMismatch,
            E::Exists => Error::Exists,
            E::TooMany => Error::TooMany,
            E::Corrupt => Error::SchemaCorrupted,
        }
    }
}
