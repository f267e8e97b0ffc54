//! Typed value container and the index/value compatibility rules.

use crate::{Error, Result};
use schema::Shove;
use tuple::{DateTime, FieldType};

/// A tagged value crossing the API boundary: column values, range
/// endpoints, filter operands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    /// NIL; accepted only for nullable columns.
    Null,
    Sint(i64),
    Uint(u64),
    Float(f64),
    Datetime(DateTime),
    Str(&'a str),
    Binary(&'a [u8]),
    /// An already-derived comparison key (long-key truncation output,
    /// composite keys).
    Shoved(&'a [u8]),
    /// Open lower range endpoint.
    Begin,
    /// Open upper range endpoint.
    End,
    /// Pseudo-endpoint: one key slot wide, aligned to the opposite
    /// endpoint.
    Epsilon,
}

impl<'a> Value<'a> {
    /// True for the pseudo-values that only make sense as range endpoints.
    pub fn is_range_pseudo(&self) -> bool {
        matches!(self, Value::Begin | Value::End | Value::Epsilon)
    }

    /// Ordinal into the compatibility matrices.
    fn kind(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Sint(_) => 1,
            Value::Uint(_) => 2,
            Value::Datetime(_) => 3,
            Value::Float(_) => 4,
            Value::Str(_) => 5,
            Value::Binary(_) => 6,
            Value::Shoved(_) => 7,
            Value::Begin => 8,
            Value::End => 9,
            Value::Epsilon => 10,
        }
    }
}

const fn bit(ty: FieldType) -> u32 {
    1 << ty as u32
}

const ANY: u32 = !0;
const INTS: u32 = bit(FieldType::Uint16)
    | bit(FieldType::Uint32)
    | bit(FieldType::Uint64)
    | bit(FieldType::Int32)
    | bit(FieldType::Int64);
const FLOATS: u32 = bit(FieldType::Fp32) | bit(FieldType::Fp64);
const SHORT_FIXED: u32 = INTS | FLOATS | bit(FieldType::Datetime);

/// Per-value-kind masks of acceptable column types for **ordered**
/// indexes. Integer kinds may mix signedness (the key derivation converts
/// or rejects), but never integers with floats; `shoved` is accepted only
/// where keys can exceed 8 bytes.
const ORDERED_COMPAT: [u32; 11] = [
    /* null     */ 0,
    /* sint     */ INTS,
    /* uint     */ INTS,
    /* datetime */ bit(FieldType::Datetime),
    /* float    */ FLOATS,
    /* string   */ bit(FieldType::Cstr),
    /* binary   */ !(bit(FieldType::Null) | SHORT_FIXED | bit(FieldType::Cstr)),
    /* shoved   */
    !(SHORT_FIXED
        | bit(FieldType::B96)
        | bit(FieldType::B128)
        | bit(FieldType::B160)
        | bit(FieldType::B256)),
    /* begin    */ ANY,
    /* end      */ ANY,
    /* epsilon  */ ANY,
];

/// The unordered variant: every key is hashed to 8 bytes, so `shoved` is
/// accepted for all types that can exceed 8 bytes.
const UNORDERED_COMPAT: [u32; 11] = [
    /* null     */ 0,
    /* sint     */ INTS,
    /* uint     */ INTS,
    /* datetime */ bit(FieldType::Datetime),
    /* float    */ FLOATS,
    /* string   */ bit(FieldType::Cstr),
    /* binary   */ !(SHORT_FIXED | bit(FieldType::Cstr)),
    /* shoved   */ !(bit(FieldType::Null) | SHORT_FIXED),
    /* begin    */ ANY,
    /* end      */ ANY,
    /* epsilon  */ ANY,
];

/// Whether `value` may be used against the index described by `shove`.
pub fn index_is_compat(shove: Shove, value: &Value<'_>) -> bool {
    if matches!(value, Value::Null) {
        return shove.is_nullable();
    }
    let Some(ty) = shove.data_type() else {
        return false;
    };
    let matrix = if shove.index().is_ordered() {
        &ORDERED_COMPAT
    } else {
        &UNORDERED_COMPAT
    };
    matrix[value.kind()] & bit(ty) != 0
}

/// Converts a value into a float (filters and in-place arithmetic accept
/// any numeric operand against float columns).
pub fn value_as_float(value: &Value<'_>) -> Result<f64> {
    match value {
        Value::Float(v) => Ok(*v),
        Value::Sint(v) => Ok(*v as f64),
        Value::Uint(v) => Ok(*v as f64),
        _ => Err(Error::TypeMismatch),
    }
}
