//! Key derivation: mapping typed values and rows onto bytewise-comparable
//! index keys.
//!
//! Short fixed types go through the unsigned-integer transform of the
//! storage comparator (sign-flip for signed, the monotone IEEE mapping for
//! floats). Strings and binaries are used verbatim up to [`MAX_KEYLEN`];
//! longer ones are truncated to the discriminative side and completed with
//! a 64-bit hash of the chopped remainder, yielding keys of exactly
//! [`SHOVED_KEYLEN`] bytes. Unordered indexes always hash. Nullable
//! indexed columns get a one-byte not-nil prefix so NIL can keep a
//! dedicated slot at the correct end of the order.

use crate::{Error, Result, Value};
use schema::{Shove, TableSchema};
use tuple::{denil, DateTime, FieldType, TupleRo};

/// Longest key stored verbatim.
pub const MAX_KEYLEN: usize = 64 - 8;
/// Exact length of a truncated ("shoved") key.
pub const SHOVED_KEYLEN: usize = MAX_KEYLEN + 8;
/// Byte that prefixes (obverse) or suffixes (reverse) every non-NIL key of
/// a nullable indexed column.
pub const NOTNIL_PREFIX: u8 = 42;
/// Seed of the unordered-index key hash.
pub const UNORDERED_SEED: u64 = 2018;

/// A derived index key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub bytes: Vec<u8>,
}

impl Key {
    fn from_u32(value: u32) -> Key {
        Key {
            bytes: value.to_le_bytes().to_vec(),
        }
    }

    fn from_u64(value: u64) -> Key {
        Key {
            bytes: value.to_le_bytes().to_vec(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

// ------------- integer/float key transforms -------------
//
// The storage comparator for short fixed types is Unsigned: 4 or 8
// little-endian bytes compared numerically. These transforms make signed
// and floating values order correctly under it.

pub fn key_from_i32(value: i32) -> u32 {
    (value as u32) ^ 0x8000_0000
}

pub fn i32_from_key(key: u32) -> i32 {
    (key ^ 0x8000_0000) as i32
}

pub fn key_from_i64(value: i64) -> u64 {
    (value as u64) ^ 0x8000_0000_0000_0000
}

pub fn i64_from_key(key: u64) -> i64 {
    (key ^ 0x8000_0000_0000_0000) as i64
}

/// Monotone IEEE-754 mapping: non-negative floats get the sign bit set,
/// negative ones are inverted wholesale. The canonical float DENIL (a
/// negative quiet NaN with every bit set) maps to key zero, below every
/// real value.
pub fn key_from_f32(value: f32) -> u32 {
    let bits = value.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

pub fn f32_from_key(key: u32) -> f32 {
    if key & 0x8000_0000 != 0 {
        f32::from_bits(key & 0x7FFF_FFFF)
    } else {
        f32::from_bits(!key)
    }
}

pub fn key_from_f64(value: f64) -> u64 {
    let bits = value.to_bits();
    if bits & 0x8000_0000_0000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000_0000_0000
    }
}

pub fn f64_from_key(key: u64) -> f64 {
    if key & 0x8000_0000_0000_0000 != 0 {
        f64::from_bits(key & 0x7FFF_FFFF_FFFF_FFFF)
    } else {
        f64::from_bits(!key)
    }
}

// ------------- normalization -------------

/// Truncate-with-hash for keys past [`MAX_KEYLEN`], keeping the
/// discriminative side chosen by the index direction.
fn shove_long(raw: &[u8], keep: usize, obverse: bool, prefixed: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(SHOVED_KEYLEN);
    if obverse {
        if prefixed {
            out.push(NOTNIL_PREFIX);
        }
        out.extend_from_slice(&raw[..keep]);
        let tail_hash = t1ha::t1ha2_atonce(&raw[keep..], 0);
        out.extend_from_slice(&tail_hash.to_be_bytes());
    } else {
        let head_hash = t1ha::t1ha2_atonce(&raw[..raw.len() - keep], 0);
        out.extend_from_slice(&head_hash.to_be_bytes());
        out.extend_from_slice(&raw[raw.len() - keep..]);
        if prefixed {
            out.push(NOTNIL_PREFIX);
        }
    }
    debug_assert_eq!(out.len(), SHOVED_KEYLEN);
    out
}

/// Applies the unordered hash, the not-nil prefix, and long-key
/// truncation to a raw string/binary key.
fn normalize(index: schema::IndexType, raw: &[u8]) -> Key {
    if index.is_unordered() {
        return Key::from_u64(t1ha::t1ha2_atonce(raw, UNORDERED_SEED));
    }
    let obverse = index.is_obverse();
    if index.is_indexed_and_nullable() {
        if raw.len() < MAX_KEYLEN {
            let mut bytes = Vec::with_capacity(raw.len() + 1);
            if obverse {
                bytes.push(NOTNIL_PREFIX);
                bytes.extend_from_slice(raw);
            } else {
                bytes.extend_from_slice(raw);
                bytes.push(NOTNIL_PREFIX);
            }
            return Key { bytes };
        }
        return Key {
            bytes: shove_long(raw, MAX_KEYLEN - 1, obverse, true),
        };
    }
    if raw.len() <= MAX_KEYLEN {
        return Key {
            bytes: raw.to_vec(),
        };
    }
    Key {
        bytes: shove_long(raw, MAX_KEYLEN, obverse, false),
    }
}

/// Truncation without nullable handling, used at the composite level.
fn normalize_plain(index: schema::IndexType, raw: &[u8]) -> Key {
    if index.is_unordered() {
        return Key::from_u64(t1ha::t1ha2_atonce(raw, UNORDERED_SEED));
    }
    if raw.len() <= MAX_KEYLEN {
        return Key {
            bytes: raw.to_vec(),
        };
    }
    Key {
        bytes: shove_long(raw, MAX_KEYLEN, index.is_obverse(), false),
    }
}

// ------------- DENIL keys -------------

/// The key that stands in for NIL in a nullable index, chosen to sort
/// before every real value on obverse indexes and after them on reverse
/// indexes of unsigned fixed types.
pub fn denil_key(shove: Shove) -> Result<Key> {
    let index = shove.index();
    let obverse = index.is_obverse();
    let ty = shove.data_type().ok_or(Error::Oops)?;
    Ok(match ty {
        FieldType::Uint16 | FieldType::Int32 | FieldType::Uint32 => {
            Key::from_u32(if obverse { 0 } else { u32::MAX })
        }
        FieldType::Int64 | FieldType::Uint64 => {
            Key::from_u64(if obverse { 0 } else { u64::MAX })
        }
        FieldType::Fp32 => Key::from_u32(0),
        FieldType::Fp64 => Key::from_u64(0),
        FieldType::Datetime => Key::from_u64(denil::DATETIME),
        FieldType::B96 | FieldType::B128 | FieldType::B160 | FieldType::B256 => {
            if index.is_unordered() {
                Key::from_u64(0) // the unordered "super nil"
            } else {
                let fill = if obverse { 0x00 } else { 0xFF };
                Key {
                    bytes: vec![fill; tuple::UNIT_SIZE * ty.fixed_units().unwrap()],
                }
            }
        }
        FieldType::Cstr | FieldType::Opaque | FieldType::Nested => {
            if index.is_unordered() {
                Key::from_u64(0)
            } else {
                // NIL is the empty key; real values carry the not-nil byte
                Key { bytes: Vec::new() }
            }
        }
        FieldType::Null => return Err(Error::Oops),
    })
}

// ------------- value -> key -------------

/// Derives the index key for a caller-supplied value.
pub fn value_to_key(shove: Shove, value: &Value<'_>) -> Result<Key> {
    if matches!(value, Value::Begin | Value::End | Value::Epsilon) {
        return Err(Error::TypeMismatch);
    }
    let index = shove.index();
    if !index.is_indexed() {
        return Err(Error::Oops);
    }
    if matches!(value, Value::Null) {
        if !shove.is_nullable() {
            return Err(Error::TypeMismatch);
        }
        return denil_key(shove);
    }
    if !crate::value::index_is_compat(shove, value) {
        return Err(Error::TypeMismatch);
    }

    if let Value::Shoved(bytes) = value {
        // already in key form
        if index.is_ordered() {
            if bytes.len() > SHOVED_KEYLEN {
                return Err(Error::DataLenMismatch);
            }
        } else if bytes.len() != 8 {
            return Err(Error::DataLenMismatch);
        }
        return Ok(Key {
            bytes: bytes.to_vec(),
        });
    }

    let ty = shove.data_type().ok_or(Error::Oops)?;
    let raw: &[u8] = match ty {
        FieldType::Null => return Err(Error::TypeMismatch), // composite wants Shoved
        FieldType::Nested => return Err(Error::NoImp),
        FieldType::Uint16 => {
            let v = unsigned_column(value, u16::MAX as u64)?;
            return Ok(Key::from_u32(v as u32));
        }
        FieldType::Uint32 => {
            let v = unsigned_column(value, u32::MAX as u64)?;
            return Ok(Key::from_u32(v as u32));
        }
        FieldType::Uint64 => {
            let v = unsigned_column(value, u64::MAX)?;
            return Ok(Key::from_u64(v));
        }
        FieldType::Int32 => {
            let v = signed_column(value, i32::MIN as i64, i32::MAX as i64)?;
            return Ok(Key::from_u32(key_from_i32(v as i32)));
        }
        FieldType::Int64 => {
            let v = signed_column(value, i64::MIN, i64::MAX)?;
            return Ok(Key::from_u64(key_from_i64(v)));
        }
        FieldType::Fp32 => {
            let Value::Float(fp) = value else {
                return Err(Error::TypeMismatch);
            };
            if fp.is_nan() {
                return Err(Error::BadValue);
            }
            if fp.abs() > f32::MAX as f64 && !fp.is_infinite() {
                return Err(Error::BadValue);
            }
            let fp = if fp.abs() < f32::MIN_POSITIVE as f64 {
                0.0f32 // -0.0 and subnormals collapse to +0
            } else {
                *fp as f32
            };
            return Ok(Key::from_u32(key_from_f32(fp)));
        }
        FieldType::Fp64 => {
            let Value::Float(fp) = value else {
                return Err(Error::TypeMismatch);
            };
            if fp.is_nan() {
                return Err(Error::BadValue);
            }
            let fp = if fp.abs() < f64::MIN_POSITIVE { 0.0 } else { *fp };
            return Ok(Key::from_u64(key_from_f64(fp)));
        }
        FieldType::Datetime => {
            let Value::Datetime(dt) = value else {
                return Err(Error::TypeMismatch);
            };
            return Ok(Key::from_u64(dt.fixedpoint()));
        }
        FieldType::Cstr => {
            let Value::Str(s) = value else {
                return Err(Error::Oops);
            };
            s.as_bytes()
        }
        FieldType::Opaque => {
            let Value::Binary(b) = value else {
                return Err(Error::Oops);
            };
            b
        }
        FieldType::B96 | FieldType::B128 | FieldType::B160 | FieldType::B256 => {
            let Value::Binary(b) = value else {
                return Err(Error::Oops);
            };
            if b.len() != tuple::UNIT_SIZE * ty.fixed_units().unwrap() {
                return Err(Error::DataLenMismatch);
            }
            b
        }
    };

    Ok(normalize(index, raw))
}

pub(crate) fn unsigned_column(value: &Value<'_>, max: u64) -> Result<u64> {
    let v = match value {
        Value::Uint(v) => *v,
        Value::Sint(v) if *v >= 0 => *v as u64,
        Value::Sint(_) => return Err(Error::BadValue),
        _ => return Err(Error::TypeMismatch),
    };
    if v > max {
        return Err(Error::BadValue);
    }
    Ok(v)
}

pub(crate) fn signed_column(value: &Value<'_>, min: i64, max: i64) -> Result<i64> {
    let v = match value {
        Value::Sint(v) => *v,
        Value::Uint(v) if *v <= i64::MAX as u64 => *v as i64,
        Value::Uint(_) => return Err(Error::BadValue),
        _ => return Err(Error::TypeMismatch),
    };
    if v < min || v > max {
        return Err(Error::BadValue);
    }
    Ok(v)
}

// ------------- row -> key -------------

/// Derives the key of column `ordinal` from a row. A missing field yields
/// the DENIL key for nullable indexed columns and `ColumnMissing`
/// otherwise.
pub fn row_to_key(def: &TableSchema, ordinal: usize, row: TupleRo<'_>) -> Result<Key> {
    let shove = def.column_shove(ordinal);
    let ty = shove.data_type().ok_or(Error::SchemaCorrupted)?;
    if ty == FieldType::Null {
        return composite_row_to_key(def, ordinal, row);
    }
    let index = shove.index();

    let Some(field) = row.lookup(ordinal as u16, ty) else {
        if !index.is_indexed_and_nullable() {
            return Err(Error::ColumnMissing);
        }
        return denil_key(shove);
    };

    match ty {
        FieldType::Nested => Err(Error::NoImp),
        FieldType::Uint16 => Ok(Key::from_u32(field.as_u16() as u32)),
        FieldType::Uint32 => Ok(Key::from_u32(field.as_u32())),
        FieldType::Uint64 => Ok(Key::from_u64(field.as_u64())),
        FieldType::Datetime => Ok(Key::from_u64(field.as_datetime().fixedpoint())),
        FieldType::Int32 => Ok(Key::from_u32(key_from_i32(field.as_i32()))),
        FieldType::Int64 => Ok(Key::from_u64(key_from_i64(field.as_i64()))),
        FieldType::Fp32 => Ok(Key::from_u32(key_from_f32(field.as_f32()))),
        FieldType::Fp64 => Ok(Key::from_u64(key_from_f64(field.as_f64()))),
        FieldType::Cstr => Ok(normalize(index, field.as_str().as_bytes())),
        FieldType::Opaque => Ok(normalize(index, field.as_opaque())),
        FieldType::B96 | FieldType::B128 | FieldType::B160 | FieldType::B256 => {
            Ok(normalize(index, field.as_fixbin()))
        }
        FieldType::Null => unreachable!("composite handled above"),
    }
}

/// Composite key: member key fragments concatenated, then truncated at the
/// composite level. The default layout prefixes every fragment with its
/// length and marks NIL members explicitly; the terse layout (signalled by
/// the nullable bit on the composite shove) concatenates bare fragments.
pub fn composite_row_to_key(def: &TableSchema, ordinal: usize, row: TupleRo<'_>) -> Result<Key> {
    let shove = def.column_shove(ordinal);
    let index = shove.index();
    let tersely = index.is_nullable();
    let members = def.composite_members(ordinal)?;

    let mut raw = Vec::with_capacity(SHOVED_KEYLEN * 2);
    for &member in members {
        let member = member as usize;
        let member_shove = def.column_shove(member);
        let fragment = match member_fragment(def, member, row)? {
            Some(fragment) => fragment,
            None => {
                if !member_shove.is_nullable() {
                    return Err(Error::ColumnMissing);
                }
                if !tersely {
                    raw.push(0); // explicit NIL marker
                }
                continue;
            }
        };
        if tersely {
            raw.extend_from_slice(&fragment);
        } else {
            // length prefix, biased by one so NIL stays distinct from an
            // empty value; fragments are capped well under the bias limit
            let capped = fragment.len().min(u8::MAX as usize - 1);
            raw.push(capped as u8 + 1);
            raw.extend_from_slice(&fragment[..capped]);
        }
    }

    Ok(normalize_plain(index, &raw))
}

/// A member's contribution to a composite key: its plain key bytes before
/// any composite-level processing. `None` for a missing field.
fn member_fragment(def: &TableSchema, ordinal: usize, row: TupleRo<'_>) -> Result<Option<Vec<u8>>> {
    let shove = def.column_shove(ordinal);
    let ty = shove.data_type().ok_or(Error::SchemaCorrupted)?;
    let Some(field) = row.lookup(ordinal as u16, ty) else {
        return Ok(None);
    };
    let bytes = match ty {
        FieldType::Null | FieldType::Nested => return Err(Error::Oops),
        FieldType::Uint16 => (field.as_u16() as u32).to_le_bytes().to_vec(),
        FieldType::Uint32 => field.as_u32().to_le_bytes().to_vec(),
        FieldType::Uint64 => field.as_u64().to_le_bytes().to_vec(),
        FieldType::Datetime => field.as_datetime().fixedpoint().to_le_bytes().to_vec(),
        FieldType::Int32 => key_from_i32(field.as_i32()).to_le_bytes().to_vec(),
        FieldType::Int64 => key_from_i64(field.as_i64()).to_le_bytes().to_vec(),
        FieldType::Fp32 => key_from_f32(field.as_f32()).to_le_bytes().to_vec(),
        FieldType::Fp64 => key_from_f64(field.as_f64()).to_le_bytes().to_vec(),
        FieldType::Cstr => field.as_str().as_bytes().to_vec(),
        FieldType::Opaque => field.as_opaque().to_vec(),
        FieldType::B96 | FieldType::B128 | FieldType::B160 | FieldType::B256 => {
            field.as_fixbin().to_vec()
        }
    };
    Ok(Some(bytes))
}

// ------------- key -> value -------------

/// An owned decoded value, the inverse of key derivation. Truncated long
/// keys come back as `Shoved` raw comparison keys.
#[derive(Debug, Clone, PartialEq)]
pub enum OwnedValue {
    Null,
    Sint(i64),
    Uint(u64),
    Float(f64),
    Datetime(DateTime),
    String(String),
    Binary(Vec<u8>),
    Shoved(Vec<u8>),
    Begin,
    End,
}

impl OwnedValue {
    pub fn as_value(&self) -> Value<'_> {
        match self {
            OwnedValue::Null => Value::Null,
            OwnedValue::Sint(v) => Value::Sint(*v),
            OwnedValue::Uint(v) => Value::Uint(*v),
            OwnedValue::Float(v) => Value::Float(*v),
            OwnedValue::Datetime(v) => Value::Datetime(*v),
            OwnedValue::String(v) => Value::Str(v),
            OwnedValue::Binary(v) => Value::Binary(v),
            OwnedValue::Shoved(v) => Value::Shoved(v),
            OwnedValue::Begin => Value::Begin,
            OwnedValue::End => Value::End,
        }
    }
}

fn key_u32(bytes: &[u8]) -> Result<u32> {
    Ok(u32::from_le_bytes(
        bytes.try_into().map_err(|_| Error::IndexCorrupted)?,
    ))
}

fn key_u64(bytes: &[u8]) -> Result<u64> {
    Ok(u64::from_le_bytes(
        bytes.try_into().map_err(|_| Error::IndexCorrupted)?,
    ))
}

/// Decodes a stored index key back into a value.
pub fn key_to_value(shove: Shove, key: &[u8]) -> Result<OwnedValue> {
    let index = shove.index();
    let ty = shove.data_type().ok_or(Error::SchemaCorrupted)?;
    let nullable = index.is_indexed_and_nullable();

    if index.is_unordered() && (ty >= FieldType::B96 || ty == FieldType::Null) {
        if key.len() != 8 {
            return Err(Error::IndexCorrupted);
        }
        return Ok(OwnedValue::Shoved(key.to_vec()));
    }

    if ty >= FieldType::Cstr {
        if key.len() > MAX_KEYLEN {
            if key.len() != SHOVED_KEYLEN {
                return Err(Error::IndexCorrupted);
            }
            return Ok(OwnedValue::Shoved(key.to_vec()));
        }
        let mut body = key;
        if nullable {
            if body.is_empty() {
                return Ok(OwnedValue::Null);
            }
            if index.is_obverse() {
                if body[0] != NOTNIL_PREFIX {
                    return Err(Error::IndexCorrupted);
                }
                body = &body[1..];
            } else {
                if body[body.len() - 1] != NOTNIL_PREFIX {
                    return Err(Error::IndexCorrupted);
                }
                body = &body[..body.len() - 1];
            }
        }
        return Ok(match ty {
            FieldType::Cstr => OwnedValue::String(
                String::from_utf8(body.to_vec()).map_err(|_| Error::IndexCorrupted)?,
            ),
            _ => OwnedValue::Binary(body.to_vec()),
        });
    }

    match ty {
        FieldType::Null => {
            // composite keys expose only the comparison form
            if key.len() > MAX_KEYLEN && key.len() != SHOVED_KEYLEN {
                return Err(Error::IndexCorrupted);
            }
            Ok(OwnedValue::Shoved(key.to_vec()))
        }
        FieldType::Uint16 => {
            let v = key_u32(key)?;
            if v > u16::MAX as u32 {
                return Err(Error::IndexCorrupted);
            }
            let nil = if index.is_obverse() { 0 } else { u16::MAX as u32 };
            if nullable && v == nil {
                return Ok(OwnedValue::Null);
            }
            Ok(OwnedValue::Uint(v as u64))
        }
        FieldType::Uint32 => {
            let v = key_u32(key)?;
            let nil = if index.is_obverse() { 0 } else { u32::MAX };
            if nullable && v == nil {
                return Ok(OwnedValue::Null);
            }
            Ok(OwnedValue::Uint(v as u64))
        }
        FieldType::Uint64 => {
            let v = key_u64(key)?;
            let nil = if index.is_obverse() { 0 } else { u64::MAX };
            if nullable && v == nil {
                return Ok(OwnedValue::Null);
            }
            Ok(OwnedValue::Uint(v))
        }
        FieldType::Int32 => {
            let v = i32_from_key(key_u32(key)?);
            if nullable && v == denil::INT32 {
                return Ok(OwnedValue::Null);
            }
            Ok(OwnedValue::Sint(v as i64))
        }
        FieldType::Int64 => {
            let v = i64_from_key(key_u64(key)?);
            if nullable && v == denil::INT64 {
                return Ok(OwnedValue::Null);
            }
            Ok(OwnedValue::Sint(v))
        }
        FieldType::Fp32 => {
            let v = f32_from_key(key_u32(key)?);
            if nullable && v.to_bits() == denil::FP32_BITS {
                return Ok(OwnedValue::Null);
            }
            Ok(OwnedValue::Float(v as f64))
        }
        FieldType::Fp64 => {
            let v = f64_from_key(key_u64(key)?);
            if nullable && v.to_bits() == denil::FP64_BITS {
                return Ok(OwnedValue::Null);
            }
            Ok(OwnedValue::Float(v))
        }
        FieldType::Datetime => {
            let v = key_u64(key)?;
            if nullable && v == denil::DATETIME {
                return Ok(OwnedValue::Null);
            }
            Ok(OwnedValue::Datetime(DateTime::from_fixedpoint(v)))
        }
        FieldType::B96 | FieldType::B128 | FieldType::B160 | FieldType::B256 => {
            let want = tuple::UNIT_SIZE * ty.fixed_units().unwrap();
            if key.len() != want {
                return Err(Error::IndexCorrupted);
            }
            let fill = if index.is_obverse() { 0x00 } else { 0xFF };
            if nullable && key.iter().all(|b| *b == fill) {
                return Ok(OwnedValue::Null);
            }
            Ok(OwnedValue::Binary(key.to_vec()))
        }
        _ => Err(Error::Oops),
    }
}
