//! # Tuple — linearized record codec
//!
//! A tuple is a contiguous run of 4-byte **units** holding a small
//! JSON-like record: a one-unit header, a descriptor table, and a payload
//! region. Fields are looked up by a 10-bit column tag in O(descriptors),
//! edited in place when slack allows, and moved between processes without
//! any parsing step.
//!
//! ## Serialized layout
//!
//! ```text
//! [header: u32][descriptor units ...][payload units ...]
//! ```
//!
//! The header's low 16 bits hold the descriptor count, the high 16 bits the
//! total number of units that follow the header. An empty tuple is exactly
//! one header unit (4 bytes).
//!
//! ## Mutable layout
//!
//! The mutable form ([`TupleRw`]) owns a unit buffer with five cursors:
//!
//! ```text
//!         head          pivot         tail          end
//!          |              |             |             |
//! [hdr slot][descriptors..][payload ....][free ........]
//!            <- grow down   grow up ->
//! ```
//!
//! Descriptors grow toward lower indices from `pivot`, payload grows toward
//! higher indices. Unit `head - 1` is reserved for the serialized header, so
//! [`TupleRw::take`] is a pointer adjustment, not a copy. Erased fields are
//! tagged dead and accounted in `junk` until [`TupleRw::shrink`] compacts
//! the buffer.
//!
//! ## Module responsibilities
//!
//! | Module      | Purpose                                             |
//! |-------------|-----------------------------------------------------|
//! | [`desc`]    | Descriptor and varlen-header bit packing            |
//! | [`ro`]      | Read-only view: validation, lookup, iteration, cmp  |
//! | [`rw`]      | Mutable form: insert/update/erase/shrink/take/fetch |
//! | [`time`]    | 32.32 fixed-point UTC datetime                      |

mod desc;
mod ro;
mod rw;
pub mod time;

pub use desc::{Descriptor, VarlenHeader, COLUMN_DEAD, MAX_COLUMN};
pub use ro::{check_and_get_buffer_size, cmp_tuples, FieldRef, TupleRo, ValueBytes};
pub use rw::TupleRw;
pub use time::DateTime;

use thiserror::Error;

/// Size of one unit in bytes. Every offset and length in the tuple format is
/// expressed in units.
pub const UNIT_SIZE: usize = 4;

/// Maximum value of any 16-bit counter in the format.
pub const LIMIT: usize = u16::MAX as usize;

/// Maximum number of field descriptors in one tuple.
pub const MAX_ITEMS: usize = LIMIT;

/// Maximum payload units for a single field (varlen header included).
pub const MAX_FIELD_UNITS: usize = LIMIT;

/// Maximum total size of a serialized tuple in bytes.
pub const MAX_TUPLE_BYTES: usize = LIMIT * UNIT_SIZE;

/// Upper bound for any caller-provided tuple buffer.
pub const BUFFER_LIMIT: usize = MAX_TUPLE_BYTES * 2;

/// Designated-empty sentinels observed through the typed field getters when
/// a field is missing. These bit patterns are part of the wire format: key
/// derivation uses the same values for NIL columns.
pub mod denil {
    /// DENIL for `uint16` fields.
    pub const UINT16: u16 = u16::MAX;
    /// DENIL for `int32` fields.
    pub const INT32: i32 = i32::MIN;
    /// DENIL for `uint32` fields.
    pub const UINT32: u32 = u32::MAX;
    /// DENIL for `int64` fields.
    pub const INT64: i64 = i64::MIN;
    /// DENIL for `uint64` fields.
    pub const UINT64: u64 = u64::MAX;
    /// DENIL bit pattern for `fp32`: a negative quiet NaN with every
    /// mantissa bit set.
    pub const FP32_BITS: u32 = 0xFFFF_FFFF;
    /// Substitute quiet-NaN pattern used when a value would collide with
    /// [`FP32_BITS`] after an f64 -> f32 narrowing.
    pub const FP32_QSNAN_BITS: u32 = 0xFFFF_FFFE;
    /// DENIL bit pattern for `fp64`.
    pub const FP64_BITS: u64 = 0xFFFF_FFFF_FFFF_FFFF;
    /// The f64 bit pattern that narrows exactly to [`FP32_BITS`].
    pub const FP32X64_BITS: u64 = 0xFFFF_FFFF_E000_0000;
    /// The f64 substitute that narrows to [`FP32_QSNAN_BITS`] instead.
    pub const FP32X64_QSNAN_BITS: u64 = 0xFFFF_FFFF_C000_0000;
    /// DENIL for `datetime` fields (the zero instant).
    pub const DATETIME: u64 = 0;

    /// DENIL for `fp32` fields.
    pub fn fp32() -> f32 {
        f32::from_bits(FP32_BITS)
    }

    /// DENIL for `fp64` fields.
    pub fn fp64() -> f64 {
        f64::from_bits(FP64_BITS)
    }
}

/// Storage type of a tuple field, 5 bits in the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum FieldType {
    /// No payload. Also reused at the schema level for composite columns.
    Null = 0,
    /// 16-bit unsigned, stored inline in the descriptor (booleans, enums).
    Uint16 = 1,
    Int32 = 2,
    Uint32 = 3,
    Fp32 = 4,
    Int64 = 5,
    Uint64 = 6,
    Fp64 = 7,
    /// 64-bit fixed-point UTC timestamp, see [`DateTime`].
    Datetime = 8,
    /// Opaque 12 bytes.
    B96 = 9,
    /// Opaque 16 bytes (uuid, ipv6).
    B128 = 10,
    /// Opaque 20 bytes (sha1).
    B160 = 11,
    /// Opaque 32 bytes (sha256).
    B256 = 12,
    /// UTF-8 string, length-prefixed, NUL terminator stored.
    Cstr = 13,
    /// Length-prefixed octet string.
    Opaque = 14,
    /// Whole serialized sub-tuple.
    Nested = 15,
}

impl FieldType {
    /// Decodes the 5-bit type id, ignoring the array flag.
    pub fn from_bits(bits: u8) -> Option<FieldType> {
        use FieldType::*;
        Some(match bits & 0x0F {
            0 => Null,
            1 => Uint16,
            2 => Int32,
            3 => Uint32,
            4 => Fp32,
            5 => Int64,
            6 => Uint64,
            7 => Fp64,
            8 => Datetime,
            9 => B96,
            10 => B128,
            11 => B160,
            12 => B256,
            13 => Cstr,
            14 => Opaque,
            15 => Nested,
            _ => return None,
        })
    }

    /// Payload units for fixed-size types, `None` for variable-length ones.
    /// `Null` and `Uint16` take zero out-of-line units.
    pub fn fixed_units(self) -> Option<usize> {
        use FieldType::*;
        Some(match self {
            Null | Uint16 => 0,
            Int32 | Uint32 | Fp32 => 1,
            Int64 | Uint64 | Fp64 | Datetime => 2,
            B96 => 3,
            B128 => 4,
            B160 => 5,
            B256 => 8,
            Cstr | Opaque | Nested => return None,
        })
    }

    /// True for `cstr`, `opaque` and `nested`.
    pub fn is_varlen(self) -> bool {
        self.fixed_units().is_none()
    }
}

/// Field selector for lookup, update and erase: either one concrete type or
/// an OR-group mask over the 16 type ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeMatch {
    /// Match exactly this storage type.
    Exact(FieldType),
    /// Match any type whose bit is set in the mask.
    Mask(u16),
}

impl TypeMatch {
    /// Any signed integer type (`int32`, `int64`).
    pub const ANY_INT: TypeMatch = TypeMatch::Mask(1 << 2 | 1 << 5);
    /// Any unsigned integer type (`uint16`, `uint32`, `uint64`).
    pub const ANY_UINT: TypeMatch = TypeMatch::Mask(1 << 1 | 1 << 3 | 1 << 6);
    /// Any float type (`fp32`, `fp64`).
    pub const ANY_FP: TypeMatch = TypeMatch::Mask(1 << 4 | 1 << 7);
    /// Any numeric type.
    pub const ANY_NUMBER: TypeMatch =
        TypeMatch::Mask(1 << 1 | 1 << 2 | 1 << 3 | 1 << 4 | 1 << 5 | 1 << 6 | 1 << 7);
    /// Any type at all.
    pub const ANY: TypeMatch = TypeMatch::Mask(u16::MAX);

    /// Whether `ty` satisfies this selector.
    pub fn matches(self, ty: FieldType) -> bool {
        match self {
            TypeMatch::Exact(want) => want == ty,
            TypeMatch::Mask(mask) => mask & (1u16 << (ty as u8)) != 0,
        }
    }
}

impl From<FieldType> for TypeMatch {
    fn from(ty: FieldType) -> Self {
        TypeMatch::Exact(ty)
    }
}

/// Errors of the tuple codec.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TupleError {
    /// The buffer cannot fit the requested descriptors or payload, and
    /// compaction could not recover enough space.
    #[error("no space left in tuple buffer")]
    NoSpace,
    /// A size or count limit of the format would be exceeded.
    #[error("tuple format limit exceeded")]
    Limit,
    /// An argument is out of range (column tag, buffer size, ...).
    #[error("invalid argument")]
    Invalid,
    /// A serialized tuple failed validation; the reason is the short
    /// human-readable condition that was violated.
    #[error("corrupt tuple: {0}")]
    Corrupt(&'static str),
    /// No field matched the given column and type selector.
    #[error("field not found")]
    FieldMissing,
}

/// Result alias of this crate.
pub type Result<T> = std::result::Result<T, TupleError>;

/// Minimum buffer size in bytes able to hold `items` descriptors and
/// `data_bytes` of payload, rounded up to whole units.
pub fn space(items: usize, data_bytes: usize) -> usize {
    (1 + items + bytes2units(data_bytes)) * UNIT_SIZE
}

/// Rounds a byte length up to whole units.
pub(crate) fn bytes2units(bytes: usize) -> usize {
    (bytes + UNIT_SIZE - 1) / UNIT_SIZE
}

pub(crate) fn units2bytes(units: usize) -> usize {
    units * UNIT_SIZE
}

#[cfg(test)]
mod tests;
