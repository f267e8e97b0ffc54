//! Shove identifiers: packed `(name_hash, index_flags, data_type)` ids for
//! tables and columns, plus the symbolic-name rules and the derived
//! sub-database names.
//!
//! ```text
//! 63                    10 9       5 4        0
//! [name hash: 54 bits    ][index    ][data type]
//! ```
//!
//! Two shoves denote the same column when they agree outside the low
//! 10 bits; the data type and index flags ride along so most call sites
//! never re-read the schema record.

use crate::{SchemaError, NAME_LEN_MAX, NAME_LEN_MIN};
use tuple::FieldType;

/// Shift of the name hash inside a shove.
pub const NAME_HASH_SHIFT: u32 = 10;

const TYPE_MASK: u64 = 0x1F;
const INDEX_SHIFT: u32 = 5;
const INDEX_MASK: u64 = 0x1F << INDEX_SHIFT;

/// Seed of the symbolic-name hash (fixed; names are upper-cased first).
const NAME_SEED: u64 = 0x007D_7859_C174_3733 + 1_543_675_803;

/// Index kind of a column, five flag bits positioned for direct use inside
/// a [`Shove`]. Only the combinations enumerated by [`IndexType::is_valid`]
/// are legal; constructor constants cover all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexType(pub u32);

impl IndexType {
    pub const UNIQUE: u32 = 1 << INDEX_SHIFT;
    pub const ORDERED: u32 = 2 << INDEX_SHIFT;
    pub const OBVERSE: u32 = 4 << INDEX_SHIFT;
    pub const SECONDARY: u32 = 8 << INDEX_SHIFT;
    pub const NULLABLE: u32 = 16 << INDEX_SHIFT;

    /// Not indexed, value required.
    pub const NONE: IndexType = IndexType(0);
    /// Not indexed, value optional.
    pub const NONE_NULLABLE: IndexType = IndexType(Self::NULLABLE);

    pub const PRIMARY_WITHDUPS_ORDERED_OBVERSE: IndexType =
        IndexType(Self::ORDERED | Self::OBVERSE);
    pub const PRIMARY_WITHDUPS_ORDERED_OBVERSE_NULLABLE: IndexType =
        IndexType(Self::ORDERED | Self::OBVERSE | Self::NULLABLE);
    pub const PRIMARY_WITHDUPS_ORDERED_REVERSE: IndexType = IndexType(Self::ORDERED);
    pub const PRIMARY_WITHDUPS_ORDERED_REVERSE_NULLABLE: IndexType =
        IndexType(Self::ORDERED | Self::NULLABLE);

    pub const PRIMARY_UNIQUE_ORDERED_OBVERSE: IndexType =
        IndexType(Self::UNIQUE | Self::ORDERED | Self::OBVERSE);
    pub const PRIMARY_UNIQUE_ORDERED_OBVERSE_NULLABLE: IndexType =
        IndexType(Self::UNIQUE | Self::ORDERED | Self::OBVERSE | Self::NULLABLE);
    pub const PRIMARY_UNIQUE_ORDERED_REVERSE: IndexType =
        IndexType(Self::UNIQUE | Self::ORDERED);
    pub const PRIMARY_UNIQUE_ORDERED_REVERSE_NULLABLE: IndexType =
        IndexType(Self::UNIQUE | Self::ORDERED | Self::NULLABLE);

    pub const PRIMARY_UNIQUE_UNORDERED: IndexType = IndexType(Self::UNIQUE | Self::OBVERSE);
    pub const PRIMARY_UNIQUE_UNORDERED_NULLABLE_OBVERSE: IndexType =
        IndexType(Self::UNIQUE | Self::OBVERSE | Self::NULLABLE);
    pub const PRIMARY_UNIQUE_UNORDERED_NULLABLE_REVERSE: IndexType =
        IndexType(Self::UNIQUE | Self::NULLABLE);

    pub const PRIMARY_WITHDUPS_UNORDERED: IndexType = IndexType(Self::OBVERSE);
    pub const PRIMARY_WITHDUPS_UNORDERED_NULLABLE_OBVERSE: IndexType =
        IndexType(Self::OBVERSE | Self::NULLABLE);
    // primary withdups unordered nullable reverse is unavailable: its bit
    // pattern collides with NONE_NULLABLE.

    pub const SECONDARY_WITHDUPS_ORDERED_OBVERSE: IndexType =
        IndexType(Self::SECONDARY | Self::ORDERED | Self::OBVERSE);
    pub const SECONDARY_WITHDUPS_ORDERED_OBVERSE_NULLABLE: IndexType =
        IndexType(Self::SECONDARY | Self::ORDERED | Self::OBVERSE | Self::NULLABLE);
    pub const SECONDARY_WITHDUPS_ORDERED_REVERSE: IndexType =
        IndexType(Self::SECONDARY | Self::ORDERED);
    pub const SECONDARY_WITHDUPS_ORDERED_REVERSE_NULLABLE: IndexType =
        IndexType(Self::SECONDARY | Self::ORDERED | Self::NULLABLE);

    pub const SECONDARY_UNIQUE_ORDERED_OBVERSE: IndexType =
        IndexType(Self::SECONDARY | Self::UNIQUE | Self::ORDERED | Self::OBVERSE);
    pub const SECONDARY_UNIQUE_ORDERED_OBVERSE_NULLABLE: IndexType = IndexType(
        Self::SECONDARY | Self::UNIQUE | Self::ORDERED | Self::OBVERSE | Self::NULLABLE,
    );
    pub const SECONDARY_UNIQUE_ORDERED_REVERSE: IndexType =
        IndexType(Self::SECONDARY | Self::UNIQUE | Self::ORDERED);
    pub const SECONDARY_UNIQUE_ORDERED_REVERSE_NULLABLE: IndexType =
        IndexType(Self::SECONDARY | Self::UNIQUE | Self::ORDERED | Self::NULLABLE);

    pub const SECONDARY_UNIQUE_UNORDERED: IndexType =
        IndexType(Self::SECONDARY | Self::UNIQUE | Self::OBVERSE);
    pub const SECONDARY_UNIQUE_UNORDERED_NULLABLE_OBVERSE: IndexType =
        IndexType(Self::SECONDARY | Self::UNIQUE | Self::OBVERSE | Self::NULLABLE);
    pub const SECONDARY_UNIQUE_UNORDERED_NULLABLE_REVERSE: IndexType =
        IndexType(Self::SECONDARY | Self::UNIQUE | Self::NULLABLE);

    pub const SECONDARY_WITHDUPS_UNORDERED: IndexType =
        IndexType(Self::SECONDARY | Self::OBVERSE);
    pub const SECONDARY_WITHDUPS_UNORDERED_NULLABLE_OBVERSE: IndexType =
        IndexType(Self::SECONDARY | Self::OBVERSE | Self::NULLABLE);
    pub const SECONDARY_WITHDUPS_UNORDERED_NULLABLE_REVERSE: IndexType =
        IndexType(Self::SECONDARY | Self::NULLABLE);

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Indexed at all (nullable alone does not count).
    pub fn is_indexed(self) -> bool {
        self.0 & (Self::UNIQUE | Self::ORDERED | Self::OBVERSE | Self::SECONDARY) != 0
    }

    pub fn is_unique(self) -> bool {
        self.0 & Self::UNIQUE != 0
    }

    pub fn is_ordered(self) -> bool {
        self.0 & Self::ORDERED != 0
    }

    pub fn is_unordered(self) -> bool {
        !self.is_ordered()
    }

    pub fn is_obverse(self) -> bool {
        self.0 & Self::OBVERSE != 0
    }

    pub fn is_reverse(self) -> bool {
        !self.is_obverse()
    }

    pub fn is_secondary(self) -> bool {
        self.0 & Self::SECONDARY != 0
    }

    pub fn is_primary(self) -> bool {
        self.is_indexed() && !self.is_secondary()
    }

    pub fn is_nullable(self) -> bool {
        self.0 & Self::NULLABLE != 0
    }

    pub fn is_indexed_and_nullable(self) -> bool {
        self.is_indexed() && self.is_nullable()
    }

    /// Whether this is one of the legal flag combinations.
    pub fn is_valid(self) -> bool {
        const LEGAL: &[IndexType] = &[
            IndexType::NONE,
            IndexType::NONE_NULLABLE,
            IndexType::PRIMARY_WITHDUPS_ORDERED_OBVERSE,
            IndexType::PRIMARY_WITHDUPS_ORDERED_OBVERSE_NULLABLE,
            IndexType::PRIMARY_WITHDUPS_ORDERED_REVERSE,
            IndexType::PRIMARY_WITHDUPS_ORDERED_REVERSE_NULLABLE,
            IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE,
            IndexType::PRIMARY_UNIQUE_ORDERED_OBVERSE_NULLABLE,
            IndexType::PRIMARY_UNIQUE_ORDERED_REVERSE,
            IndexType::PRIMARY_UNIQUE_ORDERED_REVERSE_NULLABLE,
            IndexType::PRIMARY_UNIQUE_UNORDERED,
            IndexType::PRIMARY_UNIQUE_UNORDERED_NULLABLE_OBVERSE,
            IndexType::PRIMARY_UNIQUE_UNORDERED_NULLABLE_REVERSE,
            IndexType::PRIMARY_WITHDUPS_UNORDERED,
            IndexType::PRIMARY_WITHDUPS_UNORDERED_NULLABLE_OBVERSE,
            IndexType::SECONDARY_WITHDUPS_ORDERED_OBVERSE,
            IndexType::SECONDARY_WITHDUPS_ORDERED_OBVERSE_NULLABLE,
            IndexType::SECONDARY_WITHDUPS_ORDERED_REVERSE,
            IndexType::SECONDARY_WITHDUPS_ORDERED_REVERSE_NULLABLE,
            IndexType::SECONDARY_UNIQUE_ORDERED_OBVERSE,
            IndexType::SECONDARY_UNIQUE_ORDERED_OBVERSE_NULLABLE,
            IndexType::SECONDARY_UNIQUE_ORDERED_REVERSE,
            IndexType::SECONDARY_UNIQUE_ORDERED_REVERSE_NULLABLE,
            IndexType::SECONDARY_UNIQUE_UNORDERED,
            IndexType::SECONDARY_UNIQUE_UNORDERED_NULLABLE_OBVERSE,
            IndexType::SECONDARY_UNIQUE_UNORDERED_NULLABLE_REVERSE,
            IndexType::SECONDARY_WITHDUPS_UNORDERED,
            IndexType::SECONDARY_WITHDUPS_UNORDERED_NULLABLE_OBVERSE,
            IndexType::SECONDARY_WITHDUPS_UNORDERED_NULLABLE_REVERSE,
        ];
        LEGAL.contains(&self)
    }
}

/// Marker distinguishing a table shove from a column shove: the bare
/// secondary bit is an index combination no column may use.
pub const TABLE_FLAG: u64 = IndexType::SECONDARY as u64;

/// 64-bit packed identifier of a table or column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Shove(pub u64);

impl Shove {
    /// The catalog dictionary entry lives under shove zero.
    pub const DICT: Shove = Shove(0);

    /// Packs a column shove from a name hash, data type and index kind.
    pub fn column(name_hash: Shove, data_type: FieldType, index: IndexType) -> Shove {
        debug_assert_eq!(name_hash.0 & ((1 << NAME_HASH_SHIFT) - 1), 0);
        Shove(name_hash.0 | data_type as u64 | index.0 as u64)
    }

    /// Packs a table shove from a name hash.
    pub fn table(name_hash: Shove) -> Shove {
        debug_assert_eq!(name_hash.0 & ((1 << NAME_HASH_SHIFT) - 1), 0);
        Shove(name_hash.0 | TABLE_FLAG)
    }

    pub fn data_type(self) -> Option<FieldType> {
        FieldType::from_bits((self.0 & TYPE_MASK) as u8)
    }

    pub fn index(self) -> IndexType {
        IndexType((self.0 & INDEX_MASK) as u32)
    }

    pub fn is_table(self) -> bool {
        (self.0 & INDEX_MASK) == TABLE_FLAG && (self.0 & TYPE_MASK) == 0
    }

    /// Composite pseudo-columns are indexed columns of type null.
    pub fn is_composite(self) -> bool {
        self.data_type() == Some(FieldType::Null)
    }

    pub fn is_nullable(self) -> bool {
        self.index().is_nullable()
    }

    /// Ordinal columns have short fixed keys (or hashed unordered ones);
    /// a primary index over them is cheap.
    pub fn is_ordinal(self) -> bool {
        if self.index().is_unordered() {
            return true;
        }
        matches!(
            self.data_type(),
            Some(
                FieldType::Uint16
                    | FieldType::Int32
                    | FieldType::Uint32
                    | FieldType::Fp32
                    | FieldType::Int64
                    | FieldType::Uint64
                    | FieldType::Fp64
                    | FieldType::Datetime
            )
        )
    }

    pub fn name_hash(self) -> u64 {
        self.0 >> NAME_HASH_SHIFT
    }
}

/// True when two shoves refer to the same symbolic name: they differ only
/// in the low 10 bits (data type and index flags).
pub fn shove_eq(a: Shove, b: Shove) -> bool {
    (a.0 ^ b.0) < (1 << NAME_HASH_SHIFT)
}

fn is_valid_name_char(c: u8, first: bool) -> bool {
    if first {
        c.is_ascii_alphabetic()
    } else {
        c.is_ascii_alphanumeric() || c == b'_'
    }
}

/// Validates a symbolic name and returns its hash shove (low 10 bits
/// clear). Names are case-insensitive: the hash is taken over the
/// upper-cased bytes. Length 1..=64, first char alphabetic, then
/// alphanumerics and underscore.
pub fn name_to_shove(name: &str) -> crate::Result<Shove> {
    let bytes = name.as_bytes();
    if bytes.len() < NAME_LEN_MIN || bytes.len() > NAME_LEN_MAX {
        return Err(SchemaError::BadName);
    }
    let mut upper = [0u8; NAME_LEN_MAX];
    for (i, &c) in bytes.iter().enumerate() {
        if !is_valid_name_char(c, i == 0) {
            return Err(SchemaError::BadName);
        }
        upper[i] = c.to_ascii_uppercase();
    }
    let hash = t1ha::t1ha2_atonce(&upper[..bytes.len()], NAME_SEED);
    let shove = Shove(hash << NAME_HASH_SHIFT);
    if shove.0 == 0 {
        // hash degenerated to zero: indistinguishable from "no name"
        return Err(SchemaError::BadName);
    }
    Ok(shove)
}

/// Validates a table name and returns the full table shove.
pub fn table_shove(name: &str) -> crate::Result<Shove> {
    Ok(Shove::table(name_to_shove(name)?))
}

/// Shove of the sub-database holding index `index_id` of `table`:
/// the table's name hash with the low 10 bits replaced by the ordinal.
/// Ordinal 0 is the primary store.
pub fn dbi_shove(table: Shove, index_id: usize) -> Shove {
    debug_assert!(table.is_table());
    debug_assert!(index_id < crate::MAX_INDEXES);
    Shove((table.0 - TABLE_FLAG) + index_id as u64)
}

/// True when a dbi shove names a primary store.
pub fn dbi_shove_is_pk(dbi: Shove) -> bool {
    dbi.0 & ((1 << NAME_HASH_SHIFT) - 1) == 0
}

/// Stable sub-database name derived from a shove, high bits first:
/// eleven alphabet characters (ceil(64/6) sextets cover the 64-bit id).
/// The original format describes this as a 12-character result because it
/// counts the C string's NUL terminator; a Rust `String` carries no
/// terminator, so the twelfth byte disappears while the encoded name
/// stays byte-identical. The catalog itself is `dbi_name(Shove::DICT)`.
pub fn dbi_name(shove: Shove) -> String {
    const ALPHABET: &[u8; 64] =
        b"@0123456789qwertyuiopasdfghjklzxcvbnmQWERTYUIOPASDFGHJKLZXCVBNM_";
    let mut chars = [0u8; 11];
    let mut rest = shove.0;
    for slot in chars.iter_mut().rev() {
        *slot = ALPHABET[(rest & 63) as usize];
        rest >>= 6;
    }
    String::from_utf8(chars.to_vec()).expect("alphabet is ascii")
}
