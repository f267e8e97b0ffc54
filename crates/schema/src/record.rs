//! Stored schema records and the catalog dictionary.
//!
//! ## Record layout (little endian)
//!
//! ```text
//! [checksum: u64][signature: u32][count: u32][version_tsn: u64]
//! [column shove: u64] * count
//! [arity: u16][member ordinal: u16 * arity]  per composite column
//! ```
//!
//! The checksum is `t1ha2_atonce` over everything after the checksum field,
//! seeded with [`SCHEMA_CHECKSEED`](crate::SCHEMA_CHECKSEED). A record is
//! rejected wholesale on any mismatch — schema corruption is not a
//! recoverable condition.
//!
//! ## Dictionary
//!
//! The catalog keeps one distinguished entry (key = shove 0) with every
//! symbolic name in original case, TAB-delimited, in descending order of
//! the internal key `name_hash << 10 | length`.

use crate::shove::{Shove, NAME_HASH_SHIFT};
use crate::{
    name_to_shove, shove_eq, Result, SchemaError, MAX_COLS, SCHEMA_CHECKSEED, SCHEMA_SIGNATURE,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::io::Write;

const HEADER_BYTES: usize = 8 + 4 + 4 + 8;

/// Serializer for the on-catalog schema record.
pub struct StoredSchema;

impl StoredSchema {
    /// Encodes a sorted column list plus composite member lists (ordinals
    /// into that list) into the checksummed record bytes.
    pub fn encode(
        columns: &[Shove],
        composites: &[(usize, Vec<u16>)],
        version_tsn: u64,
    ) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_BYTES + columns.len() * 8);
        bytes.write_u64::<LittleEndian>(0).unwrap(); // checksum, patched below
        bytes.write_u32::<LittleEndian>(SCHEMA_SIGNATURE).unwrap();
        bytes.write_u32::<LittleEndian>(columns.len() as u32).unwrap();
        bytes.write_u64::<LittleEndian>(version_tsn).unwrap();
        for column in columns {
            bytes.write_u64::<LittleEndian>(column.0).unwrap();
        }
        for (_, members) in composites {
            bytes.write_u16::<LittleEndian>(members.len() as u16).unwrap();
            for member in members {
                bytes.write_u16::<LittleEndian>(*member).unwrap();
            }
        }
        let checksum = t1ha::t1ha2_atonce(&bytes[8..], SCHEMA_CHECKSEED);
        bytes[..8].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }
}

/// Decoded, validated schema of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    table: Shove,
    version_tsn: u64,
    columns: Vec<Shove>,
    /// Member ordinals per column; empty for non-composite columns.
    composites: Vec<Vec<u16>>,
}

impl TableSchema {
    /// Decodes and fully validates a stored record read from the catalog
    /// under `table`.
    pub fn decode(table: Shove, bytes: &[u8]) -> Result<TableSchema> {
        if !table.is_table() {
            return Err(SchemaError::Corrupt);
        }
        if bytes.len() < HEADER_BYTES || (bytes.len() - HEADER_BYTES) % 2 != 0 {
            return Err(SchemaError::Corrupt);
        }
        let mut rdr = &bytes[..];
        let checksum = rdr.read_u64::<LittleEndian>().unwrap();
        if checksum != t1ha::t1ha2_atonce(&bytes[8..], SCHEMA_CHECKSEED) {
            return Err(SchemaError::Corrupt);
        }
        let signature = rdr.read_u32::<LittleEndian>().unwrap();
        if signature != SCHEMA_SIGNATURE {
            return Err(SchemaError::Corrupt);
        }
        let count = rdr.read_u32::<LittleEndian>().unwrap() as usize;
        if count < 1 || count > MAX_COLS {
            return Err(SchemaError::Corrupt);
        }
        let version_tsn = rdr.read_u64::<LittleEndian>().unwrap();
        if version_tsn == 0 {
            return Err(SchemaError::Corrupt);
        }
        if bytes.len() < HEADER_BYTES + count * 8 {
            return Err(SchemaError::Corrupt);
        }
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            columns.push(Shove(rdr.read_u64::<LittleEndian>().unwrap()));
        }

        // the column order must already be canonical
        let prio = |s: &Shove| -> u8 {
            let index = s.index();
            if index.is_indexed() {
                if index.is_primary() {
                    0
                } else {
                    1
                }
            } else if index.is_nullable() {
                3
            } else {
                2
            }
        };
        if !columns.windows(2).all(|w| (prio(&w[0]), w[0].0) <= (prio(&w[1]), w[1].0)) {
            return Err(SchemaError::Corrupt);
        }
        if !columns[0].index().is_primary() {
            return Err(SchemaError::Corrupt);
        }

        // composite streams, in column order
        let mut composites = vec![Vec::new(); count];
        for (nth, column) in columns.iter().enumerate() {
            if !column.is_composite() {
                if !column.index().is_valid() || column.data_type().is_none() {
                    return Err(SchemaError::Corrupt);
                }
                continue;
            }
            if !column.index().is_indexed() {
                return Err(SchemaError::Corrupt);
            }
            let arity = rdr.read_u16::<LittleEndian>().map_err(|_| SchemaError::Corrupt)? as usize;
            if arity < 2 {
                return Err(SchemaError::Corrupt);
            }
            let mut members = Vec::with_capacity(arity);
            for _ in 0..arity {
                let ordinal =
                    rdr.read_u16::<LittleEndian>().map_err(|_| SchemaError::Corrupt)?;
                if ordinal as usize >= count || columns[ordinal as usize].is_composite() {
                    return Err(SchemaError::Corrupt);
                }
                members.push(ordinal);
            }
            composites[nth] = members;
        }
        if !rdr.is_empty() {
            return Err(SchemaError::Corrupt);
        }

        Ok(TableSchema {
            table,
            version_tsn,
            columns,
            composites,
        })
    }

    pub fn table_shove(&self) -> Shove {
        self.table
    }

    pub fn version_tsn(&self) -> u64 {
        self.version_tsn
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_shove(&self, ordinal: usize) -> Shove {
        self.columns[ordinal]
    }

    pub fn columns(&self) -> &[Shove] {
        &self.columns
    }

    /// The primary index column.
    pub fn pk(&self) -> Shove {
        self.columns[0]
    }

    pub fn has_secondary(&self) -> bool {
        self.columns.len() > 1 && self.columns[1].index().is_secondary()
    }

    /// Indexed columns are a prefix of the canonical order; this is its
    /// length (primary included).
    pub fn index_count(&self) -> usize {
        self.columns
            .iter()
            .take_while(|s| s.index().is_indexed())
            .count()
    }

    /// Member ordinals of a composite column.
    pub fn composite_members(&self, ordinal: usize) -> Result<&[u16]> {
        let members = &self.composites[ordinal];
        if members.len() < 2 {
            return Err(SchemaError::Corrupt);
        }
        Ok(members)
    }

    /// Resolves a column shove (by name hash) to its ordinal.
    pub fn find_column(&self, wanted: Shove) -> Option<usize> {
        self.columns.iter().position(|s| shove_eq(*s, wanted))
    }

    /// Re-encodes this schema (used by catalog rewrites and tests).
    pub fn encode(&self) -> Vec<u8> {
        let composites: Vec<(usize, Vec<u16>)> = self
            .composites
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.is_empty())
            .map(|(n, m)| (n, m.clone()))
            .collect();
        StoredSchema::encode(&self.columns, &composites, self.version_tsn)
    }
}

/// The catalog dictionary: original-case symbolic names keyed by
/// `name_hash << 10 | length`, iterated in descending key order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Dictionary {
    items: BTreeMap<u64, String>,
}

impl Dictionary {
    const LEN_MASK: u64 = (1 << NAME_HASH_SHIFT) - 1;

    fn internal_key(name: &str) -> Result<u64> {
        let hash = name_to_shove(name)?;
        Ok(hash.0 | name.len() as u64)
    }

    pub fn new() -> Dictionary {
        Dictionary::default()
    }

    /// Parses a serialized dictionary; every entry must be a valid name.
    pub fn parse(bytes: &[u8]) -> Result<Dictionary> {
        let text = std::str::from_utf8(bytes).map_err(|_| SchemaError::Corrupt)?;
        let mut dict = Dictionary::new();
        if text.is_empty() {
            return Ok(dict);
        }
        for name in text.split('\t') {
            let key = Self::internal_key(name).map_err(|_| SchemaError::Corrupt)?;
            dict.items.insert(key, name.to_string());
        }
        Ok(dict)
    }

    /// TAB-joined serialized form, descending hash order.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (nth, (_, name)) in self.items.iter().rev().enumerate() {
            if nth > 0 {
                out.push(b'\t');
            }
            out.write_all(name.as_bytes()).unwrap();
        }
        out
    }

    /// Adds a name, keeping the original case of the first occurrence.
    pub fn merge(&mut self, name: &str) -> Result<()> {
        let key = Self::internal_key(name)?;
        self.items.entry(key).or_insert_with(|| name.to_string());
        Ok(())
    }

    /// Copies the entry for `shove` from another dictionary, if present.
    pub fn pickup(&mut self, from: &Dictionary, shove: Shove) {
        if let Some((key, name)) = from.entry_for(shove) {
            self.items.insert(key, name.to_string());
        }
    }

    fn entry_for(&self, shove: Shove) -> Option<(u64, &str)> {
        let base = shove.0 & !Self::LEN_MASK;
        self.items
            .range(base..=base | Self::LEN_MASK)
            .next()
            .map(|(k, v)| (*k, v.as_str()))
    }

    /// Original-case name for a table or column shove.
    pub fn lookup(&self, shove: Shove) -> Option<&str> {
        self.entry_for(shove).map(|(_, name)| name)
    }

    pub fn exists(&self, shove: Shove) -> bool {
        self.entry_for(shove).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
