//! One sub-database: an ordered map with a configurable key comparator,
//! optional sorted duplicates, a sequence counter and bookkeeping for
//! statistics.

use bitflags::bitflags;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

bitflags! {
    /// Persistent flags of a sub-database. The comparator modes derive
    /// from these; they are fixed at creation and checked on every open.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DbiFlags: u32 {
        /// Keys compare from the last byte toward the first.
        const REVERSE_KEY = 0x02;
        /// Keys are native unsigned integers (4 or 8 little-endian bytes).
        const INTEGER_KEY = 0x08;
        /// Multiple sorted values per key.
        const DUP_SORT = 0x04;
        /// All duplicates have the same size.
        const DUP_FIXED = 0x10;
        /// Duplicates are native unsigned integers.
        const INTEGER_DUP = 0x20;
        /// Duplicates compare from the last byte.
        const REVERSE_DUP = 0x40;
        /// Create the sub-database if it does not exist (open-time only,
        /// not persistent).
        const CREATE = 0x4_0000;
    }
}

impl DbiFlags {
    /// The flags that persist with the sub-database.
    pub fn persistent(self) -> DbiFlags {
        self & !DbiFlags::CREATE
    }

    pub fn key_mode(self) -> KeyMode {
        if self.contains(DbiFlags::INTEGER_KEY) {
            KeyMode::Unsigned
        } else if self.contains(DbiFlags::REVERSE_KEY) {
            KeyMode::Reverse
        } else {
            KeyMode::Lexical
        }
    }

    pub fn dup_mode(self) -> KeyMode {
        if self.contains(DbiFlags::INTEGER_DUP) {
            KeyMode::Unsigned
        } else if self.contains(DbiFlags::REVERSE_DUP) {
            KeyMode::Reverse
        } else {
            KeyMode::Lexical
        }
    }
}

/// Byte-comparison mode, selected per sub-database instead of passing
/// comparator functions across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyMode {
    /// Plain memcmp order.
    Lexical,
    /// Compare from the last byte toward the first.
    Reverse,
    /// Native unsigned integers, 4 or 8 little-endian bytes.
    Unsigned,
}

impl KeyMode {
    pub fn cmp(self, a: &[u8], b: &[u8]) -> std::cmp::Ordering {
        match self {
            KeyMode::Lexical => a.cmp(b),
            KeyMode::Reverse => a.iter().rev().cmp(b.iter().rev()),
            KeyMode::Unsigned => {
                // unequal widths cannot mix inside one sub-database; order
                // by width first so the map stays total anyway
                a.len().cmp(&b.len()).then_with(|| a.iter().rev().cmp(b.iter().rev()))
            }
        }
    }
}

/// Key (or duplicate) bytes ordered by a [`KeyMode`]. Every key within one
/// map carries the same mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrdKey {
    pub bytes: Vec<u8>,
    mode: KeyMode,
}

impl OrdKey {
    pub fn new(bytes: &[u8], mode: KeyMode) -> OrdKey {
        OrdKey {
            bytes: bytes.to_vec(),
            mode,
        }
    }
}

impl Ord for OrdKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.mode.cmp(&self.bytes, &other.bytes)
    }
}

impl PartialOrd for OrdKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Values stored under one key.
#[derive(Debug, Clone)]
pub enum Slot {
    Single(Vec<u8>),
    Dups(BTreeSet<OrdKey>),
}

impl Slot {
    pub fn len(&self) -> usize {
        match self {
            Slot::Single(_) => 1,
            Slot::Dups(set) => set.len(),
        }
    }

    /// First value in duplicate order.
    pub fn first(&self) -> &[u8] {
        match self {
            Slot::Single(value) => value,
            Slot::Dups(set) => &set.iter().next().expect("slot never empty").bytes,
        }
    }

    pub fn last(&self) -> &[u8] {
        match self {
            Slot::Single(value) => value,
            Slot::Dups(set) => &set.iter().next_back().expect("slot never empty").bytes,
        }
    }
}

/// Aggregate statistics of one sub-database, with synthesized B+tree
/// geometry for cost estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DbiStat {
    pub entries: u64,
    pub depth: u32,
    pub branch_pages: u64,
    pub leaf_pages: u64,
    pub overflow_pages: u64,
    pub page_size: u32,
    pub mod_txnid: u64,
}

/// One named ordered map.
#[derive(Debug, Clone)]
pub struct SubDb {
    pub flags: DbiFlags,
    pub map: BTreeMap<OrdKey, Slot>,
    /// Per-dbi sequence counter (atomic get-and-add under the write txn).
    pub seq: u64,
    /// Commit id of the last transaction that modified this sub-database.
    pub mod_txnid: u64,
    /// Approximate byte footprint of keys plus values.
    pub bytes: usize,
}

pub const PAGE_SIZE: u32 = 4096;

impl SubDb {
    pub fn new(flags: DbiFlags) -> SubDb {
        SubDb {
            flags: flags.persistent(),
            map: BTreeMap::new(),
            seq: 0,
            mod_txnid: 0,
            bytes: 0,
        }
    }

    pub fn key_mode(&self) -> KeyMode {
        self.flags.key_mode()
    }

    pub fn dup_mode(&self) -> KeyMode {
        self.flags.dup_mode()
    }

    pub fn is_dupsort(&self) -> bool {
        self.flags.contains(DbiFlags::DUP_SORT)
    }

    pub fn key(&self, bytes: &[u8]) -> OrdKey {
        OrdKey::new(bytes, self.key_mode())
    }

    pub fn dup(&self, bytes: &[u8]) -> OrdKey {
        OrdKey::new(bytes, self.dup_mode())
    }

    /// Total entries, duplicates counted individually.
    pub fn entries(&self) -> u64 {
        self.map.values().map(|slot| slot.len() as u64).sum()
    }

    pub fn stat(&self) -> DbiStat {
        let entries = self.entries();
        let leaf_pages = 1 + self.bytes as u64 / PAGE_SIZE as u64;
        let branch_pages = leaf_pages / 16;
        let mut depth = 1;
        let mut reach = 1u64;
        while reach < leaf_pages {
            depth += 1;
            reach = reach.saturating_mul(16);
        }
        DbiStat {
            entries,
            depth,
            branch_pages,
            leaf_pages,
            overflow_pages: 0,
            page_size: PAGE_SIZE,
            mod_txnid: self.mod_txnid,
        }
    }

    /// Counts entries with keys in `[from, to)`; open bounds reach the
    /// respective end.
    pub fn count_range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> u64 {
        let lower = match from {
            Some(k) => Bound::Included(self.key(k)),
            None => Bound::Unbounded,
        };
        let upper = match to {
            Some(k) => Bound::Excluded(self.key(k)),
            None => Bound::Unbounded,
        };
        self.map
            .range((lower, upper))
            .map(|(_, slot)| slot.len() as u64)
            .sum()
    }

    /// Duplicates stored under an exact key.
    pub fn dup_count(&self, key: &[u8]) -> u64 {
        self.map.get(&self.key(key)).map(|s| s.len() as u64).unwrap_or(0)
    }
}
