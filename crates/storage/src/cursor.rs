//! Cursor primitives over a transaction.
//!
//! The cursor keeps its position as owned key/duplicate bytes and resolves
//! every operation against the transaction's current view of the
//! sub-database. A position whose entry has been deleted behaves like a
//! ghost: forward and backward steps land on the neighbors the deleted
//! entry used to have, and `GetCurrent` resolves to the successor — the
//! same observable behavior callers rely on after delete-at-cursor.

use crate::subdb::{Slot, SubDb};
use crate::txn::{Dbi, Txn};
use crate::{Result, StorageError};
use std::ops::Bound;

/// The cursor operation set of the engine contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOp {
    First,
    FirstDup,
    GetBoth,
    GetBothRange,
    GetCurrent,
    Last,
    LastDup,
    Next,
    NextDup,
    /// Duplicate-run batch step; this engine steps one key at a time.
    NextMultiple,
    NextNoDup,
    Prev,
    PrevDup,
    PrevMultiple,
    PrevNoDup,
    SetKey,
    SetRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pos {
    key: Vec<u8>,
    dup: Option<Vec<u8>>,
}

/// A cursor over one sub-database.
#[derive(Debug, Clone)]
pub struct Cursor {
    dbi: Dbi,
    pos: Option<Pos>,
}

type Pair = (Vec<u8>, Vec<u8>);

impl Cursor {
    pub fn new(dbi: Dbi) -> Cursor {
        Cursor { dbi, pos: None }
    }

    pub fn dbi(&self) -> Dbi {
        self.dbi
    }

    /// Forgets the position (used when rebinding to a renewed
    /// transaction).
    pub fn renew(&mut self) {
        self.pos = None;
    }

    fn sub<'t>(&self, txn: &'t Txn) -> Result<&'t SubDb> {
        txn.view(self.dbi)
    }

    fn set_pos(&mut self, sub: &SubDb, key: &[u8], dup: &[u8]) -> Pair {
        self.pos = Some(Pos {
            key: key.to_vec(),
            dup: sub.is_dupsort().then(|| dup.to_vec()),
        });
        (key.to_vec(), dup.to_vec())
    }

    /// Executes one cursor operation. `key`/`data` are required by the
    /// seek ops (`SetKey`, `SetRange`, `GetBoth`, `GetBothRange`). On
    /// success the position moves and the landed key/value pair is
    /// returned; on error the position is unchanged.
    pub fn get(
        &mut self,
        txn: &Txn,
        key: Option<&[u8]>,
        data: Option<&[u8]>,
        op: CursorOp,
    ) -> Result<Pair> {
        let sub = self.sub(txn)?;
        let landed: Option<(Vec<u8>, Vec<u8>)> = match op {
            CursorOp::First => first_of(sub),
            CursorOp::Last => last_of(sub),
            CursorOp::Next => match &self.pos {
                None => first_of(sub),
                Some(pos) => next_from(sub, pos),
            },
            CursorOp::Prev => match &self.pos {
                None => last_of(sub),
                Some(pos) => prev_from(sub, pos),
            },
            CursorOp::NextNoDup | CursorOp::NextMultiple => match &self.pos {
                None => first_of(sub),
                Some(pos) => next_nodup_from(sub, pos),
            },
            CursorOp::PrevNoDup | CursorOp::PrevMultiple => match &self.pos {
                None => last_of(sub),
                Some(pos) => prev_nodup_from(sub, pos),
            },
            CursorOp::NextDup => {
                let pos = self.pos.as_ref().ok_or(StorageError::NoCurrent)?;
                next_dup_from(sub, pos)
            }
            CursorOp::PrevDup => {
                let pos = self.pos.as_ref().ok_or(StorageError::NoCurrent)?;
                prev_dup_from(sub, pos)
            }
            CursorOp::FirstDup => {
                let pos = self.pos.as_ref().ok_or(StorageError::NoCurrent)?;
                dup_edge(sub, &pos.key, false)
            }
            CursorOp::LastDup => {
                let pos = self.pos.as_ref().ok_or(StorageError::NoCurrent)?;
                dup_edge(sub, &pos.key, true)
            }
            CursorOp::GetCurrent => {
                let pos = self.pos.as_ref().ok_or(StorageError::NoCurrent)?;
                current_or_successor(sub, pos)
            }
            CursorOp::SetKey => {
                let key = key.ok_or(StorageError::NoCurrent)?;
                sub.map
                    .get(&sub.key(key))
                    .map(|slot| (key.to_vec(), slot.first().to_vec()))
            }
            CursorOp::SetRange => {
                let key = key.ok_or(StorageError::NoCurrent)?;
                sub.map
                    .range(sub.key(key)..)
                    .next()
                    .map(|(k, slot)| (k.bytes.clone(), slot.first().to_vec()))
            }
            CursorOp::GetBoth => {
                let key = key.ok_or(StorageError::NoCurrent)?;
                let data = data.ok_or(StorageError::NoCurrent)?;
                match sub.map.get(&sub.key(key)) {
                    Some(Slot::Dups(set)) if set.contains(&sub.dup(data)) => {
                        Some((key.to_vec(), data.to_vec()))
                    }
                    Some(Slot::Single(value)) if value.as_slice() == data => {
                        Some((key.to_vec(), value.clone()))
                    }
                    _ => None,
                }
            }
            CursorOp::GetBothRange => {
                let key = key.ok_or(StorageError::NoCurrent)?;
                let data = data.ok_or(StorageError::NoCurrent)?;
                match sub.map.get(&sub.key(key)) {
                    Some(Slot::Dups(set)) => set
                        .range(sub.dup(data)..)
                        .next()
                        .map(|dup| (key.to_vec(), dup.bytes.clone())),
                    Some(Slot::Single(value)) => {
                        (sub.dup_mode().cmp(value, data) != std::cmp::Ordering::Less)
                            .then(|| (key.to_vec(), value.clone()))
                    }
                    None => None,
                }
            }
        };

        match landed {
            Some((key, value)) => Ok(self.set_pos(sub, &key, &value)),
            None => Err(StorageError::NotFound),
        }
    }

    /// Number of duplicates under the current key.
    pub fn count(&self, txn: &Txn) -> Result<usize> {
        let pos = self.pos.as_ref().ok_or(StorageError::NoCurrent)?;
        let sub = self.sub(txn)?;
        match sub.map.get(&sub.key(&pos.key)) {
            Some(slot) => Ok(slot.len()),
            None => Err(StorageError::NotFound),
        }
    }

    /// Whether the cursor stands at (or past) the last entry.
    pub fn on_last(&self, txn: &Txn) -> Result<bool> {
        let sub = self.sub(txn)?;
        Ok(match &self.pos {
            None => false,
            Some(pos) => next_from(sub, pos).is_none(),
        })
    }

    /// True when no entry remains at or after the current position.
    pub fn eof(&self, txn: &Txn) -> Result<bool> {
        let sub = self.sub(txn)?;
        Ok(match &self.pos {
            None => true,
            Some(pos) => current_or_successor(sub, pos).is_none(),
        })
    }

    /// Deletes the entry at the current position. The position becomes a
    /// ghost: the next forward step lands on the successor.
    pub fn del(&mut self, txn: &mut Txn) -> Result<()> {
        let pos = self.pos.clone().ok_or(StorageError::NoCurrent)?;
        txn.del(self.dbi, &pos.key, pos.dup.as_deref())
    }

    /// Replaces the value at the current position (`CURRENT` put). The key
    /// must equal the current key under the dbi comparator.
    pub fn put_current(&mut self, txn: &mut Txn, key: &[u8], data: &[u8]) -> Result<()> {
        let pos = self.pos.clone().ok_or(StorageError::NoCurrent)?;
        if txn.cmp(self.dbi, key, &pos.key)? != std::cmp::Ordering::Equal {
            return Err(StorageError::NoCurrent);
        }
        match &pos.dup {
            Some(dup) => {
                txn.replace(
                    self.dbi,
                    &pos.key,
                    Some(data),
                    Some(dup),
                    crate::PutFlags::CURRENT | crate::PutFlags::NO_DUP_DATA,
                )?;
            }
            None => {
                txn.put(self.dbi, &pos.key, data, crate::PutFlags::empty())?;
            }
        }
        let dupsort = pos.dup.is_some();
        self.pos = Some(Pos {
            key: pos.key,
            dup: dupsort.then(|| data.to_vec()),
        });
        Ok(())
    }
}

fn slot_pairs(key: &[u8], slot: &Slot, last: bool) -> (Vec<u8>, Vec<u8>) {
    let value = if last { slot.last() } else { slot.first() };
    (key.to_vec(), value.to_vec())
}

fn first_of(sub: &SubDb) -> Option<Pair> {
    sub.map
        .iter()
        .next()
        .map(|(k, slot)| slot_pairs(&k.bytes, slot, false))
}

fn last_of(sub: &SubDb) -> Option<Pair> {
    sub.map
        .iter()
        .next_back()
        .map(|(k, slot)| slot_pairs(&k.bytes, slot, true))
}

/// Successor of `pos` in combined (key, duplicate) order; works for live
/// and ghost positions alike.
fn next_from(sub: &SubDb, pos: &Pos) -> Option<Pair> {
    let key = sub.key(&pos.key);
    if let (Some(dup), Some(Slot::Dups(set))) = (&pos.dup, sub.map.get(&key)) {
        if let Some(next) = set
            .range((Bound::Excluded(sub.dup(dup)), Bound::Unbounded))
            .next()
        {
            return Some((pos.key.clone(), next.bytes.clone()));
        }
    }
    sub.map
        .range((Bound::Excluded(key), Bound::Unbounded))
        .next()
        .map(|(k, slot)| slot_pairs(&k.bytes, slot, false))
}

fn prev_from(sub: &SubDb, pos: &Pos) -> Option<Pair> {
    let key = sub.key(&pos.key);
    if let (Some(dup), Some(Slot::Dups(set))) = (&pos.dup, sub.map.get(&key)) {
        if let Some(prev) = set.range(..sub.dup(dup)).next_back() {
            return Some((pos.key.clone(), prev.bytes.clone()));
        }
        // fall through to the previous key even though this key is live
    }
    sub.map
        .range(..key)
        .next_back()
        .map(|(k, slot)| slot_pairs(&k.bytes, slot, true))
}

fn next_nodup_from(sub: &SubDb, pos: &Pos) -> Option<Pair> {
    sub.map
        .range((Bound::Excluded(sub.key(&pos.key)), Bound::Unbounded))
        .next()
        .map(|(k, slot)| slot_pairs(&k.bytes, slot, false))
}

fn prev_nodup_from(sub: &SubDb, pos: &Pos) -> Option<Pair> {
    sub.map
        .range(..sub.key(&pos.key))
        .next_back()
        .map(|(k, slot)| slot_pairs(&k.bytes, slot, true))
}

fn next_dup_from(sub: &SubDb, pos: &Pos) -> Option<Pair> {
    let dup = pos.dup.as_ref()?;
    match sub.map.get(&sub.key(&pos.key)) {
        Some(Slot::Dups(set)) => set
            .range((Bound::Excluded(sub.dup(dup)), Bound::Unbounded))
            .next()
            .map(|next| (pos.key.clone(), next.bytes.clone())),
        _ => None,
    }
}

fn prev_dup_from(sub: &SubDb, pos: &Pos) -> Option<Pair> {
    let dup = pos.dup.as_ref()?;
    match sub.map.get(&sub.key(&pos.key)) {
        Some(Slot::Dups(set)) => set
            .range(..sub.dup(dup))
            .next_back()
            .map(|prev| (pos.key.clone(), prev.bytes.clone())),
        _ => None,
    }
}

fn dup_edge(sub: &SubDb, key: &[u8], last: bool) -> Option<Pair> {
    sub.map
        .get(&sub.key(key))
        .map(|slot| slot_pairs(key, slot, last))
}

/// The live entry at `pos`, or its successor when the entry is gone.
fn current_or_successor(sub: &SubDb, pos: &Pos) -> Option<Pair> {
    if let Some(slot) = sub.map.get(&sub.key(&pos.key)) {
        match (&pos.dup, slot) {
            (Some(dup), Slot::Dups(set)) => {
                if let Some(found) = set.range(sub.dup(dup)..).next() {
                    return Some((pos.key.clone(), found.bytes.clone()));
                }
                // all remaining duplicates are smaller: move to next key
            }
            (None, _) | (Some(_), Slot::Single(_)) => {
                return Some(slot_pairs(&pos.key, slot, false));
            }
        }
    }
    sub.map
        .range((Bound::Excluded(sub.key(&pos.key)), Bound::Unbounded))
        .next()
        .map(|(k, slot)| slot_pairs(&k.bytes, slot, false))
}
