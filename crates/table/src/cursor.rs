//! The cursor engine: ranged, filtered iteration over one index with
//! obverse/reverse direction, epsilon ranges, delete/update at position,
//! and restart after long-read breaks.

use crate::catalog::{ColumnHandle, TableHandle};
use crate::db::{Level, TableDef};
use crate::filter::Filter;
use crate::key::{key_to_value, row_to_key, value_to_key, Key, OwnedValue};
use crate::row::{
    check_nonnullable, check_secondary_uniq, column_inplace, secondary_remove, secondary_upsert,
    InplaceOp,
};
use crate::txn::Txn;
use crate::{Error, Result, Value};
use bitflags::bitflags;
use std::cmp::Ordering;
use std::sync::Arc;
use storage::{CursorOp, Dbi, PutFlags};
use tuple::TupleRo;

bitflags! {
    /// Cursor opening options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CursorOptions: u32 {
        const DESCENDING = 0x01;
        const ASCENDING = 0x02;
        /// Do not position on the first matching row at open.
        const DONT_FETCH = 0x04;
        /// `from == to` selects exactly that key instead of an empty range.
        const ZEROED_RANGE_IS_POINT = 0x08;
    }
}

impl CursorOptions {
    fn is_ordered(self) -> bool {
        self.intersects(CursorOptions::ASCENDING | CursorOptions::DESCENDING)
    }

    fn is_descending(self) -> bool {
        self.contains(CursorOptions::DESCENDING)
    }
}

/// Cursor movement operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOp {
    First,
    Last,
    Next,
    Prev,
    DupFirst,
    DupLast,
    DupNext,
    DupPrev,
    KeyNext,
    KeyPrev,
}

impl SeekOp {
    /// Descending cursors mirror every operation.
    fn reversed(self) -> SeekOp {
        use SeekOp::*;
        match self {
            First => Last,
            Last => First,
            Next => Prev,
            Prev => Next,
            DupFirst => DupLast,
            DupLast => DupFirst,
            DupNext => DupPrev,
            DupPrev => DupNext,
            KeyNext => KeyPrev,
            KeyPrev => KeyNext,
        }
    }
}

const NEED_FROM: u8 = 1;
const NEED_TO: u8 = 2;
const NEED_BOTH: u8 = NEED_FROM | NEED_TO;
const NEED_KEY4EPSILON: u8 = 4;

fn is_forward(op: CursorOp) -> bool {
    matches!(
        op,
        CursorOp::Next
            | CursorOp::NextDup
            | CursorOp::NextMultiple
            | CursorOp::NextNoDup
            | CursorOp::Last
            | CursorOp::LastDup
    )
}

fn is_backward(op: CursorOp) -> bool {
    matches!(
        op,
        CursorOp::Prev
            | CursorOp::PrevDup
            | CursorOp::PrevNoDup
            | CursorOp::PrevMultiple
            | CursorOp::First
            | CursorOp::FirstDup
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    /// Unpositioned or poisoned by an error.
    Poor,
    /// Ran off the lower end; a forward move re-enters the range.
    BeforeFirst,
    /// Ran off the upper end; a backward move re-enters the range.
    AfterLast,
    /// Standing on the row with this index key.
    At(Vec<u8>),
}

/// Per-cursor operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorStat {
    pub results: u64,
    pub index_searches: u64,
    pub index_scans: u64,
    pub pk_lookups: u64,
    pub uniq_checks: u64,
    pub upserts: u64,
    pub deletions: u64,
    /// Rows produced per thousand index touches.
    pub selectivity_x1024: u64,
}

fn counts_as_scan(op: CursorOp) -> bool {
    matches!(
        op,
        CursorOp::Next
            | CursorOp::NextDup
            | CursorOp::NextMultiple
            | CursorOp::NextNoDup
            | CursorOp::Prev
            | CursorOp::PrevDup
            | CursorOp::PrevNoDup
            | CursorOp::PrevMultiple
            | CursorOp::First
            | CursorOp::FirstDup
            | CursorOp::Last
            | CursorOp::LastDup
    )
}

fn counts_as_search(op: CursorOp) -> bool {
    matches!(
        op,
        CursorOp::GetBoth | CursorOp::GetBothRange | CursorOp::SetKey | CursorOp::SetRange
    )
}

/// A ranged, filtered cursor over one index of one table.
pub struct Cursor {
    def: Arc<TableDef>,
    column: usize,
    options: CursorOptions,
    /// Runtime marker: the range degenerated to a single key (epsilon or
    /// an explicit zero-width point).
    point_mode: bool,
    tbl: Dbi,
    idx: Dbi,
    inner: storage::Cursor,
    position: Position,
    filter: Option<Filter>,
    range_from: Option<Vec<u8>>,
    range_to: Option<Vec<u8>>,
    seek_range_flags: u8,
    seek_range_state: u8,
    metrics: CursorStat,
}

impl Cursor {
    /// Opens a cursor over `column`'s index, constrained to
    /// `[range_from, range_to)` and `filter`. Unless
    /// [`CursorOptions::DONT_FETCH`] is given, the cursor lands on the
    /// first matching row.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        txn: &mut Txn,
        table: &mut TableHandle,
        column: &mut ColumnHandle,
        range_from: Value<'_>,
        range_to: Value<'_>,
        mut filter: Option<Filter>,
        options: CursorOptions,
    ) -> Result<Cursor> {
        let sorting = options & !(CursorOptions::DONT_FETCH | CursorOptions::ZEROED_RANGE_IS_POINT);
        if !(sorting.is_empty()
            || sorting == CursorOptions::ASCENDING
            || sorting == CursorOptions::DESCENDING)
        {
            return Err(Error::BadFlags);
        }

        txn.refresh_couple(table, Some(column))?;
        let def = table.def()?.clone();
        let ordinal = column.ordinal()?;
        let shove = column.shove();
        if !shove.index().is_indexed() {
            return Err(Error::NoIndex);
        }
        if !crate::value::index_is_compat(shove, &range_from)
            && !matches!(range_from, Value::Begin | Value::End | Value::Epsilon)
        {
            return Err(Error::TypeMismatch);
        }
        if !crate::value::index_is_compat(shove, &range_to)
            && !matches!(range_to, Value::Begin | Value::End | Value::Epsilon)
        {
            return Err(Error::TypeMismatch);
        }
        if matches!(range_from, Value::End)
            || matches!(range_to, Value::Begin)
            || (matches!(range_from, Value::Epsilon) && matches!(range_to, Value::Epsilon))
        {
            return Err(Error::Invalid);
        }

        let tbl = txn.open_table_store(&def)?;
        let idx = txn.open_index_store(&def, ordinal)?;

        if shove.index().is_unordered() && options.is_ordered() {
            return Err(Error::NoIndex);
        }
        if let Some(filter) = filter.as_mut() {
            filter.refresh(txn, table)?;
            if !filter.validate() {
                return Err(Error::Invalid);
            }
        }

        let mut cursor = Cursor {
            def,
            column: ordinal,
            options: options & !CursorOptions::ZEROED_RANGE_IS_POINT,
            point_mode: false,
            tbl,
            idx,
            inner: storage::Cursor::new(idx),
            position: Position::Poor,
            filter: None,
            range_from: None,
            range_to: None,
            seek_range_flags: 0,
            seek_range_state: 0,
            metrics: CursorStat::default(),
        };

        let from_concrete = !range_from.is_range_pseudo();
        let to_concrete = !range_to.is_range_pseudo();
        if from_concrete {
            cursor.range_from = Some(value_to_key(shove, &range_from)?.bytes);
            cursor.seek_range_flags |= NEED_FROM;
        }
        if to_concrete {
            cursor.range_to = Some(value_to_key(shove, &range_to)?.bytes);
            cursor.seek_range_flags |= NEED_TO;
        }

        if from_concrete && to_concrete {
            if shove.index().is_unordered()
                || options.contains(CursorOptions::ZEROED_RANGE_IS_POINT)
            {
                let same = txn.storage().cmp(
                    idx,
                    cursor.range_from.as_ref().unwrap(),
                    cursor.range_to.as_ref().unwrap(),
                )? == Ordering::Equal;
                if same {
                    if options.contains(CursorOptions::ZEROED_RANGE_IS_POINT) {
                        cursor.point_mode = true;
                    }
                } else if shove.index().is_unordered() {
                    // an unordered index cannot express a non-point range
                    return Err(Error::NoIndex);
                }
            }
        } else if matches!(range_from, Value::Epsilon) || matches!(range_to, Value::Epsilon) {
            // one-sided epsilon: both bounds collapse onto the concrete
            // side, or latch onto the extreme row at the first seek
            if matches!(range_from, Value::Epsilon) {
                cursor.range_from = cursor.range_to.clone();
            }
            cursor.range_to = cursor.range_from.clone();
            cursor.point_mode = true;
            cursor.seek_range_flags = if cursor.range_from.is_some() {
                NEED_BOTH
            } else {
                NEED_KEY4EPSILON
            };
            if options.contains(CursorOptions::DONT_FETCH) && cursor.range_from.is_none() {
                // an epsilon against begin/end must still latch the key of
                // the extreme row, before any filter can interfere
                let toward_first =
                    matches!(range_from, Value::Begin) != options.is_descending();
                let seek_op = if toward_first {
                    CursorOp::First
                } else {
                    CursorOp::Last
                };
                match cursor.seek(txn, seek_op, CursorOp::Next, None, None) {
                    Ok(()) | Err(Error::NoData) => {}
                    Err(err) => return Err(err),
                }
            }
        }

        cursor.filter = filter;
        if !options.contains(CursorOptions::DONT_FETCH) {
            cursor.seek_move(txn, SeekOp::First)?;
        }
        Ok(cursor)
    }

    fn index_shove(&self) -> schema::Shove {
        self.def.schema.column_shove(self.column)
    }

    fn is_primary_cursor(&self) -> bool {
        self.column == 0
    }

    fn is_filled(&self) -> bool {
        matches!(self.position, Position::At(_))
    }

    fn current_key(&self) -> Result<&[u8]> {
        match &self.position {
            Position::At(key) => Ok(key),
            _ => Err(self.unladed_state()),
        }
    }

    fn unladed_state(&self) -> Error {
        match self.position {
            Position::Poor => Error::Cursor,
            _ => Error::NoData,
        }
    }

    fn set_poor(&mut self) {
        self.position = Position::Poor;
    }

    fn bring(
        &mut self,
        txn: &Txn,
        key: Option<&[u8]>,
        data: Option<&[u8]>,
        op: CursorOp,
    ) -> std::result::Result<(Vec<u8>, Vec<u8>), storage::StorageError> {
        if counts_as_scan(op) {
            self.metrics.index_scans += 1;
        }
        if counts_as_search(op) {
            self.metrics.index_searches += 1;
        }
        self.inner.get(txn.storage(), key, data, op)
    }

    /// The scan core: lands via `seek_op`, then steps with `step_op` until
    /// a row inside the range that passes the filter, latching epsilon
    /// bounds and clearing range checks as bounds are crossed.
    fn seek(
        &mut self,
        txn: &Txn,
        seek_op: CursorOp,
        step_op: CursorOp,
        seek_key: Option<&[u8]>,
        seek_data: Option<&[u8]>,
    ) -> Result<()> {
        let mut landed = self.bring(txn, seek_key, seek_data, seek_op);

        if let Some(target) = seek_key {
            if self.options.is_descending()
                && matches!(seek_op, CursorOp::SetRange | CursorOp::GetBothRange)
            {
                // a range seek positions like lower_bound in ascending
                // order; mirror it for a descending cursor
                enum Fixup {
                    Keep,
                    BackNoDup,
                    BackDup,
                    Last,
                }
                let fixup = match &landed {
                    Ok((key, data)) => {
                        let cmp = txn.storage().cmp(self.idx, key, target)?;
                        if cmp == Ordering::Greater {
                            Fixup::BackNoDup
                        } else if cmp == Ordering::Equal && seek_op == CursorOp::GetBothRange {
                            match seek_data {
                                Some(want)
                                    if txn.storage().dcmp(self.idx, data, want)?
                                        == Ordering::Greater =>
                                {
                                    Fixup::BackDup
                                }
                                _ => Fixup::Keep,
                            }
                        } else {
                            Fixup::Keep
                        }
                    }
                    Err(storage::StorageError::NotFound) => {
                        // every key is below the target: start at the last
                        Fixup::Last
                    }
                    Err(_) => Fixup::Keep,
                };
                match fixup {
                    Fixup::Keep => {}
                    Fixup::BackNoDup => {
                        landed = self.bring(txn, None, None, CursorOp::PrevNoDup);
                        if landed.is_ok() && seek_op == CursorOp::GetBothRange {
                            landed = self.bring(txn, None, None, CursorOp::LastDup);
                        }
                    }
                    Fixup::BackDup => {
                        landed = self.bring(txn, None, None, CursorOp::Prev);
                    }
                    Fixup::Last => {
                        landed = self.bring(txn, None, None, CursorOp::Last);
                    }
                }
            }
        }

        if self.seek_range_flags == NEED_KEY4EPSILON {
            // epsilon against begin/end: the first seek latches the
            // extreme row's key as both range bounds
            if let Ok((key, _)) = &landed {
                self.range_from = Some(key.clone());
                self.range_to = Some(key.clone());
                self.seek_range_flags = NEED_BOTH;
                self.seek_range_state = NEED_BOTH;
            }
        }

        loop {
            let (key, data) = match landed {
                Ok(pair) => pair,
                Err(storage::StorageError::NotFound) => {
                    return Err(self.settle_eof(seek_op));
                }
                Err(err) => {
                    self.set_poor();
                    return Err(err.into());
                }
            };

            let mut step = step_op;

            if self.seek_range_state & NEED_FROM != 0 {
                let from = self.range_from.as_ref().expect("range flag implies key");
                let cmp = txn.storage().cmp(self.idx, &key, from)?;
                if cmp == Ordering::Less {
                    // below the lower bound
                    match step {
                        CursorOp::PrevDup | CursorOp::NextDup => {
                            return Err(self.settle_eof(seek_op))
                        }
                        CursorOp::Prev | CursorOp::PrevNoDup => {
                            return Err(self.settle_eof(seek_op))
                        }
                        CursorOp::Next => {
                            // duplicates of an out-of-range key cannot help
                            step = CursorOp::NextNoDup;
                            landed = self.bring(txn, None, None, step);
                            continue;
                        }
                        CursorOp::NextNoDup => {
                            landed = self.bring(txn, None, None, step);
                            continue;
                        }
                        _ => return Err(self.settle_eof(seek_op)),
                    }
                } else if is_forward(step) {
                    // every further key is >= from
                    self.seek_range_state &= !NEED_FROM;
                }
            }

            if self.seek_range_state & NEED_TO != 0 {
                let to = self.range_to.as_ref().expect("range flag implies key");
                let cmp = txn.storage().cmp(self.idx, &key, to)?;
                let out = if self.point_mode {
                    cmp == Ordering::Greater // a point range admits == to
                } else {
                    cmp != Ordering::Less
                };
                if out {
                    match step {
                        CursorOp::PrevDup | CursorOp::NextDup => {
                            return Err(self.settle_eof(seek_op))
                        }
                        CursorOp::Prev => {
                            step = CursorOp::PrevNoDup;
                            landed = self.bring(txn, None, None, step);
                            continue;
                        }
                        CursorOp::PrevNoDup => {
                            landed = self.bring(txn, None, None, step);
                            continue;
                        }
                        CursorOp::Next | CursorOp::NextNoDup => {
                            return Err(self.settle_eof(seek_op))
                        }
                        _ => return Err(self.settle_eof(seek_op)),
                    }
                } else if is_backward(step_op) {
                    self.seek_range_state &= !NEED_TO;
                }
            }

            if self.filter.is_none() {
                self.metrics.results += 1;
                self.position = Position::At(key);
                return Ok(());
            }

            let row_bytes;
            let row = if self.index_shove().index().is_secondary() {
                self.metrics.pk_lookups += 1;
                row_bytes = match txn.storage().get(self.tbl, &data) {
                    Ok(bytes) => bytes,
                    Err(storage::StorageError::NotFound) => {
                        return Err(Error::IndexCorrupted);
                    }
                    Err(err) => return Err(err.into()),
                };
                TupleRo::new(&row_bytes)?
            } else {
                row_bytes = data;
                TupleRo::new(&row_bytes)?
            };

            let admitted = self.filter.as_ref().expect("checked above").matches(row);
            if admitted {
                self.metrics.results += 1;
                self.position = Position::At(key);
                return Ok(());
            }

            landed = self.bring(txn, None, None, step);
        }
    }

    fn settle_eof(&mut self, seek_op: CursorOp) -> Error {
        match seek_op {
            CursorOp::Next | CursorOp::NextNoDup => {
                self.position = Position::AfterLast;
                self.seek_range_state = 0;
            }
            CursorOp::Prev | CursorOp::PrevNoDup => {
                self.position = Position::BeforeFirst;
                self.seek_range_state = 0;
            }
            CursorOp::NextDup | CursorOp::PrevDup => {
                // stay on the current row; the duplicate run just ended
            }
            _ => {
                self.set_poor();
                self.seek_range_state = 0;
            }
        }
        Error::NoData
    }

    /// Moves the cursor. Descending cursors mirror the operation.
    pub fn seek_move(&mut self, txn: &mut Txn, op: SeekOp) -> Result<()> {
        txn.require(Level::Read)?;
        let op = if self.options.is_descending() {
            op.reversed()
        } else {
            op
        };

        let unique = self.index_shove().index().is_unique();
        let mut seek_key: Option<Vec<u8>> = None;
        let (seek_op, step_op) = match op {
            SeekOp::First => {
                self.seek_range_state = self.seek_range_flags;
                if let Some(from) = &self.range_from {
                    seek_key = Some(from.clone());
                    (CursorOp::SetRange, CursorOp::Next)
                } else {
                    (CursorOp::First, CursorOp::Next)
                }
            }
            SeekOp::Last => {
                self.seek_range_state = self.seek_range_flags;
                if let Some(to) = &self.range_to {
                    seek_key = Some(to.clone());
                    (CursorOp::SetRange, CursorOp::Prev)
                } else {
                    (CursorOp::Last, CursorOp::Prev)
                }
            }
            SeekOp::Next => match self.position {
                Position::Poor => return Err(Error::Cursor),
                Position::BeforeFirst => {
                    self.seek_range_state = self.seek_range_flags;
                    (CursorOp::First, CursorOp::Next)
                }
                _ => (CursorOp::Next, CursorOp::Next),
            },
            SeekOp::Prev => match self.position {
                Position::Poor => return Err(Error::Cursor),
                Position::AfterLast => {
                    self.seek_range_state = self.seek_range_flags;
                    (CursorOp::Last, CursorOp::Prev)
                }
                _ => (CursorOp::Prev, CursorOp::Prev),
            },
            SeekOp::DupFirst => {
                if !self.is_filled() {
                    return Err(self.unladed_state());
                }
                if unique {
                    return Ok(());
                }
                (CursorOp::FirstDup, CursorOp::NextDup)
            }
            SeekOp::DupLast => {
                if !self.is_filled() {
                    return Err(self.unladed_state());
                }
                if unique {
                    return Ok(());
                }
                (CursorOp::LastDup, CursorOp::PrevDup)
            }
            SeekOp::DupNext => {
                if !self.is_filled() {
                    return Err(self.unladed_state());
                }
                if unique {
                    return Err(Error::NoData);
                }
                (CursorOp::NextDup, CursorOp::NextDup)
            }
            SeekOp::DupPrev => {
                if !self.is_filled() {
                    return Err(self.unladed_state());
                }
                if unique {
                    return Err(Error::NoData);
                }
                (CursorOp::PrevDup, CursorOp::PrevDup)
            }
            SeekOp::KeyNext => match self.position {
                Position::Poor => return Err(Error::Cursor),
                Position::BeforeFirst => {
                    self.seek_range_state = self.seek_range_flags;
                    (CursorOp::First, CursorOp::NextNoDup)
                }
                _ => (CursorOp::NextNoDup, CursorOp::NextNoDup),
            },
            SeekOp::KeyPrev => match self.position {
                Position::Poor => return Err(Error::Cursor),
                Position::AfterLast => {
                    self.seek_range_state = self.seek_range_flags;
                    (CursorOp::Last, CursorOp::PrevNoDup)
                }
                _ => (CursorOp::PrevNoDup, CursorOp::PrevNoDup),
            },
        };

        self.seek(txn, seek_op, step_op, seek_key.as_deref(), None)
    }

    /// Positions the cursor at (or near) a key given as a value or as a
    /// representative row. `exactly` selects exact versus lower-bound
    /// seeks; unordered indexes only support exact.
    pub fn locate(
        &mut self,
        txn: &mut Txn,
        mut exactly: bool,
        key: Option<&Value<'_>>,
        row: Option<TupleRo<'_>>,
    ) -> Result<()> {
        txn.require(Level::Read)?;
        if key.is_some() == row.is_some() {
            self.set_poor();
            return Err(Error::Invalid);
        }
        if !self.options.is_ordered() {
            // nearby positioning is meaningless without an order
            exactly = true;
        }

        let mut seek_op = if exactly {
            CursorOp::SetKey
        } else {
            CursorOp::SetRange
        };
        let mut seek_data: Option<Vec<u8>> = None;
        let seek_key: Key;

        if let Some(value) = key {
            seek_key = match value_to_key(self.index_shove(), value) {
                Ok(key) => key,
                Err(err) => {
                    self.set_poor();
                    return Err(err);
                }
            };
        } else {
            let row = row.expect("checked above");
            seek_key = match row_to_key(&self.def.schema, self.column, row) {
                Ok(key) => key,
                Err(err) => {
                    self.set_poor();
                    return Err(err);
                }
            };
            let shove = self.index_shove();
            if shove.index().is_secondary() {
                if !shove.index().is_unique() {
                    // refine the position among duplicates with the pk
                    match row_to_key(&self.def.schema, 0, row) {
                        Ok(pk) => {
                            seek_data = Some(pk.bytes);
                            seek_op = if exactly {
                                CursorOp::GetBoth
                            } else {
                                CursorOp::GetBothRange
                            };
                        }
                        Err(Error::ColumnMissing) => {}
                        Err(err) => {
                            self.set_poor();
                            return Err(err);
                        }
                    }
                }
            } else if !exactly && !shove.index().is_unique() {
                // inexact seek among duplicate rows: refine with the row
                seek_data = Some(row.as_bytes().to_vec());
                seek_op = CursorOp::GetBothRange;
            }
        }

        let step_op = if self.options.is_descending() {
            CursorOp::Prev
        } else {
            CursorOp::Next
        };
        if let Err(err) = self.seek(txn, seek_op, step_op, Some(&seek_key.bytes), seek_data.as_deref())
        {
            self.set_poor();
            return Err(err);
        }

        if !self.options.is_descending() {
            return Ok(());
        }

        // descending fix-up: cross to the other side of lower_bound
        while !exactly {
            let current = self.current_key()?.to_vec();
            let cmp = txn.storage().cmp(self.idx, &current, &seek_key.bytes)?;
            if cmp == Ordering::Less {
                return Ok(());
            }
            if cmp == Ordering::Equal {
                let Some(want) = &seek_data else {
                    break; // move to the last duplicate below
                };
                let (_, data) = self
                    .bring(txn, None, None, CursorOp::GetCurrent)
                    .map_err(|err| {
                        self.set_poor();
                        Error::from(err)
                    })?;
                if txn.storage().dcmp(self.idx, &data, want)? != Ordering::Greater {
                    return Ok(());
                }
            }
            if let Err(err) = self.seek(txn, CursorOp::Prev, CursorOp::Prev, None, None) {
                self.set_poor();
                return Err(err);
            }
        }

        if !self.index_shove().index().is_unique() {
            let dups = self.inner.count(txn.storage()).unwrap_or(1);
            if dups > 1 {
                if let Err(err) = self.seek(txn, CursorOp::LastDup, CursorOp::Prev, None, None) {
                    self.set_poor();
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// `Ok` when positioned on a row, [`Error::NoData`] past either end.
    pub fn eof(&self) -> Result<()> {
        if self.is_filled() {
            Ok(())
        } else {
            Err(Error::NoData)
        }
    }

    /// Like [`Cursor::eof`] but reports the poisoned state distinctly.
    pub fn state(&self) -> Result<()> {
        if self.is_filled() {
            Ok(())
        } else {
            Err(self.unladed_state())
        }
    }

    /// Counts matching rows from the start of the range, up to `limit`.
    /// Leaves the cursor unpositioned.
    pub fn count(&mut self, txn: &mut Txn, limit: usize) -> Result<usize> {
        let results_before = self.metrics.results;
        let mut count = 0;
        let mut step = self.seek_move(txn, SeekOp::First);
        while step.is_ok() && count < limit {
            count += 1;
            step = self.seek_move(txn, SeekOp::Next);
        }
        self.metrics.results = results_before + 1;
        self.set_poor();
        match step {
            Ok(()) | Err(Error::NoData) => Ok(count),
            Err(err) => Err(err),
        }
    }

    /// Duplicates under the current key.
    pub fn dups(&mut self, txn: &Txn) -> Result<usize> {
        if !self.is_filled() {
            return match self.position {
                Position::Poor => Err(Error::Cursor),
                _ => Err(Error::NoData),
            };
        }
        self.metrics.results += 1;
        Ok(self.inner.count(txn.storage())?)
    }

    /// The current row's bytes.
    pub fn row(&mut self, txn: &Txn) -> Result<Vec<u8>> {
        if !self.is_filled() {
            return Err(self.unladed_state());
        }
        let (_, data) = self.bring(txn, None, None, CursorOp::GetCurrent)?;
        if self.is_primary_cursor() {
            return Ok(data);
        }
        self.metrics.pk_lookups += 1;
        match txn.storage().get(self.tbl, &data) {
            Ok(row) => Ok(row),
            Err(storage::StorageError::NotFound) => Err(Error::IndexCorrupted),
            Err(err) => Err(err.into()),
        }
    }

    /// The current position's index key, decoded.
    pub fn key(&self) -> Result<OwnedValue> {
        let key = self.current_key()?;
        key_to_value(self.index_shove(), key)
    }

    /// Deletes the row at the cursor, then steps so the cursor lands on
    /// the row a scan would visit next.
    pub fn delete(&mut self, txn: &mut Txn) -> Result<()> {
        txn.require(Level::Write)?;
        if !self.is_filled() {
            return Err(self.unladed_state());
        }
        self.metrics.deletions += 1;
        let def = self.def.clone();

        if !def.schema.has_secondary() {
            if let Err(err) = self.inner.del(txn.storage_mut()) {
                self.set_poor();
                return Err(err.into());
            }
        } else {
            let pk_bytes = if self.is_primary_cursor() {
                self.current_key()?.to_vec()
            } else {
                let (_, data) = self.bring(txn, None, None, CursorOp::GetCurrent).map_err(|err| {
                    self.set_poor();
                    Error::from(err)
                })?;
                data
            };

            self.metrics.upserts += 1;
            let row_bytes = match txn.storage_mut().replace(
                self.tbl,
                &pk_bytes,
                None,
                None,
                PutFlags::CURRENT,
            ) {
                Ok(Some(row)) => row,
                Ok(None) => {
                    self.set_poor();
                    return Err(Error::IndexCorrupted);
                }
                Err(err) => {
                    self.set_poor();
                    return Err(err.into());
                }
            };

            let pk = Key { bytes: pk_bytes };
            let row = TupleRo::new(&row_bytes)?;
            if let Err(err) = secondary_remove(txn, &def, &pk, row, self.column) {
                self.set_poor();
                return Err(txn.internal_abort(err));
            }

            if !self.is_primary_cursor() {
                if let Err(err) = self.inner.del(txn.storage_mut()) {
                    self.set_poor();
                    return Err(txn.internal_abort(err.into()));
                }
            }
        }

        if self.options.is_descending() {
            let _ = self.seek(txn, CursorOp::Prev, CursorOp::Prev, None, None);
        } else if self.inner.eof(txn.storage())? {
            self.position = Position::AfterLast;
        } else {
            let _ = self.seek(txn, CursorOp::GetCurrent, CursorOp::Next, None, None);
        }
        Ok(())
    }

    /// Read-only simulation of [`Cursor::update`].
    pub fn validate_update(
        &mut self,
        txn: &mut Txn,
        new_row: TupleRo<'_>,
        skip_nonnullable: bool,
    ) -> Result<()> {
        txn.require(Level::Write)?;
        if !self.is_filled() {
            return Err(self.unladed_state());
        }
        let def = self.def.clone();

        let column_key = row_to_key(&def.schema, self.column, new_row)?;
        if self.current_key()? != column_key.as_slice() {
            return Err(Error::KeyMismatch);
        }
        if !skip_nonnullable {
            check_nonnullable(&def, new_row)?;
        }
        if !def.schema.has_secondary() {
            return Ok(());
        }

        if self.is_primary_cursor() {
            let (_, present) = self.bring(txn, None, None, CursorOp::GetCurrent)?;
            self.metrics.uniq_checks += 1;
            let present_row = TupleRo::new(&present)?;
            return check_secondary_uniq(txn, &def, Some(present_row), new_row, 0);
        }

        let (_, present_pk) = self.bring(txn, None, None, CursorOp::GetCurrent)?;
        self.metrics.pk_lookups += 1;
        let present = match txn.storage().get(self.tbl, &present_pk) {
            Ok(bytes) => bytes,
            Err(storage::StorageError::NotFound) => return Err(Error::IndexCorrupted),
            Err(err) => return Err(err.into()),
        };
        self.metrics.uniq_checks += 1;
        let present_row = TupleRo::new(&present)?;
        check_secondary_uniq(txn, &def, Some(present_row), new_row, self.column)
    }

    /// Replaces the row at the cursor. The new row must keep the cursor
    /// column's key unchanged (`KeyMismatch` otherwise); the primary key
    /// may change, re-homing the row.
    pub fn update(&mut self, txn: &mut Txn, new_row: TupleRo<'_>) -> Result<()> {
        txn.require(Level::Write)?;
        if !self.is_filled() {
            return Err(self.unladed_state());
        }
        let def = self.def.clone();
        check_nonnullable(&def, new_row)?;

        let column_key = row_to_key(&def.schema, self.column, new_row)?;
        if self.current_key()? != column_key.as_slice() {
            return Err(Error::KeyMismatch);
        }

        self.metrics.upserts += 1;
        if !def.schema.has_secondary() {
            if let Err(err) =
                self.inner
                    .put_current(txn.storage_mut(), column_key.as_slice(), new_row.as_bytes())
            {
                self.set_poor();
                return Err(err.into());
            }
            return Ok(());
        }

        let old_pk_bytes = if self.is_primary_cursor() {
            self.current_key()?.to_vec()
        } else {
            let (_, data) = self.bring(txn, None, None, CursorOp::GetCurrent).map_err(|err| {
                self.set_poor();
                Error::from(err)
            })?;
            data
        };

        self.metrics.pk_lookups += 1;
        let old_row_bytes = match txn.storage().get(self.tbl, &old_pk_bytes) {
            Ok(bytes) => bytes,
            Err(storage::StorageError::NotFound) => {
                self.set_poor();
                return Err(Error::IndexCorrupted);
            }
            Err(err) => {
                self.set_poor();
                return Err(err.into());
            }
        };

        let new_pk = row_to_key(&def.schema, 0, new_row)?;
        let old_pk = Key {
            bytes: old_pk_bytes,
        };
        let old_row = TupleRo::new(&old_row_bytes)?;
        if let Err(err) =
            secondary_upsert(txn, &def, &old_pk, Some(old_row), &new_pk, new_row, self.column)
        {
            self.set_poor();
            return Err(txn.internal_abort(err));
        }

        let pk_changed = old_pk.bytes != new_pk.bytes;
        let result = if pk_changed {
            self.metrics.deletions += 1;
            txn.storage_mut()
                .del(self.tbl, &old_pk.bytes, None)
                .map_err(Error::from)
                .and_then(|()| {
                    txn.storage_mut()
                        .put(
                            self.tbl,
                            new_pk.as_slice(),
                            new_row.as_bytes(),
                            PutFlags::NO_DUP_DATA | PutFlags::NO_OVERWRITE,
                        )
                        .map_err(Error::from)
                })
                .and_then(|()| {
                    if self.is_primary_cursor() {
                        Ok(())
                    } else {
                        self.inner
                            .put_current(txn.storage_mut(), column_key.as_slice(), new_pk.as_slice())
                            .map_err(Error::from)
                    }
                })
        } else {
            txn.storage_mut()
                .replace(
                    self.tbl,
                    new_pk.as_slice(),
                    Some(new_row.as_bytes()),
                    None,
                    PutFlags::CURRENT,
                )
                .map(|_| ())
                .map_err(Error::from)
        };

        if let Err(err) = result {
            self.set_poor();
            return Err(txn.internal_abort(err));
        }
        Ok(())
    }

    /// In-place numeric update of `target` (a column other than the
    /// cursor's own) in the current row. `Ok` when the value changed,
    /// [`Error::NoData`] when not.
    pub fn inplace(
        &mut self,
        txn: &mut Txn,
        target: &ColumnHandle,
        op: InplaceOp,
        arg: &Value<'_>,
    ) -> Result<()> {
        let ordinal = target.ordinal()?;
        if ordinal == self.column {
            return Err(Error::Invalid);
        }
        let def = self.def.clone();
        let row_bytes = self.row(txn)?;
        let row = TupleRo::new(&row_bytes)?;
        let mut pt = tuple::TupleRw::fetch(row, tuple::check_and_get_buffer_size(row, 1, 16)
            .map_err(|_| Error::SchemaCorrupted)?, 1)?;
        column_inplace(&mut pt, &def, ordinal, op, arg)?;
        let fresh = pt.take();
        let fresh_bytes = fresh.as_bytes().to_vec();
        self.update(txn, TupleRo::new(&fresh_bytes)?)
    }

    /// Restarts a lagging read transaction underneath the cursor,
    /// re-seeking to the remembered position afterwards.
    pub fn rerere(&mut self, txn: &mut Txn) -> Result<()> {
        txn.require(Level::Read)?;
        if txn.level() > Level::Read {
            return Ok(()); // writers have nothing to roll forward
        }

        let saved: Option<(Vec<u8>, Option<Vec<u8>>)> = if self.is_filled() {
            match self.bring(txn, None, None, CursorOp::GetCurrent) {
                Ok((key, data)) => {
                    let unique = self.index_shove().index().is_unique();
                    Some((key, (!unique).then_some(data)))
                }
                Err(_) => None,
            }
        } else {
            None
        };

        txn.restart()?;
        self.inner.renew();

        let Some((saved_key, saved_data)) = saved else {
            if !self.is_filled() {
                return Err(self.unladed_state());
            }
            return Ok(());
        };

        let step_op = if self.options.is_descending() {
            CursorOp::Prev
        } else {
            CursorOp::Next
        };

        match saved_data {
            None => self.seek(txn, CursorOp::SetRange, step_op, Some(&saved_key), None),
            Some(saved_data) => {
                self.seek(txn, CursorOp::SetRange, step_op, Some(&saved_key), None)?;
                let current = self.current_key()?.to_vec();
                if txn.storage().cmp(self.idx, &current, &saved_key)? != Ordering::Equal {
                    return Ok(());
                }
                self.seek(
                    txn,
                    CursorOp::GetBothRange,
                    step_op,
                    Some(&saved_key),
                    Some(&saved_data),
                )
            }
        }
    }

    /// Operation counters with the derived selectivity figure.
    pub fn info(&self) -> CursorStat {
        let mut stat = self.metrics;
        stat.selectivity_x1024 = (stat.results + stat.upserts + stat.deletions + 1) * 1024
            / (stat.index_scans + stat.index_searches + stat.pk_lookups + 1);
        stat
    }

    pub fn reset_accounting(&mut self) {
        self.metrics = CursorStat::default();
    }
}

/// Opens a cursor, skips `skip` rows, and calls `visitor` on up to `limit`
/// rows. Returns `(visited, page_top, page_bottom)`: `page_top` is `Begin`
/// when fewer than `skip` rows exist, else the first visited row's sort
/// key; `page_bottom` is `End` when the scan exhausted, else the key right
/// after the last visited row.
#[allow(clippy::too_many_arguments)]
pub fn apply_visitor<F>(
    txn: &mut Txn,
    table: &mut TableHandle,
    column: &mut ColumnHandle,
    range_from: Value<'_>,
    range_to: Value<'_>,
    filter: Option<Filter>,
    options: CursorOptions,
    skip: usize,
    limit: usize,
    mut visitor: F,
) -> Result<(usize, OwnedValue, OwnedValue)>
where
    F: FnMut(TupleRo<'_>) -> Result<()>,
{
    if limit < 1 {
        return Err(Error::Invalid);
    }
    let mut cursor = match Cursor::open(
        txn,
        table,
        column,
        range_from,
        range_to,
        filter,
        options & !CursorOptions::DONT_FETCH,
    ) {
        Ok(cursor) => cursor,
        Err(Error::NoData) => return Ok((0, OwnedValue::Begin, OwnedValue::End)),
        Err(err) => return Err(err),
    };

    let mut state: Result<()> = cursor.state();
    for _ in 0..skip {
        if state.is_err() {
            break;
        }
        state = cursor.seek_move(txn, SeekOp::Next);
    }

    let page_top = if state.is_ok() {
        cursor.key()?
    } else {
        OwnedValue::Begin
    };

    let mut visited = 0;
    while state.is_ok() && visited < limit {
        let row_bytes = cursor.row(txn)?;
        visitor(TupleRo::new(&row_bytes)?)?;
        visited += 1;
        state = cursor.seek_move(txn, SeekOp::Next);
    }

    let page_bottom = if cursor.is_filled() {
        cursor.key()?
    } else {
        OwnedValue::End
    };

    match state {
        Ok(()) | Err(Error::NoData) => Ok((visited, page_top, page_bottom)),
        Err(err) => Err(err),
    }
}

/// Approximate number of rows between two values on an indexed column.
/// Non-point estimates need an ordered index.
pub fn estimate(
    txn: &mut Txn,
    table: &mut TableHandle,
    column: &mut ColumnHandle,
    begin: &Value<'_>,
    end: &Value<'_>,
) -> Result<u64> {
    txn.refresh_couple(table, Some(column))?;
    let def = table.def()?.clone();
    let ordinal = column.ordinal()?;
    let shove = column.shove();
    if !shove.index().is_indexed() {
        return Err(Error::NoIndex);
    }
    let idx = txn.open_index_store(&def, ordinal)?;

    let begin_key = match begin {
        Value::Begin => None,
        value => Some(value_to_key(shove, value)?),
    };
    let end_key = match end {
        Value::End => None,
        value => Some(value_to_key(shove, value)?),
    };

    let point = matches!((&begin_key, &end_key), (Some(a), Some(b)) if a == b);
    if !point && begin_key.is_some() && end_key.is_some() && shove.index().is_unordered() {
        return Err(Error::NoIndex);
    }

    Ok(txn.storage().estimate_range(
        idx,
        begin_key.as_ref().map(|k| k.as_slice()),
        end_key.as_ref().map(|k| k.as_slice()),
    )?)
}
