//! Mutable tuple form: construction, field insertion and editing,
//! compaction, and conversion to/from the serialized form.

use crate::desc::{Descriptor, VarlenHeader, MAX_COLUMN};
use crate::ro::TupleRo;
use crate::{
    bytes2units, space, units2bytes, FieldType, Result, TupleError, TypeMatch, BUFFER_LIMIT,
    DateTime, LIMIT, MAX_FIELD_UNITS, MAX_ITEMS, UNIT_SIZE,
};

/// Mutable tuple over an owned unit buffer.
///
/// Unit `head - 1` is kept free for the serialized header so that
/// [`TupleRw::take`] needs no copy. Descriptors occupy `[head, pivot)` and
/// grow toward lower indices (newest first); payload occupies `[pivot,
/// tail)` and grows upward. `junk` counts dead descriptor and payload units
/// reclaimable by [`TupleRw::shrink`].
pub struct TupleRw {
    buf: Vec<u8>,
    head: usize,
    pivot: usize,
    tail: usize,
    junk: usize,
}

impl TupleRw {
    /// Lays out an empty tuple in a fresh buffer of `buffer_bytes`,
    /// reserving descriptor slots for up to `items_limit` fields.
    pub fn init(buffer_bytes: usize, items_limit: usize) -> Result<TupleRw> {
        if items_limit > MAX_ITEMS || buffer_bytes > BUFFER_LIMIT {
            return Err(TupleError::Invalid);
        }
        let end = buffer_bytes / UNIT_SIZE;
        let pivot = 1 + items_limit;
        if pivot > end {
            return Err(TupleError::Invalid);
        }
        Ok(TupleRw {
            buf: vec![0; units2bytes(end)],
            head: pivot,
            pivot,
            tail: pivot,
            junk: 0,
        })
    }

    /// Allocates the minimal buffer for `items_limit` descriptors and
    /// `data_bytes` of payload.
    pub fn alloc(items_limit: usize, data_bytes: usize) -> Result<TupleRw> {
        TupleRw::init(space(items_limit, data_bytes), items_limit)
    }

    /// Builds a mutable form from a serialized tuple, validating it first.
    /// `buffer_bytes` bounds the mutable buffer; `more_items` reserves
    /// additional descriptor slots.
    pub fn fetch(ro: TupleRo<'_>, buffer_bytes: usize, more_items: usize) -> Result<TupleRw> {
        if let Some(reason) = ro.check() {
            return Err(TupleError::Corrupt(reason));
        }
        let items = ro.items();
        if items + more_items > LIMIT {
            return Err(TupleError::Limit);
        }
        let required = space(items + more_items, units2bytes(ro.payload_units()));
        if required > buffer_bytes || buffer_bytes > BUFFER_LIMIT {
            return Err(TupleError::NoSpace);
        }

        let end = buffer_bytes / UNIT_SIZE;
        let pivot = 1 + items + more_items;
        let head = pivot - items;
        let tail = pivot + ro.payload_units();
        let mut pt = TupleRw {
            buf: vec![0; units2bytes(end)],
            head,
            pivot,
            tail,
            junk: 0,
        };
        // Descriptor offsets are self-relative and head == pivot - items
        // keeps every descriptor-to-payload distance intact, so both
        // regions copy verbatim.
        let src = ro.as_bytes();
        pt.buf[units2bytes(head)..units2bytes(pivot)]
            .copy_from_slice(&src[UNIT_SIZE..UNIT_SIZE * (1 + items)]);
        pt.buf[units2bytes(pivot)..units2bytes(tail)]
            .copy_from_slice(&src[UNIT_SIZE * (1 + items)..]);
        pt.junk = pt.recount_junk();
        Ok(pt)
    }

    /// Resets the tuple to empty without releasing the buffer.
    pub fn clear(&mut self) {
        self.head = self.pivot;
        self.tail = self.pivot;
        self.junk = 0;
    }

    /// Free descriptor slots.
    pub fn space4items(&self) -> usize {
        self.head - 1
    }

    /// Free payload bytes.
    pub fn space4data(&self) -> usize {
        units2bytes(self.end() - self.tail)
    }

    /// Bytes reclaimable by [`TupleRw::shrink`].
    pub fn junkspace(&self) -> usize {
        units2bytes(self.junk)
    }

    fn end(&self) -> usize {
        self.buf.len() / UNIT_SIZE
    }

    fn unit(&self, idx: usize) -> u32 {
        let at = units2bytes(idx);
        u32::from_le_bytes(self.buf[at..at + 4].try_into().unwrap())
    }

    fn set_unit(&mut self, idx: usize, value: u32) {
        let at = units2bytes(idx);
        self.buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Writes `bytes` at a unit position, zero-padding to the unit boundary.
    fn write_bytes(&mut self, unit_idx: usize, bytes: &[u8]) {
        let at = units2bytes(unit_idx);
        self.buf[at..at + bytes.len()].copy_from_slice(bytes);
        let padded = units2bytes(bytes2units(bytes.len()));
        for slot in &mut self.buf[at + bytes.len()..at + padded] {
            *slot = 0;
        }
    }

    fn descriptor(&self, unit_idx: usize) -> Descriptor {
        Descriptor(self.unit(unit_idx))
    }

    /// Serialized form of the current content, without compaction. The view
    /// may still carry junk units; see [`TupleRw::take`].
    pub fn take_noshrink(&mut self) -> TupleRo<'_> {
        let items = (self.pivot - self.head) as u32;
        let brutto = (self.tail - self.head) as u32;
        let header_at = self.head - 1;
        self.set_unit(header_at, items | (brutto << 16));
        let begin = units2bytes(header_at);
        let end = units2bytes(self.tail);
        TupleRo::new(&self.buf[begin..end]).expect("own serialized form is valid")
    }

    /// Compacts if needed and returns the serialized form.
    pub fn take(&mut self) -> TupleRo<'_> {
        self.cond_shrink();
        self.take_noshrink()
    }

    /// Validates the mutable form. Returns the first violated condition or
    /// `None` when consistent.
    pub fn check(&mut self) -> Option<&'static str> {
        if !(1 <= self.head && self.head <= self.pivot && self.pivot <= self.tail
            && self.tail <= self.end())
        {
            return Some("cursor invariant violated");
        }
        self.take_noshrink().check()
    }

    // ---------------- lookup ----------------

    /// Absolute descriptor unit of the first (oldest) live match.
    fn find(&self, column: u16, want: TypeMatch) -> Option<usize> {
        (self.head..self.pivot)
            .rev()
            .find(|&at| self.descriptor(at).matches(column, want))
    }

    /// True when a live field matches `column` and `want`.
    pub fn contains(&self, column: u16, want: impl Into<TypeMatch>) -> bool {
        self.find(column, want.into()).is_some()
    }

    // ---------------- space management ----------------

    /// Guarantees one descriptor slot plus `payload_units`, compacting if
    /// the shortfall can be covered by junk.
    fn ensure_space(&mut self, payload_units: usize) -> Result<()> {
        let fits = |pt: &TupleRw| {
            pt.head > 1
                && pt.tail + payload_units <= pt.end()
                && pt.tail + payload_units - (pt.head - 1) <= LIMIT
        };
        if fits(self) {
            return Ok(());
        }
        if self.junk > 0 {
            self.shrink();
            if fits(self) {
                return Ok(());
            }
        }
        Err(TupleError::NoSpace)
    }

    fn push_descriptor(&mut self, column: u16, ty: FieldType, payload: u16) {
        self.head -= 1;
        let head = self.head;
        self.set_unit(head, Descriptor::new(column, ty, payload).0);
    }

    /// Appends a fixed-size out-of-line field.
    fn insert_fixed(&mut self, column: u16, ty: FieldType, bytes: &[u8]) -> Result<()> {
        if column > MAX_COLUMN {
            return Err(TupleError::Invalid);
        }
        let units = ty.fixed_units().expect("fixed type");
        debug_assert_eq!(units2bytes(units), bytes.len());
        self.ensure_space(units)?;
        let offset = self.tail - (self.head - 1);
        self.write_bytes(self.tail, bytes);
        self.tail += units;
        self.push_descriptor(column, ty, offset as u16);
        Ok(())
    }

    /// Appends a variable-length field: varlen header then content.
    fn insert_varlen(&mut self, column: u16, ty: FieldType, netto: usize, content: &[u8]) -> Result<()> {
        if column > MAX_COLUMN {
            return Err(TupleError::Invalid);
        }
        let brutto = 1 + bytes2units(content.len());
        if netto > LIMIT || brutto > MAX_FIELD_UNITS {
            return Err(TupleError::Limit);
        }
        self.ensure_space(brutto)?;
        let offset = self.tail - (self.head - 1);
        let header = VarlenHeader {
            brutto_units: brutto as u16,
            netto: netto as u16,
        };
        self.set_unit(self.tail, header.pack());
        self.write_bytes(self.tail + 1, content);
        self.tail += brutto;
        self.push_descriptor(column, ty, offset as u16);
        Ok(())
    }

    // ---------------- insert (append unconditionally) ----------------

    pub fn insert_null(&mut self, column: u16) -> Result<()> {
        if column > MAX_COLUMN {
            return Err(TupleError::Invalid);
        }
        self.ensure_space(0)?;
        self.push_descriptor(column, FieldType::Null, 0);
        Ok(())
    }

    pub fn insert_u16(&mut self, column: u16, value: u16) -> Result<()> {
        if column > MAX_COLUMN {
            return Err(TupleError::Invalid);
        }
        self.ensure_space(0)?;
        self.push_descriptor(column, FieldType::Uint16, value);
        Ok(())
    }

    pub fn insert_i32(&mut self, column: u16, value: i32) -> Result<()> {
        self.insert_fixed(column, FieldType::Int32, &(value as u32).to_le_bytes())
    }

    pub fn insert_u32(&mut self, column: u16, value: u32) -> Result<()> {
        self.insert_fixed(column, FieldType::Uint32, &value.to_le_bytes())
    }

    pub fn insert_f32(&mut self, column: u16, value: f32) -> Result<()> {
        self.insert_fixed(column, FieldType::Fp32, &value.to_bits().to_le_bytes())
    }

    pub fn insert_i64(&mut self, column: u16, value: i64) -> Result<()> {
        self.insert_fixed(column, FieldType::Int64, &(value as u64).to_le_bytes())
    }

    pub fn insert_u64(&mut self, column: u16, value: u64) -> Result<()> {
        self.insert_fixed(column, FieldType::Uint64, &value.to_le_bytes())
    }

    pub fn insert_f64(&mut self, column: u16, value: f64) -> Result<()> {
        self.insert_fixed(column, FieldType::Fp64, &value.to_bits().to_le_bytes())
    }

    pub fn insert_datetime(&mut self, column: u16, value: DateTime) -> Result<()> {
        self.insert_fixed(column, FieldType::Datetime, &value.fixedpoint().to_le_bytes())
    }

    pub fn insert_fixbin(&mut self, column: u16, ty: FieldType, bytes: &[u8]) -> Result<()> {
        let units = match ty.fixed_units() {
            Some(units @ 3..=8) => units,
            _ => return Err(TupleError::Invalid),
        };
        if bytes.len() != units2bytes(units) {
            return Err(TupleError::Invalid);
        }
        self.insert_fixed(column, ty, bytes)
    }

    pub fn insert_str(&mut self, column: u16, value: &str) -> Result<()> {
        let mut content = Vec::with_capacity(value.len() + 1);
        content.extend_from_slice(value.as_bytes());
        content.push(0);
        self.insert_varlen(column, FieldType::Cstr, value.len(), &content)
    }

    pub fn insert_opaque(&mut self, column: u16, value: &[u8]) -> Result<()> {
        self.insert_varlen(column, FieldType::Opaque, value.len(), value)
    }

    pub fn insert_nested(&mut self, column: u16, value: TupleRo<'_>) -> Result<()> {
        self.insert_varlen(column, FieldType::Nested, value.items(), value.as_bytes())
    }

    // ---------------- update (edit first match) ----------------

    fn update_fixed(&mut self, column: u16, ty: FieldType, bytes: &[u8]) -> Result<()> {
        let at = self
            .find(column, TypeMatch::Exact(ty))
            .ok_or(TupleError::FieldMissing)?;
        let target = at + self.descriptor(at).payload() as usize;
        self.write_bytes(target, bytes);
        Ok(())
    }

    fn update_varlen(&mut self, column: u16, ty: FieldType, netto: usize, content: &[u8]) -> Result<()> {
        let at = self
            .find(column, TypeMatch::Exact(ty))
            .ok_or(TupleError::FieldMissing)?;
        let brutto = 1 + bytes2units(content.len());
        if netto > LIMIT || brutto > MAX_FIELD_UNITS {
            return Err(TupleError::Limit);
        }
        let desc = self.descriptor(at);
        let target = at + desc.payload() as usize;
        let old_brutto = VarlenHeader::unpack(self.unit(target)).brutto_units as usize;
        let header = VarlenHeader {
            brutto_units: brutto as u16,
            netto: netto as u16,
        };
        if brutto == old_brutto {
            self.set_unit(target, header.pack());
            self.write_bytes(target + 1, content);
            return Ok(());
        }
        // Relocate: the new payload is written at the tail while the old one
        // is still referenced, then the descriptor is redirected and the old
        // units become junk. Compaction first if the tail lacks room — it
        // preserves the still-live old payload and moves descriptors, so the
        // field is re-resolved afterwards.
        let fits = |pt: &TupleRw| {
            pt.tail + brutto <= pt.end() && pt.tail + brutto - (pt.head - 1) <= LIMIT
        };
        if !fits(self) {
            if self.junk == 0 {
                return Err(TupleError::NoSpace);
            }
            self.shrink();
            if !fits(self) {
                return Err(TupleError::NoSpace);
            }
        }
        let at = self
            .find(column, TypeMatch::Exact(ty))
            .expect("field survived compaction");
        let old_brutto = self.payload_units_of(at);
        let offset = self.tail - at;
        self.set_unit(self.tail, header.pack());
        self.write_bytes(self.tail + 1, content);
        self.tail += brutto;
        self.set_unit(at, self.descriptor(at).with_payload(offset as u16).0);
        self.junk += old_brutto;
        Ok(())
    }

    pub fn update_u16(&mut self, column: u16, value: u16) -> Result<()> {
        let at = self
            .find(column, TypeMatch::Exact(FieldType::Uint16))
            .ok_or(TupleError::FieldMissing)?;
        self.set_unit(at, self.descriptor(at).with_payload(value).0);
        Ok(())
    }

    pub fn update_i32(&mut self, column: u16, value: i32) -> Result<()> {
        self.update_fixed(column, FieldType::Int32, &(value as u32).to_le_bytes())
    }

    pub fn update_u32(&mut self, column: u16, value: u32) -> Result<()> {
        self.update_fixed(column, FieldType::Uint32, &value.to_le_bytes())
    }

    pub fn update_f32(&mut self, column: u16, value: f32) -> Result<()> {
        self.update_fixed(column, FieldType::Fp32, &value.to_bits().to_le_bytes())
    }

    pub fn update_i64(&mut self, column: u16, value: i64) -> Result<()> {
        self.update_fixed(column, FieldType::Int64, &(value as u64).to_le_bytes())
    }

    pub fn update_u64(&mut self, column: u16, value: u64) -> Result<()> {
        self.update_fixed(column, FieldType::Uint64, &value.to_le_bytes())
    }

    pub fn update_f64(&mut self, column: u16, value: f64) -> Result<()> {
        self.update_fixed(column, FieldType::Fp64, &value.to_bits().to_le_bytes())
    }

    pub fn update_datetime(&mut self, column: u16, value: DateTime) -> Result<()> {
        self.update_fixed(column, FieldType::Datetime, &value.fixedpoint().to_le_bytes())
    }

    pub fn update_fixbin(&mut self, column: u16, ty: FieldType, bytes: &[u8]) -> Result<()> {
        match ty.fixed_units() {
            Some(units @ 3..=8) if bytes.len() == units2bytes(units) => {
                self.update_fixed(column, ty, bytes)
            }
            _ => Err(TupleError::Invalid),
        }
    }

    pub fn update_str(&mut self, column: u16, value: &str) -> Result<()> {
        let mut content = Vec::with_capacity(value.len() + 1);
        content.extend_from_slice(value.as_bytes());
        content.push(0);
        self.update_varlen(column, FieldType::Cstr, value.len(), &content)
    }

    pub fn update_opaque(&mut self, column: u16, value: &[u8]) -> Result<()> {
        self.update_varlen(column, FieldType::Opaque, value.len(), value)
    }

    pub fn update_nested(&mut self, column: u16, value: TupleRo<'_>) -> Result<()> {
        self.update_varlen(column, FieldType::Nested, value.items(), value.as_bytes())
    }

    // ---------------- upsert (update first match or insert) ----------------

    pub fn upsert_u16(&mut self, column: u16, value: u16) -> Result<()> {
        match self.update_u16(column, value) {
            Err(TupleError::FieldMissing) => self.insert_u16(column, value),
            other => other,
        }
    }

    pub fn upsert_i32(&mut self, column: u16, value: i32) -> Result<()> {
        match self.update_i32(column, value) {
            Err(TupleError::FieldMissing) => self.insert_i32(column, value),
            other => other,
        }
    }

    pub fn upsert_u32(&mut self, column: u16, value: u32) -> Result<()> {
        match self.update_u32(column, value) {
            Err(TupleError::FieldMissing) => self.insert_u32(column, value),
            other => other,
        }
    }

    pub fn upsert_f32(&mut self, column: u16, value: f32) -> Result<()> {
        match self.update_f32(column, value) {
            Err(TupleError::FieldMissing) => self.insert_f32(column, value),
            other => other,
        }
    }

    pub fn upsert_i64(&mut self, column: u16, value: i64) -> Result<()> {
        match self.update_i64(column, value) {
            Err(TupleError::FieldMissing) => self.insert_i64(column, value),
            other => other,
        }
    }

    pub fn upsert_u64(&mut self, column: u16, value: u64) -> Result<()> {
        match self.update_u64(column, value) {
            Err(TupleError::FieldMissing) => self.insert_u64(column, value),
            other => other,
        }
    }

    pub fn upsert_f64(&mut self, column: u16, value: f64) -> Result<()> {
        match self.update_f64(column, value) {
            Err(TupleError::FieldMissing) => self.insert_f64(column, value),
            other => other,
        }
    }

    pub fn upsert_datetime(&mut self, column: u16, value: DateTime) -> Result<()> {
        match self.update_datetime(column, value) {
            Err(TupleError::FieldMissing) => self.insert_datetime(column, value),
            other => other,
        }
    }

    pub fn upsert_fixbin(&mut self, column: u16, ty: FieldType, bytes: &[u8]) -> Result<()> {
        match self.update_fixbin(column, ty, bytes) {
            Err(TupleError::FieldMissing) => self.insert_fixbin(column, ty, bytes),
            other => other,
        }
    }

    pub fn upsert_str(&mut self, column: u16, value: &str) -> Result<()> {
        match self.update_str(column, value) {
            Err(TupleError::FieldMissing) => self.insert_str(column, value),
            other => other,
        }
    }

    pub fn upsert_opaque(&mut self, column: u16, value: &[u8]) -> Result<()> {
        match self.update_opaque(column, value) {
            Err(TupleError::FieldMissing) => self.insert_opaque(column, value),
            other => other,
        }
    }

    pub fn upsert_nested(&mut self, column: u16, value: TupleRo<'_>) -> Result<()> {
        if self.contains(column, FieldType::Nested) {
            self.update_nested(column, value)
        } else {
            self.insert_nested(column, value)
        }
    }

    // ---------------- erase & compaction ----------------

    /// Out-of-line units owned by the descriptor at `at`.
    fn payload_units_of(&self, at: usize) -> usize {
        let desc = self.descriptor(at);
        let ty = desc.field_type().expect("valid descriptor");
        match ty.fixed_units() {
            Some(units) => units,
            None => {
                let target = at + desc.payload() as usize;
                VarlenHeader::unpack(self.unit(target)).brutto_units as usize
            }
        }
    }

    /// Erases every live field matching `column` and `want`; returns how
    /// many were erased.
    pub fn erase(&mut self, column: u16, want: impl Into<TypeMatch>) -> usize {
        let want = want.into();
        let mut erased = 0;
        for at in self.head..self.pivot {
            let desc = self.descriptor(at);
            if desc.matches(column, want) {
                self.junk += 1 + self.payload_units_of(at);
                self.set_unit(at, desc.killed().0);
                erased += 1;
            }
        }
        // dead descriptors at the head leave the serialized window entirely
        while self.head < self.pivot && self.descriptor(self.head).is_dead() {
            self.junk -= 1;
            self.head += 1;
        }
        erased
    }

    /// Rebuilds the tuple without junk: live payloads are relocated to a
    /// compact tail region, descriptor offsets are rewritten, and dead
    /// descriptors disappear. Idempotent.
    pub fn shrink(&mut self) {
        let live: Vec<usize> = (self.head..self.pivot)
            .filter(|&at| !self.descriptor(at).is_dead())
            .collect();
        let new_head = self.pivot - live.len();

        let mut descs: Vec<u32> = Vec::with_capacity(live.len());
        let mut payload: Vec<u8> = Vec::with_capacity(units2bytes(self.tail - self.pivot));
        for (nth, &at) in live.iter().enumerate() {
            let desc = self.descriptor(at);
            let ty = desc.field_type().expect("valid descriptor");
            let units = match ty.fixed_units() {
                Some(0) => {
                    descs.push(desc.0);
                    continue;
                }
                Some(units) => units,
                None => self.payload_units_of(at),
            };
            let new_at = new_head + nth;
            let new_target = self.pivot + payload.len() / UNIT_SIZE;
            let src = units2bytes(at + desc.payload() as usize);
            payload.extend_from_slice(&self.buf[src..src + units2bytes(units)]);
            descs.push(desc.with_payload((new_target - new_at) as u16).0);
        }

        for (nth, desc) in descs.iter().enumerate() {
            self.set_unit(new_head + nth, *desc);
        }
        let payload_begin = units2bytes(self.pivot);
        self.buf[payload_begin..payload_begin + payload.len()].copy_from_slice(&payload);
        self.head = new_head;
        self.tail = self.pivot + payload.len() / UNIT_SIZE;
        self.junk = 0;
    }

    /// Compacts only when junk exists; returns whether compaction ran, so
    /// callers can invalidate saved payload references.
    pub fn cond_shrink(&mut self) -> bool {
        if self.junk != 0 {
            self.shrink();
            true
        } else {
            false
        }
    }

    /// Recomputes junk from scratch: dead descriptors plus payload units no
    /// live descriptor references.
    fn recount_junk(&self) -> usize {
        let mut dead_descs = 0;
        let mut live_payload = 0;
        for at in self.head..self.pivot {
            let desc = self.descriptor(at);
            if desc.is_dead() {
                dead_descs += 1;
            } else if desc
                .field_type()
                .map(|ty| ty.fixed_units() != Some(0))
                .unwrap_or(false)
            {
                live_payload += self.payload_units_of(at);
            }
        }
        dead_descs + (self.tail - self.pivot - live_payload)
    }

    /// Internal cursors `(head, pivot, tail, end, junk)`, exposed for tests
    /// and diagnostics.
    pub fn cursors(&self) -> (usize, usize, usize, usize, usize) {
        (self.head, self.pivot, self.tail, self.end(), self.junk)
    }
}

impl std::fmt::Debug for TupleRw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TupleRw")
            .field("head", &self.head)
            .field("pivot", &self.pivot)
            .field("tail", &self.tail)
            .field("end", &self.end())
            .field("junk", &self.junk)
            .finish()
    }
}
