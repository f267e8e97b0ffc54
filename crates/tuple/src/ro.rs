//! Read-only tuple view: validation, field lookup and iteration.
//!
//! A [`TupleRo`] borrows a serialized byte run. Nothing is parsed up front;
//! [`TupleRo::check`] walks the whole structure and reports the first
//! violated condition, which is how foreign tuples (shared memory, network)
//! are admitted.

use crate::desc::{Descriptor, VarlenHeader};
use crate::{
    bytes2units, units2bytes, FieldType, TupleError, TypeMatch, LIMIT, UNIT_SIZE,
};
use std::cmp::Ordering;

/// Borrowed serialized tuple: `[header][descriptors][payload]`.
#[derive(Debug, Clone, Copy)]
pub struct TupleRo<'a> {
    bytes: &'a [u8],
}

impl<'a> TupleRo<'a> {
    /// Wraps a byte run after the cheap structural checks. Use
    /// [`TupleRo::check`] for full validation of untrusted data.
    pub fn new(bytes: &'a [u8]) -> crate::Result<TupleRo<'a>> {
        let ro = TupleRo { bytes };
        match ro.quick_check() {
            None => Ok(ro),
            Some(reason) => Err(TupleError::Corrupt(reason)),
        }
    }

    /// The raw serialized bytes.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Total serialized size in bytes.
    pub fn total_bytes(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn unit(&self, idx: usize) -> u32 {
        let at = idx * UNIT_SIZE;
        u32::from_le_bytes(self.bytes[at..at + 4].try_into().unwrap())
    }

    fn total_units(&self) -> usize {
        self.bytes.len() / UNIT_SIZE
    }

    /// Descriptor count from the header, dead entries included.
    pub fn items(&self) -> usize {
        (self.unit(0) & 0xFFFF) as usize
    }

    fn brutto_units(&self) -> usize {
        (self.unit(0) >> 16) as usize
    }

    /// Units of payload following the descriptor table.
    pub fn payload_units(&self) -> usize {
        self.brutto_units() - self.items()
    }

    /// Count of live (non-erased) descriptors.
    pub fn live_items(&self) -> usize {
        self.descriptors().filter(|d| !d.is_dead()).count()
    }

    fn descriptor(&self, nth: usize) -> Descriptor {
        debug_assert!(nth < self.items());
        Descriptor(self.unit(1 + nth))
    }

    fn descriptors(&self) -> impl Iterator<Item = Descriptor> + '_ {
        (0..self.items()).map(|n| self.descriptor(n))
    }

    /// Iterates live fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = FieldRef<'a>> + '_ {
        let ro = *self;
        (0..self.items())
            .rev()
            .map(move |n| (n, ro.descriptor(n)))
            .filter(|(_, d)| !d.is_dead())
            .map(move |(n, desc)| FieldRef {
                ro,
                unit_index: 1 + n,
                desc,
            })
    }

    /// Finds the first (oldest) live field matching `column` and `want`.
    pub fn lookup(&self, column: u16, want: impl Into<TypeMatch>) -> Option<FieldRef<'a>> {
        let want = want.into();
        self.iter().find(|f| f.desc.matches(column, want))
    }

    // ------------- typed getters with designated-empty fallbacks -------------
    //
    // When the field is missing these return the type-specific DENIL
    // sentinel instead of signalling an error; readers must accept the
    // sentinels in place of "missing" (they are part of the wire format).

    pub fn get_u16(&self, column: u16) -> u16 {
        self.lookup(column, FieldType::Uint16)
            .map(|f| f.as_u16())
            .unwrap_or(crate::denil::UINT16)
    }

    pub fn get_i32(&self, column: u16) -> i32 {
        self.lookup(column, FieldType::Int32)
            .map(|f| f.as_i32())
            .unwrap_or(crate::denil::INT32)
    }

    pub fn get_u32(&self, column: u16) -> u32 {
        self.lookup(column, FieldType::Uint32)
            .map(|f| f.as_u32())
            .unwrap_or(crate::denil::UINT32)
    }

    pub fn get_f32(&self, column: u16) -> f32 {
        self.lookup(column, FieldType::Fp32)
            .map(|f| f.as_f32())
            .unwrap_or_else(crate::denil::fp32)
    }

    pub fn get_i64(&self, column: u16) -> i64 {
        self.lookup(column, FieldType::Int64)
            .map(|f| f.as_i64())
            .unwrap_or(crate::denil::INT64)
    }

    pub fn get_u64(&self, column: u16) -> u64 {
        self.lookup(column, FieldType::Uint64)
            .map(|f| f.as_u64())
            .unwrap_or(crate::denil::UINT64)
    }

    pub fn get_f64(&self, column: u16) -> f64 {
        self.lookup(column, FieldType::Fp64)
            .map(|f| f.as_f64())
            .unwrap_or_else(crate::denil::fp64)
    }

    pub fn get_datetime(&self, column: u16) -> crate::DateTime {
        self.lookup(column, FieldType::Datetime)
            .map(|f| f.as_datetime())
            .unwrap_or(crate::DateTime::DENIL)
    }

    /// `None` stands in for the null-pointer DENIL of the original format.
    pub fn get_str(&self, column: u16) -> Option<&'a str> {
        self.lookup(column, FieldType::Cstr).map(|f| f.as_str())
    }

    pub fn get_opaque(&self, column: u16) -> Option<&'a [u8]> {
        self.lookup(column, FieldType::Opaque).map(|f| f.as_opaque())
    }

    pub fn get_fixbin(&self, column: u16, ty: FieldType) -> Option<&'a [u8]> {
        debug_assert!(matches!(
            ty,
            FieldType::B96 | FieldType::B128 | FieldType::B160 | FieldType::B256
        ));
        self.lookup(column, ty).map(|f| f.as_fixbin())
    }

    pub fn get_nested(&self, column: u16) -> Option<TupleRo<'a>> {
        self.lookup(column, FieldType::Nested).map(|f| f.as_nested())
    }

    /// Structural checks cheap enough for every construction.
    fn quick_check(&self) -> Option<&'static str> {
        if self.bytes.is_empty() {
            return Some("total_bytes is zero");
        }
        if self.bytes.len() % UNIT_SIZE != 0 {
            return Some("total_bytes is not a multiple of the unit size");
        }
        if self.bytes.len() > crate::MAX_TUPLE_BYTES {
            return Some("total_bytes exceeds the tuple limit");
        }
        if 1 + self.brutto_units() != self.total_units() {
            return Some("header brutto does not match total_bytes");
        }
        if self.items() > self.brutto_units() {
            return Some("descriptor count exceeds brutto");
        }
        None
    }

    /// Full validation of the serialized form. Returns the first violated
    /// condition as a short static string, or `None` when the tuple is
    /// well-formed.
    pub fn check(&self) -> Option<&'static str> {
        if let Some(reason) = self.quick_check() {
            return Some(reason);
        }

        let payload_begin = 1 + self.items();
        let payload_end = self.total_units();
        // one claim flag per payload unit, to detect overlapping fields
        let mut claimed = vec![false; payload_end - payload_begin];

        let mut claim =
            |from: usize, units: usize| -> Option<&'static str> {
                if from < payload_begin || from + units > payload_end {
                    return Some("field payload escapes the payload region");
                }
                for slot in &mut claimed[from - payload_begin..from - payload_begin + units] {
                    if *slot {
                        return Some("field payloads overlap");
                    }
                    *slot = true;
                }
                None
            };

        for nth in 0..self.items() {
            let desc = self.descriptor(nth);
            let Some(ty) = desc.field_type() else {
                return Some("descriptor holds an unknown type id");
            };
            let at = 1 + nth;

            match ty.fixed_units() {
                Some(0) => {} // null / inline uint16
                Some(units) => {
                    let target = at + desc.payload() as usize;
                    if desc.payload() == 0 {
                        return Some("fixed field has a zero payload offset");
                    }
                    if let Some(reason) = claim(target, units) {
                        return Some(reason);
                    }
                }
                None => {
                    let target = at + desc.payload() as usize;
                    if desc.payload() == 0 {
                        return Some("varlen field has a zero payload offset");
                    }
                    if target >= payload_end {
                        return Some("varlen header escapes the payload region");
                    }
                    let varlen = VarlenHeader::unpack(self.unit(target));
                    let brutto = varlen.brutto_units as usize;
                    if brutto == 0 {
                        return Some("varlen brutto is zero");
                    }
                    if let Some(reason) = claim(target, brutto) {
                        return Some(reason);
                    }
                    match ty {
                        FieldType::Cstr | FieldType::Opaque => {
                            let netto = varlen.netto as usize;
                            let extra = if ty == FieldType::Cstr { 1 } else { 0 };
                            if 1 + bytes2units(netto + extra) != brutto {
                                return Some("varlen brutto does not match netto length");
                            }
                            if ty == FieldType::Cstr {
                                let data = units2bytes(target + 1);
                                if self.bytes[data + netto] != 0 {
                                    return Some("cstr terminator is missing");
                                }
                            }
                        }
                        FieldType::Nested => {
                            let inner_begin = units2bytes(target + 1);
                            let inner_end = units2bytes(target + brutto);
                            match TupleRo::new(&self.bytes[inner_begin..inner_end]) {
                                Ok(inner) => {
                                    if inner.items() != varlen.netto as usize {
                                        return Some("nested item count mismatch");
                                    }
                                    if let Some(reason) = inner.check() {
                                        return Some(reason);
                                    }
                                }
                                Err(_) => return Some("nested tuple is malformed"),
                            }
                        }
                        _ => unreachable!(),
                    }
                }
            }
        }
        None
    }
}

/// Reference to one live field inside a [`TupleRo`].
#[derive(Debug, Clone, Copy)]
pub struct FieldRef<'a> {
    ro: TupleRo<'a>,
    /// Serialized unit index of the descriptor.
    unit_index: usize,
    desc: Descriptor,
}

impl<'a> FieldRef<'a> {
    pub fn column(&self) -> u16 {
        self.desc.column()
    }

    pub fn field_type(&self) -> FieldType {
        self.desc.field_type().expect("validated descriptor")
    }

    fn payload_unit(&self) -> usize {
        self.unit_index + self.desc.payload() as usize
    }

    fn payload_byte_at(&self, extra_units: usize) -> usize {
        units2bytes(self.payload_unit() + extra_units)
    }

    fn fixed_bytes(&self, units: usize) -> &'a [u8] {
        let at = self.payload_byte_at(0);
        &self.ro.bytes[at..at + units2bytes(units)]
    }

    fn varlen(&self) -> VarlenHeader {
        VarlenHeader::unpack(self.ro.unit(self.payload_unit()))
    }

    /// Inline `uint16` value.
    pub fn as_u16(&self) -> u16 {
        debug_assert_eq!(self.field_type(), FieldType::Uint16);
        self.desc.payload()
    }

    pub fn as_u32(&self) -> u32 {
        u32::from_le_bytes(self.fixed_bytes(1).try_into().unwrap())
    }

    pub fn as_i32(&self) -> i32 {
        self.as_u32() as i32
    }

    pub fn as_f32(&self) -> f32 {
        f32::from_bits(self.as_u32())
    }

    pub fn as_u64(&self) -> u64 {
        u64::from_le_bytes(self.fixed_bytes(2).try_into().unwrap())
    }

    pub fn as_i64(&self) -> i64 {
        self.as_u64() as i64
    }

    pub fn as_f64(&self) -> f64 {
        f64::from_bits(self.as_u64())
    }

    pub fn as_datetime(&self) -> crate::DateTime {
        crate::DateTime::from_fixedpoint(self.as_u64())
    }

    /// Fixed opaque bytes of a `b96`/`b128`/`b160`/`b256` field.
    pub fn as_fixbin(&self) -> &'a [u8] {
        let units = self.field_type().fixed_units().expect("fixbin type");
        self.fixed_bytes(units)
    }

    /// String payload without the stored terminator.
    pub fn as_str(&self) -> &'a str {
        debug_assert_eq!(self.field_type(), FieldType::Cstr);
        let varlen = self.varlen();
        let at = self.payload_byte_at(1);
        std::str::from_utf8(&self.ro.bytes[at..at + varlen.netto as usize])
            .expect("validated utf-8")
    }

    /// Opaque payload bytes.
    pub fn as_opaque(&self) -> &'a [u8] {
        debug_assert_eq!(self.field_type(), FieldType::Opaque);
        let varlen = self.varlen();
        let at = self.payload_byte_at(1);
        &self.ro.bytes[at..at + varlen.netto as usize]
    }

    /// View of a nested sub-tuple.
    pub fn as_nested(&self) -> TupleRo<'a> {
        debug_assert_eq!(self.field_type(), FieldType::Nested);
        let varlen = self.varlen();
        let begin = self.payload_byte_at(1);
        let end = units2bytes(self.payload_unit() + varlen.brutto_units as usize);
        TupleRo::new(&self.ro.bytes[begin..end]).expect("validated nested tuple")
    }

    /// The value bytes used for comparison and key derivation: the inline
    /// value for `uint16`, the fixed bytes, or the netto varlen content.
    pub fn value_bytes(&self) -> ValueBytes<'a> {
        match self.field_type() {
            FieldType::Null => ValueBytes::Inline([0, 0]),
            FieldType::Uint16 => ValueBytes::Inline(self.desc.payload().to_le_bytes()),
            FieldType::Cstr => ValueBytes::Slice(self.as_str().as_bytes()),
            FieldType::Opaque => ValueBytes::Slice(self.as_opaque()),
            FieldType::Nested => ValueBytes::Slice(self.as_nested().as_bytes()),
            ty => {
                let units = ty.fixed_units().expect("fixed type");
                ValueBytes::Slice(self.fixed_bytes(units))
            }
        }
    }
}

/// Borrowed-or-inline value bytes of a field.
#[derive(Debug, Clone, Copy)]
pub enum ValueBytes<'a> {
    Inline([u8; 2]),
    Slice(&'a [u8]),
}

impl<'a> ValueBytes<'a> {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            ValueBytes::Inline(bytes) => bytes,
            ValueBytes::Slice(slice) => slice,
        }
    }
}

/// Physical-order-independent tuple comparison.
///
/// Two tuples are equal iff the multisets of `(column, type, value bytes)`
/// are equal; the order is the lexicographic order of the sorted field
/// sequences. Used to compare whole table rows where the field insertion
/// order must not matter.
pub fn cmp_tuples(a: TupleRo<'_>, b: TupleRo<'_>) -> Ordering {
    fn sorted_fields<'t>(t: &TupleRo<'t>) -> Vec<(u16, u8, ValueBytes<'t>)> {
        let mut fields: Vec<_> = t
            .iter()
            .map(|f| (f.column(), f.field_type() as u8, f.value_bytes()))
            .collect();
        fields.sort_by(|x, y| {
            (x.0, x.1, x.2.as_slice()).cmp(&(y.0, y.1, y.2.as_slice()))
        });
        fields
    }

    let lhs = sorted_fields(&a);
    let rhs = sorted_fields(&b);
    let lhs = lhs.iter().map(|(c, t, v)| (*c, *t, v.as_slice()));
    let rhs = rhs.iter().map(|(c, t, v)| (*c, *t, v.as_slice()));
    lhs.cmp(rhs)
}

/// Validates a serialized tuple and computes the buffer size needed for a
/// mutable form with headroom for `more_items` descriptors and
/// `more_payload` payload bytes.
pub fn check_and_get_buffer_size(
    ro: TupleRo<'_>,
    more_items: usize,
    more_payload: usize,
) -> std::result::Result<usize, &'static str> {
    if let Some(reason) = ro.check() {
        return Err(reason);
    }
    let items = ro.items() + more_items;
    if items > LIMIT {
        return Err("too many items for the mutable form");
    }
    Ok(crate::space(
        items,
        units2bytes(ro.payload_units()) + more_payload,
    ))
}
