//! Row operations: insert/update/upsert/delete with secondary-index
//! maintenance, indexed point lookup, column access on rows, and in-place
//! saturated arithmetic.

use crate::catalog::{ColumnHandle, TableHandle};
use crate::db::{Level, TableDef};
use crate::key::{row_to_key, value_to_key, Key, OwnedValue};
use crate::txn::Txn;
use crate::{Error, Result, Value};
use storage::PutFlags;
use tuple::{denil, FieldType, TupleRo, TupleRw};

/// How a row write treats an existing row under the same primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOp {
    /// Fail with `KeyExist` when the key is taken (unique primaries).
    Insert,
    /// Fail with `NotFound` when there is nothing to update.
    Update,
    /// Insert or update.
    Upsert,
}

/// Verifies that every non-nullable, non-unique-checked column has a
/// value. Unique secondaries are covered by the uniqueness pass; the
/// canonical column order lets the scan stop at the first non-indexed
/// nullable column.
pub(crate) fn check_nonnullable(def: &TableDef, row: TupleRo<'_>) -> Result<()> {
    for ordinal in 1..def.schema.column_count() {
        let shove = def.schema.column_shove(ordinal);
        let index = shove.index();
        if index.is_nullable() {
            if !index.is_indexed() {
                break; // nullable non-indexed columns close the order
            }
            continue;
        }
        if index.is_unique() {
            continue;
        }
        if shove.is_composite() {
            continue;
        }
        let ty = shove.data_type().ok_or(Error::SchemaCorrupted)?;
        if row.lookup(ordinal as u16, ty).is_none() {
            return Err(Error::ColumnMissing);
        }
    }
    Ok(())
}

/// Simulates every unique-secondary check a write would perform, without
/// touching anything. `stepover` skips one ordinal (the cursor's own
/// column during cursor updates).
pub(crate) fn check_secondary_uniq(
    txn: &mut Txn,
    def: &TableDef,
    old_row: Option<TupleRo<'_>>,
    new_row: TupleRo<'_>,
    stepover: usize,
) -> Result<()> {
    let handles = txn.open_secondaries(def)?;
    for ordinal in 1..def.schema.column_count() {
        let shove = def.schema.column_shove(ordinal);
        if !shove.index().is_secondary() {
            break;
        }
        if ordinal == stepover || !shove.index().is_unique() {
            continue;
        }
        let new_key = row_to_key(&def.schema, ordinal, new_row)?;
        if let Some(old_row) = old_row {
            let old_key = row_to_key(&def.schema, ordinal, old_row)?;
            if old_key == new_key {
                continue;
            }
        }
        match txn.storage().get(handles[ordinal], new_key.as_slice()) {
            Err(storage::StorageError::NotFound) => {}
            Ok(_) => return Err(Error::KeyExist),
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Applies a row change to every secondary index. `old_row == None` means
/// a fresh insert.
pub(crate) fn secondary_upsert(
    txn: &mut Txn,
    def: &TableDef,
    old_pk: &Key,
    old_row: Option<TupleRo<'_>>,
    new_pk: &Key,
    new_row: TupleRo<'_>,
    stepover: usize,
) -> Result<()> {
    let handles = txn.open_secondaries(def)?;
    for ordinal in 1..def.schema.column_count() {
        let shove = def.schema.column_shove(ordinal);
        if !shove.index().is_secondary() {
            break;
        }
        if ordinal == stepover {
            continue;
        }
        let unique = shove.index().is_unique();
        let put_flags = if unique {
            PutFlags::NO_DUP_DATA | PutFlags::NO_OVERWRITE
        } else {
            PutFlags::NO_DUP_DATA
        };
        let new_key = row_to_key(&def.schema, ordinal, new_row)?;

        let Some(old_row) = old_row else {
            txn.storage_mut()
                .put(handles[ordinal], new_key.as_slice(), new_pk.as_slice(), put_flags)?;
            continue;
        };

        let old_key = row_to_key(&def.schema, ordinal, old_row)?;
        if old_key != new_key {
            // the indexed value changed: re-home the reference
            match txn
                .storage_mut()
                .del(handles[ordinal], old_key.as_slice(), Some(old_pk.as_slice()))
            {
                Ok(()) => {}
                Err(storage::StorageError::NotFound) => return Err(Error::IndexCorrupted),
                Err(err) => return Err(err.into()),
            }
            txn.storage_mut()
                .put(handles[ordinal], new_key.as_slice(), new_pk.as_slice(), put_flags)?;
            continue;
        }

        if old_pk == new_pk {
            continue;
        }
        // same secondary key, different primary: swap the referenced pk
        match txn.storage_mut().replace(
            handles[ordinal],
            new_key.as_slice(),
            Some(new_pk.as_slice()),
            Some(old_pk.as_slice()),
            PutFlags::CURRENT | PutFlags::NO_DUP_DATA,
        ) {
            Ok(_) => {}
            Err(storage::StorageError::NotFound) => return Err(Error::IndexCorrupted),
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Removes a row's entries from every secondary index.
pub(crate) fn secondary_remove(
    txn: &mut Txn,
    def: &TableDef,
    pk: &Key,
    row: TupleRo<'_>,
    stepover: usize,
) -> Result<()> {
    let handles = txn.open_secondaries(def)?;
    for ordinal in 1..def.schema.column_count() {
        let shove = def.schema.column_shove(ordinal);
        if !shove.index().is_secondary() {
            break;
        }
        if ordinal == stepover {
            continue;
        }
        let key = row_to_key(&def.schema, ordinal, row)?;
        match txn
            .storage_mut()
            .del(handles[ordinal], key.as_slice(), Some(pk.as_slice()))
        {
            Ok(()) => {}
            Err(storage::StorageError::NotFound) => return Err(Error::IndexCorrupted),
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Validates a prospective write without modifying anything.
pub fn validate_put(
    txn: &mut Txn,
    table: &mut TableHandle,
    row: TupleRo<'_>,
    op: PutOp,
    skip_nonnullable: bool,
) -> Result<()> {
    txn.refresh_table(table)?;
    let def = table.def()?.clone();
    let pk = row_to_key(&def.schema, 0, row)?;
    if !skip_nonnullable {
        check_nonnullable(&def, row)?;
    }
    let store = txn.open_table_store(&def)?;

    let present = match txn.storage().get_ex(store, pk.as_slice()) {
        Ok((bytes, dups)) => Some((bytes, dups)),
        Err(storage::StorageError::NotFound) => None,
        Err(err) => return Err(err.into()),
    };

    match op {
        PutOp::Insert => {
            if def.schema.pk().index().is_unique() && present.is_some() {
                return Err(Error::KeyExist);
            }
        }
        PutOp::Update => {
            let Some((_, dups)) = &present else {
                return Err(Error::NotFound);
            };
            if *dups > 1 {
                return Err(Error::KeyExist);
            }
        }
        PutOp::Upsert => {
            if present.as_ref().map_or(0, |(_, dups)| *dups) > 1 {
                return Err(Error::KeyExist);
            }
        }
    }

    if let Some((bytes, _)) = &present {
        if bytes.as_slice() == row.as_bytes() {
            return match op {
                PutOp::Insert => Err(Error::KeyExist),
                _ => Ok(()),
            };
        }
    }

    if !def.schema.has_secondary() {
        return Ok(());
    }
    let old_bytes = present.map(|(bytes, _)| bytes);
    let old_row = match &old_bytes {
        Some(bytes) => Some(TupleRo::new(bytes)?),
        None => None,
    };
    check_secondary_uniq(txn, &def, old_row, row, 0)
}

/// Writes a row, maintaining every secondary index. Constraint failures
/// discovered after the primary store was touched abort the whole
/// transaction.
pub fn put(txn: &mut Txn, table: &mut TableHandle, row: TupleRo<'_>, op: PutOp) -> Result<()> {
    txn.require(Level::Write)?;
    txn.refresh_table(table)?;
    let def = table.def()?.clone();
    check_nonnullable(&def, row)?;
    let pk = row_to_key(&def.schema, 0, row)?;
    let store = txn.open_table_store(&def)?;
    let pk_unique = def.schema.pk().index().is_unique();

    // resolve the previous row and apply the primary-store change
    let present = match txn.storage().get_ex(store, pk.as_slice()) {
        Ok((bytes, dups)) => Some((bytes, dups)),
        Err(storage::StorageError::NotFound) => None,
        Err(err) => return Err(err.into()),
    };

    let old_bytes: Option<Vec<u8>> = match (op, &present) {
        (PutOp::Insert, Some(_)) if pk_unique => return Err(Error::KeyExist),
        (PutOp::Insert, Some((bytes, _))) if bytes.as_slice() == row.as_bytes() => {
            return Err(Error::KeyExist) // exact duplicate row
        }
        (PutOp::Insert, _) => None,
        (PutOp::Update, None) => return Err(Error::NotFound),
        (PutOp::Update | PutOp::Upsert, Some((_, dups))) if *dups > 1 => {
            return Err(Error::KeyExist)
        }
        (PutOp::Update | PutOp::Upsert, Some((bytes, _))) => {
            if bytes.as_slice() == row.as_bytes() {
                return Ok(()); // nothing to do
            }
            Some(bytes.clone())
        }
        (PutOp::Upsert, None) => None,
    };

    match &old_bytes {
        None => {
            let flags = if pk_unique {
                PutFlags::NO_DUP_DATA | PutFlags::NO_OVERWRITE
            } else {
                PutFlags::NO_DUP_DATA
            };
            txn.storage_mut().put(store, pk.as_slice(), row.as_bytes(), flags)?;
        }
        Some(old) => {
            if pk_unique {
                txn.storage_mut().replace(
                    store,
                    pk.as_slice(),
                    Some(row.as_bytes()),
                    None,
                    PutFlags::CURRENT,
                )?;
            } else {
                txn.storage_mut().del(store, pk.as_slice(), Some(old))?;
                txn.storage_mut()
                    .put(store, pk.as_slice(), row.as_bytes(), PutFlags::NO_DUP_DATA)?;
            }
        }
    }

    if !def.schema.has_secondary() {
        return Ok(());
    }
    let old_row = match &old_bytes {
        Some(bytes) => Some(TupleRo::new(bytes)?),
        None => None,
    };
    if let Err(err) = secondary_upsert(txn, &def, &pk, old_row, &pk, row, 0) {
        return Err(txn.internal_abort(err));
    }
    Ok(())
}

/// Deletes the given row (matched byte-for-byte in the primary store).
pub fn delete(txn: &mut Txn, table: &mut TableHandle, row: TupleRo<'_>) -> Result<()> {
    txn.require(Level::Write)?;
    txn.refresh_table(table)?;
    let def = table.def()?.clone();
    let pk = row_to_key(&def.schema, 0, row)?;
    let store = txn.open_table_store(&def)?;

    txn.storage_mut().del(store, pk.as_slice(), Some(row.as_bytes()))?;

    if def.schema.has_secondary() {
        if let Err(err) = secondary_remove(txn, &def, &pk, row, 0) {
            return Err(txn.internal_abort(err));
        }
    }
    Ok(())
}

/// Point lookup through a unique index; returns the row bytes.
pub fn get(
    txn: &mut Txn,
    table: &mut TableHandle,
    column: &mut ColumnHandle,
    value: &Value<'_>,
) -> Result<Vec<u8>> {
    txn.refresh_couple(table, Some(column))?;
    let def = table.def()?.clone();
    let ordinal = column.ordinal()?;
    let shove = column.shove();
    if !shove.index().is_indexed() || !shove.index().is_unique() {
        return Err(Error::NoIndex);
    }

    let key = value_to_key(shove, value)?;
    let store = txn.open_table_store(&def)?;
    if shove.index().is_primary() {
        return Ok(txn.storage().get(store, key.as_slice())?);
    }
    let index = txn.open_index_store(&def, ordinal)?;
    let pk = txn.storage().get(index, key.as_slice())?;
    match txn.storage().get(store, &pk) {
        Ok(row) => Ok(row),
        Err(storage::StorageError::NotFound) => Err(Error::IndexCorrupted),
        Err(err) => Err(err.into()),
    }
}

// ---------------- column access on rows ----------------

fn fixbin_is_denil(index: schema::IndexType, bytes: &[u8]) -> bool {
    let fill = if index.is_obverse() { 0x00 } else { 0xFF };
    bytes.iter().all(|b| *b == fill)
}

/// Reads one column of a row as a typed value. A missing field (or a
/// stored DENIL in a nullable indexed column) reads as `Null` with
/// [`Error::NoData`] signalled through the result pair.
pub fn read_column(def: &TableDef, ordinal: usize, row: TupleRo<'_>) -> Result<OwnedValue> {
    let shove = def.schema.column_shove(ordinal);
    if shove.is_composite() {
        return Err(Error::Invalid);
    }
    let ty = shove.data_type().ok_or(Error::SchemaCorrupted)?;
    let index = shove.index();
    let nullable = index.is_indexed_and_nullable();

    let Some(field) = row.lookup(ordinal as u16, ty) else {
        return Err(Error::NoData);
    };

    Ok(match ty {
        FieldType::Uint16 => {
            let v = field.as_u16();
            let nil = if index.is_obverse() { 0 } else { u16::MAX };
            if nullable && v == nil {
                OwnedValue::Null
            } else {
                OwnedValue::Uint(v as u64)
            }
        }
        FieldType::Uint32 => {
            let v = field.as_u32();
            let nil = if index.is_obverse() { 0 } else { u32::MAX };
            if nullable && v == nil {
                OwnedValue::Null
            } else {
                OwnedValue::Uint(v as u64)
            }
        }
        FieldType::Uint64 => {
            let v = field.as_u64();
            let nil = if index.is_obverse() { 0 } else { u64::MAX };
            if nullable && v == nil {
                OwnedValue::Null
            } else {
                OwnedValue::Uint(v)
            }
        }
        FieldType::Int32 => {
            let v = field.as_i32();
            if nullable && v == denil::INT32 {
                OwnedValue::Null
            } else {
                OwnedValue::Sint(v as i64)
            }
        }
        FieldType::Int64 => {
            let v = field.as_i64();
            if nullable && v == denil::INT64 {
                OwnedValue::Null
            } else {
                OwnedValue::Sint(v)
            }
        }
        FieldType::Fp32 => {
            let v = field.as_f32();
            if nullable && v.to_bits() == denil::FP32_BITS {
                OwnedValue::Null
            } else {
                OwnedValue::Float(v as f64)
            }
        }
        FieldType::Fp64 => {
            let v = field.as_f64();
            if nullable && v.to_bits() == denil::FP64_BITS {
                OwnedValue::Null
            } else {
                OwnedValue::Float(v)
            }
        }
        FieldType::Datetime => {
            let v = field.as_datetime();
            if nullable && v.fixedpoint() == denil::DATETIME {
                OwnedValue::Null
            } else {
                OwnedValue::Datetime(v)
            }
        }
        FieldType::Cstr => OwnedValue::String(field.as_str().to_string()),
        FieldType::Opaque => OwnedValue::Binary(field.as_opaque().to_vec()),
        FieldType::B96 | FieldType::B128 | FieldType::B160 | FieldType::B256 => {
            let bytes = field.as_fixbin();
            if nullable && fixbin_is_denil(index, bytes) {
                OwnedValue::Null
            } else {
                OwnedValue::Binary(bytes.to_vec())
            }
        }
        FieldType::Nested => OwnedValue::Binary(field.as_nested().as_bytes().to_vec()),
        FieldType::Null => return Err(Error::Invalid),
    })
}

/// Reads one column including composites: composite columns come back as
/// their derived (`Shoved`) key.
pub fn read_column_or_composite(
    def: &TableDef,
    ordinal: usize,
    row: TupleRo<'_>,
) -> Result<OwnedValue> {
    let shove = def.schema.column_shove(ordinal);
    if shove.is_composite() {
        let key = crate::key::composite_row_to_key(&def.schema, ordinal, row)?;
        return Ok(OwnedValue::Shoved(key.bytes));
    }
    read_column(def, ordinal, row)
}

/// Writes a typed value into a row column. Storing a value equal to the
/// DENIL of a nullable indexed column erases the field when
/// `erase_on_denil` is set and is rejected otherwise; `Null` always
/// erases.
pub fn upsert_column(
    pt: &mut TupleRw,
    def: &TableDef,
    ordinal: usize,
    value: &Value<'_>,
    erase_on_denil: bool,
) -> Result<()> {
    let shove = def.schema.column_shove(ordinal);
    if shove.is_composite() {
        return Err(Error::Invalid);
    }
    let ty = shove.data_type().ok_or(Error::SchemaCorrupted)?;
    let index = shove.index();
    let nullable = index.is_indexed_and_nullable();
    let column = ordinal as u16;

    let denil_catched = |pt: &mut TupleRw| -> Result<()> {
        if !erase_on_denil {
            return Err(Error::BadValue);
        }
        pt.erase(column, tuple::TypeMatch::ANY);
        Ok(())
    };

    if matches!(value, Value::Null) {
        pt.erase(column, tuple::TypeMatch::ANY);
        return Ok(());
    }

    match ty {
        FieldType::Uint16 => {
            let v = crate::key::unsigned_column(value, u16::MAX as u64)?;
            let nil = if index.is_obverse() { 0 } else { u16::MAX as u64 };
            if nullable && v == nil {
                return denil_catched(pt);
            }
            pt.upsert_u16(column, v as u16)?;
        }
        FieldType::Uint32 => {
            let v = crate::key::unsigned_column(value, u32::MAX as u64)?;
            let nil = if index.is_obverse() { 0 } else { u32::MAX as u64 };
            if nullable && v == nil {
                return denil_catched(pt);
            }
            pt.upsert_u32(column, v as u32)?;
        }
        FieldType::Uint64 => {
            let v = crate::key::unsigned_column(value, u64::MAX)?;
            let nil = if index.is_obverse() { 0 } else { u64::MAX };
            if nullable && v == nil {
                return denil_catched(pt);
            }
            pt.upsert_u64(column, v)?;
        }
        FieldType::Int32 => {
            let v = crate::key::signed_column(value, i32::MIN as i64, i32::MAX as i64)?;
            if nullable && v == denil::INT32 as i64 {
                return denil_catched(pt);
            }
            pt.upsert_i32(column, v as i32)?;
        }
        FieldType::Int64 => {
            let v = crate::key::signed_column(value, i64::MIN, i64::MAX)?;
            if nullable && v == denil::INT64 {
                return denil_catched(pt);
            }
            pt.upsert_i64(column, v)?;
        }
        FieldType::Fp32 => {
            let Value::Float(fp) = value else {
                return Err(Error::TypeMismatch);
            };
            let mut bits = fp.to_bits();
            if nullable && bits >= denil::FP32X64_BITS {
                if bits == denil::FP32X64_BITS {
                    return denil_catched(pt);
                }
                // keep NaN-ness but dodge the DENIL pattern after narrowing
                bits = denil::FP32X64_QSNAN_BITS;
            }
            let fp = f64::from_bits(bits);
            if !fp.is_nan() && fp.abs() > f32::MAX as f64 && !fp.is_infinite() {
                return Err(Error::BadValue);
            }
            pt.upsert_f32(column, fp as f32)?;
        }
        FieldType::Fp64 => {
            let Value::Float(fp) = value else {
                return Err(Error::TypeMismatch);
            };
            if nullable && fp.to_bits() == denil::FP64_BITS {
                return denil_catched(pt);
            }
            pt.upsert_f64(column, *fp)?;
        }
        FieldType::Datetime => {
            let Value::Datetime(dt) = value else {
                return Err(Error::TypeMismatch);
            };
            if nullable && dt.fixedpoint() == denil::DATETIME {
                return denil_catched(pt);
            }
            pt.upsert_datetime(column, *dt)?;
        }
        FieldType::Cstr => {
            let Value::Str(s) = value else {
                return Err(Error::TypeMismatch);
            };
            pt.upsert_str(column, s)?;
        }
        FieldType::Opaque => {
            let Value::Binary(b) = value else {
                return Err(Error::TypeMismatch);
            };
            pt.upsert_opaque(column, b)?;
        }
        FieldType::B96 | FieldType::B128 | FieldType::B160 | FieldType::B256 => {
            let Value::Binary(b) = value else {
                return Err(Error::TypeMismatch);
            };
            if b.len() != tuple::UNIT_SIZE * ty.fixed_units().unwrap() {
                return Err(Error::DataLenMismatch);
            }
            if nullable && fixbin_is_denil(index, b) {
                return denil_catched(pt);
            }
            pt.upsert_fixbin(column, ty, b)?;
        }
        FieldType::Nested => {
            let Value::Binary(b) = value else {
                return Err(Error::TypeMismatch);
            };
            pt.upsert_nested(column, TupleRo::new(b)?)?;
        }
        FieldType::Null => return Err(Error::Invalid),
    }
    Ok(())
}

// ---------------- in-place arithmetic ----------------

/// Binary operation of [`column_inplace`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InplaceOp {
    /// `target = min(target + argument, type max)`
    SaturatedAdd,
    /// `target = max(target - argument, type min)`
    SaturatedSub,
    /// `target = min(target * argument, type max)`
    SaturatedMul,
    /// `target = target / argument` (saturates on zero divisor edge)
    SaturatedDiv,
    Min,
    Max,
    /// Basic exponential smoothing; the factor comes from
    /// [`BesFactor`].
    Bes(BesFactor),
}

/// Smoothing factor of [`InplaceOp::Bes`]: either a float strictly inside
/// (0, 1), or a negative integer N in (-24, 0) meaning `2^N`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BesFactor {
    Alpha(f64),
    Shift(i32),
}

impl BesFactor {
    fn alpha(self) -> Result<f64> {
        match self {
            BesFactor::Alpha(alpha) => {
                if alpha > 0.0 && alpha < 1.0 {
                    Ok(alpha)
                } else {
                    Err(Error::BadValue)
                }
            }
            BesFactor::Shift(n) => {
                if n > -24 && n < 0 {
                    Ok((2.0f64).powi(n))
                } else {
                    Err(Error::BadValue)
                }
            }
        }
    }
}

fn saturated_signed(op: InplaceOp, target: i64, arg: i64, min: i64, max: i64) -> Result<i64> {
    let wide = match op {
        InplaceOp::SaturatedAdd => target.saturating_add(arg),
        InplaceOp::SaturatedSub => target.saturating_sub(arg),
        InplaceOp::SaturatedMul => target.saturating_mul(arg),
        InplaceOp::SaturatedDiv => {
            if arg == 0 {
                return Err(Error::BadValue);
            }
            target.wrapping_div(arg)
        }
        InplaceOp::Min => target.min(arg),
        InplaceOp::Max => target.max(arg),
        InplaceOp::Bes(factor) => {
            let alpha = factor.alpha()?;
            let smoothed = target as f64 + alpha * (arg as f64 - target as f64);
            smoothed.round() as i64
        }
    };
    Ok(wide.clamp(min, max))
}

fn saturated_unsigned(op: InplaceOp, target: u64, arg: u64, max: u64) -> Result<u64> {
    let wide = match op {
        InplaceOp::SaturatedAdd => target.saturating_add(arg),
        InplaceOp::SaturatedSub => target.saturating_sub(arg),
        InplaceOp::SaturatedMul => target.saturating_mul(arg),
        InplaceOp::SaturatedDiv => {
            if arg == 0 {
                return Err(Error::BadValue);
            }
            target / arg
        }
        InplaceOp::Min => target.min(arg),
        InplaceOp::Max => target.max(arg),
        InplaceOp::Bes(factor) => {
            let alpha = factor.alpha()?;
            let smoothed = target as f64 + alpha * (arg as f64 - target as f64);
            if smoothed <= 0.0 {
                0
            } else {
                smoothed.round() as u64
            }
        }
    };
    Ok(wide.min(max))
}

fn saturated_float(op: InplaceOp, target: f64, arg: f64) -> Result<f64> {
    Ok(match op {
        InplaceOp::SaturatedAdd => target + arg,
        InplaceOp::SaturatedSub => target - arg,
        InplaceOp::SaturatedMul => target * arg,
        InplaceOp::SaturatedDiv => {
            if arg == 0.0 {
                return Err(Error::BadValue);
            }
            target / arg
        }
        InplaceOp::Min => target.min(arg),
        InplaceOp::Max => target.max(arg),
        InplaceOp::Bes(factor) => {
            let alpha = factor.alpha()?;
            target + alpha * (arg - target)
        }
    })
}

/// Read-modify-write of one numeric column inside a mutable row.
/// `Ok` when the value changed, [`Error::NoData`] when it stayed equal.
pub fn column_inplace(
    pt: &mut TupleRw,
    def: &TableDef,
    ordinal: usize,
    op: InplaceOp,
    arg: &Value<'_>,
) -> Result<()> {
    let shove = def.schema.column_shove(ordinal);
    let ty = shove.data_type().ok_or(Error::SchemaCorrupted)?;
    let column = ordinal as u16;

    match ty {
        FieldType::Uint16 | FieldType::Uint32 | FieldType::Uint64 => {
            let max = match ty {
                FieldType::Uint16 => u16::MAX as u64,
                FieldType::Uint32 => u32::MAX as u64,
                _ => u64::MAX,
            };
            let target = match ty {
                FieldType::Uint16 => pt
                    .take_noshrink()
                    .lookup(column, ty)
                    .map(|f| f.as_u16() as u64),
                FieldType::Uint32 => pt.take_noshrink().lookup(column, ty).map(|f| f.as_u32() as u64),
                _ => pt.take_noshrink().lookup(column, ty).map(|f| f.as_u64()),
            }
            .ok_or(Error::ColumnMissing)?;
            let arg = crate::key::unsigned_column(arg, max)?;
            let fresh = saturated_unsigned(op, target, arg, max)?;
            if fresh == target {
                return Err(Error::NoData);
            }
            match ty {
                FieldType::Uint16 => pt.update_u16(column, fresh as u16)?,
                FieldType::Uint32 => pt.update_u32(column, fresh as u32)?,
                _ => pt.update_u64(column, fresh)?,
            }
        }
        FieldType::Int32 | FieldType::Int64 => {
            let (min, max) = match ty {
                FieldType::Int32 => (i32::MIN as i64, i32::MAX as i64),
                _ => (i64::MIN, i64::MAX),
            };
            let target = match ty {
                FieldType::Int32 => pt.take_noshrink().lookup(column, ty).map(|f| f.as_i32() as i64),
                _ => pt.take_noshrink().lookup(column, ty).map(|f| f.as_i64()),
            }
            .ok_or(Error::ColumnMissing)?;
            let arg = crate::key::signed_column(arg, min, max)?;
            let fresh = saturated_signed(op, target, arg, min, max)?;
            if fresh == target {
                return Err(Error::NoData);
            }
            match ty {
                FieldType::Int32 => pt.update_i32(column, fresh as i32)?,
                _ => pt.update_i64(column, fresh)?,
            }
        }
        FieldType::Fp32 | FieldType::Fp64 => {
            let target = match ty {
                FieldType::Fp32 => pt.take_noshrink().lookup(column, ty).map(|f| f.as_f32() as f64),
                _ => pt.take_noshrink().lookup(column, ty).map(|f| f.as_f64()),
            }
            .ok_or(Error::ColumnMissing)?;
            let arg = crate::value::value_as_float(arg)?;
            let fresh = saturated_float(op, target, arg)?;
            let unchanged = match ty {
                FieldType::Fp32 => (fresh as f32).to_bits() == (target as f32).to_bits(),
                _ => fresh.to_bits() == target.to_bits(),
            };
            if unchanged {
                return Err(Error::NoData);
            }
            match ty {
                FieldType::Fp32 => pt.update_f32(column, fresh as f32)?,
                _ => pt.update_f64(column, fresh)?,
            }
        }
        _ => return Err(Error::TypeMismatch),
    }
    Ok(())
}
