//! Row filters: a small predicate tree evaluated against full rows during
//! cursor scans.
//!
//! Comparison nodes use permissive cross-type semantics: integers compare
//! across widths and signedness, everything numeric compares against
//! floats, and incomparable pairs match nothing (except through `Ne`).

use crate::catalog::{ColumnHandle, TableHandle};
use crate::key::OwnedValue;
use crate::txn::Txn;
use crate::{Result, Value};
use tuple::{FieldRef, FieldType, TupleRo};

/// Outcome of one field/value comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lge {
    Lt,
    Eq,
    Gt,
    /// Not comparable (type clash, missing field against non-null).
    Incomparable,
}

/// Comparison operator of a filter node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
    Ne,
}

impl CmpOp {
    fn admits(self, lge: Lge) -> bool {
        match (self, lge) {
            (_, Lge::Incomparable) => self == CmpOp::Ne,
            (CmpOp::Lt, Lge::Lt) => true,
            (CmpOp::Le, Lge::Lt | Lge::Eq) => true,
            (CmpOp::Eq, Lge::Eq) => true,
            (CmpOp::Ge, Lge::Gt | Lge::Eq) => true,
            (CmpOp::Gt, Lge::Gt) => true,
            (CmpOp::Ne, Lge::Lt | Lge::Gt) => true,
            _ => false,
        }
    }
}

/// Predicate over a single looked-up field.
pub type ColumnPredicate = Box<dyn Fn(Option<FieldRef<'_>>) -> bool + Send>;
/// Predicate over the whole row.
pub type RowPredicate = Box<dyn Fn(TupleRo<'_>) -> bool + Send>;

/// One node of a filter tree.
pub enum Filter {
    Not(Box<Filter>),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    /// Compare a column against a constant.
    Cmp(CmpOp, ColumnHandle, OwnedValue),
    /// Custom predicate on one column's field.
    ColumnFn(ColumnHandle, ColumnPredicate),
    /// Custom predicate on the whole row.
    RowFn(RowPredicate),
}

impl Filter {
    /// Structural validation: comparison operands must be plain columns
    /// and concrete values.
    pub fn validate(&self) -> bool {
        match self {
            Filter::Not(inner) => inner.validate(),
            Filter::And(a, b) | Filter::Or(a, b) => a.validate() && b.validate(),
            Filter::Cmp(_, column, value) => {
                !column.shove().is_composite()
                    && !matches!(value, OwnedValue::Begin | OwnedValue::End)
            }
            Filter::ColumnFn(column, _) => !column.shove().is_composite(),
            Filter::RowFn(_) => true,
        }
    }

    /// Refreshes every embedded column handle against the transaction's
    /// schema.
    pub(crate) fn refresh(&mut self, txn: &mut Txn, table: &mut TableHandle) -> Result<()> {
        match self {
            Filter::Not(inner) => inner.refresh(txn, table),
            Filter::And(a, b) | Filter::Or(a, b) => {
                a.refresh(txn, table)?;
                b.refresh(txn, table)
            }
            Filter::Cmp(_, column, _) | Filter::ColumnFn(column, _) => {
                txn.refresh_couple(table, Some(column))
            }
            Filter::RowFn(_) => Ok(()),
        }
    }

    /// Evaluates the filter against a full row.
    pub fn matches(&self, row: TupleRo<'_>) -> bool {
        match self {
            Filter::Not(inner) => !inner.matches(row),
            Filter::And(a, b) => a.matches(row) && b.matches(row),
            Filter::Or(a, b) => a.matches(row) || b.matches(row),
            Filter::Cmp(op, column, value) => {
                let field = lookup_for(column, row);
                op.admits(cmp_field_value(field, &value.as_value()))
            }
            Filter::ColumnFn(column, pred) => pred(lookup_for(column, row)),
            Filter::RowFn(pred) => pred(row),
        }
    }
}

fn lookup_for<'r>(column: &ColumnHandle, row: TupleRo<'r>) -> Option<FieldRef<'r>> {
    let ordinal = column.ordinal().ok()?;
    let ty = column.shove().data_type()?;
    row.lookup(ordinal as u16, ty)
}

fn lge_of<T: PartialOrd>(left: T, right: T) -> Lge {
    match left.partial_cmp(&right) {
        Some(std::cmp::Ordering::Less) => Lge::Lt,
        Some(std::cmp::Ordering::Equal) => Lge::Eq,
        Some(std::cmp::Ordering::Greater) => Lge::Gt,
        None => Lge::Incomparable,
    }
}

/// Field-versus-value comparison with the permissive cross-type rules.
pub fn cmp_field_value(field: Option<FieldRef<'_>>, right: &Value<'_>) -> Lge {
    let Some(field) = field else {
        return if matches!(right, Value::Null) {
            Lge::Eq
        } else {
            Lge::Incomparable
        };
    };

    match right {
        Value::Null => match field.field_type() {
            FieldType::Null => Lge::Eq,
            FieldType::Opaque if field.as_opaque().is_empty() => Lge::Eq,
            _ => Lge::Incomparable,
        },
        Value::Sint(right) => cmp_number(field, NumberRef::Sint(*right)),
        Value::Uint(right) => cmp_number(field, NumberRef::Uint(*right)),
        Value::Float(right) => cmp_number(field, NumberRef::Float(*right)),
        Value::Datetime(right) => {
            if field.field_type() != FieldType::Datetime {
                return Lge::Incomparable;
            }
            lge_of(field.as_datetime().fixedpoint(), right.fixedpoint())
        }
        Value::Str(right) => match field.field_type() {
            FieldType::Cstr => lge_of(field.as_str(), *right),
            FieldType::Opaque => lge_of(field.as_opaque(), right.as_bytes()),
            _ => Lge::Incomparable,
        },
        Value::Binary(right) | Value::Shoved(right) => cmp_binary(field, *right),
        Value::Begin | Value::End | Value::Epsilon => Lge::Incomparable,
    }
}

enum NumberRef {
    Sint(i64),
    Uint(u64),
    Float(f64),
}

fn cmp_number(field: FieldRef<'_>, right: NumberRef) -> Lge {
    use FieldType::*;
    let left: NumberRef = match field.field_type() {
        Uint16 => NumberRef::Uint(field.as_u16() as u64),
        Uint32 => NumberRef::Uint(field.as_u32() as u64),
        Uint64 => NumberRef::Uint(field.as_u64()),
        Int32 => NumberRef::Sint(field.as_i32() as i64),
        Int64 => NumberRef::Sint(field.as_i64()),
        Fp32 => NumberRef::Float(field.as_f32() as f64),
        Fp64 => NumberRef::Float(field.as_f64()),
        _ => return Lge::Incomparable,
    };

    match (left, right) {
        (NumberRef::Uint(l), NumberRef::Uint(r)) => lge_of(l, r),
        (NumberRef::Sint(l), NumberRef::Sint(r)) => lge_of(l, r),
        (NumberRef::Uint(l), NumberRef::Sint(r)) => {
            if r < 0 {
                Lge::Gt
            } else {
                lge_of(l, r as u64)
            }
        }
        (NumberRef::Sint(l), NumberRef::Uint(r)) => {
            if l < 0 {
                Lge::Lt
            } else {
                lge_of(l as u64, r)
            }
        }
        (NumberRef::Float(l), NumberRef::Sint(r)) => lge_of(l, r as f64),
        (NumberRef::Float(l), NumberRef::Uint(r)) => lge_of(l, r as f64),
        (NumberRef::Sint(l), NumberRef::Float(r)) => lge_of(l as f64, r),
        (NumberRef::Uint(l), NumberRef::Float(r)) => lge_of(l as f64, r),
        (NumberRef::Float(l), NumberRef::Float(r)) => lge_of(l, r),
    }
}

fn cmp_binary(field: FieldRef<'_>, right: &[u8]) -> Lge {
    use FieldType::*;
    match field.field_type() {
        Null => {
            if right.is_empty() {
                Lge::Eq
            } else {
                Lge::Incomparable
            }
        }
        Cstr => lge_of(field.as_str().as_bytes(), right),
        Opaque => lge_of(field.as_opaque(), right),
        B96 | B128 | B160 | B256 => lge_of(field.as_fixbin(), right),
        Nested => lge_of(field.as_nested().as_bytes(), right),
        _ => Lge::Incomparable,
    }
}
