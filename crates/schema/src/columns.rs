//! Column-set builder: the mutable description a table is created from.
//!
//! Columns are described one by one, composites last, and the whole set is
//! validated and sorted into the canonical order before it is stored:
//! primary index first, then secondary indexes, then non-indexed
//! non-nullable columns, then non-indexed nullable ones. Code downstream
//! relies on this order to stop scanning early.

use crate::shove::{name_to_shove, IndexType, Shove};
use crate::{shove_eq, Result, SchemaError, MAX_COLS, MAX_INDEXES};
use tuple::FieldType;

/// Reverse byte order is only meaningful for keys longer than 8 bytes, or
/// for nullable fixed types whose DENIL depends on the comparison side.
fn nullable_reverse_sensitive(ty: FieldType) -> bool {
    matches!(
        ty,
        FieldType::Uint16
            | FieldType::Uint32
            | FieldType::Uint64
            | FieldType::B96
            | FieldType::B128
            | FieldType::B160
            | FieldType::B256
    )
}

fn reverse_is_legal(ty: FieldType, index: IndexType) -> bool {
    if !index.is_indexed() || index.is_obverse() {
        return true;
    }
    if index.is_ordered() && ty >= FieldType::B96 {
        return true;
    }
    index.is_indexed_and_nullable() && nullable_reverse_sensitive(ty)
}

/// Builder for a table description.
#[derive(Debug, Default, Clone)]
pub struct ColumnSet {
    /// Slot 0 is reserved for the primary index.
    columns: Vec<Shove>,
    /// Composite column shove -> member column shoves, in describe order.
    composites: Vec<(Shove, Vec<Shove>)>,
    /// Original-case symbolic names, in describe order.
    names: Vec<String>,
}

impl ColumnSet {
    pub fn new() -> ColumnSet {
        ColumnSet::default()
    }

    pub fn count(&self) -> usize {
        self.columns.iter().filter(|s| s.0 != 0).count()
    }

    /// Original-case names described so far (columns and composites).
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Describes a regular column.
    pub fn add(&mut self, name: &str, data_type: FieldType, index: IndexType) -> Result<()> {
        if data_type < FieldType::Uint16 || data_type > FieldType::Nested {
            return Err(SchemaError::BadType);
        }
        if !index.is_valid() {
            return Err(SchemaError::BadFlags);
        }
        if !reverse_is_legal(data_type, index) {
            return Err(SchemaError::BadFlags);
        }
        let shove = Shove::column(name_to_shove(name)?, data_type, index);
        self.push(name, shove, index)
    }

    /// Describes a composite index over previously described columns.
    /// Members are given by name, at least two, no composites among them.
    pub fn add_composite(&mut self, name: &str, index: IndexType, members: &[&str]) -> Result<()> {
        if !index.is_valid() || !index.is_indexed() {
            return Err(SchemaError::BadFlags);
        }
        if members.len() < 2 {
            return Err(SchemaError::BadComposite);
        }
        let shove = Shove::column(name_to_shove(name)?, FieldType::Null, index);

        let mut resolved = Vec::with_capacity(members.len());
        for member in members {
            let member_hash = name_to_shove(member)?;
            let found = self
                .columns
                .iter()
                .find(|s| s.0 != 0 && shove_eq(**s, Shove::column(member_hash, FieldType::Null, IndexType::NONE)))
                .copied()
                .ok_or(SchemaError::BadComposite)?;
            if found.is_composite() {
                return Err(SchemaError::BadComposite);
            }
            if resolved.contains(&found) {
                return Err(SchemaError::BadComposite);
            }
            resolved.push(found);
        }

        // no two composites may share a member multiset, nor may one be an
        // ordered prefix of another
        for (_, existing) in &self.composites {
            let mut sorted_a = existing.clone();
            let mut sorted_b = resolved.clone();
            sorted_a.sort();
            sorted_b.sort();
            if sorted_a == sorted_b {
                return Err(SchemaError::BadComposite);
            }
            let shorter = existing.len().min(resolved.len());
            if existing[..shorter] == resolved[..shorter] {
                return Err(SchemaError::BadComposite);
            }
        }

        self.push(name, shove, index)?;
        self.composites.push((shove, resolved));
        Ok(())
    }

    fn push(&mut self, name: &str, shove: Shove, index: IndexType) -> Result<()> {
        for existing in &self.columns {
            if existing.0 != 0 && shove_eq(*existing, shove) {
                return Err(SchemaError::Exists);
            }
        }

        if index.is_primary() {
            if !self.columns.is_empty() && self.columns[0].0 != 0 {
                return Err(SchemaError::Exists);
            }
            if self.columns.len() > 1 && !index.is_unique() {
                // secondaries already described require a unique primary
                return Err(SchemaError::BadFlags);
            }
            if self.columns.is_empty() {
                self.columns.push(shove);
            } else {
                self.columns[0] = shove;
            }
        } else {
            if index.is_secondary()
                && self.columns.first().map_or(false, |pk| pk.0 != 0 && !pk.index().is_unique())
            {
                return Err(SchemaError::BadFlags);
            }
            if self.count() >= MAX_COLS {
                return Err(SchemaError::TooMany);
            }
            if self.columns.is_empty() {
                self.columns.push(Shove(0)); // primary slot stays open
            }
            self.columns.push(shove);
        }
        self.names.push(name.to_string());
        Ok(())
    }

    fn prio(shove: Shove) -> u8 {
        let index = shove.index();
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
    }

    /// Full validation of the described set (before or after sorting).
    pub fn validate(&self) -> Result<()> {
        let count = self.columns.len();
        if count < 1 || self.columns[0].0 == 0 {
            return Err(SchemaError::BadFlags); // primary index is mandatory
        }
        if count > MAX_COLS {
            return Err(SchemaError::TooMany);
        }
        let pk = self.columns[0];
        if !pk.index().is_primary() {
            return Err(SchemaError::BadFlags);
        }

        let mut index_count = 0;
        for (nth, &shove) in self.columns.iter().enumerate() {
            let index = shove.index();
            if !index.is_valid() {
                return Err(SchemaError::BadFlags);
            }
            if (nth == 0) != index.is_primary() {
                return Err(SchemaError::BadFlags);
            }
            if index.is_secondary() && !pk.index().is_unique() {
                return Err(SchemaError::BadFlags);
            }
            if index.is_indexed() {
                index_count += 1;
                if index_count > MAX_INDEXES {
                    return Err(SchemaError::TooMany);
                }
            }
            if shove.is_composite() {
                if !index.is_indexed() {
                    return Err(SchemaError::BadFlags);
                }
                if !self.composites.iter().any(|(c, _)| shove_eq(*c, shove)) {
                    return Err(SchemaError::BadComposite);
                }
            } else {
                let Some(ty) = shove.data_type() else {
                    return Err(SchemaError::BadType);
                };
                if ty < FieldType::Uint16 || ty > FieldType::Nested {
                    return Err(SchemaError::BadType);
                }
                if !reverse_is_legal(ty, index) {
                    return Err(SchemaError::BadFlags);
                }
            }
            for &other in &self.columns[..nth] {
                if other.0 != 0 && shove_eq(other, shove) {
                    return Err(SchemaError::Exists);
                }
            }
        }
        Ok(())
    }

    /// Validates and produces the canonical column order plus the composite
    /// member lists renumbered to ordinals in that order.
    pub fn sorted(&self) -> Result<(Vec<Shove>, Vec<(usize, Vec<u16>)>)> {
        self.validate()?;

        let mut sorted = self.columns.clone();
        sorted.sort_by(|a, b| (Self::prio(*a), a.0).cmp(&(Self::prio(*b), b.0)));

        let ordinal_of = |wanted: Shove| -> Result<u16> {
            sorted
                .iter()
                .position(|s| *s == wanted)
                .map(|p| p as u16)
                .ok_or(SchemaError::BadComposite)
        };

        let mut composites = Vec::with_capacity(self.composites.len());
        for (nth, &shove) in sorted.iter().enumerate() {
            if !shove.is_composite() {
                continue;
            }
            let (_, members) = self
                .composites
                .iter()
                .find(|(c, _)| shove_eq(*c, shove))
                .ok_or(SchemaError::BadComposite)?;
            let ordinals = members
                .iter()
                .map(|m| ordinal_of(*m))
                .collect::<Result<Vec<u16>>>()?;
            composites.push((nth, ordinals));
        }

        Ok((sorted, composites))
    }
}
