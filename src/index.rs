/*!
Defines [TagIndex], the ordered multimap each super table keeps over its
children. The index is keyed by the value of the designated tag column
(tag\[0\]) but never stores that key: every comparison fetches the
current value from the child, so tag updates that do not touch the
designated column never rewrite the index.
*/

use std::cmp::Ordering;
use std::sync::{Arc, Weak};

use crate::model::schema::{ColumnSchema, PrimitiveType};
use crate::model::table::Table;

/// Branching constant of the index; seed capacity for a fresh index.
pub const SUPER_TABLE_SKIP_LEVEL: usize = 5;

/// Position of the designated (indexed) column inside a tag schema.
pub const DEFAULT_TAG_INDEX_COLUMN: usize = 0;

/// Ordered multimap from the designated tag value to child tables.
/// Entries are weak back-pointers; children hold the strong reference
/// to their super, which keeps the ownership acyclic.
pub struct TagIndex {
    key_col_id: i16,
    key_type: PrimitiveType,
    key_bytes: i16,
    entries: Vec<Weak<Table>>,
}

impl TagIndex {
    /// Build an index typed and sized by the designated tag column.
    pub fn new(col: &ColumnSchema) -> TagIndex {
        TagIndex {
            key_col_id: col.col_id,
            key_type: col.col_type,
            key_bytes: col.bytes,
            entries: Vec::with_capacity(1 << SUPER_TABLE_SKIP_LEVEL),
        }
    }

    /// Column id of the designated tag column.
    pub fn key_col_id(&self) -> i16 {
        self.key_col_id
    }

    /// Number of entries, dead back-pointers included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key_of(&self, table: &Table) -> Option<Vec<u8>> {
        table.raw_tag_value(self.key_col_id)
    }

    fn cmp_to(&self, entry: &Weak<Table>, key: Option<&[u8]>) -> Ordering {
        let entry_key = entry.upgrade().and_then(|t| self.key_of(&t));
        cmp_keys(self.key_type, entry_key.as_deref(), key)
    }

    /// Splice a child in at its key position. Duplicate keys are
    /// permitted; the new entry lands after its equals.
    pub fn insert(&mut self, child: &Arc<Table>) {
        let key = self.key_of(child);
        if let Some(k) = &key {
            debug_assert!(
                !self.key_type.is_var_len() || (k.len() as i16) < self.key_bytes,
                "variable tag value exceeds the column width"
            );
        }
        let pos = self
            .entries
            .partition_point(|e| self.cmp_to(e, key.as_deref()) != Ordering::Greater);
        self.entries.insert(pos, Arc::downgrade(child));
    }

    /// Remove the entry whose payload is exactly `child`, scanning the
    /// run of entries that share its current key. Returns false when no
    /// entry matches.
    pub fn remove(&mut self, child: &Arc<Table>) -> bool {
        let key = self.key_of(child);
        let lo = self
            .entries
            .partition_point(|e| self.cmp_to(e, key.as_deref()) == Ordering::Less);
        let hi = self
            .entries
            .partition_point(|e| self.cmp_to(e, key.as_deref()) != Ordering::Greater);
        for i in lo..hi {
            if std::ptr::eq(self.entries[i].as_ptr(), Arc::as_ptr(child)) {
                self.entries.remove(i);
                return true;
            }
        }
        false
    }

    /// True when the index holds an entry for exactly this child.
    pub fn contains(&self, child: &Arc<Table>) -> bool {
        self.entries
            .iter()
            .any(|e| std::ptr::eq(e.as_ptr(), Arc::as_ptr(child)))
    }

    /// Live children in ascending key order.
    pub fn children(&self) -> Vec<Arc<Table>> {
        self.entries.iter().filter_map(Weak::upgrade).collect()
    }
}

/// Order two designated-tag keys by the column type. A missing value
/// orders before every present one.
fn cmp_keys(ty: PrimitiveType, a: Option<&[u8]>, b: Option<&[u8]>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => cmp_values(ty, a, b),
    }
}

fn cmp_values(ty: PrimitiveType, a: &[u8], b: &[u8]) -> Ordering {
    match ty {
        PrimitiveType::Bool | PrimitiveType::TinyInt => cmp_as(a, b, i8::from_le_bytes),
        PrimitiveType::SmallInt => cmp_as(a, b, i16::from_le_bytes),
        PrimitiveType::Int => cmp_as(a, b, i32::from_le_bytes),
        PrimitiveType::BigInt | PrimitiveType::Timestamp => cmp_as(a, b, i64::from_le_bytes),
        PrimitiveType::Float => cmp_float(a, b, f32::from_le_bytes, f32::total_cmp),
        PrimitiveType::Double => cmp_float(a, b, f64::from_le_bytes, f64::total_cmp),
        PrimitiveType::Binary | PrimitiveType::NChar => a.cmp(b),
    }
}

fn cmp_as<const N: usize, T: Ord>(a: &[u8], b: &[u8], from: fn([u8; N]) -> T) -> Ordering {
    match (a.try_into(), b.try_into()) {
        (Ok(a), Ok(b)) => from(a).cmp(&from(b)),
        // width mismatch: fall back to the raw bytes
        _ => a.cmp(b),
    }
}

fn cmp_float<const N: usize, T>(
    a: &[u8],
    b: &[u8],
    from: fn([u8; N]) -> T,
    cmp: fn(&T, &T) -> Ordering,
) -> Ordering {
    match (a.try_into(), b.try_into()) {
        (Ok(a), Ok(b)) => cmp(&from(a), &from(b)),
        _ => a.cmp(b),
    }
}
