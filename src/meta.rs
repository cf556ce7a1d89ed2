/*!
Defines [Meta], the catalog of one repo: the dense tid-indexed table
array (slot 0 reserved), the super-table list, the uid map, and the
schema maxima the row codec sizes its buffers from. One reader/writer
lock guards all of it; DDL holds the write lock for its whole mutation
sequence.
*/

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

use crate::action;
use crate::codec::Decoder;
use crate::error::{MetaError, Result};
use crate::model::schema::Schema;
use crate::model::table::{Table, TableKind};

/// The catalog of one repo.
pub struct Meta {
    state: RwLock<MetaState>,
}

/// Everything behind the meta lock.
pub(crate) struct MetaState {
    pub(crate) tables: Vec<Option<Arc<Table>>>,
    pub(crate) super_list: Vec<Arc<Table>>,
    pub(crate) uid_map: HashMap<u64, Arc<Table>>,
    pub(crate) table_count: usize,
    pub(crate) max_cols: i32,
    pub(crate) max_row_bytes: i32,
}

impl Meta {
    /// An empty catalog sized for `max_tables` dense slots.
    pub fn new(max_tables: u32) -> Meta {
        Meta {
            state: RwLock::new(MetaState {
                tables: vec![None; max_tables as usize],
                super_list: Vec::new(),
                uid_map: HashMap::new(),
                table_count: 0,
                max_cols: 0,
                max_row_bytes: 0,
            }),
        }
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, MetaState> {
        self.state.write()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, MetaState> {
        self.state.read()
    }

    /// Upper bound on dense table slots.
    pub fn max_tables(&self) -> usize {
        self.read().tables.len()
    }

    /// Number of live non-super tables.
    pub fn table_count(&self) -> usize {
        self.read().table_count
    }

    /// Widest current column count across all non-child tables.
    pub fn max_cols(&self) -> i32 {
        self.read().max_cols
    }

    /// Widest current row byte count across all non-child tables.
    pub fn max_row_bytes(&self) -> i32 {
        self.read().max_row_bytes
    }

    /// Look a table up by its unique id.
    pub fn table_by_uid(&self, uid: u64) -> Option<Arc<Table>> {
        self.read().uid_map.get(&uid).cloned()
    }

    /// Look a table up by its dense index.
    pub fn table_by_tid(&self, tid: i32) -> Option<Arc<Table>> {
        if tid < 1 {
            return None;
        }
        self.read().tables.get(tid as usize).cloned().flatten()
    }

    /// Snapshot of the super-table list.
    pub fn super_tables(&self) -> Vec<Arc<Table>> {
        self.read().super_list.clone()
    }

    /// Register a table. `with_index` also splices a child into its
    /// super's tag index; restore passes false and defers that to
    /// [Meta::organize].
    pub fn add_table(&self, table: Arc<Table>, with_index: bool) -> Result<()> {
        self.write().add_table(table, with_index)
    }

    /// Restore one persisted record: verify its checksum, decode the
    /// table and register it without touching any tag index. A corrupt
    /// record leaves the catalog unchanged.
    pub fn restore_record(&self, cont: &[u8]) -> Result<Arc<Table>> {
        let body = action::strip_checksum(cont)?;
        let mut dec = Decoder::new(body);
        let table = Arc::new(Table::decode(&mut dec)?);
        if !dec.is_empty() {
            return Err(MetaError::FileCorrupted);
        }
        self.add_table(table.clone(), false)?;
        trace!(
            table = %table.name(),
            tid = table.tid(),
            uid = table.uid(),
            "table restored from store"
        );
        Ok(table)
    }

    /// Rebuild the tag indexes after all records were restored. Restore
    /// defers index insertion, so a child may be replayed before its
    /// super without constraining the record order.
    pub fn organize(&self) -> Result<()> {
        let mut state = self.write();
        let children: Vec<Arc<Table>> = state
            .tables
            .iter()
            .skip(1)
            .flatten()
            .filter(|t| t.kind() == TableKind::Child)
            .cloned()
            .collect();
        for child in children {
            state.add_into_index(&child)?;
        }
        Ok(())
    }
}

impl MetaState {
    /// Link a child to its super and splice it into the super's index.
    pub(crate) fn add_into_index(&mut self, child: &Arc<Table>) -> Result<()> {
        let super_uid = child
            .super_uid()
            .ok_or_else(|| MetaError::InvalidAction {
                table: child.name().to_owned(),
            })?;
        let sup = self
            .uid_map
            .get(&super_uid)
            .cloned()
            .ok_or(MetaError::MissingSuperTable(super_uid))?;
        if sup.kind() != TableKind::Super {
            return Err(MetaError::InvalidTableType(sup.kind().id()));
        }
        // the strong reference from child to super is what keeps the
        // super alive for as long as any child points back at it
        child.set_super_ref(sup.clone());
        sup.index_insert(child);
        Ok(())
    }

    /// Unsplice a child from its super's index.
    pub(crate) fn remove_from_index(&mut self, child: &Arc<Table>) -> bool {
        match child.super_ref() {
            Some(sup) => sup.index_remove(child),
            None => false,
        }
    }

    pub(crate) fn add_table(&mut self, table: Arc<Table>, with_index: bool) -> Result<()> {
        let mut indexed = false;
        if table.kind() == TableKind::Super {
            self.super_list.push(table.clone());
        } else {
            if table.kind() == TableKind::Child && with_index {
                self.add_into_index(&table)?;
                indexed = true;
            }
            let tid = table.tid();
            if tid < 1 || tid as usize >= self.tables.len() {
                if indexed {
                    self.remove_from_index(&table);
                }
                return Err(MetaError::InvalidTableId {
                    tid,
                    uid: table.uid(),
                });
            }
            if let Some(existing) = &self.tables[tid as usize] {
                let err = MetaError::TableAlreadyExists {
                    name: existing.name().to_owned(),
                    tid: existing.tid(),
                    uid: existing.uid(),
                };
                if indexed {
                    self.remove_from_index(&table);
                }
                return Err(err);
            }
            self.tables[tid as usize] = Some(table.clone());
            self.table_count += 1;
        }

        if let Some(existing) = self.uid_map.get(&table.uid()) {
            // undo in reverse order of the steps above
            let err = MetaError::TableAlreadyExists {
                name: existing.name().to_owned(),
                tid: existing.tid(),
                uid: existing.uid(),
            };
            if table.kind() == TableKind::Super {
                self.super_list.retain(|s| !Arc::ptr_eq(s, &table));
            } else {
                self.tables[table.tid() as usize] = None;
                self.table_count -= 1;
                if indexed {
                    self.remove_from_index(&table);
                }
            }
            return Err(err);
        }
        self.uid_map.insert(table.uid(), table.clone());

        if table.kind() != TableKind::Child {
            if let Some(schema) = table.schema() {
                self.note_schema(&schema);
            }
        }

        trace!(
            table = %table.name(),
            tid = table.tid(),
            uid = table.uid(),
            kind = %table.kind(),
            "table added to meta"
        );
        Ok(())
    }

    pub(crate) fn remove_table(&mut self, table: &Arc<Table>, rm_from_index: bool) {
        let schema = table.schema();

        if table.kind() == TableKind::Super {
            self.super_list.retain(|s| !Arc::ptr_eq(s, table));
        } else {
            let tid = table.tid() as usize;
            if let Some(slot) = self.tables.get_mut(tid) {
                if slot.as_ref().is_some_and(|t| Arc::ptr_eq(t, table)) {
                    *slot = None;
                    self.table_count -= 1;
                }
            }
            if table.kind() == TableKind::Child && rm_from_index {
                self.remove_from_index(table);
            }
        }

        self.uid_map.remove(&table.uid());

        if let Some(schema) = schema {
            if schema.ncols() as i32 == self.max_cols || schema.row_bytes() == self.max_row_bytes {
                self.rescan_maxima();
            }
        }

        trace!(table = %table.name(), uid = table.uid(), "table removed from meta");
    }

    /// Fold one more current schema into the maxima.
    pub(crate) fn note_schema(&mut self, schema: &Schema) {
        self.max_cols = self.max_cols.max(schema.ncols() as i32);
        self.max_row_bytes = self.max_row_bytes.max(schema.row_bytes());
    }

    pub(crate) fn rescan_maxima(&mut self) {
        let mut cols = 0;
        let mut bytes = 0;
        for table in self.tables.iter().flatten().chain(self.super_list.iter()) {
            if table.kind() == TableKind::Child {
                continue;
            }
            if let Some(schema) = table.schema() {
                cols = cols.max(schema.ncols() as i32);
                bytes = bytes.max(schema.row_bytes());
            }
        }
        self.max_cols = cols;
        self.max_row_bytes = bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::append_checksum;
    use crate::model::config::{TableCfg, TableCfgBuilder};
    use crate::model::kvrow::KVRow;
    use crate::model::schema::{PrimitiveType, SchemaBuilder};

    fn normal_cfg(uid: u64, tid: i32, ncols: i16, width: i16) -> TableCfg {
        let mut b = SchemaBuilder::new(1);
        for i in 0..ncols {
            b = b.add_column(PrimitiveType::BigInt, i, width);
        }
        TableCfgBuilder::new(TableKind::Normal, uid, tid)
            .unwrap()
            .name(&format!("t{tid}"))
            .unwrap()
            .schema(b.build().unwrap())
            .build()
            .unwrap()
    }

    fn child_cfg(uid: u64, tid: i32, super_uid: u64, tag0: i32) -> TableCfg {
        let schema = SchemaBuilder::new(1)
            .add_column(PrimitiveType::Timestamp, 0, 8)
            .add_column(PrimitiveType::Double, 1, 8)
            .build()
            .unwrap();
        let tag_schema = SchemaBuilder::new(1)
            .add_column(PrimitiveType::Int, 100, 4)
            .build()
            .unwrap();
        let mut tags = KVRow::new();
        tags.set(100, tag0.to_le_bytes().to_vec());
        TableCfgBuilder::new(TableKind::Child, uid, tid)
            .unwrap()
            .name(&format!("d{tid}"))
            .unwrap()
            .schema(schema)
            .tag_schema(tag_schema)
            .unwrap()
            .super_table(super_uid, "meters")
            .unwrap()
            .tag_values(tags)
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_add_and_lookup() {
        let meta = Meta::new(16);
        let t = Arc::new(Table::new(&normal_cfg(5, 1, 3, 8), false).unwrap());
        meta.add_table(t.clone(), true).unwrap();
        assert!(Arc::ptr_eq(&meta.table_by_uid(5).unwrap(), &t));
        assert!(Arc::ptr_eq(&meta.table_by_tid(1).unwrap(), &t));
        assert_eq!(meta.table_count(), 1);
        assert_eq!(meta.max_cols(), 3);
        assert_eq!(meta.max_row_bytes(), 24);
    }

    #[test]
    fn test_tid_out_of_range_is_rejected() {
        let meta = Meta::new(4);
        let t = Arc::new(Table::new(&normal_cfg(5, 9, 1, 8), false).unwrap());
        assert!(matches!(
            meta.add_table(t, true),
            Err(MetaError::InvalidTableId { tid: 9, .. })
        ));
        assert_eq!(meta.table_count(), 0);
    }

    #[test]
    fn test_duplicate_tid_is_rejected_and_undone() {
        let meta = Meta::new(16);
        let a = Arc::new(Table::new(&normal_cfg(5, 1, 1, 8), false).unwrap());
        let b = Arc::new(Table::new(&normal_cfg(6, 1, 1, 8), false).unwrap());
        meta.add_table(a, true).unwrap();
        assert!(matches!(
            meta.add_table(b.clone(), true),
            Err(MetaError::TableAlreadyExists { .. })
        ));
        assert!(meta.table_by_uid(6).is_none());
        assert_eq!(meta.table_count(), 1);
    }

    #[test]
    fn test_duplicate_uid_is_rejected_and_undone() {
        let meta = Meta::new(16);
        let a = Arc::new(Table::new(&normal_cfg(5, 1, 1, 8), false).unwrap());
        let b = Arc::new(Table::new(&normal_cfg(5, 2, 1, 8), false).unwrap());
        meta.add_table(a, true).unwrap();
        assert!(matches!(
            meta.add_table(b, true),
            Err(MetaError::TableAlreadyExists { .. })
        ));
        assert!(meta.table_by_tid(2).is_none());
        assert_eq!(meta.table_count(), 1);
    }

    #[test]
    fn test_child_without_super_is_rejected() {
        let meta = Meta::new(16);
        let c = Arc::new(Table::new(&child_cfg(11, 1, 10, 7), false).unwrap());
        assert!(matches!(
            meta.add_table(c, true),
            Err(MetaError::MissingSuperTable(10))
        ));
        assert_eq!(meta.table_count(), 0);
    }

    #[test]
    fn test_child_links_into_super_index() {
        let meta = Meta::new(16);
        let cfg = child_cfg(11, 1, 10, 7);
        let sup = Arc::new(Table::new(&cfg, true).unwrap());
        let child = Arc::new(Table::new(&cfg, false).unwrap());
        meta.add_table(sup.clone(), true).unwrap();
        meta.add_table(child.clone(), true).unwrap();
        assert!(Arc::ptr_eq(&child.super_ref().unwrap(), &sup));
        assert!(sup.index_contains(&child));
        assert_eq!(meta.super_tables().len(), 1);

        meta.write().remove_table(&child, true);
        assert!(!sup.index_contains(&child));
        assert!(meta.table_by_uid(11).is_none());
    }

    #[test]
    fn test_maxima_rescan_after_remove() {
        let meta = Meta::new(16);
        let wide = Arc::new(Table::new(&normal_cfg(1, 1, 6, 10), false).unwrap());
        let narrow = Arc::new(Table::new(&normal_cfg(2, 2, 4, 5), false).unwrap());
        meta.add_table(wide.clone(), true).unwrap();
        meta.add_table(narrow, true).unwrap();
        assert_eq!(meta.max_cols(), 6);
        assert_eq!(meta.max_row_bytes(), 60);
        meta.write().remove_table(&wide, false);
        assert_eq!(meta.max_cols(), 4);
        assert_eq!(meta.max_row_bytes(), 20);
    }

    #[test]
    fn test_restore_then_organize_child_before_super() -> anyhow::Result<()> {
        let cfg = child_cfg(11, 1, 10, 7);
        let sup = Table::new(&cfg, true)?;
        let child = Table::new(&cfg, false)?;

        let mut child_rec = Vec::new();
        child.encode(&mut child_rec);
        let mut sup_rec = Vec::new();
        sup.encode(&mut sup_rec);

        let meta = Meta::new(16);
        // child record replays before its super
        meta.restore_record(&append_checksum(child_rec))?;
        meta.restore_record(&append_checksum(sup_rec))?;
        meta.organize()?;

        let restored_child = meta.table_by_uid(11).unwrap();
        let restored_sup = meta.table_by_uid(10).unwrap();
        assert!(Arc::ptr_eq(
            &restored_child.super_ref().unwrap(),
            &restored_sup
        ));
        assert!(restored_sup.index_contains(&restored_child));
        Ok(())
    }

    #[test]
    fn test_corrupt_record_leaves_meta_unchanged() {
        let meta = Meta::new(16);
        let t = Table::new(&normal_cfg(5, 1, 2, 8), false).unwrap();
        let mut rec = Vec::new();
        t.encode(&mut rec);
        let mut cont = append_checksum(rec);
        cont[4] ^= 0xFF;
        assert!(matches!(
            meta.restore_record(&cont),
            Err(MetaError::FileCorrupted)
        ));
        assert_eq!(meta.table_count(), 0);
        assert!(meta.table_by_uid(5).is_none());
    }
}
