/*!
Defines [Table], the per-table catalog entity. The four kinds share
identity (uid, name) but own different fields; the payload enum mirrors
that matrix. Reference counting is carried by `Arc`: children hold a
strong reference to their super, a super's tag index holds weak
back-pointers to its children.
*/

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::codec::{self, Decoder};
use crate::error::{MetaError, Result};
use crate::index::{TagIndex, DEFAULT_TAG_INDEX_COLUMN};
use crate::model::config::TableCfg;
use crate::model::kvrow::KVRow;
use crate::model::schema::{PrimitiveType, Schema, SchemaHistory};

/// Sentinel uid meaning "no super table".
pub const INVALID_SUPER_TABLE_ID: u64 = u64::MAX;

/// `last_key` value of a table that has seen no rows yet.
pub const LAST_KEY_INITIAL: i64 = i64::MIN;

/// Dense table index of super tables, which never join the tid array.
const SUPER_TABLE_TID: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// The four table kinds of the catalog.
pub enum TableKind {
    /// Schema template grouping children that share one tag schema.
    Super,
    /// A concrete series under a super table; tags but no own schema.
    Child,
    /// A standalone table with its own schema.
    Normal,
    /// A standalone table fed by a continuous query.
    Stream,
}

impl TableKind {
    /// Wire id of the kind.
    pub fn id(&self) -> u8 {
        match self {
            TableKind::Super => 0,
            TableKind::Child => 1,
            TableKind::Normal => 2,
            TableKind::Stream => 3,
        }
    }

    /// Decode a wire id back into a kind.
    pub fn from_id(id: u8) -> Option<TableKind> {
        match id {
            0 => Some(TableKind::Super),
            1 => Some(TableKind::Child),
            2 => Some(TableKind::Normal),
            3 => Some(TableKind::Stream),
            _ => None,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TableKind::Super => write!(f, "super"),
            TableKind::Child => write!(f, "child"),
            TableKind::Normal => write!(f, "normal"),
            TableKind::Stream => write!(f, "stream"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Identity of a table: the globally unique uid plus the dense tid.
pub struct TableId {
    /// Globally unique 64-bit table identity.
    pub uid: u64,
    /// Dense per-repo table index; -1 for super tables.
    pub tid: i32,
}

/// Kind-specific payload; each kind owns only the fields its lifecycle
/// touches.
enum TableData {
    Normal {
        schemas: SchemaHistory,
    },
    Super {
        schemas: SchemaHistory,
        tag_schema: Arc<Schema>,
        index: TagIndex,
    },
    Child {
        super_uid: u64,
        super_ref: Option<Arc<Table>>,
        tag_values: KVRow,
    },
    Stream {
        schemas: SchemaHistory,
        sql: String,
    },
}

/// One table of the catalog.
pub struct Table {
    uid: u64,
    tid: i32,
    name: String,
    kind: TableKind,
    last_key: AtomicI64,
    data: RwLock<TableData>,
}

impl Table {
    /// Build a table from a vetted config. With `as_super` the super
    /// table a child config implicitly carries is materialized instead
    /// of the child itself.
    pub fn new(cfg: &TableCfg, as_super: bool) -> Result<Table> {
        if as_super {
            let name = cfg
                .super_name()
                .ok_or_else(|| MetaError::InvalidCreateMsg("missing super table name".into()))?;
            let tag_schema = cfg
                .tag_schema()
                .ok_or_else(|| MetaError::InvalidCreateMsg("missing tag schema".into()))?;
            let key_col = tag_schema
                .column(DEFAULT_TAG_INDEX_COLUMN)
                .ok_or_else(|| MetaError::InvalidCreateMsg("empty tag schema".into()))?;
            return Ok(Table {
                uid: cfg.super_uid(),
                tid: SUPER_TABLE_TID,
                name: name.to_owned(),
                kind: TableKind::Super,
                last_key: AtomicI64::new(LAST_KEY_INITIAL),
                data: RwLock::new(TableData::Super {
                    schemas: SchemaHistory::new(cfg.schema().clone()),
                    tag_schema: tag_schema.clone(),
                    index: TagIndex::new(key_col),
                }),
            });
        }

        let data = match cfg.kind() {
            TableKind::Child => TableData::Child {
                super_uid: cfg.super_uid(),
                super_ref: None,
                tag_values: cfg.tag_values().cloned().unwrap_or_default(),
            },
            TableKind::Normal => TableData::Normal {
                schemas: SchemaHistory::new(cfg.schema().clone()),
            },
            TableKind::Stream => TableData::Stream {
                schemas: SchemaHistory::new(cfg.schema().clone()),
                sql: cfg
                    .sql()
                    .ok_or_else(|| MetaError::InvalidCreateMsg("missing stream sql".into()))?
                    .to_owned(),
            },
            TableKind::Super => return Err(MetaError::InvalidTableType(TableKind::Super.id())),
        };
        Ok(Table {
            uid: cfg.uid(),
            tid: cfg.tid(),
            name: cfg.name().to_owned(),
            kind: cfg.kind(),
            last_key: AtomicI64::new(LAST_KEY_INITIAL),
            data: RwLock::new(data),
        })
    }

    /// Globally unique table id.
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Dense table index; -1 for super tables.
    pub fn tid(&self) -> i32 {
        self.tid
    }

    /// Identity pair of the table.
    pub fn id(&self) -> TableId {
        TableId {
            uid: self.uid,
            tid: self.tid,
        }
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table kind.
    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Timestamp of the most recent row seen, [LAST_KEY_INITIAL] before
    /// any row arrived. Not persisted in the meta record; the row
    /// storage rebuilds it.
    pub fn last_key(&self) -> i64 {
        self.last_key.load(Ordering::Relaxed)
    }

    /// Advance `last_key` if `key` is newer.
    pub fn update_last_key(&self, key: i64) {
        self.last_key.fetch_max(key, Ordering::Relaxed);
    }

    /// Current data schema. A child inherits its super's; the result is
    /// `None` for a child not yet linked to one.
    pub fn schema(&self) -> Option<Arc<Schema>> {
        let sup = {
            match &*self.data.read() {
                TableData::Normal { schemas }
                | TableData::Super { schemas, .. }
                | TableData::Stream { schemas, .. } => return Some(schemas.latest().clone()),
                TableData::Child { super_ref, .. } => super_ref.clone(),
            }
        };
        sup.and_then(|s| s.schema())
    }

    /// Data schema with the exact `version`.
    pub fn schema_by_version(&self, version: i32) -> Result<Arc<Schema>> {
        let sup = {
            match &*self.data.read() {
                TableData::Normal { schemas }
                | TableData::Super { schemas, .. }
                | TableData::Stream { schemas, .. } => {
                    return schemas
                        .get(version)
                        .ok_or(MetaError::SchemaVersionNotFound(version))
                }
                TableData::Child { super_ref, .. } => super_ref.clone(),
            }
        };
        sup.ok_or(MetaError::SchemaVersionNotFound(version))?
            .schema_by_version(version)
    }

    /// Versions held in the in-memory history, oldest first. Empty for
    /// child tables, which keep no history of their own.
    pub fn schema_versions(&self) -> Vec<i32> {
        match &*self.data.read() {
            TableData::Normal { schemas }
            | TableData::Super { schemas, .. }
            | TableData::Stream { schemas, .. } => schemas.versions(),
            TableData::Child { .. } => Vec::new(),
        }
    }

    /// Tag schema of a super table, or of a child via its super.
    pub fn tag_schema(&self) -> Option<Arc<Schema>> {
        let sup = {
            match &*self.data.read() {
                TableData::Super { tag_schema, .. } => return Some(tag_schema.clone()),
                TableData::Child { super_ref, .. } => super_ref.clone(),
                _ => return None,
            }
        };
        sup.and_then(|s| s.tag_schema())
    }

    /// Tag value of a column on a child table. The caller names the
    /// type and width it expects; both must match the tag schema.
    pub fn tag_value(&self, col_id: i16, ty: PrimitiveType, bytes: i16) -> Option<Vec<u8>> {
        let schema = self.tag_schema()?;
        let col = schema.column_by_id(col_id)?;
        debug_assert_eq!(col.col_type, ty);
        debug_assert_eq!(col.bytes, bytes);
        let val = self.raw_tag_value(col_id)?;
        if col.col_type.is_var_len() {
            debug_assert!((val.len() as i16) < col.bytes);
        }
        Some(val)
    }

    /// Tag value bytes without consulting the tag schema. This is what
    /// the tag index compares on, so it must not reach for the super.
    pub(crate) fn raw_tag_value(&self, col_id: i16) -> Option<Vec<u8>> {
        match &*self.data.read() {
            TableData::Child { tag_values, .. } => tag_values.get(col_id).map(|v| v.to_vec()),
            _ => None,
        }
    }

    /// Current value of the designated tag column, the key this child
    /// sorts under in its super's index.
    pub fn tag_index_key(&self) -> Option<Vec<u8>> {
        let schema = self.tag_schema()?;
        let col = schema.column(DEFAULT_TAG_INDEX_COLUMN)?;
        self.raw_tag_value(col.col_id)
    }

    /// Set or replace one tag value in place. No index motion happens
    /// here; the caller reindexes when the designated column changed.
    pub fn set_tag_value(&self, col_id: i16, value: Vec<u8>) {
        if let TableData::Child { tag_values, .. } = &mut *self.data.write() {
            tag_values.set(col_id, value);
        }
    }

    /// Snapshot of a child's tag row.
    pub fn tag_row(&self) -> Option<KVRow> {
        match &*self.data.read() {
            TableData::Child { tag_values, .. } => Some(tag_values.clone()),
            _ => None,
        }
    }

    /// Uid of the super table a child was created under.
    pub fn super_uid(&self) -> Option<u64> {
        match &*self.data.read() {
            TableData::Child { super_uid, .. } => Some(*super_uid),
            _ => None,
        }
    }

    /// The super table a child is linked to, once organized.
    pub fn super_ref(&self) -> Option<Arc<Table>> {
        match &*self.data.read() {
            TableData::Child { super_ref, .. } => super_ref.clone(),
            _ => None,
        }
    }

    /// Continuous-query text of a stream table.
    pub fn sql(&self) -> Option<String> {
        match &*self.data.read() {
            TableData::Stream { sql, .. } => Some(sql.clone()),
            _ => None,
        }
    }

    pub(crate) fn set_super_ref(&self, sup: Arc<Table>) {
        if let TableData::Child { super_ref, .. } = &mut *self.data.write() {
            *super_ref = Some(sup);
        }
    }

    pub(crate) fn push_schema(&self, schema: Arc<Schema>) {
        match &mut *self.data.write() {
            TableData::Normal { schemas }
            | TableData::Super { schemas, .. }
            | TableData::Stream { schemas, .. } => schemas.push(schema),
            TableData::Child { .. } => {}
        }
    }

    pub(crate) fn set_tag_schema(&self, schema: Arc<Schema>) {
        if let TableData::Super { tag_schema, .. } = &mut *self.data.write() {
            *tag_schema = schema;
        }
    }

    /// Snapshot of the in-memory schema history, for rollback of a
    /// multi-step operation that fails after growing it.
    pub(crate) fn schema_history(&self) -> Option<SchemaHistory> {
        match &*self.data.read() {
            TableData::Normal { schemas }
            | TableData::Super { schemas, .. }
            | TableData::Stream { schemas, .. } => Some(schemas.clone()),
            TableData::Child { .. } => None,
        }
    }

    pub(crate) fn restore_schema_history(&self, history: SchemaHistory) {
        match &mut *self.data.write() {
            TableData::Normal { schemas }
            | TableData::Super { schemas, .. }
            | TableData::Stream { schemas, .. } => *schemas = history,
            TableData::Child { .. } => {}
        }
    }

    /// Put a tag column back to its prior state; `None` unsets it.
    pub(crate) fn restore_tag_value(&self, col_id: i16, prior: Option<Vec<u8>>) {
        if let TableData::Child { tag_values, .. } = &mut *self.data.write() {
            match prior {
                Some(value) => tag_values.set(col_id, value),
                None => {
                    tag_values.remove(col_id);
                }
            }
        }
    }

    pub(crate) fn index_insert(&self, child: &Arc<Table>) {
        if let TableData::Super { index, .. } = &mut *self.data.write() {
            index.insert(child);
        }
    }

    pub(crate) fn index_remove(&self, child: &Arc<Table>) -> bool {
        match &mut *self.data.write() {
            TableData::Super { index, .. } => index.remove(child),
            _ => false,
        }
    }

    /// Children of a super table, in ascending designated-tag order.
    pub fn index_children(&self) -> Vec<Arc<Table>> {
        match &*self.data.read() {
            TableData::Super { index, .. } => index.children(),
            _ => Vec::new(),
        }
    }

    /// True when a super's index carries an entry for exactly `child`.
    pub fn index_contains(&self, child: &Arc<Table>) -> bool {
        match &*self.data.read() {
            TableData::Super { index, .. } => index.contains(child),
            _ => false,
        }
    }

    /// Append the persisted form of the table to `buf`:
    /// kind, name, uid, tid, then the kind-specific payload.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        codec::put_u8(buf, self.kind.id());
        codec::put_str_i16(buf, &self.name);
        codec::put_u64(buf, self.uid);
        codec::put_i32(buf, self.tid);
        match &*self.data.read() {
            TableData::Child {
                super_uid,
                tag_values,
                ..
            } => {
                codec::put_u64(buf, *super_uid);
                tag_values.encode(buf);
            }
            TableData::Normal { schemas } => {
                schemas.encode(buf);
            }
            TableData::Super {
                schemas,
                tag_schema,
                ..
            } => {
                schemas.encode(buf);
                tag_schema.encode(buf);
            }
            TableData::Stream { schemas, sql } => {
                schemas.encode(buf);
                codec::put_str_u32(buf, sql);
            }
        }
    }

    /// Decode one persisted table record. A super comes back with an
    /// empty tag index and a child unlinked; the organize pass after
    /// restore rebuilds both.
    pub fn decode(dec: &mut Decoder) -> Result<Table> {
        let kind = TableKind::from_id(dec.u8()?).ok_or(MetaError::FileCorrupted)?;
        let name = dec.str_i16()?;
        let uid = dec.u64()?;
        let tid = dec.i32()?;
        let data = match kind {
            TableKind::Child => {
                let super_uid = dec.u64()?;
                let tag_values = KVRow::decode(dec)?;
                TableData::Child {
                    super_uid,
                    super_ref: None,
                    tag_values,
                }
            }
            TableKind::Normal => TableData::Normal {
                schemas: SchemaHistory::decode(dec)?,
            },
            TableKind::Super => {
                let schemas = SchemaHistory::decode(dec)?;
                let tag_schema = Arc::new(Schema::decode(dec)?);
                let key_col = tag_schema
                    .column(DEFAULT_TAG_INDEX_COLUMN)
                    .ok_or(MetaError::FileCorrupted)?;
                let index = TagIndex::new(key_col);
                TableData::Super {
                    schemas,
                    tag_schema,
                    index,
                }
            }
            TableKind::Stream => {
                let schemas = SchemaHistory::decode(dec)?;
                let sql = dec.str_u32()?;
                TableData::Stream { schemas, sql }
            }
        };
        Ok(Table {
            uid,
            tid,
            name,
            kind,
            last_key: AtomicI64::new(LAST_KEY_INITIAL),
            data: RwLock::new(data),
        })
    }
}

/// Equality over the persisted state: identity, name and the kind
/// payload. Index membership and `last_key` are runtime state and are
/// not compared.
impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        if self.uid != other.uid
            || self.tid != other.tid
            || self.name != other.name
            || self.kind != other.kind
        {
            return false;
        }
        let a = self.data.read();
        let b = other.data.read();
        match (&*a, &*b) {
            (TableData::Normal { schemas: sa }, TableData::Normal { schemas: sb }) => sa == sb,
            (
                TableData::Stream {
                    schemas: sa,
                    sql: qa,
                },
                TableData::Stream {
                    schemas: sb,
                    sql: qb,
                },
            ) => sa == sb && qa == qb,
            (
                TableData::Super {
                    schemas: sa,
                    tag_schema: ta,
                    ..
                },
                TableData::Super {
                    schemas: sb,
                    tag_schema: tb,
                    ..
                },
            ) => sa == sb && ta == tb,
            (
                TableData::Child {
                    super_uid: ua,
                    tag_values: va,
                    ..
                },
                TableData::Child {
                    super_uid: ub,
                    tag_values: vb,
                    ..
                },
            ) => ua == ub && va == vb,
            _ => false,
        }
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Table")
            .field("uid", &self.uid)
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        trace!(table = %self.name, uid = self.uid, "table destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::TableCfgBuilder;
    use crate::model::schema::{PrimitiveType, SchemaBuilder};
    use proptest::prelude::*;

    fn data_schema(version: i32) -> Schema {
        SchemaBuilder::new(version)
            .add_column(PrimitiveType::Timestamp, 0, 8)
            .add_column(PrimitiveType::Double, 1, 8)
            .add_column(PrimitiveType::Binary, 2, 16)
            .build()
            .unwrap()
    }

    fn tag_schema(version: i32) -> Schema {
        SchemaBuilder::new(version)
            .add_column(PrimitiveType::Int, 100, 4)
            .add_column(PrimitiveType::Binary, 101, 8)
            .build()
            .unwrap()
    }

    fn normal_cfg(uid: u64, tid: i32) -> TableCfg {
        TableCfgBuilder::new(TableKind::Normal, uid, tid)
            .unwrap()
            .name("t0")
            .unwrap()
            .schema(data_schema(1))
            .build()
            .unwrap()
    }

    fn child_cfg(uid: u64, tid: i32) -> TableCfg {
        let mut tags = KVRow::new();
        tags.set(100, 7i32.to_le_bytes().to_vec());
        TableCfgBuilder::new(TableKind::Child, uid, tid)
            .unwrap()
            .name("d0")
            .unwrap()
            .schema(data_schema(1))
            .tag_schema(tag_schema(1))
            .unwrap()
            .super_table(90, "meters")
            .unwrap()
            .tag_values(tags)
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_normal_table() {
        let t = Table::new(&normal_cfg(5, 1), false).unwrap();
        assert_eq!(t.kind(), TableKind::Normal);
        assert_eq!(t.uid(), 5);
        assert_eq!(t.tid(), 1);
        assert_eq!(t.schema().unwrap().version(), 1);
        assert_eq!(t.last_key(), LAST_KEY_INITIAL);
        assert!(t.tag_schema().is_none());
    }

    #[test]
    fn test_new_super_from_child_cfg() {
        let s = Table::new(&child_cfg(11, 1), true).unwrap();
        assert_eq!(s.kind(), TableKind::Super);
        assert_eq!(s.uid(), 90);
        assert_eq!(s.tid(), -1);
        assert_eq!(s.name(), "meters");
        assert_eq!(s.tag_schema().unwrap().version(), 1);
    }

    #[test]
    fn test_child_inherits_schema_through_super() {
        let s = Arc::new(Table::new(&child_cfg(11, 1), true).unwrap());
        let c = Arc::new(Table::new(&child_cfg(11, 1), false).unwrap());
        assert!(c.schema().is_none());
        c.set_super_ref(s.clone());
        assert_eq!(c.schema().unwrap().version(), 1);
        assert_eq!(c.tag_schema().unwrap().version(), 1);
        assert!(c.schema_versions().is_empty());
    }

    #[test]
    fn test_schema_by_version_not_found() {
        let t = Table::new(&normal_cfg(5, 1), false).unwrap();
        assert!(matches!(
            t.schema_by_version(9),
            Err(MetaError::SchemaVersionNotFound(9))
        ));
        assert_eq!(t.schema_by_version(1).unwrap().version(), 1);
    }

    #[test]
    fn test_tag_value_checks_schema() {
        let s = Arc::new(Table::new(&child_cfg(11, 1), true).unwrap());
        let c = Arc::new(Table::new(&child_cfg(11, 1), false).unwrap());
        c.set_super_ref(s);
        let val = c.tag_value(100, PrimitiveType::Int, 4).unwrap();
        assert_eq!(val, 7i32.to_le_bytes().to_vec());
        // unset tag column reads as null
        assert!(c.tag_value(101, PrimitiveType::Binary, 8).is_none());
    }

    #[test]
    fn test_update_last_key_is_monotonic() {
        let t = Table::new(&normal_cfg(5, 1), false).unwrap();
        t.update_last_key(100);
        t.update_last_key(50);
        assert_eq!(t.last_key(), 100);
    }

    fn encode_decode(t: &Table) -> Table {
        let mut buf = Vec::new();
        t.encode(&mut buf);
        let mut dec = Decoder::new(&buf);
        let decoded = Table::decode(&mut dec).unwrap();
        assert!(dec.is_empty());
        decoded
    }

    #[test]
    fn test_encode_decode_every_kind() {
        let normal = Table::new(&normal_cfg(5, 1), false).unwrap();
        assert_eq!(encode_decode(&normal), normal);

        let child = Table::new(&child_cfg(11, 2), false).unwrap();
        assert_eq!(encode_decode(&child), child);

        let sup = Table::new(&child_cfg(11, 2), true).unwrap();
        assert_eq!(encode_decode(&sup), sup);

        let stream = {
            let cfg = TableCfgBuilder::new(TableKind::Stream, 30, 3)
                .unwrap()
                .name("s0")
                .unwrap()
                .schema(data_schema(2))
                .sql("select avg(v) from t0 interval(10s)")
                .unwrap()
                .build()
                .unwrap();
            Table::new(&cfg, false).unwrap()
        };
        assert_eq!(encode_decode(&stream), stream);
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let t = Table::new(&normal_cfg(5, 1), false).unwrap();
        let mut buf = Vec::new();
        t.encode(&mut buf);
        buf[0] = 0x7F;
        assert!(matches!(
            Table::decode(&mut Decoder::new(&buf)),
            Err(MetaError::FileCorrupted)
        ));
    }

    proptest! {
        #[test]
        fn test_normal_codec_round_trip(
            uid in 1u64..u64::MAX,
            tid in 1i32..100_000,
            nversions in 1usize..4,
            ncols in 1i16..16,
        ) {
            let cfg = TableCfgBuilder::new(TableKind::Normal, uid, tid).unwrap()
                .name("rt").unwrap()
                .schema({
                    let mut b = SchemaBuilder::new(1);
                    for i in 0..ncols {
                        b = b.add_column(PrimitiveType::BigInt, i, 8);
                    }
                    b.build().unwrap()
                })
                .build().unwrap();
            let t = Table::new(&cfg, false).unwrap();
            for v in 2..=(nversions as i32) {
                let mut b = SchemaBuilder::new(v);
                for i in 0..ncols {
                    b = b.add_column(PrimitiveType::BigInt, i, 8);
                }
                t.push_schema(Arc::new(b.build().unwrap()));
            }
            let mut buf = Vec::new();
            t.encode(&mut buf);
            let decoded = Table::decode(&mut Decoder::new(&buf)).unwrap();
            prop_assert!(decoded == t);
        }
    }
}
