/*!
Defines [TableCfg], the vetted table configuration every DDL operation
consumes, and [TableCfgBuilder], the validation gate that produces it
from caller input or from a wire [CreateTableMsg].
*/

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{MetaError, Result};
use crate::model::kvrow::KVRow;
use crate::model::msg::CreateTableMsg;
use crate::model::schema::{Schema, SchemaBuilder};
use crate::model::table::{TableKind, INVALID_SUPER_TABLE_ID};

/// Longest accepted table name, in bytes.
pub const TABLE_NAME_MAX_LEN: usize = 192;

lazy_static! {
    static ref NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").unwrap();
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > TABLE_NAME_MAX_LEN || !NAME.is_match(name) {
        return Err(MetaError::InvalidCreateMsg(format!(
            "invalid table name {name:?}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
/// A vetted table configuration. Only the builder can produce one, so
/// holding a `TableCfg` means the per-kind field rules already passed.
pub struct TableCfg {
    kind: TableKind,
    uid: u64,
    tid: i32,
    name: String,
    schema: Arc<Schema>,
    tag_schema: Option<Arc<Schema>>,
    super_uid: u64,
    super_name: Option<String>,
    tag_values: Option<KVRow>,
    sql: Option<String>,
}

impl TableCfg {
    /// Kind of the table being configured.
    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Unique table id.
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Dense table index.
    pub fn tid(&self) -> i32 {
        self.tid
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Data schema. For a child config this is the schema of the super
    /// table the create implicitly carries.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Tag schema of a child config.
    pub fn tag_schema(&self) -> Option<&Arc<Schema>> {
        self.tag_schema.as_ref()
    }

    /// Uid of the super table, or the invalid sentinel.
    pub fn super_uid(&self) -> u64 {
        self.super_uid
    }

    /// Name of the super table of a child config.
    pub fn super_name(&self) -> Option<&str> {
        self.super_name.as_deref()
    }

    /// Tag values of a child config.
    pub fn tag_values(&self) -> Option<&KVRow> {
        self.tag_values.as_ref()
    }

    /// Continuous-query text of a stream config.
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    /// Build a config from an encoded [CreateTableMsg], running the
    /// full validation gate on the way.
    pub fn from_create_msg(bytes: &[u8]) -> Result<TableCfg> {
        let msg = CreateTableMsg::decode(bytes)?;
        TableCfg::try_from(&msg)
    }
}

impl TryFrom<&CreateTableMsg> for TableCfg {
    type Error = MetaError;

    fn try_from(msg: &CreateTableMsg) -> Result<TableCfg> {
        let mut builder = TableCfgBuilder::new(msg.kind, msg.uid, msg.tid)?.name(&msg.name)?;

        let mut schema = SchemaBuilder::new(msg.sversion);
        for col in &msg.columns {
            schema = schema.add_column(col.col_type, col.col_id, col.bytes);
        }
        builder = builder.schema(schema.build()?);

        if !msg.tags.is_empty() {
            let mut tags = SchemaBuilder::new(msg.tversion);
            for col in &msg.tags {
                tags = tags.add_column(col.col_type, col.col_id, col.bytes);
            }
            builder = builder
                .tag_schema(tags.build()?)?
                .super_table(msg.super_uid, &msg.super_name)?;
            if !msg.tag_values.is_empty() {
                builder = builder.tag_values(msg.tag_values.clone())?;
            }
        }

        if msg.kind == TableKind::Stream {
            builder = builder.sql(&msg.sql)?;
        }

        builder.build()
    }
}

#[derive(Debug)]
/// Step-wise validation gate for [TableCfg]. Each setter refuses fields
/// the configured kind does not own.
pub struct TableCfgBuilder {
    kind: TableKind,
    uid: u64,
    tid: i32,
    name: Option<String>,
    schema: Option<Arc<Schema>>,
    tag_schema: Option<Arc<Schema>>,
    super_uid: u64,
    super_name: Option<String>,
    tag_values: Option<KVRow>,
    sql: Option<String>,
}

impl TableCfgBuilder {
    /// Start a config for the given kind and identity. Super tables are
    /// never created directly; a child create carries its super.
    pub fn new(kind: TableKind, uid: u64, tid: i32) -> Result<TableCfgBuilder> {
        if kind == TableKind::Super {
            return Err(MetaError::InvalidTableType(kind.id()));
        }
        if tid < 1 {
            return Err(MetaError::InvalidCreateMsg(format!(
                "tid {tid} out of range, slot 0 is reserved"
            )));
        }
        Ok(TableCfgBuilder {
            kind,
            uid,
            tid,
            name: None,
            schema: None,
            tag_schema: None,
            super_uid: INVALID_SUPER_TABLE_ID,
            super_name: None,
            tag_values: None,
            sql: None,
        })
    }

    /// Set the table name.
    pub fn name(mut self, name: &str) -> Result<TableCfgBuilder> {
        check_name(name)?;
        self.name = Some(name.to_owned());
        Ok(self)
    }

    /// Set the data schema.
    pub fn schema(mut self, schema: Schema) -> TableCfgBuilder {
        self.schema = Some(Arc::new(schema));
        self
    }

    /// Set the tag schema. Only child configs carry one.
    pub fn tag_schema(mut self, schema: Schema) -> Result<TableCfgBuilder> {
        if self.kind != TableKind::Child {
            return Err(MetaError::InvalidCreateMsg(
                "tag schema on a non-child table".into(),
            ));
        }
        self.tag_schema = Some(Arc::new(schema));
        Ok(self)
    }

    /// Name the super table a child belongs to.
    pub fn super_table(mut self, uid: u64, name: &str) -> Result<TableCfgBuilder> {
        if self.kind != TableKind::Child {
            return Err(MetaError::InvalidCreateMsg(
                "super table on a non-child table".into(),
            ));
        }
        if uid == INVALID_SUPER_TABLE_ID {
            return Err(MetaError::InvalidCreateMsg("invalid super table uid".into()));
        }
        check_name(name)?;
        self.super_uid = uid;
        self.super_name = Some(name.to_owned());
        Ok(self)
    }

    /// Set the tag values of a child.
    pub fn tag_values(mut self, values: KVRow) -> Result<TableCfgBuilder> {
        if self.kind != TableKind::Child {
            return Err(MetaError::InvalidCreateMsg(
                "tag values on a non-child table".into(),
            ));
        }
        self.tag_values = Some(values);
        Ok(self)
    }

    /// Set the continuous-query text of a stream table.
    pub fn sql(mut self, sql: &str) -> Result<TableCfgBuilder> {
        if self.kind != TableKind::Stream {
            return Err(MetaError::InvalidCreateMsg(
                "sql on a non-stream table".into(),
            ));
        }
        self.sql = Some(sql.to_owned());
        Ok(self)
    }

    /// Finish validation and hand out the config.
    pub fn build(self) -> Result<TableCfg> {
        let name = self
            .name
            .ok_or_else(|| MetaError::InvalidCreateMsg("missing table name".into()))?;
        let schema = self
            .schema
            .ok_or_else(|| MetaError::InvalidCreateMsg("missing data schema".into()))?;
        if self.kind == TableKind::Child {
            if self.tag_schema.is_none() {
                return Err(MetaError::InvalidCreateMsg(
                    "child table without a tag schema".into(),
                ));
            }
            if self.super_name.is_none() {
                return Err(MetaError::InvalidCreateMsg(
                    "child table without a super table".into(),
                ));
            }
        }
        if self.kind == TableKind::Stream && self.sql.is_none() {
            return Err(MetaError::InvalidCreateMsg("stream table without sql".into()));
        }
        Ok(TableCfg {
            kind: self.kind,
            uid: self.uid,
            tid: self.tid,
            name,
            schema,
            tag_schema: self.tag_schema,
            super_uid: self.super_uid,
            super_name: self.super_name,
            tag_values: self.tag_values,
            sql: self.sql,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema::PrimitiveType;

    fn schema(version: i32) -> Schema {
        SchemaBuilder::new(version)
            .add_column(PrimitiveType::Timestamp, 0, 8)
            .add_column(PrimitiveType::Int, 1, 4)
            .build()
            .unwrap()
    }

    #[test]
    fn test_super_kind_is_rejected() {
        assert!(matches!(
            TableCfgBuilder::new(TableKind::Super, 1, 1),
            Err(MetaError::InvalidTableType(_))
        ));
    }

    #[test]
    fn test_tid_zero_is_rejected() {
        assert!(matches!(
            TableCfgBuilder::new(TableKind::Normal, 1, 0),
            Err(MetaError::InvalidCreateMsg(_))
        ));
    }

    #[test]
    fn test_tag_schema_on_normal_is_rejected() {
        let res = TableCfgBuilder::new(TableKind::Normal, 1, 1)
            .unwrap()
            .tag_schema(schema(1));
        assert!(matches!(res, Err(MetaError::InvalidCreateMsg(_))));
    }

    #[test]
    fn test_sql_on_normal_is_rejected() {
        let res = TableCfgBuilder::new(TableKind::Normal, 1, 1)
            .unwrap()
            .sql("select 1");
        assert!(matches!(res, Err(MetaError::InvalidCreateMsg(_))));
    }

    #[test]
    fn test_bad_names_are_rejected() {
        let b = TableCfgBuilder::new(TableKind::Normal, 1, 1).unwrap();
        assert!(b.name("").is_err());
        let b = TableCfgBuilder::new(TableKind::Normal, 1, 1).unwrap();
        assert!(b.name("1st").is_err());
        let b = TableCfgBuilder::new(TableKind::Normal, 1, 1).unwrap();
        assert!(b.name("dev;drop").is_err());
        let b = TableCfgBuilder::new(TableKind::Normal, 1, 1).unwrap();
        assert!(b.name(&"x".repeat(TABLE_NAME_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn test_child_requires_tag_schema_and_super() {
        let res = TableCfgBuilder::new(TableKind::Child, 1, 1)
            .unwrap()
            .name("d0")
            .unwrap()
            .schema(schema(1))
            .build();
        assert!(matches!(res, Err(MetaError::InvalidCreateMsg(_))));
    }

    #[test]
    fn test_invalid_super_uid_is_rejected() {
        let res = TableCfgBuilder::new(TableKind::Child, 1, 1)
            .unwrap()
            .super_table(INVALID_SUPER_TABLE_ID, "meters");
        assert!(matches!(res, Err(MetaError::InvalidCreateMsg(_))));
    }

    #[test]
    fn test_from_create_msg_round_trip() {
        let mut tag_values = KVRow::new();
        tag_values.set(100, 5i32.to_le_bytes().to_vec());
        let msg = CreateTableMsg {
            kind: TableKind::Child,
            name: "d1".into(),
            uid: 21,
            tid: 3,
            sversion: 2,
            tversion: 4,
            columns: vec![
                crate::model::schema::ColumnSchema {
                    col_id: 0,
                    col_type: PrimitiveType::Timestamp,
                    bytes: 8,
                },
                crate::model::schema::ColumnSchema {
                    col_id: 1,
                    col_type: PrimitiveType::Double,
                    bytes: 8,
                },
            ],
            tags: vec![crate::model::schema::ColumnSchema {
                col_id: 100,
                col_type: PrimitiveType::Int,
                bytes: 4,
            }],
            super_name: "meters".into(),
            super_uid: 20,
            tag_values: tag_values.clone(),
            sql: String::new(),
        };
        let cfg = TableCfg::from_create_msg(&msg.encode()).unwrap();
        assert_eq!(cfg.kind(), TableKind::Child);
        assert_eq!(cfg.uid(), 21);
        assert_eq!(cfg.tid(), 3);
        assert_eq!(cfg.schema().version(), 2);
        assert_eq!(cfg.tag_schema().unwrap().version(), 4);
        assert_eq!(cfg.super_uid(), 20);
        assert_eq!(cfg.super_name(), Some("meters"));
        assert_eq!(cfg.tag_values(), Some(&tag_values));
    }
}
