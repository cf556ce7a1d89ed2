/*!
Wire messages the engine consumes from the surrounding runtime: the
create-table message delivered by the transport (and served back by
`config_fetch` during tag-schema refresh), and the tag-value update.
*/

use crate::codec::{self, Decoder};
use crate::error::{MetaError, Result};
use crate::model::kvrow::KVRow;
use crate::model::schema::{ColumnSchema, PrimitiveType};
use crate::model::table::{TableKind, INVALID_SUPER_TABLE_ID};

#[derive(Debug, Clone, PartialEq)]
/// A create-table request as it arrives off the wire. Carries the data
/// column set, and for child tables the tag column set, the tag values
/// and the identity of the super table the child belongs to.
pub struct CreateTableMsg {
    /// Kind of the table to create.
    pub kind: TableKind,
    /// Name of the table.
    pub name: String,
    /// Unique table id assigned by the coordinator.
    pub uid: u64,
    /// Dense table index assigned by the coordinator.
    pub tid: i32,
    /// Version of the data schema carried in `columns`.
    pub sversion: i32,
    /// Version of the tag schema carried in `tags`.
    pub tversion: i32,
    /// Data column descriptors.
    pub columns: Vec<ColumnSchema>,
    /// Tag column descriptors; empty for tables without tags.
    pub tags: Vec<ColumnSchema>,
    /// Name of the super table; empty when `tags` is empty.
    pub super_name: String,
    /// Uid of the super table; the invalid sentinel when `tags` is empty.
    pub super_uid: u64,
    /// Tag values of the child, keyed by tag column id.
    pub tag_values: KVRow,
    /// Continuous-query text; empty unless the kind is Stream.
    pub sql: String,
}

impl CreateTableMsg {
    /// Encode the message for the wire.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::put_u8(&mut buf, self.kind.id());
        codec::put_str_i16(&mut buf, &self.name);
        codec::put_u64(&mut buf, self.uid);
        codec::put_i32(&mut buf, self.tid);
        codec::put_i32(&mut buf, self.sversion);
        codec::put_i32(&mut buf, self.tversion);
        codec::put_i16(&mut buf, self.columns.len() as i16);
        for col in &self.columns {
            col.encode(&mut buf);
        }
        codec::put_i16(&mut buf, self.tags.len() as i16);
        for col in &self.tags {
            col.encode(&mut buf);
        }
        if !self.tags.is_empty() {
            codec::put_str_i16(&mut buf, &self.super_name);
            codec::put_u64(&mut buf, self.super_uid);
            self.tag_values.encode(&mut buf);
        }
        if self.kind == TableKind::Stream {
            codec::put_str_u32(&mut buf, &self.sql);
        }
        buf
    }

    /// Decode a message from the wire. A malformed buffer is an
    /// [MetaError::InvalidCreateMsg], not a file corruption.
    pub fn decode(bytes: &[u8]) -> Result<CreateTableMsg> {
        let mut dec = Decoder::new(bytes);
        Self::decode_body(&mut dec)
            .map_err(|_| MetaError::InvalidCreateMsg("truncated or malformed message".into()))
    }

    fn decode_body(dec: &mut Decoder) -> Result<CreateTableMsg> {
        let kind = TableKind::from_id(dec.u8()?).ok_or(MetaError::FileCorrupted)?;
        let name = dec.str_i16()?;
        let uid = dec.u64()?;
        let tid = dec.i32()?;
        let sversion = dec.i32()?;
        let tversion = dec.i32()?;
        let columns = Self::decode_columns(dec)?;
        let tags = Self::decode_columns(dec)?;
        let (super_name, super_uid, tag_values) = if tags.is_empty() {
            (String::new(), INVALID_SUPER_TABLE_ID, KVRow::new())
        } else {
            (dec.str_i16()?, dec.u64()?, KVRow::decode(dec)?)
        };
        let sql = if kind == TableKind::Stream {
            dec.str_u32()?
        } else {
            String::new()
        };
        Ok(CreateTableMsg {
            kind,
            name,
            uid,
            tid,
            sversion,
            tversion,
            columns,
            tags,
            super_name,
            super_uid,
            tag_values,
            sql,
        })
    }

    fn decode_columns(dec: &mut Decoder) -> Result<Vec<ColumnSchema>> {
        let n = dec.i16()?;
        if n < 0 {
            return Err(MetaError::FileCorrupted);
        }
        let mut cols = Vec::with_capacity(n as usize);
        for _ in 0..n {
            cols.push(ColumnSchema::decode(dec)?);
        }
        Ok(cols)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A tag-value update for one column of a child table.
pub struct UpdateTagValMsg {
    /// Unique id of the child table.
    pub uid: u64,
    /// Dense index of the child table; must match the resolved table.
    pub tid: i32,
    /// Tag schema version the client built the update against.
    pub tag_version: i32,
    /// Tag column being updated.
    pub col_id: i16,
    /// Type of the tag column, as the client sees it.
    pub col_type: PrimitiveType,
    /// New value bytes for the column.
    pub value: Vec<u8>,
}
