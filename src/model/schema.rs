/*!
A table schema is a versioned, ordered list of column descriptors.
Schemas are immutable once built; a newer version supersedes older ones
and the per-table history keeps at most [SCHEMA_HISTORY_MAX] of them in
memory (spilled versions stay recoverable from the on-disk action log).
*/

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::codec::{self, Decoder};
use crate::error::{MetaError, Result};

/// Upper bound on in-memory schema versions kept per table. The oldest
/// version is evicted when a newer one arrives at the cap.
pub const SCHEMA_HISTORY_MAX: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Primitive column types carried on the wire.
pub enum PrimitiveType {
    /// True or false, one byte.
    Bool,
    /// 8-bit signed integer.
    TinyInt,
    /// 16-bit signed integer.
    SmallInt,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    BigInt,
    /// 32-bit IEEE 754 floating point.
    Float,
    /// 64-bit IEEE 754 floating point.
    Double,
    /// Variable-length byte sequence.
    Binary,
    /// Millisecond epoch timestamp, 64-bit.
    Timestamp,
    /// Variable-length unicode text.
    NChar,
}

impl PrimitiveType {
    /// Wire id of the type.
    pub fn id(&self) -> u8 {
        match self {
            PrimitiveType::Bool => 1,
            PrimitiveType::TinyInt => 2,
            PrimitiveType::SmallInt => 3,
            PrimitiveType::Int => 4,
            PrimitiveType::BigInt => 5,
            PrimitiveType::Float => 6,
            PrimitiveType::Double => 7,
            PrimitiveType::Binary => 8,
            PrimitiveType::Timestamp => 9,
            PrimitiveType::NChar => 10,
        }
    }

    /// Decode a wire id back into a type.
    pub fn from_id(id: u8) -> Option<PrimitiveType> {
        match id {
            1 => Some(PrimitiveType::Bool),
            2 => Some(PrimitiveType::TinyInt),
            3 => Some(PrimitiveType::SmallInt),
            4 => Some(PrimitiveType::Int),
            5 => Some(PrimitiveType::BigInt),
            6 => Some(PrimitiveType::Float),
            7 => Some(PrimitiveType::Double),
            8 => Some(PrimitiveType::Binary),
            9 => Some(PrimitiveType::Timestamp),
            10 => Some(PrimitiveType::NChar),
            _ => None,
        }
    }

    /// True for types whose values carry their own length.
    pub fn is_var_len(&self) -> bool {
        matches!(self, PrimitiveType::Binary | PrimitiveType::NChar)
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PrimitiveType::Bool => write!(f, "bool"),
            PrimitiveType::TinyInt => write!(f, "tinyint"),
            PrimitiveType::SmallInt => write!(f, "smallint"),
            PrimitiveType::Int => write!(f, "int"),
            PrimitiveType::BigInt => write!(f, "bigint"),
            PrimitiveType::Float => write!(f, "float"),
            PrimitiveType::Double => write!(f, "double"),
            PrimitiveType::Binary => write!(f, "binary"),
            PrimitiveType::Timestamp => write!(f, "timestamp"),
            PrimitiveType::NChar => write!(f, "nchar"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// One column descriptor inside a schema.
pub struct ColumnSchema {
    /// Column id, unique inside the schema and stable across versions.
    pub col_id: i16,
    /// Primitive type of the column.
    pub col_type: PrimitiveType,
    /// Byte width of a value; for variable types the maximum width.
    pub bytes: i16,
}

impl ColumnSchema {
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        codec::put_i16(buf, self.col_id);
        codec::put_u8(buf, self.col_type.id());
        codec::put_i16(buf, self.bytes);
    }

    pub(crate) fn decode(dec: &mut Decoder) -> Result<ColumnSchema> {
        let col_id = dec.i16()?;
        let col_type = PrimitiveType::from_id(dec.u8()?).ok_or(MetaError::FileCorrupted)?;
        let bytes = dec.i16()?;
        Ok(ColumnSchema {
            col_id,
            col_type,
            bytes,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// An immutable, versioned set of column descriptors. Structural
/// equality; ordering inside a history goes by `version` alone.
pub struct Schema {
    version: i32,
    columns: Vec<ColumnSchema>,
}

impl Schema {
    /// Schema version.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    /// All column descriptors in declaration order.
    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    /// Column at a position.
    pub fn column(&self, idx: usize) -> Option<&ColumnSchema> {
        self.columns.get(idx)
    }

    /// Column with the given id. Column ids are strictly ascending, so
    /// this is a binary search.
    pub fn column_by_id(&self, col_id: i16) -> Option<&ColumnSchema> {
        self.columns
            .binary_search_by_key(&col_id, |c| c.col_id)
            .ok()
            .map(|i| &self.columns[i])
    }

    /// Maximum encoded row width for this schema.
    pub fn row_bytes(&self) -> i32 {
        self.columns.iter().map(|c| c.bytes as i32).sum()
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        codec::put_i32(buf, self.version);
        codec::put_i16(buf, self.columns.len() as i16);
        for col in &self.columns {
            col.encode(buf);
        }
    }

    pub(crate) fn decode(dec: &mut Decoder) -> Result<Schema> {
        let version = dec.i32()?;
        let ncols = dec.i16()?;
        if ncols < 0 {
            return Err(MetaError::FileCorrupted);
        }
        let mut columns = Vec::with_capacity(ncols as usize);
        for _ in 0..ncols {
            columns.push(ColumnSchema::decode(dec)?);
        }
        Ok(Schema { version, columns })
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "v{}[{}]",
            self.version,
            self.columns
                .iter()
                .map(|c| format!("{}:{}({})", c.col_id, c.col_type, c.bytes))
                .join(", ")
        )
    }
}

/// Accumulates columns for one schema version.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    version: i32,
    columns: Vec<ColumnSchema>,
}

impl SchemaBuilder {
    /// Start a builder for the given version.
    pub fn new(version: i32) -> Self {
        SchemaBuilder {
            version,
            columns: Vec::new(),
        }
    }

    /// Append a column descriptor.
    pub fn add_column(mut self, col_type: PrimitiveType, col_id: i16, bytes: i16) -> Self {
        self.columns.push(ColumnSchema {
            col_id,
            col_type,
            bytes,
        });
        self
    }

    /// Finish the schema. Column ids must be strictly ascending and at
    /// least one column must be present.
    pub fn build(self) -> Result<Schema> {
        if self.columns.is_empty() {
            return Err(MetaError::InvalidCreateMsg("schema has no columns".into()));
        }
        for pair in self.columns.windows(2) {
            if pair[1].col_id <= pair[0].col_id {
                return Err(MetaError::InvalidCreateMsg(format!(
                    "column ids out of order: {} after {}",
                    pair[1].col_id, pair[0].col_id
                )));
            }
        }
        Ok(Schema {
            version: self.version,
            columns: self.columns,
        })
    }
}

/// Bounded, version-ordered run of schemas for one table. The newest
/// entry is the current schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaHistory {
    entries: Vec<Arc<Schema>>,
}

impl SchemaHistory {
    /// Start a history with its first schema.
    pub fn new(first: Arc<Schema>) -> Self {
        SchemaHistory {
            entries: vec![first],
        }
    }

    /// The current (newest) schema.
    pub fn latest(&self) -> &Arc<Schema> {
        self.entries.last().expect("history is never empty")
    }

    /// Number of versions held in memory.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// A history always holds at least one schema.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Look up a schema by exact version.
    pub fn get(&self, version: i32) -> Option<Arc<Schema>> {
        self.entries
            .binary_search_by_key(&version, |s| s.version())
            .ok()
            .map(|i| self.entries[i].clone())
    }

    /// All held versions, oldest first.
    pub fn versions(&self) -> Vec<i32> {
        self.entries.iter().map(|s| s.version()).collect()
    }

    /// Append a newer schema. At the cap the oldest version is evicted
    /// silently; a later lookup of the evicted version fails even though
    /// the on-disk log still carries it.
    pub fn push(&mut self, schema: Arc<Schema>) {
        debug_assert!(schema.version() > self.latest().version());
        if self.entries.len() == SCHEMA_HISTORY_MAX {
            self.entries.remove(0);
        }
        self.entries.push(schema);
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        codec::put_u8(buf, self.entries.len() as u8);
        for schema in &self.entries {
            schema.encode(buf);
        }
    }

    pub(crate) fn decode(dec: &mut Decoder) -> Result<SchemaHistory> {
        let n = dec.u8()?;
        if n == 0 || n as usize > SCHEMA_HISTORY_MAX {
            return Err(MetaError::FileCorrupted);
        }
        let mut entries = Vec::with_capacity(n as usize);
        for _ in 0..n {
            entries.push(Arc::new(Schema::decode(dec)?));
        }
        // versions must come back strictly ascending
        for pair in entries.windows(2) {
            if pair[1].version() <= pair[0].version() {
                return Err(MetaError::FileCorrupted);
            }
        }
        Ok(SchemaHistory { entries })
    }
}
