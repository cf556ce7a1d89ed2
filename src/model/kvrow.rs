/*!
Defines [KVRow], the sparse column-id keyed tuple used for child table
tag values.
*/

use serde::{Deserialize, Serialize};

use crate::codec::{self, Decoder};
use crate::error::{MetaError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One column value inside a [KVRow].
pub struct KVEntry {
    /// Column id the value belongs to.
    pub col_id: i16,
    /// Raw value bytes, encoded per the column type.
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Sparse column-id to value tuple, kept sorted by column id. A column
/// missing from the row reads as null.
pub struct KVRow {
    cols: Vec<KVEntry>,
}

impl KVRow {
    /// An empty row.
    pub fn new() -> Self {
        KVRow::default()
    }

    /// Number of columns with a value.
    pub fn len(&self) -> usize {
        self.cols.len()
    }

    /// True when no column has a value.
    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    /// Value bytes of a column, or `None` when the column is unset.
    pub fn get(&self, col_id: i16) -> Option<&[u8]> {
        self.cols
            .binary_search_by_key(&col_id, |e| e.col_id)
            .ok()
            .map(|i| self.cols[i].value.as_slice())
    }

    /// Set or replace the value of a column, keeping the id order.
    pub fn set(&mut self, col_id: i16, value: Vec<u8>) {
        match self.cols.binary_search_by_key(&col_id, |e| e.col_id) {
            Ok(i) => self.cols[i].value = value,
            Err(i) => self.cols.insert(i, KVEntry { col_id, value }),
        }
    }

    /// Clear the value of a column, handing back the removed bytes.
    pub fn remove(&mut self, col_id: i16) -> Option<Vec<u8>> {
        match self.cols.binary_search_by_key(&col_id, |e| e.col_id) {
            Ok(i) => Some(self.cols.remove(i).value),
            Err(_) => None,
        }
    }

    /// Iterate the set columns in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &KVEntry> {
        self.cols.iter()
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        codec::put_i16(buf, self.cols.len() as i16);
        for entry in &self.cols {
            codec::put_i16(buf, entry.col_id);
            codec::put_bytes_i32(buf, &entry.value);
        }
    }

    pub(crate) fn decode(dec: &mut Decoder) -> Result<KVRow> {
        let ncols = dec.i16()?;
        if ncols < 0 {
            return Err(MetaError::FileCorrupted);
        }
        let mut cols = Vec::with_capacity(ncols as usize);
        for _ in 0..ncols {
            let col_id = dec.i16()?;
            let value = dec.bytes_i32()?;
            cols.push(KVEntry { col_id, value });
        }
        // ids must come back sorted, the encoder wrote them that way
        for pair in cols.windows(2) {
            if pair[1].col_id <= pair[0].col_id {
                return Err(MetaError::FileCorrupted);
            }
        }
        Ok(KVRow { cols })
    }
}
