/*!
Action records of the metadata write-ahead log. Every committed DDL
appends one record per affected table while the meta write lock is
held, so the log order equals the in-memory commit order. An
`UpdateMeta` record carries the full encoded table sealed with a CRC32
over the body; a `DropMeta` record is the bare header.
*/

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;

use crate::codec;
use crate::error::{MetaError, Result};
use crate::model::table::Table;

/// Width of the checksum trailing every record body.
pub const CHECKSUM_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What a log record does to the table it names.
pub enum ActionKind {
    /// The table was created or its schema advanced; the record body is
    /// the full encoded table.
    UpdateMeta,
    /// The table was dropped; the record has no body.
    DropMeta,
}

impl ActionKind {
    /// Wire id of the action.
    pub fn id(&self) -> u8 {
        match self {
            ActionKind::UpdateMeta => 1,
            ActionKind::DropMeta => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// One record of the action log: the act header plus, for
/// [ActionKind::UpdateMeta], the checksummed content.
pub struct Action {
    /// What the record does.
    pub kind: ActionKind,
    /// Uid of the table the record is about.
    pub uid: u64,
    /// Sealed body (encoded table followed by its checksum), present
    /// only for [ActionKind::UpdateMeta].
    pub cont: Option<Vec<u8>>,
}

impl Action {
    /// Record the current persisted state of `table`.
    pub fn update_meta(table: &Table) -> Action {
        let mut body = Vec::new();
        table.encode(&mut body);
        Action {
            kind: ActionKind::UpdateMeta,
            uid: table.uid(),
            cont: Some(append_checksum(body)),
        }
    }

    /// Record the drop of the table with `uid`.
    pub fn drop_meta(uid: u64) -> Action {
        Action {
            kind: ActionKind::DropMeta,
            uid,
            cont: None,
        }
    }
}

/// Seal a record body by appending the CRC32 of its bytes.
pub fn append_checksum(mut body: Vec<u8>) -> Vec<u8> {
    let sum = crc32fast::hash(&body);
    codec::put_u32(&mut body, sum);
    body
}

/// Check a sealed record and hand back the body it protects.
pub fn strip_checksum(cont: &[u8]) -> Result<&[u8]> {
    if cont.len() < CHECKSUM_LEN {
        return Err(MetaError::FileCorrupted);
    }
    let (body, tail) = cont.split_at(cont.len() - CHECKSUM_LEN);
    if crc32fast::hash(body) != LittleEndian::read_u32(tail) {
        return Err(MetaError::FileCorrupted);
    }
    Ok(body)
}

/// Append-only sink the engine writes committed actions into. A batch
/// is all-or-nothing: crash recovery observes every record of the batch
/// or none of them.
pub trait ActionSink: Send + Sync {
    /// Append a batch of records in order.
    fn append(&self, actions: Vec<Action>) -> Result<()>;
}

/// In-memory action list, the arena the background committer drains.
#[derive(Default)]
pub struct MemActionLog {
    list: Mutex<Vec<Action>>,
}

impl MemActionLog {
    /// An empty log.
    pub fn new() -> Self {
        MemActionLog::default()
    }

    /// Number of records appended so far.
    pub fn len(&self) -> usize {
        self.list.lock().len()
    }

    /// True when nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.list.lock().is_empty()
    }

    /// Snapshot of the appended records, in log order.
    pub fn actions(&self) -> Vec<Action> {
        self.list.lock().clone()
    }

    /// Hand the records over to the committer and clear the log.
    pub fn drain(&self) -> Vec<Action> {
        std::mem::take(&mut *self.list.lock())
    }
}

impl ActionSink for MemActionLog {
    fn append(&self, actions: Vec<Action>) -> Result<()> {
        self.list.lock().extend(actions);
        Ok(())
    }
}
