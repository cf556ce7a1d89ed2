/*!
The persistence seam of the catalog. The engine itself never does file
IO: it consumes a [KvStore] that holds one sealed record per live
table, keyed by uid, and replays those records through the restore
callback when the meta is opened. [apply_actions] is the committer-side
glue that folds a drained action batch into the store.
*/

use std::collections::HashMap;

use tracing::debug;

use crate::action::{Action, ActionKind};
use crate::error::Result;

/// A durable map of table uid to sealed meta record. Replay order is
/// first-insert order, which matches the order tables first entered
/// the action log.
pub trait KvStore {
    /// Insert or replace the record of a table.
    fn put(&mut self, uid: u64, cont: Vec<u8>);

    /// Drop the record of a table.
    fn delete(&mut self, uid: u64);

    /// Number of records held.
    fn len(&self) -> usize;

    /// True when the store holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feed every record to `restore` in replay order. Stops at the
    /// first error and hands it back to the caller.
    fn replay(&self, restore: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()>;
}

/// In-memory [KvStore]. Stands in for the checksummed store file when
/// the surrounding runtime has not supplied one, and in tests.
#[derive(Default)]
pub struct MemKvStore {
    order: Vec<u64>,
    records: HashMap<u64, Vec<u8>>,
}

impl MemKvStore {
    /// An empty store.
    pub fn new() -> Self {
        MemKvStore::default()
    }
}

impl KvStore for MemKvStore {
    fn put(&mut self, uid: u64, cont: Vec<u8>) {
        if self.records.insert(uid, cont).is_none() {
            self.order.push(uid);
        }
    }

    fn delete(&mut self, uid: u64) {
        if self.records.remove(&uid).is_some() {
            self.order.retain(|u| *u != uid);
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn replay(&self, restore: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()> {
        for uid in &self.order {
            restore(&self.records[uid])?;
        }
        Ok(())
    }
}

/// Fold a committed action batch into the store: `UpdateMeta` replaces
/// the record under its uid, `DropMeta` removes it.
pub fn apply_actions(store: &mut dyn KvStore, actions: &[Action]) {
    for action in actions {
        match action.kind {
            ActionKind::UpdateMeta => {
                if let Some(cont) = &action.cont {
                    store.put(action.uid, cont.clone());
                }
            }
            ActionKind::DropMeta => store.delete(action.uid),
        }
    }
    debug!(
        applied = actions.len(),
        records = store.len(),
        "meta actions committed to store"
    );
}
