/*!
Defines [Repo], the handle one storage shard's DDL goes through, and
[RepoConfig], its configuration. Every operation resolves the target
under the meta write lock, applies its edits, and appends the matching
action records before the lock is released, so the log order always
equals the in-memory commit order.
*/

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::action::{Action, ActionSink};
use crate::error::{MetaError, Result};
use crate::index::DEFAULT_TAG_INDEX_COLUMN;
use crate::meta::{Meta, MetaState};
use crate::model::config::TableCfg;
use crate::model::msg::UpdateTagValMsg;
use crate::model::schema::{Schema, SchemaHistory};
use crate::model::table::{Table, TableId, TableKind, INVALID_SUPER_TABLE_ID};
use crate::store::KvStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Configuration of one repo.
pub struct RepoConfig {
    /// Id of the shard, carried in every log line.
    pub tsdb_id: i32,
    /// Upper bound on dense table slots; slot 0 stays reserved.
    pub max_tables: u32,
    /// Directory the shard keeps its files under.
    pub root_dir: PathBuf,
}

impl RepoConfig {
    /// Check the configuration before a repo is built from it.
    pub fn validate(&self) -> Result<()> {
        if self.max_tables < 2 {
            return Err(MetaError::InvalidConfig(format!(
                "max_tables {} leaves no usable slot, slot 0 is reserved",
                self.max_tables
            )));
        }
        if self.root_dir.as_os_str().is_empty() {
            return Err(MetaError::InvalidConfig("root_dir is empty".into()));
        }
        Ok(())
    }

    /// Path of the meta store file inside the repo directory.
    pub fn meta_file_path(&self) -> PathBuf {
        self.root_dir.join("meta")
    }

    /// Parse a configuration from its JSON form.
    pub fn from_json(json: &str) -> Result<RepoConfig> {
        let config: RepoConfig = serde_json::from_str(json)
            .map_err(|e| MetaError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Callbacks the engine borrows from the surrounding runtime.
pub trait MetaHooks: Send + Sync {
    /// Fetch a fresh encoded create message for the table at `tid`,
    /// used to refresh a stale tag schema during a tag update.
    fn config_fetch(&self, tsdb_id: i32, tid: i32) -> Result<Vec<u8>>;

    /// Tear the continuous-query state of a stream table down.
    fn cq_drop(&self, uid: u64, sql: &str);
}

/// Hooks for a runtime without a coordinator or stream handler.
pub struct NoopHooks;

impl MetaHooks for NoopHooks {
    fn config_fetch(&self, _tsdb_id: i32, _tid: i32) -> Result<Vec<u8>> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "no config provider attached",
        )
        .into())
    }

    fn cq_drop(&self, _uid: u64, _sql: &str) {}
}

/// Schema state of a table captured before a multi-step operation that
/// may still fail, so the growth can be put back on the error path.
struct SchemaRollback {
    table: Arc<Table>,
    schemas: Option<SchemaHistory>,
    tag_schema: Option<Arc<Schema>>,
}

impl SchemaRollback {
    fn capture(table: &Arc<Table>) -> SchemaRollback {
        SchemaRollback {
            table: table.clone(),
            schemas: table.schema_history(),
            tag_schema: table.tag_schema(),
        }
    }

    fn revert(&self, state: &mut MetaState) {
        if let Some(history) = &self.schemas {
            self.table.restore_schema_history(history.clone());
        }
        if let Some(tags) = &self.tag_schema {
            self.table.set_tag_schema(tags.clone());
        }
        state.rescan_maxima();
    }
}

/// One storage shard's metadata engine.
pub struct Repo {
    config: RepoConfig,
    meta: Meta,
    sink: Arc<dyn ActionSink>,
    hooks: Arc<dyn MetaHooks>,
}

impl Repo {
    /// Build a repo over an empty catalog.
    pub fn new(
        config: RepoConfig,
        sink: Arc<dyn ActionSink>,
        hooks: Arc<dyn MetaHooks>,
    ) -> Result<Repo> {
        config.validate()?;
        let meta = Meta::new(config.max_tables);
        Ok(Repo {
            config,
            meta,
            sink,
            hooks,
        })
    }

    /// The repo configuration.
    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// The catalog.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Rebuild the catalog from the persistent store: replay every
    /// record through [Meta::restore_record], then run the organize
    /// pass that links children into their supers' tag indexes.
    pub fn open(&self, store: &dyn KvStore) -> Result<()> {
        store.replay(&mut |cont| self.meta.restore_record(cont).map(|_| ()))?;
        self.meta.organize()?;
        trace!(tsdb_id = self.config.tsdb_id, "meta opened");
        Ok(())
    }

    /// Create a table from a vetted config. A child create whose super
    /// is not registered yet materializes the super from the same
    /// config; one whose super exists may grow that super's schemas to
    /// the versions the config carries. One action record is appended
    /// per newly added table, in one batch.
    pub fn create_table(&self, cfg: &TableCfg) -> Result<()> {
        let mut state = self.meta.write();

        if let Some(existing) = state.uid_map.get(&cfg.uid()) {
            error!(
                tsdb_id = self.config.tsdb_id,
                table = %existing.name(),
                tid = existing.tid(),
                uid = existing.uid(),
                "table already exists"
            );
            return Err(MetaError::TableAlreadyExists {
                name: existing.name().to_owned(),
                tid: existing.tid(),
                uid: existing.uid(),
            });
        }

        let mut actions = Vec::new();
        let mut new_super: Option<Arc<Table>> = None;
        let mut rollback: Option<SchemaRollback> = None;
        if cfg.kind() == TableKind::Child {
            match state.uid_map.get(&cfg.super_uid()).cloned() {
                None => new_super = Some(Arc::new(Table::new(cfg, true)?)),
                Some(sup) => {
                    if sup.kind() != TableKind::Super {
                        return Err(MetaError::InvalidTableType(sup.kind().id()));
                    }
                    // the child create carries its super's schemas; let
                    // them advance the registered super if newer, with
                    // the prior state held for the error paths below
                    rollback = Some(SchemaRollback::capture(&sup));
                    self.update_table_in(&mut state, &sup, cfg, &mut actions)?;
                }
            }
        }

        let table = Arc::new(Table::new(cfg, false)?);
        if let Some(sup) = &new_super {
            state.add_table(sup.clone(), true)?;
            actions.push(Action::update_meta(sup));
        }
        if let Err(e) = state.add_table(table.clone(), true) {
            if let Some(sup) = &new_super {
                state.remove_table(sup, true);
            }
            if let Some(rb) = &rollback {
                rb.revert(&mut state);
            }
            return Err(e);
        }
        actions.push(Action::update_meta(&table));

        if let Err(e) = self.sink.append(actions) {
            // the log did not take the records, undo the registration
            state.remove_table(&table, true);
            if let Some(sup) = &new_super {
                state.remove_table(sup, true);
            }
            if let Some(rb) = &rollback {
                rb.revert(&mut state);
            }
            return Err(e);
        }

        debug!(
            tsdb_id = self.config.tsdb_id,
            table = %table.name(),
            tid = table.tid(),
            uid = table.uid(),
            kind = %table.kind(),
            "table created"
        );
        Ok(())
    }

    /// Drop a table by id. Dropping a super cascades over its children
    /// first; every removed table gets one `DropMeta` record, children
    /// before the super.
    pub fn drop_table(&self, id: TableId) -> Result<()> {
        let mut state = self.meta.write();

        let table = match state.uid_map.get(&id.uid).cloned() {
            Some(t) => t,
            None => {
                error!(
                    tsdb_id = self.config.tsdb_id,
                    tid = id.tid,
                    uid = id.uid,
                    "failed to drop table since it does not exist"
                );
                return Err(MetaError::InvalidTableId {
                    tid: id.tid,
                    uid: id.uid,
                });
            }
        };

        trace!(
            tsdb_id = self.config.tsdb_id,
            table = %table.name(),
            kind = %table.kind(),
            "try to drop table"
        );

        let children = if table.kind() == TableKind::Super {
            table.index_children()
        } else {
            Vec::new()
        };

        let mut actions = Vec::new();
        for child in &children {
            debug_assert_eq!(child.kind(), TableKind::Child);
            actions.push(Action::drop_meta(child.uid()));
        }
        actions.push(Action::drop_meta(table.uid()));
        // nothing is unregistered until the log took the records, so a
        // failed append leaves the catalog exactly as it was
        self.sink.append(actions)?;

        if table.kind() == TableKind::Stream {
            if let Some(sql) = table.sql() {
                self.hooks.cq_drop(table.uid(), &sql);
            }
        }

        // the whole index goes away with the super, so the children
        // are not unspliced one by one
        for child in &children {
            state.remove_table(child, false);
        }
        state.remove_table(&table, true);

        debug!(
            tsdb_id = self.config.tsdb_id,
            table = %table.name(),
            tid = table.tid(),
            uid = table.uid(),
            "table dropped"
        );
        Ok(())
    }

    /// Grow a normal, stream or super table to the schema versions a
    /// config carries. Newer data schemas append to the history; a
    /// newer tag schema replaces the live one wholesale. One
    /// `UpdateMeta` record is appended when anything actually changed.
    pub fn update_table(&self, table: &Arc<Table>, cfg: &TableCfg) -> Result<()> {
        let mut state = self.meta.write();
        self.update_table_locked(&mut state, table, cfg)
    }

    /// Update under an already-held write lock, putting the prior
    /// schemas back when the log refuses the record.
    fn update_table_locked(
        &self,
        state: &mut MetaState,
        table: &Arc<Table>,
        cfg: &TableCfg,
    ) -> Result<()> {
        let rollback = SchemaRollback::capture(table);
        let mut actions = Vec::new();
        self.update_table_in(state, table, cfg, &mut actions)?;
        if actions.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.sink.append(actions) {
            rollback.revert(state);
            return Err(e);
        }
        Ok(())
    }

    fn update_table_in(
        &self,
        state: &mut MetaState,
        table: &Arc<Table>,
        cfg: &TableCfg,
        actions: &mut Vec<Action>,
    ) -> Result<()> {
        if table.kind() == TableKind::Child {
            return Err(MetaError::InvalidAction {
                table: table.name().to_owned(),
            });
        }

        let mut changed = false;
        if table.kind() == TableKind::Super {
            if let (Some(new_tags), Some(cur_tags)) = (cfg.tag_schema(), table.tag_schema()) {
                if new_tags.version() > cur_tags.version() {
                    // tag schema is a single-version live projection,
                    // no history is retained in memory
                    table.set_tag_schema(new_tags.clone());
                    trace!(
                        tsdb_id = self.config.tsdb_id,
                        table = %table.name(),
                        version = new_tags.version(),
                        "tag schema replaced"
                    );
                    changed = true;
                }
            }
        }

        if let Some(cur) = table.schema() {
            if cfg.schema().version() > cur.version() {
                table.push_schema(cfg.schema().clone());
                state.note_schema(cfg.schema());
                trace!(
                    tsdb_id = self.config.tsdb_id,
                    table = %table.name(),
                    version = cfg.schema().version(),
                    "schema advanced"
                );
                changed = true;
            }
        }

        if changed {
            actions.push(Action::update_meta(table));
        }
        Ok(())
    }

    /// Update one tag value of a child table. When the client is ahead
    /// of the server's tag schema, a fresh create message is fetched
    /// through the hooks and the super is grown first; when the client
    /// is behind, the update is refused. Touching the designated tag
    /// column unsplices the child from its super's index around the
    /// mutation.
    pub fn update_tag_value(&self, msg: &UpdateTagValMsg) -> Result<()> {
        let mut state = self.meta.write();

        let table = state
            .uid_map
            .get(&msg.uid)
            .cloned()
            .ok_or(MetaError::InvalidTableId {
                tid: msg.tid,
                uid: msg.uid,
            })?;
        if table.tid() != msg.tid {
            return Err(MetaError::InvalidTableId {
                tid: msg.tid,
                uid: msg.uid,
            });
        }
        if table.kind() != TableKind::Child {
            error!(
                tsdb_id = self.config.tsdb_id,
                table = %table.name(),
                kind = %table.kind(),
                "failed to update tag value on a table of this kind"
            );
            return Err(MetaError::InvalidAction {
                table: table.name().to_owned(),
            });
        }

        let super_uid = table.super_uid().unwrap_or(INVALID_SUPER_TABLE_ID);
        let mut tag_schema = table
            .tag_schema()
            .ok_or(MetaError::MissingSuperTable(super_uid))?;

        if tag_schema.version() < msg.tag_version {
            trace!(
                tsdb_id = self.config.tsdb_id,
                server = tag_schema.version(),
                client = msg.tag_version,
                "server tag schema is older than the client's, refreshing"
            );
            let fetched = self.hooks.config_fetch(self.config.tsdb_id, msg.tid)?;
            let fresh = TableCfg::from_create_msg(&fetched)?;
            let sup = state
                .uid_map
                .get(&fresh.super_uid())
                .cloned()
                .ok_or(MetaError::MissingSuperTable(fresh.super_uid()))?;
            // the refresh commits on its own, so a failure further down
            // cannot strand the grown super outside the log
            self.update_table_locked(&mut state, &sup, &fresh)?;
            tag_schema = table
                .tag_schema()
                .ok_or(MetaError::MissingSuperTable(super_uid))?;
        }

        if tag_schema.version() > msg.tag_version {
            error!(
                tsdb_id = self.config.tsdb_id,
                table = %table.name(),
                client = msg.tag_version,
                server = tag_schema.version(),
                "tag version out of date"
            );
            return Err(MetaError::TagVersionOutOfDate {
                client: msg.tag_version,
                server: tag_schema.version(),
            });
        }

        if let Some(col) = tag_schema.column_by_id(msg.col_id) {
            debug_assert_eq!(col.col_type, msg.col_type);
        }

        let reindex = tag_schema
            .column(DEFAULT_TAG_INDEX_COLUMN)
            .is_some_and(|c| c.col_id == msg.col_id);
        let prior = table.raw_tag_value(msg.col_id);
        if reindex {
            state.remove_from_index(&table);
        }
        table.set_tag_value(msg.col_id, msg.value.clone());
        if reindex {
            if let Some(sup) = table.super_ref() {
                sup.index_insert(&table);
            }
        }

        if let Err(e) = self.sink.append(vec![Action::update_meta(&table)]) {
            // put the old value back through the same reindex motions
            if reindex {
                state.remove_from_index(&table);
            }
            table.restore_tag_value(msg.col_id, prior);
            if reindex {
                if let Some(sup) = table.super_ref() {
                    sup.index_insert(&table);
                }
            }
            return Err(e);
        }

        debug!(
            tsdb_id = self.config.tsdb_id,
            table = %table.name(),
            col_id = msg.col_id,
            reindex,
            "tag value updated"
        );
        Ok(())
    }
}
