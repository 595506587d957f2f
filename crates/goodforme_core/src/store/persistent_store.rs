//! SQLite-backed `PersistentStore` with a single pending write context.
//!
//! # Responsibility
//! - Generic create/fetch/save/delete over any `Persistable` type.
//! - Atomic `commit` of every pending change in one SQLite transaction.
//! - Commit listener registry used by change observers.
//!
//! # Invariants
//! - Pending changes survive a failed commit untouched.
//! - A value without `StorageId` is matched to committed state by its
//!   `LogicalId`, so one logical value never yields two records.
//! - Listeners see committed state only.

use crate::config::{StoreConfig, StoreLocation};
use crate::db::{open_db_in_memory, open_db_with_timeout, DbError};
use crate::model::ids::{LogicalId, StorageId};
use crate::store::persistable::{mapping_violation, MappingError, MappingErrorKind, Persistable};
use crate::store::record::{FieldMap, FieldValue, Record};
use crate::store::schema::{FamilySchema, SchemaRegistry};
use crate::store::{StoreError, StoreResult};
use log::{debug, error, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

const RECORD_SELECT_SQL: &str = "SELECT
    storage_id,
    logical_id,
    fields_json
FROM records";

/// Identifier of a registered commit listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Receives committed-state notifications for one family.
///
/// Listeners run inside the store's write context; they may read through the
/// `&PersistentStore` they are given but cannot mutate it.
pub trait CommitListener: Send {
    fn family(&self) -> &'static str;

    /// Called after a successful commit that touched `family()`.
    fn committed(&mut self, store: &PersistentStore, report: &CommitReport);

    /// Called when previous observations can no longer be reconciled
    /// (store reopened) or a full reload was requested.
    fn reset(&mut self, store: &PersistentStore);
}

/// What one successful commit changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub created: Vec<(LogicalId, StorageId)>,
    pub updated: Vec<StorageId>,
    pub deleted: Vec<StorageId>,
    pub families: BTreeSet<&'static str>,
}

impl CommitReport {
    /// True for the no-op commit of an empty write context.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// StorageId assigned to the record created for `logical_id`, if any.
    pub fn storage_id_for(&self, logical_id: &LogicalId) -> Option<StorageId> {
        self.created
            .iter()
            .find(|(created, _)| created == logical_id)
            .map(|(_, storage_id)| *storage_id)
    }

    pub fn touches(&self, family: &str) -> bool {
        self.families.contains(family)
    }
}

#[derive(Debug, Default)]
struct WriteContext {
    inserts: Vec<Record>,
    updates: BTreeMap<StorageId, Record>,
    deletes: BTreeMap<StorageId, &'static str>,
}

impl WriteContext {
    fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }
}

struct ListenerSlot {
    id: ListenerId,
    listener: Box<dyn CommitListener>,
}

/// Persistence gateway owning the SQLite connection and write context.
pub struct PersistentStore {
    config: StoreConfig,
    conn: Connection,
    schemas: SchemaRegistry,
    pending: WriteContext,
    listeners: Vec<ListenerSlot>,
    next_listener_id: u64,
}

impl PersistentStore {
    /// Opens the backing engine. Failure here is fatal for the session.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let conn = connect(&config)?;
        info!(
            "event=store_open module=store status=ok mode={}",
            config.mode()
        );
        Ok(Self {
            config,
            conn,
            schemas: SchemaRegistry::default(),
            pending: WriteContext::default(),
            listeners: Vec::new(),
            next_listener_id: 1,
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(StoreConfig::in_memory())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Raw connection access for diagnostics and schema checks.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Allocates a new, not-yet-durable record for `T`'s family.
    ///
    /// The record is detached: nothing is queued until a value built from it
    /// is passed to [`PersistentStore::save`].
    pub fn create<T: Persistable>(&self) -> Record {
        let record = Record::blank(T::schema(), LogicalId::generate());
        debug!(
            "event=record_create module=store status=ok family={} logical_id={}",
            record.family(),
            record.logical_id()
        );
        record
    }

    /// Fetches every committed value of `T`, ordered by storage id.
    ///
    /// Soft read path: failures are logged and yield an empty list.
    pub fn fetch_all<T: Persistable>(&self) -> Vec<T> {
        match self.try_fetch_all::<T>() {
            Ok(values) => values,
            Err(err) => {
                error!(
                    "event=store_fetch module=store status=error family={} error_code={} error={}",
                    T::schema().family,
                    err.code(),
                    err
                );
                Vec::new()
            }
        }
    }

    /// Fallible form of [`PersistentStore::fetch_all`].
    pub fn try_fetch_all<T: Persistable>(&self) -> StoreResult<Vec<T>> {
        let schema = T::schema();
        schema.validate()?;
        let records = self.query_records(schema)?;
        records
            .iter()
            .map(|record| {
                T::from_record(record).map_err(|err| StoreError::Mapping(mapping_violation(err)))
            })
            .collect()
    }

    /// Reads one committed value by logical id.
    pub fn fetch_by_logical_id<T: Persistable>(
        &self,
        logical_id: &LogicalId,
    ) -> StoreResult<Option<T>> {
        let schema = T::schema();
        schema.validate()?;
        match self.committed_by_logical_id(schema, logical_id)? {
            Some(record) => T::from_record(&record)
                .map(Some)
                .map_err(|err| StoreError::Mapping(mapping_violation(err))),
            None => Ok(None),
        }
    }

    /// Queues `value` for persistence.
    ///
    /// With a `StorageId`, the existing record is loaded and every mapped field
    /// overwritten. Without one, a committed record with the same `LogicalId`
    /// is updated if it exists; otherwise a new record is queued. The new
    /// `StorageId` becomes visible only after [`PersistentStore::commit`].
    pub fn save<T: Persistable>(&mut self, value: &T) -> StoreResult<()> {
        let schema = T::schema();
        self.schemas.ensure(schema)?;

        let current = match value.storage_id() {
            Some(storage_id) => Some(self.load_record(schema, storage_id)?.ok_or_else(|| {
                StoreError::RecordNotFound {
                    family: schema.family,
                    id: storage_id.to_string(),
                }
            })?),
            None => match self.pending_by_logical_id(value.logical_id()) {
                Some(record) => Some(record),
                None => self.committed_by_logical_id(schema, value.logical_id())?,
            },
        };

        match current {
            Some(existing) => self.queue_update(value, existing),
            None => self.queue_insert(value),
        }
    }

    /// Marks the record behind `value` for removal; no-op without `StorageId`.
    pub fn delete<T: Persistable>(&mut self, value: &T) -> StoreResult<()> {
        let Some(storage_id) = value.storage_id() else {
            debug!(
                "event=record_delete module=store status=skipped family={} reason=not_persisted",
                T::schema().family
            );
            return Ok(());
        };

        let schema = T::schema();
        self.schemas.ensure(schema)?;
        if self.pending.deletes.contains_key(&storage_id) {
            return Ok(());
        }
        if self.load_record(schema, storage_id)?.is_none() {
            return Err(StoreError::RecordNotFound {
                family: schema.family,
                id: storage_id.to_string(),
            });
        }

        self.pending.updates.remove(&storage_id);
        self.pending.deletes.insert(storage_id, schema.family);
        debug!(
            "event=record_delete module=store status=queued family={} storage_id={}",
            schema.family, storage_id
        );
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drops every pending change without touching the database.
    pub fn discard_pending(&mut self) {
        let dropped = self.pending.len();
        self.pending = WriteContext::default();
        if dropped > 0 {
            info!("event=store_discard module=store status=ok dropped={dropped}");
        }
    }

    /// Flushes all pending changes atomically.
    ///
    /// No-op when nothing is pending. On failure the transaction is rolled
    /// back, the pending set is kept, and `StoreError::Commit` is returned.
    pub fn commit(&mut self) -> StoreResult<CommitReport> {
        if self.pending.is_empty() {
            return Ok(CommitReport::default());
        }

        let started_at = Instant::now();
        let report = match self.write_pending() {
            Ok(report) => report,
            Err(err) => {
                error!(
                    "event=store_commit module=store status=error duration_ms={} pending={} error_code={} retryable={} error={}",
                    started_at.elapsed().as_millis(),
                    self.pending.len(),
                    err.code(),
                    err.is_retryable(),
                    err
                );
                return Err(err);
            }
        };
        self.pending = WriteContext::default();

        info!(
            "event=store_commit module=store status=ok duration_ms={} created={} updated={} deleted={}",
            started_at.elapsed().as_millis(),
            report.created.len(),
            report.updated.len(),
            report.deleted.len()
        );

        self.notify(|listener, store| {
            if report.touches(listener.family()) {
                listener.committed(store, &report);
            }
        });
        Ok(report)
    }

    /// Re-establishes the connection and resets every listener.
    ///
    /// Pending changes are discarded. An in-memory store comes back empty.
    pub fn reopen(&mut self) -> StoreResult<()> {
        self.conn = connect(&self.config)?;
        self.discard_pending();
        info!(
            "event=store_reopen module=store status=ok mode={} listeners={}",
            self.config.mode(),
            self.listeners.len()
        );
        self.notify(|listener, store| listener.reset(store));
        Ok(())
    }

    pub fn add_listener(&mut self, listener: Box<dyn CommitListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        debug!(
            "event=listener_add module=store status=ok family={} listener_id={}",
            listener.family(),
            id.0
        );
        self.listeners.push(ListenerSlot { id, listener });
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|slot| slot.id != id);
        before != self.listeners.len()
    }

    /// Asks one listener to rebuild its observation from committed state.
    pub fn reload_listener(&mut self, id: ListenerId) -> bool {
        let mut listeners = std::mem::take(&mut self.listeners);
        let found = match listeners.iter_mut().find(|slot| slot.id == id) {
            Some(slot) => {
                run_listener(slot, self, |listener, store| listener.reset(store));
                true
            }
            None => false,
        };
        self.restore_listeners(listeners);
        found
    }

    /// Drops every listener; used on session teardown.
    pub fn clear_listeners(&mut self) -> usize {
        let count = self.listeners.len();
        self.listeners.clear();
        count
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn notify(&mut self, mut visit: impl FnMut(&mut Box<dyn CommitListener>, &PersistentStore)) {
        let mut listeners = std::mem::take(&mut self.listeners);
        for slot in &mut listeners {
            run_listener(slot, self, &mut visit);
        }
        self.restore_listeners(listeners);
    }

    fn restore_listeners(&mut self, mut listeners: Vec<ListenerSlot>) {
        if !self.listeners.is_empty() {
            warn!("event=listener_restore module=store status=merged");
            listeners.append(&mut self.listeners);
        }
        self.listeners = listeners;
    }

    fn queue_insert<T: Persistable>(&mut self, value: &T) -> StoreResult<()> {
        let schema = T::schema();
        let draft = Record::blank(schema, value.logical_id().clone());
        let applied = value.apply_to(draft.clone());
        check_applied(&draft, &applied)?;

        match self
            .pending
            .inserts
            .iter_mut()
            .find(|pending| pending.logical_id() == value.logical_id())
        {
            Some(slot) => *slot = applied,
            None => self.pending.inserts.push(applied),
        }
        debug!(
            "event=record_save module=store status=queued op=insert family={} logical_id={}",
            schema.family,
            value.logical_id()
        );
        Ok(())
    }

    fn queue_update<T: Persistable>(&mut self, value: &T, existing: Record) -> StoreResult<()> {
        if existing.logical_id() != value.logical_id() {
            let err = MappingError::new(
                existing.family(),
                "logical_id",
                MappingErrorKind::Invalid(format!(
                    "value `{}` does not own record `{}`",
                    value.logical_id(),
                    existing.logical_id()
                )),
            );
            return Err(mapping_violation(err).into());
        }

        let Some(storage_id) = existing.storage_id() else {
            // pending insert matched by logical id
            return self.queue_insert(value);
        };

        let applied = value.apply_to(existing.clone());
        check_applied(&existing, &applied)?;
        if applied == existing {
            debug!(
                "event=record_save module=store status=skipped op=update family={} storage_id={} reason=unchanged",
                existing.family(),
                storage_id
            );
            return Ok(());
        }

        self.pending.updates.insert(storage_id, applied);
        debug!(
            "event=record_save module=store status=queued op=update family={} storage_id={}",
            existing.family(),
            storage_id
        );
        Ok(())
    }

    fn pending_by_logical_id(&self, logical_id: &LogicalId) -> Option<Record> {
        self.pending
            .updates
            .values()
            .chain(self.pending.inserts.iter())
            .find(|record| record.logical_id() == logical_id)
            .cloned()
    }

    /// Effective record for `storage_id`: pending state first, then database.
    fn load_record(
        &self,
        schema: &'static FamilySchema,
        storage_id: StorageId,
    ) -> StoreResult<Option<Record>> {
        if self.pending.deletes.contains_key(&storage_id) {
            return Ok(None);
        }
        if let Some(record) = self.pending.updates.get(&storage_id) {
            return Ok(Some(record.clone()));
        }

        let mut stmt = self
            .conn
            .prepare(&format!(
                "{RECORD_SELECT_SQL} WHERE family = ?1 AND storage_id = ?2;"
            ))
            .map_err(read_error)?;
        let row = stmt
            .query_row(params![schema.family, storage_id.raw()], raw_record_row)
            .optional()
            .map_err(read_error)?;
        row.map(|raw| raw.into_record(schema)).transpose()
    }

    fn committed_by_logical_id(
        &self,
        schema: &'static FamilySchema,
        logical_id: &LogicalId,
    ) -> StoreResult<Option<Record>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{RECORD_SELECT_SQL} WHERE family = ?1 AND logical_id = ?2;"
            ))
            .map_err(read_error)?;
        let row = stmt
            .query_row(params![schema.family, logical_id.as_str()], raw_record_row)
            .optional()
            .map_err(read_error)?;
        match row {
            Some(raw) => {
                let record = raw.into_record(schema)?;
                let deleted = record
                    .storage_id()
                    .is_some_and(|id| self.pending.deletes.contains_key(&id));
                Ok(if deleted { None } else { Some(record) })
            }
            None => Ok(None),
        }
    }

    fn query_records(&self, schema: &'static FamilySchema) -> StoreResult<Vec<Record>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{RECORD_SELECT_SQL} WHERE family = ?1 ORDER BY storage_id ASC;"
            ))
            .map_err(read_error)?;
        let rows = stmt
            .query_map([schema.family], raw_record_row)
            .map_err(read_error)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(read_error)?.into_record(schema)?);
        }
        Ok(records)
    }

    fn write_pending(&mut self) -> StoreResult<CommitReport> {
        let mut report = CommitReport::default();
        let tx = self.conn.transaction().map_err(commit_error)?;

        for (storage_id, family) in &self.pending.deletes {
            tx.execute(
                "DELETE FROM records WHERE storage_id = ?1 AND family = ?2;",
                params![storage_id.raw(), *family],
            )
            .map_err(commit_error)?;
            report.deleted.push(*storage_id);
            report.families.insert(*family);
        }

        for (storage_id, record) in &self.pending.updates {
            let changed = tx
                .execute(
                    "UPDATE records
                     SET
                        fields_json = ?1,
                        updated_at = (strftime('%s', 'now') * 1000)
                     WHERE storage_id = ?2 AND family = ?3;",
                    params![encode_fields(record)?, storage_id.raw(), record.family()],
                )
                .map_err(commit_error)?;
            if changed == 0 {
                return Err(StoreError::RecordNotFound {
                    family: record.family(),
                    id: storage_id.to_string(),
                });
            }
            report.updated.push(*storage_id);
            report.families.insert(record.family());
        }

        for record in &self.pending.inserts {
            tx.execute(
                "INSERT INTO records (family, logical_id, fields_json) VALUES (?1, ?2, ?3);",
                params![
                    record.family(),
                    record.logical_id().as_str(),
                    encode_fields(record)?
                ],
            )
            .map_err(commit_error)?;
            let storage_id = StorageId::from_raw(tx.last_insert_rowid());
            report
                .created
                .push((record.logical_id().clone(), storage_id));
            report.families.insert(record.family());
        }

        tx.commit().map_err(commit_error)?;
        Ok(report)
    }
}

/// Runs one listener callback; a panic is logged and contained so the
/// listener list always goes back into the store.
fn run_listener(
    slot: &mut ListenerSlot,
    store: &PersistentStore,
    visit: impl FnOnce(&mut Box<dyn CommitListener>, &PersistentStore),
) {
    let listener = &mut slot.listener;
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| visit(listener, store))) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(
            "event=listener_notify module=store status=panicked listener_id={} family={} payload={}",
            slot.id.0,
            slot.listener.family(),
            message.replace(['\n', '\r'], " ")
        );
    }
}

struct RawRecordRow {
    storage_id: i64,
    logical_id: String,
    fields_json: String,
}

impl RawRecordRow {
    fn into_record(self, schema: &'static FamilySchema) -> StoreResult<Record> {
        let fields: FieldMap = serde_json::from_str(&self.fields_json).map_err(|err| {
            let mapping = MappingError::new(
                schema.family,
                "fields_json",
                MappingErrorKind::Invalid(format!(
                    "undecodable fields for storage_id {}: {err}",
                    self.storage_id
                )),
            );
            StoreError::Mapping(mapping_violation(mapping))
        })?;
        Ok(Record::from_parts(
            StorageId::from_raw(self.storage_id),
            LogicalId::from(self.logical_id),
            schema,
            fields,
        ))
    }
}

fn raw_record_row(row: &Row<'_>) -> rusqlite::Result<RawRecordRow> {
    Ok(RawRecordRow {
        storage_id: row.get("storage_id")?,
        logical_id: row.get("logical_id")?,
        fields_json: row.get("fields_json")?,
    })
}

fn connect(config: &StoreConfig) -> StoreResult<Connection> {
    let opened = match &config.location {
        StoreLocation::File(path) => open_db_with_timeout(path, config.busy_timeout),
        StoreLocation::Memory => open_db_in_memory(),
    };
    opened.map_err(StoreError::Open)
}

/// `apply_to` output must keep identity and match the declared field list.
fn check_applied(before: &Record, after: &Record) -> StoreResult<()> {
    if after.storage_id() != before.storage_id()
        || after.logical_id() != before.logical_id()
        || after.family() != before.family()
    {
        let err = MappingError::new(
            before.family(),
            "storage_id",
            MappingErrorKind::Invalid("apply_to replaced the record identity".to_string()),
        );
        return Err(mapping_violation(err).into());
    }
    after
        .validate()
        .map_err(|err| StoreError::Mapping(mapping_violation(err)))?;
    reject_non_finite(after)
}

/// Non-finite reals have no JSON encoding; writing one would leave the whole
/// family unreadable. This is bad input, not a broken mapping, so no panic.
fn reject_non_finite(record: &Record) -> StoreResult<()> {
    let Some((field, value)) = record.fields().iter().find_map(|(name, value)| match value {
        FieldValue::Real(real) if !real.is_finite() => Some((name.as_str(), *real)),
        _ => None,
    }) else {
        return Ok(());
    };
    warn!(
        "event=record_save module=store status=rejected family={} field={} reason=non_finite_real",
        record.family(),
        field
    );
    Err(StoreError::Mapping(MappingError::new(
        record.family(),
        field,
        MappingErrorKind::Invalid(format!("real value {value} is not finite")),
    )))
}

fn encode_fields(record: &Record) -> StoreResult<String> {
    serde_json::to_string(record.fields()).map_err(StoreError::Encoding)
}

fn read_error(err: rusqlite::Error) -> StoreError {
    StoreError::Read(DbError::Sqlite(err))
}

fn commit_error(err: rusqlite::Error) -> StoreError {
    StoreError::Commit(DbError::Sqlite(err))
}
