//! StateStore — redb-backed persistence for replscale.
//!
//! Provides typed operations over the local provider inventory and the
//! orchestrator's wakes, outbox and operation markers. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for def in [INSTANCES, TASKS, ALARMS, WAKES, OUTBOX, OPERATIONS] {
            txn.open_table(def).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON access ────────────────────────────────────────

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table.insert(key, bytes.as_slice()).map_err(map_err!(Io))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Io))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(&self, def: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Io))? {
            let (_, value) = entry.map_err(map_err!(Io))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Decode))?);
        }
        Ok(results)
    }

    fn delete_key(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Io))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Read-modify-write of a single record inside one write transaction.
    ///
    /// Returns the updated record, or `None` when the key is absent.
    fn update_json<T, F>(&self, def: JsonTable, key: &str, f: F) -> StateResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let current: Option<T> = match table.get(key).map_err(map_err!(Io))? {
                Some(guard) => Some(serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?),
                None => None,
            };
            updated = match current {
                Some(mut record) => {
                    f(&mut record);
                    let bytes = serde_json::to_vec(&record).map_err(map_err!(Encode))?;
                    table.insert(key, bytes.as_slice()).map_err(map_err!(Io))?;
                    Some(record)
                }
                None => None,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or replace an instance.
    pub fn put_instance(&self, instance: &InstanceRecord) -> StateResult<()> {
        self.put_json(INSTANCES, &instance.name, instance)?;
        debug!(name = %instance.name, status = %instance.status, "instance stored");
        Ok(())
    }

    pub fn get_instance(&self, name: &str) -> StateResult<Option<InstanceRecord>> {
        self.get_json(INSTANCES, name)
    }

    pub fn list_instances(&self) -> StateResult<Vec<InstanceRecord>> {
        self.list_json(INSTANCES)
    }

    /// Record a requested class change and mark the instance as modifying.
    pub fn request_resize(
        &self,
        arn: &str,
        class: &str,
        status: &str,
        now: u64,
    ) -> StateResult<InstanceRecord> {
        let name = self
            .list_instances()?
            .into_iter()
            .find(|i| i.arn == arn)
            .map(|i| i.name)
            .ok_or_else(|| StateError::NotFound {
                kind: "instance",
                key: arn.to_string(),
            })?;
        self.update_json(INSTANCES, &name, |record: &mut InstanceRecord| {
            record.pending_class = Some(class.to_string());
            record.status = status.to_string();
            record.updated_at = now;
        })?
        .ok_or(StateError::NotFound {
            kind: "instance",
            key: name,
        })
    }

    /// Apply any pending class change and set the instance's status.
    pub fn settle_instance(&self, name: &str, status: &str, now: u64) -> StateResult<InstanceRecord> {
        self.update_json(INSTANCES, name, |record: &mut InstanceRecord| {
            if let Some(class) = record.pending_class.take() {
                record.class = class;
            }
            record.status = status.to_string();
            record.updated_at = now;
        })?
        .ok_or_else(|| StateError::NotFound {
            kind: "instance",
            key: name.to_string(),
        })
    }

    // ── Tasks ──────────────────────────────────────────────────────

    pub fn put_task(&self, task: &TaskRecord) -> StateResult<()> {
        self.put_json(TASKS, &task.arn, task)
    }

    pub fn get_task(&self, arn: &str) -> StateResult<Option<TaskRecord>> {
        self.get_json(TASKS, arn)
    }

    /// List tasks bound to the given instance ARN.
    pub fn list_tasks_for_instance(&self, instance_arn: &str) -> StateResult<Vec<TaskRecord>> {
        Ok(self
            .list_json::<TaskRecord>(TASKS)?
            .into_iter()
            .filter(|t| t.instance_arn == instance_arn)
            .collect())
    }

    pub fn delete_task(&self, arn: &str) -> StateResult<bool> {
        self.delete_key(TASKS, arn)
    }

    // ── Alarms ─────────────────────────────────────────────────────

    /// Set an alarm's state, creating the alarm if it is unknown.
    pub fn set_alarm_state(
        &self,
        name: &str,
        state: AlarmState,
        reason: &str,
        now: u64,
    ) -> StateResult<()> {
        let record = AlarmRecord {
            name: name.to_string(),
            state,
            reason: reason.to_string(),
            updated_at: now,
        };
        self.put_json(ALARMS, name, &record)?;
        debug!(%name, ?state, "alarm state set");
        Ok(())
    }

    pub fn get_alarm(&self, name: &str) -> StateResult<Option<AlarmRecord>> {
        self.get_json(ALARMS, name)
    }

    // ── Wakes ──────────────────────────────────────────────────────

    /// Install a wake, replacing any wake with the same key.
    pub fn put_wake(&self, wake: &WakeEntry) -> StateResult<()> {
        self.put_json(WAKES, &wake.key, wake)?;
        debug!(key = %wake.key, period = wake.period_secs, "wake stored");
        Ok(())
    }

    pub fn get_wake(&self, key: &str) -> StateResult<Option<WakeEntry>> {
        self.get_json(WAKES, key)
    }

    pub fn list_wakes(&self) -> StateResult<Vec<WakeEntry>> {
        self.list_json(WAKES)
    }

    /// Delete a wake. Returns true if it existed.
    pub fn delete_wake(&self, key: &str) -> StateResult<bool> {
        let existed = self.delete_key(WAKES, key)?;
        debug!(%key, existed, "wake deleted");
        Ok(existed)
    }

    /// Stamp a wake as fired. Returns false if the wake is gone.
    pub fn mark_wake_fired(&self, key: &str, now: u64) -> StateResult<bool> {
        let updated = self.update_json(WAKES, key, |wake: &mut WakeEntry| {
            wake.last_fired_at = Some(now);
        })?;
        Ok(updated.is_some())
    }

    // ── Outbox ─────────────────────────────────────────────────────

    /// Append a notification and return its sequence number.
    pub fn append_notification(
        &self,
        topic: &str,
        subject: &str,
        body: &str,
        now: u64,
    ) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq;
        {
            let mut table = txn.open_table(OUTBOX).map_err(map_err!(Table))?;
            let last: Option<u64> = match table.last().map_err(map_err!(Io))? {
                Some((key, _)) => key.value().parse().ok(),
                None => None,
            };
            seq = last.map_or(1, |n| n + 1);
            let record = NotificationRecord {
                seq,
                topic: topic.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
                sent_at: now,
            };
            let bytes = serde_json::to_vec(&record).map_err(map_err!(Encode))?;
            let key = format!("{seq:020}");
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(map_err!(Io))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%topic, %subject, seq, "notification appended");
        Ok(seq)
    }

    /// All notifications in send order.
    pub fn list_notifications(&self) -> StateResult<Vec<NotificationRecord>> {
        self.list_json(OUTBOX)
    }

    // ── Operation markers ──────────────────────────────────────────

    /// Claim the marker for `instance`. Returns false if already held.
    ///
    /// The check and the insert happen in one write transaction, so two
    /// concurrent claims cannot both succeed.
    pub fn try_claim_operation(&self, instance: &str, now: u64) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let claimed;
        {
            let mut table = txn.open_table(OPERATIONS).map_err(map_err!(Table))?;
            let held = table.get(instance).map_err(map_err!(Io))?.is_some();
            if held {
                claimed = false;
            } else {
                let marker = OperationMarker {
                    instance: instance.to_string(),
                    claimed_at: now,
                };
                let bytes = serde_json::to_vec(&marker).map_err(map_err!(Encode))?;
                table.insert(instance, bytes.as_slice()).map_err(map_err!(Io))?;
                claimed = true;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%instance, claimed, "operation marker claim");
        Ok(claimed)
    }

    /// Release the marker for `instance`. Returns true if it was held.
    pub fn release_operation(&self, instance: &str) -> StateResult<bool> {
        self.delete_key(OPERATIONS, instance)
    }

    pub fn get_operation(&self, instance: &str) -> StateResult<Option<OperationMarker>> {
        self.get_json(OPERATIONS, instance)
    }
}
