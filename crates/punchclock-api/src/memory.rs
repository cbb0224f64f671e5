//! Hosted backend kept entirely in process memory.
//!
//! Implements both the data and the channel side, so a write made through
//! the facade comes back as a change notification on every open channel
//! whose table and filter match. Used by tests and by offline runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use punchclock_realtime::channel::{
    ChannelHandle, ChannelMessage, ChannelSpec, ChannelState, OpenChannel, RealtimeBackend,
    RealtimeError,
};
use punchclock_types::events::{ChangeNotification, ChangeOp};
use punchclock_types::ids::new_id;
use punchclock_types::tables::Table;

use crate::backend::{BackendError, Filter, HostedBackend, merge_patch, row_id};

#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<HashMap<Table, Vec<Value>>>,
    channels: Mutex<HashMap<ChannelHandle, OpenSpec>>,
    /// Every call fails, channels included.
    offline: AtomicBool,
    /// Writes fail, reads still work.
    reject_writes: AtomicBool,
    /// Writes to these tables fail.
    rejected_tables: Mutex<HashSet<Table>>,
}

struct OpenSpec {
    spec: ChannelSpec,
    tx: mpsc::UnboundedSender<ChannelMessage>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put rows in place without notifying anyone.
    pub fn seed(&self, table: Table, rows: Vec<Value>) {
        lock(&self.tables).entry(table).or_default().extend(rows);
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        lock(&self.tables).get(&table).cloned().unwrap_or_default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn reject_writes_to(&self, table: Table, reject: bool) {
        let mut rejected = lock(&self.rejected_tables);
        if reject {
            rejected.insert(table);
        } else {
            rejected.remove(&table);
        }
    }

    pub fn open_channel_count(&self) -> usize {
        lock(&self.channels).len()
    }

    /// Report `state` on every open channel and forget them, as a dropped
    /// connection would.
    pub fn drop_channels(&self, state: ChannelState) {
        for (_, open) in lock(&self.channels).drain() {
            let _ = open.tx.send(ChannelMessage::State(state));
        }
    }

    /// Push a change to matching channels as if another client made it.
    pub fn emit(&self, change: ChangeNotification) {
        let Some(table) = Table::from_name(&change.table) else {
            return;
        };
        let subject = change.subject().clone();
        let mut channels = lock(&self.channels);
        channels.retain(|_, open| {
            if open.spec.table != table || !spec_matches(&open.spec, &subject) {
                return true;
            }
            open.tx.send(ChannelMessage::Change(change.clone())).is_ok()
        });
    }

    fn check_online(&self) -> Result<(), BackendError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend offline".into()));
        }
        Ok(())
    }

    fn check_writable(&self, table: Table) -> Result<(), BackendError> {
        self.check_online()?;
        if self.reject_writes.load(Ordering::SeqCst) || lock(&self.rejected_tables).contains(&table) {
            return Err(BackendError::Rejected {
                status: 503,
                message: "writes rejected".into(),
            });
        }
        Ok(())
    }
}

fn spec_matches(spec: &ChannelSpec, row: &Value) -> bool {
    match &spec.filter {
        Some((column, value)) => Filter::eq(column.clone(), value.clone()).matches(row),
        None => true,
    }
}

#[async_trait]
impl HostedBackend for MemoryBackend {
    async fn fetch_all(&self, table: Table, filter: &Filter) -> Result<Vec<Value>, BackendError> {
        self.check_online()?;
        Ok(lock(&self.tables)
            .get(&table)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, table: Table, mut row: Value) -> Result<Value, BackendError> {
        self.check_writable(table)?;
        if row_id(&row).is_none() {
            if let Some(fields) = row.as_object_mut() {
                fields.insert("id".into(), Value::String(new_id()));
            }
        }
        lock(&self.tables).entry(table).or_default().push(row.clone());

        debug!("Memory backend: insert into {}", table);
        self.emit(ChangeNotification::new(ChangeOp::Insert, table.name(), row.clone()));
        Ok(row)
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value, BackendError> {
        self.check_writable(table)?;
        let (old, new) = {
            let mut tables = lock(&self.tables);
            let row = tables
                .get_mut(&table)
                .and_then(|rows| rows.iter_mut().find(|r| row_id(r).as_deref() == Some(id)))
                .ok_or_else(|| BackendError::NotFound(format!("{}/{}", table, id)))?;
            let old = row.clone();
            merge_patch(row, &patch);
            (old, row.clone())
        };

        debug!("Memory backend: update {}/{}", table, id);
        let mut change = ChangeNotification::new(ChangeOp::Update, table.name(), new.clone());
        change.old_record = old;
        self.emit(change);
        Ok(new)
    }

    async fn delete(&self, table: Table, id: &str) -> Result<(), BackendError> {
        self.check_writable(table)?;
        let removed = {
            let mut tables = lock(&self.tables);
            let rows = tables.entry(table).or_default();
            let pos = rows
                .iter()
                .position(|r| row_id(r).as_deref() == Some(id))
                .ok_or_else(|| BackendError::NotFound(format!("{}/{}", table, id)))?;
            rows.remove(pos)
        };

        debug!("Memory backend: delete {}/{}", table, id);
        let mut change = ChangeNotification::new(ChangeOp::Delete, table.name(), Value::Null);
        change.old_record = removed;
        self.emit(change);
        Ok(())
    }
}

#[async_trait]
impl RealtimeBackend for MemoryBackend {
    async fn open_channel(&self, spec: &ChannelSpec) -> Result<OpenChannel, RealtimeError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RealtimeError::Open {
                channel: spec.name.clone(),
                reason: "backend offline".into(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ChannelHandle::new();
        let _ = tx.send(ChannelMessage::State(ChannelState::Subscribed));
        lock(&self.channels).insert(
            handle,
            OpenSpec {
                spec: spec.clone(),
                tx,
            },
        );
        Ok(OpenChannel {
            handle,
            messages: rx,
        })
    }

    async fn close_channel(&self, handle: ChannelHandle) {
        lock(&self.channels).remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use punchclock_realtime::channel::ChannelScope;
    use serde_json::json;

    #[tokio::test]
    async fn writes_notify_matching_channels_only() {
        let backend = MemoryBackend::new();
        let mut seven = backend
            .open_channel(&ChannelSpec::for_scope(&ChannelScope::User("7".into())))
            .await
            .unwrap();
        let mut all = backend
            .open_channel(&ChannelSpec::for_scope(&ChannelScope::All))
            .await
            .unwrap();

        backend
            .insert(Table::SalaryRecords, json!({"id": "r1", "user_id": 9}))
            .await
            .unwrap();
        backend
            .insert(Table::TimeEntries, json!({"id": "t1", "user_id": 7}))
            .await
            .unwrap();

        assert!(matches!(
            seven.messages.recv().await,
            Some(ChannelMessage::State(ChannelState::Subscribed))
        ));
        assert!(seven.messages.try_recv().is_err());

        assert!(matches!(
            all.messages.recv().await,
            Some(ChannelMessage::State(ChannelState::Subscribed))
        ));
        match all.messages.recv().await {
            Some(ChannelMessage::Change(change)) => {
                assert_eq!(change.op, ChangeOp::Insert);
                assert_eq!(change.record["id"], "r1");
            }
            other => panic!("Expected insert, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn update_merges_and_reports_old_row() {
        let backend = MemoryBackend::new();
        backend.seed(Table::SalaryRecords, vec![json!({"id": "r1", "status": "pending"})]);
        let mut all = backend
            .open_channel(&ChannelSpec::for_scope(&ChannelScope::All))
            .await
            .unwrap();
        let _ = all.messages.recv().await;

        let row = backend
            .update(Table::SalaryRecords, "r1", json!({"paid_date": "2026-03-01"}))
            .await
            .unwrap();
        assert_eq!(row["status"], "pending");
        assert_eq!(row["paid_date"], "2026-03-01");

        match all.messages.recv().await {
            Some(ChannelMessage::Change(change)) => {
                assert_eq!(change.op, ChangeOp::Update);
                assert!(change.old_record.get("paid_date").is_none());
            }
            other => panic!("Expected update, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn toggles_fail_calls() {
        let backend = MemoryBackend::new();
        backend.set_reject_writes(true);
        assert!(backend.insert(Table::Notifications, json!({})).await.is_err());
        assert!(backend.fetch_all(Table::Notifications, &Filter::none()).await.is_ok());

        backend.set_offline(true);
        assert!(matches!(
            backend.fetch_all(Table::Notifications, &Filter::none()).await,
            Err(BackendError::Unavailable(_))
        ));
        assert!(
            backend
                .open_channel(&ChannelSpec::for_scope(&ChannelScope::All))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.update(Table::SalaryRecords, "nope", json!({})).await,
            Err(BackendError::NotFound(_))
        ));
        assert!(matches!(
            backend.delete(Table::SalaryRecords, "nope").await,
            Err(BackendError::NotFound(_))
        ));
    }
}
