//! In-memory list of records with optimistic mutations.
//!
//! Mutations apply locally at once and hand back a [`Mutation`]. The caller
//! then either commits it once the backend agreed or rolls it back, which
//! throws local state away and reloads from the source. Realtime events are
//! merged in as they arrive.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use punchclock_types::events::{DomainEvent, EventKind};
use punchclock_types::models::Keyed;

use crate::facade::FacadeError;

type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<T>, FacadeError>> + Send + Sync>;

/// Handle for one optimistic mutation.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an optimistic mutation must be committed or rolled back"]
pub struct Mutation {
    id: u64,
}

pub struct OptimisticStore<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T> Clone for OptimisticStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct StoreInner<T> {
    fetch: Fetcher<T>,
    state: Mutex<StoreState<T>>,
    mounted: AtomicBool,
    /// Sequence number of the most recently started load.
    latest_load: AtomicU64,
    next_mutation: AtomicU64,
}

struct StoreState<T> {
    records: Vec<T>,
    loading: bool,
    last_error: Option<String>,
    pending: Vec<u64>,
}

impl<T> OptimisticStore<T>
where
    T: Keyed + DeserializeOwned + Clone + Send + 'static,
{
    /// `source` produces the authoritative record list on every load.
    pub fn new<F, Fut>(source: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, FacadeError>> + Send + 'static,
    {
        let fetch: Fetcher<T> =
            Arc::new(move || -> BoxFuture<'static, Result<Vec<T>, FacadeError>> { Box::pin(source()) });
        Self {
            inner: Arc::new(StoreInner {
                fetch,
                state: Mutex::new(StoreState {
                    records: Vec::new(),
                    loading: false,
                    last_error: None,
                    pending: Vec::new(),
                }),
                mounted: AtomicBool::new(true),
                latest_load: AtomicU64::new(0),
                next_mutation: AtomicU64::new(1),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState<T>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the state with a fresh fetch.
    ///
    /// When loads overlap, only the one started last is applied. Results
    /// arriving after `unmount` are dropped.
    pub async fn load(&self) -> Result<(), FacadeError> {
        let seq = self.inner.latest_load.fetch_add(1, Ordering::AcqRel) + 1;
        if self.is_mounted() {
            self.state().loading = true;
        }

        let result = (self.inner.fetch)().await;

        if !self.is_mounted() {
            debug!("Discarding load {} after unmount", seq);
            return result.map(|_| ());
        }
        if self.inner.latest_load.load(Ordering::Acquire) != seq {
            debug!("Discarding stale load {}", seq);
            return result.map(|_| ());
        }

        let mut state = self.state();
        state.loading = false;
        match result {
            Ok(records) => {
                state.records = records;
                state.pending.clear();
                state.last_error = None;
                Ok(())
            }
            Err(e) => {
                warn!("Load failed: {}", e);
                state.last_error = Some(e.user_message());
                Err(e)
            }
        }
    }

    /// Transform the local state right away.
    pub fn apply_optimistic<F>(&self, mutator: F) -> Mutation
    where
        F: FnOnce(&mut Vec<T>),
    {
        let id = self.inner.next_mutation.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state();
        mutator(&mut state.records);
        state.pending.push(id);
        Mutation { id }
    }

    /// The backend accepted the mutation; keep the local state.
    pub fn commit(&self, mutation: Mutation) {
        self.state().pending.retain(|id| *id != mutation.id);
    }

    /// The backend refused the mutation. Local state is discarded and
    /// reloaded; `error` becomes the visible error if given.
    pub async fn rollback(&self, mutation: Mutation, error: Option<String>) -> Result<(), FacadeError> {
        {
            let mut state = self.state();
            state.pending.retain(|id| *id != mutation.id);
            if error.is_some() {
                state.last_error = error.clone();
            }
        }
        let reloaded = self.load().await;
        if let Some(error) = error {
            if self.is_mounted() {
                self.state().last_error = Some(error);
            }
        }
        reloaded
    }

    /// Merge a realtime event. Generic mirror copies are skipped since the
    /// specific event they copy is merged on its own.
    pub fn apply_event(&self, event: &DomainEvent) {
        if !self.is_mounted() || event.mirrored_from.is_some() {
            return;
        }
        match event.kind {
            EventKind::SalaryDeleted => {
                let Some(id) = event.record_id() else {
                    return;
                };
                self.state().records.retain(|r| r.key() != id);
            }
            EventKind::SalaryCreated
            | EventKind::SalaryUpdated
            | EventKind::PaymentConfirmed
            | EventKind::PaymentMarkedPaid => {
                let record: T = match serde_json::from_value(event.data.clone()) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("Ignoring undecodable {} event: {}", event.kind, e);
                        return;
                    }
                };
                let mut state = self.state();
                match state.records.iter_mut().find(|r| r.key() == record.key()) {
                    Some(existing) => *existing = record,
                    None => state.records.push(record),
                }
            }
            EventKind::ConnectionStatusChanged => {}
        }
    }

    /// Stop accepting async completions and events.
    pub fn unmount(&self) {
        self.inner.mounted.store(false, Ordering::Release);
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.state().records.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state().loading
    }

    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    pub fn pending_mutations(&self) -> usize {
        self.state().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use punchclock_types::models::{SalaryRecord, SalaryStatus};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn record(id: &str) -> SalaryRecord {
        serde_json::from_value(json!({"id": id, "user_id": 7, "amount": 100})).unwrap()
    }

    /// Store whose fetch returns whatever `source` holds at the time.
    fn store_over(source: Arc<Mutex<Vec<SalaryRecord>>>) -> OptimisticStore<SalaryRecord> {
        OptimisticStore::new(move || {
            let source = source.clone();
            async move { Ok(source.lock().unwrap().clone()) }
        })
    }

    #[tokio::test]
    async fn load_replaces_state_wholesale() {
        let source = Arc::new(Mutex::new(vec![record("r1"), record("r2")]));
        let store = store_over(source.clone());

        store.load().await.unwrap();
        assert_eq!(store.snapshot().len(), 2);

        *source.lock().unwrap() = vec![record("r3")];
        store.load().await.unwrap();
        let ids: Vec<String> = store.snapshot().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["r3"]);
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn rollback_matches_a_fresh_fetch() {
        let source = Arc::new(Mutex::new(vec![record("r1")]));
        let store = store_over(source.clone());
        store.load().await.unwrap();

        let mutation = store.apply_optimistic(|records| {
            records[0].mark_paid(chrono::Utc::now());
            records.push(record("ghost"));
        });
        assert_eq!(store.snapshot()[0].status, SalaryStatus::Paid);
        assert_eq!(store.pending_mutations(), 1);

        store
            .rollback(mutation, Some("Could not reach the server.".into()))
            .await
            .unwrap();

        assert_eq!(store.snapshot(), source.lock().unwrap().clone());
        assert_eq!(store.pending_mutations(), 0);
        assert_eq!(store.last_error().as_deref(), Some("Could not reach the server."));
    }

    #[tokio::test]
    async fn committed_mutation_stays() {
        let source = Arc::new(Mutex::new(vec![record("r1")]));
        let store = store_over(source);
        store.load().await.unwrap();

        let mutation = store.apply_optimistic(|records| records.clear());
        store.commit(mutation);
        assert!(store.snapshot().is_empty());
        assert_eq!(store.pending_mutations(), 0);
    }

    #[tokio::test]
    async fn failed_load_keeps_state_and_sets_message() {
        let fail = Arc::new(AtomicBool::new(false));
        let fail_in = fail.clone();
        let store = OptimisticStore::new(move || {
            let fail = fail_in.load(Ordering::SeqCst);
            async move {
                if fail {
                    Err(FacadeError::InvalidOperation("boom".into()))
                } else {
                    Ok(vec![record("r1")])
                }
            }
        });
        store.load().await.unwrap();
        fail.store(true, Ordering::SeqCst);

        assert!(store.load().await.is_err());
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(store.last_error().as_deref(), Some("boom"));
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn latest_started_load_wins() {
        // First load blocks until released; the second returns at once.
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicU64::new(0));
        let (gate_in, calls_in) = (gate.clone(), calls.clone());
        let store = OptimisticStore::new(move || {
            let call = calls_in.fetch_add(1, Ordering::SeqCst);
            let gate = gate_in.clone();
            async move {
                if call == 0 {
                    gate.notified().await;
                    Ok(vec![record("stale")])
                } else {
                    Ok(vec![record("fresh")])
                }
            }
        });

        let slow = tokio::spawn({
            let store = store.clone();
            async move { store.load().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.load().await.unwrap();
        gate.notify_one();
        slow.await.unwrap().unwrap();

        let ids: Vec<String> = store.snapshot().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["fresh"]);
    }

    #[tokio::test]
    async fn events_upsert_and_delete() {
        let store = store_over(Arc::new(Mutex::new(vec![record("r1")])));
        store.load().await.unwrap();

        let paid = DomainEvent::for_record(
            EventKind::PaymentMarkedPaid,
            "salary_records",
            json!({"id": "r1", "user_id": 7, "paid_date": "2026-03-01"}),
        );
        store.apply_event(&paid);
        assert_eq!(store.snapshot()[0].status, SalaryStatus::Paid);

        let created = DomainEvent::for_record(EventKind::SalaryCreated, "salary_records", json!({"id": "r2"}));
        store.apply_event(&created);
        assert_eq!(store.snapshot().len(), 2);

        let deleted = DomainEvent::for_record(EventKind::SalaryDeleted, "salary_records", json!({"id": "r2"}));
        store.apply_event(&deleted);
        // The mirror copy of a delete must not bring the row back.
        store.apply_event(&deleted.with_kind(EventKind::SalaryUpdated));
        let ids: Vec<String> = store.snapshot().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["r1"]);
    }

    #[tokio::test]
    async fn nothing_lands_after_unmount() {
        let gate = Arc::new(Notify::new());
        let gate_in = gate.clone();
        let store = OptimisticStore::new(move || {
            let gate = gate_in.clone();
            async move {
                gate.notified().await;
                Ok(vec![record("late")])
            }
        });

        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.load().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.unmount();
        gate.notify_one();
        pending.await.unwrap().unwrap();

        store.apply_event(&DomainEvent::for_record(
            EventKind::SalaryCreated,
            "salary_records",
            json!({"id": "r9"}),
        ));
        assert!(store.snapshot().is_empty());
    }
}
