//! Salary-management session: the salary list of one user (or everyone),
//! kept current by realtime events, with optimistic pay and confirm actions.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use punchclock_realtime::{ChannelScope, EventBus, RealtimeChannelAdapter, Subscription};
use punchclock_types::events::{ConnectionStatus, DomainEvent, EventKind};
use punchclock_types::models::SalaryRecord;

use crate::context::AppContext;
use crate::facade::{Facade, FacadeError};
use crate::optimistic::OptimisticStore;

/// Event kinds merged into the salary list.
const MERGED_KINDS: [EventKind; 5] = [
    EventKind::SalaryCreated,
    EventKind::SalaryUpdated,
    EventKind::SalaryDeleted,
    EventKind::PaymentConfirmed,
    EventKind::PaymentMarkedPaid,
];

pub struct SalaryManagement {
    facade: Arc<Facade>,
    realtime: Option<RealtimeChannelAdapter>,
    bus: EventBus,
    scope: ChannelScope,
    store: OptimisticStore<SalaryRecord>,
    listeners: Vec<Subscription>,
    released: bool,
}

impl SalaryManagement {
    /// Load the list, start listening on the bus, then open the realtime
    /// channel. Load and subscribe failures are logged and leave the session
    /// usable with whatever it has.
    pub async fn mount(ctx: &AppContext, scope: ChannelScope) -> Self {
        let user = match &scope {
            ChannelScope::User(id) => Some(id.clone()),
            ChannelScope::All => None,
        };
        let facade = ctx.facade.clone();
        let store = OptimisticStore::new(move || {
            let facade = facade.clone();
            let user = user.clone();
            async move { facade.salary_records(user.as_deref()).await }
        });

        if let Err(e) = store.load().await {
            warn!("Initial salary load failed: {}", e);
        }

        let listeners = MERGED_KINDS
            .iter()
            .map(|kind| {
                let store = store.clone();
                let scope = scope.clone();
                ctx.bus.subscription(*kind, move |event| {
                    if in_scope(&scope, event) {
                        store.apply_event(event);
                    }
                })
            })
            .collect();

        if let Some(realtime) = &ctx.realtime {
            if let Err(e) = realtime.subscribe(scope.clone()).await {
                warn!("Salary channel not open yet, retrying in background: {}", e);
            }
        }

        info!("Salary management mounted for {}", scope.channel_name());
        Self {
            facade: ctx.facade.clone(),
            realtime: ctx.realtime.clone(),
            bus: ctx.bus.clone(),
            scope,
            store,
            listeners,
            released: false,
        }
    }

    pub fn salaries(&self) -> Vec<SalaryRecord> {
        self.store.snapshot()
    }

    pub fn pending_salaries(&self) -> Vec<SalaryRecord> {
        self.store
            .snapshot()
            .into_iter()
            .filter(SalaryRecord::is_pending)
            .collect()
    }

    pub fn is_loading(&self) -> bool {
        self.store.is_loading()
    }

    pub fn last_error(&self) -> Option<String> {
        self.store.last_error()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.realtime
            .as_ref()
            .map_or(ConnectionStatus::Disconnected, RealtimeChannelAdapter::status)
    }

    pub fn scope(&self) -> &ChannelScope {
        &self.scope
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub async fn refresh(&self) -> Result<(), FacadeError> {
        self.store.load().await
    }

    /// Mark a record paid. Shows as paid at once; reverts on failure.
    pub async fn mark_as_paid(&self, id: &str) -> Result<(), FacadeError> {
        let at = Utc::now();
        let target = id.to_string();
        self.optimistic(
            move |records| {
                if let Some(record) = records.iter_mut().find(|r| r.id == target) {
                    record.mark_paid(at);
                }
            },
            self.facade.mark_salary_paid(id, at),
        )
        .await
    }

    /// Employee confirmation of a payment. Shows at once; reverts on failure.
    pub async fn confirm_payment(&self, id: &str) -> Result<(), FacadeError> {
        let at = Utc::now();
        let target = id.to_string();
        self.optimistic(
            move |records| {
                if let Some(record) = records.iter_mut().find(|r| r.id == target) {
                    record.confirm(at);
                }
            },
            self.facade.confirm_salary_payment(id, at),
        )
        .await
    }

    pub async fn create_salary(&self, record: SalaryRecord) -> Result<(), FacadeError> {
        let shown = record.clone();
        self.optimistic(
            move |records| {
                if !records.iter().any(|r| r.id == shown.id) {
                    records.push(shown);
                }
            },
            self.facade.create_salary_record(&record),
        )
        .await
    }

    pub async fn delete_salary(&self, id: &str) -> Result<(), FacadeError> {
        let target = id.to_string();
        self.optimistic(
            move |records| records.retain(|r| r.id != target),
            self.facade.delete_salary_record(id),
        )
        .await
    }

    /// Stop listening and release the realtime channel. Async work still in
    /// flight finishes without touching state. Dropping the session does the
    /// same, except the channel is closed on a spawned task.
    pub async fn unmount(mut self) {
        self.released = true;
        self.store.unmount();
        self.listeners.clear();
        if let Some(realtime) = &self.realtime {
            realtime.unsubscribe(&self.scope).await;
        }
        info!("Salary management unmounted for {}", self.scope.channel_name());
    }

    async fn optimistic<M, W, R>(&self, mutate: M, write: W) -> Result<(), FacadeError>
    where
        M: FnOnce(&mut Vec<SalaryRecord>),
        W: Future<Output = Result<R, FacadeError>>,
    {
        let mutation = self.store.apply_optimistic(mutate);
        match write.await {
            Ok(_) => {
                self.store.commit(mutation);
                Ok(())
            }
            Err(e) => {
                warn!("Salary change rejected, reloading: {}", e);
                if let Err(reload) = self.store.rollback(mutation, Some(e.user_message())).await {
                    warn!("Reload after rejected change failed: {}", reload);
                }
                Err(e)
            }
        }
    }
}

impl Drop for SalaryManagement {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.store.unmount();
        self.listeners.clear();

        let Some(realtime) = self.realtime.clone() else {
            return;
        };
        let scope = self.scope.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("Salary session for {} dropped, closing its channel", scope.channel_name());
                runtime.spawn(async move { realtime.unsubscribe(&scope).await });
            }
            Err(_) => warn!(
                "Salary session for {} dropped outside a runtime, channel left open",
                scope.channel_name()
            ),
        }
    }
}

/// Events for other users are ignored by a user-scoped session. Events
/// without a user id (some deletes) always pass.
fn in_scope(scope: &ChannelScope, event: &DomainEvent) -> bool {
    match scope {
        ChannelScope::All => true,
        ChannelScope::User(id) => event.user_id.as_deref().is_none_or(|user| user == id),
    }
}
