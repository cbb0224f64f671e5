use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use punchclock_types::events::{ConnectionStatus, DomainEvent};

use crate::bus::EventBus;
use crate::channel::{
    ChannelHandle, ChannelMessage, ChannelScope, ChannelSpec, ChannelState, OpenChannel,
    RealtimeBackend, RealtimeError,
};
use crate::classify;
use crate::reconnect::{ReconnectConfig, ReconnectPolicy};

/// Owns the realtime channels of one application context and feeds what
/// they report into the event bus.
#[derive(Clone)]
pub struct RealtimeChannelAdapter {
    inner: Arc<AdapterInner>,
}

struct AdapterInner {
    backend: Arc<dyn RealtimeBackend>,
    bus: EventBus,

    /// Live channels by name. Never two entries for one name or scope slot.
    channels: Mutex<HashMap<String, ActiveChannel>>,

    /// Scopes the caller asked for. Reconnects reopen exactly these.
    wanted: Mutex<Vec<ChannelScope>>,

    status: Mutex<ConnectionStatus>,
    policy: Mutex<ReconnectPolicy>,
    reconnecting: AtomicBool,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

struct ActiveChannel {
    scope: ChannelScope,
    handle: ChannelHandle,
    forwarder: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RealtimeChannelAdapter {
    pub fn new(backend: Arc<dyn RealtimeBackend>, bus: EventBus, config: ReconnectConfig) -> Self {
        Self {
            inner: Arc::new(AdapterInner {
                backend,
                bus,
                channels: Mutex::new(HashMap::new()),
                wanted: Mutex::new(Vec::new()),
                status: Mutex::new(ConnectionStatus::Disconnected),
                policy: Mutex::new(ReconnectPolicy::new(config)),
                reconnecting: AtomicBool::new(false),
                reconnect_task: Mutex::new(None),
            }),
        }
    }

    /// Listen to the salary records of one user. Replaces any previous
    /// user channel.
    pub async fn subscribe_user(&self, user_id: impl Into<String>) -> Result<(), RealtimeError> {
        self.subscribe(ChannelScope::User(user_id.into())).await
    }

    /// Listen to every salary record. Replaces any previous all-records channel.
    pub async fn subscribe_all(&self) -> Result<(), RealtimeError> {
        self.subscribe(ChannelScope::All).await
    }

    pub async fn subscribe(&self, scope: ChannelScope) -> Result<(), RealtimeError> {
        {
            let mut wanted = lock(&self.inner.wanted);
            wanted.retain(|w| !w.same_slot(&scope));
            wanted.push(scope.clone());
        }

        match self.inner.open_scope(scope).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Realtime subscribe failed: {}", e);
                self.inner.set_status(ConnectionStatus::Disconnected);
                self.inner.schedule_reconnect();
                Err(e)
            }
        }
    }

    /// Drop the channel in `scope`'s slot. Other scopes are untouched.
    pub async fn unsubscribe(&self, scope: &ChannelScope) {
        let nothing_left = {
            let mut wanted = lock(&self.inner.wanted);
            wanted.retain(|w| !w.same_slot(scope));
            wanted.is_empty()
        };
        if nothing_left {
            self.inner.stop_reconnect();
        }

        let removed = take_conflicting(&mut lock(&self.inner.channels), scope, &scope.channel_name());
        for channel in removed {
            self.inner.teardown(channel).await;
        }

        if lock(&self.inner.channels).is_empty() {
            self.inner.set_status(ConnectionStatus::Disconnected);
        }
    }

    /// Remove every channel and stop any pending reconnect.
    pub async fn unsubscribe_all(&self) {
        lock(&self.inner.wanted).clear();
        self.inner.stop_reconnect();

        let removed: Vec<ActiveChannel> = lock(&self.inner.channels)
            .drain()
            .map(|(_, channel)| channel)
            .collect();
        for channel in removed {
            self.inner.teardown(channel).await;
        }

        self.inner.set_status(ConnectionStatus::Disconnected);
    }

    /// Retry right away, with a fresh attempt budget. For callers that
    /// noticed the adapter gave up.
    pub async fn reconnect_now(&self) -> Result<(), RealtimeError> {
        self.inner.stop_reconnect();
        let scopes = lock(&self.inner.wanted).clone();
        for scope in scopes {
            if let Err(e) = self.inner.open_scope(scope).await {
                self.inner.set_status(ConnectionStatus::Disconnected);
                self.inner.schedule_reconnect();
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn status(&self) -> ConnectionStatus {
        *lock(&self.inner.status)
    }

    /// Names of the live channels, sorted.
    pub fn active_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner.channels).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.inner.policy).attempts()
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }
}

impl AdapterInner {
    async fn open_scope(self: &Arc<Self>, scope: ChannelScope) -> Result<(), RealtimeError> {
        let name = scope.channel_name();

        let stale = take_conflicting(&mut lock(&self.channels), &scope, &name);
        for channel in stale {
            self.teardown(channel).await;
        }

        self.set_status(ConnectionStatus::Connecting);
        let spec = ChannelSpec::for_scope(&scope);
        let OpenChannel { handle, messages } = self.backend.open_channel(&spec).await?;

        // A concurrent subscribe for the same slot may have landed while we
        // were opening; whatever it left behind goes too.
        let raced = {
            let mut channels = lock(&self.channels);
            let raced = take_conflicting(&mut channels, &scope, &name);
            let forwarder = tokio::spawn(forward(Arc::downgrade(self), handle, messages));
            channels.insert(
                name.clone(),
                ActiveChannel {
                    scope,
                    handle,
                    forwarder,
                },
            );
            raced
        };
        for channel in raced {
            self.teardown(channel).await;
        }

        info!("Realtime channel {} opened", name);
        Ok(())
    }

    async fn teardown(&self, channel: ActiveChannel) {
        channel.forwarder.abort();
        self.backend.close_channel(channel.handle).await;
        debug!("Realtime channel {} removed", channel.scope.channel_name());
    }

    fn is_current(&self, handle: ChannelHandle) -> bool {
        lock(&self.channels).values().any(|c| c.handle == handle)
    }

    fn set_status(&self, status: ConnectionStatus) {
        let changed = {
            let mut current = lock(&self.status);
            let changed = *current != status;
            *current = status;
            changed
        };
        if changed {
            debug!("Realtime status -> {}", status);
            self.bus.publish(&DomainEvent::connection_status(status));
        }
    }

    fn on_channel_state(self: &Arc<Self>, handle: ChannelHandle, state: ChannelState) {
        if !self.is_current(handle) {
            debug!("Ignoring {:?} from a replaced channel", state);
            return;
        }

        if state.is_disconnect() {
            warn!("Realtime channel reported {:?}", state);
            self.set_status(ConnectionStatus::Disconnected);
            self.schedule_reconnect();
        } else {
            lock(&self.policy).reset();
            self.set_status(ConnectionStatus::Connected);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if lock(&self.wanted).is_empty() {
            return;
        }
        if self.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }

        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let reestablished = inner.reconnect_loop().await;
            inner.reconnecting.store(false, Ordering::Release);
            // A reopened channel that dropped before the flag cleared had its
            // own reconnect request swallowed. Pick it up here.
            if reestablished && *lock(&inner.status) == ConnectionStatus::Disconnected {
                inner.schedule_reconnect();
            }
        });
        *lock(&self.reconnect_task) = Some(task);
    }

    fn stop_reconnect(&self) {
        if let Some(task) = lock(&self.reconnect_task).take() {
            task.abort();
        }
        self.reconnecting.store(false, Ordering::Release);
        lock(&self.policy).reset();
    }

    /// Returns true once every wanted scope is open again.
    async fn reconnect_loop(self: &Arc<Self>) -> bool {
        loop {
            let (delay, attempt) = {
                let mut policy = lock(&self.policy);
                (policy.next_delay(), policy.attempts())
            };
            let Some(delay) = delay else {
                warn!("Realtime reconnect gave up after {} attempts", attempt);
                self.set_status(ConnectionStatus::Disconnected);
                return false;
            };

            info!("Realtime reconnect attempt {} in {:?}", attempt, delay);
            tokio::time::sleep(delay).await;

            let scopes = lock(&self.wanted).clone();
            if scopes.is_empty() {
                return false;
            }

            let mut failure = None;
            for scope in scopes {
                if let Err(e) = self.open_scope(scope).await {
                    failure = Some(e);
                    break;
                }
            }

            match failure {
                None => {
                    info!("Realtime channels re-established");
                    return true;
                }
                Some(e) => {
                    warn!("Realtime reconnect attempt {} failed: {}", attempt, e);
                    self.set_status(ConnectionStatus::Disconnected);
                }
            }
        }
    }
}

impl Drop for AdapterInner {
    fn drop(&mut self) {
        let channels = self.channels.get_mut().unwrap_or_else(PoisonError::into_inner);
        for channel in channels.values() {
            channel.forwarder.abort();
        }
    }
}

/// Remove every channel that shares the name or the scope slot.
fn take_conflicting(
    channels: &mut HashMap<String, ActiveChannel>,
    scope: &ChannelScope,
    name: &str,
) -> Vec<ActiveChannel> {
    let keys: Vec<String> = channels
        .iter()
        .filter(|(key, channel)| key.as_str() == name || channel.scope.same_slot(scope))
        .map(|(key, _)| key.clone())
        .collect();
    keys.iter().filter_map(|key| channels.remove(key)).collect()
}

/// Per-channel task: decode changes onto the bus, relay lifecycle states.
async fn forward(
    adapter: Weak<AdapterInner>,
    handle: ChannelHandle,
    mut messages: mpsc::UnboundedReceiver<ChannelMessage>,
) {
    while let Some(message) = messages.recv().await {
        let Some(inner) = adapter.upgrade() else {
            return;
        };
        match message {
            ChannelMessage::Change(change) => {
                if !inner.is_current(handle) {
                    return;
                }
                for event in classify::decode(&change) {
                    inner.bus.publish(&event);
                }
            }
            ChannelMessage::State(state) => inner.on_channel_state(handle, state),
        }
    }

    // The backend dropped its end without saying goodbye.
    if let Some(inner) = adapter.upgrade() {
        inner.on_channel_state(handle, ChannelState::Closed);
    }
}
