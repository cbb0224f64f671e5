use std::sync::Arc;

use tracing::info;

use punchclock_db::LocalStore;
use punchclock_realtime::{EventBus, RealtimeBackend, RealtimeChannelAdapter, ReconnectConfig};

use crate::backend::HostedBackend;
use crate::facade::Facade;
use crate::memory::MemoryBackend;

/// Everything a session shares: one bus, one facade, at most one realtime
/// adapter. Built once at startup and handed to whoever needs it.
#[derive(Clone)]
pub struct AppContext {
    pub bus: EventBus,
    pub facade: Arc<Facade>,
    /// `None` when running without a hosted backend.
    pub realtime: Option<RealtimeChannelAdapter>,
}

impl AppContext {
    pub fn new(
        facade: Facade,
        realtime_backend: Option<Arc<dyn RealtimeBackend>>,
        reconnect: ReconnectConfig,
    ) -> Self {
        let bus = EventBus::new();
        let realtime = realtime_backend
            .map(|backend| RealtimeChannelAdapter::new(backend, bus.clone(), reconnect));
        Self {
            bus,
            facade: Arc::new(facade),
            realtime,
        }
    }

    /// Both boundaries served by one in-memory backend.
    pub fn in_memory(backend: Arc<MemoryBackend>, local: Arc<LocalStore>, reconnect: ReconnectConfig) -> Self {
        let hosted: Arc<dyn HostedBackend> = backend.clone();
        let realtime: Arc<dyn RealtimeBackend> = backend;
        Self::new(Facade::new(Some(hosted), local), Some(realtime), reconnect)
    }

    /// No hosted backend and no realtime: local storage only.
    pub fn local_only(local: Arc<LocalStore>) -> Self {
        Self::new(Facade::local_only(local), None, ReconnectConfig::default())
    }

    /// Close every realtime channel.
    pub async fn shutdown(&self) {
        if let Some(realtime) = &self.realtime {
            realtime.unsubscribe_all().await;
        }
        info!("Session closed");
    }
}
