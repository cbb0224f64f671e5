mod config;

use std::sync::Arc;

use tracing::{debug, info, warn};

use punchclock_api::{AppContext, Facade, HostedBackend, RestBackend, SalaryManagement};
use punchclock_db::LocalStore;
use punchclock_realtime::{ChannelScope, RealtimeBackend, SocketBackend, Subscription};
use punchclock_types::events::{DomainEvent, EventKind};

use crate::config::Config;

const WATCHED_KINDS: [EventKind; 6] = [
    EventKind::SalaryCreated,
    EventKind::SalaryUpdated,
    EventKind::SalaryDeleted,
    EventKind::PaymentConfirmed,
    EventKind::PaymentMarkedPaid,
    EventKind::ConnectionStatusChanged,
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "punchclock=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Local fallback store
    let local = Arc::new(LocalStore::open(&config.db_path)?);
    log_local_items(&local);

    let ctx = match &config.backend_url {
        Some(url) => {
            info!("Using hosted backend at {}", url);
            let hosted: Arc<dyn HostedBackend> = Arc::new(RestBackend::new(url, &config.api_key));
            let realtime: Arc<dyn RealtimeBackend> = Arc::new(SocketBackend::new(url, &config.api_key)?);
            AppContext::new(Facade::new(Some(hosted), local), Some(realtime), config.reconnect)
        }
        None => {
            info!("No backend configured, running on local storage only");
            AppContext::local_only(local)
        }
    };

    if let Some(user_id) = &config.user_id {
        ctx.facade.sign_in_as(user_id).await?;
    }
    let scope = match ctx.facade.current_user_id().await {
        Ok(user_id) => ChannelScope::User(user_id),
        Err(_) => {
            info!("No signed-in user, watching every salary record");
            ChannelScope::All
        }
    };

    let _log_guards: Vec<Subscription> = WATCHED_KINDS
        .iter()
        .map(|kind| ctx.bus.subscription(*kind, log_event))
        .collect();

    let salaries = SalaryManagement::mount(&ctx, scope).await;
    if let Some(error) = salaries.last_error() {
        warn!("{}", error);
    }
    let pending = salaries.pending_salaries();
    info!(
        "{} salary records, {} pending",
        salaries.salaries().len(),
        pending.len()
    );
    for record in &pending {
        info!("  pending {} amount {:.2}", record.id, record.amount);
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    salaries.unmount().await;
    ctx.shutdown().await;
    Ok(())
}

fn log_local_items(local: &LocalStore) {
    match local.items() {
        Ok(items) => {
            for item in items {
                debug!("Local {}: {} bytes, updated {}", item.key, item.value.len(), item.updated_at);
            }
        }
        Err(e) => warn!("Could not list local data: {}", e),
    }
}

fn log_event(event: &DomainEvent) {
    match event.status() {
        Some(status) => info!("Realtime {}", status),
        None if event.mirrored_from.is_some() => {}
        None => info!(
            "{} {} (user {})",
            event.kind,
            event.record_id().unwrap_or_default(),
            event.user_id.as_deref().unwrap_or("-")
        ),
    }
}
