use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use punchclock_types::events::ChangeNotification;
use punchclock_types::tables::Table;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Invalid realtime endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Failed to open channel {channel}: {reason}")]
    Open { channel: String, reason: String },

    #[error("Socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// What a channel listens to. The adapter keeps one channel per scope slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelScope {
    /// Salary records of one user.
    User(String),
    /// Every salary record.
    All,
}

impl ChannelScope {
    pub fn channel_name(&self) -> String {
        match self {
            Self::User(id) => format!("user_{}", id),
            Self::All => "salary_all".to_string(),
        }
    }

    /// Two scopes in the same slot never coexist.
    pub fn same_slot(&self, other: &ChannelScope) -> bool {
        matches!(
            (self, other),
            (Self::User(_), Self::User(_)) | (Self::All, Self::All)
        )
    }
}

/// Everything a backend needs to open a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    pub table: Table,
    /// Equality filter as (column, value).
    pub filter: Option<(String, String)>,
}

impl ChannelSpec {
    pub fn for_scope(scope: &ChannelScope) -> Self {
        let filter = match scope {
            ChannelScope::User(id) => Some(("user_id".to_string(), id.clone())),
            ChannelScope::All => None,
        };
        Self {
            name: scope.channel_name(),
            table: Table::SalaryRecords,
            filter,
        }
    }

    /// Filter in `column=eq.value` form, as the hosted backend expects it.
    pub fn filter_expr(&self) -> Option<String> {
        self.filter
            .as_ref()
            .map(|(column, value)| format!("{}=eq.{}", column, value))
    }
}

/// Opaque reference to a backend channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(pub Uuid);

impl ChannelHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle callbacks reported by a backend channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Subscribed,
    Closed,
    ChannelError,
    TimedOut,
}

impl ChannelState {
    pub fn is_disconnect(&self) -> bool {
        !matches!(self, Self::Subscribed)
    }
}

#[derive(Debug, Clone)]
pub enum ChannelMessage {
    Change(ChangeNotification),
    State(ChannelState),
}

/// A freshly opened channel: its handle and the stream of what it reports.
pub struct OpenChannel {
    pub handle: ChannelHandle,
    pub messages: mpsc::UnboundedReceiver<ChannelMessage>,
}

/// Change-notification side of the hosted backend.
#[async_trait]
pub trait RealtimeBackend: Send + Sync {
    async fn open_channel(&self, spec: &ChannelSpec) -> Result<OpenChannel, RealtimeError>;

    /// Tear down a channel. Unknown or already-closed handles are ignored.
    async fn close_channel(&self, handle: ChannelHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_names_and_filters() {
        let user = ChannelScope::User("7".into());
        assert_eq!(user.channel_name(), "user_7");
        assert_eq!(ChannelScope::All.channel_name(), "salary_all");

        let spec = ChannelSpec::for_scope(&user);
        assert_eq!(spec.table, Table::SalaryRecords);
        assert_eq!(spec.filter_expr().as_deref(), Some("user_id=eq.7"));
        assert_eq!(ChannelSpec::for_scope(&ChannelScope::All).filter_expr(), None);
    }

    #[test]
    fn user_scopes_share_a_slot() {
        let seven = ChannelScope::User("7".into());
        let nine = ChannelScope::User("9".into());
        assert!(seven.same_slot(&nine));
        assert!(!seven.same_slot(&ChannelScope::All));
    }
}
