use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::ids::value_as_id;

/// Kinds of events fanned out by the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SalaryCreated,
    /// Also the catch-all: every salary change is mirrored under this kind.
    SalaryUpdated,
    SalaryDeleted,
    PaymentConfirmed,
    PaymentMarkedPaid,
    ConnectionStatusChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SalaryCreated => "salary_created",
            Self::SalaryUpdated => "salary_updated",
            Self::SalaryDeleted => "salary_deleted",
            Self::PaymentConfirmed => "payment_confirmed",
            Self::PaymentMarkedPaid => "payment_marked_paid",
            Self::ConnectionStatusChanged => "connection_status_changed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Realtime connection state of one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connected => "connected",
            Self::Connecting => "connecting",
            Self::Disconnected => "disconnected",
        })
    }
}

/// A typed event delivered to bus listeners. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub table: String,
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "employeeId", default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
    /// Set on the generic copy of a more specific event.
    #[serde(rename = "mirroredFrom", default, skip_serializing_if = "Option::is_none")]
    pub mirrored_from: Option<EventKind>,
}

impl DomainEvent {
    /// Build an event for a record, lifting its user and employee ids.
    pub fn for_record(kind: EventKind, table: impl Into<String>, data: Value) -> Self {
        let user_id = data.get("user_id").and_then(value_as_id);
        let employee_id = data.get("employee_id").and_then(value_as_id);
        Self {
            kind,
            data,
            timestamp: Utc::now(),
            table: table.into(),
            user_id,
            employee_id,
            mirrored_from: None,
        }
    }

    pub fn connection_status(status: ConnectionStatus) -> Self {
        Self {
            kind: EventKind::ConnectionStatusChanged,
            data: json!({ "status": status }),
            timestamp: Utc::now(),
            table: String::new(),
            user_id: None,
            employee_id: None,
            mirrored_from: None,
        }
    }

    /// Same payload under another kind, remembering where it came from.
    pub fn with_kind(&self, kind: EventKind) -> Self {
        Self {
            kind,
            mirrored_from: Some(self.kind),
            ..self.clone()
        }
    }

    /// Id of the record this event is about, if any.
    pub fn record_id(&self) -> Option<String> {
        self.data.get("id").and_then(value_as_id)
    }

    /// Status carried by a `ConnectionStatusChanged` event.
    pub fn status(&self) -> Option<ConnectionStatus> {
        if self.kind != EventKind::ConnectionStatusChanged {
            return None;
        }
        serde_json::from_value(self.data.get("status")?.clone()).ok()
    }
}

/// Operation reported by a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Raw change notification from a hosted subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    #[serde(rename = "type")]
    pub op: ChangeOp,
    pub table: String,
    #[serde(default)]
    pub record: Value,
    #[serde(default)]
    pub old_record: Value,
    #[serde(default)]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl ChangeNotification {
    pub fn new(op: ChangeOp, table: impl Into<String>, record: Value) -> Self {
        Self {
            op,
            table: table.into(),
            record,
            old_record: Value::Null,
            commit_timestamp: Some(Utc::now()),
        }
    }

    /// The row the change is about: the new row, or the old one for deletes.
    pub fn subject(&self) -> &Value {
        match self.op {
            ChangeOp::Delete if self.record.is_null() => &self.old_record,
            _ => &self.record,
        }
    }
}
