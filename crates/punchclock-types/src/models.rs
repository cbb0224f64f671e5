use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{deserialize_id, deserialize_opt_id};

/// Anything the facade and the optimistic store can address by id.
pub trait Keyed {
    fn key(&self) -> &str;
}

// -- Salary --

/// Single authoritative payment state of a salary record.
///
/// The backend spreads this over three columns (`status`, `paid_date`,
/// `confirmed_by_employee`/`confirmed_at`) which can disagree. They are
/// collapsed here, once, when a row enters the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SalaryStatus {
    Pending,
    Confirmed,
    Paid,
}

impl SalaryStatus {
    /// Paid wins over confirmed, confirmed wins over pending.
    pub fn from_fields(status: Option<&str>, has_paid_date: bool, confirmed: bool) -> Self {
        if status == Some("paid") || has_paid_date {
            Self::Paid
        } else if confirmed || status == Some("confirmed") {
            Self::Confirmed
        } else {
            Self::Pending
        }
    }

    /// Derive the status straight from a raw backend row.
    pub fn of_row(row: &Value) -> Self {
        let present = |field: &str| row.get(field).is_some_and(|v| !v.is_null());
        let confirmed = present("confirmed_at")
            || row
                .get("confirmed_by_employee")
                .and_then(Value::as_bool)
                .unwrap_or(false);
        Self::from_fields(
            row.get("status").and_then(Value::as_str),
            present("paid_date"),
            confirmed,
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Paid => "paid",
        }
    }
}

/// Salary row exactly as the backend stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalaryRow {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub period_start: Option<NaiveDate>,
    #[serde(default)]
    pub period_end: Option<NaiveDate>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub paid_date: Option<String>,
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub confirmed_by_employee: Option<bool>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A salary record with its status already collapsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SalaryRow", into = "SalaryRow")]
pub struct SalaryRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub employee_id: Option<String>,
    pub amount: f64,
    pub currency: Option<String>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub status: SalaryStatus,
    pub paid_date: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Set only by the employee's own confirmation; independent of payment.
    pub confirmed_by_employee: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SalaryRecord {
    pub fn new(user_id: impl Into<String>, amount: f64) -> Self {
        let now = Utc::now();
        Self {
            id: crate::ids::new_id(),
            user_id: Some(user_id.into()),
            employee_id: None,
            amount,
            currency: None,
            period_start: None,
            period_end: None,
            status: SalaryStatus::Pending,
            paid_date: None,
            confirmed_at: None,
            confirmed_by_employee: false,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == SalaryStatus::Pending
    }

    pub fn mark_paid(&mut self, at: DateTime<Utc>) {
        self.status = SalaryStatus::Paid;
        self.paid_date = Some(at.to_rfc3339());
        self.updated_at = Some(at);
    }

    /// Employee confirmation. Never downgrades a paid record.
    pub fn confirm(&mut self, at: DateTime<Utc>) {
        if self.status == SalaryStatus::Pending {
            self.status = SalaryStatus::Confirmed;
        }
        self.confirmed_at = Some(at);
        self.confirmed_by_employee = true;
        self.updated_at = Some(at);
    }
}

impl From<SalaryRow> for SalaryRecord {
    fn from(row: SalaryRow) -> Self {
        let status = SalaryStatus::from_fields(
            row.status.as_deref(),
            row.paid_date.is_some(),
            row.confirmed_at.is_some() || row.confirmed_by_employee.unwrap_or(false),
        );
        Self {
            id: row.id,
            user_id: row.user_id,
            employee_id: row.employee_id,
            amount: row.amount,
            currency: row.currency,
            period_start: row.period_start,
            period_end: row.period_end,
            status,
            paid_date: row.paid_date,
            confirmed_at: row.confirmed_at,
            confirmed_by_employee: row.confirmed_by_employee.unwrap_or(false),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<SalaryRecord> for SalaryRow {
    fn from(record: SalaryRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            employee_id: record.employee_id,
            amount: record.amount,
            currency: record.currency,
            period_start: record.period_start,
            period_end: record.period_end,
            status: Some(record.status.as_str().to_string()),
            paid_date: record.paid_date,
            confirmed_at: record.confirmed_at,
            confirmed_by_employee: Some(record.confirmed_by_employee),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

impl Keyed for SalaryRecord {
    fn key(&self) -> &str {
        &self.id
    }
}

/// One payout against a salary record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalaryPayment {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub salary_record_id: String,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub user_id: Option<String>,
    pub amount: f64,
    pub paid_at: DateTime<Utc>,
    #[serde(default)]
    pub method: Option<String>,
}

impl Keyed for SalaryPayment {
    fn key(&self) -> &str {
        &self.id
    }
}

// -- Time tracking --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakPeriod {
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: String,
    pub clock_in: DateTime<Utc>,
    #[serde(default)]
    pub clock_out: Option<DateTime<Utc>>,
    #[serde(default)]
    pub breaks: Vec<BreakPeriod>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl TimeEntry {
    pub fn start(user_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: crate::ids::new_id(),
            user_id: user_id.into(),
            clock_in: at,
            clock_out: None,
            breaks: Vec::new(),
            notes: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.clock_out.is_none()
    }

    pub fn on_break(&self) -> bool {
        self.breaks.last().is_some_and(|b| b.end.is_none())
    }

    /// Worked time up to `now` (or clock-out), breaks excluded.
    pub fn worked(&self, now: DateTime<Utc>) -> Duration {
        let end = self.clock_out.unwrap_or(now);
        let on_break: Duration = self
            .breaks
            .iter()
            .map(|b| b.end.unwrap_or(end) - b.start)
            .fold(Duration::zero(), |acc, d| acc + d);
        (end - self.clock_in - on_break).max(Duration::zero())
    }
}

impl Keyed for TimeEntry {
    fn key(&self) -> &str {
        &self.id
    }
}

// -- Leave --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveKind {
    Vacation,
    Sick,
    Personal,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRequest {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: String,
    pub kind: LeaveKind,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub reason: Option<String>,
    pub status: LeaveStatus,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub reviewed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LeaveRequest {
    /// Calendar days covered, both ends inclusive.
    pub fn days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

impl Keyed for LeaveRequest {
    fn key(&self) -> &str {
        &self.id
    }
}

// -- Notifications --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Keyed for Notification {
    fn key(&self) -> &str {
        &self.id
    }
}
