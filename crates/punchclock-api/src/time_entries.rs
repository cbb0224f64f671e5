use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;

use punchclock_types::models::{BreakPeriod, TimeEntry};
use punchclock_types::tables::Table;

use crate::backend::Filter;
use crate::facade::{Facade, FacadeError};

impl Facade {
    /// Time entries of a user, newest clock-in first.
    pub async fn time_entries(&self, user_id: &str) -> Result<Vec<TimeEntry>, FacadeError> {
        let mut entries: Vec<TimeEntry> = self
            .fetch_all(Table::TimeEntries, &Filter::eq("user_id", user_id))
            .await?;
        entries.sort_by(|a, b| b.clock_in.cmp(&a.clock_in));
        Ok(entries)
    }

    /// The entry the user is currently clocked in on, if any.
    pub async fn open_time_entry(&self, user_id: &str) -> Result<Option<TimeEntry>, FacadeError> {
        Ok(self
            .time_entries(user_id)
            .await?
            .into_iter()
            .find(TimeEntry::is_open))
    }

    pub async fn clock_in(&self, user_id: &str, at: DateTime<Utc>) -> Result<TimeEntry, FacadeError> {
        if self.open_time_entry(user_id).await?.is_some() {
            return Err(FacadeError::InvalidOperation("Already clocked in.".into()));
        }
        let entry = self.insert(Table::TimeEntries, &TimeEntry::start(user_id, at)).await?;
        info!("User {} clocked in", user_id);
        Ok(entry)
    }

    /// Close the open entry, ending a running break first.
    pub async fn clock_out(&self, user_id: &str, at: DateTime<Utc>) -> Result<TimeEntry, FacadeError> {
        let mut entry = self.require_open_entry(user_id).await?;
        if let Some(running) = entry.breaks.last_mut().filter(|b| b.end.is_none()) {
            running.end = Some(at);
        }
        let entry = self
            .update(
                Table::TimeEntries,
                &entry.id,
                json!({ "clock_out": at, "breaks": entry.breaks }),
            )
            .await?;
        info!("User {} clocked out", user_id);
        Ok(entry)
    }

    pub async fn start_break(&self, user_id: &str, at: DateTime<Utc>) -> Result<TimeEntry, FacadeError> {
        let mut entry = self.require_open_entry(user_id).await?;
        if entry.on_break() {
            return Err(FacadeError::InvalidOperation("Already on a break.".into()));
        }
        entry.breaks.push(BreakPeriod { start: at, end: None });
        self.update(Table::TimeEntries, &entry.id, json!({ "breaks": entry.breaks }))
            .await
    }

    pub async fn end_break(&self, user_id: &str, at: DateTime<Utc>) -> Result<TimeEntry, FacadeError> {
        let mut entry = self.require_open_entry(user_id).await?;
        let Some(running) = entry.breaks.last_mut().filter(|b| b.end.is_none()) else {
            return Err(FacadeError::InvalidOperation("Not on a break.".into()));
        };
        running.end = Some(at);
        self.update(Table::TimeEntries, &entry.id, json!({ "breaks": entry.breaks }))
            .await
    }

    pub async fn delete_time_entry(&self, id: &str) -> Result<(), FacadeError> {
        self.delete(Table::TimeEntries, id).await
    }

    async fn require_open_entry(&self, user_id: &str) -> Result<TimeEntry, FacadeError> {
        self.open_time_entry(user_id)
            .await?
            .ok_or_else(|| FacadeError::InvalidOperation("Not clocked in.".into()))
    }
}
