//! CRUD facade over the hosted backend with a local-storage fallback.
//!
//! Reads try the hosted backend first and refresh the local mirror; when the
//! backend fails or none is configured they are served from the mirror.
//! Writes go to the backend when there is one (its failure is the caller's
//! failure) and are then mirrored locally; without a backend they only hit
//! local storage. Entity-specific operations live in sibling modules as
//! further `impl Facade` blocks.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use punchclock_db::LocalStore;
use punchclock_types::tables::Table;

use crate::backend::{BackendError, Filter, HostedBackend, merge_patch, row_id};

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Local storage error: {0}")]
    Local(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("No signed-in user")]
    NoCurrentUser,

    #[error("{0}")]
    InvalidOperation(String),
}

impl From<anyhow::Error> for FacadeError {
    fn from(e: anyhow::Error) -> Self {
        FacadeError::Local(e.to_string())
    }
}

impl FacadeError {
    /// Short message fit for showing to the person using the app.
    pub fn user_message(&self) -> String {
        match self {
            Self::Backend(BackendError::NotFound(_)) | Self::NotFound(_) => {
                "That record no longer exists.".into()
            }
            Self::Backend(_) => "Could not reach the server. Please try again.".into(),
            Self::Local(_) | Self::Serialization(_) => "Could not save your changes locally.".into(),
            Self::NoCurrentUser => "Please sign in first.".into(),
            Self::InvalidOperation(reason) => reason.clone(),
        }
    }
}

pub struct Facade {
    hosted: Option<Arc<dyn HostedBackend>>,
    local: Arc<LocalStore>,
}

impl Facade {
    pub fn new(hosted: Option<Arc<dyn HostedBackend>>, local: Arc<LocalStore>) -> Self {
        Self { hosted, local }
    }

    /// Facade without a hosted backend: everything lives in local storage.
    pub fn local_only(local: Arc<LocalStore>) -> Self {
        Self::new(None, local)
    }

    pub fn is_hosted(&self) -> bool {
        self.hosted.is_some()
    }

    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    // -- Session --

    pub async fn current_user_id(&self) -> Result<String, FacadeError> {
        self.with_local(|store| store.current_user_id())
            .await?
            .ok_or(FacadeError::NoCurrentUser)
    }

    pub async fn sign_in_as(&self, user_id: &str) -> Result<(), FacadeError> {
        let user_id = user_id.to_string();
        self.with_local(move |store| store.set_current_user_id(&user_id))
            .await
    }

    // -- Generic operations --

    /// Rows of `table` matching `filter`. Rows that fail to decode are
    /// skipped with a warning.
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        table: Table,
        filter: &Filter,
    ) -> Result<Vec<T>, FacadeError> {
        let rows = self.fetch_rows(table, filter).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping malformed {} row: {}", table, e);
                    None
                }
            })
            .collect())
    }

    pub async fn fetch_one<T: DeserializeOwned>(&self, table: Table, id: &str) -> Result<T, FacadeError> {
        self.fetch_all(table, &Filter::eq("id", id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FacadeError::NotFound(format!("{}/{}", table, id)))
    }

    pub async fn insert<T>(&self, table: Table, record: &T) -> Result<T, FacadeError>
    where
        T: Serialize + DeserializeOwned,
    {
        let row = serde_json::to_value(record)?;
        let stored = match &self.hosted {
            Some(hosted) => hosted.insert(table, row).await?,
            None => row,
        };
        self.mirror_upsert(table, stored.clone()).await?;
        Ok(serde_json::from_value(stored)?)
    }

    /// Apply `patch` to the record with `id` and return the updated record.
    pub async fn update<T: DeserializeOwned>(
        &self,
        table: Table,
        id: &str,
        patch: Value,
    ) -> Result<T, FacadeError> {
        let updated = match &self.hosted {
            Some(hosted) => {
                let row = hosted.update(table, id, patch).await?;
                self.mirror_upsert(table, row.clone()).await?;
                row
            }
            None => self.local_update(table, id, patch).await?,
        };
        Ok(serde_json::from_value(updated)?)
    }

    pub async fn delete(&self, table: Table, id: &str) -> Result<(), FacadeError> {
        if let Some(hosted) = &self.hosted {
            hosted.delete(table, id).await?;
        }
        let id = id.to_string();
        let removed = self
            .with_local(move |store| {
                let mut rows = read_mirror(store, table)?;
                let before = rows.len();
                rows.retain(|r| row_id(r).as_deref() != Some(id.as_str()));
                let removed = rows.len() != before;
                store.save_json(table.local_key(), &rows)?;
                Ok(removed)
            })
            .await;
        match removed {
            Ok(_) if self.is_hosted() => Ok(()),
            Ok(true) => Ok(()),
            Ok(false) => Err(FacadeError::NotFound(table.to_string())),
            Err(e) if self.is_hosted() => {
                warn!("Local mirror of {} not updated after delete: {}", table, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // -- Internals --

    async fn fetch_rows(&self, table: Table, filter: &Filter) -> Result<Vec<Value>, FacadeError> {
        if let Some(hosted) = &self.hosted {
            match hosted.fetch_all(table, filter).await {
                Ok(rows) => {
                    self.refresh_mirror(table, filter, &rows).await;
                    return Ok(rows);
                }
                Err(e) => warn!("Fetching {} from backend failed, using local copy: {}", table, e),
            }
        }

        let filter = filter.clone();
        self.with_local(move |store| {
            Ok(read_mirror(store, table)?
                .into_iter()
                .filter(|row| filter.matches(row))
                .collect())
        })
        .await
    }

    /// Replace the mirrored rows covered by `filter` with a fresh result.
    async fn refresh_mirror(&self, table: Table, filter: &Filter, fresh: &[Value]) {
        let filter = filter.clone();
        let fresh = fresh.to_vec();
        let result = self
            .with_local(move |store| {
                let mut rows = read_mirror(store, table)?;
                rows.retain(|row| !filter.matches(row));
                rows.extend(fresh);
                store.save_json(table.local_key(), &rows)
            })
            .await;
        if let Err(e) = result {
            warn!("Could not refresh local copy of {}: {}", table, e);
        }
    }

    /// Insert or replace one row in the local mirror. With a hosted backend
    /// a local failure is only logged; without one it is the write's failure.
    async fn mirror_upsert(&self, table: Table, row: Value) -> Result<(), FacadeError> {
        let result = self
            .with_local(move |store| {
                let mut rows = read_mirror(store, table)?;
                upsert_row(&mut rows, row);
                store.save_json(table.local_key(), &rows)
            })
            .await;
        match result {
            Err(e) if self.is_hosted() => {
                warn!("Local mirror of {} not updated: {}", table, e);
                Ok(())
            }
            other => other,
        }
    }

    async fn local_update(&self, table: Table, id: &str, patch: Value) -> Result<Value, FacadeError> {
        let id = id.to_string();
        let updated = self
            .with_local(move |store| {
                let mut rows = read_mirror(store, table)?;
                let Some(row) = rows
                    .iter_mut()
                    .find(|r| row_id(r).as_deref() == Some(id.as_str()))
                else {
                    return Ok(None);
                };
                merge_patch(row, &patch);
                let updated = row.clone();
                store.save_json(table.local_key(), &rows)?;
                Ok(Some(updated))
            })
            .await?;
        updated.ok_or_else(|| FacadeError::NotFound(table.to_string()))
    }

    /// Run blocking local-store work off the async runtime.
    async fn with_local<F, T>(&self, f: F) -> Result<T, FacadeError>
    where
        F: FnOnce(&LocalStore) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.local.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                FacadeError::Local(e.to_string())
            })?
            .map_err(FacadeError::from)
    }
}

fn read_mirror(store: &LocalStore, table: Table) -> anyhow::Result<Vec<Value>> {
    Ok(store
        .load_json::<Vec<Value>>(table.local_key())?
        .unwrap_or_default())
}

fn upsert_row(rows: &mut Vec<Value>, row: Value) {
    let id = row_id(&row);
    match rows.iter_mut().find(|r| id.is_some() && row_id(r) == id) {
        Some(existing) => *existing = row,
        None => {
            debug!("Mirroring new row {:?}", id);
            rows.push(row);
        }
    }
}
