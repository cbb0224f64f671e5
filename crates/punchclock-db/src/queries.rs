use crate::LocalStore;
use crate::models::ItemRow;
use anyhow::Result;
use punchclock_types::tables::CURRENT_USER_KEY;
use rusqlite::Connection;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

impl LocalStore {
    // -- Raw items --

    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| query_value(conn, key))
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO items (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                (key, value),
            )?;
            Ok(())
        })
    }

    pub fn remove_item(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM items WHERE key = ?1", [key])?;
            Ok(())
        })
    }

    pub fn items(&self) -> Result<Vec<ItemRow>> {
        self.with_conn(query_items)
    }

    // -- JSON values --

    /// Read and parse a JSON value.
    ///
    /// Malformed data is treated as absent: the key is cleared and `None`
    /// returned, so a corrupt entry never blocks the caller.
    pub fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get_item(key)? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Discarding malformed local data under '{}': {}", key, e);
                self.remove_item(key)?;
                Ok(None)
            }
        }
    }

    pub fn save_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set_item(key, &raw)
    }

    // -- Mocked session --

    pub fn current_user_id(&self) -> Result<Option<String>> {
        self.get_item(CURRENT_USER_KEY)
    }

    pub fn set_current_user_id(&self, user_id: &str) -> Result<()> {
        self.set_item(CURRENT_USER_KEY, user_id)
    }
}

fn query_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM items WHERE key = ?1")?;
    let mut rows = stmt.query([key])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

fn query_items(conn: &Connection) -> Result<Vec<ItemRow>> {
    let mut stmt = conn.prepare("SELECT key, value, updated_at FROM items ORDER BY key")?;

    let rows = stmt
        .query_map([], |row| {
            Ok(ItemRow {
                key: row.get(0)?,
                value: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}
