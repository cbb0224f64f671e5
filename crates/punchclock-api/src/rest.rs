//! PostgREST-style HTTP backend.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;

use punchclock_types::tables::Table;

use crate::backend::{BackendError, Filter, HostedBackend};

pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestBackend {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.name())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

/// Query pairs for a filter: `select=*` plus one `col=eq.value` per condition.
fn filter_query(filter: &Filter) -> Vec<(String, String)> {
    let mut query = vec![("select".to_string(), "*".to_string())];
    query.extend(
        filter
            .conditions()
            .iter()
            .map(|(column, value)| (column.clone(), format!("eq.{}", value))),
    );
    query
}

fn id_query(id: &str) -> [(&'static str, String); 1] {
    [("id", format!("eq.{}", id))]
}

async fn checked(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(BackendError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl HostedBackend for RestBackend {
    async fn fetch_all(&self, table: Table, filter: &Filter) -> Result<Vec<Value>, BackendError> {
        let response = self
            .authorized(self.client.get(self.table_url(table)))
            .query(&filter_query(filter))
            .send()
            .await?;
        let rows: Vec<Value> = checked(response).await?.json().await?;
        debug!("Fetched {} rows from {}", rows.len(), table);
        Ok(rows)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, BackendError> {
        let response = self
            .authorized(self.client.post(self.table_url(table)))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let rows: Vec<Value> = checked(response).await?.json().await?;
        rows.into_iter().next().ok_or_else(|| BackendError::Rejected {
            status: 200,
            message: format!("insert into {} returned no row", table),
        })
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value, BackendError> {
        let response = self
            .authorized(self.client.patch(self.table_url(table)))
            .query(&id_query(id))
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;
        let rows: Vec<Value> = checked(response).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("{}/{}", table, id)))
    }

    async fn delete(&self, table: Table, id: &str) -> Result<(), BackendError> {
        let response = self
            .authorized(self.client.delete(self.table_url(table)))
            .query(&id_query(id))
            .send()
            .await?;
        checked(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_and_filters_follow_postgrest_conventions() {
        let backend = RestBackend::new("https://acme.example.co/", "key");
        assert_eq!(
            backend.table_url(Table::SalaryRecords),
            "https://acme.example.co/rest/v1/salary_records"
        );

        let query = filter_query(&Filter::eq("user_id", "7").and("status", "pending"));
        assert_eq!(
            query,
            vec![
                ("select".to_string(), "*".to_string()),
                ("user_id".to_string(), "eq.7".to_string()),
                ("status".to_string(), "eq.pending".to_string()),
            ]
        );
        assert_eq!(id_query("r1")[0].1, "eq.r1");
    }

    #[test]
    fn requests_carry_both_auth_headers() {
        let backend = RestBackend::new("http://localhost:54321", "secret");
        let request = backend
            .authorized(backend.client.get(backend.table_url(Table::Notifications)))
            .build()
            .unwrap();
        assert_eq!(request.headers()["apikey"], "secret");
        assert_eq!(request.headers()["authorization"], "Bearer secret");
    }
}
