//! `PostgREST` (Supabase) user store

use async_trait::async_trait;
use portal_core::PortalUser;
use serde_json::{Map, Value};
use tracing::debug;

use super::UserStore;
use crate::config::PostgrestConfig;
use crate::{Error, Result};

/// Looks users up with `GET /rest/v1/{table}?{column}=eq.{id}&select=*&limit=1`
pub struct PostgrestUserStore {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    column: String,
}

impl PostgrestUserStore {
    /// Create a store for the configured table
    #[must_use]
    pub fn new(http: reqwest::Client, config: &PostgrestConfig) -> Self {
        Self {
            http,
            endpoint: format!(
                "{}/rest/v1/{}",
                config.url.trim_end_matches('/'),
                config.table
            ),
            api_key: config.api_key.clone(),
            column: config.external_id_column.clone(),
        }
    }
}

/// Render a JSON scalar as a string; ids may be numeric or uuid
fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn row_to_user(row: &Map<String, Value>, column: &str) -> Result<PortalUser> {
    let id = scalar(row.get("id"))
        .ok_or_else(|| Error::UserStore("user row has no id".to_string()))?;

    Ok(PortalUser {
        id,
        username: scalar(row.get("username")).unwrap_or_default(),
        name: scalar(row.get("name")).unwrap_or_default(),
        role: scalar(row.get("role")),
        external_id: scalar(row.get(column)),
    })
}

#[async_trait]
impl UserStore for PostgrestUserStore {
    async fn get_user_by_external_id(&self, external_id: &str) -> Result<Option<PortalUser>> {
        let filter = format!("eq.{external_id}");
        let mut request = self.http.get(&self.endpoint).query(&[
            (self.column.as_str(), filter.as_str()),
            ("select", "*"),
            ("limit", "1"),
        ]);
        if !self.api_key.is_empty() {
            request = request
                .header("apikey", &self.api_key)
                .bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UserStore(format!(
                "user lookup failed: HTTP {status} - {body}"
            )));
        }

        let rows: Vec<Map<String, Value>> = response.json().await?;
        debug!(rows = rows.len(), "User lookup by external id");

        rows.first()
            .map(|row| row_to_user(row, &self.column))
            .transpose()
    }

    fn backend_name(&self) -> &'static str {
        "postgrest"
    }
}
