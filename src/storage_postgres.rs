#[cfg(feature = "postgres")]
use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "postgres")]
use async_trait::async_trait;
#[cfg(feature = "postgres")]
use chrono::{DateTime, Utc};
#[cfg(feature = "postgres")]
use tokio_postgres::{Client, Row};

#[cfg(feature = "postgres")]
use crate::error::StoreError;
#[cfg(feature = "postgres")]
use crate::storage::WebhookStore;
#[cfg(feature = "postgres")]
use crate::types::{OrganizationId, Webhook, WebhookId};

/// Reads webhook registrations from a `webhooks` table.
///
/// Expected columns: `id TEXT`, `organization_id TEXT`, `url TEXT`,
/// `events TEXT[]`, `headers JSONB`, `secret TEXT NULL`, `is_active BOOLEAN`,
/// `created_at TIMESTAMPTZ`, `updated_at TIMESTAMPTZ`.
#[cfg(feature = "postgres")]
pub struct PostgresWebhookStore {
    client: Client,
    table: String,
}

#[cfg(feature = "postgres")]
impl PostgresWebhookStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            table: "webhooks".to_string(),
        }
    }

    /// Read from a differently named table.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    fn webhook_from_row(row: &Row) -> Result<Webhook, StoreError> {
        let events: Vec<String> = row.try_get("events")?;
        let headers: Option<serde_json::Value> = row.try_get("headers")?;
        let headers: BTreeMap<String, String> = match headers {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| StoreError::Backend(format!("invalid headers column: {e}")))?,
            None => BTreeMap::new(),
        };
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

        Ok(Webhook {
            id: WebhookId(row.try_get("id")?),
            organization_id: OrganizationId(row.try_get("organization_id")?),
            url: row.try_get("url")?,
            events: events.into_iter().collect::<BTreeSet<_>>(),
            headers,
            secret: row.try_get("secret")?,
            is_active: row.try_get("is_active")?,
            created_at,
            updated_at,
        })
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl WebhookStore for PostgresWebhookStore {
    async fn active_webhooks(&self, org: &OrganizationId) -> Result<Vec<Webhook>, StoreError> {
        let query = format!(
            "SELECT id, organization_id, url, events, headers, secret, is_active, created_at, updated_at
             FROM {}
             WHERE organization_id = $1 AND is_active = true
             ORDER BY created_at",
            self.table
        );
        let rows = self.client.query(query.as_str(), &[&org.0]).await?;
        rows.iter().map(Self::webhook_from_row).collect()
    }
}
