use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A subscriber webhook registered by an organization.
///
/// `Webhook` is read-only to this crate: registrations are created and
/// mutated elsewhere, and every mutation must be followed by
/// [`WebhookDirectory::invalidate`](crate::WebhookDirectory::invalidate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: WebhookId,

    /// Tenant partition key.
    pub organization_id: OrganizationId,

    /// Destination URL. Checked structurally on registration and again on
    /// every connect.
    pub url: String,

    /// Event types this webhook subscribes to. Empty means nothing matches.
    #[serde(default)]
    pub events: BTreeSet<String>,

    /// Extra request headers, applied after the defaults.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Shared secret for `X-Webhook-Signature`.
    #[serde(default)]
    pub secret: Option<String>,

    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    /// Create an active webhook with no subscriptions, headers or secret.
    pub fn new(
        id: impl Into<String>,
        organization_id: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: WebhookId(id.into()),
            organization_id: OrganizationId(organization_id.into()),
            url: url.into(),
            events: BTreeSet::new(),
            headers: BTreeMap::new(),
            secret: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Subscribe to the given event types.
    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events.extend(events.into_iter().map(Into::into));
        self
    }

    /// Add a custom header sent with every delivery.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the signing secret.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Mark the webhook as inactive.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Exact-match subscription check. No wildcards.
    pub fn subscribes_to(&self, event: &str) -> bool {
        self.events.contains(event)
    }

    /// Secret usable for signing, if any. Empty secrets count as absent.
    pub fn signing_secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }
}

/// Unique identifier for a webhook.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebhookId(pub String);

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for an organization (tenant).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(pub String);

impl OrganizationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrganizationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Body sent to every subscriber of one dispatch.
///
/// Field order is part of the wire format: `event`, `timestamp`, `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEnvelope<T> {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub data: T,
}

impl<T: Serialize> DispatchEnvelope<T> {
    pub fn new(event: impl Into<String>, data: T) -> Self {
        Self {
            event: event.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// Serialize once; the same bytes go to every target.
    pub fn to_bytes(&self) -> Result<bytes::Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(bytes::Bytes::from)
    }
}

/// One HTTP POST within a retry sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    /// Zero-based attempt index.
    pub index: u32,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Transport(String),
    Status(u16),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }
}
