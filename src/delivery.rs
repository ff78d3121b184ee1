use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use tracing::{debug, warn};
use url::Url;

use crate::config::DispatcherConfig;
use crate::error::{BuildError, DeliveryError};
use crate::signing::signature_header;
use crate::ssrf::{guard_literal_host, SafeDialer};
use crate::types::Webhook;

/// Response bytes read before a connection is given up instead of reused.
const MAX_DRAINED_BODY: usize = 64 * 1024;

/// Issues single, signed delivery attempts. Retries live in
/// [`retry`](crate::retry).
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    http: reqwest::Client,
    user_agent: HeaderValue,
    guard_literals: bool,
}

impl DeliveryClient {
    /// Client resolving through the system resolver.
    pub fn new(config: &DispatcherConfig) -> Result<Self, BuildError> {
        Self::with_dialer(config, SafeDialer::new())
    }

    /// Client resolving every connection through `dialer`.
    ///
    /// With `allow_private_networks` the dialer is not installed and no
    /// address is checked.
    pub fn with_dialer(config: &DispatcherConfig, dialer: SafeDialer) -> Result<Self, BuildError> {
        let user_agent = config.user_agent();
        let user_agent =
            HeaderValue::from_str(&user_agent).map_err(|_| BuildError::UserAgent(user_agent))?;

        let mut builder = reqwest::Client::builder()
            .timeout(config.attempt_timeout())
            .connect_timeout(config.connect_timeout())
            // A proxy would resolve the target itself, past the guarded resolver.
            .no_proxy()
            // A redirect is a non-2xx answer; following it would dial an
            // unvetted literal host.
            .redirect(reqwest::redirect::Policy::none());

        if !config.allow_private_networks {
            builder = builder.dns_resolver(Arc::new(dialer));
        }

        Ok(Self {
            http: builder.build()?,
            user_agent,
            guard_literals: !config.allow_private_networks,
        })
    }

    /// One POST of `payload` to `webhook.url`.
    ///
    /// Transport errors and statuses outside 2xx are failures. Up to 64 KiB
    /// of the response body is read and discarded; larger bodies are dropped
    /// unread along with their connection.
    pub async fn deliver(&self, webhook: &Webhook, payload: &Bytes) -> Result<(), DeliveryError> {
        let url = Url::parse(&webhook.url).map_err(|e| DeliveryError::InvalidUrl(e.to_string()))?;
        if self.guard_literals {
            guard_literal_host(&url)?;
        }

        let response = self
            .http
            .post(url)
            .headers(self.request_headers(webhook, payload))
            .body(payload.clone())
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        drain(response, webhook).await;

        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }

    /// Defaults, then the webhook's own headers, then the signature.
    pub(crate) fn request_headers(&self, webhook: &Webhook, payload: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, self.user_agent.clone());

        for (name, value) in &webhook.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(
                    webhook_id = %webhook.id,
                    header = %name,
                    "skipping invalid custom webhook header"
                ),
            }
        }

        if let Some((name, value)) = signature_header(webhook, payload) {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                headers.insert(name, value);
            }
        }

        headers
    }
}

async fn drain(mut response: reqwest::Response, webhook: &Webhook) {
    let mut read = 0;
    while read < MAX_DRAINED_BODY {
        match response.chunk().await {
            Ok(Some(chunk)) => read += chunk.len(),
            Ok(None) => return,
            Err(e) => {
                debug!(webhook_id = %webhook.id, error = %e, "failed to drain webhook response body");
                return;
            }
        }
    }
}

fn classify_transport(err: reqwest::Error) -> DeliveryError {
    if err.is_timeout() {
        DeliveryError::Timeout
    } else {
        DeliveryError::Transport(err)
    }
}
