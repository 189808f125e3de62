//! Best-effort response body capture
//!
//! Lifecycle events never carry response bodies, so qualifying records are
//! enriched by issuing the request a second time and storing whatever comes
//! back. This is a separate request: for non-idempotent endpoints the stored
//! body may not match what the page actually received.

use crate::store::CaptureStore;
use anyhow::{Context, Result};
use lotus_common::{constants::TEXT_CONTENT_MARKERS, CapturedRequest, HeaderPair, TabId};
use reqwest::{Client, Method};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Whether a finalized record qualifies for body capture
pub fn should_capture(request: &CapturedRequest) -> bool {
    let Some(content_type) = request.content_type() else {
        return false;
    };
    request.is_success()
        && TEXT_CONTENT_MARKERS
            .iter()
            .any(|marker| content_type.contains(marker))
}

/// Issues the secondary fetches
#[derive(Clone)]
pub struct BodyCapture {
    client: Client,
    enabled: bool,
}

impl BodyCapture {
    pub fn new(timeout: Duration, enabled: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, enabled })
    }

    /// Start a capture for this record if it qualifies. The fetch is never
    /// cancelled; if the record is gone by the time it resolves, the body is
    /// dropped.
    pub fn spawn(
        &self,
        store: Arc<CaptureStore>,
        tab_id: TabId,
        request: &CapturedRequest,
    ) -> Option<JoinHandle<bool>> {
        if !self.enabled || !should_capture(request) {
            return None;
        }

        let this = self.clone();
        let request = request.clone();
        Some(tokio::spawn(async move {
            this.capture(&store, tab_id, &request).await
        }))
    }

    /// Fetch the body and attach it to the stored record. Returns whether the
    /// record was updated.
    pub async fn capture(&self, store: &CaptureStore, tab_id: TabId, request: &CapturedRequest) -> bool {
        let body = match self.fetch_body(request).await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(
                    "Failed to capture response body for {}: {:#}",
                    request.request_id,
                    e
                );
                return false;
            }
        };

        let updated = store
            .set_response_body(tab_id, &request.request_id, body)
            .await;
        if !updated {
            tracing::debug!(
                "Request {} left tab {} before its body arrived",
                request.request_id,
                tab_id
            );
        }
        updated
    }

    async fn fetch_body(&self, request: &CapturedRequest) -> Result<String> {
        let method = Method::from_bytes(request.method.as_bytes())
            .with_context(|| format!("Invalid method {:?}", request.method))?;

        let mut builder = self.client.request(method, &request.url);

        for (name, value) in HeaderPair::flatten(&request.request_headers) {
            if HeaderPair::is_forwardable(&name) {
                builder = builder.header(name, value);
            }
        }

        if let Some(body) = &request.request_body {
            let encoded = serde_json::to_string(body).context("Failed to encode request body")?;
            builder = builder.body(encoded);
        }

        let response = builder.send().await.context("Body capture request failed")?;
        response
            .text()
            .await
            .context("Failed to read response body as text")
    }
}
