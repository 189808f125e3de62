//! Replaying a captured request with user edits

use crate::format::{format_request_body, format_text_content, headers_to_json};
use crate::mirror::ViewerRequest;
use chrono::Utc;
use lotus_common::{CapturedRequest, HeaderPair, RequestBody};
use reqwest::{Client, Method};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Invalid JSON in headers field: {0}")]
    InvalidHeaders(#[source] serde_json::Error),

    #[error("Headers must be a JSON object")]
    HeadersNotObject,

    #[error("Invalid method: {0:?}")]
    InvalidMethod(String),

    #[error("Request {0} has no stable id and cannot be replayed")]
    UnstableSource(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Editable copy of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayDraft {
    pub method: String,
    pub url: String,
    /// JSON object of header name to value
    pub headers: String,
    pub body: String,
}

impl ReplayDraft {
    pub fn from_request(request: &ViewerRequest) -> Self {
        Self {
            method: request.record.method.clone(),
            url: request.record.url.clone(),
            headers: headers_to_json(&forwardable(&request.record.request_headers)),
            body: format_request_body(request.record.request_body.as_ref()),
        }
    }

    /// Parse the header field. Non-string values are sent as their JSON text.
    pub fn parse_headers(&self) -> Result<Vec<HeaderPair>, ReplayError> {
        let text = self.headers.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let value: Value = serde_json::from_str(text).map_err(ReplayError::InvalidHeaders)?;
        let Value::Object(map) = value else {
            return Err(ReplayError::HeadersNotObject);
        };

        Ok(map
            .into_iter()
            .map(|(name, value)| match value {
                Value::String(value) => HeaderPair::new(name, value),
                other => HeaderPair::new(name, other.to_string()),
            })
            .collect())
    }

    pub fn parse_method(&self) -> Result<Method, ReplayError> {
        let method = self.method.trim().to_uppercase();
        Method::from_bytes(method.as_bytes()).map_err(|_| ReplayError::InvalidMethod(self.method.clone()))
    }
}

fn forwardable(headers: &[HeaderPair]) -> Vec<HeaderPair> {
    headers
        .iter()
        .filter(|h| HeaderPair::is_forwardable(&h.name))
        .cloned()
        .collect()
}

/// Executes replays
#[derive(Clone)]
pub struct Replayer {
    client: Client,
}

impl Replayer {
    pub fn new() -> Result<Self, ReplayError> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }

    /// Send the draft and build a modified record from the response. The
    /// draft is validated before anything goes out.
    pub async fn execute(
        &self,
        source: &ViewerRequest,
        draft: &ReplayDraft,
    ) -> Result<ViewerRequest, ReplayError> {
        if !source.has_stable_id() {
            return Err(ReplayError::UnstableSource(source.id.clone()));
        }
        let headers = forwardable(&draft.parse_headers()?);
        let method = draft.parse_method()?;
        let url = draft.url.trim().to_string();

        let mut builder = self.client.request(method.clone(), &url);
        for header in &headers {
            builder = builder.header(&header.name, &header.value);
        }

        let sends_body = method != Method::GET && method != Method::HEAD;
        if sends_body {
            builder = builder.body(draft.body.clone());
        }

        tracing::debug!("Replaying {} {} (from {})", method, url, source.id);
        let response = builder.send().await?;

        let status = response.status();
        let response_headers: Vec<HeaderPair> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                HeaderPair::new(name.as_str(), String::from_utf8_lossy(value.as_bytes()))
            })
            .collect();
        let is_json = HeaderPair::find(&response_headers, "content-type")
            .is_some_and(|ct| ct.contains("json"));

        let text = response.text().await?;
        let response_body = if is_json {
            format_text_content(&text)
        } else {
            text
        };

        let record = CapturedRequest {
            request_id: String::new(),
            url,
            method: method.to_string(),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            request_headers: headers,
            request_body: sends_body.then(|| RequestBody::from_bytes(draft.body.clone().into_bytes())),
            response_headers,
            response_body: Some(response_body),
            timestamp: Utc::now(),
        };

        Ok(ViewerRequest::replay_of(&source.id, record))
    }
}
