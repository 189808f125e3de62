//! Lotus Common - Shared wire protocol for the capture process and the inspector
//!
//! This crate contains the captured-request model, the lifecycle events the
//! host interception layer reports, and the messages exchanged over a tab's
//! session channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Browser tab identifier. Negative ids mark traffic with no associated tab.
pub type TabId = i64;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to deserialize message: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("Invalid channel name: {0}")]
    InvalidChannel(String),
}

/// A single HTTP header, kept as an ordered name/value pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderPair {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl HeaderPair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Collapse an ordered header list into a single-valued mapping.
    ///
    /// When a name repeats, the last value wins and earlier ones are lost.
    pub fn flatten(headers: &[HeaderPair]) -> BTreeMap<String, String> {
        headers
            .iter()
            .map(|h| (h.name.clone(), h.value.clone()))
            .collect()
    }

    /// Case-insensitive lookup of the first header with this name
    pub fn find<'a>(headers: &'a [HeaderPair], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Whether a captured header may be sent again when the request is re-issued
    pub fn is_forwardable(name: &str) -> bool {
        !constants::SKIPPED_REQUEST_HEADERS
            .iter()
            .any(|skipped| name.eq_ignore_ascii_case(skipped))
    }
}

/// One chunk of an uploaded request body
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadChunk {
    #[serde(default, with = "base64_serde", skip_serializing_if = "Option::is_none")]
    pub bytes: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Request body as reported by the interception layer: parsed form fields,
/// raw upload chunks, or an error describing why the body was unreadable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<UploadChunk>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RequestBody {
    pub fn from_form(fields: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            form_data: Some(fields),
            ..Self::default()
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            raw: Some(vec![UploadChunk {
                bytes: Some(bytes),
                file: None,
            }]),
            ..Self::default()
        }
    }

    /// Concatenate the raw chunks as (lossy) UTF-8. Returns `None` for
    /// form bodies and bodies without raw data.
    pub fn raw_text(&self) -> Option<String> {
        let chunks = self.raw.as_ref()?;
        let bytes: Vec<u8> = chunks
            .iter()
            .filter_map(|c| c.bytes.as_deref())
            .flatten()
            .copied()
            .collect();
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// A finalized HTTP request/response record for one tab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    /// Stable join key between the store, UPDATE messages and viewer selection.
    /// Records produced outside the capture process may omit it.
    #[serde(default)]
    pub request_id: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub request_headers: Vec<HeaderPair>,
    #[serde(default)]
    pub request_body: Option<RequestBody>,
    #[serde(default)]
    pub response_headers: Vec<HeaderPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CapturedRequest {
    /// Response `Content-Type`, if the server sent one
    pub fn content_type(&self) -> Option<&str> {
        HeaderPair::find(&self.response_headers, "content-type")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ============================================================================
// Lifecycle events (host interception layer -> capture process)
// ============================================================================

/// Request body observed before the request is sent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeforeRequest {
    pub tab_id: TabId,
    pub request_id: String,
    #[serde(default)]
    pub request_body: Option<RequestBody>,
}

/// Final request headers, just before they go on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeforeSendHeaders {
    pub tab_id: TabId,
    pub request_id: String,
    #[serde(default)]
    pub request_headers: Vec<HeaderPair>,
}

/// Response headers as received
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadersReceived {
    pub tab_id: TabId,
    pub request_id: String,
    #[serde(default)]
    pub response_headers: Vec<HeaderPair>,
}

/// Terminal event for a request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completed {
    pub tab_id: TabId,
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub status_code: u16,
    #[serde(default)]
    pub status_line: String,
    /// Milliseconds since the Unix epoch, as reported by the host
    #[serde(default)]
    pub time_stamp: Option<f64>,
}

/// One of the four lifecycle notifications for a single HTTP exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum LifecycleEvent {
    BeforeRequest(BeforeRequest),
    BeforeSendHeaders(BeforeSendHeaders),
    HeadersReceived(HeadersReceived),
    Completed(Completed),
}

impl LifecycleEvent {
    pub fn tab_id(&self) -> TabId {
        match self {
            LifecycleEvent::BeforeRequest(e) => e.tab_id,
            LifecycleEvent::BeforeSendHeaders(e) => e.tab_id,
            LifecycleEvent::HeadersReceived(e) => e.tab_id,
            LifecycleEvent::Completed(e) => e.tab_id,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            LifecycleEvent::BeforeRequest(e) => &e.request_id,
            LifecycleEvent::BeforeSendHeaders(e) => &e.request_id,
            LifecycleEvent::HeadersReceived(e) => &e.request_id,
            LifecycleEvent::Completed(e) => &e.request_id,
        }
    }

    /// Whether the event belongs to a real tab
    pub fn is_tab_traffic(&self) -> bool {
        self.tab_id() >= 0
    }
}

// ============================================================================
// Session channel messages
// ============================================================================

/// Capture process -> viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionMessage {
    /// Full history snapshot, sent right after the channel opens
    #[serde(rename = "INIT")]
    Init(Vec<CapturedRequest>),

    /// A record was appended
    #[serde(rename = "NEW")]
    New(CapturedRequest),

    /// A record was replaced (matched by request id)
    #[serde(rename = "UPDATE")]
    Update(CapturedRequest),

    #[serde(rename = "HEARTBEAT_ACK")]
    HeartbeatAck,
}

/// Viewer -> capture process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ViewerMessage {
    /// Wipe the tab's history
    #[serde(rename = "CLEAR")]
    Clear,

    #[serde(rename = "HEARTBEAT")]
    Heartbeat,
}

impl SessionMessage {
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Serialize)
    }

    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Deserialize)
    }
}

impl ViewerMessage {
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Serialize)
    }

    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Deserialize)
    }
}

/// Session channel name for a tab (e.g. "lotus-42")
pub fn channel_name(tab_id: TabId) -> String {
    format!("{}{}", constants::CHANNEL_PREFIX, tab_id)
}

/// Extract the tab id from a session channel name
pub fn parse_channel_name(name: &str) -> Result<TabId, ProtocolError> {
    name.strip_prefix(constants::CHANNEL_PREFIX)
        .and_then(|rest| rest.parse::<TabId>().ok())
        .filter(|tab| *tab >= 0)
        .ok_or_else(|| ProtocolError::InvalidChannel(name.to_string()))
}

/// Constants for the protocol
pub mod constants {
    /// Maximum number of records kept per tab
    pub const MAX_REQUESTS_PER_TAB: usize = 1000;

    /// Prefix of every session channel name
    pub const CHANNEL_PREFIX: &str = "lotus-";

    /// Key the whole store is written under in durable storage
    pub const STORAGE_KEY: &str = "lotusRequests";

    /// Viewer heartbeat interval
    pub const HEARTBEAT_INTERVAL_SECONDS: u64 = 30;

    /// How long the viewer waits for HEARTBEAT_ACK before reconnecting
    pub const HEARTBEAT_ACK_TIMEOUT_SECONDS: u64 = 5;

    /// Reconnect delay after the capture process closed the channel.
    /// A missed heartbeat reconnects immediately.
    pub const RECONNECT_DELAY_CLOSED_MS: u64 = 1000;

    /// Reconnect delay after a failed connect attempt
    pub const RECONNECT_DELAY_ERROR_MS: u64 = 2000;

    /// Close code sent to a viewer that another viewer took over from
    pub const SUPERSEDED_CLOSE_CODE: u16 = 4000;

    /// Captured request headers never forwarded when a request is re-issued;
    /// the HTTP client sets these itself
    pub const SKIPPED_REQUEST_HEADERS: &[&str] =
        &["host", "content-length", "accept-encoding", "connection", "transfer-encoding"];

    /// Content-type substrings that qualify a response for body capture
    pub const TEXT_CONTENT_MARKERS: &[&str] = &["json", "text", "xml", "javascript", "html"];

    /// Service name reported by the capture process health check
    pub const SERVICE_NAME: &str = "lotus-capture";

    /// Session protocol version
    pub const PROTOCOL_VERSION: &str = "1.0.0";
}

/// Serialization for optional byte chunks as base64
mod base64_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        s.map(|s| STANDARD.decode(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
