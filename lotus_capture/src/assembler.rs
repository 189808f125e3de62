//! Lifecycle assembler
//!
//! Lifecycle fragments for one request arrive as separate events keyed by a
//! transient request id. Partial state lives here until the completion event
//! turns it into a [`CapturedRequest`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lotus_common::{
    BeforeRequest, BeforeSendHeaders, CapturedRequest, Completed, HeaderPair, HeadersReceived,
    RequestBody, TabId,
};
use std::time::{Duration, Instant};

/// Fragments seen so far for one in-flight request
#[derive(Debug, Clone)]
struct PendingAssembly {
    tab_id: TabId,
    request_body: Option<RequestBody>,
    request_headers: Option<Vec<HeaderPair>>,
    response_headers: Option<Vec<HeaderPair>>,
    first_seen: Instant,
}

impl PendingAssembly {
    fn new(tab_id: TabId) -> Self {
        Self {
            tab_id,
            request_body: None,
            request_headers: None,
            response_headers: None,
            first_seen: Instant::now(),
        }
    }
}

/// Correlates lifecycle fragments by request id
#[derive(Default)]
pub struct Assembler {
    pending: DashMap<String, PendingAssembly>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request_body(&self, event: BeforeRequest) {
        if event.tab_id < 0 {
            return;
        }
        self.pending
            .entry(event.request_id)
            .or_insert_with(|| PendingAssembly::new(event.tab_id))
            .request_body = event.request_body;
    }

    pub fn record_request_headers(&self, event: BeforeSendHeaders) {
        if event.tab_id < 0 {
            return;
        }
        self.pending
            .entry(event.request_id)
            .or_insert_with(|| PendingAssembly::new(event.tab_id))
            .request_headers = Some(event.request_headers);
    }

    pub fn record_response_headers(&self, event: HeadersReceived) {
        if event.tab_id < 0 {
            return;
        }
        self.pending
            .entry(event.request_id)
            .or_insert_with(|| PendingAssembly::new(event.tab_id))
            .response_headers = Some(event.response_headers);
    }

    /// Finalize a request. The pending entry is removed before anything else
    /// happens, so it never outlives the completion event.
    pub fn complete(&self, event: Completed) -> Option<CapturedRequest> {
        if event.tab_id < 0 {
            return None;
        }

        let pending = self.pending.remove(&event.request_id).map(|(_, p)| p);
        if let Some(p) = &pending {
            if p.tab_id != event.tab_id {
                tracing::debug!(
                    "Request {} moved from tab {} to tab {}",
                    event.request_id,
                    p.tab_id,
                    event.tab_id
                );
            }
        }

        let (request_body, request_headers, response_headers) = match pending {
            Some(p) => (
                p.request_body,
                p.request_headers.unwrap_or_default(),
                p.response_headers.unwrap_or_default(),
            ),
            None => (None, Vec::new(), Vec::new()),
        };

        let timestamp = event
            .time_stamp
            .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(ms as i64))
            .unwrap_or_else(Utc::now);

        Some(CapturedRequest {
            request_id: event.request_id,
            url: event.url,
            method: event.method,
            status: event.status_code,
            status_text: event.status_line,
            request_headers,
            request_body,
            response_headers,
            response_body: None,
            timestamp,
        })
    }

    /// Number of requests still waiting for their completion event
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop pending entries whose completion never arrived
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(max_age) else {
            return 0;
        };
        let before = self.pending.len();
        self.pending.retain(|request_id, p| {
            if p.first_seen < cutoff {
                tracing::warn!(
                    "Dropping stale pending request {} for tab {}",
                    request_id,
                    p.tab_id
                );
                false
            } else {
                true
            }
        });
        before.saturating_sub(self.pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Vec<HeaderPair> {
        pairs.iter().map(|(n, v)| HeaderPair::new(*n, *v)).collect()
    }

    fn body_event(tab_id: TabId, id: &str, text: &str) -> BeforeRequest {
        BeforeRequest {
            tab_id,
            request_id: id.to_string(),
            request_body: Some(RequestBody::from_bytes(text.as_bytes().to_vec())),
        }
    }

    fn request_headers(tab_id: TabId, id: &str, h: Vec<HeaderPair>) -> BeforeSendHeaders {
        BeforeSendHeaders {
            tab_id,
            request_id: id.to_string(),
            request_headers: h,
        }
    }

    fn response_headers(tab_id: TabId, id: &str, h: Vec<HeaderPair>) -> HeadersReceived {
        HeadersReceived {
            tab_id,
            request_id: id.to_string(),
            response_headers: h,
        }
    }

    fn completed(tab_id: TabId, id: &str, status: u16) -> Completed {
        Completed {
            tab_id,
            request_id: id.to_string(),
            url: "https://example.com/api".to_string(),
            method: "POST".to_string(),
            status_code: status,
            status_line: format!("HTTP/1.1 {}", status),
            time_stamp: Some(1_700_000_000_000.0),
        }
    }

    #[test]
    fn test_merges_all_fragments() {
        let assembler = Assembler::new();
        assembler.record_request_body(body_event(1, "r1", "a=1"));
        assembler.record_request_headers(request_headers(
            1,
            "r1",
            headers(&[("Content-Type", "application/json")]),
        ));
        assembler.record_response_headers(response_headers(
            1,
            "r1",
            headers(&[("Content-Type", "application/json")]),
        ));
        assert_eq!(assembler.pending_count(), 1);

        let record = assembler.complete(completed(1, "r1", 200)).unwrap();
        assert_eq!(record.request_id, "r1");
        assert_eq!(record.status, 200);
        assert_eq!(record.request_headers.len(), 1);
        assert_eq!(record.content_type(), Some("application/json"));
        assert_eq!(
            record.request_body.and_then(|b| b.raw_text()).as_deref(),
            Some("a=1")
        );
        assert_eq!(record.timestamp.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(assembler.pending_count(), 0);
    }

    #[test]
    fn test_completion_without_fragments_uses_defaults() {
        let assembler = Assembler::new();
        let record = assembler.complete(completed(1, "cached", 304)).unwrap();
        assert!(record.request_headers.is_empty());
        assert!(record.response_headers.is_empty());
        assert!(record.request_body.is_none());
        assert!(record.response_body.is_none());
    }

    #[test]
    fn test_last_fragment_of_each_kind_wins_in_any_order() {
        let first = headers(&[("X-Version", "1")]);
        let second = headers(&[("X-Version", "2"), ("X-Version", "2b")]);

        let assembler = Assembler::new();
        assembler.record_response_headers(response_headers(1, "r", headers(&[("A", "b")])));
        assembler.record_request_headers(request_headers(1, "r", first));
        assembler.record_request_body(body_event(1, "r", "old"));
        assembler.record_request_headers(request_headers(1, "r", second.clone()));
        assembler.record_request_body(body_event(1, "r", "new"));

        let record = assembler.complete(completed(1, "r", 200)).unwrap();
        assert_eq!(record.request_headers, second);
        assert_eq!(record.response_headers, headers(&[("A", "b")]));
        assert_eq!(
            record.request_body.and_then(|b| b.raw_text()).as_deref(),
            Some("new")
        );
    }

    #[test]
    fn test_interleaved_ids_stay_separate() {
        let assembler = Assembler::new();
        assembler.record_request_headers(request_headers(1, "a", headers(&[("X", "a")])));
        assembler.record_request_headers(request_headers(2, "b", headers(&[("X", "b")])));
        assembler.record_response_headers(response_headers(2, "b", headers(&[("Y", "b")])));

        let b = assembler.complete(completed(2, "b", 200)).unwrap();
        assert_eq!(b.request_headers, headers(&[("X", "b")]));
        assert_eq!(assembler.pending_count(), 1);

        let a = assembler.complete(completed(1, "a", 200)).unwrap();
        assert_eq!(a.request_headers, headers(&[("X", "a")]));
        assert!(a.response_headers.is_empty());
    }

    #[test]
    fn test_non_tab_traffic_is_ignored() {
        let assembler = Assembler::new();
        assembler.record_request_body(body_event(-1, "bg", "x"));
        assembler.record_request_headers(request_headers(-1, "bg", Vec::new()));
        assembler.record_response_headers(response_headers(-1, "bg", Vec::new()));
        assert_eq!(assembler.pending_count(), 0);
        assert!(assembler.complete(completed(-1, "bg", 200)).is_none());
    }

    #[test]
    fn test_sweep_stale_drops_abandoned_requests() {
        let assembler = Assembler::new();
        assembler.record_request_headers(request_headers(1, "hung", Vec::new()));

        assert_eq!(assembler.sweep_stale(Duration::from_secs(60)), 0);
        assert_eq!(assembler.pending_count(), 1);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(assembler.sweep_stale(Duration::from_millis(10)), 1);
        assert_eq!(assembler.pending_count(), 0);
    }
}
