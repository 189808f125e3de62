//! Lifecycle event ingress from the host interception layer

use crate::routes::AppState;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use lotus_common::LifecycleEvent;
use serde::Serialize;

/// Build the lifecycle router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/lifecycle", post(submit_event))
        .route("/api/lifecycle/batch", post(submit_batch))
}

/// What happened to one lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum IngestOutcome {
    /// Not associated with a tab
    Ignored,
    /// Fragment recorded, waiting for completion
    Pending,
    /// Finalized and appended to the tab's history
    Stored {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "bodyCapture")]
        body_capture: bool,
    },
}

/// Feed one event through the assembler, finalizing on completion
pub async fn ingest(state: &AppState, event: LifecycleEvent) -> IngestOutcome {
    if !event.is_tab_traffic() {
        return IngestOutcome::Ignored;
    }

    match event {
        LifecycleEvent::BeforeRequest(e) => {
            state.assembler.record_request_body(e);
            IngestOutcome::Pending
        }
        LifecycleEvent::BeforeSendHeaders(e) => {
            state.assembler.record_request_headers(e);
            IngestOutcome::Pending
        }
        LifecycleEvent::HeadersReceived(e) => {
            state.assembler.record_response_headers(e);
            IngestOutcome::Pending
        }
        LifecycleEvent::Completed(e) => {
            let tab_id = e.tab_id;
            let Some(request) = state.assembler.complete(e) else {
                return IngestOutcome::Ignored;
            };

            tracing::debug!(
                "Captured {} {} ({}) for tab {}",
                request.method,
                request.url,
                request.status,
                tab_id
            );

            let request_id = request.request_id.clone();
            state.store.append(tab_id, request.clone()).await;
            let body_capture = state
                .body_capture
                .spawn(state.store.clone(), tab_id, &request)
                .is_some();

            IngestOutcome::Stored {
                request_id,
                body_capture,
            }
        }
    }
}

/// Submit a single lifecycle event
async fn submit_event(
    State(state): State<AppState>,
    Json(event): Json<LifecycleEvent>,
) -> (StatusCode, Json<IngestOutcome>) {
    (StatusCode::ACCEPTED, Json(ingest(&state, event).await))
}

/// Submit events in delivery order
async fn submit_batch(
    State(state): State<AppState>,
    Json(events): Json<Vec<LifecycleEvent>>,
) -> (StatusCode, Json<Vec<IngestOutcome>>) {
    let mut outcomes = Vec::with_capacity(events.len());
    for event in events {
        outcomes.push(ingest(&state, event).await);
    }
    (StatusCode::ACCEPTED, Json(outcomes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::{self, test_support};
    use axum::body::Body;
    use axum::http::Request;
    use lotus_common::{BeforeSendHeaders, Completed, HeaderPair, HeadersReceived};
    use serde_json::json;
    use tower::ServiceExt;

    fn json_headers() -> Vec<HeaderPair> {
        vec![HeaderPair::new("Content-Type", "application/json")]
    }

    fn completed(tab_id: i64, id: &str, url: &str, status: u16) -> LifecycleEvent {
        LifecycleEvent::Completed(Completed {
            tab_id,
            request_id: id.to_string(),
            url: url.to_string(),
            method: "GET".to_string(),
            status_code: status,
            status_line: format!("HTTP/1.1 {} OK", status),
            time_stamp: None,
        })
    }

    #[tokio::test]
    async fn test_r1_scenario_stores_record_and_triggers_body_capture() {
        let mut state = test_support::state();
        state.body_capture =
            crate::body_capture::BodyCapture::new(std::time::Duration::from_secs(1), true)
                .unwrap();

        let headers = LifecycleEvent::BeforeSendHeaders(BeforeSendHeaders {
            tab_id: 5,
            request_id: "r1".to_string(),
            request_headers: json_headers(),
        });
        let received = LifecycleEvent::HeadersReceived(HeadersReceived {
            tab_id: 5,
            request_id: "r1".to_string(),
            response_headers: json_headers(),
        });

        assert_eq!(ingest(&state, headers).await, IngestOutcome::Pending);
        assert_eq!(ingest(&state, received).await, IngestOutcome::Pending);
        let outcome = ingest(&state, completed(5, "r1", "http://127.0.0.1:9/api", 200)).await;

        assert_eq!(
            outcome,
            IngestOutcome::Stored {
                request_id: "r1".to_string(),
                body_capture: true,
            }
        );
        let history = state.store.get(5).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].request_id, "r1");
        assert_eq!(history[0].status, 200);
        assert_eq!(state.assembler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_non_tab_events_are_ignored() {
        let state = test_support::state();
        let outcome = ingest(&state, completed(-1, "bg", "https://example.com", 200)).await;
        assert_eq!(outcome, IngestOutcome::Ignored);
        assert!(state.store.tab_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_post_lifecycle_event() {
        let state = test_support::state();
        let app = routes::router(state.clone());

        let body = json!({
            "event": "completed",
            "tabId": 2,
            "requestId": "r7",
            "url": "https://example.com/",
            "method": "GET",
            "statusCode": 200,
            "statusLine": "HTTP/1.1 200 OK"
        });
        let response = app
            .oneshot(
                Request::post("/api/lifecycle")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let outcome: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(outcome["outcome"], "stored");
        assert_eq!(outcome["requestId"], "r7");
        assert_eq!(outcome["bodyCapture"], false);
        assert_eq!(state.store.get(2).await.len(), 1);
    }

    #[tokio::test]
    async fn test_post_batch_in_order() {
        let state = test_support::state();
        let app = routes::router(state.clone());

        let body = json!([
            {"event": "beforeSendHeaders", "tabId": 1, "requestId": "a",
             "requestHeaders": [{"name": "Accept", "value": "*/*"}]},
            {"event": "completed", "tabId": 1, "requestId": "a", "url": "https://e.com/a",
             "method": "GET", "statusCode": 404},
            {"event": "completed", "tabId": -1, "requestId": "b", "url": "https://e.com/b",
             "method": "GET", "statusCode": 200}
        ]);
        let response = app
            .oneshot(
                Request::post("/api/lifecycle/batch")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let history = state.store.get(1).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].request_headers[0].name, "Accept");
        assert_eq!(history[0].status, 404);
    }

    #[tokio::test]
    async fn test_malformed_event_is_rejected() {
        let app = routes::router(test_support::state());
        let response = app
            .oneshot(
                Request::post("/api/lifecycle")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"event":"teleported"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
