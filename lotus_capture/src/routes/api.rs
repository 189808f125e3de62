//! REST endpoints for inspecting and clearing stored history

use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use lotus_common::{constants, CapturedRequest, TabId};
use serde::Serialize;

/// Build the REST router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/tabs", get(get_tabs))
        .route("/api/tabs/{tab_id}/requests", get(get_requests))
        .route("/api/tabs/{tab_id}/requests/{request_id}", get(get_request))
        .route("/api/tabs/{tab_id}/clear", post(clear_requests))
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    service: String,
    version: String,
    protocol: String,
    tabs: usize,
    pending: usize,
    viewers: usize,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        service: constants::SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        protocol: constants::PROTOCOL_VERSION.to_string(),
        tabs: state.store.tab_ids().await.len(),
        pending: state.assembler.pending_count(),
        viewers: state.sessions.len(),
    })
}

/// Tabs that currently hold history
async fn get_tabs(State(state): State<AppState>) -> Json<Vec<TabId>> {
    Json(state.store.tab_ids().await)
}

/// Get a tab's history, oldest first
async fn get_requests(
    State(state): State<AppState>,
    Path(tab_id): Path<TabId>,
) -> Json<Vec<CapturedRequest>> {
    Json(state.store.get(tab_id).await)
}

/// Get a single request by ID
async fn get_request(
    State(state): State<AppState>,
    Path((tab_id, request_id)): Path<(TabId, String)>,
) -> Response {
    match state.store.get_request(tab_id, &request_id).await {
        Some(req) => Json(req).into_response(),
        None => (StatusCode::NOT_FOUND, "Request not found").into_response(),
    }
}

/// Clear a tab's history
async fn clear_requests(State(state): State<AppState>, Path(tab_id): Path<TabId>) -> StatusCode {
    state.store.clear(tab_id).await;
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use crate::routes::{self, test_support};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use lotus_common::CapturedRequest;
    use tower::ServiceExt;

    fn record(id: &str) -> CapturedRequest {
        CapturedRequest {
            request_id: id.to_string(),
            url: "https://example.com/".to_string(),
            method: "GET".to_string(),
            status: 200,
            status_text: String::new(),
            request_headers: Vec::new(),
            request_body: None,
            response_headers: Vec::new(),
            response_body: None,
            timestamp: Utc::now(),
        }
    }

    async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or_default())
    }

    #[tokio::test]
    async fn test_health_check() {
        let state = test_support::state();
        state.store.append(1, record("a")).await;

        let (status, body) = get_json(routes::router(state), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "lotus-capture");
        assert_eq!(body["tabs"], 1);
        assert_eq!(body["viewers"], 0);
    }

    #[tokio::test]
    async fn test_requests_endpoints() {
        let state = test_support::state();
        state.store.append(8, record("a")).await;
        state.store.append(8, record("b")).await;

        let (_, tabs) = get_json(routes::router(state.clone()), "/api/tabs").await;
        assert_eq!(tabs, serde_json::json!([8]));

        let (_, list) = get_json(routes::router(state.clone()), "/api/tabs/8/requests").await;
        assert_eq!(list.as_array().unwrap().len(), 2);
        assert_eq!(list[1]["requestId"], "b");

        let (status, one) = get_json(routes::router(state.clone()), "/api/tabs/8/requests/a").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(one["requestId"], "a");

        let (status, _) = get_json(routes::router(state), "/api/tabs/8/requests/zzz").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_clear_endpoint() {
        let state = test_support::state();
        state.store.append(8, record("a")).await;

        let response = routes::router(state.clone())
            .oneshot(
                Request::post("/api/tabs/8/clear")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.store.get(8).await.is_empty());
    }
}
