//! Per-tab viewer session over WebSocket

use crate::routes::AppState;
use crate::store::StoreEvent;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use lotus_common::{
    constants::SUPERSEDED_CLOSE_CODE, parse_channel_name, SessionMessage, TabId, ViewerMessage,
};
use tokio::sync::broadcast::error::RecvError;

/// Build the session router
pub fn router() -> Router<AppState> {
    Router::new().route("/ws/{channel}", get(ws_handler))
}

/// WebSocket upgrade handler; the channel name selects the tab
async fn ws_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let tab_id = match parse_channel_name(&channel) {
        Ok(tab_id) => tab_id,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    ws.on_upgrade(move |socket| handle_session(socket, state, tab_id))
}

/// Drive one viewer connection until it closes or is superseded
async fn handle_session(socket: WebSocket, state: AppState, tab_id: TabId) {
    let registration = state.sessions.register(tab_id);
    let connection_id = registration.connection_id;
    let mut superseded = registration.superseded;
    tracing::info!("Viewer {} connected to tab {}", connection_id, tab_id);

    // Subscribe before taking the snapshot so nothing falls in between
    let mut events = state.store.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let init = SessionMessage::Init(state.store.get(tab_id).await);
    if send_message(&mut sender, &init).await {
        loop {
            tokio::select! {
                _ = &mut superseded => {
                    tracing::debug!("Closing superseded viewer {} for tab {}", connection_id, tab_id);
                    let frame = CloseFrame {
                        code: SUPERSEDED_CLOSE_CODE,
                        reason: "superseded".into(),
                    };
                    let _ = sender.send(Message::Close(Some(frame))).await;
                    break;
                }

                event = events.recv() => {
                    let message = match event {
                        Ok(event) if event.tab_id() == tab_id => event.into_message(),
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                "Viewer for tab {} lagged by {} events, resending history",
                                tab_id,
                                skipped
                            );
                            SessionMessage::Init(state.store.get(tab_id).await)
                        }
                        Err(RecvError::Closed) => break,
                    };
                    if !send_message(&mut sender, &message).await {
                        break;
                    }
                }

                msg = receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !handle_viewer_message(&state, tab_id, text.as_str(), &mut sender).await {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            tracing::debug!("Viewer socket error on tab {}: {}", tab_id, e);
                            break;
                        }
                        // Pong is handled automatically by axum
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    state.sessions.unregister(tab_id, connection_id);
    tracing::info!("Viewer {} disconnected from tab {}", connection_id, tab_id);
}

/// React to a viewer message. Returns false once the socket is unusable.
async fn handle_viewer_message(
    state: &AppState,
    tab_id: TabId,
    text: &str,
    sender: &mut SplitSink<WebSocket, Message>,
) -> bool {
    match ViewerMessage::from_text(text) {
        Ok(ViewerMessage::Clear) => {
            state.store.clear(tab_id).await;
            true
        }
        Ok(ViewerMessage::Heartbeat) => send_message(sender, &SessionMessage::HeartbeatAck).await,
        Err(e) => {
            tracing::debug!("Ignoring unrecognized viewer message on tab {}: {}", tab_id, e);
            true
        }
    }
}

async fn send_message(sender: &mut SplitSink<WebSocket, Message>, message: &SessionMessage) -> bool {
    let text = match message.to_text() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to serialize session message: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
