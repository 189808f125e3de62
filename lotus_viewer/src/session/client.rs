//! WebSocket session client with heartbeat and automatic reconnect

use super::state::{ConnectionState, DisconnectReason, HeartbeatTracker, SessionTimings};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use lotus_common::{constants::SUPERSEDED_CLOSE_CODE, SessionMessage, ViewerMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// What the client reports to the inspector
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connecting,
    Connected,
    Disconnected(DisconnectReason),
    /// INIT, NEW or UPDATE from the capture process
    Message(SessionMessage),
}

impl SessionEvent {
    pub fn state(&self) -> Option<ConnectionState> {
        match self {
            SessionEvent::Connecting => Some(ConnectionState::Connecting),
            SessionEvent::Connected => Some(ConnectionState::Connected),
            SessionEvent::Disconnected(_) => Some(ConnectionState::Disconnected),
            SessionEvent::Message(_) => None,
        }
    }
}

/// Keeps one session channel open for as long as the inspector runs
pub struct SessionClient {
    url: String,
    timings: SessionTimings,
}

impl SessionClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timings: SessionTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: SessionTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Run the client on its own task. Dropping the returned sender shuts
    /// the client down.
    pub fn spawn(self) -> (mpsc::Receiver<SessionEvent>, mpsc::Sender<ViewerMessage>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        tokio::spawn(self.run(events_tx, outbound_rx));
        (events_rx, outbound_tx)
    }

    /// Connect, drive the session, and reconnect on every disconnect.
    /// There is no retry limit.
    pub async fn run(
        self,
        events: mpsc::Sender<SessionEvent>,
        mut outbound: mpsc::Receiver<ViewerMessage>,
    ) {
        loop {
            if events.send(SessionEvent::Connecting).await.is_err() {
                return;
            }

            let reason = match connect_async(self.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    tracing::info!("Connected to {}", self.url);
                    if events.send(SessionEvent::Connected).await.is_err() {
                        return;
                    }
                    self.drive(ws_stream, &events, &mut outbound).await
                }
                Err(e) => {
                    tracing::warn!("Failed to connect to {}: {}", self.url, e);
                    DisconnectReason::ConnectFailed
                }
            };

            let _ = events.send(SessionEvent::Disconnected(reason)).await;

            let Some(delay) = self.timings.reconnect_delay(reason) else {
                tracing::debug!("Session client stopped");
                return;
            };
            tracing::debug!("Reconnecting in {:?} ({:?})", delay, reason);
            tokio::time::sleep(delay).await;
        }
    }

    async fn drive(
        &self,
        ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        events: &mpsc::Sender<SessionEvent>,
        outbound: &mut mpsc::Receiver<ViewerMessage>,
    ) -> DisconnectReason {
        let (mut write, mut read) = ws_stream.split();

        let interval = self.timings.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        let mut tracker = HeartbeatTracker::new(self.timings.ack_timeout);

        loop {
            let ack_deadline = tracker.deadline();

            tokio::select! {
                _ = heartbeat.tick() => {
                    if !tracker.is_healthy() {
                        tracing::debug!("Previous heartbeat still unacknowledged");
                    }
                    if let Err(e) = send_message(&mut write, ViewerMessage::Heartbeat).await {
                        tracing::warn!("Error sending heartbeat: {}", e);
                        return DisconnectReason::Closed;
                    }
                    tracker.on_sent(Instant::now());
                }

                _ = wait_until(ack_deadline) => {
                    tracing::warn!(
                        "Heartbeat not acknowledged within {:?}, reconnecting",
                        self.timings.ack_timeout
                    );
                    let _ = write.send(Message::Close(None)).await;
                    return DisconnectReason::HeartbeatTimeout;
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match SessionMessage::from_text(text.as_str()) {
                                Ok(SessionMessage::HeartbeatAck) => tracker.on_ack(),
                                Ok(message) => {
                                    if events.send(SessionEvent::Message(message)).await.is_err() {
                                        return DisconnectReason::Shutdown;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!("Ignoring malformed session message: {}", e);
                                }
                            }
                        }
                        Some(Ok(Message::Close(Some(frame))))
                            if u16::from(frame.code) == SUPERSEDED_CLOSE_CODE =>
                        {
                            tracing::info!("Another viewer took over this tab");
                            return DisconnectReason::Superseded;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("Session channel closed");
                            return DisconnectReason::Closed;
                        }
                        Some(Err(e)) => {
                            tracing::warn!("Session channel error: {}", e);
                            return DisconnectReason::Closed;
                        }
                        Some(Ok(_)) => {}
                    }
                }

                msg = outbound.recv() => {
                    match msg {
                        Some(message) => {
                            if let Err(e) = send_message(&mut write, message).await {
                                tracing::warn!("Error sending {:?}: {}", message, e);
                                return DisconnectReason::Closed;
                            }
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            return DisconnectReason::Shutdown;
                        }
                    }
                }
            }
        }
    }
}

async fn send_message(write: &mut WsWrite, message: ViewerMessage) -> anyhow::Result<()> {
    let text = message.to_text()?;
    write.send(Message::Text(text.into())).await?;
    Ok(())
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{
            ws::{CloseFrame, Message as AxumMessage, WebSocket, WebSocketUpgrade},
            State,
        },
        response::Response,
        routing::get,
        Router,
    };
    use std::time::Duration;

    #[derive(Clone)]
    struct ServerState {
        ack_heartbeats: bool,
        supersede: bool,
        received: mpsc::UnboundedSender<String>,
    }

    async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
        ws.on_upgrade(move |socket| serve_session(socket, state))
    }

    async fn serve_session(mut socket: WebSocket, state: ServerState) {
        let init = SessionMessage::Init(Vec::new()).to_text().unwrap();
        if socket.send(AxumMessage::Text(init.into())).await.is_err() {
            return;
        }
        if state.supersede {
            let frame = CloseFrame {
                code: SUPERSEDED_CLOSE_CODE,
                reason: "superseded".into(),
            };
            let _ = socket.send(AxumMessage::Close(Some(frame))).await;
            return;
        }

        while let Some(Ok(msg)) = socket.recv().await {
            if let AxumMessage::Text(text) = msg {
                let text = text.to_string();
                let is_heartbeat =
                    matches!(ViewerMessage::from_text(&text), Ok(ViewerMessage::Heartbeat));
                let _ = state.received.send(text);
                if is_heartbeat && state.ack_heartbeats {
                    let ack = SessionMessage::HeartbeatAck.to_text().unwrap();
                    if socket.send(AxumMessage::Text(ack.into())).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn start_server(ack_heartbeats: bool) -> (String, mpsc::UnboundedReceiver<String>) {
        start_server_with(ack_heartbeats, false).await
    }

    async fn start_server_with(
        ack_heartbeats: bool,
        supersede: bool,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let (received, received_rx) = mpsc::unbounded_channel();
        let state = ServerState {
            ack_heartbeats,
            supersede,
            received,
        };
        let app = Router::new()
            .route("/ws/{channel}", get(ws_handler))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        (format!("ws://{}/ws/lotus-1", addr), received_rx)
    }

    fn fast_timings() -> SessionTimings {
        SessionTimings {
            heartbeat_interval: Duration::from_millis(50),
            ack_timeout: Duration::from_millis(150),
            reconnect_after_close: Duration::from_millis(10),
            reconnect_after_error: Duration::from_millis(20),
        }
    }

    async fn next(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("session client stopped")
    }

    #[tokio::test]
    async fn test_connects_and_receives_init() {
        let (url, _received) = start_server(true).await;
        let (mut events, _outbound) = SessionClient::new(url).with_timings(fast_timings()).spawn();

        assert_eq!(next(&mut events).await, SessionEvent::Connecting);
        assert_eq!(next(&mut events).await, SessionEvent::Connected);
        assert_eq!(
            next(&mut events).await,
            SessionEvent::Message(SessionMessage::Init(Vec::new()))
        );
    }

    #[tokio::test]
    async fn test_acknowledged_heartbeats_keep_session_open() {
        let (url, mut received) = start_server(true).await;
        let (mut events, _outbound) = SessionClient::new(url).with_timings(fast_timings()).spawn();
        for _ in 0..3 {
            next(&mut events).await;
        }

        let quiet = tokio::time::timeout(Duration::from_millis(500), events.recv()).await;
        assert!(quiet.is_err(), "unexpected event {:?}", quiet);

        let mut heartbeats = 0;
        while let Ok(text) = received.try_recv() {
            if text.contains("HEARTBEAT") {
                heartbeats += 1;
            }
        }
        assert!(heartbeats >= 2);
    }

    #[tokio::test]
    async fn test_missing_ack_triggers_reconnect() {
        let (url, _received) = start_server(false).await;
        let (mut events, _outbound) = SessionClient::new(url).with_timings(fast_timings()).spawn();
        for _ in 0..3 {
            next(&mut events).await;
        }

        assert_eq!(
            next(&mut events).await,
            SessionEvent::Disconnected(DisconnectReason::HeartbeatTimeout)
        );
        assert_eq!(next(&mut events).await, SessionEvent::Connecting);
        assert_eq!(next(&mut events).await, SessionEvent::Connected);
    }

    #[tokio::test]
    async fn test_superseded_close_stops_client() {
        let (url, _received) = start_server_with(true, true).await;
        let (mut events, _outbound) = SessionClient::new(url).with_timings(fast_timings()).spawn();
        for _ in 0..3 {
            next(&mut events).await;
        }

        assert_eq!(
            next(&mut events).await,
            SessionEvent::Disconnected(DisconnectReason::Superseded)
        );
        let end = tokio::time::timeout(Duration::from_secs(5), events.recv()).await;
        assert_eq!(end.unwrap(), None);
    }

    #[tokio::test]
    async fn test_connect_failure_retries() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (mut events, _outbound) = SessionClient::new(format!("ws://{}/ws/lotus-1", addr))
            .with_timings(fast_timings())
            .spawn();

        assert_eq!(next(&mut events).await, SessionEvent::Connecting);
        assert_eq!(
            next(&mut events).await,
            SessionEvent::Disconnected(DisconnectReason::ConnectFailed)
        );
        assert_eq!(next(&mut events).await, SessionEvent::Connecting);
    }

    #[tokio::test]
    async fn test_clear_is_sent_and_drop_shuts_down() {
        let (url, mut received) = start_server(true).await;
        let (mut events, outbound) = SessionClient::new(url).with_timings(fast_timings()).spawn();
        for _ in 0..3 {
            next(&mut events).await;
        }

        outbound.send(ViewerMessage::Clear).await.unwrap();
        let text = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let text = received.recv().await.unwrap();
                if !text.contains("HEARTBEAT") {
                    return text;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(ViewerMessage::from_text(&text).unwrap(), ViewerMessage::Clear);

        drop(outbound);
        assert_eq!(
            next(&mut events).await,
            SessionEvent::Disconnected(DisconnectReason::Shutdown)
        );
        assert!(events.recv().await.is_none());
    }
}
