//! Connection state machine and heartbeat tracking

use lotus_common::constants::{
    HEARTBEAT_ACK_TIMEOUT_SECONDS, HEARTBEAT_INTERVAL_SECONDS, RECONNECT_DELAY_CLOSED_MS,
    RECONNECT_DELAY_ERROR_MS,
};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Viewer-side connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The channel closed or a send failed
    Closed,
    /// The connection could not be established
    ConnectFailed,
    /// No HEARTBEAT_ACK arrived within the ack window
    HeartbeatTimeout,
    /// Another viewer took over the tab; no reconnect
    Superseded,
    /// The viewer is shutting down; no reconnect
    Shutdown,
}

/// Timing knobs for the session client
#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    pub heartbeat_interval: Duration,
    pub ack_timeout: Duration,
    pub reconnect_after_close: Duration,
    pub reconnect_after_error: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECONDS),
            ack_timeout: Duration::from_secs(HEARTBEAT_ACK_TIMEOUT_SECONDS),
            reconnect_after_close: Duration::from_millis(RECONNECT_DELAY_CLOSED_MS),
            reconnect_after_error: Duration::from_millis(RECONNECT_DELAY_ERROR_MS),
        }
    }
}

impl SessionTimings {
    /// Delay before the next connection attempt, `None` means stop
    pub fn reconnect_delay(&self, reason: DisconnectReason) -> Option<Duration> {
        match reason {
            DisconnectReason::Closed => Some(self.reconnect_after_close),
            DisconnectReason::ConnectFailed => Some(self.reconnect_after_error),
            DisconnectReason::HeartbeatTimeout => Some(Duration::ZERO),
            DisconnectReason::Superseded | DisconnectReason::Shutdown => None,
        }
    }
}

/// Tracks the outstanding heartbeat, if any
#[derive(Debug)]
pub struct HeartbeatTracker {
    ack_timeout: Duration,
    awaiting_since: Option<Instant>,
}

impl HeartbeatTracker {
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            ack_timeout,
            awaiting_since: None,
        }
    }

    /// A heartbeat went out; the connection is unhealthy until acked
    pub fn on_sent(&mut self, now: Instant) {
        self.awaiting_since = Some(now);
    }

    pub fn on_ack(&mut self) {
        self.awaiting_since = None;
    }

    pub fn is_healthy(&self) -> bool {
        self.awaiting_since.is_none()
    }

    /// When the outstanding heartbeat expires
    pub fn deadline(&self) -> Option<Instant> {
        self.awaiting_since.map(|sent| sent + self.ack_timeout)
    }
}
