//! Live session with the capture process

mod client;
mod state;

pub use client::{SessionClient, SessionEvent};
pub use state::{ConnectionState, DisconnectReason};
