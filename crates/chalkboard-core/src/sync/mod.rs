//! Wire protocol and transports for the shared board.
//!
//! Messages are JSON objects tagged by `"type"`. Drawing events travel as raw
//! JSON values so that each one can be decoded (or rejected) on its own.

mod memory;
mod native;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::event::ParticipantId;
use crate::event_log::AppendOutcome;

pub use memory::{MemoryRelay, MemoryTransport};
pub use native::NativeWebSocket;

/// Messages sent to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the board; the relay answers with `InitialState`.
    Join { participant: ParticipantId },
    /// Publish one drawing event.
    Draw { event: Value },
    /// Clear the board for everyone.
    Clear,
    Leave,
}

/// Messages received from the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full board history, sent once after `Join`.
    InitialState { events: Vec<Value>, peer_count: usize },
    /// An event published by another participant.
    Draw { from: String, event: Value },
    /// Another participant cleared the board.
    Clear { from: String },
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    Error { message: String },
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Raw events produced by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    /// A text frame from the relay.
    Message(String),
    Error { message: String },
}

/// What the sync adapter did with an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The bulk load replaced the local log.
    InitialState {
        /// Events loaded from the relay.
        loaded: usize,
        peer_count: usize,
        /// Incremental events that arrived early and were applied afterwards.
        deferred: usize,
        /// Offline events re-applied and re-published.
        replayed: usize,
    },
    /// A remote event was applied to the log.
    Draw { from: String, outcome: AppendOutcome },
    /// A remote event arrived before the initial state and is held back.
    Deferred { from: String },
    /// The board was cleared remotely.
    Cleared { from: String },
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    Error { message: String },
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Invalid WebSocket URL scheme: {0}")]
    InvalidScheme(String),
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Not connected")]
    NotConnected,
    #[error("Transport channel closed")]
    ChannelClosed,
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A bidirectional text channel to the relay. Never blocks the caller.
pub trait Transport {
    /// Queue a text frame for sending.
    fn send(&mut self, message: &str) -> Result<(), SyncError>;

    /// Drain events received since the last poll.
    fn poll_events(&mut self) -> Vec<TransportEvent>;

    fn state(&self) -> ConnectionState;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

/// Truncate a frame for logging.
pub(crate) fn preview(message: &str) -> &str {
    match message.char_indices().nth(100) {
        Some((end, _)) => &message[..end],
        None => message,
    }
}
