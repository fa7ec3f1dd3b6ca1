//! In-process relay with the same semantics as the WebSocket server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::event::DrawEvent;
use crate::event_log::EventLog;

use super::{ClientMessage, ConnectionState, ServerMessage, SyncError, Transport, TransportEvent};

#[derive(Debug)]
struct PeerSlot {
    slot: u64,
    /// Set once the peer has sent `Join`.
    peer_id: Option<String>,
    inbox: VecDeque<TransportEvent>,
}

#[derive(Debug, Default)]
struct RelayState {
    history: EventLog,
    peers: Vec<PeerSlot>,
    next_slot: u64,
}

impl RelayState {
    fn peer_mut(&mut self, slot: u64) -> Option<&mut PeerSlot> {
        self.peers.iter_mut().find(|p| p.slot == slot)
    }

    fn send_to(&mut self, slot: u64, message: &ServerMessage) {
        let Ok(json) = serde_json::to_string(message) else {
            return;
        };
        if let Some(peer) = self.peer_mut(slot) {
            peer.inbox.push_back(TransportEvent::Message(json));
        }
    }

    /// Deliver to every joined peer except `from`.
    fn broadcast(&mut self, from: u64, message: &ServerMessage) {
        let Ok(json) = serde_json::to_string(message) else {
            return;
        };
        for peer in &mut self.peers {
            if peer.slot != from && peer.peer_id.is_some() {
                peer.inbox.push_back(TransportEvent::Message(json.clone()));
            }
        }
    }

    fn joined_count(&self) -> usize {
        self.peers.iter().filter(|p| p.peer_id.is_some()).count()
    }

    fn handle(&mut self, slot: u64, message: ClientMessage) {
        let from = self
            .peers
            .iter()
            .find(|p| p.slot == slot)
            .and_then(|p| p.peer_id.clone());

        match (message, from) {
            (ClientMessage::Join { participant }, _) => {
                let peer_id = participant.to_string();
                if let Some(peer) = self.peer_mut(slot) {
                    peer.peer_id = Some(peer_id.clone());
                }
                let events = self
                    .history
                    .compacted()
                    .iter()
                    .filter_map(|event| event.encode().ok())
                    .collect();
                let peer_count = self.joined_count();
                self.send_to(slot, &ServerMessage::InitialState { events, peer_count });
                self.broadcast(slot, &ServerMessage::PeerJoined { peer_id });
            }
            (ClientMessage::Draw { event }, Some(from)) => match DrawEvent::decode(event.clone()) {
                Ok(DrawEvent::ClearAll) => {
                    self.history.clear();
                    self.broadcast(slot, &ServerMessage::Clear { from });
                }
                Ok(decoded) => {
                    self.history.append(decoded);
                    self.broadcast(slot, &ServerMessage::Draw { from, event });
                }
                Err(e) => {
                    log::warn!("Relay rejected event from {}: {}", from, e);
                    self.send_to(
                        slot,
                        &ServerMessage::Error {
                            message: format!("Rejected event: {}", e),
                        },
                    );
                }
            },
            (ClientMessage::Clear, Some(from)) => {
                self.history.clear();
                self.broadcast(slot, &ServerMessage::Clear { from });
            }
            (ClientMessage::Leave, Some(peer_id)) => {
                if let Some(peer) = self.peer_mut(slot) {
                    peer.peer_id = None;
                }
                self.broadcast(slot, &ServerMessage::PeerLeft { peer_id });
            }
            (_, None) => {
                self.send_to(
                    slot,
                    &ServerMessage::Error {
                        message: "Not joined".to_string(),
                    },
                );
            }
        }
    }

    fn remove(&mut self, slot: u64) {
        let Some(index) = self.peers.iter().position(|p| p.slot == slot) else {
            return;
        };
        let peer = self.peers.remove(index);
        if let Some(peer_id) = peer.peer_id {
            self.broadcast(slot, &ServerMessage::PeerLeft { peer_id });
        }
    }
}

/// Shared board relay living in memory. Cloning shares the same board.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection to this relay.
    pub fn connect(&self) -> MemoryTransport {
        let mut transport = MemoryTransport {
            relay: self.clone(),
            slot: 0,
            state: ConnectionState::Disconnected,
            local: Vec::new(),
        };
        transport.reconnect();
        transport
    }

    /// Number of events the relay holds.
    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    pub fn peer_count(&self) -> usize {
        self.lock().joined_count()
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One connection to a [`MemoryRelay`]. Delivery happens on `poll_events`.
#[derive(Debug)]
pub struct MemoryTransport {
    relay: MemoryRelay,
    slot: u64,
    state: ConnectionState,
    /// Events raised on this side of the connection, delivered before the inbox.
    local: Vec<TransportEvent>,
}

impl MemoryTransport {
    /// Open a fresh connection after a disconnect.
    pub fn reconnect(&mut self) {
        if self.state == ConnectionState::Connected {
            return;
        }
        let mut relay = self.relay.lock();
        self.slot = relay.next_slot;
        relay.next_slot += 1;
        relay.peers.push(PeerSlot {
            slot: self.slot,
            peer_id: None,
            inbox: VecDeque::from([TransportEvent::Connected]),
        });
        self.state = ConnectionState::Connected;
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, message: &str) -> Result<(), SyncError> {
        if self.state != ConnectionState::Connected {
            return Err(SyncError::NotConnected);
        }
        let message: ClientMessage = serde_json::from_str(message)?;
        self.relay.lock().handle(self.slot, message);
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let mut events = std::mem::take(&mut self.local);
        if self.state == ConnectionState::Connected {
            if let Some(peer) = self.relay.lock().peer_mut(self.slot) {
                events.extend(peer.inbox.drain(..));
            }
        }
        events
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn disconnect(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        self.relay.lock().remove(self.slot);
        self.state = ConnectionState::Disconnected;
        self.local.push(TransportEvent::Disconnected);
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
