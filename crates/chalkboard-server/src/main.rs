//! Chalkboard WebSocket Relay Server
//!
//! Holds the single shared board in memory and relays drawing events between
//! every connected participant.
//!
//! ## Protocol
//!
//! Messages are JSON with the following format:
//! ```json
//! { "type": "join", "participant": "<uuid>" }
//! { "type": "draw", "event": { "type": "stroke", ... } }
//! { "type": "clear" }
//! ```

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use chalkboard_core::event::DrawEvent;
use chalkboard_core::event_log::EventLog;
use chalkboard_core::sync::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;
const DEFAULT_ADDR: &str = "0.0.0.0:3030";

/// The shared board.
struct BoardState {
    history: EventLog,
    /// Joined participants.
    peers: HashSet<String>,
}

/// Shared application state
struct AppState {
    board: Mutex<BoardState>,
    /// Fan-out to every connection; the sender id suppresses echo.
    tx: broadcast::Sender<(String, ServerMessage)>,
}

impl AppState {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            board: Mutex::new(BoardState {
                history: EventLog::new(),
                peers: HashSet::new(),
            }),
            tx,
        }
    }

    fn board(&self) -> MutexGuard<'_, BoardState> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a participant. Returns its broadcast receiver and the
    /// initial state to send it.
    fn join(&self, peer_id: &str) -> (broadcast::Receiver<(String, ServerMessage)>, ServerMessage) {
        let mut board = self.board();
        board.peers.insert(peer_id.to_string());
        let (rx, initial) = self.snapshot(&board);
        drop(board);

        self.broadcast(
            peer_id,
            ServerMessage::PeerJoined {
                peer_id: peer_id.to_string(),
            },
        );
        (rx, initial)
    }

    /// Fresh receiver plus the current board for a connection that fell
    /// behind the broadcast buffer.
    fn resync(&self) -> (broadcast::Receiver<(String, ServerMessage)>, ServerMessage) {
        let board = self.board();
        self.snapshot(&board)
    }

    /// Must be called with the board locked so no event falls between the
    /// snapshot and the new receiver.
    fn snapshot(&self, board: &BoardState) -> (broadcast::Receiver<(String, ServerMessage)>, ServerMessage) {
        let rx = self.tx.subscribe();
        let events = board
            .history
            .compacted()
            .iter()
            .filter_map(|event| event.encode().ok())
            .collect();
        let initial = ServerMessage::InitialState {
            events,
            peer_count: board.peers.len(),
        };
        (rx, initial)
    }

    fn leave(&self, peer_id: &str) {
        let removed = self.board().peers.remove(peer_id);
        if removed {
            self.broadcast(
                peer_id,
                ServerMessage::PeerLeft {
                    peer_id: peer_id.to_string(),
                },
            );
        }
    }

    /// Record and relay one event. Unknown or invalid events are rejected.
    fn draw(&self, peer_id: &str, event: Value) -> Result<(), String> {
        let decoded = DrawEvent::decode(event.clone()).map_err(|e| e.to_string())?;
        if decoded == DrawEvent::ClearAll {
            self.clear(peer_id);
            return Ok(());
        }

        let mut board = self.board();
        board.history.append(decoded);
        // Send under the lock so history order matches broadcast order.
        let _ = self.tx.send((
            peer_id.to_string(),
            ServerMessage::Draw {
                from: peer_id.to_string(),
                event,
            },
        ));
        Ok(())
    }

    fn clear(&self, peer_id: &str) {
        let mut board = self.board();
        board.history.clear();
        let _ = self.tx.send((
            peer_id.to_string(),
            ServerMessage::Clear {
                from: peer_id.to_string(),
            },
        ));
        info!("Board cleared by {}", peer_id);
    }

    /// Broadcast message to every other connection
    fn broadcast(&self, from: &str, msg: ServerMessage) {
        let _ = self.tx.send((from.to_string(), msg));
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chalkboard_server=info,tower_http=info".into()),
        )
        .init();

    let addr_str = std::env::var("CHALKBOARD_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let addr: SocketAddr = match addr_str.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid CHALKBOARD_ADDR {}: {}", addr_str, e);
            return;
        }
    };

    let state = Arc::new(AppState::new());

    let app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            return;
        }
    };
    info!("Chalkboard relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
    }
}

/// Index page
async fn index() -> &'static str {
    "Chalkboard Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn to_frame(msg: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            None
        }
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4().to_string();
    info!("New connection: {}", connection_id);

    let (mut sender, mut receiver) = socket.split();
    let mut peer_id: Option<String> = None;
    let mut board_rx: Option<broadcast::Receiver<(String, ServerMessage)>> = None;

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", connection_id, e);
                        break;
                    }
                };

                let current = peer_id.clone();
                let reply = match (serde_json::from_str::<ClientMessage>(&text), current.as_deref()) {
                    (Ok(ClientMessage::Join { participant }), _) => {
                        if let Some(old) = peer_id.take() {
                            state.leave(&old);
                        }
                        let id = participant.to_string();
                        let (rx, initial) = state.join(&id);
                        info!("Peer {} joined on {}", id, connection_id);
                        board_rx = Some(rx);
                        peer_id = Some(id);
                        Some(initial)
                    }
                    (Ok(ClientMessage::Draw { event }), Some(id)) => match state.draw(id, event) {
                        Ok(()) => None,
                        Err(e) => {
                            warn!("Rejected event from {}: {}", id, e);
                            Some(ServerMessage::Error { message: format!("Rejected event: {}", e) })
                        }
                    },
                    (Ok(ClientMessage::Clear), Some(id)) => {
                        state.clear(id);
                        None
                    }
                    (Ok(ClientMessage::Leave), Some(id)) => {
                        info!("Peer {} left", id);
                        state.leave(id);
                        peer_id = None;
                        board_rx = None;
                        None
                    }
                    (Ok(_), None) => Some(ServerMessage::Error { message: "Not joined".to_string() }),
                    (Err(e), _) => {
                        warn!("Invalid message from {}: {}", connection_id, e);
                        Some(ServerMessage::Error { message: format!("Invalid message: {}", e) })
                    }
                };

                if let Some(frame) = reply.as_ref().and_then(to_frame) {
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
            }

            // Handle broadcast messages from the board
            msg = async {
                match &mut board_rx {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                match msg {
                    Ok((from, server_msg)) => {
                        // Don't echo back to sender
                        if peer_id.as_deref() == Some(from.as_str()) {
                            continue;
                        }
                        if let Some(frame) = to_frame(&server_msg) {
                            if sender.send(frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // The client missed events; replace its board wholesale.
                        warn!("Connection {} lagged by {} messages, resending board", connection_id, skipped);
                        let (rx, initial) = state.resync();
                        board_rx = Some(rx);
                        if let Some(frame) = to_frame(&initial) {
                            if sender.send(frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    // Cleanup on disconnect
    if let Some(ref id) = peer_id {
        state.leave(id);
    }
    debug!("Connection closed: {}", connection_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chalkboard_core::event::{ParticipantId, StrokeSegment, TextAnnotation, TextId, TextMove};
    use chalkboard_core::geometry::{Point, SerializableColor};

    /// Everything queued on `rx` that was not sent by `me`.
    fn received(rx: &mut broadcast::Receiver<(String, ServerMessage)>, me: &str) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok((from, msg)) = rx.try_recv() {
            if from != me {
                messages.push(msg);
            }
        }
        messages
    }

    fn stroke() -> Value {
        DrawEvent::Stroke(StrokeSegment {
            from_point: Point::new(1.0, 1.0),
            to_point: Point::new(2.0, 2.0),
            color: SerializableColor::black(),
        })
        .encode()
        .unwrap()
    }

    #[test]
    fn test_join_returns_history() {
        let state = AppState::new();
        let (_rx, _) = state.join("a");
        state.draw("a", stroke()).unwrap();

        let (_rx_b, initial) = state.join("b");
        match initial {
            ServerMessage::InitialState { events, peer_count } => {
                assert_eq!(events.len(), 1);
                assert_eq!(peer_count, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_draw_is_broadcast_to_others() {
        let state = AppState::new();
        let (mut rx_a, _) = state.join("a");
        let (mut rx_b, _) = state.join("b");
        state.draw("a", stroke()).unwrap();

        assert!(matches!(received(&mut rx_a, "a").as_slice(), [ServerMessage::PeerJoined { .. }]));
        assert!(matches!(
            received(&mut rx_b, "b").as_slice(),
            [ServerMessage::Draw { from, .. }] if from == "a"
        ));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let state = AppState::new();
        let _ = state.join("a");
        let result = state.draw("a", serde_json::json!({ "type": "sticker" }));
        assert!(result.is_err());
        assert!(state.board().history.is_empty());
    }

    #[test]
    fn test_clear_truncates_history() {
        let state = AppState::new();
        let _ = state.join("a");
        let (mut rx, _) = state.join("b");
        state.draw("a", stroke()).unwrap();
        state.clear("a");

        assert!(state.board().history.is_empty());
        let messages = received(&mut rx, "b");
        assert!(matches!(messages.last(), Some(ServerMessage::Clear { .. })));
    }

    #[test]
    fn test_clear_all_event_clears() {
        let state = AppState::new();
        let _ = state.join("a");
        state.draw("a", stroke()).unwrap();
        state.draw("a", DrawEvent::ClearAll.encode().unwrap()).unwrap();
        assert!(state.board().history.is_empty());
    }

    #[test]
    fn test_joiner_gets_compacted_text_positions() {
        let state = AppState::new();
        let _ = state.join("a");
        let id = TextId {
            participant: ParticipantId::new(),
            seq: 0,
        };
        let text = DrawEvent::Text(TextAnnotation {
            id,
            content: "hi".to_string(),
            position: Point::new(0.0, 20.0),
            measured_width: 10.0,
            color: SerializableColor::black(),
        });
        let moved = DrawEvent::TextMove(TextMove {
            id,
            new_position: Point::new(30.0, 40.0),
        });
        state.draw("a", text.encode().unwrap()).unwrap();
        state.draw("a", moved.encode().unwrap()).unwrap();

        let (_rx, initial) = state.join("b");
        let ServerMessage::InitialState { events, .. } = initial else {
            panic!("expected initial state");
        };
        assert_eq!(events.len(), 1);
        match DrawEvent::decode(events[0].clone()).unwrap() {
            DrawEvent::Text(text) => assert_eq!(text.position, Point::new(30.0, 40.0)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_lagged_connection_gets_full_board() {
        let state = AppState::new();
        let _ = state.join("a");
        let (mut rx_b, _) = state.join("b");
        for _ in 0..CHANNEL_CAPACITY + 10 {
            state.draw("a", stroke()).unwrap();
        }
        assert!(matches!(rx_b.try_recv(), Err(broadcast::error::TryRecvError::Lagged(_))));

        let (mut rx_b, initial) = state.resync();
        match initial {
            ServerMessage::InitialState { events, peer_count } => {
                assert_eq!(events.len(), CHANNEL_CAPACITY + 10);
                assert_eq!(peer_count, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        // Nothing already in the snapshot is delivered again.
        assert!(received(&mut rx_b, "b").is_empty());

        state.draw("a", stroke()).unwrap();
        assert!(matches!(received(&mut rx_b, "b").as_slice(), [ServerMessage::Draw { .. }]));
    }

    #[test]
    fn test_leave_updates_peers() {
        let state = AppState::new();
        let _ = state.join("a");
        let (mut rx, _) = state.join("b");
        state.leave("a");
        assert_eq!(state.board().peers.len(), 1);
        assert!(matches!(received(&mut rx, "b").as_slice(), [ServerMessage::PeerLeft { peer_id }] if peer_id == "a"));
    }
}
