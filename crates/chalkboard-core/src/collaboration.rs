//! Sync channel adapter: bridges the local event log and the relay.
//!
//! Locally committed events are queued as outgoing JSON frames; inbound
//! frames are decoded and applied to the local replica. Nothing here blocks
//! on the network.

use serde_json::Value;

use crate::config::DisconnectPolicy;
use crate::controller::InteractionController;
use crate::event::{DrawEvent, ParticipantId};
use crate::event_log::{AppendOutcome, EventLog};
use crate::measure::TextMeasurer;
use crate::sync::{ClientMessage, ServerMessage, SyncEvent};

/// Something that holds a local copy of the board log.
pub trait Replica {
    /// Apply an event received from the relay.
    fn apply_remote(&mut self, event: DrawEvent) -> AppendOutcome;

    /// Replace everything with a bulk initial state.
    fn load_initial(&mut self, events: Vec<DrawEvent>);

    /// Re-apply a locally generated event after a reload.
    fn apply_local(&mut self, event: DrawEvent) -> AppendOutcome;
}

impl Replica for EventLog {
    fn apply_remote(&mut self, event: DrawEvent) -> AppendOutcome {
        self.append(event)
    }

    fn load_initial(&mut self, events: Vec<DrawEvent>) {
        self.replace_with(events);
    }

    fn apply_local(&mut self, event: DrawEvent) -> AppendOutcome {
        self.append(event)
    }
}

impl<M: TextMeasurer> Replica for InteractionController<M> {
    fn apply_remote(&mut self, event: DrawEvent) -> AppendOutcome {
        self.ingest_remote(event)
    }

    fn load_initial(&mut self, events: Vec<DrawEvent>) {
        self.replace_log(events);
    }

    fn apply_local(&mut self, event: DrawEvent) -> AppendOutcome {
        self.reapply_local(event)
    }
}

/// Manages the connection lifecycle and the message queues for one participant.
#[derive(Debug)]
pub struct SyncAdapter {
    participant: ParticipantId,
    policy: DisconnectPolicy,
    connected: bool,
    /// Set once the initial state for the current connection has been loaded.
    synced: bool,
    /// Pending outgoing messages (JSON strings).
    outgoing: Vec<String>,
    /// Remote events received before the initial state.
    deferred: Vec<(String, DrawEvent)>,
    /// Local events generated while not synced.
    offline: Vec<DrawEvent>,
    peer_count: usize,
}

impl SyncAdapter {
    pub fn new(participant: ParticipantId, policy: DisconnectPolicy) -> Self {
        Self {
            participant,
            policy,
            connected: false,
            synced: false,
            outgoing: Vec::new(),
            deferred: Vec::new(),
            offline: Vec::new(),
            peer_count: 0,
        }
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Connected and holding the relay's initial state.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn peer_count(&self) -> usize {
        self.peer_count
    }

    /// Local events waiting to be replayed after the next initial state.
    pub fn offline_len(&self) -> usize {
        self.offline.len()
    }

    /// Publish a locally committed event. Fire-and-forget.
    pub fn publish(&mut self, event: &DrawEvent) {
        if self.synced {
            self.queue_event(event);
            return;
        }

        match self.policy {
            DisconnectPolicy::QueueAndReplay => self.push_offline(event.clone()),
            DisconnectPolicy::Drop => {
                log::warn!("Not synced; {} event will not reach other participants", event.kind());
            }
        }
    }

    /// Take back frames the transport refused to send. Their draw and clear
    /// events go ahead of anything already waiting offline; join and leave
    /// frames are dropped.
    pub fn requeue_offline(&mut self, messages: Vec<String>) {
        let mut events = Vec::new();
        for json in messages {
            match serde_json::from_str::<ClientMessage>(&json) {
                Ok(ClientMessage::Draw { event }) => events.extend(decode_event(event, "unsent queue")),
                Ok(ClientMessage::Clear) => events.push(DrawEvent::ClearAll),
                Ok(ClientMessage::Join { .. } | ClientMessage::Leave) => {}
                Err(e) => log::warn!("Dropping unreadable unsent message: {}", e),
            }
        }
        if events.is_empty() {
            return;
        }

        match self.policy {
            DisconnectPolicy::QueueAndReplay => {
                log::info!("Holding {} unsent events until the next initial state", events.len());
                let later = std::mem::take(&mut self.offline);
                for event in events.into_iter().chain(later) {
                    self.push_offline(event);
                }
            }
            DisconnectPolicy::Drop => {
                log::warn!("Connection lost; {} unsent events are discarded", events.len());
            }
        }
    }

    fn push_offline(&mut self, event: DrawEvent) {
        if event == DrawEvent::ClearAll {
            self.offline.clear();
        }
        self.offline.push(event);
    }

    /// The transport connected: ask to join.
    pub fn on_connected(&mut self) {
        self.connected = true;
        self.synced = false;
        self.deferred.clear();
        self.queue(&ClientMessage::Join {
            participant: self.participant,
        });
    }

    /// The transport went away. The local log stays authoritative until the
    /// next initial state.
    pub fn on_disconnected(&mut self) {
        if !self.connected {
            return;
        }
        log::info!("Disconnected from relay");
        self.connected = false;
        self.synced = false;
        self.peer_count = 0;
        self.deferred.clear();
        if !self.outgoing.is_empty() {
            log::warn!("Discarding {} unsent messages", self.outgoing.len());
            self.outgoing.clear();
        }
    }

    /// Request to leave the board. Queues the leave message.
    pub fn leave(&mut self) {
        if self.connected {
            self.queue(&ClientMessage::Leave);
            self.synced = false;
        }
    }

    /// Take pending outgoing messages (drains the queue).
    pub fn take_outgoing(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Handle an incoming relay message.
    /// Returns a SyncEvent describing what happened.
    pub fn handle_message<R: Replica>(&mut self, json: &str, replica: &mut R) -> Option<SyncEvent> {
        let msg: ServerMessage = match serde_json::from_str(json) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Failed to parse relay message: {}", e);
                return None;
            }
        };

        match msg {
            ServerMessage::InitialState { events, peer_count } => {
                Some(self.load_initial_state(events, peer_count, replica))
            }
            ServerMessage::Draw { from, event } => {
                let event = decode_event(event, &from)?;
                if event == DrawEvent::ClearAll {
                    return Some(self.apply_clear(from, replica));
                }
                if !self.synced {
                    log::debug!("Deferring {} from {} until initial state", event.kind(), from);
                    self.deferred.push((from.clone(), event));
                    return Some(SyncEvent::Deferred { from });
                }
                let outcome = replica.apply_remote(event);
                Some(SyncEvent::Draw { from, outcome })
            }
            ServerMessage::Clear { from } => Some(self.apply_clear(from, replica)),
            ServerMessage::PeerJoined { peer_id } => {
                self.peer_count += 1;
                Some(SyncEvent::PeerJoined { peer_id })
            }
            ServerMessage::PeerLeft { peer_id } => {
                self.peer_count = self.peer_count.saturating_sub(1);
                Some(SyncEvent::PeerLeft { peer_id })
            }
            ServerMessage::Error { message } => {
                log::warn!("Relay error: {}", message);
                Some(SyncEvent::Error { message })
            }
        }
    }

    fn load_initial_state<R: Replica>(
        &mut self,
        values: Vec<Value>,
        peer_count: usize,
        replica: &mut R,
    ) -> SyncEvent {
        let events: Vec<DrawEvent> = values
            .into_iter()
            .filter_map(|value| decode_event(value, "initial state"))
            .filter(|event| {
                if *event == DrawEvent::ClearAll {
                    log::warn!("Skipping clear_all inside initial state");
                    false
                } else {
                    true
                }
            })
            .collect();
        let loaded = events.len();
        replica.load_initial(events);

        let deferred = std::mem::take(&mut self.deferred);
        let deferred_count = deferred.len();
        for (_, event) in deferred {
            replica.apply_remote(event);
        }

        self.synced = true;
        self.peer_count = peer_count;

        let offline = std::mem::take(&mut self.offline);
        if !offline.is_empty() {
            log::info!(
                "Replaying {} events drawn while offline; other participants may see duplicates",
                offline.len()
            );
        }
        let replayed = offline.len();
        for event in offline {
            replica.apply_local(event.clone());
            self.queue_event(&event);
        }

        log::info!("Loaded {} events from relay ({} peers)", loaded, peer_count);
        SyncEvent::InitialState {
            loaded,
            peer_count,
            deferred: deferred_count,
            replayed,
        }
    }

    fn apply_clear<R: Replica>(&mut self, from: String, replica: &mut R) -> SyncEvent {
        if !self.deferred.is_empty() {
            log::debug!("Clear from {} discards {} deferred events", from, self.deferred.len());
            self.deferred.clear();
        }
        replica.apply_remote(DrawEvent::ClearAll);
        SyncEvent::Cleared { from }
    }

    fn queue_event(&mut self, event: &DrawEvent) {
        let msg = match event {
            DrawEvent::ClearAll => ClientMessage::Clear,
            event => match event.encode() {
                Ok(value) => ClientMessage::Draw { event: value },
                Err(e) => {
                    log::warn!("Failed to encode {} event: {}", event.kind(), e);
                    return;
                }
            },
        };
        self.queue(&msg);
    }

    fn queue(&mut self, msg: &ClientMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => self.outgoing.push(json),
            Err(e) => log::warn!("Failed to serialize message: {}", e),
        }
    }
}

/// Decode one wire event, logging and dropping anything unusable.
fn decode_event(value: Value, from: &str) -> Option<DrawEvent> {
    match DrawEvent::decode(value) {
        Ok(event) => Some(event),
        Err(e) => {
            log::warn!("Dropping event from {}: {}", from, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ShapeOutline, StrokeSegment, TextAnnotation, TextId, TextMove};
    use crate::geometry::{Point, SerializableColor, ShapeKind};
    use serde_json::json;

    fn stroke(x: f64) -> DrawEvent {
        DrawEvent::Stroke(StrokeSegment {
            from_point: Point::new(x, 0.0),
            to_point: Point::new(x, 10.0),
            color: SerializableColor::black(),
        })
    }

    fn server(msg: &ServerMessage) -> String {
        serde_json::to_string(msg).unwrap()
    }

    fn initial(events: &[DrawEvent]) -> String {
        server(&ServerMessage::InitialState {
            events: events.iter().map(|e| e.encode().unwrap()).collect(),
            peer_count: 1,
        })
    }

    fn draw(event: &DrawEvent) -> String {
        server(&ServerMessage::Draw {
            from: "peer".to_string(),
            event: event.encode().unwrap(),
        })
    }

    fn synced_adapter(log: &mut EventLog) -> SyncAdapter {
        let mut adapter = SyncAdapter::new(ParticipantId::new(), DisconnectPolicy::QueueAndReplay);
        adapter.on_connected();
        adapter.handle_message(&initial(&[]), log);
        adapter.take_outgoing();
        adapter
    }

    #[test]
    fn test_connect_queues_join() {
        let participant = ParticipantId::new();
        let mut adapter = SyncAdapter::new(participant, DisconnectPolicy::QueueAndReplay);
        adapter.on_connected();
        let outgoing = adapter.take_outgoing();
        assert_eq!(outgoing.len(), 1);
        let msg: ClientMessage = serde_json::from_str(&outgoing[0]).unwrap();
        assert_eq!(msg, ClientMessage::Join { participant });
        assert!(!adapter.is_synced());
    }

    #[test]
    fn test_publish_when_synced() {
        let mut log = EventLog::new();
        let mut adapter = synced_adapter(&mut log);
        adapter.publish(&stroke(1.0));
        adapter.publish(&DrawEvent::ClearAll);

        let outgoing = adapter.take_outgoing();
        let first: ClientMessage = serde_json::from_str(&outgoing[0]).unwrap();
        assert!(matches!(first, ClientMessage::Draw { .. }));
        let second: ClientMessage = serde_json::from_str(&outgoing[1]).unwrap();
        assert_eq!(second, ClientMessage::Clear);
    }

    #[test]
    fn test_initial_state_replaces_log() {
        let mut log = EventLog::new();
        log.append(stroke(99.0));
        let mut adapter = SyncAdapter::new(ParticipantId::new(), DisconnectPolicy::Drop);
        adapter.on_connected();

        let event = adapter.handle_message(&initial(&[stroke(1.0), stroke(2.0)]), &mut log);
        assert_eq!(
            event,
            Some(SyncEvent::InitialState {
                loaded: 2,
                peer_count: 1,
                deferred: 0,
                replayed: 0
            })
        );
        assert_eq!(log.events(), &[stroke(1.0), stroke(2.0)]);
        assert!(adapter.is_synced());
    }

    #[test]
    fn test_draws_before_initial_state_are_deferred() {
        let mut log = EventLog::new();
        let mut adapter = SyncAdapter::new(ParticipantId::new(), DisconnectPolicy::Drop);
        adapter.on_connected();

        let event = adapter.handle_message(&draw(&stroke(3.0)), &mut log);
        assert!(matches!(event, Some(SyncEvent::Deferred { .. })));
        assert!(log.is_empty());

        adapter.handle_message(&initial(&[stroke(1.0)]), &mut log);
        assert_eq!(log.events(), &[stroke(1.0), stroke(3.0)]);
    }

    #[test]
    fn test_clear_applies_immediately_and_drops_deferred() {
        let mut log = EventLog::new();
        log.append(stroke(1.0));
        let mut adapter = SyncAdapter::new(ParticipantId::new(), DisconnectPolicy::Drop);
        adapter.on_connected();
        adapter.handle_message(&draw(&stroke(3.0)), &mut log);

        let clear = server(&ServerMessage::Clear {
            from: "peer".to_string(),
        });
        let event = adapter.handle_message(&clear, &mut log);
        assert!(matches!(event, Some(SyncEvent::Cleared { .. })));
        assert!(log.is_empty());

        adapter.handle_message(&initial(&[]), &mut log);
        assert!(log.is_empty());
    }

    #[test]
    fn test_initial_state_skips_clear_all() {
        let mut log = EventLog::new();
        let mut adapter = SyncAdapter::new(ParticipantId::new(), DisconnectPolicy::Drop);
        adapter.on_connected();
        adapter.handle_message(&initial(&[stroke(1.0), DrawEvent::ClearAll, stroke(2.0)]), &mut log);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_unknown_kind_is_dropped() {
        let mut log = EventLog::new();
        let mut adapter = synced_adapter(&mut log);
        let msg = server(&ServerMessage::Draw {
            from: "peer".to_string(),
            event: json!({ "type": "sticker", "emoji": "x" }),
        });
        assert_eq!(adapter.handle_message(&msg, &mut log), None);
        assert!(log.is_empty());

        let msg = server(&ServerMessage::Draw {
            from: "peer".to_string(),
            event: json!({ "type": "stroke", "from_point": { "x": 1.0 } }),
        });
        assert_eq!(adapter.handle_message(&msg, &mut log), None);
        assert_eq!(adapter.handle_message("not json", &mut log), None);
    }

    #[test]
    fn test_remote_draw_applies_in_order() {
        let mut log = EventLog::new();
        let mut adapter = synced_adapter(&mut log);
        let text_id = TextId {
            participant: ParticipantId::new(),
            seq: 0,
        };
        let text = DrawEvent::Text(TextAnnotation {
            id: text_id,
            content: "hi".to_string(),
            position: Point::new(5.0, 20.0),
            measured_width: 12.0,
            color: SerializableColor::black(),
        });
        let moved = DrawEvent::TextMove(TextMove {
            id: text_id,
            new_position: Point::new(50.0, 60.0),
        });

        let event = adapter.handle_message(&draw(&moved), &mut log);
        assert!(matches!(
            event,
            Some(SyncEvent::Draw {
                outcome: AppendOutcome::Buffered,
                ..
            })
        ));
        adapter.handle_message(&draw(&text), &mut log);
        assert_eq!(log.state().texts[0].position, Point::new(50.0, 60.0));
    }

    #[test]
    fn test_offline_events_replayed_after_reconnect() {
        let mut log = EventLog::new();
        let mut adapter = synced_adapter(&mut log);
        adapter.on_disconnected();

        let shape = DrawEvent::Shape(ShapeOutline {
            kind: ShapeKind::Rectangle,
            origin_point: Point::new(0.0, 0.0),
            terminal_point: Point::new(10.0, 10.0),
            color: SerializableColor::black(),
        });
        log.append(shape.clone());
        adapter.publish(&shape);
        assert_eq!(adapter.offline_len(), 1);
        assert!(adapter.take_outgoing().is_empty());

        adapter.on_connected();
        adapter.take_outgoing();
        let event = adapter.handle_message(&initial(&[stroke(1.0)]), &mut log);
        assert!(matches!(event, Some(SyncEvent::InitialState { replayed: 1, .. })));
        assert_eq!(log.events(), &[stroke(1.0), shape]);

        let outgoing = adapter.take_outgoing();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(adapter.offline_len(), 0);
    }

    #[test]
    fn test_refused_frames_return_to_offline_queue() {
        let mut log = EventLog::new();
        let mut adapter = synced_adapter(&mut log);
        adapter.publish(&stroke(1.0));
        adapter.publish(&stroke(2.0));
        let unsent = adapter.take_outgoing();

        adapter.on_disconnected();
        adapter.publish(&stroke(3.0));
        adapter.requeue_offline(unsent);
        assert_eq!(adapter.offline_len(), 3);

        adapter.on_connected();
        adapter.take_outgoing();
        adapter.handle_message(&initial(&[]), &mut log);
        assert_eq!(log.events(), &[stroke(1.0), stroke(2.0), stroke(3.0)]);
        assert_eq!(adapter.take_outgoing().len(), 3);
    }

    #[test]
    fn test_refused_clear_supersedes_older_offline_events() {
        let mut log = EventLog::new();
        let mut adapter = synced_adapter(&mut log);
        adapter.publish(&stroke(1.0));
        adapter.publish(&DrawEvent::ClearAll);
        let mut unsent = vec![serde_json::to_string(&ClientMessage::Leave).unwrap()];
        unsent.extend(adapter.take_outgoing());

        adapter.on_disconnected();
        adapter.requeue_offline(unsent);
        assert_eq!(adapter.offline_len(), 1);
    }

    #[test]
    fn test_drop_policy_discards_offline_events() {
        let mut log = EventLog::new();
        let mut adapter = SyncAdapter::new(ParticipantId::new(), DisconnectPolicy::Drop);
        adapter.publish(&stroke(1.0));
        assert_eq!(adapter.offline_len(), 0);

        adapter.on_connected();
        adapter.take_outgoing();
        adapter.handle_message(&initial(&[]), &mut log);
        assert!(adapter.take_outgoing().is_empty());
    }

    #[test]
    fn test_peer_count_tracking() {
        let mut log = EventLog::new();
        let mut adapter = synced_adapter(&mut log);
        assert_eq!(adapter.peer_count(), 1);
        let joined = server(&ServerMessage::PeerJoined {
            peer_id: "b".to_string(),
        });
        adapter.handle_message(&joined, &mut log);
        assert_eq!(adapter.peer_count(), 2);
        let left = server(&ServerMessage::PeerLeft {
            peer_id: "b".to_string(),
        });
        adapter.handle_message(&left, &mut log);
        assert_eq!(adapter.peer_count(), 1);
    }
}
