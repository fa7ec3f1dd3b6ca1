//! A participant's board: controller, drawing surface, history and sync wired together.

use crate::collaboration::SyncAdapter;
use crate::config::{BoardConfig, BoardContext, DrawMode, Theme};
use crate::controller::{GestureKind, InputResponse, InteractionController, LiveGesture};
use crate::event::{DrawEvent, ParticipantId, StrokeSegment};
use crate::event_log::EventLog;
use crate::geometry::SerializableColor;
use crate::history::HistoryStack;
use crate::input::PointerEvent;
use crate::measure::{FixedAdvanceMeasurer, TextMeasurer};
use crate::sync::{SyncEvent, Transport, TransportEvent};

/// Something the board can be drawn onto.
///
/// `redraw` must produce the same output for the same log, gesture and
/// context no matter what was drawn before.
pub trait Surface {
    /// Captured pixels, used for undo/redo.
    type Snapshot: Clone;

    /// Repaint everything from the log plus the live gesture.
    fn redraw(&mut self, log: &EventLog, live: Option<&LiveGesture>, context: &BoardContext);

    /// Paint one freshly committed stroke segment on top of what is there.
    fn draw_segment(&mut self, segment: &StrokeSegment, context: &BoardContext);

    fn capture(&self) -> Self::Snapshot;

    fn restore(&mut self, snapshot: &Self::Snapshot);
}

pub struct Board<S: Surface, T: Transport, M = FixedAdvanceMeasurer> {
    controller: InteractionController<M>,
    adapter: SyncAdapter,
    transport: T,
    surface: S,
    history: HistoryStack<S::Snapshot>,
}

impl<S: Surface, T: Transport> Board<S, T, FixedAdvanceMeasurer> {
    pub fn new(config: BoardConfig, participant: ParticipantId, surface: S, transport: T) -> Self {
        Self::with_measurer(config, participant, surface, transport, FixedAdvanceMeasurer::default())
    }
}

impl<S: Surface, T: Transport, M: TextMeasurer> Board<S, T, M> {
    pub fn with_measurer(
        config: BoardConfig,
        participant: ParticipantId,
        mut surface: S,
        transport: T,
        measurer: M,
    ) -> Self {
        let adapter = SyncAdapter::new(participant, config.disconnect_policy);
        let max_history = config.max_history;
        let context = BoardContext::new(config);
        let controller = InteractionController::with_measurer(context, participant, measurer);

        surface.redraw(controller.log(), None, controller.context());
        let history = HistoryStack::with_limit(surface.capture(), max_history);

        Self {
            controller,
            adapter,
            transport,
            surface,
            history,
        }
    }

    pub fn controller(&self) -> &InteractionController<M> {
        &self.controller
    }

    pub fn log(&self) -> &EventLog {
        self.controller.log()
    }

    pub fn context(&self) -> &BoardContext {
        self.controller.context()
    }

    pub fn adapter(&self) -> &SyncAdapter {
        &self.adapter
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn handle_pointer(&mut self, event: PointerEvent) -> InputResponse {
        let response = self.controller.handle_pointer(event);
        self.apply_response(&response);
        response
    }

    pub fn set_mode(&mut self, mode: DrawMode) {
        let response = self.controller.set_mode(mode);
        self.apply_response(&response);
    }

    pub fn set_color(&mut self, color: SerializableColor) {
        self.controller.set_color(color);
    }

    pub fn set_staged_text(&mut self, text: impl Into<String>) {
        self.controller.set_staged_text(text);
    }

    /// Switch theme. The background changes, so the surface is repainted.
    pub fn set_theme(&mut self, theme: Theme) {
        self.controller.context_mut().set_theme(theme);
        self.redraw();
        self.history.reset(self.surface.capture());
    }

    /// Clear the board locally and for every other participant.
    pub fn clear(&mut self) {
        let response = self.controller.clear();
        self.apply_response(&response);
    }

    /// Restore the previous local snapshot. Returns false at the bottom.
    pub fn undo(&mut self) -> bool {
        match self.history.undo() {
            Some(snapshot) => {
                self.surface.restore(snapshot);
                true
            }
            None => false,
        }
    }

    /// Restore the next local snapshot. Returns false at the top.
    pub fn redo(&mut self) -> bool {
        match self.history.redo() {
            Some(snapshot) => {
                self.surface.restore(snapshot);
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Process everything the transport received and send what is queued.
    pub fn poll(&mut self) -> Vec<SyncEvent> {
        let mut handled = Vec::new();

        for event in self.transport.poll_events() {
            match event {
                TransportEvent::Connected => self.adapter.on_connected(),
                TransportEvent::Disconnected => self.adapter.on_disconnected(),
                TransportEvent::Error { message } => {
                    log::warn!("Transport error: {}", message);
                    self.adapter.on_disconnected();
                }
                TransportEvent::Message(json) => {
                    if let Some(sync_event) = self.adapter.handle_message(&json, &mut self.controller)
                    {
                        self.apply_sync_event(&sync_event);
                        handled.push(sync_event);
                    }
                }
            }
            self.flush();
        }

        handled
    }

    /// Leave the board and close the transport. The local log is kept.
    pub fn disconnect(&mut self) {
        self.adapter.leave();
        self.flush();
        self.transport.disconnect();
        self.adapter.on_disconnected();
    }

    fn apply_response(&mut self, response: &InputResponse) {
        let freehand_live = matches!(self.controller.live_gesture(), Some(LiveGesture::Freehand { .. }));
        let mut needs_redraw = response.preview_changed;
        let mut cleared = false;

        for event in &response.committed {
            match event {
                DrawEvent::Stroke(segment) if freehand_live => {
                    self.surface.draw_segment(segment, self.controller.context());
                }
                DrawEvent::ClearAll => {
                    cleared = true;
                    needs_redraw = true;
                }
                _ => needs_redraw = true,
            }
        }

        // A finished freehand gesture is reconciled against the log.
        if response.completed == Some(GestureKind::Freehand) {
            needs_redraw = true;
        }
        if needs_redraw {
            self.redraw();
        }

        if cleared {
            self.history.reset(self.surface.capture());
        } else if response.completed.is_some() {
            self.history.push(self.surface.capture());
        }

        for event in self.controller.take_committed() {
            self.adapter.publish(&event);
        }
        self.flush();
    }

    fn apply_sync_event(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::InitialState { .. } | SyncEvent::Cleared { .. } => {
                self.redraw();
                self.history.reset(self.surface.capture());
            }
            SyncEvent::Draw { outcome, .. } if outcome.changed() => self.redraw(),
            _ => {}
        }
    }

    fn redraw(&mut self) {
        self.surface.redraw(
            self.controller.log(),
            self.controller.live_gesture(),
            self.controller.context(),
        );
    }

    fn flush(&mut self) {
        if !self.adapter.has_outgoing() {
            return;
        }
        let mut messages = self.adapter.take_outgoing().into_iter();
        while let Some(message) = messages.next() {
            if let Err(e) = self.transport.send(&message) {
                log::warn!("Failed to send message: {}", e);
                // The connection is gone; keep what was committed for the next join.
                let unsent: Vec<String> = std::iter::once(message).chain(messages).collect();
                self.adapter.on_disconnected();
                self.adapter.requeue_offline(unsent);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ShapeOutline;
    use crate::geometry::{Point, ShapeKind};
    use crate::sync::{MemoryRelay, MemoryTransport};

    /// Records what would be visible as a list of events.
    #[derive(Debug, Default)]
    struct FakeSurface {
        shown: Vec<DrawEvent>,
        redraws: usize,
    }

    impl Surface for FakeSurface {
        type Snapshot = Vec<DrawEvent>;

        fn redraw(&mut self, log: &EventLog, _live: Option<&LiveGesture>, _context: &BoardContext) {
            self.shown = log.snapshot_all();
            self.redraws += 1;
        }

        fn draw_segment(&mut self, segment: &StrokeSegment, _context: &BoardContext) {
            self.shown.push(DrawEvent::Stroke(*segment));
        }

        fn capture(&self) -> Self::Snapshot {
            self.shown.clone()
        }

        fn restore(&mut self, snapshot: &Self::Snapshot) {
            self.shown = snapshot.clone();
        }
    }

    type TestBoard = Board<FakeSurface, MemoryTransport>;

    fn board(relay: &MemoryRelay) -> TestBoard {
        Board::new(
            BoardConfig::default(),
            ParticipantId::new(),
            FakeSurface::default(),
            relay.connect(),
        )
    }

    fn settle(boards: &mut [&mut TestBoard]) {
        for _ in 0..4 {
            for board in boards.iter_mut() {
                board.poll();
            }
        }
    }

    fn scribble(board: &mut TestBoard, y: f64) {
        board.set_mode(DrawMode::Freehand);
        board.handle_pointer(PointerEvent::down(0.0, y));
        board.handle_pointer(PointerEvent::drag(10.0, y));
        board.handle_pointer(PointerEvent::drag(20.0, y));
        board.handle_pointer(PointerEvent::up(20.0, y));
    }

    fn rectangle(board: &mut TestBoard) {
        board.set_mode(DrawMode::Rectangle);
        board.set_color(SerializableColor::rgb(255, 0, 0));
        board.handle_pointer(PointerEvent::down(10.0, 10.0));
        board.handle_pointer(PointerEvent::drag(50.0, 50.0));
        board.handle_pointer(PointerEvent::up(100.0, 80.0));
    }

    #[test]
    fn test_late_joiner_sees_same_shape() {
        let relay = MemoryRelay::new();
        let mut a = board(&relay);
        settle(&mut [&mut a]);
        assert!(a.adapter().is_synced());

        rectangle(&mut a);

        let mut b = board(&relay);
        settle(&mut [&mut a, &mut b]);

        let expected = DrawEvent::Shape(ShapeOutline {
            kind: ShapeKind::Rectangle,
            origin_point: Point::new(10.0, 10.0),
            terminal_point: Point::new(100.0, 80.0),
            color: SerializableColor::rgb(255, 0, 0),
        });
        assert_eq!(a.log().events(), &[expected.clone()]);
        assert_eq!(b.log().events(), &[expected]);
        assert_eq!(b.surface().shown, a.surface().shown);
    }

    #[test]
    fn test_live_events_reach_other_participant() {
        let relay = MemoryRelay::new();
        let mut a = board(&relay);
        let mut b = board(&relay);
        settle(&mut [&mut a, &mut b]);

        scribble(&mut a, 5.0);
        settle(&mut [&mut a, &mut b]);

        assert_eq!(b.log().len(), 2);
        assert_eq!(b.log().events(), a.log().events());
    }

    #[test]
    fn test_freehand_draws_incrementally_then_reconciles() {
        let relay = MemoryRelay::new();
        let mut a = board(&relay);
        settle(&mut [&mut a]);
        let before = a.surface().redraws;

        a.handle_pointer(PointerEvent::down(0.0, 0.0));
        a.handle_pointer(PointerEvent::drag(5.0, 5.0));
        a.handle_pointer(PointerEvent::drag(9.0, 5.0));
        assert_eq!(a.surface().redraws, before);
        assert_eq!(a.surface().shown.len(), 2);

        a.handle_pointer(PointerEvent::up(9.0, 5.0));
        assert_eq!(a.surface().redraws, before + 1);
        assert_eq!(a.surface().shown, a.log().snapshot_all());
    }

    #[test]
    fn test_undo_redo_restores_snapshots() {
        let relay = MemoryRelay::new();
        let mut a = board(&relay);
        settle(&mut [&mut a]);

        scribble(&mut a, 5.0);
        rectangle(&mut a);
        assert_eq!(a.surface().shown.len(), 3);

        assert!(a.undo());
        assert_eq!(a.surface().shown.len(), 2);
        assert!(a.undo());
        assert!(a.surface().shown.is_empty());
        assert!(!a.undo());

        assert!(a.redo());
        assert_eq!(a.surface().shown.len(), 2);
        assert!(a.can_redo());

        // Undo is local only: the log keeps every event.
        assert_eq!(a.log().len(), 3);
    }

    #[test]
    fn test_undo_is_not_propagated() {
        let relay = MemoryRelay::new();
        let mut a = board(&relay);
        let mut b = board(&relay);
        settle(&mut [&mut a, &mut b]);

        rectangle(&mut a);
        settle(&mut [&mut a, &mut b]);
        a.undo();
        settle(&mut [&mut a, &mut b]);

        assert!(a.surface().shown.is_empty());
        assert_eq!(b.surface().shown.len(), 1);
    }

    #[test]
    fn test_remote_change_reconciles_after_undo() {
        let relay = MemoryRelay::new();
        let mut a = board(&relay);
        let mut b = board(&relay);
        settle(&mut [&mut a, &mut b]);

        rectangle(&mut a);
        a.undo();
        scribble(&mut b, 40.0);
        settle(&mut [&mut a, &mut b]);

        assert_eq!(a.surface().shown, a.log().snapshot_all());
        assert_eq!(a.surface().shown.len(), 3);
    }

    #[test]
    fn test_clear_propagates_and_resets_history() {
        let relay = MemoryRelay::new();
        let mut a = board(&relay);
        let mut b = board(&relay);
        settle(&mut [&mut a, &mut b]);

        scribble(&mut a, 5.0);
        settle(&mut [&mut a, &mut b]);
        assert!(!b.log().is_empty());

        a.clear();
        settle(&mut [&mut a, &mut b]);

        assert!(a.log().is_empty());
        assert!(b.log().is_empty());
        assert!(!a.can_undo());
        assert!(b.surface().shown.is_empty());
        assert_eq!(relay.history_len(), 0);
    }

    #[test]
    fn test_offline_drawing_is_replayed_on_reconnect() {
        let relay = MemoryRelay::new();
        let mut a = board(&relay);
        let mut b = board(&relay);
        settle(&mut [&mut a, &mut b]);

        a.disconnect();
        rectangle(&mut a);
        assert_eq!(a.log().len(), 1);
        assert_eq!(a.adapter().offline_len(), 1);
        assert!(b.log().is_empty());

        a.transport_mut().reconnect();
        settle(&mut [&mut a, &mut b]);

        assert_eq!(a.log().len(), 1);
        assert_eq!(b.log().len(), 1);
        assert_eq!(relay.history_len(), 1);
    }

    #[test]
    fn test_drawing_survives_dropped_connection() {
        let relay = MemoryRelay::new();
        let mut a = board(&relay);
        let mut b = board(&relay);
        settle(&mut [&mut a, &mut b]);
        assert!(a.adapter().is_synced());

        // The link drops before the board notices.
        a.transport_mut().disconnect();
        rectangle(&mut a);
        assert_eq!(a.log().len(), 1);
        assert!(!a.adapter().is_synced());
        assert_eq!(a.adapter().offline_len(), 1);
        assert_eq!(relay.history_len(), 0);

        a.transport_mut().reconnect();
        settle(&mut [&mut a, &mut b]);

        assert_eq!(a.log().len(), 1);
        assert_eq!(relay.history_len(), 1);
        assert_eq!(b.log().events(), a.log().events());
        assert_eq!(a.surface().shown, a.log().snapshot_all());
    }

    #[test]
    fn test_dropped_connection_is_noticed_on_poll() {
        let relay = MemoryRelay::new();
        let mut a = board(&relay);
        settle(&mut [&mut a]);

        a.transport_mut().disconnect();
        a.poll();
        assert!(!a.adapter().is_connected());

        scribble(&mut a, 5.0);
        assert_eq!(a.adapter().offline_len(), 2);
    }

    #[test]
    fn test_mode_switch_redraws_without_preview() {
        let relay = MemoryRelay::new();
        let mut a = board(&relay);
        a.set_mode(DrawMode::Circle);
        a.handle_pointer(PointerEvent::down(10.0, 10.0));
        a.handle_pointer(PointerEvent::drag(20.0, 10.0));
        a.set_mode(DrawMode::Text);

        assert!(a.controller().live_gesture().is_none());
        assert!(a.log().is_empty());
        assert!(!a.can_undo());
    }
}
