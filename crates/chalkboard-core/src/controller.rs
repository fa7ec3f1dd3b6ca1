//! Interaction controller: turns pointer input into committed drawing events.
//!
//! Gesture states per mode:
//! ```text
//! freehand:  Idle -> Freehand  -> Idle   (one Stroke per held move)
//! shapes:    Idle -> Shape     -> Idle   (one Shape on button-up)
//! text:      Idle -> (place)             (one Text per click)
//!            Idle -> TextDrag  -> Idle   (one TextMove on button-up)
//! ```

use serde::{Deserialize, Serialize};

use crate::config::{BoardContext, DrawMode};
use crate::event::{
    DrawEvent, ParticipantId, ShapeOutline, StrokeSegment, TextAnnotation, TextId,
    TextIdGenerator, TextMove,
};
use crate::event_log::{AppendOutcome, EventLog};
use crate::geometry::{Point, SerializableColor, ShapeKind};
use crate::input::{MouseButton, PointerEvent};
use crate::measure::{FixedAdvanceMeasurer, TextMeasurer};

/// In-progress pointer interaction. Never part of the log.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveGesture {
    /// Freehand drawing; `last` is the origin of the next segment. Every
    /// segment of the gesture uses the color picked at button-down.
    Freehand {
        last: Point,
        segments: usize,
        color: SerializableColor,
    },
    /// A shape being dragged out from `anchor`.
    Shape {
        kind: ShapeKind,
        anchor: Point,
        current: Point,
        color: SerializableColor,
    },
    /// An existing text being moved; `position` is where it is shown now.
    TextDrag { id: TextId, position: Point },
}

/// Gestures that count as one undoable step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GestureKind {
    Freehand,
    Shape,
    TextPlacement,
    TextMove,
}

/// Result of feeding one input to the controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputResponse {
    /// Events committed to the local log, in generation order.
    pub committed: Vec<DrawEvent>,
    /// A gesture finished with this input.
    pub completed: Option<GestureKind>,
    /// The live preview changed and should be redrawn.
    pub preview_changed: bool,
}

impl InputResponse {
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.completed.is_none() && !self.preview_changed
    }
}

/// Owns the local event log and the live gesture.
pub struct InteractionController<M = FixedAdvanceMeasurer> {
    context: BoardContext,
    log: EventLog,
    gesture: Option<LiveGesture>,
    text_ids: TextIdGenerator,
    measurer: M,
    /// Committed events not yet handed to the sync adapter.
    outbox: Vec<DrawEvent>,
}

impl InteractionController<FixedAdvanceMeasurer> {
    pub fn new(context: BoardContext, participant: ParticipantId) -> Self {
        Self::with_measurer(context, participant, FixedAdvanceMeasurer::default())
    }
}

impl<M: TextMeasurer> InteractionController<M> {
    pub fn with_measurer(context: BoardContext, participant: ParticipantId, measurer: M) -> Self {
        let log = EventLog::with_pending_window(context.config().pending_move_window);
        Self {
            context,
            log,
            gesture: None,
            text_ids: TextIdGenerator::new(participant),
            measurer,
            outbox: Vec::new(),
        }
    }

    pub fn context(&self) -> &BoardContext {
        &self.context
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn live_gesture(&self) -> Option<&LiveGesture> {
        self.gesture.as_ref()
    }

    pub fn participant(&self) -> ParticipantId {
        self.text_ids.participant()
    }

    pub fn mode(&self) -> DrawMode {
        self.context.mode()
    }

    /// Switch mode. Any pending gesture of the old mode is dropped uncommitted.
    pub fn set_mode(&mut self, mode: DrawMode) -> InputResponse {
        if mode == self.context.mode() {
            return InputResponse::default();
        }
        self.context.set_mode(mode);
        self.cancel_gesture()
    }

    /// Pick the brush color for the next gesture. A gesture already in
    /// progress keeps its color.
    pub fn set_color(&mut self, color: SerializableColor) {
        self.context.set_color(color);
    }

    pub fn set_staged_text(&mut self, text: impl Into<String>) {
        self.context.set_staged_text(text);
    }

    pub fn context_mut(&mut self) -> &mut BoardContext {
        &mut self.context
    }

    /// Feed one pointer event.
    pub fn handle_pointer(&mut self, event: PointerEvent) -> InputResponse {
        match event {
            PointerEvent::Down { position, button } => {
                if button != MouseButton::Primary {
                    return InputResponse::default();
                }
                self.pointer_down(position)
            }
            PointerEvent::Move {
                position,
                primary_held,
            } => self.pointer_move(position, primary_held),
            PointerEvent::Up { position, button } => {
                if button != MouseButton::Primary {
                    return InputResponse::default();
                }
                self.pointer_up(position)
            }
            PointerEvent::Leave { .. } => self.pointer_leave(),
        }
    }

    /// Clear the whole board. The returned response carries the `ClearAll`
    /// that must be published together with the local clear.
    pub fn clear(&mut self) -> InputResponse {
        let mut response = self.cancel_gesture();
        self.log.clear();
        self.outbox.push(DrawEvent::ClearAll);
        response.committed.push(DrawEvent::ClearAll);
        response.preview_changed = true;
        response
    }

    /// Drain events committed since the last call, in generation order.
    pub fn take_committed(&mut self) -> Vec<DrawEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Apply an event received from another participant.
    pub fn ingest_remote(&mut self, event: DrawEvent) -> AppendOutcome {
        let outcome = self.log.append(event);
        self.drop_orphaned_drag();
        outcome
    }

    /// Replace the log with a bulk initial state, as if replayed from empty.
    pub fn replace_log(&mut self, events: impl IntoIterator<Item = DrawEvent>) {
        self.log.replace_with(events);
        self.drop_orphaned_drag();
    }

    /// Re-apply a locally generated event (e.g. replayed after reconnect).
    pub fn reapply_local(&mut self, event: DrawEvent) -> AppendOutcome {
        self.log.append(event)
    }

    fn pointer_down(&mut self, position: Point) -> InputResponse {
        let mut response = self.cancel_gesture();

        match self.context.mode() {
            DrawMode::Freehand => {
                self.gesture = Some(LiveGesture::Freehand {
                    last: position,
                    segments: 0,
                    color: self.context.color(),
                });
            }
            DrawMode::Rectangle | DrawMode::Circle => {
                let kind = match self.context.mode().shape_kind() {
                    Some(kind) => kind,
                    None => return response,
                };
                self.gesture = Some(LiveGesture::Shape {
                    kind,
                    anchor: position,
                    current: position,
                    color: self.context.color(),
                });
                response.preview_changed = true;
            }
            DrawMode::Text => {
                let hit = self
                    .log
                    .state()
                    .text_at(position)
                    .map(|text| (text.id, text.position));
                match hit {
                    Some((id, at)) => {
                        self.gesture = Some(LiveGesture::TextDrag { id, position: at });
                        response.preview_changed = true;
                    }
                    None => self.place_text(position, &mut response),
                }
            }
        }
        response
    }

    fn pointer_move(&mut self, position: Point, primary_held: bool) -> InputResponse {
        let mut response = InputResponse::default();

        let stroke = match &mut self.gesture {
            Some(LiveGesture::Freehand {
                last,
                segments,
                color,
            }) if primary_held => {
                let segment = StrokeSegment {
                    from_point: *last,
                    to_point: position,
                    color: *color,
                };
                *last = position;
                *segments += 1;
                Some(segment)
            }
            Some(LiveGesture::Shape { current, .. }) => {
                *current = position;
                response.preview_changed = true;
                None
            }
            Some(LiveGesture::TextDrag { position: at, .. }) => {
                *at = position;
                response.preview_changed = true;
                None
            }
            Some(LiveGesture::Freehand { .. }) | None => None,
        };

        if let Some(segment) = stroke {
            self.commit(DrawEvent::Stroke(segment), &mut response);
        }
        response
    }

    fn pointer_up(&mut self, position: Point) -> InputResponse {
        let mut response = InputResponse::default();

        match self.gesture.take() {
            Some(LiveGesture::Freehand { segments, .. }) => {
                if segments > 0 {
                    response.completed = Some(GestureKind::Freehand);
                }
            }
            Some(LiveGesture::Shape {
                kind,
                anchor,
                color,
                ..
            }) => {
                let shape = ShapeOutline {
                    kind,
                    origin_point: anchor,
                    terminal_point: position,
                    color,
                };
                response.preview_changed = true;
                if self.commit(DrawEvent::Shape(shape), &mut response) {
                    response.completed = Some(GestureKind::Shape);
                }
            }
            Some(LiveGesture::TextDrag { id, position: at }) => {
                let text_move = TextMove {
                    id,
                    new_position: at,
                };
                response.preview_changed = true;
                if self.commit(DrawEvent::TextMove(text_move), &mut response) {
                    response.completed = Some(GestureKind::TextMove);
                }
            }
            None => {}
        }
        response
    }

    fn pointer_leave(&mut self) -> InputResponse {
        // Only freehand ends on leave; shape and text drags wait for button-up.
        match self.gesture {
            Some(LiveGesture::Freehand { segments, .. }) => {
                self.gesture = None;
                InputResponse {
                    completed: (segments > 0).then_some(GestureKind::Freehand),
                    ..InputResponse::default()
                }
            }
            _ => InputResponse::default(),
        }
    }

    fn place_text(&mut self, position: Point, response: &mut InputResponse) {
        if self.context.staged_text().is_empty() {
            log::debug!("No staged text to place at ({}, {})", position.x, position.y);
            return;
        }
        let measured_width = self
            .measurer
            .measure(self.context.staged_text(), self.context.font_size());
        let text = TextAnnotation {
            id: self.text_ids.next_id(),
            content: self.context.staged_text().to_string(),
            position,
            measured_width,
            color: self.context.color(),
        };
        if self.commit(DrawEvent::Text(text), response) {
            self.context.take_staged_text();
            response.completed = Some(GestureKind::TextPlacement);
        }
    }

    /// Drop the live gesture without committing anything further.
    fn cancel_gesture(&mut self) -> InputResponse {
        let mut response = InputResponse::default();
        match self.gesture.take() {
            Some(LiveGesture::Freehand { segments, .. }) if segments > 0 => {
                response.completed = Some(GestureKind::Freehand);
            }
            Some(LiveGesture::Freehand { .. }) | None => {}
            Some(LiveGesture::Shape { .. }) | Some(LiveGesture::TextDrag { .. }) => {
                response.preview_changed = true;
            }
        }
        response
    }

    fn drop_orphaned_drag(&mut self) {
        if let Some(LiveGesture::TextDrag { id, .. }) = self.gesture {
            if !self.log.contains_text(id) {
                log::debug!("Text {} disappeared while being dragged", id);
                self.gesture = None;
            }
        }
    }

    fn commit(&mut self, event: DrawEvent, response: &mut InputResponse) -> bool {
        if let Err(e) = event.validate() {
            log::warn!("Discarding local {} event: {}", event.kind(), e);
            return false;
        }
        self.log.append(event.clone());
        self.outbox.push(event.clone());
        response.committed.push(event);
        true
    }
}
