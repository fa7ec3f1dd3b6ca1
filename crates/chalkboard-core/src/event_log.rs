//! The append-only event log that is the single source of truth for the board.

use std::collections::{HashMap, HashSet};

use crate::event::{DrawEvent, ShapeOutline, StrokeSegment, TextAnnotation, TextId, TextMove};
use crate::geometry::{Point, text_box_contains};

/// Number of appends a `TextMove` may wait for its `Text` before it is dropped.
pub const DEFAULT_PENDING_MOVE_WINDOW: usize = 256;

/// What `EventLog::append` did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Added to the tail.
    Appended,
    /// A `Text` was added and this many buffered moves were applied after it.
    AppendedWithMoves(usize),
    /// A `TextMove` whose text is not known yet; held back.
    Buffered,
    /// A `Text` whose id is already in the log; dropped.
    Duplicate,
    /// `ClearAll` emptied the log.
    Cleared,
}

impl AppendOutcome {
    /// Whether the visible canvas may have changed.
    pub fn changed(self) -> bool {
        !matches!(self, AppendOutcome::Buffered | AppendOutcome::Duplicate)
    }
}

#[derive(Debug, Clone)]
struct PendingMove {
    text_move: TextMove,
    age: usize,
}

/// Ordered, append-only sequence of drawing events.
///
/// Events are never removed individually; `ClearAll` (or `clear`) drops the
/// whole log at once.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: Vec<DrawEvent>,
    text_ids: HashSet<TextId>,
    pending_moves: Vec<PendingMove>,
    pending_window: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_pending_window(DEFAULT_PENDING_MOVE_WINDOW)
    }

    /// Create a log that holds early `TextMove`s for at most `window` appends.
    pub fn with_pending_window(window: usize) -> Self {
        Self {
            events: Vec::new(),
            text_ids: HashSet::new(),
            pending_moves: Vec::new(),
            pending_window: window,
        }
    }

    /// Add one event to the tail.
    pub fn append(&mut self, event: DrawEvent) -> AppendOutcome {
        match event {
            DrawEvent::ClearAll => {
                self.clear();
                AppendOutcome::Cleared
            }
            DrawEvent::Text(text) => {
                if !self.text_ids.insert(text.id) {
                    log::warn!("Dropping duplicate text {}", text.id);
                    return AppendOutcome::Duplicate;
                }
                let id = text.id;
                self.age_pending_moves();
                self.events.push(DrawEvent::Text(text));
                match self.flush_pending_moves(id) {
                    0 => AppendOutcome::Appended,
                    n => AppendOutcome::AppendedWithMoves(n),
                }
            }
            DrawEvent::TextMove(text_move) => {
                self.age_pending_moves();
                if self.text_ids.contains(&text_move.id) {
                    self.events.push(DrawEvent::TextMove(text_move));
                    AppendOutcome::Appended
                } else {
                    log::debug!("Buffering move for unknown text {}", text_move.id);
                    self.pending_moves.push(PendingMove { text_move, age: 0 });
                    AppendOutcome::Buffered
                }
            }
            event @ (DrawEvent::Stroke(_) | DrawEvent::Shape(_)) => {
                self.age_pending_moves();
                self.events.push(event);
                AppendOutcome::Appended
            }
        }
    }

    /// Empty the log, including any buffered moves.
    pub fn clear(&mut self) {
        if !self.pending_moves.is_empty() {
            log::debug!("Clear discards {} buffered text moves", self.pending_moves.len());
        }
        self.events.clear();
        self.text_ids.clear();
        self.pending_moves.clear();
    }

    /// Replace the contents by replaying `events` from empty.
    pub fn replace_with(&mut self, events: impl IntoIterator<Item = DrawEvent>) {
        self.clear();
        for event in events {
            self.append(event);
        }
    }

    /// The full ordered sequence, for redraw or for handing to a new participant.
    pub fn snapshot_all(&self) -> Vec<DrawEvent> {
        self.events.clone()
    }

    pub fn events(&self) -> &[DrawEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains_text(&self, id: TextId) -> bool {
        self.text_ids.contains(&id)
    }

    /// Number of `TextMove`s still waiting for their text.
    pub fn pending_move_count(&self) -> usize {
        self.pending_moves.len()
    }

    /// Resolved canvas contents.
    pub fn state(&self) -> CanvasState {
        CanvasState::fold(&self.events)
    }

    /// The log with every `TextMove` folded into its `Text`, leaving only
    /// strokes, shapes and texts. Replaying it yields the same canvas.
    pub fn compacted(&self) -> Vec<DrawEvent> {
        let state = self.state();
        let positions: HashMap<TextId, Point> =
            state.texts.iter().map(|t| (t.id, t.position)).collect();

        self.events
            .iter()
            .filter_map(|event| match event {
                DrawEvent::Stroke(_) | DrawEvent::Shape(_) => Some(event.clone()),
                DrawEvent::Text(text) => {
                    let mut text = text.clone();
                    if let Some(&position) = positions.get(&text.id) {
                        text.position = position;
                    }
                    Some(DrawEvent::Text(text))
                }
                DrawEvent::TextMove(_) | DrawEvent::ClearAll => None,
            })
            .collect()
    }

    fn age_pending_moves(&mut self) {
        let window = self.pending_window;
        self.pending_moves.retain_mut(|pending| {
            pending.age += 1;
            if pending.age > window {
                log::warn!(
                    "Dropping move for text {}: text never arrived within {} events",
                    pending.text_move.id,
                    window
                );
                false
            } else {
                true
            }
        });
    }

    fn flush_pending_moves(&mut self, id: TextId) -> usize {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_moves)
            .into_iter()
            .partition(|pending| pending.text_move.id == id);
        self.pending_moves = waiting;
        let count = ready.len();
        for pending in ready {
            self.events.push(DrawEvent::TextMove(pending.text_move));
        }
        count
    }
}

/// The visible contents of a board, obtained by folding its events in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanvasState {
    pub strokes: Vec<StrokeSegment>,
    pub shapes: Vec<ShapeOutline>,
    /// Texts in creation order, at their latest position.
    pub texts: Vec<TextAnnotation>,
}

impl CanvasState {
    pub fn fold(events: &[DrawEvent]) -> Self {
        let mut state = Self::default();
        let mut text_index: HashMap<TextId, usize> = HashMap::new();

        for event in events {
            match event {
                DrawEvent::Stroke(segment) => state.strokes.push(*segment),
                DrawEvent::Shape(shape) => state.shapes.push(*shape),
                DrawEvent::Text(text) => {
                    if text_index.contains_key(&text.id) {
                        continue;
                    }
                    text_index.insert(text.id, state.texts.len());
                    state.texts.push(text.clone());
                }
                DrawEvent::TextMove(text_move) => match text_index.get(&text_move.id) {
                    Some(&index) => state.texts[index].position = text_move.new_position,
                    None => log::debug!("Skipping move for unknown text {}", text_move.id),
                },
                DrawEvent::ClearAll => {
                    state = Self::default();
                    text_index.clear();
                }
            }
        }
        state
    }

    /// First text (in creation order) whose box contains `point`.
    pub fn text_at(&self, point: Point) -> Option<&TextAnnotation> {
        self.texts
            .iter()
            .find(|t| text_box_contains(t.position, t.measured_width, point))
    }

    pub fn text(&self, id: TextId) -> Option<&TextAnnotation> {
        self.texts.iter().find(|t| t.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty() && self.shapes.is_empty() && self.texts.is_empty()
    }
}
