//! Drawing events: the discrete, replayable units the board is built from.
//!
//! Events travel between participants as JSON objects tagged by `"type"`:
//! ```json
//! { "type": "stroke", "from_point": { "x": 0, "y": 0 }, "to_point": { "x": 4, "y": 2 }, "color": { ... } }
//! { "type": "text_move", "id": { "participant": "<uuid>", "seq": 3 }, "new_position": { "x": 10, "y": 40 } }
//! { "type": "clear_all" }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::geometry::{Point, SerializableColor, ShapeKind, is_finite_point};

/// Event kinds this build understands, as they appear in the `"type"` tag.
pub const KNOWN_KINDS: &[&str] = &["stroke", "shape", "text", "text_move", "clear_all"];

/// Errors produced while decoding or validating an event.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Event has no \"type\" tag")]
    MissingKind,
    #[error("Unknown event kind: {0}")]
    UnknownKind(String),
    #[error("Malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid event: {0}")]
    Invalid(&'static str),
}

/// Identifier of one participant (one local replica of the board).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique id of a text annotation: the creating participant plus
/// that participant's running sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextId {
    pub participant: ParticipantId,
    pub seq: u64,
}

impl fmt::Display for TextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.participant, self.seq)
    }
}

/// Hands out text ids for one participant.
#[derive(Debug, Clone)]
pub struct TextIdGenerator {
    participant: ParticipantId,
    next_seq: u64,
}

impl TextIdGenerator {
    pub fn new(participant: ParticipantId) -> Self {
        Self { participant, next_seq: 0 }
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    pub fn next_id(&mut self) -> TextId {
        let id = TextId {
            participant: self.participant,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        id
    }
}

/// One segment of a freehand path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokeSegment {
    pub from_point: Point,
    pub to_point: Point,
    pub color: SerializableColor,
}

/// A rectangle or circle outline, committed once per gesture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapeOutline {
    pub kind: ShapeKind,
    pub origin_point: Point,
    pub terminal_point: Point,
    pub color: SerializableColor,
}

/// A placed text annotation. `position` is the left end of the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextAnnotation {
    pub id: TextId,
    pub content: String,
    pub position: Point,
    pub measured_width: f64,
    pub color: SerializableColor,
}

/// Relocation of an existing text annotation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextMove {
    pub id: TextId,
    pub new_position: Point,
}

/// One committed unit of drawing action. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DrawEvent {
    Stroke(StrokeSegment),
    Shape(ShapeOutline),
    Text(TextAnnotation),
    TextMove(TextMove),
    ClearAll,
}

impl DrawEvent {
    /// Tag used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            DrawEvent::Stroke(_) => "stroke",
            DrawEvent::Shape(_) => "shape",
            DrawEvent::Text(_) => "text",
            DrawEvent::TextMove(_) => "text_move",
            DrawEvent::ClearAll => "clear_all",
        }
    }

    /// Decode a wire value, rejecting unknown kinds and invalid geometry.
    pub fn decode(value: Value) -> Result<Self, EventError> {
        match value.get("type").and_then(Value::as_str) {
            None => return Err(EventError::MissingKind),
            Some(kind) if !KNOWN_KINDS.contains(&kind) => {
                return Err(EventError::UnknownKind(kind.to_string()));
            }
            Some(_) => {}
        }
        let event: DrawEvent = serde_json::from_value(value)?;
        event.validate()?;
        Ok(event)
    }

    /// Encode as a wire value.
    pub fn encode(&self) -> Result<Value, EventError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Check geometry is usable. Zero-size shapes are valid here; the
    /// renderer skips them.
    pub fn validate(&self) -> Result<(), EventError> {
        match self {
            DrawEvent::Stroke(s) => {
                if !is_finite_point(s.from_point) || !is_finite_point(s.to_point) {
                    return Err(EventError::Invalid("stroke endpoint is not finite"));
                }
            }
            DrawEvent::Shape(s) => {
                if !is_finite_point(s.origin_point) || !is_finite_point(s.terminal_point) {
                    return Err(EventError::Invalid("shape corner is not finite"));
                }
            }
            DrawEvent::Text(t) => {
                if !is_finite_point(t.position) {
                    return Err(EventError::Invalid("text position is not finite"));
                }
                if !t.measured_width.is_finite() || t.measured_width < 0.0 {
                    return Err(EventError::Invalid("text width must be finite and non-negative"));
                }
            }
            DrawEvent::TextMove(m) => {
                if !is_finite_point(m.new_position) {
                    return Err(EventError::Invalid("text move target is not finite"));
                }
            }
            DrawEvent::ClearAll => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn red() -> SerializableColor {
        SerializableColor::rgb(255, 0, 0)
    }

    #[test]
    fn test_text_ids_are_sequential_per_participant() {
        let mut ids = TextIdGenerator::new(ParticipantId::new());
        let a = ids.next_id();
        let b = ids.next_id();
        assert_eq!(a.participant, b.participant);
        assert_eq!(a.seq + 1, b.seq);
        assert_ne!(a, b);
    }

    #[test]
    fn test_text_ids_differ_across_participants() {
        let a = TextIdGenerator::new(ParticipantId::new()).next_id();
        let b = TextIdGenerator::new(ParticipantId::new()).next_id();
        assert_eq!(a.seq, b.seq);
        assert_ne!(a, b);
    }

    #[test]
    fn test_wire_tag() {
        let event = DrawEvent::Shape(ShapeOutline {
            kind: ShapeKind::Rectangle,
            origin_point: Point::new(10.0, 10.0),
            terminal_point: Point::new(100.0, 80.0),
            color: red(),
        });
        let value = event.encode().unwrap();
        assert_eq!(value["type"], "shape");
        assert_eq!(value["kind"], "rectangle");
        assert_eq!(value["terminal_point"]["x"], 100.0);
        assert_eq!(DrawEvent::decode(value).unwrap(), event);

        let clear = DrawEvent::ClearAll.encode().unwrap();
        assert_eq!(clear, json!({ "type": "clear_all" }));
    }

    #[test]
    fn test_decode_unknown_kind() {
        let err = DrawEvent::decode(json!({ "type": "sticker", "x": 1 })).unwrap_err();
        assert!(matches!(err, EventError::UnknownKind(kind) if kind == "sticker"));
    }

    #[test]
    fn test_decode_missing_kind() {
        let err = DrawEvent::decode(json!({ "from_point": { "x": 0, "y": 0 } })).unwrap_err();
        assert!(matches!(err, EventError::MissingKind));
    }

    #[test]
    fn test_decode_missing_field() {
        let err = DrawEvent::decode(json!({
            "type": "stroke",
            "from_point": { "x": 0.0, "y": 0.0 },
            "color": { "r": 0, "g": 0, "b": 0, "a": 255 }
        }))
        .unwrap_err();
        assert!(matches!(err, EventError::Malformed(_)));
    }

    #[test]
    fn test_validate_rejects_negative_width() {
        let event = DrawEvent::Text(TextAnnotation {
            id: TextIdGenerator::new(ParticipantId::new()).next_id(),
            content: "hi".to_string(),
            position: Point::new(0.0, 0.0),
            measured_width: -1.0,
            color: red(),
        });
        assert!(matches!(event.validate(), Err(EventError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_non_finite_points() {
        let event = DrawEvent::Stroke(StrokeSegment {
            from_point: Point::new(f64::NAN, 0.0),
            to_point: Point::new(1.0, 1.0),
            color: red(),
        });
        assert!(event.validate().is_err());
    }
}
