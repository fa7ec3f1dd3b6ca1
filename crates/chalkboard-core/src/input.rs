//! Pointer input consumed by the interaction controller.

use kurbo::Point;
use serde::{Deserialize, Serialize};

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseButton {
    Primary,
    Secondary,
    Middle,
}

/// Pointer event in surface-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PointerEvent {
    Down {
        position: Point,
        button: MouseButton,
    },
    Move {
        position: Point,
        /// Whether the primary button is held during this move.
        primary_held: bool,
    },
    Up {
        position: Point,
        button: MouseButton,
    },
    /// The pointer left the drawing surface.
    Leave {
        position: Point,
    },
}

impl PointerEvent {
    pub fn position(&self) -> Point {
        match *self {
            PointerEvent::Down { position, .. }
            | PointerEvent::Move { position, .. }
            | PointerEvent::Up { position, .. }
            | PointerEvent::Leave { position } => position,
        }
    }

    pub fn down(x: f64, y: f64) -> Self {
        PointerEvent::Down {
            position: Point::new(x, y),
            button: MouseButton::Primary,
        }
    }

    /// A move with the primary button held.
    pub fn drag(x: f64, y: f64) -> Self {
        PointerEvent::Move {
            position: Point::new(x, y),
            primary_held: true,
        }
    }

    /// A move with no button held.
    pub fn hover(x: f64, y: f64) -> Self {
        PointerEvent::Move {
            position: Point::new(x, y),
            primary_held: false,
        }
    }

    pub fn up(x: f64, y: f64) -> Self {
        PointerEvent::Up {
            position: Point::new(x, y),
            button: MouseButton::Primary,
        }
    }

    pub fn leave(x: f64, y: f64) -> Self {
        PointerEvent::Leave {
            position: Point::new(x, y),
        }
    }
}
