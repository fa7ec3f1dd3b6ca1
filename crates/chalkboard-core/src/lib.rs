//! Chalkboard Core Library
//!
//! Platform-agnostic event log, interaction and synchronization engine for the
//! Chalkboard shared canvas.

pub mod board;
pub mod collaboration;
pub mod config;
pub mod controller;
pub mod event;
pub mod event_log;
pub mod geometry;
pub mod history;
pub mod input;
pub mod measure;
pub mod sync;

pub use board::{Board, Surface};
pub use collaboration::{Replica, SyncAdapter};
pub use config::{BoardConfig, BoardContext, ConfigError, DisconnectPolicy, DrawMode, Theme};
pub use controller::{GestureKind, InputResponse, InteractionController, LiveGesture};
pub use event::{
    DrawEvent, EventError, ParticipantId, ShapeOutline, StrokeSegment, TextAnnotation, TextId,
    TextMove,
};
pub use event_log::{AppendOutcome, CanvasState, EventLog};
pub use geometry::{Point, SerializableColor, ShapeKind};
pub use history::HistoryStack;
pub use input::{MouseButton, PointerEvent};
pub use measure::{FixedAdvanceMeasurer, TextMeasurer};
pub use sync::{ConnectionState, NativeWebSocket, SyncEvent, Transport};
