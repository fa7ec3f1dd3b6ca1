//! Scene construction: a pure fold from the event log to a display list.

use chalkboard_core::config::BoardContext;
use chalkboard_core::controller::LiveGesture;
use chalkboard_core::event::TextId;
use chalkboard_core::event_log::{CanvasState, EventLog};
use chalkboard_core::geometry::{ShapeKind, circle_radius, outline_rect};
use kurbo::{Point, Rect};
use peniko::Color;
use thiserror::Error;

/// Renderer errors.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Invalid surface size {0}x{1}")]
    InvalidSize(u32, u32),
    #[error("Font error: {0}")]
    Font(String),
    #[error("Encode failed: {0}")]
    Encode(#[from] png::EncodingError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RendererError>;

/// Everything the renderer reads besides the log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderContext {
    pub width: u32,
    pub height: u32,
    pub background_color: Color,
    /// Stroke width for segments and outlines.
    pub line_width: f64,
    pub font_size: f64,
}

impl RenderContext {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            background_color: Color::WHITE,
            line_width: 3.0,
            font_size: 16.0,
        }
    }

    /// Take size, background and stroke settings from a board context.
    pub fn from_board(context: &BoardContext) -> Self {
        let config = context.config();
        Self {
            width: config.surface_width,
            height: config.surface_height,
            background_color: context.background().into(),
            line_width: context.line_width(),
            font_size: context.font_size(),
        }
    }

    /// Set the background color.
    pub fn with_background(mut self, color: Color) -> Self {
        self.background_color = color;
        self
    }

    pub fn with_line_width(mut self, line_width: f64) -> Self {
        self.line_width = line_width;
        self
    }
}

/// One drawing primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Segment {
        from: Point,
        to: Point,
        color: Color,
    },
    RectOutline {
        rect: Rect,
        color: Color,
    },
    CircleOutline {
        center: Point,
        radius: f64,
        color: Color,
    },
    /// Single-line text whose baseline starts at `position`.
    Text {
        content: String,
        position: Point,
        width: f64,
        color: Color,
    },
}

/// Ordered display list for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub width: u32,
    pub height: u32,
    pub background_color: Color,
    pub line_width: f64,
    pub font_size: f64,
    pub commands: Vec<DrawCommand>,
}

impl Scene {
    fn empty(ctx: &RenderContext) -> Self {
        Self {
            width: ctx.width,
            height: ctx.height,
            background_color: ctx.background_color,
            line_width: ctx.line_width,
            font_size: ctx.font_size,
            commands: Vec::new(),
        }
    }
}

/// Build the scene for `log` plus the live gesture.
///
/// Draw order: strokes, shapes, texts (at their current position), then the
/// live preview. A text being dragged is shown only at its live position.
pub fn build_scene(log: &EventLog, live: Option<&LiveGesture>, ctx: &RenderContext) -> Scene {
    let state = log.state();
    build_scene_from_state(&state, live, ctx)
}

/// Same as [`build_scene`] for an already folded state.
pub fn build_scene_from_state(
    state: &CanvasState,
    live: Option<&LiveGesture>,
    ctx: &RenderContext,
) -> Scene {
    let mut scene = Scene::empty(ctx);

    for segment in &state.strokes {
        scene.commands.push(DrawCommand::Segment {
            from: segment.from_point,
            to: segment.to_point,
            color: segment.color.into(),
        });
    }

    for shape in &state.shapes {
        if let Some(command) = shape_command(shape.kind, shape.origin_point, shape.terminal_point, shape.color.into()) {
            scene.commands.push(command);
        }
    }

    let dragged: Option<(TextId, Point)> = match live {
        Some(LiveGesture::TextDrag { id, position }) => Some((*id, *position)),
        _ => None,
    };

    for text in &state.texts {
        let position = match dragged {
            Some((id, position)) if id == text.id => position,
            _ => text.position,
        };
        scene.commands.push(DrawCommand::Text {
            content: text.content.clone(),
            position,
            width: text.measured_width,
            color: text.color.into(),
        });
    }

    if let Some(LiveGesture::Shape {
        kind,
        anchor,
        current,
        color,
    }) = live
    {
        if let Some(command) = shape_command(*kind, *anchor, *current, (*color).into()) {
            scene.commands.push(command);
        }
    }

    scene
}

/// Outline command for a shape, or `None` when it has no area.
fn shape_command(kind: ShapeKind, origin: Point, terminal: Point, color: Color) -> Option<DrawCommand> {
    match kind {
        ShapeKind::Rectangle => {
            let rect = outline_rect(origin, terminal);
            if rect.width() <= 0.0 || rect.height() <= 0.0 {
                log::debug!("Skipping degenerate rectangle at ({}, {})", origin.x, origin.y);
                return None;
            }
            Some(DrawCommand::RectOutline { rect, color })
        }
        ShapeKind::Circle => {
            let radius = circle_radius(origin, terminal);
            if radius <= 0.0 {
                log::debug!("Skipping zero-radius circle at ({}, {})", origin.x, origin.y);
                return None;
            }
            Some(DrawCommand::CircleOutline {
                center: origin,
                radius,
                color,
            })
        }
    }
}
