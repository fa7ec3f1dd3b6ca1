//! Software rasterizer: paints a [`Scene`] into an RGBA image.

use ab_glyph::FontArc;
use chalkboard_core::board::Surface;
use chalkboard_core::config::BoardContext;
use chalkboard_core::controller::LiveGesture;
use chalkboard_core::event::StrokeSegment;
use chalkboard_core::event_log::EventLog;
use chalkboard_core::geometry::text_box;
use image::{Rgba, RgbaImage};
use kurbo::{Point, Rect};
use peniko::Color;

use crate::renderer::{DrawCommand, RenderContext, RenderResult, RendererError, Scene, build_scene};
use crate::text::draw_glyphs;

/// Paints scenes with round-capped strokes. Text uses `font` when one is
/// loaded, otherwise the text's hit box is outlined.
#[derive(Clone, Default)]
pub struct RasterRenderer {
    font: Option<FontArc>,
}

impl RasterRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(font: FontArc) -> Self {
        Self { font: Some(font) }
    }

    pub fn font(&self) -> Option<&FontArc> {
        self.font.as_ref()
    }

    /// Render into a fresh image.
    pub fn render(&self, scene: &Scene) -> RenderResult<RgbaImage> {
        if scene.width == 0 || scene.height == 0 {
            return Err(RendererError::InvalidSize(scene.width, scene.height));
        }
        let mut image = RgbaImage::new(scene.width, scene.height);
        self.render_into(scene, &mut image);
        Ok(image)
    }

    /// Repaint `image` completely. Nothing previously drawn survives.
    pub fn render_into(&self, scene: &Scene, image: &mut RgbaImage) {
        let background = to_rgba(scene.background_color);
        for pixel in image.pixels_mut() {
            *pixel = background;
        }
        for command in &scene.commands {
            self.draw_command(image, command, scene);
        }
    }

    fn draw_command(&self, image: &mut RgbaImage, command: &DrawCommand, scene: &Scene) {
        let radius = scene.line_width / 2.0;
        match command {
            DrawCommand::Segment { from, to, color } => {
                stroke_segment(image, *from, *to, radius, to_rgba(*color));
            }
            DrawCommand::RectOutline { rect, color } => {
                stroke_rect(image, *rect, radius, to_rgba(*color));
            }
            DrawCommand::CircleOutline {
                center,
                radius: circle,
                color,
            } => {
                stroke_circle(image, *center, *circle, radius, to_rgba(*color));
            }
            DrawCommand::Text {
                content,
                position,
                width,
                color,
            } => match &self.font {
                Some(font) => draw_glyphs(image, font, content, *position, scene.font_size, to_rgba(*color)),
                None => stroke_rect(image, text_box(*position, *width), 0.5, to_rgba(*color)),
            },
        }
    }
}

pub(crate) fn to_rgba(color: Color) -> Rgba<u8> {
    let rgba = color.to_rgba8();
    Rgba([rgba.r, rgba.g, rgba.b, rgba.a])
}

/// Source-over blend of `color` at `coverage` onto one pixel.
pub(crate) fn blend(image: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>, coverage: f32) {
    if x < 0 || y < 0 || x >= image.width() as i64 || y >= image.height() as i64 {
        return;
    }
    let alpha = (color.0[3] as f32 / 255.0) * coverage.clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return;
    }
    let pixel = image.get_pixel_mut(x as u32, y as u32);
    if alpha >= 1.0 {
        *pixel = Rgba([color.0[0], color.0[1], color.0[2], 255]);
        return;
    }
    for channel in 0..3 {
        let dst = pixel.0[channel] as f32;
        let src = color.0[channel] as f32;
        pixel.0[channel] = (src * alpha + dst * (1.0 - alpha)).round() as u8;
    }
    let dst_alpha = pixel.0[3] as f32 / 255.0;
    pixel.0[3] = ((alpha + dst_alpha * (1.0 - alpha)) * 255.0).round() as u8;
}

/// Pixel bounds of `rect` grown by `pad`, clipped to the image.
fn pixel_span(image: &RgbaImage, rect: Rect, pad: f64) -> Option<(i64, i64, i64, i64)> {
    let x0 = ((rect.x0 - pad).floor() as i64).max(0);
    let y0 = ((rect.y0 - pad).floor() as i64).max(0);
    let x1 = ((rect.x1 + pad).ceil() as i64).min(image.width() as i64 - 1);
    let y1 = ((rect.y1 + pad).ceil() as i64).min(image.height() as i64 - 1);
    (x0 <= x1 && y0 <= y1).then_some((x0, y0, x1, y1))
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f64 {
    let ab = b - a;
    let len_sq = ab.hypot2();
    if len_sq == 0.0 {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}

/// A round-capped line: every pixel whose center lies within `radius` of the segment.
pub(crate) fn stroke_segment(image: &mut RgbaImage, from: Point, to: Point, radius: f64, color: Rgba<u8>) {
    let bounds = Rect::from_points(from, to);
    let Some((x0, y0, x1, y1)) = pixel_span(image, bounds, radius + 1.0) else {
        return;
    };
    for y in y0..=y1 {
        for x in x0..=x1 {
            let center = Point::new(x as f64 + 0.5, y as f64 + 0.5);
            if distance_to_segment(center, from, to) <= radius {
                blend(image, x, y, color, 1.0);
            }
        }
    }
}

fn stroke_rect(image: &mut RgbaImage, rect: Rect, radius: f64, color: Rgba<u8>) {
    let corners = [
        Point::new(rect.x0, rect.y0),
        Point::new(rect.x1, rect.y0),
        Point::new(rect.x1, rect.y1),
        Point::new(rect.x0, rect.y1),
    ];
    // Edges share corner pixels; each pixel is blended at most once.
    let Some((x0, y0, x1, y1)) = pixel_span(image, rect, radius + 1.0) else {
        return;
    };
    for y in y0..=y1 {
        for x in x0..=x1 {
            let center = Point::new(x as f64 + 0.5, y as f64 + 0.5);
            let hit = (0..4).any(|i| distance_to_segment(center, corners[i], corners[(i + 1) % 4]) <= radius);
            if hit {
                blend(image, x, y, color, 1.0);
            }
        }
    }
}

fn stroke_circle(image: &mut RgbaImage, center: Point, circle: f64, radius: f64, color: Rgba<u8>) {
    let bounds = Rect::new(center.x - circle, center.y - circle, center.x + circle, center.y + circle);
    let Some((x0, y0, x1, y1)) = pixel_span(image, bounds, radius + 1.0) else {
        return;
    };
    for y in y0..=y1 {
        for x in x0..=x1 {
            let p = Point::new(x as f64 + 0.5, y as f64 + 0.5);
            if (p.distance(center) - circle).abs() <= radius {
                blend(image, x, y, color, 1.0);
            }
        }
    }
}

/// A [`Surface`] backed by an RGBA image.
#[derive(Clone)]
pub struct RasterSurface {
    renderer: RasterRenderer,
    image: RgbaImage,
}

impl RasterSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_renderer(width, height, RasterRenderer::new())
    }

    pub fn with_renderer(width: u32, height: u32, renderer: RasterRenderer) -> Self {
        Self {
            renderer,
            image: RgbaImage::new(width.max(1), height.max(1)),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    fn render_context(&self, context: &BoardContext) -> RenderContext {
        let mut ctx = RenderContext::from_board(context);
        ctx.width = self.image.width();
        ctx.height = self.image.height();
        ctx
    }
}

impl Surface for RasterSurface {
    type Snapshot = RgbaImage;

    fn redraw(&mut self, log: &EventLog, live: Option<&LiveGesture>, context: &BoardContext) {
        let scene = build_scene(log, live, &self.render_context(context));
        self.renderer.render_into(&scene, &mut self.image);
    }

    fn draw_segment(&mut self, segment: &StrokeSegment, context: &BoardContext) {
        let color = to_rgba(segment.color.into());
        stroke_segment(
            &mut self.image,
            segment.from_point,
            segment.to_point,
            context.line_width() / 2.0,
            color,
        );
    }

    fn capture(&self) -> RgbaImage {
        self.image.clone()
    }

    fn restore(&mut self, snapshot: &RgbaImage) {
        self.image.clone_from(snapshot);
    }
}
