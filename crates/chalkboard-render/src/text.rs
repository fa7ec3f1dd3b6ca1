//! Font-backed text measurement and glyph rasterization.

use std::path::Path;

use ab_glyph::{Font, FontArc, GlyphId, ScaleFont, point};
use chalkboard_core::measure::TextMeasurer;
use image::{Rgba, RgbaImage};
use kurbo::Point;

use crate::raster::blend;
use crate::renderer::{RenderResult, RendererError};

/// Load a TrueType/OpenType font from disk.
pub fn load_font(path: impl AsRef<Path>) -> RenderResult<FontArc> {
    let bytes = std::fs::read(path)?;
    FontArc::try_from_vec(bytes).map_err(|e| RendererError::Font(e.to_string()))
}

/// Lay out one line starting at x = 0. Returns glyphs with their pen
/// offsets and the total advance width.
fn layout_line(font: &FontArc, text: &str, font_size: f32) -> (Vec<(GlyphId, f32)>, f32) {
    let scaled = font.as_scaled(font_size);
    let mut glyphs = Vec::with_capacity(text.len());
    let mut cursor_x = 0.0f32;
    let mut last_glyph: Option<GlyphId> = None;

    for ch in text.chars() {
        let glyph_id = font.glyph_id(ch);
        if let Some(prev) = last_glyph {
            cursor_x += scaled.kern(prev, glyph_id);
        }
        glyphs.push((glyph_id, cursor_x));
        cursor_x += scaled.h_advance(glyph_id);
        last_glyph = Some(glyph_id);
    }

    (glyphs, cursor_x)
}

/// Measures text with real glyph advances.
#[derive(Clone)]
pub struct FontMeasurer {
    font: FontArc,
}

impl FontMeasurer {
    pub fn new(font: FontArc) -> Self {
        Self { font }
    }
}

impl TextMeasurer for FontMeasurer {
    fn measure(&self, text: &str, font_size: f64) -> f64 {
        layout_line(&self.font, text, font_size as f32).1 as f64
    }
}

/// Draw `text` with its baseline starting at `position`.
pub(crate) fn draw_glyphs(
    image: &mut RgbaImage,
    font: &FontArc,
    text: &str,
    position: Point,
    font_size: f64,
    color: Rgba<u8>,
) {
    let size = font_size as f32;
    let (glyphs, _) = layout_line(font, text, size);
    let origin_x = position.x as f32;
    let baseline = position.y as f32;

    for (glyph_id, x) in glyphs {
        let glyph = glyph_id.with_scale_and_position(size, point(origin_x + x, baseline));
        let Some(outlined) = font.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outlined.px_bounds();
        outlined.draw(|px, py, coverage| {
            let x = bounds.min.x as i64 + px as i64;
            let y = bounds.min.y as i64 + py as i64;
            blend(image, x, y, color, coverage);
        });
    }
}
