//! Chalkboard Render Library
//!
//! Pure fold renderer for the Chalkboard event log, plus a software
//! rasterizer, font support and PNG export.

mod export;
mod raster;
mod renderer;
mod text;

pub use export::{encode_png, write_png};
pub use raster::{RasterRenderer, RasterSurface};
pub use renderer::{
    DrawCommand, RenderContext, RenderResult, RendererError, Scene, build_scene,
    build_scene_from_state,
};
pub use text::{FontMeasurer, load_font};
