//! Replays a JSON array of drawing events and writes the result as a PNG.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;

use chalkboard_core::config::{BoardConfig, BoardContext, ConfigError};
use chalkboard_core::event::DrawEvent;
use chalkboard_core::event_log::EventLog;
use chalkboard_render::{RasterRenderer, RenderContext, RendererError, build_scene, load_font, write_png};
use clap::Parser;
use thiserror::Error;

/// Render a saved Chalkboard event stream to a PNG.
#[derive(Parser, Debug)]
#[command(name = "chalkboard-replay", version, about, long_about = None)]
struct Args {
    /// JSON array of drawing events
    events: PathBuf,
    /// Output PNG path
    output: PathBuf,
    /// Board configuration (surface size, theme, line width)
    #[arg(long)]
    config: Option<PathBuf>,
    /// TrueType/OpenType font for text annotations
    #[arg(long)]
    font: Option<PathBuf>,
}

#[derive(Debug, Error)]
enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid event file: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Render(#[from] RendererError),
}

fn run(args: Args) -> Result<(), ReplayError> {
    let config = match &args.config {
        Some(path) => BoardConfig::load(path)?,
        None => BoardConfig::default(),
    };
    let context = BoardContext::new(config);

    let values: Vec<serde_json::Value> = serde_json::from_reader(File::open(&args.events)?)?;
    let total = values.len();
    let mut log = EventLog::with_pending_window(context.config().pending_move_window);
    for value in values {
        match DrawEvent::decode(value) {
            Ok(event) => {
                log.append(event);
            }
            Err(e) => log::warn!("Skipping event: {}", e),
        }
    }
    log::info!("Replayed {} of {} events", log.len(), total);

    let renderer = match &args.font {
        Some(path) => RasterRenderer::with_font(load_font(path)?),
        None => RasterRenderer::new(),
    };
    let scene = build_scene(&log, None, &RenderContext::from_board(&context));
    let image = renderer.render(&scene)?;

    write_png(&image, BufWriter::new(File::create(&args.output)?))?;
    log::info!("Wrote {}x{} PNG to {}", image.width(), image.height(), args.output.display());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("chalkboard-replay: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_positional_and_options() {
        let args = Args::try_parse_from([
            "chalkboard-replay",
            "events.json",
            "out.png",
            "--font",
            "mono.ttf",
        ])
        .unwrap();
        assert_eq!(args.events, PathBuf::from("events.json"));
        assert_eq!(args.output, PathBuf::from("out.png"));
        assert_eq!(args.font, Some(PathBuf::from("mono.ttf")));
        assert!(args.config.is_none());
    }

    #[test]
    fn test_args_require_output() {
        assert!(Args::try_parse_from(["chalkboard-replay", "events.json"]).is_err());
    }

    #[test]
    fn test_replay_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let events = dir.path().join("events.json");
        let output = dir.path().join("out.png");
        std::fs::write(
            &events,
            r#"[
                { "type": "stroke", "from_point": { "x": 1.0, "y": 1.0 }, "to_point": { "x": 30.0, "y": 30.0 },
                  "color": { "r": 255, "g": 0, "b": 0, "a": 255 } },
                { "type": "sticker", "emoji": "x" }
            ]"#,
        )
        .unwrap();

        run(Args {
            events,
            output: output.clone(),
            config: None,
            font: None,
        })
        .unwrap();

        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}
