use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use roi_core::{
    config::AppConfig,
    detection::Detector,
    pipeline::FrameProcessor,
    rendering::Annotator,
    runtime::configure_ort_dylib,
    video::{DEFAULT_KEY_DELAY_MS, DisplaySink, FrameSource, frame_size},
};

const WINDOW_TITLE: &str = "roi-watch";

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "roi-watch",
    version,
    about = "Live webcam object detection with a region-of-interest zone",
    long_about = None,
    args_override_self = true
)]
struct Cli {
    /// Requested capture resolution (the camera may choose another); the last
    /// occurrence wins
    #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"], action = ArgAction::Set)]
    webcam_resolution: Option<Vec<u32>>,

    /// Camera device index
    #[arg(long)]
    camera: Option<i32>,

    /// YOLOv8 ONNX model path [default: yolov8l.onnx]
    #[arg(long)]
    model: Option<PathBuf>,

    /// TOML file with zone, colour, drawing and detector settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Minimum detection confidence (0–1)
    #[arg(long)]
    conf: Option<f32>,

    /// NMS IoU threshold (0–1)
    #[arg(long)]
    iou: Option<f32>,

    /// Run without a preview window; occupancy changes are logged instead
    #[arg(long)]
    headless: bool,

    /// Stop after this many frames (0 runs until ESC or end of stream)
    #[arg(long, default_value_t = 0)]
    max_frames: u64,
}

impl Cli {
    /// Flags win over the config file, which wins over the defaults.
    fn apply(&self, cfg: &mut AppConfig) {
        if let Some([w, h]) = self.webcam_resolution.as_deref() {
            cfg.camera.width = *w;
            cfg.camera.height = *h;
        }
        if let Some(camera) = self.camera {
            cfg.camera.device = camera;
        }
        if let Some(model) = &self.model {
            cfg.model_path = model.clone();
        }
        if let Some(conf) = self.conf {
            cfg.detector.confidence = conf;
        }
        if let Some(iou) = self.iou {
            cfg.detector.iou = iou;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Respect RUST_LOG; default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut cfg = AppConfig::load(cli.config.as_deref())?;
    cli.apply(&mut cfg);
    cfg.validate()?;

    run(&cfg, cli.headless, cli.max_frames)
}

fn run(cfg: &AppConfig, headless: bool, max_frames: u64) -> Result<()> {
    info!("roi-watch");
    info!("  camera : {}", cfg.camera.device);
    info!("  model  : {}", cfg.model_path.display());
    info!(
        "  zone   : {} points, anchor {:?}",
        cfg.zone.polygon.len(),
        cfg.zone.anchor
    );

    configure_ort_dylib();
    let detector = Detector::load(&cfg.model_path, cfg.detector.clone())
        .with_context(|| format!("failed to load model {}", cfg.model_path.display()))?;

    let mut source = FrameSource::open(cfg.camera.device, cfg.camera.width, cfg.camera.height)?;
    let mut frame = source
        .read()?
        .with_context(|| format!("camera {} delivered no frames", cfg.camera.device))?;

    // The driver may have ignored the requested size; the zone follows the
    // frames actually delivered.
    let (width, height) = frame_size(&frame);
    if (width, height) != (cfg.camera.width, cfg.camera.height) {
        warn!(
            requested = %format!("{}x{}", cfg.camera.width, cfg.camera.height),
            actual = %format!("{width}x{height}"),
            "camera resolution differs from request; scaling zone to actual frames"
        );
    }
    let zone = cfg.zone.build(width, height)?;

    let mut processor = FrameProcessor::new(detector, zone, Annotator::new(cfg.style.clone()));
    let mut display = if headless {
        None
    } else {
        Some(DisplaySink::open(WINDOW_TITLE, DEFAULT_KEY_DELAY_MS)?)
    };

    let mut last_in_zone = None;
    loop {
        let report = processor.process(&mut frame)?;

        if last_in_zone != Some(report.in_zone()) {
            info!(
                frame = processor.frames_processed(),
                in_zone = report.in_zone(),
                detections = report.detections.len(),
                "zone occupancy changed"
            );
            last_in_zone = Some(report.in_zone());
        }

        if let Some(display) = display.as_mut() {
            display.show(&frame)?;
            if display.exit_requested()? {
                info!("ESC pressed, exiting");
                break;
            }
        }

        if max_frames > 0 && processor.frames_processed() as u64 >= max_frames {
            info!(max_frames, "frame limit reached");
            break;
        }

        match source.read()? {
            Some(next) => frame = next,
            None => {
                warn!(
                    frames = source.frames_read(),
                    "camera stopped delivering frames"
                );
                break;
            }
        }
    }

    info!(frames = processor.frames_processed(), "done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "roi-watch",
            "--webcam-resolution",
            "640",
            "480",
            "--conf",
            "0.5",
            "--headless",
        ]);
        let mut cfg = AppConfig::default();
        cli.apply(&mut cfg);

        assert_eq!((cfg.camera.width, cfg.camera.height), (640, 480));
        assert_eq!(cfg.detector.confidence, 0.5);
        assert_eq!(cfg.model_path, PathBuf::from("yolov8l.onnx"));
        assert!(cli.headless);
        assert_eq!(cli.max_frames, 0);
    }

    #[test]
    fn repeated_resolution_keeps_last_pair() {
        let cli = Cli::parse_from([
            "roi-watch",
            "--webcam-resolution",
            "640",
            "480",
            "--webcam-resolution",
            "800",
            "600",
        ]);
        assert_eq!(cli.webcam_resolution.as_deref(), Some(&[800, 600][..]));

        let mut cfg = AppConfig::default();
        cli.apply(&mut cfg);
        assert_eq!((cfg.camera.width, cfg.camera.height), (800, 600));
    }

    #[test]
    fn resolution_needs_two_values() {
        assert!(Cli::try_parse_from(["roi-watch", "--webcam-resolution", "640"]).is_err());
    }
}
