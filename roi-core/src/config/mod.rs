//! config — runtime settings for the capture / detect / annotate loop
//!
//! Defaults reproduce the stock demo (left-half zone, 1280×720, red outline).
//! An optional TOML file overrides any subset of them; the CLI applies its
//! flags on top and calls [`AppConfig::validate`] last.

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detection::DetectorConfig;
use crate::rendering::{AnnotatorStyle, Bgr};
use crate::zone::{Anchor, Zone};

pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;
pub const DEFAULT_MODEL: &str = "yolov8l.onnx";
/// Left half of the frame, in normalized coordinates.
pub const DEFAULT_ZONE_POLYGON: [[f32; 2]; 4] = [[0.0, 0.0], [0.5, 0.0], [0.5, 1.0], [0.0, 1.0]];

// ── File schema ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    camera: Option<CameraConfigFile>,
    zone: Option<ZoneConfigFile>,
    colors: Option<ColorsConfigFile>,
    drawing: Option<DrawingConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    device: Option<i32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ZoneConfigFile {
    polygon: Option<Vec<[f32; 2]>>,
    anchor: Option<Anchor>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ColorsConfigFile {
    #[serde(rename = "box")]
    box_color: Option<Bgr>,
    highlight: Option<Bgr>,
    label: Option<Bgr>,
    zone: Option<Bgr>,
    zone_occupied: Option<Bgr>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DrawingConfigFile {
    thickness: Option<i32>,
    occupied_thickness: Option<i32>,
    text_scale: Option<f64>,
    text_thickness: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    model: Option<PathBuf>,
    confidence: Option<f32>,
    iou: Option<f32>,
    classes: Option<Vec<usize>>,
    max_det: Option<usize>,
}

// ── Resolved settings ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub device: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSettings {
    /// Normalized `[x, y]` vertices.
    pub polygon: Vec<[f32; 2]>,
    pub anchor: Anchor,
}

impl ZoneSettings {
    /// Scale the polygon to a concrete frame size.
    pub fn build(&self, width: u32, height: u32) -> Result<Zone> {
        Zone::from_normalized(&self.polygon, width, height, self.anchor)
            .context("invalid zone configuration")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub camera: CameraSettings,
    pub model_path: PathBuf,
    pub detector: DetectorConfig,
    pub zone: ZoneSettings,
    pub style: AnnotatorStyle,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            camera: CameraSettings {
                device: 0,
                width: DEFAULT_WIDTH,
                height: DEFAULT_HEIGHT,
            },
            model_path: PathBuf::from(DEFAULT_MODEL),
            detector: DetectorConfig::default(),
            zone: ZoneSettings {
                polygon: DEFAULT_ZONE_POLYGON.to_vec(),
                anchor: Anchor::default(),
            },
            style: AnnotatorStyle::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, overlaid with `path` when given.  Not validated yet.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                Self::from_toml_str(&raw)
                    .with_context(|| format!("invalid config file {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(raw).map_err(|e| anyhow!("{e}"))?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: ConfigFile) -> Self {
        let mut cfg = Self::default();

        if let Some(camera) = file.camera {
            cfg.camera.device = camera.device.unwrap_or(cfg.camera.device);
            cfg.camera.width = camera.width.unwrap_or(cfg.camera.width);
            cfg.camera.height = camera.height.unwrap_or(cfg.camera.height);
        }
        if let Some(zone) = file.zone {
            if let Some(polygon) = zone.polygon {
                cfg.zone.polygon = polygon;
            }
            cfg.zone.anchor = zone.anchor.unwrap_or(cfg.zone.anchor);
        }
        if let Some(colors) = file.colors {
            let style = &mut cfg.style;
            style.box_color = colors.box_color.unwrap_or(style.box_color);
            style.highlight_color = colors.highlight.unwrap_or(style.highlight_color);
            style.label_color = colors.label.unwrap_or(style.label_color);
            style.zone_color = colors.zone.unwrap_or(style.zone_color);
            style.zone_occupied_color = colors.zone_occupied.unwrap_or(style.zone_occupied_color);
        }
        if let Some(drawing) = file.drawing {
            let style = &mut cfg.style;
            style.thickness = drawing.thickness.unwrap_or(style.thickness);
            style.occupied_thickness = drawing
                .occupied_thickness
                .unwrap_or(style.occupied_thickness);
            style.text_scale = drawing.text_scale.unwrap_or(style.text_scale);
            style.text_thickness = drawing.text_thickness.unwrap_or(style.text_thickness);
        }
        if let Some(detector) = file.detector {
            if let Some(model) = detector.model {
                cfg.model_path = model;
            }
            cfg.detector.confidence = detector.confidence.unwrap_or(cfg.detector.confidence);
            cfg.detector.iou = detector.iou.unwrap_or(cfg.detector.iou);
            cfg.detector.max_det = detector.max_det.unwrap_or(cfg.detector.max_det);
            if detector.classes.is_some() {
                cfg.detector.classes = detector.classes;
            }
        }
        cfg
    }

    /// Reject settings that would only fail later, mid-stream.
    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            bail!(
                "capture resolution must be non-zero, got {}x{}",
                self.camera.width,
                self.camera.height
            );
        }
        if !(0.0..=1.0).contains(&self.detector.confidence) {
            bail!(
                "detector confidence must be within [0, 1], got {}",
                self.detector.confidence
            );
        }
        if !(0.0..=1.0).contains(&self.detector.iou) {
            bail!("detector iou must be within [0, 1], got {}", self.detector.iou);
        }
        if self.detector.max_det == 0 {
            bail!("detector max_det must be at least 1");
        }
        if self.style.thickness < 1 {
            bail!("drawing thickness must be at least 1, got {}", self.style.thickness);
        }
        if self.style.occupied_thickness < 0 {
            bail!(
                "occupied thickness must not be negative, got {}",
                self.style.occupied_thickness
            );
        }
        if self.style.text_thickness < 1 {
            bail!(
                "text thickness must be at least 1, got {}",
                self.style.text_thickness
            );
        }
        if !(self.style.text_scale > 0.0) {
            bail!("text scale must be positive, got {}", self.style.text_scale);
        }
        // Builds (and discards) the zone at the configured size so polygon
        // errors surface before the camera is opened.
        self.zone.build(self.camera.width, self.camera.height)?;
        Ok(())
    }
}
