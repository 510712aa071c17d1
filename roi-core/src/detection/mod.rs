//! detection — YOLOv8 object detection over ONNX Runtime
//!
//! Loads a YOLOv8 ONNX export, runs inference on a 640×640 resize of the
//! frame and returns boxes for every COCO class after class-agnostic NMS.
//!
//! The rest of the pipeline only sees the [`ObjectDetector`] trait, so tests
//! can drive it with fixed detection lists instead of a model.

use anyhow::{Context, Result, bail};
use fast_image_resize as fr;
use ort::execution_providers as ep;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;
use rayon::prelude::*;
use std::path::Path;
use tracing::debug;

use crate::video::RgbFrame;

// ── Constants ────────────────────────────────────────────────────────────────

/// YOLOv8 input size (square).
const YOLO_SIZE: u32 = 640;
/// Box coordinates preceding the class scores in each proposal row.
const BOX_FEATURES: usize = 4;
/// For very high-resolution inputs, run detection on a downscaled frame
/// and map detections back to source coordinates.
const DETECTION_MAX_DIM: u32 = 1920;

pub const DEFAULT_CONFIDENCE: f32 = 0.25;
pub const DEFAULT_IOU: f32 = 0.7;
pub const DEFAULT_MAX_DET: usize = 300;

/// COCO class names, indexed by YOLOv8 class id.
pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Human-readable name for a class id; `"unknown"` outside the table.
pub fn class_name(class_id: usize) -> &'static str {
    COCO_CLASSES.get(class_id).copied().unwrap_or("unknown")
}

// ── Public types ─────────────────────────────────────────────────────────────

/// One model output: axis-aligned box in pixel coordinates of the original
/// frame, confidence and class id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: usize) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
    pub fn center_x(&self) -> f32 {
        (self.x1 + self.x2) / 2.0
    }
    pub fn center_y(&self) -> f32 {
        (self.y1 + self.y2) / 2.0
    }
    pub fn class_name(&self) -> &'static str {
        class_name(self.class_id)
    }
    /// IoU (intersection over union) with another box.
    pub fn iou(&self, other: &Detection) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.width() * self.height() + other.width() * other.height() - inter;
        inter / union
    }
}

/// Thresholds applied while decoding model output.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub confidence: f32,
    pub iou: f32,
    /// Keep only these class ids; `None` keeps all.
    pub classes: Option<Vec<usize>>,
    /// Upper bound on detections kept per frame after NMS.
    pub max_det: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            iou: DEFAULT_IOU,
            classes: None,
            max_det: DEFAULT_MAX_DET,
        }
    }
}

/// Anything that turns a frame into detections.
pub trait ObjectDetector {
    fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<Detection>>;
}

// ── Detector ─────────────────────────────────────────────────────────────────

/// Wraps the YOLOv8 ONNX session.
pub struct Detector {
    session: Session,
    config: DetectorConfig,
    yolo_resizer: fr::Resizer,
    yolo_resize_buf: Vec<u8>,
    downscale_resizer: fr::Resizer,
    downscale_buf: Vec<u8>,
}

impl Detector {
    /// Load a YOLOv8 ONNX model from `model_path`.
    pub fn load<P: AsRef<Path>>(model_path: P, config: DetectorConfig) -> Result<Self> {
        let session = build_ort_session(model_path.as_ref())?;
        Ok(Self {
            session,
            config,
            yolo_resizer: fr::Resizer::new(),
            yolo_resize_buf: vec![0u8; (YOLO_SIZE * YOLO_SIZE * 3) as usize],
            downscale_resizer: fr::Resizer::new(),
            downscale_buf: Vec::new(),
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn detect_native(&mut self, frame: &RgbFrame) -> Result<Vec<Detection>> {
        let input_tensor = self.preprocess_yolo(frame)?;

        let outputs = self
            .session
            .run(ort::inputs!["images" => input_tensor])
            .context("YOLOv8 inference failed")?;

        // YOLOv8 output: [1, 4 + classes, proposals], stored row-major.
        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .context("failed to extract YOLOv8 output tensor")?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        let &[1, num_features, num_proposals] = dims.as_slice() else {
            bail!("unexpected YOLOv8 output shape {dims:?}");
        };

        let boxes = decode_output(
            data,
            num_features,
            num_proposals,
            frame.width,
            frame.height,
            &self.config,
        )?;
        debug!(count = boxes.len(), "detections after NMS");
        Ok(boxes)
    }

    fn preprocess_yolo(&mut self, frame: &RgbFrame) -> Result<ort::value::DynValue> {
        let src =
            fr::images::ImageRef::new(frame.width, frame.height, &frame.data, fr::PixelType::U8x3)
                .context("failed to create fast_image_resize source")?;

        let mut dst = fr::images::Image::from_vec_u8(
            YOLO_SIZE,
            YOLO_SIZE,
            std::mem::take(&mut self.yolo_resize_buf),
            fr::PixelType::U8x3,
        )
        .context("failed to create fast_image_resize destination")?;

        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
        self.yolo_resizer
            .resize(&src, &mut dst, Some(&options))
            .context("fast_image_resize YOLO downscale failed")?;

        self.yolo_resize_buf = dst.into_vec();
        let raw = &self.yolo_resize_buf;

        // NCHW float tensor: [1, 3, 640, 640].
        let size = (YOLO_SIZE * YOLO_SIZE) as usize;
        let mut tensor_data = vec![0f32; 3 * size];

        let (r_plane, gb_plane) = tensor_data.split_at_mut(size);
        let (g_plane, b_plane) = gb_plane.split_at_mut(size);
        rayon::join(
            || fill_plane(r_plane, raw, 0),
            || {
                rayon::join(
                    || fill_plane(g_plane, raw, 1),
                    || fill_plane(b_plane, raw, 2),
                )
            },
        );

        let shape = [1usize, 3, YOLO_SIZE as usize, YOLO_SIZE as usize];
        Ok(Tensor::from_array((shape, tensor_data.into_boxed_slice()))
            .context("failed to create YOLO input tensor")?
            .into_dyn())
    }

    fn downscale_frame(&mut self, frame: &RgbFrame, out_w: u32, out_h: u32) -> Result<RgbFrame> {
        let src =
            fr::images::ImageRef::new(frame.width, frame.height, &frame.data, fr::PixelType::U8x3)
                .context("failed to create detection downscale source")?;

        let out_len = (out_w * out_h * 3) as usize;
        if self.downscale_buf.len() != out_len {
            self.downscale_buf.resize(out_len, 0);
        }

        let mut dst = fr::images::Image::from_vec_u8(
            out_w,
            out_h,
            std::mem::take(&mut self.downscale_buf),
            fr::PixelType::U8x3,
        )
        .context("failed to create detection downscale destination")?;

        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
        self.downscale_resizer
            .resize(&src, &mut dst, Some(&options))
            .context("failed to downscale frame for detection")?;

        Ok(RgbFrame {
            data: dst.into_vec(),
            width: out_w,
            height: out_h,
            pts: frame.pts,
        })
    }
}

impl ObjectDetector for Detector {
    /// Run inference on `frame` and return boxes in original frame pixel
    /// coordinates after NMS.
    fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<Detection>> {
        frame.validate()?;

        if let Some((scaled_w, scaled_h)) = detection_size(frame.width, frame.height) {
            let mut scaled = self.downscale_frame(frame, scaled_w, scaled_h)?;
            let mut boxes = self.detect_native(&scaled)?;
            self.downscale_buf = std::mem::take(&mut scaled.data);
            rescale_boxes(
                &mut boxes,
                scaled_w as f32 / frame.width as f32,
                scaled_h as f32 / frame.height as f32,
            );
            return Ok(boxes);
        }

        self.detect_native(frame)
    }
}

// ── Pre/post-processing helpers ──────────────────────────────────────────────

/// Size to run detection at when the frame's long edge exceeds
/// `DETECTION_MAX_DIM`; `None` when the frame is used as-is.
fn detection_size(width: u32, height: u32) -> Option<(u32, u32)> {
    let max_dim = width.max(height);
    if max_dim <= DETECTION_MAX_DIM {
        return None;
    }
    let scale = DETECTION_MAX_DIM as f32 / max_dim as f32;
    Some((
        ((width as f32 * scale).round() as u32).max(1),
        ((height as f32 * scale).round() as u32).max(1),
    ))
}

/// Map boxes found on a frame scaled by `(sx, sy)` back to the source frame.
fn rescale_boxes(boxes: &mut [Detection], sx: f32, sy: f32) {
    for b in boxes {
        b.x1 /= sx;
        b.x2 /= sx;
        b.y1 /= sy;
        b.y2 /= sy;
    }
}

fn fill_plane(plane: &mut [f32], raw: &[u8], channel: usize) {
    plane
        .par_iter_mut()
        .enumerate()
        .for_each(|(idx, out)| *out = raw[idx * 3 + channel] as f32 / 255.0);
}

/// Decode a raw `[4 + classes, proposals]` YOLOv8 output into frame-space
/// detections.  Boxes are in 640-space on input and are stretched back to
/// `frame_w × frame_h`.
pub(crate) fn decode_output(
    data: &[f32],
    num_features: usize,
    num_proposals: usize,
    frame_w: u32,
    frame_h: u32,
    config: &DetectorConfig,
) -> Result<Vec<Detection>> {
    if num_features <= BOX_FEATURES {
        bail!("YOLOv8 output has no class scores ({num_features} features)");
    }
    if data.len() != num_features * num_proposals {
        bail!(
            "YOLOv8 output length {} does not match {num_features}x{num_proposals}",
            data.len()
        );
    }
    let num_classes = num_features - BOX_FEATURES;

    let scale_x = frame_w as f32 / YOLO_SIZE as f32;
    let scale_y = frame_h as f32 / YOLO_SIZE as f32;

    let candidates: Vec<Detection> = (0..num_proposals)
        .into_par_iter()
        .filter_map(|i| {
            // Data layout: [cx, cy, w, h, cls0_score, cls1_score, ...]
            let cx = data[i];
            let cy = data[num_proposals + i];
            let w = data[2 * num_proposals + i];
            let h = data[3 * num_proposals + i];

            let mut best_class = 0usize;
            let mut best_score = f32::MIN;
            for c in 0..num_classes {
                let s = data[(BOX_FEATURES + c) * num_proposals + i];
                if s > best_score {
                    best_score = s;
                    best_class = c;
                }
            }

            if best_score < config.confidence {
                return None;
            }
            if let Some(allowed) = &config.classes {
                if !allowed.contains(&best_class) {
                    return None;
                }
            }

            // (cx,cy,w,h) in 640-space → (x1,y1,x2,y2) in original frame
            let x1 = (cx - w / 2.0) * scale_x;
            let y1 = (cy - h / 2.0) * scale_y;
            let x2 = (cx + w / 2.0) * scale_x;
            let y2 = (cy + h / 2.0) * scale_y;

            Some(Detection {
                x1: x1.max(0.0),
                y1: y1.max(0.0),
                x2: x2.min(frame_w as f32),
                y2: y2.min(frame_h as f32),
                confidence: best_score,
                class_id: best_class,
            })
        })
        .collect();

    Ok(nms(candidates, config.iou, config.max_det))
}

fn build_ort_session(model_path: &Path) -> Result<Session> {
    if !model_path.is_file() {
        bail!("YOLOv8 model not found: {}", model_path.display());
    }
    let mut builder = Session::builder().context("failed to create ORT session builder")?;
    builder = builder
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("failed to set ORT optimization level")?;
    builder = builder
        .with_intra_threads(4)
        .context("failed to set ORT intra threads")?;
    builder = builder
        .with_execution_providers(execution_providers())
        .context("failed to register execution providers")?;
    builder
        .commit_from_file(model_path)
        .context("failed to load YOLOv8 ONNX model")
}

#[cfg(feature = "cuda")]
fn execution_providers() -> Vec<ep::ExecutionProviderDispatch> {
    vec![
        ep::CUDAExecutionProvider::default().with_device_id(0).build(),
        ep::CPUExecutionProvider::default().build(),
    ]
}

#[cfg(not(feature = "cuda"))]
fn execution_providers() -> Vec<ep::ExecutionProviderDispatch> {
    vec![ep::CPUExecutionProvider::default().build()]
}

// ── Non-Maximum Suppression ──────────────────────────────────────────────────

/// Greedy class-agnostic NMS: sort by confidence descending, suppress any
/// overlapping box regardless of class, stop after `max_det` survivors.
fn nms(mut boxes: Vec<Detection>, iou_thresh: f32, max_det: usize) -> Vec<Detection> {
    boxes.sort_unstable_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if kept.len() >= max_det {
            break;
        }
        if suppressed[i] {
            continue;
        }
        kept.push(boxes[i]);
        for j in (i + 1)..boxes.len() {
            if boxes[i].iou(&boxes[j]) > iou_thresh {
                suppressed[j] = true;
            }
        }
    }

    kept
}
