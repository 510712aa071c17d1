//! video — OpenCV capture + display bridge
//!
//! `FrameSource` owns the camera, `DisplaySink` owns the preview window.
//! Both are acquired once at startup and released on drop, so an early
//! return from the frame loop still frees the device and closes the window.
//!
//! Frames travel through the loop as BGR `Mat`s; the detector gets a packed
//! RGB copy (`RgbFrame`).

use anyhow::{Context, Result, bail};
use opencv::{core, highgui, imgproc, prelude::*, videoio};
use tracing::{info, warn};

/// Key code returned by `wait_key` for ESC.
pub const ESC_KEY: i32 = 27;
/// How long the preview window pumps events per frame, in milliseconds.
pub const DEFAULT_KEY_DELAY_MS: i32 = 30;

/// A single video frame in packed RGB24 format, along with its index in the
/// capture stream.
#[derive(Debug, Clone)]
pub struct RgbFrame {
    pub data: Vec<u8>, // packed RGB24, row-major
    pub width: u32,
    pub height: u32,
    pub pts: i64,
}

impl RgbFrame {
    /// Copy an 8-bit BGR `Mat` into a packed RGB frame.
    pub fn from_bgr_mat(mat: &Mat, pts: i64) -> Result<Self> {
        if mat.empty() {
            bail!("cannot convert an empty frame");
        }
        if mat.typ() != core::CV_8UC3 {
            bail!("expected an 8-bit 3-channel frame, got type {}", mat.typ());
        }

        // The converted Mat is freshly allocated, so it is continuous even
        // when `mat` is an ROI view.
        let mut rgb = Mat::default();
        imgproc::cvt_color_def(mat, &mut rgb, imgproc::COLOR_BGR2RGB)
            .context("failed to convert frame to RGB")?;

        let width = rgb.cols() as u32;
        let height = rgb.rows() as u32;
        let data = rgb
            .data_bytes()
            .context("failed to read frame bytes")?
            .to_vec();

        Ok(Self {
            data,
            width,
            height,
            pts,
        })
    }

    /// Reject frames whose buffer does not match their dimensions.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("malformed frame: {}x{}", self.width, self.height);
        }
        let expected = self.width as usize * self.height as usize * 3;
        if self.data.len() != expected {
            bail!(
                "malformed frame: {}x{} needs {expected} bytes, got {}",
                self.width,
                self.height,
                self.data.len()
            );
        }
        Ok(())
    }
}

// ── Capture ──────────────────────────────────────────────────────────────────

/// A camera opened at a requested resolution.
pub struct FrameSource {
    capture: videoio::VideoCapture,
    device: i32,
    frames_read: i64,
}

impl FrameSource {
    /// Open camera `device` and request `width × height`.  The driver may pick
    /// a different mode; callers should size the zone from the first frame.
    pub fn open(device: i32, width: u32, height: u32) -> Result<Self> {
        let mut capture = videoio::VideoCapture::new(device, videoio::CAP_ANY)
            .with_context(|| format!("failed to open camera {device}"))?;
        if !capture.is_opened().context("failed to query camera state")? {
            bail!("camera {device} is not available");
        }

        for (prop, value, name) in [
            (videoio::CAP_PROP_FRAME_WIDTH, width, "width"),
            (videoio::CAP_PROP_FRAME_HEIGHT, height, "height"),
        ] {
            let accepted = capture
                .set(prop, value as f64)
                .with_context(|| format!("failed to set capture {name}"))?;
            if !accepted {
                warn!(device, name, value, "camera rejected requested frame size");
            }
        }

        let actual_w = capture.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0);
        let actual_h = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0);
        info!(
            device,
            requested_width = width,
            requested_height = height,
            actual_width = actual_w,
            actual_height = actual_h,
            "opened camera"
        );

        Ok(Self {
            capture,
            device,
            frames_read: 0,
        })
    }

    /// Grab the next frame.  `None` when the device stops delivering frames.
    pub fn read(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        let ok = self
            .capture
            .read(&mut frame)
            .with_context(|| format!("failed to read from camera {}", self.device))?;
        if !ok || frame.empty() {
            return Ok(None);
        }
        self.frames_read += 1;
        Ok(Some(frame))
    }

    pub fn frames_read(&self) -> i64 {
        self.frames_read
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            warn!(device = self.device, "failed to release camera: {e}");
        }
    }
}

// ── Display ──────────────────────────────────────────────────────────────────

/// A HighGUI preview window.
pub struct DisplaySink {
    window: String,
    key_delay_ms: i32,
}

impl DisplaySink {
    pub fn open(window: &str, key_delay_ms: i32) -> Result<Self> {
        highgui::named_window(window, highgui::WINDOW_AUTOSIZE)
            .with_context(|| format!("failed to open display window {window:?}"))?;
        Ok(Self {
            window: window.to_string(),
            key_delay_ms: key_delay_ms.max(1),
        })
    }

    pub fn show(&mut self, frame: &Mat) -> Result<()> {
        highgui::imshow(&self.window, frame).context("failed to show frame")
    }

    /// Pump window events and report whether ESC was pressed.
    pub fn exit_requested(&mut self) -> Result<bool> {
        let key = highgui::wait_key(self.key_delay_ms).context("failed to poll keyboard")?;
        Ok(is_exit_key(key))
    }
}

impl Drop for DisplaySink {
    fn drop(&mut self) {
        if let Err(e) = highgui::destroy_window(&self.window) {
            warn!(window = %self.window, "failed to close display window: {e}");
        }
    }
}

/// `(width, height)` of a frame in pixels.
pub fn frame_size(frame: &Mat) -> (u32, u32) {
    (frame.cols().max(0) as u32, frame.rows().max(0) as u32)
}

/// `wait_key` may report modifier bits above the low byte.
pub fn is_exit_key(key: i32) -> bool {
    key >= 0 && key & 0xFF == ESC_KEY
}
