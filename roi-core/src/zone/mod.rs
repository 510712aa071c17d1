//! zone — polygonal region of interest + per-frame trigger
//!
//! The polygon is configured in normalized `[0, 1]` coordinates and scaled to
//! the capture resolution once at startup.  Each frame, every detection is
//! reduced to a single anchor point which is tested against the polygon.
//!
//! Inclusion is edge-inclusive: an anchor lying exactly on an edge or a
//! vertex counts as inside.

use serde::Deserialize;
use thiserror::Error;

use crate::detection::Detection;

/// Tolerance for the collinearity test used by the on-edge check.
const EDGE_EPSILON: f64 = 1e-9;

// ── Public types ─────────────────────────────────────────────────────────────

/// A 2D point in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Which point of a detection box is tested against the zone.
///
/// Defaults to the box centroid. `BottomCenter` tests where an object meets
/// the ground, which is how supervision-style polygon zones trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// Box centroid.
    #[default]
    Center,
    CenterLeft,
    CenterRight,
    TopCenter,
    TopLeft,
    TopRight,
    BottomCenter,
    BottomLeft,
    BottomRight,
}

impl Anchor {
    /// Resolve this anchor on `det`, in the same pixel space as the box.
    pub fn resolve(self, det: &Detection) -> Point {
        let cx = det.center_x();
        let cy = det.center_y();
        match self {
            Anchor::Center => Point::new(cx, cy),
            Anchor::CenterLeft => Point::new(det.x1, cy),
            Anchor::CenterRight => Point::new(det.x2, cy),
            Anchor::TopCenter => Point::new(cx, det.y1),
            Anchor::TopLeft => Point::new(det.x1, det.y1),
            Anchor::TopRight => Point::new(det.x2, det.y1),
            Anchor::BottomCenter => Point::new(cx, det.y2),
            Anchor::BottomLeft => Point::new(det.x1, det.y2),
            Anchor::BottomRight => Point::new(det.x2, det.y2),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ZoneError {
    #[error("zone polygon needs at least 3 points, got {0}")]
    TooFewPoints(usize),

    #[error("zone point {index} ({x}, {y}) is outside the normalized range [0, 1]")]
    OutOfRange { index: usize, x: f32, y: f32 },

    #[error("zone point {index} is not a finite coordinate")]
    NonFinite { index: usize },

    #[error("zone polygon has zero area at {width}x{height}")]
    Degenerate { width: u32, height: u32 },

    #[error("frame resolution must be non-zero, got {width}x{height}")]
    EmptyFrame { width: u32, height: u32 },
}

/// Per-detection result of [`Zone::trigger`], index-aligned with the input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneHits {
    flags: Vec<bool>,
}

impl ZoneHits {
    pub fn flags(&self) -> &[bool] {
        &self.flags
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn is_inside(&self, index: usize) -> bool {
        self.flags.get(index).copied().unwrap_or(false)
    }

    /// Number of detections inside the zone.
    pub fn count(&self) -> usize {
        self.flags.iter().filter(|&&inside| inside).count()
    }

    /// Whether the zone is currently occupied.
    pub fn any(&self) -> bool {
        self.flags.iter().any(|&inside| inside)
    }
}

// ── Zone ─────────────────────────────────────────────────────────────────────

/// Closed polygon in frame pixel coordinates.  Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    polygon: Vec<Point>,
    frame_width: u32,
    frame_height: u32,
    anchor: Anchor,
}

impl Zone {
    /// Build a zone from normalized vertices, scaled to `width × height`.
    ///
    /// Scaled coordinates are truncated to whole pixels.
    pub fn from_normalized(
        points: &[[f32; 2]],
        width: u32,
        height: u32,
        anchor: Anchor,
    ) -> Result<Self, ZoneError> {
        for (index, &[x, y]) in points.iter().enumerate() {
            if !x.is_finite() || !y.is_finite() {
                return Err(ZoneError::NonFinite { index });
            }
            if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
                return Err(ZoneError::OutOfRange { index, x, y });
            }
        }

        let polygon = points
            .iter()
            .map(|&[x, y]| {
                Point::new(
                    (x * width as f32).trunc(),
                    (y * height as f32).trunc(),
                )
            })
            .collect();
        Self::new(polygon, width, height, anchor)
    }

    /// Build a zone from vertices already in pixel coordinates.
    pub fn new(
        polygon: Vec<Point>,
        width: u32,
        height: u32,
        anchor: Anchor,
    ) -> Result<Self, ZoneError> {
        if width == 0 || height == 0 {
            return Err(ZoneError::EmptyFrame { width, height });
        }
        if polygon.len() < 3 {
            return Err(ZoneError::TooFewPoints(polygon.len()));
        }
        if let Some(index) = polygon
            .iter()
            .position(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(ZoneError::NonFinite { index });
        }
        if shoelace_area(&polygon) <= f64::EPSILON {
            return Err(ZoneError::Degenerate { width, height });
        }

        Ok(Self {
            polygon,
            frame_width: width,
            frame_height: height,
            anchor,
        })
    }

    pub fn polygon(&self) -> &[Point] {
        &self.polygon
    }

    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    /// Absolute polygon area in square pixels.
    pub fn area(&self) -> f32 {
        shoelace_area(&self.polygon) as f32
    }

    /// Mean of the vertices; where the occupancy count is drawn.
    pub fn center(&self) -> Point {
        let n = self.polygon.len() as f32;
        let (sx, sy) = self
            .polygon
            .iter()
            .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point::new(sx / n, sy / n)
    }

    /// Edge-inclusive point-in-polygon test (crossing number).
    pub fn contains(&self, p: Point) -> bool {
        let (px, py) = (p.x as f64, p.y as f64);
        let n = self.polygon.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (ax, ay) = (self.polygon[i].x as f64, self.polygon[i].y as f64);
            let (bx, by) = (self.polygon[j].x as f64, self.polygon[j].y as f64);

            if on_segment(px, py, ax, ay, bx, by) {
                return true;
            }

            if (ay > py) != (by > py) {
                let x_cross = (bx - ax) * (py - ay) / (by - ay) + ax;
                if px < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Anchor point of `det`, clamped into the frame.
    pub fn anchor_point(&self, det: &Detection) -> Point {
        let p = self.anchor.resolve(det);
        let max_x = self.frame_width.saturating_sub(1) as f32;
        let max_y = self.frame_height.saturating_sub(1) as f32;
        Point::new(p.x.clamp(0.0, max_x), p.y.clamp(0.0, max_y))
    }

    /// Flag every detection whose anchor lies inside the polygon.
    pub fn trigger(&self, detections: &[Detection]) -> ZoneHits {
        ZoneHits {
            flags: detections
                .iter()
                .map(|det| self.contains(self.anchor_point(det)))
                .collect(),
        }
    }
}

// ── Geometry helpers ─────────────────────────────────────────────────────────

fn shoelace_area(polygon: &[Point]) -> f64 {
    let n = polygon.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let a = polygon[i];
            let b = polygon[(i + 1) % n];
            a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64
        })
        .sum();
    (twice / 2.0).abs()
}

fn on_segment(px: f64, py: f64, ax: f64, ay: f64, bx: f64, by: f64) -> bool {
    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    if cross.abs() > EDGE_EPSILON {
        return false;
    }
    px >= ax.min(bx) && px <= ax.max(bx) && py >= ay.min(by) && py <= ay.max(by)
}
