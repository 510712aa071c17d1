//! rendering — draw detections and the zone onto a BGR frame
//!
//! Boxes, `"<class> <confidence>"` labels, the zone outline and the zone's
//! occupancy count are drawn in place with OpenCV `imgproc`.  Whether the
//! zone is occupied switches the outline colour and thickness.

use anyhow::{Context, Result, bail};
use opencv::{
    core::{self, Mat, Point, Rect, Scalar, Size, Vector},
    imgproc,
    prelude::*,
};

use crate::detection::Detection;
use crate::zone::{Zone, ZoneHits};

/// Labels sit this many pixels above the box's top edge.
const LABEL_OFFSET: i32 = 10;
/// Padding around the occupancy count badge.
const COUNT_PADDING: i32 = 6;
const FONT: i32 = imgproc::FONT_HERSHEY_SIMPLEX;

/// A BGR colour, as OpenCV expects it.
pub type Bgr = [u8; 3];

/// Colours and stroke widths used by the [`Annotator`].
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatorStyle {
    pub box_color: Bgr,
    /// Box colour for detections inside the zone.
    pub highlight_color: Bgr,
    pub label_color: Bgr,
    pub zone_color: Bgr,
    pub zone_occupied_color: Bgr,
    pub thickness: i32,
    /// Added to `thickness` for the outline while the zone is occupied.
    pub occupied_thickness: i32,
    pub text_scale: f64,
    pub text_thickness: i32,
}

impl Default for AnnotatorStyle {
    fn default() -> Self {
        Self {
            box_color: [0, 255, 0],
            highlight_color: [0, 165, 255],
            label_color: [255, 255, 255],
            zone_color: [0, 0, 255],
            zone_occupied_color: [0, 255, 255],
            thickness: 2,
            occupied_thickness: 2,
            text_scale: 0.5,
            text_thickness: 2,
        }
    }
}

pub fn scalar(color: Bgr) -> Scalar {
    Scalar::new(color[0] as f64, color[1] as f64, color[2] as f64, 0.0)
}

/// `"person 0.87"`.
pub fn label_text(det: &Detection) -> String {
    format!("{} {:.2}", det.class_name(), det.confidence)
}

/// Bottom-left text origin for a label of `text` size, kept inside the frame.
pub fn label_origin(det: &Detection, text: Size, frame: Size) -> Point {
    let max_x = (frame.width - text.width).max(0);
    let max_y = (frame.height - 1).max(0);
    let x = (det.x1 as i32).clamp(0, max_x);
    let y = (det.y1 as i32 - LABEL_OFFSET).clamp(text.height.min(max_y), max_y);
    Point::new(x, y)
}

/// Integer pixel rectangle for a detection box.
pub fn box_rect(det: &Detection) -> Rect {
    let x = det.x1.round() as i32;
    let y = det.y1.round() as i32;
    Rect::new(
        x,
        y,
        (det.x2.round() as i32 - x).max(1),
        (det.y2.round() as i32 - y).max(1),
    )
}

/// Stateless overlay renderer.
#[derive(Debug, Clone, Default)]
pub struct Annotator {
    style: AnnotatorStyle,
}

impl Annotator {
    pub fn new(style: AnnotatorStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &AnnotatorStyle {
        &self.style
    }

    /// Draw everything for one frame.  `hits` must be index-aligned with
    /// `detections`.
    pub fn annotate(
        &self,
        frame: &mut Mat,
        detections: &[Detection],
        hits: &ZoneHits,
        zone: &Zone,
    ) -> Result<()> {
        if frame.empty() {
            bail!("cannot annotate an empty frame");
        }
        if hits.len() != detections.len() {
            bail!(
                "zone flags ({}) do not match detections ({})",
                hits.len(),
                detections.len()
            );
        }

        self.draw_boxes(frame, detections, hits)?;
        self.draw_labels(frame, detections)?;
        self.draw_zone(frame, zone, hits)?;
        Ok(())
    }

    fn draw_boxes(&self, frame: &mut Mat, detections: &[Detection], hits: &ZoneHits) -> Result<()> {
        for (i, det) in detections.iter().enumerate() {
            let color = if hits.is_inside(i) {
                self.style.highlight_color
            } else {
                self.style.box_color
            };
            imgproc::rectangle(
                frame,
                box_rect(det),
                scalar(color),
                self.style.thickness,
                imgproc::LINE_8,
                0,
            )
            .context("failed to draw detection box")?;
        }
        Ok(())
    }

    fn draw_labels(&self, frame: &mut Mat, detections: &[Detection]) -> Result<()> {
        let frame_size = Size::new(frame.cols(), frame.rows());
        for det in detections {
            let text = label_text(det);
            let mut baseline = 0;
            let text_size = imgproc::get_text_size(
                &text,
                FONT,
                self.style.text_scale,
                self.style.text_thickness,
                &mut baseline,
            )
            .context("failed to measure label")?;
            imgproc::put_text(
                frame,
                &text,
                label_origin(det, text_size, frame_size),
                FONT,
                self.style.text_scale,
                scalar(self.style.label_color),
                self.style.text_thickness,
                imgproc::LINE_8,
                false,
            )
            .context("failed to draw label")?;
        }
        Ok(())
    }

    fn draw_zone(&self, frame: &mut Mat, zone: &Zone, hits: &ZoneHits) -> Result<()> {
        let (color, thickness) = if hits.any() {
            (
                self.style.zone_occupied_color,
                self.style.thickness + self.style.occupied_thickness,
            )
        } else {
            (self.style.zone_color, self.style.thickness)
        };

        let outline: Vector<Point> = zone
            .polygon()
            .iter()
            .map(|p| Point::new(p.x as i32, p.y as i32))
            .collect();
        let mut contours = Vector::<Vector<Point>>::new();
        contours.push(outline);
        imgproc::polylines(
            frame,
            &contours,
            true,
            scalar(color),
            thickness,
            imgproc::LINE_8,
            0,
        )
        .context("failed to draw zone outline")?;

        self.draw_count(frame, zone, hits.count(), color)
    }

    /// Occupancy count on a filled badge at the polygon centre.
    fn draw_count(&self, frame: &mut Mat, zone: &Zone, count: usize, color: Bgr) -> Result<()> {
        let text = count.to_string();
        let scale = self.style.text_scale * 2.0;
        let mut baseline = 0;
        let text_size =
            imgproc::get_text_size(&text, FONT, scale, self.style.text_thickness, &mut baseline)
                .context("failed to measure zone count")?;

        let center = zone.center();
        let x = center.x as i32 - text_size.width / 2;
        let y = center.y as i32 + text_size.height / 2;
        let badge = Rect::new(
            x - COUNT_PADDING,
            y - text_size.height - COUNT_PADDING,
            text_size.width + 2 * COUNT_PADDING,
            text_size.height + 2 * COUNT_PADDING,
        );
        imgproc::rectangle(frame, badge, scalar(color), -1, imgproc::LINE_8, 0)
            .context("failed to draw zone count badge")?;
        imgproc::put_text(
            frame,
            &text,
            Point::new(x, y),
            FONT,
            scale,
            core::Scalar::all(0.0),
            self.style.text_thickness,
            imgproc::LINE_8,
            false,
        )
        .context("failed to draw zone count")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::Anchor;
    use opencv::core::Vec3b;

    const W: i32 = 320;
    const H: i32 = 240;

    fn blank() -> Mat {
        Mat::new_rows_cols_with_default(H, W, core::CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    fn pixel(frame: &Mat, x: i32, y: i32) -> [u8; 3] {
        frame.at_2d::<Vec3b>(y, x).unwrap().0
    }

    fn left_half() -> Zone {
        Zone::from_normalized(
            &[[0.0, 0.0], [0.5, 0.0], [0.5, 1.0], [0.0, 1.0]],
            W as u32,
            H as u32,
            Anchor::Center,
        )
        .unwrap()
    }

    #[test]
    fn label_uses_two_decimals() {
        let det = Detection::new(0.0, 0.0, 10.0, 10.0, 0.876, 0);
        assert_eq!(label_text(&det), "person 0.88");
        let det = Detection::new(0.0, 0.0, 10.0, 10.0, 0.5, 99);
        assert_eq!(label_text(&det), "unknown 0.50");
    }

    #[test]
    fn label_origin_stays_on_screen() {
        let frame = Size::new(W, H);
        let text = Size::new(60, 12);

        let mid = Detection::new(100.0, 100.0, 150.0, 150.0, 0.9, 0);
        assert_eq!(label_origin(&mid, text, frame), Point::new(100, 90));

        let top = Detection::new(-5.0, 2.0, 40.0, 40.0, 0.9, 0);
        assert_eq!(label_origin(&top, text, frame), Point::new(0, 12));

        let right = Detection::new(300.0, 100.0, 320.0, 150.0, 0.9, 0);
        assert_eq!(label_origin(&right, text, frame).x, W - 60);
    }

    #[test]
    fn box_rect_rounds_and_has_area() {
        let det = Detection::new(10.4, 20.6, 30.5, 21.0, 0.9, 0);
        let rect = box_rect(&det);
        assert_eq!((rect.x, rect.y), (10, 21));
        assert_eq!(rect.width, 21);
        assert_eq!(rect.height, 1);
    }

    #[test]
    fn draws_outline_in_idle_colour() {
        let style = AnnotatorStyle::default();
        let annotator = Annotator::new(style.clone());
        let zone = left_half();
        let mut frame = blank();

        annotator
            .annotate(&mut frame, &[], &zone.trigger(&[]), &zone)
            .unwrap();

        // right edge of the zone at x = 160
        assert_eq!(pixel(&frame, 160, 120 - 60), style.zone_color);
        // far right of the frame untouched
        assert_eq!(pixel(&frame, 300, 200), [0, 0, 0]);
    }

    #[test]
    fn occupied_zone_switches_colour_and_highlights_box() {
        let style = AnnotatorStyle::default();
        let annotator = Annotator::new(style.clone());
        let zone = left_half();
        let mut frame = blank();

        let inside = Detection::new(20.0, 150.0, 60.0, 200.0, 0.9, 0);
        let outside = Detection::new(220.0, 150.0, 280.0, 200.0, 0.8, 2);
        let dets = [inside, outside];
        let hits = zone.trigger(&dets);
        assert_eq!(hits.flags(), &[true, false]);

        annotator.annotate(&mut frame, &dets, &hits, &zone).unwrap();

        assert_eq!(pixel(&frame, 160, 30), style.zone_occupied_color);
        // left edge of each box, below the label area
        assert_eq!(pixel(&frame, 20, 190), style.highlight_color);
        assert_eq!(pixel(&frame, 220, 190), style.box_color);
    }

    #[test]
    fn mismatched_flags_are_rejected() {
        let annotator = Annotator::default();
        let zone = left_half();
        let mut frame = blank();
        let det = Detection::new(20.0, 20.0, 60.0, 60.0, 0.9, 0);
        let err = annotator.annotate(&mut frame, &[det], &ZoneHits::default(), &zone);
        assert!(err.is_err());
    }

    #[test]
    fn empty_frame_is_rejected() {
        let annotator = Annotator::default();
        let zone = left_half();
        let mut frame = Mat::default();
        assert!(annotator
            .annotate(&mut frame, &[], &ZoneHits::default(), &zone)
            .is_err());
    }
}
