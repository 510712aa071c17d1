use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use opencv::core::Mat;

use crate::detection::{Detection, ObjectDetector};
use crate::rendering::Annotator;
use crate::video::RgbFrame;
use crate::zone::{Zone, ZoneHits};

const PROFILE_EVERY: u64 = 300;

/// What one frame produced, after the overlay has been drawn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub detections: Vec<Detection>,
    /// Index-aligned with `detections`.
    pub hits: ZoneHits,
}

impl FrameReport {
    pub fn in_zone(&self) -> usize {
        self.hits.count()
    }

    pub fn occupied(&self) -> bool {
        self.hits.any()
    }

    /// Detections whose anchor fell inside the zone.
    pub fn in_zone_detections(&self) -> impl Iterator<Item = &Detection> + '_ {
        self.detections
            .iter()
            .enumerate()
            .filter(|(i, _)| self.hits.is_inside(*i))
            .map(|(_, det)| det)
    }
}

/// Detect → trigger → annotate for a single frame, with a fixed zone.
pub struct FrameProcessor<D: ObjectDetector> {
    detector: D,
    zone: Zone,
    annotator: Annotator,
    frame_index: i64,
    prof_frames: u64,
    prof_convert: Duration,
    prof_detect: Duration,
    prof_annotate: Duration,
}

impl<D: ObjectDetector> FrameProcessor<D> {
    pub fn new(detector: D, zone: Zone, annotator: Annotator) -> Self {
        Self {
            detector,
            zone,
            annotator,
            frame_index: 0,
            prof_frames: 0,
            prof_convert: Duration::ZERO,
            prof_detect: Duration::ZERO,
            prof_annotate: Duration::ZERO,
        }
    }

    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn frames_processed(&self) -> i64 {
        self.frame_index
    }

    /// Run the detector on `frame` and draw the overlay onto it.
    pub fn process(&mut self, frame: &mut Mat) -> Result<FrameReport> {
        let convert_start = Instant::now();
        let rgb = RgbFrame::from_bgr_mat(frame, self.frame_index)
            .with_context(|| format!("failed to convert frame {}", self.frame_index))?;
        self.prof_convert += convert_start.elapsed();

        let detect_start = Instant::now();
        let detections = self
            .detector
            .detect(&rgb)
            .with_context(|| format!("detection failed on frame {}", self.frame_index))?;
        self.prof_detect += detect_start.elapsed();

        self.annotate_with(frame, detections)
    }

    /// Trigger and annotate with a caller-supplied detection list.
    pub fn annotate_with(
        &mut self,
        frame: &mut Mat,
        detections: Vec<Detection>,
    ) -> Result<FrameReport> {
        let annotate_start = Instant::now();
        let hits = self.zone.trigger(&detections);
        self.annotator
            .annotate(frame, &detections, &hits, &self.zone)
            .with_context(|| format!("failed to annotate frame {}", self.frame_index))?;
        self.prof_annotate += annotate_start.elapsed();

        tracing::debug!(
            frame = self.frame_index,
            detections = detections.len(),
            in_zone = hits.count(),
            "frame processed"
        );

        self.frame_index += 1;
        self.note_timings();

        Ok(FrameReport { detections, hits })
    }

    fn note_timings(&mut self) {
        self.prof_frames += 1;
        if self.prof_frames % PROFILE_EVERY != 0 {
            return;
        }
        let frames = self.prof_frames as f64;
        let per_frame = |d: Duration| format!("{:.2}", d.as_secs_f64() * 1000.0 / frames);
        tracing::info!(
            frames = self.prof_frames,
            convert_ms_per_frame = per_frame(self.prof_convert),
            detect_ms_per_frame = per_frame(self.prof_detect),
            annotate_ms_per_frame = per_frame(self.prof_annotate),
            "pipeline timings"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::Anchor;
    use anyhow::bail;
    use opencv::core::{self, Scalar};

    struct Fixed(Vec<Detection>);

    impl ObjectDetector for Fixed {
        fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<Detection>> {
            frame.validate()?;
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl ObjectDetector for Broken {
        fn detect(&mut self, _frame: &RgbFrame) -> Result<Vec<Detection>> {
            bail!("inference backend unavailable")
        }
    }

    fn frame() -> Mat {
        Mat::new_rows_cols_with_default(240, 320, core::CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    fn left_half() -> Zone {
        Zone::from_normalized(
            &[[0.0, 0.0], [0.5, 0.0], [0.5, 1.0], [0.0, 1.0]],
            320,
            240,
            Anchor::Center,
        )
        .unwrap()
    }

    #[test]
    fn reports_in_zone_detections() {
        let inside = Detection::new(20.0, 100.0, 60.0, 160.0, 0.9, 0);
        let outside = Detection::new(200.0, 100.0, 260.0, 160.0, 0.7, 2);
        let mut processor =
            FrameProcessor::new(Fixed(vec![inside, outside]), left_half(), Annotator::default());

        let mut mat = frame();
        let report = processor.process(&mut mat).unwrap();
        assert_eq!(report.detections.len(), 2);
        assert_eq!(report.hits.flags(), &[true, false]);
        assert_eq!(report.in_zone(), 1);
        assert!(report.occupied());
        assert_eq!(report.in_zone_detections().collect::<Vec<_>>(), vec![&inside]);
        assert_eq!(processor.frames_processed(), 1);
    }

    #[test]
    fn no_detections_leaves_zone_idle() {
        let mut processor =
            FrameProcessor::new(Fixed(Vec::new()), left_half(), Annotator::default());
        let report = processor.process(&mut frame()).unwrap();
        assert_eq!(report, FrameReport::default());
        assert!(!report.occupied());
    }

    #[test]
    fn detector_errors_propagate() {
        let mut processor = FrameProcessor::new(Broken, left_half(), Annotator::default());
        let err = processor.process(&mut frame()).unwrap_err();
        assert!(format!("{err:#}").contains("inference backend unavailable"));
        assert_eq!(processor.frames_processed(), 0);
    }

    #[test]
    fn empty_frame_is_an_error() {
        let mut processor =
            FrameProcessor::new(Fixed(Vec::new()), left_half(), Annotator::default());
        assert!(processor.process(&mut Mat::default()).is_err());
    }

    #[test]
    fn annotate_with_skips_detector() {
        let mut processor = FrameProcessor::new(Broken, left_half(), Annotator::default());
        let det = Detection::new(10.0, 10.0, 30.0, 30.0, 0.6, 0);
        let report = processor.annotate_with(&mut frame(), vec![det]).unwrap();
        assert_eq!(report.in_zone(), 1);
    }
}
