use std::io::Write;

use anyhow::Result;
use opencv::core::{self, Mat, Scalar, Vec3b};
use opencv::prelude::*;
use roi_core::{
    config::AppConfig,
    detection::{Detection, ObjectDetector},
    pipeline::FrameProcessor,
    rendering::Annotator,
    video::{RgbFrame, frame_size},
    zone::Anchor,
};

/// Replays a scripted detection list per frame and records what it was fed.
struct Scripted {
    frames: Vec<Vec<Detection>>,
    seen: Vec<(u32, u32, i64)>,
}

impl ObjectDetector for Scripted {
    fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<Detection>> {
        frame.validate()?;
        self.seen.push((frame.width, frame.height, frame.pts));
        let idx = self.seen.len() - 1;
        Ok(self.frames.get(idx).cloned().unwrap_or_default())
    }
}

fn camera_frame(width: i32, height: i32) -> Mat {
    Mat::new_rows_cols_with_default(height, width, core::CV_8UC3, Scalar::all(40.0)).unwrap()
}

fn pixel(frame: &Mat, x: i32, y: i32) -> [u8; 3] {
    frame.at_2d::<Vec3b>(y, x).unwrap().0
}

#[test]
fn stock_zone_tracks_a_walker_across_frames() {
    let cfg = AppConfig::default();
    let (w, h) = (640, 360);
    let zone = cfg.zone.build(w, h).unwrap();

    // a person walking left to right; centre x = 100, 300, 500
    let walker = |cx: f32| Detection::new(cx - 40.0, 100.0, cx + 40.0, 300.0, 0.9, 0);
    let script = vec![vec![walker(100.0)], vec![walker(300.0)], vec![walker(500.0)]];
    let detector = Scripted {
        frames: script,
        seen: Vec::new(),
    };
    let mut processor = FrameProcessor::new(detector, zone, Annotator::new(cfg.style.clone()));

    let mut occupancy = Vec::new();
    for _ in 0..3 {
        let mut frame = camera_frame(w as i32, h as i32);
        let report = processor.process(&mut frame).unwrap();
        occupancy.push(report.in_zone());

        let outline = pixel(&frame, 320, 20);
        if report.occupied() {
            assert_eq!(outline, cfg.style.zone_occupied_color);
        } else {
            assert_eq!(outline, cfg.style.zone_color);
        }
    }

    assert_eq!(occupancy, vec![1, 1, 0]);
    assert_eq!(processor.frames_processed(), 3);
    assert_eq!(
        processor.detector().seen,
        vec![(640, 360, 0), (640, 360, 1), (640, 360, 2)]
    );
}

#[test]
fn config_file_drives_zone_and_style() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[zone]
polygon = [[0.5, 0.0], [1.0, 0.0], [1.0, 1.0], [0.5, 1.0]]
anchor = "bottom_center"

[colors]
zone = [255, 0, 0]
"#
    )
    .unwrap();

    let cfg = AppConfig::load(Some(file.path())).unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.zone.anchor, Anchor::BottomCenter);

    let mut frame = camera_frame(400, 200);
    let (w, h) = frame_size(&frame);
    let zone = cfg.zone.build(w, h).unwrap();
    let mut processor = FrameProcessor::new(
        Scripted {
            frames: Vec::new(),
            seen: Vec::new(),
        },
        zone,
        Annotator::new(cfg.style.clone()),
    );

    // bottom-centre anchors: (250, 150) is in the right half, (50, 150) is not
    let right = Detection::new(220.0, 50.0, 280.0, 150.0, 0.8, 2);
    let left = Detection::new(20.0, 50.0, 80.0, 150.0, 0.8, 2);

    let report = processor.annotate_with(&mut frame, vec![right, left]).unwrap();
    assert_eq!(report.hits.flags(), &[true, false]);

    let mut idle = camera_frame(400, 200);
    let report = processor.annotate_with(&mut idle, Vec::new()).unwrap();
    assert!(!report.occupied());
    assert_eq!(pixel(&idle, 200, 100), [255, 0, 0]);
}

#[test]
fn bad_polygon_fails_before_any_frame() {
    let cfg = AppConfig::from_toml_str(
        "[zone]\npolygon = [[0.2, 0.2], [0.4, 0.4], [0.6, 0.6]]",
    )
    .unwrap();
    assert!(cfg.validate().is_err());
}
