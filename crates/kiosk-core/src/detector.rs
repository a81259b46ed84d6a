//! Cascade face locator.
//!
//! Wraps the SeetaFace funnel-structured cascade (via `rustface`) behind the
//! [`FaceLocator`] trait. Detection parameters are fixed: faces smaller than
//! 50 px are ignored and the image pyramid steps by a factor of 1.1.

use crate::types::FaceRect;
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
/// Smallest face side, in pixels, that the locator reports.
pub const MIN_FACE_SIZE: u32 = 50;
/// Scale step between pyramid levels.
pub const SCALE_FACTOR: f32 = 1.1;
/// Cascade score a window must reach to count as a face. Plays the role of
/// the four-neighbour vote of a Viola-Jones cascade.
pub const SCORE_THRESHOLD: f64 = 2.0;
const SLIDE_WINDOW_STEP: u32 = 4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("cascade model not found: {0}; download seeta_fd_frontal_v1.0.bin and set KIOSK_MODEL_PATH")]
    ModelNotFound(String),
    #[error("failed to load cascade model: {0}")]
    ModelLoad(String),
}

/// Something that finds face rectangles in a grayscale image.
///
/// Implementations never fail on a well-formed buffer: no faces is an empty vec.
pub trait FaceLocator {
    fn locate(&mut self, gray: &GrayImage) -> Vec<FaceRect>;
}

/// Frontal-face cascade locator.
pub struct CascadeLocator {
    detector: Box<dyn rustface::Detector>,
}

impl CascadeLocator {
    /// Load the cascade model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let mut detector = rustface::create_detector(model_path)
            .map_err(|e| DetectorError::ModelLoad(format!("{model_path}: {e}")))?;

        detector.set_min_face_size(MIN_FACE_SIZE);
        detector.set_score_thresh(SCORE_THRESHOLD);
        detector.set_pyramid_scale_factor(1.0 / SCALE_FACTOR);
        detector.set_slide_window_step(SLIDE_WINDOW_STEP, SLIDE_WINDOW_STEP);

        tracing::info!(
            path = model_path,
            min_face = MIN_FACE_SIZE,
            scale_factor = SCALE_FACTOR,
            "loaded face cascade"
        );

        Ok(Self { detector })
    }
}

impl FaceLocator for CascadeLocator {
    fn locate(&mut self, gray: &GrayImage) -> Vec<FaceRect> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let image = rustface::ImageData::new(gray.as_raw(), width, height);
        let scored = self
            .detector
            .detect(&image)
            .into_iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                let rect = window_to_rect(bbox.x(), bbox.y(), bbox.width(), bbox.height(), width, height)?;
                Some((rect, face.score()))
            })
            .collect();

        order_detections(scored)
    }
}

/// Crop a detection window to the image. The cascade may report windows
/// hanging past any edge; the overhang is cut off rather than shifted in.
pub fn window_to_rect(x: i32, y: i32, w: u32, h: u32, width: u32, height: u32) -> Option<FaceRect> {
    let overhang_x = x.min(0).unsigned_abs();
    let overhang_y = y.min(0).unsigned_abs();
    let w = w.checked_sub(overhang_x).filter(|w| *w > 0)?;
    let h = h.checked_sub(overhang_y).filter(|h| *h > 0)?;
    FaceRect::new(x.max(0) as u32, y.max(0) as u32, w, h).clamp_to(width, height)
}

/// Drop undersized rectangles and order the rest by descending score, then
/// top-to-bottom, left-to-right, so the output is stable for a given input.
pub fn order_detections(mut scored: Vec<(FaceRect, f64)>) -> Vec<FaceRect> {
    scored.retain(|(rect, _)| rect.width >= MIN_FACE_SIZE && rect.height >= MIN_FACE_SIZE);
    scored.sort_by(|(ra, sa), (rb, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(ra.y.cmp(&rb.y))
            .then(ra.x.cmp(&rb.x))
    });
    scored.into_iter().map(|(rect, _)| rect).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_inside_image_unchanged() {
        assert_eq!(window_to_rect(10, 20, 60, 70, 200, 200), Some(FaceRect::new(10, 20, 60, 70)));
    }

    #[test]
    fn test_window_overhang_is_cropped() {
        assert_eq!(window_to_rect(-15, -5, 80, 80, 200, 200), Some(FaceRect::new(0, 0, 65, 75)));
    }

    #[test]
    fn test_window_fully_outside() {
        assert_eq!(window_to_rect(-90, 0, 80, 80, 200, 200), None);
        assert_eq!(window_to_rect(0, -80, 80, 80, 200, 200), None);
    }

    #[test]
    fn test_order_by_score() {
        let dets = vec![
            (FaceRect::new(0, 0, 60, 60), 3.0),
            (FaceRect::new(100, 0, 60, 60), 7.5),
            (FaceRect::new(200, 0, 60, 60), 5.0),
        ];
        let out = order_detections(dets);
        assert_eq!(out[0].x, 100);
        assert_eq!(out[1].x, 200);
        assert_eq!(out[2].x, 0);
    }

    #[test]
    fn test_order_ties_by_position() {
        let dets = vec![
            (FaceRect::new(90, 50, 60, 60), 4.0),
            (FaceRect::new(10, 50, 60, 60), 4.0),
            (FaceRect::new(10, 0, 60, 60), 4.0),
        ];
        let out = order_detections(dets);
        assert_eq!(out[0], FaceRect::new(10, 0, 60, 60));
        assert_eq!(out[1], FaceRect::new(10, 50, 60, 60));
        assert_eq!(out[2], FaceRect::new(90, 50, 60, 60));
    }

    #[test]
    fn test_order_drops_small_faces() {
        let dets = vec![
            (FaceRect::new(0, 0, 49, 80), 9.0),
            (FaceRect::new(0, 0, 80, 49), 9.0),
            (FaceRect::new(0, 0, 50, 50), 1.0),
        ];
        let out = order_detections(dets);
        assert_eq!(out, vec![FaceRect::new(0, 0, 50, 50)]);
    }

    #[test]
    fn test_order_empty() {
        assert!(order_detections(vec![]).is_empty());
    }

    #[test]
    fn test_load_missing_model() {
        let err = CascadeLocator::load("/nonexistent/seeta.bin").err();
        assert!(matches!(err, Some(DetectorError::ModelNotFound(_))));
    }
}
