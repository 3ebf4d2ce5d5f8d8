//! Detection engine.
//!
//! Wraps a pretrained, immutable network behind the backend seam and owns
//! the post-processing contract: confidence filtering, conversion of
//! normalized center boxes to pixel-space corner boxes, greedy non-max
//! suppression and clamping to frame bounds.
//!
//! The engine is loaded once at process start. A missing or corrupt model
//! artifact is fatal; there is no per-request reload path.

use anyhow::Result;

use crate::detect::backend::InferenceBackend;
use crate::detect::backends::StubBackend;
#[cfg(feature = "backend-tract")]
use crate::detect::backends::TractBackend;
use crate::detect::nms::non_max_suppression;
use crate::detect::result::{Detection, DetectionResult};
use crate::frame::Frame;
use crate::ModelLoadError;

/// Proposals at or below this confidence are discarded before NMS.
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;
/// Boxes overlapping at or above this IoU compete during NMS.
pub const IOU_THRESHOLD: f32 = 0.4;

pub struct DetectionEngine {
    backend: Box<dyn InferenceBackend>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl std::fmt::Debug for DetectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionEngine")
            .field("backend", &self.backend.name())
            .field("confidence_threshold", &self.confidence_threshold)
            .field("iou_threshold", &self.iou_threshold)
            .finish()
    }
}

impl DetectionEngine {
    /// Load the engine from a model path. `stub://` paths select the
    /// scripted stub backend; anything else requires the `backend-tract`
    /// feature. Failures are fatal `ModelLoadError`s.
    pub fn load(model_path: &str) -> Result<Self> {
        if model_path.starts_with("stub://") {
            log::info!("DetectionEngine: using stub backend ({})", model_path);
            return Ok(Self::with_backend(Box::new(StubBackend::empty())));
        }

        #[cfg(feature = "backend-tract")]
        {
            let backend = TractBackend::load(model_path).map_err(|e| ModelLoadError {
                message: format!("{}: {:#}", model_path, e),
            })?;
            log::info!("DetectionEngine: loaded {} (tract)", model_path);
            Ok(Self::with_backend(Box::new(backend)))
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            Err(ModelLoadError {
                message: format!(
                    "{}: real models require the backend-tract feature",
                    model_path
                ),
            }
            .into())
        }
    }

    /// Build around an explicit backend (tests inject scripted stubs here).
    pub fn with_backend(backend: Box<dyn InferenceBackend>) -> Self {
        Self {
            backend,
            confidence_threshold: CONFIDENCE_THRESHOLD,
            iou_threshold: IOU_THRESHOLD,
        }
    }

    /// Override the default thresholds.
    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.backend.warm_up()
    }

    /// Run detection on one frame.
    ///
    /// Keeps proposals with confidence strictly above the threshold,
    /// converts normalized centers to pixel corner boxes (top-left =
    /// center minus half-extent), suppresses overlaps and clamps the
    /// survivors to frame bounds.
    pub fn infer(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let proposals = self.backend.forward(frame)?;

        let width = frame.width() as f32;
        let height = frame.height() as f32;

        let mut detections: Vec<Detection> = Vec::new();
        for proposal in proposals {
            if proposal.confidence <= self.confidence_threshold {
                continue;
            }
            let w = proposal.w * width;
            let h = proposal.h * height;
            detections.push(Detection {
                class_id: proposal.class_id,
                confidence: proposal.confidence,
                x: proposal.cx * width - w / 2.0,
                y: proposal.cy * height - h / 2.0,
                w,
                h,
            });
        }

        non_max_suppression(&mut detections, self.iou_threshold);

        for detection in &mut detections {
            detection.clamp_to(width, height);
        }

        Ok(DetectionResult { detections })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::Proposal;
    use image::Rgb;

    fn test_frame() -> Frame {
        Frame::filled(Rgb([0, 0, 0]))
    }

    fn proposal(confidence: f32, cx: f32, cy: f32, w: f32, h: f32) -> Proposal {
        Proposal {
            class_id: 0,
            confidence,
            cx,
            cy,
            w,
            h,
        }
    }

    #[test]
    fn low_confidence_proposals_never_appear() -> Result<()> {
        let mut engine = DetectionEngine::with_backend(Box::new(StubBackend::repeating(vec![
            proposal(0.4, 0.5, 0.5, 0.2, 0.2),
        ])));

        let result = engine.infer(&test_frame())?;
        assert!(result.is_empty());
        Ok(())
    }

    #[test]
    fn threshold_is_strict() -> Result<()> {
        // Exactly 0.5 is "not above" the threshold.
        let mut engine = DetectionEngine::with_backend(Box::new(StubBackend::repeating(vec![
            proposal(0.5, 0.5, 0.5, 0.2, 0.2),
        ])));

        assert!(engine.infer(&test_frame())?.is_empty());
        Ok(())
    }

    #[test]
    fn center_box_converts_to_corner_coordinates() -> Result<()> {
        let mut engine = DetectionEngine::with_backend(Box::new(StubBackend::repeating(vec![
            proposal(0.9, 0.5, 0.5, 0.25, 0.25),
        ])));

        let result = engine.infer(&test_frame())?;
        assert_eq!(result.len(), 1);
        let d = &result.detections[0];
        assert!((d.w - 160.0).abs() < 1e-3);
        assert!((d.h - 120.0).abs() < 1e-3);
        assert!((d.x - 240.0).abs() < 1e-3);
        assert!((d.y - 180.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn all_survivors_lie_inside_frame_bounds() -> Result<()> {
        let mut engine = DetectionEngine::with_backend(Box::new(StubBackend::repeating(vec![
            proposal(0.9, 0.98, 0.97, 0.3, 0.3),
            proposal(0.8, 0.02, 0.03, 0.3, 0.3),
        ])));

        let frame = test_frame();
        let result = engine.infer(&frame)?;
        assert_eq!(result.len(), 2);
        for d in result.iter() {
            assert!(d.x >= 0.0);
            assert!(d.y >= 0.0);
            assert!(d.xmax() <= frame.width() as f32);
            assert!(d.ymax() <= frame.height() as f32);
        }
        Ok(())
    }

    #[test]
    fn overlapping_proposals_are_suppressed() -> Result<()> {
        // Same center, same extent: IoU 1.0. Only the stronger survives.
        let mut engine = DetectionEngine::with_backend(Box::new(StubBackend::repeating(vec![
            proposal(0.7, 0.5, 0.5, 0.2, 0.2),
            proposal(0.9, 0.5, 0.5, 0.2, 0.2),
        ])));

        let result = engine.infer(&test_frame())?;
        assert_eq!(result.len(), 1);
        assert_eq!(result.detections[0].confidence, 0.9);
        Ok(())
    }

    #[test]
    fn stub_model_paths_load_without_artifacts() -> Result<()> {
        let engine = DetectionEngine::load("stub://detector")?;
        assert_eq!(engine.backend_name(), "stub");
        Ok(())
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn real_model_path_without_backend_is_a_model_load_error() {
        let err = DetectionEngine::load("/nonexistent/model.onnx").unwrap_err();
        assert!(err.downcast_ref::<ModelLoadError>().is_some());
    }
}
