//! Silhouette refinement
//!
//! Runs a general-purpose semantic segmentation model over the frame and
//! tightens the detector's box to the foreground silhouette. Refinement is
//! best effort: every failure is logged and the caller keeps the raw box.

use image::DynamicImage;
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};

use super::detection::BoundingBox;
use super::models::OnnxSession;
use super::preprocess::stretch_normalized;
use crate::config::{MorphometryConfig, VisionSettings};
use crate::error::{EquiError, Result};
use crate::morphometry::MorphometricProfile;

/// Per-pixel foreground probability, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    pub width: u32,
    pub height: u32,
    pub foreground: Vec<f32>,
}

impl SegmentationMask {
    pub fn new(width: u32, height: u32, foreground: Vec<f32>) -> Result<Self> {
        if foreground.len() != width as usize * height as usize {
            return Err(EquiError::SegmentationRefinementFailure(format!(
                "mask has {} values for {}x{}",
                foreground.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            foreground,
        })
    }

    /// Tightest box around pixels at or above `threshold`, in frame pixels,
    /// with the mean probability of those pixels
    pub fn foreground_bounds(
        &self,
        threshold: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<(BoundingBox, f32)> {
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0;
        let mut max_y = 0;
        let mut count = 0usize;
        let mut sum = 0.0f32;

        for (i, &p) in self.foreground.iter().enumerate() {
            if p < threshold {
                continue;
            }
            let x = (i % self.width as usize) as u32;
            let y = (i / self.width as usize) as u32;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            count += 1;
            sum += p;
        }

        if count == 0 {
            return None;
        }

        let sx = frame_width as f32 / self.width as f32;
        let sy = frame_height as f32 / self.height as f32;
        let bounds = BoundingBox::from_corners(
            min_x as f32 * sx,
            min_y as f32 * sy,
            (max_x + 1) as f32 * sx,
            (max_y + 1) as f32 * sy,
        );
        Some((bounds, (sum / count as f32).clamp(0.0, 1.0)))
    }
}

/// A general-purpose pixel segmenter
pub trait Segmenter: Send + Sync {
    /// Foreground probability for every pixel of a full frame
    fn segment(&self, image: &DynamicImage) -> Result<SegmentationMask>;
}

/// Outcome of a successful refinement
#[derive(Debug, Clone, PartialEq)]
pub struct RefinedProfile {
    /// Silhouette bounds in frame pixels
    pub bounds: BoundingBox,
    /// Measurements derived from the silhouette
    pub profile: MorphometricProfile,
    /// Mean foreground probability over the silhouette (0.0 - 1.0)
    pub mask_score: f32,
}

/// Refine a candidate box; `None` whenever refinement cannot be trusted
pub fn refine(
    segmenter: &dyn Segmenter,
    image: &DynamicImage,
    candidate: &BoundingBox,
    mask_threshold: f32,
    config: &MorphometryConfig,
) -> Option<RefinedProfile> {
    match try_refine(segmenter, image, candidate, mask_threshold, config) {
        Ok(refined) => {
            debug!(
                "Silhouette refined from {:?} to {:?} (score {:.2})",
                candidate, refined.bounds, refined.mask_score
            );
            Some(refined)
        }
        Err(e) => {
            warn!("{}; using raw detection box", e);
            None
        }
    }
}

fn try_refine(
    segmenter: &dyn Segmenter,
    image: &DynamicImage,
    candidate: &BoundingBox,
    mask_threshold: f32,
    config: &MorphometryConfig,
) -> Result<RefinedProfile> {
    let mask = segmenter
        .segment(image)
        .map_err(|e| EquiError::SegmentationRefinementFailure(e.to_string()))?;

    let (bounds, mask_score) = mask
        .foreground_bounds(mask_threshold, image.width(), image.height())
        .ok_or_else(|| {
            EquiError::SegmentationRefinementFailure("mask has no foreground".to_string())
        })?;

    if bounds.iou(candidate) <= 0.0 {
        return Err(EquiError::SegmentationRefinementFailure(
            "silhouette does not overlap the detection".to_string(),
        ));
    }

    Ok(RefinedProfile {
        bounds,
        profile: MorphometricProfile::from_box(&bounds, config),
        mask_score,
    })
}

/// DeepLab-style segmenter on ONNX Runtime.
///
/// Expects `[1, classes, H, W]` logits with class 0 as background; a single
/// channel output is read as foreground logits.
pub struct OnnxSegmenter {
    session: Mutex<OnnxSession>,
    output_name: String,
    input_size: u32,
}

impl OnnxSegmenter {
    pub fn load(model_path: &Path, settings: &VisionSettings) -> anyhow::Result<Self> {
        let session = OnnxSession::new(model_path, settings.intra_threads)?;
        let output_name = session
            .output_names()
            .first()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("segmentation model has no outputs"))?;
        Ok(Self {
            session: Mutex::new(session),
            output_name,
            input_size: settings.segmenter_input_size,
        })
    }
}

impl Segmenter for OnnxSegmenter {
    fn segment(&self, image: &DynamicImage) -> Result<SegmentationMask> {
        let start = Instant::now();
        let tensor = stretch_normalized(image, self.input_size);
        let input = Tensor::from_array(tensor).map_err(|e| EquiError::Inference(e.to_string()))?;

        let (dims, data) = {
            let mut session = self.session.lock();
            let outputs = session
                .session_mut()
                .run(ort::inputs![input])
                .map_err(|e| EquiError::Inference(e.to_string()))?;
            let (shape, data) = outputs[self.output_name.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(|e| EquiError::Inference(e.to_string()))?;
            let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            (dims, data.to_vec())
        };

        let mask = logits_to_mask(&data, &dims)?;
        debug!("Segmentation complete in {:?}", start.elapsed());
        Ok(mask)
    }
}

/// Convert `[1, classes, H, W]` logits into foreground probabilities
pub fn logits_to_mask(data: &[f32], dims: &[usize]) -> Result<SegmentationMask> {
    if dims.len() != 4 || dims[0] != 1 || dims[1] == 0 {
        return Err(EquiError::Inference(format!(
            "unexpected segmentation output shape {:?}",
            dims
        )));
    }
    let (classes, height, width) = (dims[1], dims[2], dims[3]);
    let plane = height * width;
    if data.len() < classes * plane {
        return Err(EquiError::Inference(format!(
            "segmentation output too small for shape {:?}",
            dims
        )));
    }

    let foreground = (0..plane)
        .map(|i| {
            if classes == 1 {
                return 1.0 / (1.0 + (-data[i]).exp());
            }
            let max = (0..classes)
                .map(|c| data[c * plane + i])
                .fold(f32::NEG_INFINITY, f32::max);
            let total: f32 = (0..classes).map(|c| (data[c * plane + i] - max).exp()).sum();
            let background = (data[i] - max).exp() / total;
            1.0 - background
        })
        .collect();

    SegmentationMask::new(width as u32, height as u32, foreground)
}
