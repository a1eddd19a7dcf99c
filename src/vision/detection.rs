//! Object detection
//!
//! Wraps a general-purpose detector (YOLO-family ONNX export trained on COCO)
//! and picks the detection that most plausibly is the photographed horse.

use image::DynamicImage;
use ort::value::Tensor;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use super::models::OnnxSession;
use super::preprocess::{letterbox, Letterbox};
use crate::config::VisionSettings;
use crate::error::{EquiError, Result};

/// COCO class names in model output order
pub const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Classes accepted as the subject, most preferred first. Person comes last
/// because some models label draft horses and ponies seen side-on as people.
pub const SUBJECT_PRIORITY: [&str; 6] = ["horse", "cow", "sheep", "dog", "cat", "person"];

/// Axis-aligned pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    /// Box from corner coordinates
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1.min(x2), y1.min(y2), (x2 - x1).abs(), (y2 - y1).abs())
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Intersection over union
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Clip to frame bounds
    pub fn clip(&self, frame_width: u32, frame_height: u32) -> Self {
        let (fw, fh) = (frame_width as f32, frame_height as f32);
        let x1 = self.x.clamp(0.0, fw);
        let y1 = self.y.clamp(0.0, fh);
        let x2 = (self.x + self.width).clamp(0.0, fw);
        let y2 = (self.y + self.height).clamp(0.0, fh);
        Self::from_corners(x1, y1, x2, y2)
    }
}

/// One detector output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Class label
    pub label: String,
    /// Confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Bounding box in frame pixels
    pub bbox: BoundingBox,
}

impl DetectionResult {
    /// Confidence is clamped into [0, 1]; NaN becomes 0
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    /// Whether the label is one of the accepted subject classes
    pub fn is_subject_class(&self) -> bool {
        SUBJECT_PRIORITY.contains(&self.label.as_str())
    }
}

/// A general-purpose object detector
pub trait ObjectDetector: Send + Sync {
    /// Run detection over a full frame
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectionResult>>;
}

/// Pick the subject among detections.
///
/// The first class of [`SUBJECT_PRIORITY`] present wins, highest confidence
/// within that class. Without any such class the largest box is used.
pub fn select_subject(detections: &[DetectionResult]) -> Result<&DetectionResult> {
    if detections.is_empty() {
        return Err(EquiError::NoDetection);
    }

    for class in SUBJECT_PRIORITY {
        let best = detections
            .iter()
            .filter(|d| d.label == class)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
        if let Some(best) = best {
            debug!("Selected '{}' detection ({:.2})", best.label, best.confidence);
            return Ok(best);
        }
    }

    let largest = detections
        .iter()
        .max_by(|a, b| a.bbox.area().total_cmp(&b.bbox.area()))
        .ok_or(EquiError::NoDetection)?;
    debug!(
        "No animal class detected, falling back to largest box '{}'",
        largest.label
    );
    Ok(largest)
}

/// Per-class non-maximum suppression, highest confidence kept
pub fn non_maximum_suppression(
    mut detections: Vec<DetectionResult>,
    iou_threshold: f32,
) -> Vec<DetectionResult> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut result: Vec<DetectionResult> = Vec::new();
    for d in detections {
        let dominated = result
            .iter()
            .any(|kept| kept.label == d.label && kept.bbox.iou(&d.bbox) > iou_threshold);
        if !dominated {
            result.push(d);
        }
    }
    result
}

/// Decode a YOLO (v8-style, anchor-free) output tensor.
///
/// `dims` is `[1, 4 + classes, anchors]` or the transposed
/// `[1, anchors, 4 + classes]`. Rows hold `cx, cy, w, h` in model input
/// pixels followed by per-class scores.
pub fn decode_yolo(
    data: &[f32],
    dims: &[usize],
    letterbox: &Letterbox,
    score_threshold: f32,
) -> Result<Vec<DetectionResult>> {
    if dims.len() != 3 || dims[0] != 1 {
        return Err(EquiError::Inference(format!(
            "unexpected detector output shape {:?}",
            dims
        )));
    }
    let channels_first = dims[1] < dims[2];
    let (channels, anchors) = if channels_first {
        (dims[1], dims[2])
    } else {
        (dims[2], dims[1])
    };
    if channels <= 4 || data.len() < channels * anchors {
        return Err(EquiError::Inference(format!(
            "detector output too small for shape {:?}",
            dims
        )));
    }

    let at = |channel: usize, anchor: usize| -> f32 {
        if channels_first {
            data[channel * anchors + anchor]
        } else {
            data[anchor * channels + channel]
        }
    };

    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (4..channels)
            .map(|c| (c - 4, at(c, anchor)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((0, 0.0));
        if score < score_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        let (x1, y1) = letterbox.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_frame(cx + w / 2.0, cy + h / 2.0);
        let label = COCO_LABELS
            .get(class_id)
            .map(|l| l.to_string())
            .unwrap_or_else(|| format!("class_{}", class_id));

        detections.push(DetectionResult::new(
            label,
            score,
            BoundingBox::from_corners(x1, y1, x2, y2),
        ));
    }

    Ok(detections)
}

/// YOLO detector running on ONNX Runtime
pub struct OnnxObjectDetector {
    session: Mutex<OnnxSession>,
    output_name: String,
    input_size: u32,
    score_threshold: f32,
    iou_threshold: f32,
}

impl OnnxObjectDetector {
    pub fn load(model_path: &Path, settings: &VisionSettings) -> anyhow::Result<Self> {
        let session = OnnxSession::new(model_path, settings.intra_threads)?;
        let output_name = session
            .output_names()
            .first()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("detector model has no outputs"))?;
        Ok(Self {
            session: Mutex::new(session),
            output_name,
            input_size: settings.detector_input_size,
            score_threshold: settings.detection_threshold,
            iou_threshold: settings.nms_iou_threshold,
        })
    }
}

impl ObjectDetector for OnnxObjectDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectionResult>> {
        let start = Instant::now();
        let (tensor, geometry) = letterbox(image, self.input_size);
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

        let raw = decode_yolo(&data, &dims, &geometry, self.score_threshold)?;
        let detections: Vec<DetectionResult> = non_maximum_suppression(raw, self.iou_threshold)
            .into_iter()
            .map(|mut d| {
                d.bbox = d.bbox.clip(image.width(), image.height());
                d
            })
            .filter(|d| d.bbox.area() > 0.0)
            .collect();

        info!(
            "Detection complete in {:?}: {} objects",
            start.elapsed(),
            detections.len()
        );
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str, confidence: f32, w: f32, h: f32) -> DetectionResult {
        DetectionResult::new(label, confidence, BoundingBox::new(0.0, 0.0, w, h))
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(det("horse", 1.7, 1.0, 1.0).confidence, 1.0);
        assert_eq!(det("horse", -0.2, 1.0, 1.0).confidence, 0.0);
        assert_eq!(det("horse", f32::NAN, 1.0, 1.0).confidence, 0.0);
    }

    #[test]
    fn test_select_prefers_horse_over_larger_person() {
        let detections = vec![det("person", 0.95, 500.0, 500.0), det("horse", 0.4, 100.0, 80.0)];
        let chosen = select_subject(&detections).unwrap();
        assert_eq!(chosen.label, "horse");
    }

    #[test]
    fn test_select_highest_confidence_within_class() {
        let detections = vec![det("horse", 0.5, 100.0, 80.0), det("horse", 0.8, 50.0, 40.0)];
        assert_eq!(select_subject(&detections).unwrap().confidence, 0.8);
    }

    #[test]
    fn test_select_dog_only_is_still_used() {
        let detections = vec![det("dog", 0.31, 300.0, 200.0)];
        let chosen = select_subject(&detections).unwrap();
        assert_eq!(chosen.label, "dog");
        assert!(chosen.is_subject_class());
    }

    #[test]
    fn test_select_falls_back_to_largest() {
        let detections = vec![det("car", 0.9, 10.0, 10.0), det("bench", 0.3, 40.0, 30.0)];
        assert_eq!(select_subject(&detections).unwrap().label, "bench");
    }

    #[test]
    fn test_select_empty_is_no_detection() {
        assert!(matches!(select_subject(&[]), Err(EquiError::NoDetection)));
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-5);
        assert_eq!(a.iou(&BoundingBox::new(20.0, 20.0, 1.0, 1.0)), 0.0);
    }

    #[test]
    fn test_nms_keeps_best_per_class() {
        let a = DetectionResult::new("horse", 0.9, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        let b = DetectionResult::new("horse", 0.6, BoundingBox::new(1.0, 0.0, 10.0, 10.0));
        let c = DetectionResult::new("person", 0.5, BoundingBox::new(1.0, 0.0, 10.0, 10.0));
        let kept = non_maximum_suppression(vec![b, a, c], 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].label, "person");
    }

    #[test]
    fn test_decode_yolo_channels_first() {
        // 4 box rows + 18 class rows (horse is class 17), more anchors than rows
        let channels = 4 + 18;
        let anchors = 30;
        let mut data = vec![0.0f32; channels * anchors];
        let set = |data: &mut Vec<f32>, c: usize, a: usize, v: f32| data[c * anchors + a] = v;
        // anchor 0: horse at centre (320, 320), 200x100, score 0.8
        set(&mut data, 0, 0, 320.0);
        set(&mut data, 1, 0, 320.0);
        set(&mut data, 2, 0, 200.0);
        set(&mut data, 3, 0, 100.0);
        set(&mut data, 4 + 17, 0, 0.8);
        // anchor 1: below threshold
        set(&mut data, 4, 1, 0.1);

        let lb = Letterbox::fit(1280, 640, 640);
        let out = decode_yolo(&data, &[1, channels, anchors], &lb, 0.25).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "horse");
        // Undo the 0.5 scale and 160 px vertical padding
        assert!((out[0].bbox.x - 440.0).abs() < 1e-3);
        assert!((out[0].bbox.y - 220.0).abs() < 1e-3);
        assert!((out[0].bbox.width - 400.0).abs() < 1e-3);
        assert!((out[0].bbox.height - 200.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_yolo_rejects_bad_shape() {
        let lb = Letterbox::fit(10, 10, 10);
        assert!(decode_yolo(&[0.0; 4], &[4], &lb, 0.5).is_err());
    }
}
