//! Vision/OCR Layer
//!
//! Object detection, silhouette segmentation and label text recognition on
//! captured frames, plus the model files and the process-wide cache that
//! back them.

pub mod cache;
pub mod detection;
pub mod models;
pub mod ocr;
pub mod ocr_preprocess;
pub mod preprocess;
pub mod segmentation;

pub use cache::{LoadedModels, ModelCache, ModelLoader, OnnxModelLoader, VisionModels};
pub use detection::{select_subject, BoundingBox, DetectionResult, ObjectDetector};
pub use models::{ModelManager, ModelStatus, ModelType};
pub use ocr::TextRecognizer;
pub use segmentation::{refine, RefinedProfile, SegmentationMask, Segmenter};
