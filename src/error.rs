//! Error types for the estimation pipeline
//!
//! Vision and OCR failures are fatal to the single call that raised them and
//! carry a corrective hint for the user. Nutrition problems never surface
//! here: they degrade to defaults and are reported as ration warnings.

use thiserror::Error;

/// Convenience alias used across the library
pub type Result<T> = std::result::Result<T, EquiError>;

/// Failure to initialize one of the cached models.
///
/// Cloneable so a single failed load can be handed to every caller that was
/// waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to load {model} model: {reason}")]
pub struct ModelLoadError {
    /// Model family or file that failed
    pub model: String,
    /// Human readable cause
    pub reason: String,
}

impl ModelLoadError {
    pub fn new(model: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            model: model.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors produced by the biometric and nutrition pipeline
#[derive(Error, Debug)]
pub enum EquiError {
    /// A model could not be initialized; retrying later may succeed
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    /// The detector found nothing usable in the frame
    #[error("no animal found in frame; recapture a clear side-profile photo at ~4 m")]
    NoDetection,

    /// Camera permission or hardware problem
    #[error("camera unavailable: {0}; check camera permissions and that no other application is using it")]
    CameraAccess(String),

    /// OCR produced text but no guaranteed-analysis values were recognized
    #[error(
        "no nutrient values found on the label; make sure the \"guaranteed analysis\" panel is visible, in focus and well lit"
    )]
    NutrientParsingFailure,

    /// Manual weight outside the accepted range
    #[error("weight {value} kg is outside the accepted range {min}-{max} kg")]
    InvalidWeightInput { value: f64, min: f64, max: f64 },

    /// Silhouette refinement failed. Only ever logged; the pipeline falls
    /// back to the raw detection box.
    #[error("segmentation refinement failed: {0}")]
    SegmentationRefinementFailure(String),

    /// Model inference failed at runtime
    #[error("inference failed: {0}")]
    Inference(String),

    /// Text recognition failed at runtime
    #[error("text recognition failed: {0}")]
    Ocr(String),

    /// Calibration input cannot produce a usable scale
    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    /// Other rejected numeric or enum input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("horse not found: {0}")]
    HorseNotFound(String),

    #[error("feed not found: {0}")]
    FeedNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid label pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl EquiError {
    /// Whether repeating the same call later can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, EquiError::ModelLoad(_) | EquiError::Inference(_) | EquiError::Storage(_))
    }
}
