//! OCR (Optical Character Recognition) module
//!
//! Extracts raw text from feed label photos using the `ocrs` engine with
//! `rten` text detection and recognition models.

use image::DynamicImage;
use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use parking_lot::Mutex;
use rten::Model;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use super::ocr_preprocess::apply_preprocessing;
use crate::config::OcrPreprocessing;
use crate::error::{EquiError, Result};

/// Turns an image into text
pub trait TextRecognizer: Send + Sync {
    /// All text found in the image, one line per detected text line.
    /// An image without text yields an empty string, not an error.
    fn recognize(&self, image: &DynamicImage) -> Result<String>;
}

/// `ocrs` backed recognizer
pub struct OcrsTextRecognizer {
    engine: Mutex<OcrEngine>,
    preprocessing: OcrPreprocessing,
}

impl OcrsTextRecognizer {
    /// Load the detection and recognition models
    pub fn load(
        detection_model: &Path,
        recognition_model: &Path,
        preprocessing: OcrPreprocessing,
    ) -> anyhow::Result<Self> {
        info!(
            "Loading OCR models from {:?} and {:?}",
            detection_model, recognition_model
        );
        let detection_model = Model::load_file(detection_model)?;
        let recognition_model = Model::load_file(recognition_model)?;

        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })?;

        Ok(Self {
            engine: Mutex::new(engine),
            preprocessing,
        })
    }
}

impl TextRecognizer for OcrsTextRecognizer {
    fn recognize(&self, image: &DynamicImage) -> Result<String> {
        let start = Instant::now();
        let prepared = apply_preprocessing(image, &self.preprocessing);
        let img = prepared.image;

        let source = ImageSource::from_bytes(img.as_raw(), img.dimensions())
            .map_err(|e| EquiError::Ocr(e.to_string()))?;

        let engine = self.engine.lock();
        let input = engine
            .prepare_input(source)
            .map_err(|e| EquiError::Ocr(e.to_string()))?;
        let text = engine
            .get_text(&input)
            .map_err(|e| EquiError::Ocr(e.to_string()))?;

        let text = clean_text(&text);
        debug!(
            "OCR complete in {:?}: {} lines (scale {}x)",
            start.elapsed(),
            text.lines().count(),
            prepared.scale
        );
        Ok(text)
    }
}

/// Trim every line and drop blank ones
pub fn clean_text(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
