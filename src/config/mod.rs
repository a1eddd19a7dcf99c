//! Application Configuration
//!
//! Pipeline settings and calibration constants stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Vision model settings
    pub vision: VisionSettings,
    /// Label OCR settings
    pub ocr: OcrSettings,
    /// Pixel-to-weight conversion constants
    pub morphometry: MorphometryConfig,
    /// Ration planning constants
    pub nutrition: NutritionConfig,
    /// Storage locations
    pub storage: StorageSettings,
}

/// Where to fetch a model file from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSource {
    /// Download URL
    pub url: String,
    /// Expected SHA-256 (hex), skipped when absent
    pub sha256: Option<String>,
}

/// Vision model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    /// Directory holding model files (defaults to the data dir)
    pub models_dir: Option<PathBuf>,
    /// Object detector file name (YOLO-family ONNX export)
    pub detector_file: String,
    /// Segmentation model file name (DeepLab-family ONNX export)
    pub segmenter_file: String,
    /// Square input size of the detector
    pub detector_input_size: u32,
    /// Square input size of the segmenter
    pub segmenter_input_size: u32,
    /// Minimum class score kept by the detector (0.0 - 1.0)
    pub detection_threshold: f32,
    /// IoU above which overlapping boxes of one class are suppressed
    pub nms_iou_threshold: f32,
    /// Foreground probability above which a mask pixel counts as subject
    pub mask_threshold: f32,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
    /// Optional download location for the detector
    pub detector_source: Option<ModelSource>,
    /// Optional download location for the segmenter
    pub segmenter_source: Option<ModelSource>,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            models_dir: None,
            detector_file: "detector.onnx".to_string(),
            segmenter_file: "segmenter.onnx".to_string(),
            detector_input_size: 640,
            segmenter_input_size: 520,
            detection_threshold: 0.25,
            nms_iou_threshold: 0.45,
            mask_threshold: 0.5,
            intra_threads: 4,
            detector_source: None,
            segmenter_source: None,
        }
    }
}

/// Label OCR settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Text detection model file name
    pub detection_file: String,
    /// Text recognition model file name
    pub recognition_file: String,
    /// Download location for the detection model
    pub detection_source: Option<ModelSource>,
    /// Download location for the recognition model
    pub recognition_source: Option<ModelSource>,
    /// Image enhancement applied before recognition
    pub preprocessing: OcrPreprocessing,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            detection_file: "text-detection.rten".to_string(),
            recognition_file: "text-recognition.rten".to_string(),
            detection_source: Some(ModelSource {
                url: "https://ocrs-models.s3-accelerate.amazonaws.com/text-detection.rten"
                    .to_string(),
                sha256: None,
            }),
            recognition_source: Some(ModelSource {
                url: "https://ocrs-models.s3-accelerate.amazonaws.com/text-recognition.rten"
                    .to_string(),
                sha256: None,
            }),
            preprocessing: OcrPreprocessing::default(),
        }
    }
}

/// Label image enhancement before OCR
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrPreprocessing {
    pub enabled: bool,
    /// Convert to grayscale
    pub grayscale: bool,
    /// Histogram equalization (helps glossy, low-contrast bags)
    pub equalize: bool,
    /// 3x3 sharpening
    pub sharpen: bool,
    /// Images whose shorter side is below this are upscaled
    pub min_dimension: u32,
    /// Upper bound for the upscale factor
    pub max_scale: u32,
}

impl Default for OcrPreprocessing {
    fn default() -> Self {
        Self {
            enabled: true,
            grayscale: true,
            equalize: true,
            sharpen: false,
            min_dimension: 800,
            max_scale: 3,
        }
    }
}

/// Constants of the pixel-to-weight conversion.
///
/// The geometric ratios and the condition-score curve are empirical defaults,
/// not derived physiology.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MorphometryConfig {
    /// Body length as a fraction of the subject's box width
    pub length_ratio: f32,
    /// Body depth as a fraction of the subject's box height
    pub depth_ratio: f32,
    /// Heart girth as a multiple of body depth
    pub girth_from_depth: f64,
    /// Divisor of the girth² × length regression (cm → kg)
    pub weight_divisor: f64,
    /// Body condition score with no correction
    pub bcs_midpoint: u8,
    /// Relative weight change per BCS point away from the midpoint
    pub bcs_adjustment_per_point: f64,
    /// Lowest accepted manual weight (kg)
    pub min_manual_weight: f64,
    /// Highest accepted manual weight (kg)
    pub max_manual_weight: f64,
}

impl Default for MorphometryConfig {
    fn default() -> Self {
        Self {
            length_ratio: 0.85,
            depth_ratio: 0.40,
            girth_from_depth: 2.9,
            weight_divisor: 11_900.0,
            bcs_midpoint: 5,
            bcs_adjustment_per_point: 0.04,
            min_manual_weight: 50.0,
            max_manual_weight: 1500.0,
        }
    }
}

/// Ration planning constants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NutritionConfig {
    /// UFC substituted when a label cannot be estimated
    pub default_ufc: f64,
    /// MADC (g/kg) substituted when a label cannot be estimated
    pub default_madc: f64,
    /// Ash percentage assumed when the label omits it
    pub default_ash: f64,
    /// Density (kg/L) assumed for concentrates without one
    pub default_density: f64,
    /// Daily forage allocated as a fraction of body weight
    pub forage_floor_fraction: f64,
    /// Forage below this fraction of body weight triggers a warning
    pub min_forage_fraction: f64,
    /// Largest concentrate meal per 100 kg of body weight
    pub meal_ceiling_kg_per_100kg: f64,
    /// Daily concentrate above this fraction of body weight triggers a warning
    pub max_concentrate_fraction: f64,
    /// Lower bound of the acceptable Ca:P ratio
    pub ca_p_min: f64,
    /// Upper bound of the acceptable Ca:P ratio
    pub ca_p_max: f64,
    /// Protein coverage below this share of the requirement triggers a warning
    pub protein_tolerance: f64,
}

impl Default for NutritionConfig {
    fn default() -> Self {
        Self {
            default_ufc: 0.85,
            default_madc: 85.0,
            default_ash: 8.0,
            default_density: 0.7,
            forage_floor_fraction: 0.015,
            min_forage_fraction: 0.01,
            meal_ceiling_kg_per_100kg: 0.4,
            max_concentrate_fraction: 0.01,
            ca_p_min: 1.5,
            ca_p_max: 2.0,
            protein_tolerance: 0.9,
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory for horse records (defaults to the data dir)
    pub data_dir: Option<PathBuf>,
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.vision.detector_input_size, 640);
        assert!((config.vision.detection_threshold - 0.25).abs() < 1e-6);
        assert!(config.vision.detector_source.is_none());

        assert!((config.morphometry.length_ratio - 0.85).abs() < 1e-6);
        assert!((config.morphometry.depth_ratio - 0.40).abs() < 1e-6);
        assert_eq!(config.morphometry.bcs_midpoint, 5);
        assert_eq!(config.morphometry.min_manual_weight, 50.0);
        assert_eq!(config.morphometry.max_manual_weight, 1500.0);

        assert_eq!(config.nutrition.ca_p_min, 1.5);
        assert_eq!(config.nutrition.ca_p_max, 2.0);
        assert!(config.ocr.preprocessing.enabled);
        assert!(config.storage.data_dir.is_none());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = AppConfig::default();
        config.nutrition.ca_p_max = 2.2;
        config.vision.detector_source = Some(ModelSource {
            url: "https://example.org/yolo.onnx".to_string(),
            sha256: Some("abc".to_string()),
        });

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.nutrition.ca_p_max, 2.2);
        assert_eq!(parsed.vision.detector_source, config.vision.detector_source);
        assert_eq!(parsed.ocr.detection_file, "text-detection.rten");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str("[nutrition]\nforage_floor_fraction = 0.02\n").unwrap();
        assert_eq!(parsed.nutrition.forage_floor_fraction, 0.02);
        assert_eq!(parsed.nutrition.default_madc, 85.0);
        assert_eq!(parsed.vision.segmenter_file, "segmenter.onnx");
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config.vision.detector_file, loaded.vision.detector_file);
        assert_eq!(config.nutrition.default_ufc, loaded.nutrition.default_ufc);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
