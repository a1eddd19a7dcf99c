//! Model file management and ONNX Runtime sessions
//!
//! Resolves, downloads and verifies the detector, segmenter and OCR model
//! files, and wraps ONNX Runtime sessions for the vision models.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ort::session::{builder::GraphOptimizationLevel, Session};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, ModelSource};

/// Environment variable that disables all downloads
pub const OFFLINE_ENV: &str = "EQUIMETRICS_OFFLINE";

/// Model identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    /// General-purpose object detector (YOLO family, COCO labels)
    Detector,
    /// General-purpose semantic segmenter (DeepLab family, VOC labels)
    Segmenter,
    /// OCR text detection model
    TextDetection,
    /// OCR text recognition model
    TextRecognition,
}

impl ModelType {
    pub const ALL: [ModelType; 4] = [
        ModelType::Detector,
        ModelType::Segmenter,
        ModelType::TextDetection,
        ModelType::TextRecognition,
    ];

    /// Display name for progress reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Detector => "Object Detector",
            ModelType::Segmenter => "Segmenter",
            ModelType::TextDetection => "Text Detection",
            ModelType::TextRecognition => "Text Recognition",
        }
    }

    /// Files smaller than this are treated as truncated downloads
    pub fn min_size(&self) -> u64 {
        match self {
            ModelType::Detector => 1_000_000,
            ModelType::Segmenter => 1_000_000,
            ModelType::TextDetection => 100_000,
            ModelType::TextRecognition => 100_000,
        }
    }
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: Option<String>,
    pub downloaded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Availability of one model file
#[derive(Debug, Clone)]
pub struct ModelStatus {
    pub model_type: ModelType,
    pub path: PathBuf,
    pub available: bool,
    pub size_bytes: Option<u64>,
    pub downloadable: bool,
}

/// Progress callback for download operations
pub type DownloadProgressCallback = Box<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Resolves model files and downloads missing ones
#[derive(Debug, Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
    detector_file: String,
    segmenter_file: String,
    text_detection_file: String,
    text_recognition_file: String,
    detector_source: Option<ModelSource>,
    segmenter_source: Option<ModelSource>,
    text_detection_source: Option<ModelSource>,
    text_recognition_source: Option<ModelSource>,
}

impl ModelManager {
    /// Create a model manager from configuration, defaulting to
    /// `<data dir>/models`
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let models_dir = match &config.vision.models_dir {
            Some(dir) => dir.clone(),
            None => crate::storage::get_data_dir()?.join("models"),
        };
        Self::with_dir(models_dir, config)
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf, config: &AppConfig) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models dir {:?}", models_dir))?;
        Ok(Self {
            models_dir,
            detector_file: config.vision.detector_file.clone(),
            segmenter_file: config.vision.segmenter_file.clone(),
            text_detection_file: config.ocr.detection_file.clone(),
            text_recognition_file: config.ocr.recognition_file.clone(),
            detector_source: config.vision.detector_source.clone(),
            segmenter_source: config.vision.segmenter_source.clone(),
            text_detection_source: config.ocr.detection_source.clone(),
            text_recognition_source: config.ocr.recognition_source.clone(),
        })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// File name configured for a model
    pub fn filename(&self, model_type: ModelType) -> &str {
        match model_type {
            ModelType::Detector => &self.detector_file,
            ModelType::Segmenter => &self.segmenter_file,
            ModelType::TextDetection => &self.text_detection_file,
            ModelType::TextRecognition => &self.text_recognition_file,
        }
    }

    /// Download location configured for a model
    pub fn source(&self, model_type: ModelType) -> Option<&ModelSource> {
        match model_type {
            ModelType::Detector => self.detector_source.as_ref(),
            ModelType::Segmenter => self.segmenter_source.as_ref(),
            ModelType::TextDetection => self.text_detection_source.as_ref(),
            ModelType::TextRecognition => self.text_recognition_source.as_ref(),
        }
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(self.filename(model_type))
    }

    /// Check if a model is already on disk and not obviously truncated
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        std::fs::metadata(self.model_path(model_type))
            .map(|m| m.is_file() && m.len() >= model_type.min_size())
            .unwrap_or(false)
    }

    /// Get status of all models
    pub fn get_model_status(&self) -> Vec<ModelStatus> {
        ModelType::ALL
            .iter()
            .map(|&model_type| {
                let path = self.model_path(model_type);
                let size_bytes = std::fs::metadata(&path).ok().map(|m| m.len());
                ModelStatus {
                    model_type,
                    available: self.is_model_available(model_type),
                    downloadable: self.source(model_type).is_some(),
                    path,
                    size_bytes,
                }
            })
            .collect()
    }

    /// Path of an available model, or an error explaining how to provide it
    pub fn require(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);
        if self.is_model_available(model_type) {
            return Ok(path);
        }
        match self.source(model_type) {
            Some(_) => anyhow::bail!(
                "{} model missing at {:?}; run `equimetrics models fetch`",
                model_type.display_name(),
                path
            ),
            None => anyhow::bail!(
                "{} model missing at {:?} and no download source is configured; place the file there manually",
                model_type.display_name(),
                path
            ),
        }
    }

    /// Download every missing model that has a configured source
    pub async fn ensure_all_models(&self) -> Result<Vec<ModelType>> {
        let mut downloaded = Vec::new();
        for model_type in ModelType::ALL {
            if self.is_model_available(model_type) {
                info!("Model {:?} already available, skipping download", model_type);
                continue;
            }
            if self.source(model_type).is_none() {
                warn!(
                    "No download source configured for {}; expected at {:?}",
                    model_type.display_name(),
                    self.model_path(model_type)
                );
                continue;
            }
            let mt = model_type;
            let progress: DownloadProgressCallback = Box::new(move |done, total| {
                debug!("{:?}: {} / {:?} bytes", mt, done, total);
            });
            self.download_model_with_progress(model_type, Some(progress)).await?;
            downloaded.push(model_type);
        }
        Ok(downloaded)
    }

    /// Download a specific model with optional progress callback
    pub async fn download_model_with_progress(
        &self,
        model_type: ModelType,
        progress: Option<DownloadProgressCallback>,
    ) -> Result<()> {
        let source = self
            .source(model_type)
            .with_context(|| format!("No download source for {}", model_type.display_name()))?
            .clone();
        let path = self.model_path(model_type);

        if std::env::var(OFFLINE_ENV).is_ok() {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                source.url,
                path
            );
        }

        info!("Downloading {} model from {}", model_type.display_name(), source.url);
        self.download_file(&source, &path, progress).await?;

        if !self.is_model_available(model_type) {
            anyhow::bail!("Download completed but model verification failed");
        }

        self.update_manifest_for_model(model_type)?;
        info!("Successfully downloaded {} model", model_type.display_name());
        Ok(())
    }

    async fn download_file(
        &self,
        source: &ModelSource,
        path: &Path,
        progress: Option<DownloadProgressCallback>,
    ) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(&source.url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with status {}: {}", response.status(), source.url);
        }

        let total_size = response.content_length();
        debug!("Download size: {:?} bytes", total_size);

        let temp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;
            file.write_all(&chunk).context("Failed to write to temp file")?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;

            if let Some(ref callback) = progress {
                callback(downloaded, total_size);
            }
        }

        file.flush().context("Failed to flush temp file")?;
        drop(file);

        let hash = format!("{:x}", hasher.finalize());
        if let Some(expected) = &source.sha256 {
            if !hash.eq_ignore_ascii_case(expected) {
                std::fs::remove_file(&temp_path).ok();
                anyhow::bail!("Checksum mismatch for {:?}: expected {}, got {}", path, expected, hash);
            }
            info!("Checksum verified for {:?}", path);
        }

        std::fs::rename(&temp_path, path)
            .context("Failed to move downloaded file to final location")?;
        Ok(())
    }

    fn update_manifest_for_model(&self, model_type: ModelType) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();
        let path = self.model_path(model_type);
        let data = std::fs::read(&path)?;

        let model_info = ModelInfo {
            model_type: format!("{:?}", model_type),
            filename: self.filename(model_type).to_string(),
            size_bytes: data.len() as u64,
            sha256: Some(format!("{:x}", Sha256::digest(&data))),
            downloaded_at: unix_now(),
        };

        if let Some(existing) = manifest
            .models
            .iter_mut()
            .find(|m| m.filename == model_info.filename)
        {
            *existing = model_info;
        } else {
            manifest.models.push(model_info);
        }

        self.save_manifest(&manifest)
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        std::fs::write(manifest_path, serde_json::to_string_pretty(manifest)?)?;
        Ok(())
    }
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        info!("Model loaded. Inputs: {:?}, Outputs: {:?}", input_names, output_names);

        Ok(Self {
            session,
            input_names,
            output_names,
        })
    }

    /// Get the underlying session mutably for running inference
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Get input names
    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    /// Get output names
    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> ModelManager {
        ModelManager::with_dir(dir.path().join("models"), &AppConfig::default()).unwrap()
    }

    #[test]
    fn test_model_paths_follow_config() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        assert!(manager.model_path(ModelType::Detector).ends_with("detector.onnx"));
        assert!(manager
            .model_path(ModelType::TextRecognition)
            .ends_with("text-recognition.rten"));
    }

    #[test]
    fn test_truncated_file_not_available() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        std::fs::write(manager.model_path(ModelType::Detector), b"tiny").unwrap();
        assert!(!manager.is_model_available(ModelType::Detector));
    }

    #[test]
    fn test_model_status_reports_sources() {
        let dir = TempDir::new().unwrap();
        let status = manager(&dir).get_model_status();
        assert_eq!(status.len(), 4);
        let detector = status.iter().find(|s| s.model_type == ModelType::Detector).unwrap();
        assert!(!detector.available);
        assert!(!detector.downloadable);
        let ocr = status
            .iter()
            .find(|s| s.model_type == ModelType::TextDetection)
            .unwrap();
        assert!(ocr.downloadable);
    }

    #[test]
    fn test_require_missing_model_explains() {
        let dir = TempDir::new().unwrap();
        let err = manager(&dir).require(ModelType::Segmenter).unwrap_err();
        assert!(err.to_string().contains("no download source"));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let mut manifest = manager.load_manifest().unwrap();
        assert!(manifest.models.is_empty());

        manifest.models.push(ModelInfo {
            model_type: "Detector".to_string(),
            filename: "detector.onnx".to_string(),
            size_bytes: 42,
            sha256: None,
            downloaded_at: 1,
        });
        manager.save_manifest(&manifest).unwrap();
        assert_eq!(manager.load_manifest().unwrap().models.len(), 1);
    }
}
