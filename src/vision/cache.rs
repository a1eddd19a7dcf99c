//! Model cache
//!
//! Holds the vision models (detector plus optional segmenter) and the text
//! recognizer for the lifetime of the process. Each family is loaded at most
//! once: concurrent callers share a single in-flight load, a failed load is
//! reported to every waiter and leaves the slot empty so the next call
//! retries.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::detection::{ObjectDetector, OnnxObjectDetector};
use super::models::{ModelManager, ModelType};
use super::ocr::{OcrsTextRecognizer, TextRecognizer};
use super::segmentation::{OnnxSegmenter, Segmenter};
use crate::config::{OcrSettings, VisionSettings};
use crate::error::{ModelLoadError, Result};

/// The models used for weight estimation
pub struct VisionModels {
    pub detector: Arc<dyn ObjectDetector>,
    /// Absent when the segmenter could not be loaded; estimation then uses
    /// raw detection boxes
    pub segmenter: Option<Arc<dyn Segmenter>>,
}

/// Both model families
#[derive(Clone)]
pub struct LoadedModels {
    pub vision: Arc<VisionModels>,
    pub text: Arc<dyn TextRecognizer>,
}

/// Builds models. Called from a blocking thread.
pub trait ModelLoader: Send + Sync + 'static {
    fn load_vision(&self) -> std::result::Result<VisionModels, ModelLoadError>;
    fn load_text(&self) -> std::result::Result<Arc<dyn TextRecognizer>, ModelLoadError>;
}

type LoadResult<T> = std::result::Result<T, ModelLoadError>;
type LoadFuture<T> = Shared<BoxFuture<'static, LoadResult<T>>>;

enum Slot<T: Clone> {
    Empty,
    Loading(LoadFuture<T>),
    Ready(T),
}

/// Process-wide cache of loaded models
pub struct ModelCache {
    loader: Arc<dyn ModelLoader>,
    vision: Mutex<Slot<Arc<VisionModels>>>,
    text: Mutex<Slot<Arc<dyn TextRecognizer>>>,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            vision: Mutex::new(Slot::Empty),
            text: Mutex::new(Slot::Empty),
        }
    }

    /// Detector and segmenter, loading them on first use
    pub async fn vision_models(&self) -> Result<Arc<VisionModels>> {
        let loader = self.loader.clone();
        let models = get_or_load(&self.vision, "vision", move || {
            loader.load_vision().map(Arc::new)
        })
        .await?;
        Ok(models)
    }

    /// Text recognizer, loading it on first use
    pub async fn text_recognizer(&self) -> Result<Arc<dyn TextRecognizer>> {
        let loader = self.loader.clone();
        let recognizer = get_or_load(&self.text, "text", move || loader.load_text()).await?;
        Ok(recognizer)
    }

    /// Load both families concurrently
    pub async fn get_models(&self) -> Result<LoadedModels> {
        let (vision, text) = tokio::try_join!(self.vision_models(), self.text_recognizer())?;
        Ok(LoadedModels { vision, text })
    }

    /// Whether both families are loaded
    pub fn is_loaded(&self) -> bool {
        matches!(*self.vision.lock(), Slot::Ready(_)) && matches!(*self.text.lock(), Slot::Ready(_))
    }

    /// Drop cached models. Loads still in flight complete for their callers
    /// but are not stored.
    pub fn dispose(&self) {
        *self.vision.lock() = Slot::Empty;
        *self.text.lock() = Slot::Empty;
        info!("Model cache disposed");
    }
}

async fn get_or_load<T, F>(slot: &Mutex<Slot<T>>, family: &'static str, load: F) -> LoadResult<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> LoadResult<T> + Send + 'static,
{
    let pending = {
        let mut state = slot.lock();
        let in_flight = match &*state {
            Slot::Ready(value) => return Ok(value.clone()),
            Slot::Loading(pending) => Some(pending.clone()),
            Slot::Empty => None,
        };
        match in_flight {
            Some(pending) => {
                debug!("Joining in-flight {} model load", family);
                pending
            }
            None => {
                info!("Loading {} models", family);
                let pending: LoadFuture<T> = async move {
                    tokio::task::spawn_blocking(load)
                        .await
                        .map_err(|e| ModelLoadError::new(family, e))?
                }
                .boxed()
                .shared();
                *state = Slot::Loading(pending.clone());
                pending
            }
        }
    };

    let result = pending.clone().await;

    // Only the load that is still current may settle the slot
    let mut state = slot.lock();
    let current = matches!(&*state, Slot::Loading(f) if f.ptr_eq(&pending));
    if current {
        *state = match &result {
            Ok(value) => Slot::Ready(value.clone()),
            Err(e) => {
                warn!("{}", e);
                Slot::Empty
            }
        };
    }
    result
}

/// Loads models from files resolved by the [`ModelManager`]
pub struct OnnxModelLoader {
    manager: ModelManager,
    vision: VisionSettings,
    ocr: OcrSettings,
}

impl OnnxModelLoader {
    pub fn new(manager: ModelManager, vision: VisionSettings, ocr: OcrSettings) -> Self {
        Self {
            manager,
            vision,
            ocr,
        }
    }

    fn load_segmenter(&self) -> anyhow::Result<OnnxSegmenter> {
        let path = self.manager.require(ModelType::Segmenter)?;
        OnnxSegmenter::load(&path, &self.vision)
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load_vision(&self) -> LoadResult<VisionModels> {
        let detector_path = self
            .manager
            .require(ModelType::Detector)
            .map_err(|e| ModelLoadError::new("detector", e))?;
        let detector = OnnxObjectDetector::load(&detector_path, &self.vision)
            .map_err(|e| ModelLoadError::new("detector", format!("{:#}", e)))?;

        let segmenter: Option<Arc<dyn Segmenter>> = match self.load_segmenter() {
            Ok(segmenter) => Some(Arc::new(segmenter)),
            Err(e) => {
                warn!("Segmenter unavailable, continuing without refinement: {:#}", e);
                None
            }
        };

        Ok(VisionModels {
            detector: Arc::new(detector),
            segmenter,
        })
    }

    fn load_text(&self) -> LoadResult<Arc<dyn TextRecognizer>> {
        let detection = self
            .manager
            .require(ModelType::TextDetection)
            .map_err(|e| ModelLoadError::new("text detection", e))?;
        let recognition = self
            .manager
            .require(ModelType::TextRecognition)
            .map_err(|e| ModelLoadError::new("text recognition", e))?;
        let recognizer =
            OcrsTextRecognizer::load(&detection, &recognition, self.ocr.preprocessing.clone())
                .map_err(|e| ModelLoadError::new("ocr", format!("{:#}", e)))?;
        Ok(Arc::new(recognizer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EquiError;
    use crate::vision::detection::DetectionResult;
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NoDetector;

    impl ObjectDetector for NoDetector {
        fn detect(&self, _image: &DynamicImage) -> Result<Vec<DetectionResult>> {
            Ok(vec![])
        }
    }

    struct BlankText;

    impl TextRecognizer for BlankText {
        fn recognize(&self, _image: &DynamicImage) -> Result<String> {
            Ok(String::new())
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        vision_loads: AtomicUsize,
        text_loads: AtomicUsize,
        /// Number of initial vision loads that fail
        failures: usize,
    }

    impl ModelLoader for CountingLoader {
        fn load_vision(&self) -> LoadResult<VisionModels> {
            let n = self.vision_loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            if n < self.failures {
                return Err(ModelLoadError::new("detector", "corrupt file"));
            }
            Ok(VisionModels {
                detector: Arc::new(NoDetector),
                segmenter: None,
            })
        }

        fn load_text(&self) -> LoadResult<Arc<dyn TextRecognizer>> {
            self.text_loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(BlankText))
        }
    }

    fn cache(failures: usize) -> (Arc<ModelCache>, Arc<CountingLoader>) {
        let loader = Arc::new(CountingLoader {
            failures,
            ..Default::default()
        });
        (Arc::new(ModelCache::new(loader.clone())), loader)
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_load() {
        let (cache, loader) = cache(0);
        let calls = (0..8).map(|_| {
            let cache = cache.clone();
            async move { cache.vision_models().await }
        });
        let results = futures_util::future::join_all(calls).await;

        assert_eq!(loader.vision_loads.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap();
        for r in &results {
            assert!(Arc::ptr_eq(first, r.as_ref().unwrap()));
        }
    }

    #[tokio::test]
    async fn test_failure_reaches_all_waiters_then_retries() {
        let (cache, loader) = cache(1);
        let calls = (0..4).map(|_| {
            let cache = cache.clone();
            async move { cache.vision_models().await }
        });
        let results = futures_util::future::join_all(calls).await;
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(EquiError::ModelLoad(_)))));
        assert_eq!(loader.vision_loads.load(Ordering::SeqCst), 1);

        assert!(cache.vision_models().await.is_ok());
        assert_eq!(loader.vision_loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_models_loads_both_once() {
        let (cache, loader) = cache(0);
        cache.get_models().await.unwrap();
        cache.get_models().await.unwrap();
        assert!(cache.is_loaded());
        assert_eq!(loader.vision_loads.load(Ordering::SeqCst), 1);
        assert_eq!(loader.text_loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispose_forces_reload() {
        let (cache, loader) = cache(0);
        cache.get_models().await.unwrap();
        cache.dispose();
        assert!(!cache.is_loaded());

        cache.get_models().await.unwrap();
        assert_eq!(loader.vision_loads.load(Ordering::SeqCst), 2);
        assert_eq!(loader.text_loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dispose_during_load_does_not_repopulate() {
        let (cache, loader) = cache(0);
        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.vision_models().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.dispose();

        assert!(pending.await.unwrap().is_ok());
        assert!(matches!(*cache.vision.lock(), Slot::Empty));

        cache.vision_models().await.unwrap();
        assert_eq!(loader.vision_loads.load(Ordering::SeqCst), 2);
    }
}
