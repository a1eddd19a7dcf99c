//! Estimation pipeline
//!
//! Async entry points tying capture, vision, nutrition and storage together.
//! Inference runs on blocking threads; every operation resolves to a single
//! result and dropping its future abandons it.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::capture::frame::CapturedFrame;
use crate::config::AppConfig;
use crate::error::{EquiError, Result};
use crate::morphometry::{self, Calibration, WeightEstimate};
use crate::nutrition::{FeedCategory, FeedLabelScan, FeedProfile, LabelParser, RationGenerator, RationPlan};
use crate::storage::HorseRepository;
use crate::vision::detection::{select_subject, DetectionResult};
use crate::vision::segmentation::{refine, RefinedProfile, Segmenter};
use crate::vision::ModelCache;

/// A label scan and the custom feed recorded from it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelScanOutcome {
    pub scan: FeedLabelScan,
    pub feed: FeedProfile,
}

pub struct EstimationPipeline {
    cache: Arc<ModelCache>,
    repository: Arc<dyn HorseRepository>,
    parser: Arc<LabelParser>,
    rations: RationGenerator,
    config: AppConfig,
}

impl EstimationPipeline {
    pub fn new(
        cache: Arc<ModelCache>,
        repository: Arc<dyn HorseRepository>,
        config: AppConfig,
    ) -> Result<Self> {
        Ok(Self {
            cache,
            repository,
            parser: Arc::new(LabelParser::new()?),
            rations: RationGenerator::new(config.nutrition.clone()),
            config,
        })
    }

    pub fn repository(&self) -> &Arc<dyn HorseRepository> {
        &self.repository
    }

    /// Estimate a horse's weight from a side-profile photo and record it.
    ///
    /// Calibration and body condition default to the horse's stored height
    /// and score.
    pub async fn estimate_weight(
        &self,
        horse_id: &str,
        frame: &CapturedFrame,
        calibration: Option<Calibration>,
        body_condition_score: Option<u8>,
    ) -> Result<WeightEstimate> {
        let horse = self.repository.get_horse(horse_id).await?;
        let calibration = calibration
            .or(horse.height_cm.map(|height_cm| Calibration::HorseHeight { height_cm }))
            .ok_or_else(|| {
                EquiError::InvalidCalibration(
                    "no calibration given and no height stored for this horse".to_string(),
                )
            })?;
        let bcs = body_condition_score
            .or(horse.body_condition_score)
            .unwrap_or(self.config.morphometry.bcs_midpoint);
        morphometry::validate_bcs(bcs)?;

        let image = Arc::new(frame.to_image()?);
        let models = self.cache.vision_models().await?;

        let detector = models.detector.clone();
        let detect_image = image.clone();
        let subject = tokio::task::spawn_blocking(move || -> Result<DetectionResult> {
            let detections = detector.detect(&detect_image)?;
            select_subject(&detections).cloned()
        })
        .await
        .map_err(|e| EquiError::Inference(e.to_string()))??;

        if subject.label != "horse" {
            warn!(
                "Subject detected as {:?} ({:.2}); estimating anyway",
                subject.label, subject.confidence
            );
        }

        let refined = match &models.segmenter {
            Some(segmenter) => self.refine_subject(segmenter.clone(), image, &subject).await,
            None => None,
        };

        let estimate = morphometry::estimate_weight(
            &subject,
            refined.as_ref(),
            &calibration,
            bcs,
            &self.config.morphometry,
        )?;
        self.repository.save_weight_estimate(horse_id, &estimate).await?;
        info!(
            "Estimated {} at {} kg (confidence {:.2}, refined: {})",
            horse.name, estimate.value_kg, estimate.confidence, estimate.refined
        );
        Ok(estimate)
    }

    /// Silhouette refinement on a blocking thread. A panic there is treated
    /// like any other refinement failure.
    async fn refine_subject(
        &self,
        segmenter: Arc<dyn Segmenter>,
        image: Arc<DynamicImage>,
        subject: &DetectionResult,
    ) -> Option<RefinedProfile> {
        let candidate = subject.bbox;
        let threshold = self.config.vision.mask_threshold;
        let config = self.config.morphometry.clone();
        let task = tokio::task::spawn_blocking(move || {
            refine(segmenter.as_ref(), &image, &candidate, threshold, &config)
        });
        match task.await {
            Ok(refined) => refined,
            Err(e) => {
                warn!(
                    "{}; using raw detection box",
                    EquiError::SegmentationRefinementFailure(e.to_string())
                );
                None
            }
        }
    }

    /// Record an operator-entered weight
    pub async fn record_manual_weight(
        &self,
        horse_id: &str,
        value_kg: f64,
        body_condition_score: Option<u8>,
    ) -> Result<WeightEstimate> {
        let horse = self.repository.get_horse(horse_id).await?;
        let bcs = body_condition_score
            .or(horse.body_condition_score)
            .unwrap_or(self.config.morphometry.bcs_midpoint);
        let estimate = morphometry::manual_weight(value_kg, bcs, &self.config.morphometry)?;
        self.repository.save_weight_estimate(horse_id, &estimate).await?;
        info!("Recorded manual weight {} kg for {}", value_kg, horse.name);
        Ok(estimate)
    }

    /// Read a feed label and store it as a custom feed for the horse
    pub async fn scan_feed_label(
        &self,
        horse_id: &str,
        frame: &CapturedFrame,
        category: FeedCategory,
    ) -> Result<LabelScanOutcome> {
        self.repository.get_horse(horse_id).await?;
        let image = frame.to_image()?;
        let recognizer = self.cache.text_recognizer().await?;

        let text = tokio::task::spawn_blocking(move || recognizer.recognize(&image))
            .await
            .map_err(|e| EquiError::Ocr(e.to_string()))??;

        let scan = self.parser.parse(&text);
        if !scan.found {
            return Err(EquiError::NutrientParsingFailure);
        }

        let feed = FeedProfile::from_scan(
            format!("custom-{}", Uuid::new_v4()),
            &scan,
            category,
            &self.config.nutrition,
        );
        self.repository.save_custom_feed(horse_id, &feed).await?;
        info!(
            "Stored feed {} ({} nutrients, estimated: {})",
            feed.display_name(),
            scan.nutrients.count(),
            feed.is_estimated
        );
        Ok(LabelScanOutcome { scan, feed })
    }

    /// Plan a ration for the horse from its latest recorded weight, or from
    /// `weight_kg` when given
    pub async fn generate_ration(
        &self,
        horse_id: &str,
        forage_id: &str,
        concentrate_id: &str,
        weight_kg: Option<f64>,
    ) -> Result<RationPlan> {
        let horse = self.repository.get_horse(horse_id).await?;

        let weight = match weight_kg {
            Some(w) => w,
            None => self
                .repository
                .weight_history(horse_id)
                .await?
                .last()
                .map(|w| w.value_kg)
                .ok_or_else(|| {
                    EquiError::InvalidInput(format!(
                        "no weight recorded for {}; weigh the horse first",
                        horse.name
                    ))
                })?,
        };
        if !(weight.is_finite() && weight > 0.0) {
            return Err(EquiError::InvalidInput(format!("weight {} kg must be positive", weight)));
        }

        let feeds = self.repository.list_feeds(horse_id).await?;
        let find = |id: &str| {
            feeds
                .iter()
                .find(|f| f.id == id)
                .ok_or_else(|| EquiError::FeedNotFound(id.to_string()))
        };
        let forage = find(forage_id)?;
        let concentrate = find(concentrate_id)?;
        if forage.category.is_concentrate() {
            return Err(EquiError::InvalidInput(format!(
                "{} is a concentrate and cannot be used as the forage",
                forage.display_name()
            )));
        }
        if !concentrate.category.is_concentrate() {
            return Err(EquiError::InvalidInput(format!(
                "{} is a forage and cannot be used as the concentrate",
                concentrate.display_name()
            )));
        }

        Ok(self
            .rations
            .generate(weight, horse.activity, horse.state, forage, concentrate))
    }
}
