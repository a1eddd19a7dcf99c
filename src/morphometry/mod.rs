//! Morphometric conversion
//!
//! Turns the pixel geometry of the detected subject into body measurements in
//! centimetres and then into a body weight using the heart girth / body
//! length regression (Carroll & Huntington), corrected for body condition.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MorphometryConfig;
use crate::error::{EquiError, Result};
use crate::vision::detection::{BoundingBox, DetectionResult};
use crate::vision::models::unix_now;
use crate::vision::segmentation::RefinedProfile;

/// Accepted withers height range for calibration (cm)
pub const MIN_HORSE_HEIGHT_CM: f64 = 70.0;
pub const MAX_HORSE_HEIGHT_CM: f64 = 220.0;

/// Lowest and highest body condition score
pub const MIN_BCS: u8 = 1;
pub const MAX_BCS: u8 = 9;

/// Pixel measurements of the subject
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MorphometricProfile {
    pub pixel_height: f32,
    pub pixel_length: f32,
    pub pixel_depth: f32,
}

impl MorphometricProfile {
    /// Derive a profile from a box. Length and depth are fixed fractions of
    /// the box width and height.
    pub fn from_box(bbox: &BoundingBox, config: &MorphometryConfig) -> Self {
        Self {
            pixel_height: bbox.height,
            pixel_length: bbox.width * config.length_ratio,
            pixel_depth: bbox.height * config.depth_ratio,
        }
    }
}

/// How pixels are converted to centimetres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Calibration {
    /// The horse's known height (cm) matches the subject's pixel height
    HorseHeight { height_cm: f64 },
    /// An object of known height visible in the frame at the horse's distance
    ReferenceObject { real_height_cm: f64, pixel_height: f64 },
}

impl Calibration {
    /// Pixels per centimetre for this frame
    pub fn pixels_per_cm(&self, profile: &MorphometricProfile) -> Result<f64> {
        let scale = match *self {
            Calibration::HorseHeight { height_cm } => {
                if !(MIN_HORSE_HEIGHT_CM..=MAX_HORSE_HEIGHT_CM).contains(&height_cm) {
                    return Err(EquiError::InvalidCalibration(format!(
                        "horse height {} cm is outside {}-{} cm",
                        height_cm, MIN_HORSE_HEIGHT_CM, MAX_HORSE_HEIGHT_CM
                    )));
                }
                profile.pixel_height as f64 / height_cm
            }
            Calibration::ReferenceObject {
                real_height_cm,
                pixel_height,
            } => {
                if !(real_height_cm > 0.0 && pixel_height > 0.0) {
                    return Err(EquiError::InvalidCalibration(
                        "reference object heights must be positive".to_string(),
                    ));
                }
                pixel_height / real_height_cm
            }
        };

        if !scale.is_finite() || scale <= 0.0 {
            return Err(EquiError::InvalidCalibration(
                "subject has no measurable height in the frame".to_string(),
            ));
        }
        Ok(scale)
    }
}

/// Body measurements in centimetres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub height_cm: f64,
    pub body_length_cm: f64,
    pub body_depth_cm: f64,
    pub heart_girth_cm: f64,
}

impl Measurements {
    pub fn from_profile(
        profile: &MorphometricProfile,
        calibration: &Calibration,
        config: &MorphometryConfig,
    ) -> Result<Self> {
        let scale = calibration.pixels_per_cm(profile)?;
        let body_depth_cm = profile.pixel_depth as f64 / scale;
        Ok(Self {
            height_cm: profile.pixel_height as f64 / scale,
            body_length_cm: profile.pixel_length as f64 / scale,
            body_depth_cm,
            heart_girth_cm: body_depth_cm * config.girth_from_depth,
        })
    }

    /// Uncorrected weight (kg): girth² × length / divisor
    pub fn base_weight_kg(&self, config: &MorphometryConfig) -> f64 {
        self.heart_girth_cm.powi(2) * self.body_length_cm / config.weight_divisor
    }
}

/// Multiplier applied for body condition; 1.0 at the midpoint
pub fn bcs_factor(bcs: u8, config: &MorphometryConfig) -> Result<f64> {
    validate_bcs(bcs)?;
    Ok(1.0 + (bcs as f64 - config.bcs_midpoint as f64) * config.bcs_adjustment_per_point)
}

pub fn validate_bcs(bcs: u8) -> Result<()> {
    if (MIN_BCS..=MAX_BCS).contains(&bcs) {
        Ok(())
    } else {
        Err(EquiError::InvalidInput(format!(
            "body condition score {} is outside {}-{}",
            bcs, MIN_BCS, MAX_BCS
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightSource {
    PhotoEstimation,
    Manual,
}

/// A recorded body weight. Never edited once stored; a correction is a new
/// manual entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEstimate {
    pub id: Uuid,
    pub value_kg: f64,
    /// 0.0 - 1.0
    pub confidence: f32,
    /// Absent for manual entries
    pub measurements: Option<Measurements>,
    pub body_condition_score: u8,
    pub source: WeightSource,
    /// Class the detector reported for the subject, shown to the user when
    /// it is not "horse"
    pub detected_class: Option<String>,
    /// Whether silhouette refinement was applied
    pub refined: bool,
    /// Unix seconds
    pub recorded_at: u64,
}

/// Estimate weight from a detection and optional silhouette refinement
pub fn estimate_weight(
    detection: &DetectionResult,
    refined: Option<&RefinedProfile>,
    calibration: &Calibration,
    bcs: u8,
    config: &MorphometryConfig,
) -> Result<WeightEstimate> {
    let factor = bcs_factor(bcs, config)?;

    let (profile, confidence) = match refined {
        Some(r) => (r.profile, (detection.confidence + r.mask_score) / 2.0),
        None => (
            MorphometricProfile::from_box(&detection.bbox, config),
            detection.confidence,
        ),
    };

    let measurements = Measurements::from_profile(&profile, calibration, config)?;
    let weight = measurements.base_weight_kg(config) * factor;

    Ok(WeightEstimate {
        id: Uuid::new_v4(),
        value_kg: weight.round(),
        confidence: confidence.clamp(0.0, 1.0),
        measurements: Some(measurements),
        body_condition_score: bcs,
        source: WeightSource::PhotoEstimation,
        detected_class: Some(detection.label.clone()),
        refined: refined.is_some(),
        recorded_at: unix_now(),
    })
}

/// Validate and record an operator-entered weight
pub fn manual_weight(value_kg: f64, bcs: u8, config: &MorphometryConfig) -> Result<WeightEstimate> {
    if !(config.min_manual_weight..=config.max_manual_weight).contains(&value_kg) {
        return Err(EquiError::InvalidWeightInput {
            value: value_kg,
            min: config.min_manual_weight,
            max: config.max_manual_weight,
        });
    }
    validate_bcs(bcs)?;

    Ok(WeightEstimate {
        id: Uuid::new_v4(),
        value_kg,
        confidence: 1.0,
        measurements: None,
        body_condition_score: bcs,
        source: WeightSource::Manual,
        detected_class: None,
        refined: false,
        recorded_at: unix_now(),
    })
}
