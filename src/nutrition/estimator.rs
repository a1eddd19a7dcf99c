//! Energy and protein value estimation
//!
//! Derives UFC (horse feed units, per kg) and MADC (digestible crude protein,
//! g/kg) from the crude fibre, crude protein and ash percentages of a label.
//! Fibre lowers both organic-matter and protein digestibility.

use serde::{Deserialize, Serialize};

use super::label::NutrientValues;
use crate::config::NutritionConfig;

/// UFC of one kg of perfectly digestible organic matter
const UFC_PER_KG_ORGANIC_MATTER: f64 = 1.18;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NutritionalValue {
    /// Energy, UFC per kg
    pub ufc: f64,
    /// Digestible protein, g per kg
    pub madc: f64,
    /// Generic defaults were substituted because the label lacked data
    pub is_estimated: bool,
}

/// Organic matter digestibility for a crude fibre percentage
pub fn organic_matter_digestibility(fibre: f64) -> f64 {
    (0.93 - 0.016 * fibre).clamp(0.30, 0.93)
}

/// Crude protein digestibility for a crude fibre percentage
pub fn protein_digestibility(fibre: f64) -> f64 {
    (0.87 - 0.012 * fibre).clamp(0.40, 0.87)
}

/// Energy and protein value of a labelled feed.
///
/// Values printed on the label are used as they are. Otherwise they are
/// derived from fibre and protein, and when those are missing too the
/// configured defaults are used and flagged as estimated. Ash falls back to
/// the configured default.
pub fn estimate(nutrients: &NutrientValues, config: &NutritionConfig) -> NutritionalValue {
    let derived = match (nutrients.fibre, nutrients.protein) {
        (Some(fibre), Some(protein)) => {
            let ash = nutrients.ash.unwrap_or(config.default_ash);
            Some((
                UFC_PER_KG_ORGANIC_MATTER * (1.0 - ash / 100.0) * organic_matter_digestibility(fibre),
                protein * 10.0 * protein_digestibility(fibre),
            ))
        }
        _ => None,
    };

    let ufc = nutrients.ufc.or(derived.map(|(ufc, _)| ufc));
    let madc = nutrients.madc.or(derived.map(|(_, madc)| madc));

    NutritionalValue {
        ufc: round_to(ufc.unwrap_or(config.default_ufc), 2),
        madc: madc.unwrap_or(config.default_madc).round(),
        is_estimated: ufc.is_none() || madc.is_none(),
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
