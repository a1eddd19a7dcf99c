//! Daily ration planning
//!
//! Allocates a horse's energy (UFC) and protein (MADC) requirements across
//! one forage and one concentrate. Forage is fixed at a floor proportional
//! to body weight; the concentrate fills the remaining energy. Problems with
//! the inputs never fail the plan; they are reported as warnings.

use serde::{Deserialize, Serialize};

use super::feed::FeedProfile;
use crate::config::NutritionConfig;

/// Maintenance energy, UFC per 100 kg body weight
const MAINTENANCE_UFC_PER_100KG: f64 = 0.9;
/// Maintenance protein, g MADC per kg body weight
const MAINTENANCE_MADC_PER_KG: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityLevel {
    #[default]
    Repos,
    LoisirLeger,
    TravailModere,
    TravailIntense,
}

impl ActivityLevel {
    /// (UFC, MADC) multipliers over maintenance
    pub fn multipliers(self) -> (f64, f64) {
        match self {
            ActivityLevel::Repos => (1.0, 1.0),
            ActivityLevel::LoisirLeger => (1.15, 1.10),
            ActivityLevel::TravailModere => (1.35, 1.25),
            ActivityLevel::TravailIntense => (1.60, 1.45),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhysiologicalState {
    #[default]
    Normal,
    Gestation,
    Lactation,
}

impl PhysiologicalState {
    /// (UFC, MADC) multipliers over maintenance
    pub fn multipliers(self) -> (f64, f64) {
        match self {
            PhysiologicalState::Normal => (1.0, 1.0),
            PhysiologicalState::Gestation => (1.20, 1.35),
            PhysiologicalState::Lactation => (1.60, 1.90),
        }
    }
}

/// Energy and protein amounts
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Nutrition {
    pub ufc: f64,
    /// grams
    pub madc: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForageAllocation {
    pub feed_id: String,
    pub kg: f64,
    pub nutrition: Nutrition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrateAllocation {
    pub feed_id: String,
    pub kg: f64,
    pub liters: f64,
    pub suggested_meals: u32,
    pub nutrition: Nutrition,
}

/// Daily calcium and phosphorus supply
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MineralBalance {
    /// grams
    pub calcium: f64,
    /// grams
    pub phosphorus: f64,
    /// Ca:P, 0 when there is no phosphorus
    pub ratio: f64,
    pub is_balanced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RationWarning {
    pub severity: Severity,
    pub message: String,
    pub recommendation: String,
}

impl RationWarning {
    fn new(severity: Severity, message: impl Into<String>, recommendation: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            recommendation: recommendation.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RationPlan {
    pub needs: Nutrition,
    pub forage: ForageAllocation,
    pub concentrate: ConcentrateAllocation,
    pub minerals: MineralBalance,
    /// Most severe first
    pub warnings: Vec<RationWarning>,
}

/// Daily requirements for a horse
pub fn requirements(weight_kg: f64, activity: ActivityLevel, state: PhysiologicalState) -> Nutrition {
    let (activity_ufc, activity_madc) = activity.multipliers();
    let (state_ufc, state_madc) = state.multipliers();
    Nutrition {
        ufc: weight_kg / 100.0 * MAINTENANCE_UFC_PER_100KG * activity_ufc * state_ufc,
        madc: weight_kg * MAINTENANCE_MADC_PER_KG * activity_madc * state_madc,
    }
}

/// Ca:P ratio, 0 when phosphorus is absent
pub fn calcium_phosphorus_ratio(calcium: f64, phosphorus: f64) -> f64 {
    if phosphorus > 0.0 {
        calcium / phosphorus
    } else {
        0.0
    }
}

pub struct RationGenerator {
    config: NutritionConfig,
}

impl RationGenerator {
    pub fn new(config: NutritionConfig) -> Self {
        Self { config }
    }

    /// Plan a day's ration. `weight_kg` must be positive.
    pub fn generate(
        &self,
        weight_kg: f64,
        activity: ActivityLevel,
        state: PhysiologicalState,
        forage: &FeedProfile,
        concentrate: &FeedProfile,
    ) -> RationPlan {
        let config = &self.config;
        let mut warnings = Vec::new();
        let needs = requirements(weight_kg, activity, state);

        // Forage floor
        let forage_kg = weight_kg * config.forage_floor_fraction;
        let forage_supply = Nutrition {
            ufc: forage_kg * forage.ufc,
            madc: forage_kg * forage.madc,
        };

        // Concentrate covers the remaining energy
        let remaining_ufc = (needs.ufc - forage_supply.ufc).max(0.0);
        let concentrate_kg = if concentrate.ufc > 0.0 {
            remaining_ufc / concentrate.ufc
        } else {
            0.0
        };
        let concentrate_supply = Nutrition {
            ufc: concentrate_kg * concentrate.ufc,
            madc: concentrate_kg * concentrate.madc,
        };

        let density = match concentrate.density.filter(|d| *d > 0.0) {
            Some(d) => d,
            None => {
                warnings.push(RationWarning::new(
                    Severity::Info,
                    format!(
                        "No density known for {}; volume computed with {} kg/L",
                        concentrate.display_name(),
                        config.default_density
                    ),
                    "Weigh one scoop of this feed to get an exact volume",
                ));
                config.default_density
            }
        };
        let liters = concentrate_kg / density;

        let meal_ceiling_kg = weight_kg / 100.0 * config.meal_ceiling_kg_per_100kg;
        let suggested_meals = if concentrate_kg > 0.0 && meal_ceiling_kg > 0.0 {
            ((concentrate_kg / meal_ceiling_kg).ceil() as u32).max(1)
        } else {
            0
        };

        let insufficient: Vec<String> = [forage, concentrate]
            .iter()
            .filter(|f| f.ufc <= 0.0)
            .map(|f| f.display_name())
            .collect();
        if !insufficient.is_empty() {
            warnings.push(RationWarning::new(
                Severity::Critical,
                format!(
                    "Nutritionally insufficient feeds: {} provide no energy",
                    insufficient.join(", ")
                ),
                "Choose feeds with a known energy value or rescan the label",
            ));
        }

        // Protein coverage
        let supplied_madc = forage_supply.madc + concentrate_supply.madc;
        if supplied_madc < needs.madc * config.protein_tolerance {
            let coverage = if needs.madc > 0.0 {
                supplied_madc / needs.madc * 100.0
            } else {
                0.0
            };
            warnings.push(RationWarning::new(
                Severity::Warning,
                format!(
                    "Protein deficit: {:.0} g of {:.0} g MADC covered ({:.0}%)",
                    supplied_madc, needs.madc, coverage
                ),
                "Use a richer concentrate or replace part of the forage with alfalfa hay",
            ));
        }

        // Minerals. The ratio is taken from the reported totals so the plan
        // stays self-consistent.
        let calcium = round_to(
            forage_kg * forage.calcium + concentrate_kg * concentrate.calcium,
            1,
        );
        let phosphorus = round_to(
            forage_kg * forage.phosphorus + concentrate_kg * concentrate.phosphorus,
            1,
        );
        let ratio = round_to(calcium_phosphorus_ratio(calcium, phosphorus), 2);
        let is_balanced = (config.ca_p_min..=config.ca_p_max).contains(&ratio);
        if !is_balanced {
            let recommendation = if calcium <= 0.0 && phosphorus <= 0.0 {
                "Add a complete mineral supplement".to_string()
            } else if ratio < config.ca_p_min {
                "Add a calcium supplement (e.g. calcium carbonate) or feed alfalfa".to_string()
            } else {
                "Add a phosphorus supplement (e.g. monocalcium phosphate)".to_string()
            };
            warnings.push(RationWarning::new(
                Severity::Warning,
                format!(
                    "Calcium/phosphorus ratio {:.2} outside {}-{}",
                    ratio, config.ca_p_min, config.ca_p_max
                ),
                recommendation,
            ));
        }

        let missing_minerals: Vec<String> = [forage, concentrate]
            .iter()
            .filter(|f| f.minerals_estimated)
            .map(|f| f.display_name())
            .collect();
        if !missing_minerals.is_empty() {
            warnings.push(RationWarning::new(
                Severity::Warning,
                format!(
                    "Calcium or phosphorus unknown for {}; the mineral balance counts them as zero",
                    missing_minerals.join(", ")
                ),
                "Rescan the label with the mineral lines visible, or enter the values by hand",
            ));
        }

        if concentrate_kg > meal_ceiling_kg {
            warnings.push(RationWarning::new(
                Severity::Warning,
                format!(
                    "{:.2} kg of concentrate exceeds the single-meal limit of {:.2} kg",
                    concentrate_kg, meal_ceiling_kg
                ),
                format!("Split the concentrate into {} meals", suggested_meals),
            ));
        }

        let max_concentrate_kg = weight_kg * config.max_concentrate_fraction;
        if concentrate_kg > max_concentrate_kg {
            warnings.push(RationWarning::new(
                Severity::Critical,
                format!(
                    "{:.2} kg of concentrate per day exceeds {:.1} kg ({}% of body weight)",
                    concentrate_kg,
                    max_concentrate_kg,
                    config.max_concentrate_fraction * 100.0
                ),
                "Use a more energetic forage or a denser concentrate to reduce the quantity",
            ));
        }

        let min_forage_kg = weight_kg * config.min_forage_fraction;
        if forage_kg < min_forage_kg {
            warnings.push(RationWarning::new(
                Severity::Critical,
                format!(
                    "{:.1} kg of forage is below the {:.1} kg minimum",
                    forage_kg, min_forage_kg
                ),
                "Increase forage to at least 1% of body weight",
            ));
        }

        for feed in [forage, concentrate] {
            if feed.is_estimated {
                warnings.push(RationWarning::new(
                    Severity::Info,
                    format!("Nutrition values of {} are generic estimates", feed.display_name()),
                    "Rescan the label with the analysis panel in full view",
                ));
            }
        }

        // Stable: keeps insertion order within a severity
        warnings.sort_by(|a, b| b.severity.cmp(&a.severity));

        RationPlan {
            needs: round_nutrition(needs),
            forage: ForageAllocation {
                feed_id: forage.id.clone(),
                kg: round_to(forage_kg, 2),
                nutrition: round_nutrition(forage_supply),
            },
            concentrate: ConcentrateAllocation {
                feed_id: concentrate.id.clone(),
                kg: round_to(concentrate_kg, 2),
                liters: round_to(liters, 2),
                suggested_meals,
                nutrition: round_nutrition(concentrate_supply),
            },
            minerals: MineralBalance {
                calcium,
                phosphorus,
                ratio,
                is_balanced,
            },
            warnings,
        }
    }
}

fn round_nutrition(n: Nutrition) -> Nutrition {
    Nutrition {
        ufc: round_to(n.ufc, 2),
        madc: n.madc.round(),
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nutrition::feed::{builtin_feeds, FeedCategory};

    fn feed(id: &str) -> FeedProfile {
        builtin_feeds().into_iter().find(|f| f.id == id).unwrap()
    }

    fn generator() -> RationGenerator {
        RationGenerator::new(NutritionConfig::default())
    }

    fn empty_feed(id: &str, category: FeedCategory) -> FeedProfile {
        FeedProfile {
            id: id.to_string(),
            category,
            brand: None,
            name: id.to_string(),
            density: Some(0.7),
            ufc: 0.0,
            madc: 0.0,
            calcium: 0.0,
            phosphorus: 0.0,
            is_estimated: false,
            minerals_estimated: false,
        }
    }

    fn has_warning(plan: &RationPlan, needle: &str) -> bool {
        plan.warnings.iter().any(|w| w.message.contains(needle))
    }

    #[test]
    fn test_requirements() {
        let n = requirements(500.0, ActivityLevel::Repos, PhysiologicalState::Normal);
        assert!((n.ufc - 4.5).abs() < 1e-9);
        assert!((n.madc - 300.0).abs() < 1e-9);

        let n = requirements(500.0, ActivityLevel::TravailIntense, PhysiologicalState::Lactation);
        assert!((n.ufc - 4.5 * 1.6 * 1.6).abs() < 1e-9);
        assert!((n.madc - 300.0 * 1.45 * 1.9).abs() < 1e-9);
    }

    #[test]
    fn test_leisure_horse_plan() {
        let plan = generator().generate(
            500.0,
            ActivityLevel::LoisirLeger,
            PhysiologicalState::Normal,
            &feed("foin-prairie"),
            &feed("granule-loisir"),
        );

        assert!((plan.needs.ufc - 5.175).abs() < 0.01);
        assert_eq!(plan.needs.madc, 330.0);
        assert_eq!(plan.forage.kg, 7.5);
        assert!((plan.forage.nutrition.ufc - 3.375).abs() < 0.01);
        // (5.175 - 3.375) / 0.85
        assert_eq!(plan.concentrate.kg, 2.12);
        assert_eq!(plan.concentrate.liters, 3.03);
        assert_eq!(plan.concentrate.suggested_meals, 2);
        assert!(plan.minerals.is_balanced);
        assert!((plan.minerals.ratio - 1.8).abs() < 0.01);

        // Only the meal split advice
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].recommendation.contains("2 meals"));
    }

    #[test]
    fn test_ratio_matches_mineral_totals() {
        let plan = generator().generate(
            450.0,
            ActivityLevel::TravailModere,
            PhysiologicalState::Gestation,
            &feed("foin-prairie"),
            &feed("avoine"),
        );
        let m = plan.minerals;
        assert_eq!(m.ratio, round_to(m.calcium / m.phosphorus, 2));
        assert_eq!(m.is_balanced, (1.5..=2.0).contains(&m.ratio));
    }

    #[test]
    fn test_small_horse_ratio_uses_reported_totals() {
        // 1.5 kg straw + 0.525 kg barley: Ca 5.6175 g, P 3.39 g
        let plan = generator().generate(
            100.0,
            ActivityLevel::Repos,
            PhysiologicalState::Normal,
            &feed("paille-orge"),
            &feed("orge"),
        );
        let m = plan.minerals;
        assert_eq!(m.calcium, 5.6);
        assert_eq!(m.phosphorus, 3.4);
        assert_eq!(m.ratio, 1.65);
        assert!(m.is_balanced);
    }

    #[test]
    fn test_missing_label_minerals_warn() {
        let mut pellets = feed("granule-loisir");
        pellets.calcium = 0.0;
        pellets.phosphorus = 0.0;
        pellets.minerals_estimated = true;
        let plan = generator().generate(
            500.0,
            ActivityLevel::LoisirLeger,
            PhysiologicalState::Normal,
            &feed("foin-prairie"),
            &pellets,
        );
        let warning = plan
            .warnings
            .iter()
            .find(|w| w.message.contains("Calcium or phosphorus unknown"))
            .unwrap();
        assert_eq!(warning.severity, Severity::Warning);
        assert!(warning.message.contains("Granulé loisir"));
    }

    #[test]
    fn test_high_calcium_ratio_recommends_phosphorus() {
        let plan = generator().generate(
            500.0,
            ActivityLevel::LoisirLeger,
            PhysiologicalState::Normal,
            &feed("foin-luzerne"),
            &feed("avoine"),
        );
        assert!(!plan.minerals.is_balanced);
        assert!(plan.minerals.ratio > 2.0);
        let warning = plan
            .warnings
            .iter()
            .find(|w| w.message.contains("Calcium/phosphorus"))
            .unwrap();
        assert!(warning.recommendation.contains("phosphorus"));
    }

    #[test]
    fn test_low_calcium_ratio_recommends_calcium() {
        let plan = generator().generate(
            500.0,
            ActivityLevel::LoisirLeger,
            PhysiologicalState::Normal,
            &feed("paille-orge"),
            &feed("orge"),
        );
        assert!(plan.minerals.ratio < 1.5);
        let warning = plan
            .warnings
            .iter()
            .find(|w| w.message.contains("Calcium/phosphorus"))
            .unwrap();
        assert!(warning.recommendation.contains("calcium"));
    }

    #[test]
    fn test_zero_energy_feeds_still_plan() {
        let plan = generator().generate(
            500.0,
            ActivityLevel::LoisirLeger,
            PhysiologicalState::Normal,
            &empty_feed("forage", FeedCategory::Forage),
            &empty_feed("pellets", FeedCategory::Pellet),
        );

        assert_eq!(plan.concentrate.kg, 0.0);
        assert_eq!(plan.concentrate.suggested_meals, 0);
        assert_eq!(plan.minerals.ratio, 0.0);
        assert!(!plan.minerals.is_balanced);
        assert!(has_warning(&plan, "Nutritionally insufficient"));
        assert!(has_warning(&plan, "Protein deficit"));
        assert_eq!(plan.warnings[0].severity, Severity::Critical);
    }

    #[test]
    fn test_heavy_concentrate_warnings() {
        let plan = generator().generate(
            500.0,
            ActivityLevel::TravailIntense,
            PhysiologicalState::Lactation,
            &feed("paille-orge"),
            &feed("avoine"),
        );
        // 11.52 UFC needed, 1.875 from straw, ~11.5 kg of oats
        assert!(plan.concentrate.kg > 5.0);
        assert!(has_warning(&plan, "per day exceeds"));
        assert!(has_warning(&plan, "single-meal limit"));
        assert!(plan.concentrate.suggested_meals >= 4);
    }

    #[test]
    fn test_missing_density_uses_default() {
        let mut pellets = feed("granule-loisir");
        pellets.density = None;
        pellets.is_estimated = true;
        let plan = generator().generate(
            500.0,
            ActivityLevel::Repos,
            PhysiologicalState::Normal,
            &feed("foin-prairie"),
            &pellets,
        );
        assert!(has_warning(&plan, "No density known"));
        assert!(has_warning(&plan, "generic estimates"));
        assert!((plan.concentrate.liters - plan.concentrate.kg / 0.7).abs() < 0.02);
        assert_eq!(plan.warnings.last().unwrap().severity, Severity::Info);
    }

    #[test]
    fn test_low_forage_floor_warns() {
        let mut config = NutritionConfig::default();
        config.forage_floor_fraction = 0.008;
        let plan = RationGenerator::new(config).generate(
            500.0,
            ActivityLevel::Repos,
            PhysiologicalState::Normal,
            &feed("foin-prairie"),
            &feed("granule-loisir"),
        );
        assert!(has_warning(&plan, "below the"));
    }

    #[test]
    fn test_activity_serialization() {
        assert_eq!(
            serde_json::to_string(&ActivityLevel::LoisirLeger).unwrap(),
            "\"LOISIR_LEGER\""
        );
        let s: PhysiologicalState = serde_json::from_str("\"GESTATION\"").unwrap();
        assert_eq!(s, PhysiologicalState::Gestation);
    }
}
