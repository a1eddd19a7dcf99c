//! Nutrition Layer
//!
//! Feed label parsing, energy/protein estimation, the feed catalog and daily
//! ration planning. Nothing in here fails on poor data: missing values fall
//! back to defaults and are surfaced as flags or ration warnings.

pub mod estimator;
pub mod feed;
pub mod label;
pub mod ration;

pub use estimator::{estimate, NutritionalValue};
pub use feed::{builtin_feeds, FeedCategory, FeedProfile};
pub use label::{FeedLabelScan, LabelParser, Nutrient, NutrientValues};
pub use ration::{
    ActivityLevel, PhysiologicalState, RationGenerator, RationPlan, RationWarning, Severity,
};
