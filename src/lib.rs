//! Equimetrics - horse weight estimation and ration planning
//!
//! Estimates a horse's body weight from a side-profile photo, reads
//! nutrient values from feed label photos and plans a daily ration from the
//! two.

pub mod capture;
pub mod config;
pub mod error;
pub mod morphometry;
pub mod nutrition;
pub mod pipeline;
pub mod storage;
pub mod vision;

pub use error::{EquiError, Result};
pub use pipeline::{EstimationPipeline, LabelScanOutcome};
