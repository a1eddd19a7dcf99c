//! Horse repository
//!
//! The narrow persistence interface the estimation pipeline needs, and an
//! in-memory implementation.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{EquiError, Result};
use crate::morphometry::{self, WeightEstimate, MAX_HORSE_HEIGHT_CM, MIN_HORSE_HEIGHT_CM};
use crate::nutrition::{builtin_feeds, ActivityLevel, FeedProfile, PhysiologicalState};

/// Horse attributes relevant to estimation and rationing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Horse {
    pub id: String,
    pub name: String,
    /// Withers height, used as default calibration
    pub height_cm: Option<f64>,
    /// Default body condition score (1-9)
    pub body_condition_score: Option<u8>,
    #[serde(default)]
    pub activity: ActivityLevel,
    #[serde(default)]
    pub state: PhysiologicalState,
}

impl Horse {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            height_cm: None,
            body_condition_score: None,
            activity: ActivityLevel::default(),
            state: PhysiologicalState::default(),
        }
    }

    /// Reject attributes that would only fail later during estimation
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EquiError::InvalidInput("horse name is empty".to_string()));
        }
        if let Some(height) = self.height_cm {
            if !(MIN_HORSE_HEIGHT_CM..=MAX_HORSE_HEIGHT_CM).contains(&height) {
                return Err(EquiError::InvalidInput(format!(
                    "horse height {} cm is outside {}-{} cm",
                    height, MIN_HORSE_HEIGHT_CM, MAX_HORSE_HEIGHT_CM
                )));
            }
        }
        if let Some(bcs) = self.body_condition_score {
            morphometry::validate_bcs(bcs)?;
        }
        Ok(())
    }
}

/// Everything stored for one horse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorseRecord {
    pub horse: Horse,
    /// Oldest first
    #[serde(default)]
    pub weights: Vec<WeightEstimate>,
    #[serde(default)]
    pub custom_feeds: Vec<FeedProfile>,
}

impl HorseRecord {
    pub fn new(horse: Horse) -> Self {
        Self {
            horse,
            weights: Vec::new(),
            custom_feeds: Vec::new(),
        }
    }

    /// Append a custom feed; ids must be unique among built-in and custom feeds
    pub fn add_custom_feed(&mut self, feed: &FeedProfile) -> Result<()> {
        let taken = builtin_feeds().iter().any(|f| f.id == feed.id)
            || self.custom_feeds.iter().any(|f| f.id == feed.id);
        if taken {
            return Err(EquiError::InvalidInput(format!(
                "feed id {} already exists",
                feed.id
            )));
        }
        self.custom_feeds.push(feed.clone());
        Ok(())
    }

    pub fn remove_custom_feed(&mut self, feed_id: &str) -> Result<()> {
        let before = self.custom_feeds.len();
        self.custom_feeds.retain(|f| f.id != feed_id);
        if self.custom_feeds.len() == before {
            return Err(EquiError::FeedNotFound(feed_id.to_string()));
        }
        Ok(())
    }

    /// Built-in catalog followed by this horse's custom feeds
    pub fn all_feeds(&self) -> Vec<FeedProfile> {
        let mut feeds = builtin_feeds();
        feeds.extend(self.custom_feeds.iter().cloned());
        feeds
    }
}

/// Persistence used by the pipeline. Weight history and custom feeds are
/// append-only apart from explicit feed deletion.
#[async_trait]
pub trait HorseRepository: Send + Sync {
    async fn get_horse(&self, horse_id: &str) -> Result<Horse>;

    /// Create or update a horse's attributes, keeping its history.
    /// Attributes are checked with [`Horse::validate`] first.
    async fn save_horse(&self, horse: &Horse) -> Result<()>;

    async fn list_horses(&self) -> Result<Vec<Horse>>;

    /// Recorded weights, oldest first
    async fn weight_history(&self, horse_id: &str) -> Result<Vec<WeightEstimate>>;

    async fn save_weight_estimate(&self, horse_id: &str, estimate: &WeightEstimate) -> Result<()>;

    /// Built-in catalog plus the horse's custom feeds
    async fn list_feeds(&self, horse_id: &str) -> Result<Vec<FeedProfile>>;

    async fn save_custom_feed(&self, horse_id: &str, feed: &FeedProfile) -> Result<()>;

    async fn delete_custom_feed(&self, horse_id: &str, feed_id: &str) -> Result<()>;
}

/// Volatile repository, used by tests and one-shot runs
#[derive(Default)]
pub struct InMemoryRepository {
    records: RwLock<HashMap<String, HorseRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<T>(
        &self,
        horse_id: &str,
        f: impl FnOnce(&mut HorseRecord) -> Result<T>,
    ) -> Result<T> {
        let mut records = self.records.write();
        let record = records
            .get_mut(horse_id)
            .ok_or_else(|| EquiError::HorseNotFound(horse_id.to_string()))?;
        f(record)
    }
}

#[async_trait]
impl HorseRepository for InMemoryRepository {
    async fn get_horse(&self, horse_id: &str) -> Result<Horse> {
        self.with_record(horse_id, |r| Ok(r.horse.clone()))
    }

    async fn save_horse(&self, horse: &Horse) -> Result<()> {
        horse.validate()?;
        let mut records = self.records.write();
        records
            .entry(horse.id.clone())
            .and_modify(|r| r.horse = horse.clone())
            .or_insert_with(|| HorseRecord::new(horse.clone()));
        Ok(())
    }

    async fn list_horses(&self) -> Result<Vec<Horse>> {
        let mut horses: Vec<Horse> = self.records.read().values().map(|r| r.horse.clone()).collect();
        horses.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(horses)
    }

    async fn weight_history(&self, horse_id: &str) -> Result<Vec<WeightEstimate>> {
        self.with_record(horse_id, |r| Ok(r.weights.clone()))
    }

    async fn save_weight_estimate(&self, horse_id: &str, estimate: &WeightEstimate) -> Result<()> {
        self.with_record(horse_id, |r| {
            r.weights.push(estimate.clone());
            Ok(())
        })
    }

    async fn list_feeds(&self, horse_id: &str) -> Result<Vec<FeedProfile>> {
        self.with_record(horse_id, |r| Ok(r.all_feeds()))
    }

    async fn save_custom_feed(&self, horse_id: &str, feed: &FeedProfile) -> Result<()> {
        self.with_record(horse_id, |r| r.add_custom_feed(feed))
    }

    async fn delete_custom_feed(&self, horse_id: &str, feed_id: &str) -> Result<()> {
        self.with_record(horse_id, |r| r.remove_custom_feed(feed_id))
    }
}
