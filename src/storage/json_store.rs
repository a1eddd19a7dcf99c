//! Horse record storage as JSON files
//!
//! One pretty-printed document per horse, `<dir>/<horse id>.json`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::repository::{Horse, HorseRecord, HorseRepository};
use crate::error::{EquiError, Result};
use crate::morphometry::WeightEstimate;
use crate::nutrition::FeedProfile;

/// Load a horse record from file
pub fn load_record(path: &Path) -> Result<HorseRecord> {
    let content = std::fs::read_to_string(path)?;
    let record: HorseRecord = serde_json::from_str(&content)?;
    Ok(record)
}

/// Save a horse record to file
pub fn save_record(record: &HorseRecord, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(record)?;
    // Write then rename so a crash never leaves a truncated record
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Repository backed by a directory of JSON records. File access runs on
/// tokio's blocking pool.
pub struct JsonFileRepository {
    store: Arc<RecordStore>,
}

struct RecordStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl RecordStore {
    fn record_path(&self, horse_id: &str) -> Result<PathBuf> {
        let valid = !horse_id.is_empty()
            && horse_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(EquiError::InvalidInput(format!("invalid horse id {:?}", horse_id)));
        }
        Ok(self.dir.join(format!("{}.json", horse_id)))
    }

    fn read(&self, horse_id: &str) -> Result<HorseRecord> {
        let path = self.record_path(horse_id)?;
        if !path.exists() {
            return Err(EquiError::HorseNotFound(horse_id.to_string()));
        }
        load_record(&path)
    }

    fn update<T>(&self, horse_id: &str, f: impl FnOnce(&mut HorseRecord) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock();
        let mut record = self.read(horse_id)?;
        let out = f(&mut record)?;
        save_record(&record, &self.record_path(horse_id)?)?;
        debug!("Saved record for horse {}", horse_id);
        Ok(out)
    }

    fn save_horse(&self, horse: Horse) -> Result<()> {
        let _guard = self.write_lock.lock();
        let path = self.record_path(&horse.id)?;
        let record = if path.exists() {
            let mut record = load_record(&path)?;
            record.horse = horse;
            record
        } else {
            HorseRecord::new(horse)
        };
        save_record(&record, &path)
    }

    fn list_horses(&self) -> Result<Vec<Horse>> {
        let mut horses = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                horses.push(load_record(&path)?.horse);
            }
        }
        horses.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(horses)
    }
}

impl JsonFileRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            store: Arc::new(RecordStore {
                dir,
                write_lock: Mutex::new(()),
            }),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&RecordStore) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| EquiError::Storage(std::io::Error::other(e.to_string())))?
    }
}

#[async_trait]
impl HorseRepository for JsonFileRepository {
    async fn get_horse(&self, horse_id: &str) -> Result<Horse> {
        let id = horse_id.to_string();
        self.blocking(move |store| Ok(store.read(&id)?.horse)).await
    }

    async fn save_horse(&self, horse: &Horse) -> Result<()> {
        horse.validate()?;
        let horse = horse.clone();
        self.blocking(move |store| store.save_horse(horse)).await
    }

    async fn list_horses(&self) -> Result<Vec<Horse>> {
        self.blocking(|store| store.list_horses()).await
    }

    async fn weight_history(&self, horse_id: &str) -> Result<Vec<WeightEstimate>> {
        let id = horse_id.to_string();
        self.blocking(move |store| Ok(store.read(&id)?.weights)).await
    }

    async fn save_weight_estimate(&self, horse_id: &str, estimate: &WeightEstimate) -> Result<()> {
        let id = horse_id.to_string();
        let estimate = estimate.clone();
        self.blocking(move |store| {
            store.update(&id, |r| {
                r.weights.push(estimate);
                Ok(())
            })
        })
        .await
    }

    async fn list_feeds(&self, horse_id: &str) -> Result<Vec<FeedProfile>> {
        let id = horse_id.to_string();
        self.blocking(move |store| Ok(store.read(&id)?.all_feeds())).await
    }

    async fn save_custom_feed(&self, horse_id: &str, feed: &FeedProfile) -> Result<()> {
        let id = horse_id.to_string();
        let feed = feed.clone();
        self.blocking(move |store| store.update(&id, |r| r.add_custom_feed(&feed)))
            .await
    }

    async fn delete_custom_feed(&self, horse_id: &str, feed_id: &str) -> Result<()> {
        let id = horse_id.to_string();
        let feed_id = feed_id.to_string();
        self.blocking(move |store| store.update(&id, |r| r.remove_custom_feed(&feed_id)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MorphometryConfig;
    use crate::morphometry::manual_weight;
    use crate::nutrition::{builtin_feeds, ActivityLevel};
    use tempfile::TempDir;

    #[test]
    fn test_record_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("h1.json");
        let mut record = HorseRecord::new(Horse::new("h1", "Tornado"));
        record
            .weights
            .push(manual_weight(480.0, 5, &MorphometryConfig::default()).unwrap());

        save_record(&record, &path).unwrap();
        assert_eq!(load_record(&path).unwrap(), record);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let temp = TempDir::new().unwrap();
        {
            let repo = JsonFileRepository::new(temp.path()).unwrap();
            let mut horse = Horse::new("h1", "Tornado");
            horse.activity = ActivityLevel::TravailModere;
            repo.save_horse(&horse).await.unwrap();
            let w = manual_weight(510.0, 6, &MorphometryConfig::default()).unwrap();
            repo.save_weight_estimate("h1", &w).await.unwrap();
        }

        let repo = JsonFileRepository::new(temp.path()).unwrap();
        let horse = repo.get_horse("h1").await.unwrap();
        assert_eq!(horse.activity, ActivityLevel::TravailModere);
        let history = repo.weight_history("h1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].value_kg, 510.0);
        assert_eq!(repo.list_feeds("h1").await.unwrap().len(), builtin_feeds().len());
        assert_eq!(repo.list_horses().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_horse() {
        let temp = TempDir::new().unwrap();
        let repo = JsonFileRepository::new(temp.path()).unwrap();
        assert!(matches!(repo.get_horse("ghost").await, Err(EquiError::HorseNotFound(_))));
        let w = manual_weight(480.0, 5, &MorphometryConfig::default()).unwrap();
        assert!(repo.save_weight_estimate("ghost", &w).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let temp = TempDir::new().unwrap();
        let repo = JsonFileRepository::new(temp.path()).unwrap();
        assert!(matches!(
            repo.get_horse("../etc/passwd").await,
            Err(EquiError::InvalidInput(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_keep_every_entry() {
        let temp = TempDir::new().unwrap();
        let repo = Arc::new(JsonFileRepository::new(temp.path()).unwrap());
        repo.save_horse(&Horse::new("h1", "Tornado")).await.unwrap();

        let config = MorphometryConfig::default();
        let mut tasks = Vec::new();
        for i in 0..8 {
            let repo = repo.clone();
            let w = manual_weight(450.0 + i as f64, 5, &config).unwrap();
            tasks.push(tokio::spawn(async move { repo.save_weight_estimate("h1", &w).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(repo.weight_history("h1").await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_invalid_horse_not_written() {
        let temp = TempDir::new().unwrap();
        let repo = JsonFileRepository::new(temp.path()).unwrap();
        let mut horse = Horse::new("h1", "Tornado");
        horse.body_condition_score = Some(42);
        assert!(matches!(repo.save_horse(&horse).await, Err(EquiError::InvalidInput(_))));
        assert!(!temp.path().join("h1.json").exists());
    }

    #[test]
    fn test_load_invalid_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_record(&path), Err(EquiError::Serialization(_))));
    }
}
