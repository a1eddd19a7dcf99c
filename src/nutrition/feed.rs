//! Feed profiles and the built-in reference catalog

use serde::{Deserialize, Serialize};

use super::estimator::estimate;
use super::label::FeedLabelScan;
use crate::config::NutritionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedCategory {
    Forage,
    Pellet,
    Cereal,
}

impl FeedCategory {
    pub fn is_concentrate(self) -> bool {
        !matches!(self, FeedCategory::Forage)
    }
}

/// Nutritional profile of one feed, per kg as fed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedProfile {
    pub id: String,
    pub category: FeedCategory,
    pub brand: Option<String>,
    pub name: String,
    /// kg per litre; used to express concentrate rations in scoops
    pub density: Option<f64>,
    /// Energy, UFC per kg
    pub ufc: f64,
    /// Digestible protein, g per kg
    pub madc: f64,
    /// g per kg
    pub calcium: f64,
    /// g per kg
    pub phosphorus: f64,
    /// Generic values were substituted for missing label data
    pub is_estimated: bool,
    /// Calcium or phosphorus was missing from the label and counted as zero
    #[serde(default)]
    pub minerals_estimated: bool,
}

struct CatalogEntry {
    id: &'static str,
    category: FeedCategory,
    name: &'static str,
    density: Option<f64>,
    ufc: f64,
    madc: f64,
    calcium: f64,
    phosphorus: f64,
}

#[rustfmt::skip]
const CATALOG: &[CatalogEntry] = &[
    CatalogEntry { id: "foin-prairie", category: FeedCategory::Forage, name: "Foin de prairie", density: None, ufc: 0.45, madc: 45.0, calcium: 4.5, phosphorus: 2.5 },
    CatalogEntry { id: "foin-luzerne", category: FeedCategory::Forage, name: "Foin de luzerne", density: None, ufc: 0.55, madc: 110.0, calcium: 14.0, phosphorus: 2.5 },
    CatalogEntry { id: "enrubanne", category: FeedCategory::Forage, name: "Enrubanné", density: None, ufc: 0.40, madc: 40.0, calcium: 3.5, phosphorus: 2.0 },
    CatalogEntry { id: "paille-orge", category: FeedCategory::Forage, name: "Paille d'orge", density: None, ufc: 0.25, madc: 5.0, calcium: 3.5, phosphorus: 1.0 },
    CatalogEntry { id: "avoine", category: FeedCategory::Cereal, name: "Avoine", density: Some(0.5), ufc: 0.84, madc: 80.0, calcium: 1.0, phosphorus: 3.4 },
    CatalogEntry { id: "orge", category: FeedCategory::Cereal, name: "Orge", density: Some(0.65), ufc: 1.0, madc: 80.0, calcium: 0.7, phosphorus: 3.6 },
    CatalogEntry { id: "mais", category: FeedCategory::Cereal, name: "Maïs", density: Some(0.75), ufc: 1.15, madc: 60.0, calcium: 0.3, phosphorus: 2.7 },
    CatalogEntry { id: "granule-loisir", category: FeedCategory::Pellet, name: "Granulé loisir", density: Some(0.7), ufc: 0.85, madc: 90.0, calcium: 9.0, phosphorus: 5.0 },
    CatalogEntry { id: "granule-sport", category: FeedCategory::Pellet, name: "Granulé sport", density: Some(0.7), ufc: 0.95, madc: 110.0, calcium: 10.0, phosphorus: 5.5 },
    CatalogEntry { id: "floconne", category: FeedCategory::Pellet, name: "Floconné", density: Some(0.45), ufc: 0.95, madc: 95.0, calcium: 8.0, phosphorus: 5.0 },
];

/// Reference feeds shipped with the application
pub fn builtin_feeds() -> Vec<FeedProfile> {
    CATALOG
        .iter()
        .map(|e| FeedProfile {
            id: e.id.to_string(),
            category: e.category,
            brand: None,
            name: e.name.to_string(),
            density: e.density,
            ufc: e.ufc,
            madc: e.madc,
            calcium: e.calcium,
            phosphorus: e.phosphorus,
            is_estimated: false,
            minerals_estimated: false,
        })
        .collect()
}

impl FeedProfile {
    /// Build a custom feed from a label scan. Label minerals are percentages
    /// and become g/kg; missing minerals count as zero and are flagged.
    pub fn from_scan(
        id: impl Into<String>,
        scan: &FeedLabelScan,
        category: FeedCategory,
        config: &NutritionConfig,
    ) -> Self {
        let value = estimate(&scan.nutrients, config);
        let name = scan
            .product_name
            .clone()
            .unwrap_or_else(|| "Aliment scanné".to_string());

        Self {
            id: id.into(),
            category,
            brand: scan.brand.clone(),
            name,
            density: None,
            ufc: value.ufc,
            madc: value.madc,
            calcium: scan.nutrients.calcium.unwrap_or(0.0) * 10.0,
            phosphorus: scan.nutrients.phosphorus.unwrap_or(0.0) * 10.0,
            is_estimated: value.is_estimated,
            minerals_estimated: scan.nutrients.calcium.is_none()
                || scan.nutrients.phosphorus.is_none(),
        }
    }

    pub fn display_name(&self) -> String {
        match &self.brand {
            Some(brand) => format!("{} {}", brand, self.name),
            None => self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nutrition::label::NutrientValues;

    #[test]
    fn test_builtin_catalog() {
        let feeds = builtin_feeds();
        assert_eq!(feeds.len(), 10);
        let ids: std::collections::HashSet<_> = feeds.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids.len(), feeds.len());
        assert!(feeds
            .iter()
            .filter(|f| f.category == FeedCategory::Forage)
            .all(|f| f.density.is_none()));
        assert!(feeds
            .iter()
            .filter(|f| f.category.is_concentrate())
            .all(|f| f.density.is_some()));
        assert!(feeds.iter().all(|f| !f.is_estimated && !f.minerals_estimated));
    }

    #[test]
    fn test_from_scan_converts_minerals() {
        let scan = FeedLabelScan {
            raw_text: String::new(),
            nutrients: NutrientValues {
                protein: Some(12.5),
                fibre: Some(10.0),
                ash: Some(7.0),
                calcium: Some(1.1),
                phosphorus: Some(0.6),
                ..Default::default()
            },
            brand: Some("Cavalor".to_string()),
            product_name: Some("Endurix".to_string()),
            found: true,
        };
        let feed = FeedProfile::from_scan("custom-1", &scan, FeedCategory::Pellet, &NutritionConfig::default());
        assert_eq!(feed.ufc, 0.84);
        assert_eq!(feed.madc, 94.0);
        assert!((feed.calcium - 11.0).abs() < 1e-9);
        assert!((feed.phosphorus - 6.0).abs() < 1e-9);
        assert!(!feed.is_estimated);
        assert!(!feed.minerals_estimated);
        assert_eq!(feed.display_name(), "Cavalor Endurix");
    }

    #[test]
    fn test_from_scan_without_energy_inputs_is_estimated() {
        let scan = FeedLabelScan {
            raw_text: "Calcium 1 %".to_string(),
            nutrients: NutrientValues {
                calcium: Some(1.0),
                ..Default::default()
            },
            brand: None,
            product_name: None,
            found: true,
        };
        let feed = FeedProfile::from_scan("custom-2", &scan, FeedCategory::Cereal, &NutritionConfig::default());
        assert!(feed.is_estimated);
        assert!(feed.minerals_estimated);
        assert_eq!(feed.phosphorus, 0.0);
        assert_eq!(feed.ufc, 0.85);
        assert_eq!(feed.name, "Aliment scanné");
    }

    #[test]
    fn test_category_serialization() {
        assert_eq!(serde_json::to_string(&FeedCategory::Forage).unwrap(), "\"FORAGE\"");
        let c: FeedCategory = serde_json::from_str("\"PELLET\"").unwrap();
        assert_eq!(c, FeedCategory::Pellet);
    }
}
