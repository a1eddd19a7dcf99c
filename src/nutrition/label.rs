//! Feed label parsing
//!
//! Extracts the guaranteed-analysis percentages, brand and product name from
//! OCR text of a feed bag. Labels are mostly French, sometimes English; text
//! is lowercased and stripped of accents before matching.

use regex::Regex;
use std::ops::RangeInclusive;
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use tracing::debug;

use crate::error::Result;

/// Number following a keyword on the same line
const VALUE: &str = r"[^\d\n]{0,20}(\d{1,3}(?:[.,]\d+)?)\b";

/// Upper bounds for values printed per kg
const MAX_UFC_PER_KG: f64 = 2.0;
const MAX_MADC_G_PER_KG: f64 = 400.0;

/// Minimum Jaro-Winkler similarity for a fuzzy brand match
const BRAND_SIMILARITY: f64 = 0.92;

/// Lines scanned for a brand
const BRAND_SCAN_LINES: usize = 10;

/// Longest line accepted as a product name
const MAX_PRODUCT_NAME_CHARS: usize = 40;

/// Known feed brands: (normalized form, display form)
const KNOWN_BRANDS: &[(&str, &str)] = &[
    ("cavalor", "Cavalor"),
    ("spillers", "Spillers"),
    ("saint hippolyt", "Saint Hippolyt"),
    ("destrier", "Destrier"),
    ("royal horse", "Royal Horse"),
    ("dynavena", "Dynavena"),
    ("pavo", "Pavo"),
    ("havens", "Havens"),
    ("reverdy", "Reverdy"),
    ("equistro", "Equistro"),
    ("mcm", "MCM"),
    ("dodson horrell", "Dodson & Horrell"),
    ("baileys", "Baileys"),
    ("marstall", "Marstall"),
    ("hoveler", "Höveler"),
    ("lambey", "Lambey"),
];

/// Lines marking the start of the analysis panel
const ANALYSIS_MARKERS: [&str; 3] = ["analys", "composition", "constituants"];

/// Guaranteed-analysis entries understood by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Nutrient {
    /// Crude protein (MAT)
    Protein,
    /// Crude fibre (cellulose brute)
    Fibre,
    /// Crude ash (cendres brutes)
    Ash,
    /// Crude fat (matières grasses)
    Fat,
    DryMatter,
    Calcium,
    Phosphorus,
    /// Energy printed on the label, UFC per kg
    Ufc,
    /// Digestible protein printed on the label, g per kg
    Madc,
}

impl Nutrient {
    pub const ALL: [Nutrient; 9] = [
        Nutrient::Protein,
        Nutrient::Fibre,
        Nutrient::Ash,
        Nutrient::Fat,
        Nutrient::DryMatter,
        Nutrient::Calcium,
        Nutrient::Phosphorus,
        Nutrient::Ufc,
        Nutrient::Madc,
    ];

    /// Plausible values; anything else is an OCR misread
    fn range(self) -> RangeInclusive<f64> {
        match self {
            Nutrient::Ufc => 0.0..=MAX_UFC_PER_KG,
            Nutrient::Madc => 0.0..=MAX_MADC_G_PER_KG,
            _ => 0.0..=100.0,
        }
    }

    /// Keyword patterns with their value transform, most specific first
    fn patterns(self) -> Vec<(&'static str, fn(f64) -> f64)> {
        let same: fn(f64) -> f64 = |v| v;
        let from_moisture: fn(f64) -> f64 = |v| 100.0 - v;
        match self {
            Nutrient::Protein => vec![
                (r"matieres? azotees? totales?", same),
                (r"proteines? brutes?", same),
                (r"\bm\.?a\.?t\b\.?", same),
                (r"crude protein", same),
                (r"\bproteins?\b", same),
                (r"\bproteines?\b", same),
            ],
            Nutrient::Fibre => vec![
                (r"cellulose brute", same),
                (r"fibres? brutes?", same),
                (r"crude fib(?:re|er)", same),
                (r"\bcellulose\b", same),
                (r"\bfib(?:re|er)s?\b", same),
            ],
            Nutrient::Ash => vec![
                (r"cendres? brutes?", same),
                (r"matieres? minerales?", same),
                (r"crude ash", same),
                (r"\bcendres?\b", same),
                (r"\bash\b", same),
            ],
            Nutrient::Fat => vec![
                (r"matieres? grasses? brutes?", same),
                (r"huiles et matieres? grasses?", same),
                (r"matieres? grasses?", same),
                (r"crude (?:fat|oil)s?", same),
            ],
            Nutrient::DryMatter => vec![
                (r"matieres? seches?", same),
                (r"dry matter", same),
                (r"\bms\b", same),
                (r"\bhumidite\b", from_moisture),
                (r"\bmoisture\b", from_moisture),
            ],
            Nutrient::Calcium => vec![(r"\bcalcium\b", same), (r"\bca\b", same)],
            Nutrient::Phosphorus => vec![
                (r"\bphosphore\b", same),
                (r"\bphosphorus\b", same),
                (r"\bp\b", same),
            ],
            Nutrient::Ufc => vec![(r"\bufc\b", same), (r"unites? fourrageres? cheval", same)],
            Nutrient::Madc => vec![
                (r"\bmadc\b", same),
                (r"matieres? azotees? digestibles?", same),
            ],
        }
    }
}

/// Percentages found on a label
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NutrientValues {
    pub protein: Option<f64>,
    pub fibre: Option<f64>,
    pub ash: Option<f64>,
    pub fat: Option<f64>,
    pub dry_matter: Option<f64>,
    pub calcium: Option<f64>,
    pub phosphorus: Option<f64>,
    /// UFC per kg, when printed
    #[serde(default)]
    pub ufc: Option<f64>,
    /// MADC g per kg, when printed
    #[serde(default)]
    pub madc: Option<f64>,
}

impl NutrientValues {
    pub fn get(&self, nutrient: Nutrient) -> Option<f64> {
        match nutrient {
            Nutrient::Protein => self.protein,
            Nutrient::Fibre => self.fibre,
            Nutrient::Ash => self.ash,
            Nutrient::Fat => self.fat,
            Nutrient::DryMatter => self.dry_matter,
            Nutrient::Calcium => self.calcium,
            Nutrient::Phosphorus => self.phosphorus,
            Nutrient::Ufc => self.ufc,
            Nutrient::Madc => self.madc,
        }
    }

    fn slot(&mut self, nutrient: Nutrient) -> &mut Option<f64> {
        match nutrient {
            Nutrient::Protein => &mut self.protein,
            Nutrient::Fibre => &mut self.fibre,
            Nutrient::Ash => &mut self.ash,
            Nutrient::Fat => &mut self.fat,
            Nutrient::DryMatter => &mut self.dry_matter,
            Nutrient::Calcium => &mut self.calcium,
            Nutrient::Phosphorus => &mut self.phosphorus,
            Nutrient::Ufc => &mut self.ufc,
            Nutrient::Madc => &mut self.madc,
        }
    }

    /// Number of nutrients located
    pub fn count(&self) -> usize {
        Nutrient::ALL.iter().filter(|n| self.get(**n).is_some()).count()
    }
}

/// Everything read from one label photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedLabelScan {
    pub raw_text: String,
    pub nutrients: NutrientValues,
    pub brand: Option<String>,
    pub product_name: Option<String>,
    /// At least one nutrient was located
    pub found: bool,
}

struct Matcher {
    regex: Regex,
    transform: fn(f64) -> f64,
}

/// Compiled label patterns. Build once and reuse.
pub struct LabelParser {
    matchers: Vec<(Nutrient, Vec<Matcher>)>,
}

impl LabelParser {
    pub fn new() -> Result<Self> {
        let mut matchers = Vec::with_capacity(Nutrient::ALL.len());
        for nutrient in Nutrient::ALL {
            let compiled = nutrient
                .patterns()
                .into_iter()
                .map(|(keyword, transform)| {
                    Ok(Matcher {
                        regex: Regex::new(&format!("(?:{}){}", keyword, VALUE))?,
                        transform,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            matchers.push((nutrient, compiled));
        }
        Ok(Self { matchers })
    }

    /// Parse OCR text. Deterministic: the same text always yields the same scan.
    pub fn parse(&self, raw_text: &str) -> FeedLabelScan {
        let text = normalize(raw_text);
        let mut nutrients = NutrientValues::default();

        for (nutrient, matchers) in &self.matchers {
            *nutrients.slot(*nutrient) = first_value(matchers, &text, nutrient.range());
        }

        let found = nutrients.count() > 0;
        let brand = detect_brand(&text);
        let product_name = detect_product_name(raw_text);
        debug!(
            "Label parsed: {} nutrients, brand {:?}, product {:?}",
            nutrients.count(),
            brand,
            product_name
        );

        FeedLabelScan {
            raw_text: raw_text.to_string(),
            nutrients,
            brand,
            product_name,
            found,
        }
    }
}

/// First in-range value from the first matcher that yields one
fn first_value(matchers: &[Matcher], text: &str, range: RangeInclusive<f64>) -> Option<f64> {
    matchers.iter().find_map(|m| {
        m.regex.captures_iter(text).find_map(|caps| {
            let number = caps.get(1)?.as_str().replace(',', ".");
            let value = (m.transform)(number.parse::<f64>().ok()?);
            range.contains(&value).then_some(value)
        })
    })
}

/// Lowercase and fold accented Latin letters to ASCII
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        match c {
            'à' | 'â' | 'ä' | 'á' | 'ã' | 'å' => out.push('a'),
            'é' | 'è' | 'ê' | 'ë' => out.push('e'),
            'î' | 'ï' | 'í' | 'ì' => out.push('i'),
            'ô' | 'ö' | 'ó' | 'ò' | 'õ' => out.push('o'),
            'û' | 'ü' | 'ú' | 'ù' => out.push('u'),
            'ç' => out.push('c'),
            'ñ' => out.push('n'),
            'ÿ' => out.push('y'),
            'œ' => out.push_str("oe"),
            'æ' => out.push_str("ae"),
            'ß' => out.push_str("ss"),
            _ => out.push(c),
        }
    }
    out
}

fn tokens(line: &str) -> Vec<&str> {
    line.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Brand from the first non-trivial lines: whole-word match first, then a
/// fuzzy match to absorb OCR misreads
fn detect_brand(normalized: &str) -> Option<String> {
    let lines: Vec<Vec<&str>> = normalized
        .lines()
        .map(str::trim)
        .filter(|l| l.chars().count() >= 3)
        .take(BRAND_SCAN_LINES)
        .map(tokens)
        .collect();

    let windows = |size: usize| {
        lines
            .iter()
            .flat_map(move |line| line.windows(size).map(|w| w.join(" ")))
    };

    for (key, display) in KNOWN_BRANDS {
        let size = key.split(' ').count();
        if windows(size).any(|w| w == *key) {
            return Some(display.to_string());
        }
    }

    let mut best: Option<(f64, &str)> = None;
    for (key, display) in KNOWN_BRANDS {
        let size = key.split(' ').count();
        for window in windows(size) {
            let score = jaro_winkler(&window, key);
            if score >= BRAND_SIMILARITY && best.map_or(true, |(s, _)| score > s) {
                best = Some((score, *display));
            }
        }
    }
    best.map(|(_, display)| display.to_string())
}

/// Longest short line above the analysis panel, else the first line
fn detect_product_name(raw_text: &str) -> Option<String> {
    let lines: Vec<&str> = raw_text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let marker = lines.iter().position(|line| {
        let line = normalize(line);
        ANALYSIS_MARKERS.iter().any(|m| line.contains(m))
    });

    let candidate = marker.and_then(|end| {
        lines[..end]
            .iter()
            .filter(|l| (3..=MAX_PRODUCT_NAME_CHARS).contains(&l.chars().count()))
            .fold(None::<&str>, |best, line| match best {
                Some(b) if b.chars().count() >= line.chars().count() => Some(b),
                _ => Some(*line),
            })
    });

    candidate.or_else(|| lines.first().copied()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> LabelParser {
        LabelParser::new().unwrap()
    }

    const FRENCH_LABEL: &str = "\
CAVALOR
Endurix Performance Mix
Aliment pour chevaux
Constituants analytiques
Matières Azotées Totales 12.5 %
Cellulose brute 10 %
Cendres brutes 7 %
Matières grasses brutes 4,2 %
Calcium 1,1 %
Phosphore 0,6 %
Humidité 12 %";

    #[test]
    fn test_normalize_folds_accents() {
        assert_eq!(normalize("Matières Azotées"), "matieres azotees");
        assert_eq!(normalize("HUMIDITÉ Œuf"), "humidite oeuf");
        assert_eq!(normalize("Höveler"), "hoveler");
    }

    #[test]
    fn test_french_label() {
        let scan = parser().parse(FRENCH_LABEL);
        assert!(scan.found);
        let n = &scan.nutrients;
        assert_eq!(n.protein, Some(12.5));
        assert_eq!(n.fibre, Some(10.0));
        assert_eq!(n.ash, Some(7.0));
        assert_eq!(n.fat, Some(4.2));
        assert_eq!(n.calcium, Some(1.1));
        assert_eq!(n.phosphorus, Some(0.6));
        assert_eq!(n.dry_matter, Some(88.0));
        assert_eq!(scan.brand.as_deref(), Some("Cavalor"));
        assert_eq!(scan.product_name.as_deref(), Some("Endurix Performance Mix"));
    }

    #[test]
    fn test_minimal_french_analysis() {
        let text = "Matières Azotées Totales 12.5 %\nCellulose brute 10 %\nCendres brutes 7 %";
        let scan = parser().parse(text);
        assert!(scan.found);
        assert_eq!(scan.nutrients.protein, Some(12.5));
        assert_eq!(scan.nutrients.fibre, Some(10.0));
        assert_eq!(scan.nutrients.ash, Some(7.0));
    }

    #[test]
    fn test_english_label() {
        let text = "Spillers\nHappy Hoof\nTypical analysis\nCrude Protein 8%\nCrude Fibre 26%\nCrude Ash 9%\nCrude Oil 4%\nMoisture 10%";
        let scan = parser().parse(text);
        assert_eq!(scan.nutrients.protein, Some(8.0));
        assert_eq!(scan.nutrients.fibre, Some(26.0));
        assert_eq!(scan.nutrients.ash, Some(9.0));
        assert_eq!(scan.nutrients.fat, Some(4.0));
        assert_eq!(scan.nutrients.dry_matter, Some(90.0));
        assert_eq!(scan.brand.as_deref(), Some("Spillers"));
        assert_eq!(scan.product_name.as_deref(), Some("Happy Hoof"));
    }

    #[test]
    fn test_no_nutrients_found() {
        let scan = parser().parse("Poids net 20 kg");
        assert!(!scan.found);
        assert_eq!(scan.nutrients, NutrientValues::default());
        assert_eq!(scan.product_name.as_deref(), Some("Poids net 20 kg"));
    }

    #[test]
    fn test_empty_text() {
        let scan = parser().parse("");
        assert!(!scan.found);
        assert!(scan.brand.is_none());
        assert!(scan.product_name.is_none());
    }

    #[test]
    fn test_out_of_range_values_ignored() {
        let scan = parser().parse("Protéines brutes 150 %\nProtéine 11 %");
        assert_eq!(scan.nutrients.protein, Some(11.0));
    }

    #[test]
    fn test_mat_abbreviation() {
        let scan = parser().parse("M.A.T. : 14 %");
        assert_eq!(scan.nutrients.protein, Some(14.0));
        // "matériel" must not be read as MAT
        assert!(!parser().parse("Matériel 12").found);
    }

    #[test]
    fn test_fuzzy_brand_match() {
        let scan = parser().parse("SPILERS\nPellets 12 %");
        assert_eq!(scan.brand.as_deref(), Some("Spillers"));
        let scan = parser().parse("Saint Hipolyt\nStruktur Energy");
        assert_eq!(scan.brand.as_deref(), Some("Saint Hippolyt"));
    }

    #[test]
    fn test_unknown_brand() {
        assert!(parser().parse("Ferme du Val\nFoin 2024").brand.is_none());
    }

    #[test]
    fn test_parse_is_idempotent() {
        let p = parser();
        let first = p.parse(FRENCH_LABEL);
        let second = p.parse(&first.raw_text);
        assert_eq!(first, second);
    }

    #[test]
    fn test_printed_energy_values() {
        let text = "Valeurs nutritionnelles\nUFC/kg : 0,92\nMADC (g/kg) : 118\nMatières Azotées Totales 15 %";
        let scan = parser().parse(text);
        assert_eq!(scan.nutrients.ufc, Some(0.92));
        assert_eq!(scan.nutrients.madc, Some(118.0));
        // Digestible protein is not crude protein
        assert_eq!(scan.nutrients.protein, Some(15.0));
    }

    #[test]
    fn test_implausible_energy_ignored() {
        let scan = parser().parse("UFC 85\nMADC 950");
        assert!(scan.nutrients.ufc.is_none());
        assert!(scan.nutrients.madc.is_none());
        assert!(!scan.found);
    }

    #[test]
    fn test_first_matcher_wins() {
        // The specific keyword is preferred over the generic one
        let scan = parser().parse("Protein 20 %\nCrude Protein 11 %");
        assert_eq!(scan.nutrients.protein, Some(11.0));
    }
}
