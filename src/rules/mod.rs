//! # Genre Rules
//!
//! Genre-driven tuning for the estimators. A [`GenreRules`] record groups the
//! per-feature constants (tempo fold range, energy weights, heuristic weights,
//! cue scanning, phrase and transition windows). Records are looked up by
//! subgenre, then category, then the defaults, with a one-level `parent`
//! merge.
//!
//! The persisted user configuration (global settings, per-genre overrides,
//! era rules, audit history) lives in [`store`].
//!
//! ## Usage
//!
//! ```rust
//! use dj_analyzer::rules::GenreRuleSet;
//!
//! let rules = GenreRuleSet::builtin().unwrap();
//! let house = rules.get_rules(Some("Electronic"), Some("House"));
//! assert!(house.danceability.boost > 0.0);
//! ```

pub mod persistence;
pub mod store;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use toml::{Table, Value};

use crate::error::ConfigError;

pub use persistence::{ConfigBackup, ConfigPersistence, JsonFilePersistence, MemoryPersistence};
pub use store::{
    AnalyzerSettings, AuditEntry, ConfigMeta, ConfigStore, EraRule, SettingsOverride, StoredConfig,
};

const BUILTIN_CATALOG: &str = include_str!("genres.toml");

/// Tempo folding range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoRules {
    pub bpm_min: f64,
    pub bpm_max: f64,
}

/// Weights of the scalar energy estimate and its final scaling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyRules {
    pub scale: f64,
    pub cap: f64,
    pub rms_weight: f64,
    pub onset_weight: f64,
    pub brightness_weight: f64,
    pub bass_weight: f64,
    pub dynamics_weight: f64,
}

/// Constants of one derived heuristic (danceability, acousticness, ...)
///
/// How each weight is applied is specific to the feature; see
/// `analysis::heuristics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRules {
    pub base: f64,
    pub boost: f64,
    pub energy_weight: f64,
    pub regularity_weight: f64,
    pub spectral_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CueRules {
    pub min_silence_sec: f64,
    pub max_intro_scan_sec: f64,
    pub max_outro_scan_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRules {
    /// Normalized level a track must start above to be classified as fading out
    pub fade_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseRules {
    pub default_bars: u32,
    pub novelty_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRules {
    /// Length of the windows whose energy spread is measured
    pub window_sec: f64,
    /// Length of the intro and outro regions weighted into the score
    pub region_sec: f64,
}

/// Fully populated rule record for one genre
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenreRules {
    pub tempo: TempoRules,
    pub energy: EnergyRules,
    pub danceability: FeatureRules,
    pub acousticness: FeatureRules,
    pub instrumentalness: FeatureRules,
    pub liveness: FeatureRules,
    pub cue: CueRules,
    pub trajectory: TrajectoryRules,
    pub phrase: PhraseRules,
    pub transition: TransitionRules,
}

impl Default for GenreRules {
    fn default() -> Self {
        Self {
            tempo: TempoRules {
                bpm_min: 80.0,
                bpm_max: 180.0,
            },
            energy: EnergyRules {
                scale: 1.0,
                cap: 100.0,
                rms_weight: 0.35,
                onset_weight: 0.2,
                brightness_weight: 0.15,
                bass_weight: 0.15,
                dynamics_weight: 0.15,
            },
            danceability: FeatureRules {
                base: 10.0,
                boost: 0.0,
                energy_weight: 0.5,
                regularity_weight: 0.35,
                spectral_weight: 0.0,
            },
            acousticness: FeatureRules {
                base: 5.0,
                boost: 0.0,
                energy_weight: 0.6,
                regularity_weight: 0.0,
                spectral_weight: 0.3,
            },
            instrumentalness: FeatureRules {
                base: 0.0,
                boost: 0.0,
                energy_weight: 0.1,
                regularity_weight: 0.0,
                spectral_weight: 0.8,
            },
            liveness: FeatureRules {
                base: 0.0,
                boost: 0.0,
                energy_weight: 0.05,
                regularity_weight: 0.25,
                spectral_weight: 0.15,
            },
            cue: CueRules {
                min_silence_sec: 0.3,
                max_intro_scan_sec: 10.0,
                max_outro_scan_sec: 10.0,
            },
            trajectory: TrajectoryRules { fade_threshold: 0.5 },
            phrase: PhraseRules {
                default_bars: 8,
                novelty_threshold: 0.15,
            },
            transition: TransitionRules {
                window_sec: 8.0,
                region_sec: 30.0,
            },
        }
    }
}

impl GenreRules {
    /// Validate the record
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, value: String| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        };

        if self.tempo.bpm_min <= 0.0 || self.tempo.bpm_max <= self.tempo.bpm_min {
            return Err(invalid(
                "tempo.bpm_range",
                format!("{}-{}", self.tempo.bpm_min, self.tempo.bpm_max),
            ));
        }

        if !(0.0..=100.0).contains(&self.energy.cap) {
            return Err(invalid("energy.cap", self.energy.cap.to_string()));
        }

        if self.trajectory.fade_threshold <= 0.0 {
            return Err(invalid(
                "trajectory.fade_threshold",
                self.trajectory.fade_threshold.to_string(),
            ));
        }

        if self.phrase.default_bars == 0 {
            return Err(invalid("phrase.default_bars", "0".to_string()));
        }

        if self.transition.window_sec <= 0.0 {
            return Err(invalid(
                "transition.window_sec",
                self.transition.window_sec.to_string(),
            ));
        }

        Ok(())
    }
}

/// Catalog of partial rule records keyed by category and subgenre name
///
/// Resolution order is a contract: subgenre > category > default. Each
/// record may name one `parent`, merged between the defaults and the record.
#[derive(Debug, Clone)]
pub struct GenreRuleSet {
    categories: BTreeMap<String, Table>,
    subgenres: BTreeMap<String, Table>,
    defaults: Table,
}

#[derive(Debug, Default, Deserialize)]
struct Catalog {
    #[serde(default)]
    categories: BTreeMap<String, Table>,
    #[serde(default)]
    subgenres: BTreeMap<String, Table>,
}

impl GenreRuleSet {
    /// Rule set with only the defaults
    pub fn empty() -> Self {
        let defaults = match Value::try_from(GenreRules::default()) {
            Ok(Value::Table(table)) => table,
            _ => Table::new(),
        };
        Self {
            categories: BTreeMap::new(),
            subgenres: BTreeMap::new(),
            defaults,
        }
    }

    /// Rule set with the embedded catalog
    pub fn builtin() -> Result<Self, ConfigError> {
        let mut set = Self::empty();
        set.merge_catalog(BUILTIN_CATALOG, "<builtin>")?;
        Ok(set)
    }

    /// Builtin catalog extended with a user catalog file
    pub fn with_catalog_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let mut set = Self::builtin()?;
        set.merge_catalog(&content, &path.display().to_string())?;
        Ok(set)
    }

    /// Parse a TOML catalog and deep-merge it over the current entries
    ///
    /// A rejected catalog leaves the set unchanged.
    pub fn merge_catalog(&mut self, content: &str, origin: &str) -> Result<(), ConfigError> {
        let catalog: Catalog = toml::from_str(content).map_err(|e| ConfigError::ParseFailed {
            path: origin.to_string(),
            reason: e.to_string(),
        })?;

        let mut merged = self.clone();
        for (name, table) in catalog.categories {
            let entry = merged.categories.entry(name).or_default();
            deep_merge(entry, &table);
        }
        for (name, table) in catalog.subgenres {
            let entry = merged.subgenres.entry(name).or_default();
            deep_merge(entry, &table);
        }

        merged.validate_all()?;
        *self = merged;
        Ok(())
    }

    /// Every entry must resolve to a valid record
    fn validate_all(&self) -> Result<(), ConfigError> {
        for name in self.categories.keys() {
            self.try_resolve(self.categories.get(name))?.validate()?;
        }
        for name in self.subgenres.keys() {
            self.try_resolve(self.subgenres.get(name))?.validate()?;
        }
        Ok(())
    }

    /// Resolve rules for a category / subgenre pair
    ///
    /// Exact subgenre match wins, then exact category match, then defaults.
    pub fn get_rules(&self, category: Option<&str>, subgenre: Option<&str>) -> GenreRules {
        let record = subgenre
            .and_then(|name| self.subgenres.get(name))
            .or_else(|| category.and_then(|name| self.categories.get(name)));

        match self.try_resolve(record) {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(?category, ?subgenre, error = %e, "Falling back to default genre rules");
                GenreRules::default()
            }
        }
    }

    /// Resolve a single declared genre name
    ///
    /// The name is tried as a subgenre, then as a category, ignoring case.
    pub fn rules_for_genre(&self, genre: Option<&str>) -> GenreRules {
        let Some(genre) = genre.map(str::trim).filter(|g| !g.is_empty()) else {
            return GenreRules::default();
        };

        let find = |map: &BTreeMap<String, Table>| {
            map.keys()
                .find(|key| key.eq_ignore_ascii_case(genre))
                .cloned()
        };

        if let Some(subgenre) = find(&self.subgenres) {
            return self.get_rules(None, Some(&subgenre));
        }
        if let Some(category) = find(&self.categories) {
            return self.get_rules(Some(&category), None);
        }
        GenreRules::default()
    }

    pub fn categories(&self) -> Vec<&str> {
        self.categories.keys().map(String::as_str).collect()
    }

    pub fn subgenres(&self) -> Vec<&str> {
        self.subgenres.keys().map(String::as_str).collect()
    }

    /// default ⊕ parent ⊕ record
    fn try_resolve(&self, record: Option<&Table>) -> Result<GenreRules, ConfigError> {
        let mut merged = self.defaults.clone();

        if let Some(record) = record {
            let parent = record
                .get("parent")
                .and_then(Value::as_str)
                .and_then(|name| self.categories.get(name).or_else(|| self.subgenres.get(name)));

            if let Some(parent) = parent {
                deep_merge(&mut merged, parent);
            }
            deep_merge(&mut merged, record);
        }

        merged.remove("parent");
        Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::InvalidValue {
                key: "genre_rules".to_string(),
                value: e.to_string(),
            })
    }
}

impl Default for GenreRuleSet {
    fn default() -> Self {
        Self::builtin().unwrap_or_else(|e| {
            tracing::error!(error = %e, "Builtin genre catalog is invalid, using defaults only");
            Self::empty()
        })
    }
}

/// Recursively copy `overlay` into `base`; nested tables merge key by key
fn deep_merge(base: &mut Table, overlay: &Table) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => deep_merge(existing, incoming),
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let rules = GenreRuleSet::builtin().unwrap();
        assert!(rules.categories().contains(&"Electronic"));
        assert!(rules.subgenres().contains(&"House"));
    }

    #[test]
    fn test_unknown_genre_gets_defaults() {
        let rules = GenreRuleSet::builtin().unwrap();
        assert_eq!(rules.get_rules(Some("Polka"), Some("Speed Polka")), GenreRules::default());
        assert_eq!(rules.get_rules(None, None), GenreRules::default());
    }

    #[test]
    fn test_subgenre_overrides_parent_overrides_default() {
        let rules = GenreRuleSet::builtin().unwrap();
        let house = rules.get_rules(Some("Electronic"), Some("House"));

        // From the House record
        assert_eq!(house.danceability.boost, 18.0);
        assert_eq!(house.tempo.bpm_min, 110.0);
        // Inherited from the Electronic parent
        assert_eq!(house.acousticness.boost, -20.0);
        assert_eq!(house.phrase.default_bars, 16);
        // Untouched defaults
        assert_eq!(house.cue, GenreRules::default().cue);
        assert_eq!(house.danceability.energy_weight, GenreRules::default().danceability.energy_weight);
    }

    #[test]
    fn test_category_used_when_subgenre_unknown() {
        let rules = GenreRuleSet::builtin().unwrap();
        let jazz = rules.get_rules(Some("Jazz"), Some("Unknown Jazz"));
        assert_eq!(jazz.acousticness.boost, 20.0);
    }

    #[test]
    fn test_rules_for_genre_is_case_insensitive() {
        let rules = GenreRuleSet::builtin().unwrap();
        assert_eq!(rules.rules_for_genre(Some("club rap")).danceability.boost, 25.0);
        assert_eq!(rules.rules_for_genre(Some("ROCK")).liveness.boost, 5.0);
        assert_eq!(rules.rules_for_genre(Some("  ")), GenreRules::default());
    }

    #[test]
    fn test_parent_inheritance_is_one_level() {
        let mut rules = GenreRuleSet::empty();
        rules
            .merge_catalog(
                r#"
                [categories.Root.liveness]
                boost = 40.0
                [categories.Mid]
                parent = "Root"
                [categories.Mid.danceability]
                boost = 5.0
                [subgenres.Leaf]
                parent = "Mid"
                [subgenres.Leaf.acousticness]
                boost = 7.0
                "#,
                "test",
            )
            .unwrap();

        let leaf = rules.get_rules(None, Some("Leaf"));
        assert_eq!(leaf.acousticness.boost, 7.0);
        assert_eq!(leaf.danceability.boost, 5.0);
        assert_eq!(leaf.liveness.boost, 0.0);
    }

    #[test]
    fn test_invalid_catalog_rejected() {
        let mut rules = GenreRuleSet::empty();
        let result = rules.merge_catalog(
            "[categories.Broken.tempo]\nbpm_min = 200.0\nbpm_max = 100.0\n",
            "test",
        );
        assert!(result.is_err());
        assert_eq!(rules.get_rules(Some("Broken"), None), rules.get_rules(None, None));
    }

    #[test]
    fn test_rejected_catalog_keeps_existing_rules() {
        let mut rules = GenreRuleSet::builtin().unwrap();
        let before = rules.get_rules(Some("Electronic"), None);
        assert_eq!(before.tempo.bpm_min, 100.0);

        let result = rules.merge_catalog("[categories.Electronic.tempo]\nbpm_min = 300.0\n", "test");
        assert!(result.is_err());
        assert_eq!(rules.get_rules(Some("Electronic"), None), before);
    }
}
