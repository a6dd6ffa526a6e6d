//! Persisted user configuration for the analyzer.
//!
//! Global settings, per-genre overrides, release-era rules and an audit
//! history of every mutation. Every mutation is persisted immediately through
//! a [`ConfigPersistence`] implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::persistence::{ConfigBackup, ConfigPersistence, MemoryPersistence};
use crate::error::ConfigError;

/// Partial settings record, keyed by the camelCase setting name
pub type SettingsOverride = Map<String, Value>;

/// Global tuning for the estimators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzerSettings {
    pub energy_scaling_factor: f64,
    pub energy_max_cap: f64,
    pub silence_threshold_db: f64,
    pub onset_sensitivity: f64,
    pub hop_ms: f64,
    pub min_peak_distance_ms: f64,
    pub double_time_raw_min: Option<f64>,
    pub bpm_candidate_prune_threshold: Option<f64>,
    pub chroma_smooth_window: Option<usize>,
    pub relative_minor_bias: f64,
    pub common_key_preference_boost: f64,
    pub capo_transposition_check: bool,
    pub target_loudness: f64,
    pub acousticness_boost: f64,
    pub danceability_boost: f64,
    pub instrumentalness_boost: f64,
    pub liveness_boost: f64,
    pub transition_softener: f64,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            energy_scaling_factor: 1.0,
            energy_max_cap: 100.0,
            silence_threshold_db: -40.0,
            onset_sensitivity: 0.3,
            hop_ms: 100.0,
            min_peak_distance_ms: 200.0,
            double_time_raw_min: Some(150.0),
            bpm_candidate_prune_threshold: Some(0.6),
            chroma_smooth_window: None,
            relative_minor_bias: 0.0,
            common_key_preference_boost: 0.1,
            capo_transposition_check: true,
            target_loudness: 70.0,
            acousticness_boost: 0.0,
            danceability_boost: 0.0,
            instrumentalness_boost: 0.0,
            liveness_boost: 0.0,
            transition_softener: 4.0,
        }
    }
}

impl AnalyzerSettings {
    /// Layer a partial record on top of these settings
    ///
    /// Keys that are not settings are rejected, as are values of the wrong type.
    pub fn with_override(&self, overrides: &SettingsOverride) -> Result<Self, ConfigError> {
        let mut fields = match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => fields,
            Ok(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "settings".to_string(),
                    value: other.to_string(),
                })
            }
            Err(e) => {
                return Err(ConfigError::InvalidValue {
                    key: "settings".to_string(),
                    value: e.to_string(),
                })
            }
        };

        for (key, value) in overrides {
            if !fields.contains_key(key) {
                return Err(ConfigError::UnknownSetting { key: key.clone() });
            }
            fields.insert(key.clone(), value.clone());
        }

        let merged: Self = serde_json::from_value(Value::Object(fields)).map_err(|e| {
            ConfigError::InvalidValue {
                key: overrides.keys().cloned().collect::<Vec<_>>().join(","),
                value: e.to_string(),
            }
        })?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, value: f64| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        if self.energy_scaling_factor < 0.0 {
            return Err(invalid("energyScalingFactor", self.energy_scaling_factor));
        }
        if !(0.0..=100.0).contains(&self.energy_max_cap) {
            return Err(invalid("energyMaxCap", self.energy_max_cap));
        }
        if self.hop_ms <= 0.0 {
            return Err(invalid("hopMs", self.hop_ms));
        }
        if self.min_peak_distance_ms < 0.0 {
            return Err(invalid("minPeakDistanceMs", self.min_peak_distance_ms));
        }
        if self.silence_threshold_db > 0.0 {
            return Err(invalid("silenceThresholdDb", self.silence_threshold_db));
        }
        if self.chroma_smooth_window == Some(0) {
            return Err(invalid("chromaSmoothWindow", 0.0));
        }
        Ok(())
    }
}

/// Settings applied to tracks released within a year range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EraRule {
    pub start_year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_year: Option<i32>,
    #[serde(default)]
    pub settings: SettingsOverride,
}

impl EraRule {
    pub fn contains(&self, year: i32) -> bool {
        year >= self.start_year && self.end_year.map_or(true, |end| year <= end)
    }
}

/// One line of the mutation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub time: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsOverride>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigMeta {
    #[serde(default)]
    pub history: Vec<AuditEntry>,
}

/// Everything the store persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredConfig {
    #[serde(default)]
    pub global: AnalyzerSettings,
    #[serde(default)]
    pub overrides: BTreeMap<String, SettingsOverride>,
    #[serde(default)]
    pub era_overrides: Vec<EraRule>,
    #[serde(default)]
    pub meta: ConfigMeta,
}

impl Default for StoredConfig {
    fn default() -> Self {
        Self {
            global: AnalyzerSettings::default(),
            overrides: default_overrides(),
            era_overrides: Vec::new(),
            meta: ConfigMeta::default(),
        }
    }
}

fn default_overrides() -> BTreeMap<String, SettingsOverride> {
    let entry = |scaling: f64, danceability: f64| {
        let mut settings = SettingsOverride::new();
        settings.insert("energyScalingFactor".into(), scaling.into());
        settings.insert("energyMaxCap".into(), 100.0.into());
        settings.insert("acousticnessBoost".into(), (-30.0).into());
        settings.insert("danceabilityBoost".into(), danceability.into());
        settings.insert("doubleTimeRawMin".into(), 170.0.into());
        settings
    };

    let mut overrides = BTreeMap::new();
    overrides.insert("Club Rap".to_string(), entry(1.05, 25.0));
    overrides.insert("Pop Rap".to_string(), entry(1.0, 18.0));
    overrides
}

/// Shape accepted by [`ConfigStore::import_config`]; absent sections are kept
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportPayload {
    global: Option<SettingsOverride>,
    overrides: Option<BTreeMap<String, SettingsOverride>>,
    era_overrides: Option<Vec<EraRule>>,
}

/// Shared configuration store
///
/// Cheap to share behind an `Arc`; reads take a read lock and clone.
pub struct ConfigStore {
    state: RwLock<StoredConfig>,
    persistence: Arc<dyn ConfigPersistence>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore").field("state", &self.snapshot()).finish()
    }
}

impl ConfigStore {
    /// Open a store, loading any persisted state
    ///
    /// A failed or empty load starts from the factory defaults.
    pub fn open(persistence: Arc<dyn ConfigPersistence>) -> Self {
        let state = match persistence.load() {
            Ok(Some(stored)) => {
                tracing::debug!(
                    overrides = stored.overrides.len(),
                    eras = stored.era_overrides.len(),
                    "Loaded analyzer config"
                );
                stored
            }
            Ok(None) => StoredConfig::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load analyzer config, using defaults");
                StoredConfig::default()
            }
        };

        Self {
            state: RwLock::new(state),
            persistence,
        }
    }

    /// Store backed by memory only
    pub fn in_memory() -> Self {
        Self::open(Arc::new(MemoryPersistence::new()))
    }

    pub fn snapshot(&self) -> StoredConfig {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn global(&self) -> AnalyzerSettings {
        self.state.read().unwrap_or_else(PoisonError::into_inner).global.clone()
    }

    pub fn history(&self) -> Vec<AuditEntry> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .meta
            .history
            .clone()
    }

    /// Effective settings for a genre and release year
    ///
    /// Order: global, exact override, every override whose key is a
    /// case-insensitive substring of the genre, then matching era rules.
    /// Entries that fail to apply are skipped with a warning.
    pub fn get_config_for_genre(&self, genre: Option<&str>, year: Option<i32>) -> AnalyzerSettings {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut settings = state.global.clone();

        let mut apply = |label: &str, overrides: &SettingsOverride| match settings.with_override(overrides) {
            Ok(merged) => settings = merged,
            Err(e) => tracing::warn!(entry = label, error = %e, "Skipping invalid settings override"),
        };

        if let Some(genre) = genre.filter(|g| !g.is_empty()) {
            if let Some(exact) = state.overrides.get(genre) {
                apply(genre, exact);
            }

            let lowered = genre.to_lowercase();
            for (key, overrides) in &state.overrides {
                let key_lower = key.to_lowercase();
                if !key.is_empty() && key_lower != lowered && lowered.contains(&key_lower) {
                    apply(key, overrides);
                }
            }
        }

        if let Some(year) = year {
            for rule in state.era_overrides.iter().filter(|rule| rule.contains(year)) {
                apply("era", &rule.settings);
            }
        }

        settings
    }

    /// Merge settings into the override for `key`
    pub fn set_override(&self, key: &str, settings: SettingsOverride) -> Result<(), ConfigError> {
        self.mutate("setOverride", Some(key), Some(&settings), |state| {
            let entry = state.overrides.entry(key.to_string()).or_default();
            let mut merged = entry.clone();
            merged.extend(settings.clone());
            state.global.with_override(&merged)?;
            *entry = merged;
            Ok(())
        })
    }

    /// Remove the override for `key`; returns whether one existed
    pub fn delete_override(&self, key: &str) -> Result<bool, ConfigError> {
        let exists = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .overrides
            .contains_key(key);
        if !exists {
            return Ok(false);
        }

        self.mutate("deleteOverride", Some(key), None, |state| {
            Ok(state.overrides.remove(key).is_some())
        })
    }

    pub fn set_global(&self, settings: SettingsOverride) -> Result<(), ConfigError> {
        self.mutate("setGlobal", None, Some(&settings), |state| {
            state.global = state.global.with_override(&settings)?;
            Ok(())
        })
    }

    pub fn add_era_rule(&self, rule: EraRule) -> Result<(), ConfigError> {
        let key = match rule.end_year {
            Some(end) => format!("{}-{}", rule.start_year, end),
            None => format!("{}-", rule.start_year),
        };
        self.mutate("addEraRule", Some(&key), Some(&rule.settings), |state| {
            state.global.with_override(&rule.settings)?;
            state.era_overrides.push(rule.clone());
            Ok(())
        })
    }

    /// Drop all genre overrides and era rules
    pub fn reset_all_overrides(&self) -> Result<(), ConfigError> {
        self.mutate("resetAllOverrides", None, None, |state| {
            state.overrides.clear();
            state.era_overrides.clear();
            Ok(())
        })
    }

    /// Return to default global settings with no overrides
    ///
    /// With `backup`, the current state is saved as a backup first. A failed
    /// backup is logged and does not stop the reset.
    pub fn reset_to_factory_defaults(&self, backup: bool) -> Result<(), ConfigError> {
        if backup {
            let snapshot = ConfigBackup::now(self.snapshot());
            if let Err(e) = self.persistence.save_backup(&snapshot) {
                tracing::error!(error = %e, "Failed to write config backup");
            }
        }

        self.mutate("factoryReset", None, None, |state| {
            state.global = AnalyzerSettings::default();
            state.overrides.clear();
            state.era_overrides.clear();
            Ok(())
        })
    }

    /// Restore global settings (and optionally overrides) from the newest backup
    ///
    /// Returns `Ok(false)` when no backup exists.
    pub fn restore_last_backup(&self, restore_overrides: bool) -> Result<bool, ConfigError> {
        let Some(backup) = self.persistence.load_latest_backup()? else {
            return Ok(false);
        };

        tracing::info!(timestamp = %backup.timestamp, restore_overrides, "Restoring config backup");
        self.mutate("restoreLastBackup", None, None, |state| {
            state.global = backup.config.global.clone();
            if restore_overrides {
                state.overrides = backup.config.overrides.clone();
            }
            Ok(())
        })?;
        Ok(true)
    }

    /// Pretty-printed JSON of the whole store
    pub fn export_config(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(&self.snapshot()).map_err(|e| ConfigError::InvalidValue {
            key: "export".to_string(),
            value: e.to_string(),
        })
    }

    /// Import a previously exported document
    ///
    /// `global` is merged over the current settings, `overrides` and
    /// `eraOverrides` replace the current ones when present. Nothing changes
    /// if any part fails to validate.
    pub fn import_config(&self, json: &str) -> Result<(), ConfigError> {
        let payload: ImportPayload =
            serde_json::from_str(json).map_err(|e| ConfigError::ParseFailed {
                path: "<import>".to_string(),
                reason: e.to_string(),
            })?;

        self.mutate("importConfig", None, None, |state| {
            let global = match &payload.global {
                Some(global) => state.global.with_override(global)?,
                None => state.global.clone(),
            };
            if let Some(overrides) = &payload.overrides {
                for settings in overrides.values() {
                    global.with_override(settings)?;
                }
            }
            if let Some(eras) = &payload.era_overrides {
                for rule in eras {
                    global.with_override(&rule.settings)?;
                }
            }

            state.global = global;
            if let Some(overrides) = payload.overrides.clone() {
                state.overrides = overrides;
            }
            if let Some(eras) = payload.era_overrides.clone() {
                state.era_overrides = eras;
            }
            Ok(())
        })
    }

    /// Apply a mutation, record it and persist
    ///
    /// A mutation that fails leaves the state untouched. A persistence
    /// failure is returned but the in-memory change stays.
    fn mutate<T>(
        &self,
        action: &str,
        key: Option<&str>,
        settings: Option<&SettingsOverride>,
        apply: impl FnOnce(&mut StoredConfig) -> Result<T, ConfigError>,
    ) -> Result<T, ConfigError> {
        let snapshot = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let mut draft = state.clone();
            let outcome = apply(&mut draft)?;

            draft.meta.history.push(AuditEntry {
                time: chrono::Utc::now().to_rfc3339(),
                action: action.to_string(),
                key: key.map(str::to_string),
                settings: settings.cloned(),
            });
            *state = draft;
            (state.clone(), outcome)
        };

        let (stored, outcome) = snapshot;
        tracing::debug!(action, key, "Analyzer config updated");

        if let Err(e) = self.persistence.save(&stored) {
            tracing::error!(action, error = %e, "Failed to persist analyzer config");
            return Err(e);
        }
        Ok(outcome)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
