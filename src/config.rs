use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    coordinator::CoordinatorConfig,
    error::{ConfigError, Result},
    rules::{ConfigStore, GenreRuleSet, JsonFilePersistence},
};

/// Application configuration for the dj-analyzer binaries
///
/// Analyzer settings themselves live in the [`ConfigStore`]; this file only
/// says how the process is wired: timing, where the store is persisted and
/// which extra genre catalog to merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator timing
    pub coordinator: CoordinatorSection,

    /// Analyzer settings persistence
    pub store: StoreSection,

    /// Genre rule catalog
    pub rules: RulesSection,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue {
            key: "config".to_string(),
            value: e.to_string(),
        })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.coordinator.validate()?;
        Ok(())
    }

    /// Open the analyzer settings store described by `[store]`
    ///
    /// Without a path the store lives in memory only.
    pub fn open_store(&self) -> ConfigStore {
        match &self.store.path {
            Some(path) => ConfigStore::open(Arc::new(JsonFilePersistence::new(path))),
            None => ConfigStore::in_memory(),
        }
    }

    /// Built-in genre rules merged with the `[rules]` catalog, if any
    pub fn load_rules(&self) -> Result<GenreRuleSet> {
        let rules = match &self.rules.catalog {
            Some(path) => GenreRuleSet::with_catalog_file(path)?,
            None => GenreRuleSet::builtin()?,
        };
        Ok(rules)
    }
}

/// Coordinator timing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSection {
    /// Seconds allowed for decoding one track
    pub load_timeout_secs: u64,

    /// Pause between deep passes (milliseconds)
    pub deep_task_delay_ms: u64,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            load_timeout_secs: 20,
            deep_task_delay_ms: 100,
        }
    }
}

impl CoordinatorSection {
    fn validate(&self) -> Result<()> {
        if self.load_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "coordinator.load_timeout_secs".to_string(),
                value: self.load_timeout_secs.to_string(),
            }
            .into());
        }

        Ok(())
    }

    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            load_timeout: Duration::from_secs(self.load_timeout_secs),
            deep_task_delay: Duration::from_millis(self.deep_task_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// JSON file holding global settings, overrides and history
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesSection {
    /// Extra TOML catalog merged over the built-in genre rules
    pub catalog: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.coordinator.to_coordinator_config(),
            CoordinatorConfig::default()
        );
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test_config.toml");

        let mut original = Config::default();
        original.coordinator.deep_task_delay_ms = 250;
        original.store.path = Some(dir.path().join("analyzer.json"));

        original.save_to_file(&file_path).unwrap();
        let loaded = Config::from_file(&file_path).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("partial.toml");
        std::fs::write(&file_path, "[coordinator]\nload_timeout_secs = 5\n").unwrap();

        let config = Config::from_file(&file_path).unwrap();
        assert_eq!(config.coordinator.load_timeout_secs, 5);
        assert_eq!(config.coordinator.deep_task_delay_ms, 100);
        assert_eq!(config.store.path, None);
    }

    #[test]
    fn test_invalid_timeout() {
        let mut config = Config::default();
        config.coordinator.load_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let dir = tempdir().unwrap();
        assert!(Config::from_file(dir.path().join("absent.toml")).is_err());

        let file_path = dir.path().join("broken.toml");
        std::fs::write(&file_path, "[coordinator\n").unwrap();
        assert!(Config::from_file(&file_path).is_err());
    }

    #[test]
    fn test_store_is_persisted_at_configured_path() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.store.path = Some(dir.path().join("store.json"));

        let store = config.open_store();
        let mut overrides = serde_json::Map::new();
        overrides.insert("energyScalingFactor".to_string(), serde_json::json!(1.2));
        store.set_override("Techno", overrides).unwrap();

        assert!(dir.path().join("store.json").exists());
        let reopened = config.open_store();
        assert_eq!(reopened.get_config_for_genre(Some("Techno"), None).energy_scaling_factor, 1.2);
    }

    #[test]
    fn test_rules_catalog_is_merged() {
        let dir = tempdir().unwrap();
        let catalog = dir.path().join("extra.toml");
        std::fs::write(
            &catalog,
            "[subgenres.\"Liquid Funk\"]\nparent = \"Electronic\"\n[subgenres.\"Liquid Funk\".tempo]\nbpm_min = 160.0\nbpm_max = 180.0\n",
        )
        .unwrap();

        let mut config = Config::default();
        config.rules.catalog = Some(catalog);
        let rules = config.load_rules().unwrap();
        let liquid = rules.rules_for_genre(Some("Liquid Funk"));
        assert_eq!(liquid.tempo.bpm_min, 160.0);
        assert_eq!(liquid.tempo.bpm_max, 180.0);
    }
}
