//! Storage port for the config store, with JSON-file and in-memory backends.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::store::StoredConfig;
use crate::error::ConfigError;

/// Snapshot written before a factory reset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigBackup {
    pub timestamp: String,
    pub config: StoredConfig,
}

impl ConfigBackup {
    pub fn now(config: StoredConfig) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            config,
        }
    }
}

/// Where the config store keeps its state
pub trait ConfigPersistence: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet
    fn load(&self) -> Result<Option<StoredConfig>, ConfigError>;

    fn save(&self, config: &StoredConfig) -> Result<(), ConfigError>;

    fn save_backup(&self, _backup: &ConfigBackup) -> Result<(), ConfigError> {
        Ok(())
    }

    fn load_latest_backup(&self) -> Result<Option<ConfigBackup>, ConfigError> {
        Ok(None)
    }
}

fn persistence_error(path: &Path, e: impl std::fmt::Display) -> ConfigError {
    ConfigError::Persistence {
        reason: format!("{}: {}", path.display(), e),
    }
}

/// Pretty JSON file; backups sit next to it as `<stem>.backup-<timestamp>.json`
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_prefix(&self) -> String {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "analyzer-config".to_string());
        format!("{}.backup-", stem)
    }

    fn backup_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| persistence_error(dir, e))?;
        }
        let content = serde_json::to_string_pretty(value).map_err(|e| persistence_error(path, e))?;
        std::fs::write(path, content).map_err(|e| persistence_error(path, e))
    }
}

impl ConfigPersistence for JsonFilePersistence {
    fn load(&self) -> Result<Option<StoredConfig>, ConfigError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| persistence_error(&self.path, e))?;
        let config = serde_json::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(config))
    }

    fn save(&self, config: &StoredConfig) -> Result<(), ConfigError> {
        Self::write_json(&self.path, config)
    }

    fn save_backup(&self, backup: &ConfigBackup) -> Result<(), ConfigError> {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let path = self
            .backup_dir()
            .join(format!("{}{}.json", self.backup_prefix(), stamp));
        tracing::info!(path = %path.display(), "Writing config backup");
        Self::write_json(&path, backup)
    }

    fn load_latest_backup(&self) -> Result<Option<ConfigBackup>, ConfigError> {
        let dir = self.backup_dir();
        if !dir.exists() {
            return Ok(None);
        }

        let prefix = self.backup_prefix();
        let mut backups: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| persistence_error(&dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map_or(false, |name| name.starts_with(&prefix) && name.ends_with(".json"))
            })
            .collect();

        // Timestamps sort lexically
        backups.sort();

        for path in backups.iter().rev() {
            let parsed = std::fs::read_to_string(path)
                .ok()
                .and_then(|content| serde_json::from_str::<ConfigBackup>(&content).ok());
            match parsed {
                Some(backup) => return Ok(Some(backup)),
                None => tracing::warn!(path = %path.display(), "Skipping unreadable config backup"),
            }
        }
        Ok(None)
    }
}

/// Keeps everything in memory; used by tests and `ConfigStore::in_memory`
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    saved: Mutex<Option<StoredConfig>>,
    backups: Mutex<Vec<ConfigBackup>>,
    fail_saves: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: StoredConfig) -> Self {
        Self {
            saved: Mutex::new(Some(config)),
            ..Self::default()
        }
    }

    /// Make every following `save` fail
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Option<StoredConfig> {
        self.saved.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ConfigPersistence for MemoryPersistence {
    fn load(&self) -> Result<Option<StoredConfig>, ConfigError> {
        Ok(self.saved())
    }

    fn save(&self, config: &StoredConfig) -> Result<(), ConfigError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(ConfigError::Persistence {
                reason: "memory store is read-only".to_string(),
            });
        }
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
        Ok(())
    }

    fn save_backup(&self, backup: &ConfigBackup) -> Result<(), ConfigError> {
        self.backups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(backup.clone());
        Ok(())
    }

    fn load_latest_backup(&self) -> Result<Option<ConfigBackup>, ConfigError> {
        Ok(self
            .backups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::store::ConfigStore;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_json_file_missing_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = JsonFilePersistence::new(temp_dir.path().join("analyzer.json"));
        assert!(persistence.load().unwrap().is_none());
        assert!(persistence.load_latest_backup().unwrap().is_none());
    }

    #[test]
    fn test_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("analyzer.json");

        {
            let store = ConfigStore::open(Arc::new(JsonFilePersistence::new(&path)));
            let settings = json!({ "livenessBoost": 7 });
            store
                .set_override("Live Rock", settings.as_object().unwrap().clone())
                .unwrap();
        }

        let reopened = ConfigStore::open(Arc::new(JsonFilePersistence::new(&path)));
        assert_eq!(reopened.get_config_for_genre(Some("Live Rock"), None).liveness_boost, 7.0);
        assert_eq!(reopened.history().len(), 1);
    }

    #[test]
    fn test_file_backups_pick_latest() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = JsonFilePersistence::new(temp_dir.path().join("analyzer.json"));

        let mut first = StoredConfig::default();
        first.global.target_loudness = 60.0;
        persistence.save_backup(&ConfigBackup::now(first)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        let mut second = StoredConfig::default();
        second.global.target_loudness = 75.0;
        persistence.save_backup(&ConfigBackup::now(second)).unwrap();

        let latest = persistence.load_latest_backup().unwrap().unwrap();
        assert_eq!(latest.config.global.target_loudness, 75.0);
    }

    #[test]
    fn test_corrupt_file_is_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("analyzer.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonFilePersistence::new(&path).load().unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed { .. }));
    }
}
