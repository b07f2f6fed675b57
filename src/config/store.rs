//! Loads [`AppConfig`] from a TOML file at startup and persists edits back
//! atomically. No SQLite, no accounts, no change-notification bus — one
//! process reads this once, a calibration tool occasionally rewrites one
//! field of it.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::AppConfig;
use crate::error::{AppError, Result};
use crate::utils::atomic_write::write_atomically;

/// Reads and writes `<CONFIG_DIR>/config.toml`.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads the config file if present; falls back to defaults (and logs)
    /// if the file is absent, writing it out so a subsequent edit has
    /// something to start from.
    pub fn load(&self) -> Result<AppConfig> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => {
                let config: AppConfig = toml::from_str(&text)
                    .map_err(|e| AppError::Config(format!("{}: {e}", self.path.display())))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no config file found, writing defaults");
                let config = AppConfig::default();
                self.save(&config)?;
                Ok(config)
            }
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Serializes `config` to TOML and writes it atomically.
    pub fn save(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(config)
            .map_err(|e| AppError::Config(format!("failed to serialize config: {e}")))?;
        write_atomically(&self.path, text.as_bytes())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads `<CONFIG_DIR>/calibration.txt`, falling back to the identity
/// calibration (and logging) if the file is absent or malformed.
pub fn load_calibration(config_dir: &Path) -> crate::hid::Calibration {
    let path = config_dir.join("calibration.txt");
    match std::fs::read_to_string(&path) {
        Ok(text) => crate::hid::Calibration::parse(&text).unwrap_or_else(|| {
            warn!(path = %path.display(), "malformed calibration file, using identity");
            crate::hid::Calibration::default()
        }),
        Err(_) => crate::hid::Calibration::default(),
    }
}

/// Persists a calibration to `<CONFIG_DIR>/calibration.txt` atomically.
pub fn save_calibration(config_dir: &Path, calibration: crate::hid::Calibration) -> Result<()> {
    std::fs::create_dir_all(config_dir)?;
    write_atomically(&config_dir.join("calibration.txt"), calibration.to_text().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_writes_defaults_when_file_is_absent() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.toml"));
        let config = store.load().unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(store.path().exists());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.toml"));
        let mut config = AppConfig::default();
        config.agent.max_steps = 99;
        store.save(&config).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.agent.max_steps, 99);
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not valid toml {{{").unwrap();
        let store = ConfigStore::new(path);
        assert!(store.load().is_err());
    }

    #[test]
    fn calibration_round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let cal = crate::hid::Calibration { sx: 1.05, sy: 0.97, ox: 0.01, oy: -0.02 };
        save_calibration(dir.path(), cal).unwrap();
        let loaded = load_calibration(dir.path());
        assert_eq!(loaded, cal);
    }

    #[test]
    fn missing_calibration_file_falls_back_to_identity() {
        let dir = tempdir().unwrap();
        assert_eq!(load_calibration(dir.path()), crate::hid::Calibration::default());
    }
}
