use crate::error::Result;
use crate::{io, paths};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// PacerConfig
// ---------------------------------------------------------------------------

/// Tunables for stuck detection and history retention, stored as YAML at
/// `.pacer/config.yaml`. Loading is total: a missing or unreadable file
/// yields the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacerConfig {
    /// Minutes without recorded progress before the project counts as stuck.
    #[serde(default = "default_stuck_after")]
    pub stuck_after_minutes: u32,
    /// Failed fix attempts on one error before it counts as stuck.
    #[serde(default = "default_max_fix_attempts")]
    pub max_fix_attempts: u32,
    /// Phase-history entries retained at transition time.
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,
}

fn default_stuck_after() -> u32 {
    120
}

fn default_max_fix_attempts() -> u32 {
    3
}

fn default_history_retention() -> usize {
    200
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            stuck_after_minutes: default_stuck_after(),
            max_fix_attempts: default_max_fix_attempts(),
            history_retention: default_history_retention(),
        }
    }
}

impl PacerConfig {
    pub fn load(root: &Path) -> Self {
        let path = paths::config_path(root);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_yaml::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "malformed config, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        io::atomic_write(&paths::config_path(root), data.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_missing_returns_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(PacerConfig::load(dir.path()), PacerConfig::default());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let config = PacerConfig {
            stuck_after_minutes: 45,
            max_fix_attempts: 5,
            history_retention: 50,
        };
        config.save(dir.path()).unwrap();
        assert_eq!(PacerConfig::load(dir.path()), config);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = crate::paths::config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stuck_after_minutes: 30\n").unwrap();

        let config = PacerConfig::load(dir.path());
        assert_eq!(config.stuck_after_minutes, 30);
        assert_eq!(config.max_fix_attempts, default_max_fix_attempts());
        assert_eq!(config.history_retention, default_history_retention());
    }

    #[test]
    fn malformed_yaml_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = crate::paths::config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, ": not yaml [").unwrap();
        assert_eq!(PacerConfig::load(dir.path()), PacerConfig::default());
    }
}
