use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::engine::Mode;
use crate::engine::trigger::TriggerDetector;

/// Startup configuration, read from `loopdeck.toml` when present. Every
/// field has a default so an empty or missing file just means defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub block_size: usize,
    pub mode: StartMode,
    pub trigger_threshold: f32,
    pub trigger_enabled: bool,
    pub level: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StartMode {
    Looper,
    Player,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: 512,
            mode: StartMode::Looper,
            trigger_threshold: TriggerDetector::DEFAULT_THRESHOLD,
            trigger_enabled: false,
            level: 1.0,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load(path).unwrap_or_default()
    }

    pub fn engine_mode(&self) -> Mode {
        match self.mode {
            StartMode::Looper => Mode::Looper,
            StartMode::Player => Mode::Player,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table_is_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.engine_mode(), Mode::Looper);
    }

    #[test]
    fn test_overrides_parse() {
        let config: Config = toml::from_str(
            r#"
            block_size = 256
            mode = "player"
            trigger_threshold = 0.2
            trigger_enabled = true
            level = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(config.block_size, 256);
        assert_eq!(config.engine_mode(), Mode::Player);
        assert_eq!(config.trigger_threshold, 0.2);
        assert!(config.trigger_enabled);
        assert_eq!(config.level, 0.8);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let missing = std::env::temp_dir().join("loopdeck_no_config.toml");
        let _ = std::fs::remove_file(&missing);
        assert_eq!(Config::load_or_default(&missing), Config::default());
    }
}
