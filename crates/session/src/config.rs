//! Engine configuration loaded from JSON.

use std::path::{Path, PathBuf};

use parley_duplex::DuplexConfig;
use parley_speculative::SpeculationConfig;
use parley_truncation::TruncationConfig;
use parley_turn::TurnConfig;
use parley_wire::{BatchConfig, FeatureSet, DEFAULT_REORDER_CAPACITY};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Settings for every component of a session.
///
/// Missing fields fall back to their defaults, so a config file only needs
/// the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub turn: TurnConfig,
    pub speculation: SpeculationConfig,
    pub duplex: DuplexConfig,
    pub truncation: TruncationConfig,
    pub batch: BatchConfig,
    pub reorder_capacity: usize,
    /// Features this server offers in the handshake.
    pub server_features: FeatureSet,
    /// Capacity of the per-session channels.
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            turn: TurnConfig::default(),
            speculation: SpeculationConfig::default(),
            duplex: DuplexConfig::default(),
            truncation: TruncationConfig::default(),
            batch: BatchConfig::default(),
            reorder_capacity: DEFAULT_REORDER_CAPACITY,
            server_features: FeatureSet::all(),
            channel_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.turn.validate().map_err(|e| e.to_string())?;

        let threshold = self.speculation.divergence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(format!(
                "speculation.divergence_threshold must be within 0..=1, got {threshold}"
            ));
        }
        if self.speculation.max_tokens == 0 {
            return Err("speculation.max_tokens must be positive".to_string());
        }

        let confidence = self.duplex.barge_in_min_confidence;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(format!(
                "duplex.barge_in_min_confidence must be within 0..=1, got {confidence}"
            ));
        }
        if self.duplex.chars_per_second <= 0.0 || self.truncation.chars_per_second <= 0.0 {
            return Err("chars_per_second must be positive".to_string());
        }

        if self.batch.window_ms == 0 || self.batch.max_messages == 0 {
            return Err("batch.window_ms and batch.max_messages must be positive".to_string());
        }
        if self.reorder_capacity == 0 {
            return Err("reorder_capacity must be positive".to_string());
        }
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be positive".to_string());
        }
        Ok(())
    }
}

/// Error loading an engine config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Validation error in {path}: {message}")]
    Validation { path: PathBuf, message: String },
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: EngineConfig = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;

    config.validate().map_err(|message| ConfigError::Validation {
        path: path.to_path_buf(),
        message,
    })?;

    info!(path = %path.display(), "Loaded engine config");
    Ok(config)
}

/// Load the user config if one exists, defaults otherwise.
pub fn load_default_config() -> Result<EngineConfig, ConfigError> {
    match default_config_path() {
        Some(path) if path.exists() => load_config(&path),
        Some(path) => {
            debug!(path = %path.display(), "No engine config file, using defaults");
            Ok(EngineConfig::default())
        }
        None => Ok(EngineConfig::default()),
    }
}

/// Platform config location:
/// - macOS: ~/Library/Application Support/parley/engine.json
/// - Linux: ~/.config/parley/engine.json
/// - Windows: %APPDATA%/parley/engine.json
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join("parley").join("engine.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"duplex": {"echo_tail_ms": 300}}"#).unwrap();
        assert_eq!(config.duplex.echo_tail_ms, 300);
        assert_eq!(config.duplex.barge_in_min_duration_ms, 150);
        assert_eq!(config.batch.window_ms, 50);
        assert_eq!(config.reorder_capacity, 50);
    }

    #[test]
    fn test_bad_threshold_rejected() {
        let mut config = EngineConfig::default();
        config.speculation.divergence_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_path_location() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("parley/engine.json"));
        }
    }
}
