//! TOML configuration

use crate::audio::AudioConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Window size must be a power of two of at least 4, got {0}")]
    InvalidWindowSize(usize),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Band {f0}-{f1} Hz must satisfy 0 < f0 < f1 <= {nyquist} Hz")]
    InvalidBand { f0: f64, f1: f64, nyquist: f64 },

    #[error("Resolution must be at least 2 bins, got {0}")]
    InvalidResolution(usize),

    #[error("At most {max} folds are supported, got {0}", max = AudioConfig::MAX_FOLDS)]
    TooManyFolds(usize),

    #[error("Ingest capacity must be non-zero")]
    InvalidCapacity,

    #[error("Invalid display settings: {0}")]
    InvalidDisplay(String),
}

/// Settings for whoever draws the frames
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    /// Analysis cycles per second
    pub refresh_hz: f64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 480,
            refresh_hz: 30.0,
        }
    }
}

impl DisplayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDisplay(format!(
                "{}x{} has no pixels",
                self.width, self.height
            )));
        }
        if !(self.refresh_hz.is_finite() && self.refresh_hz > 0.0) {
            return Err(ConfigError::InvalidDisplay(format!(
                "refresh rate {} Hz",
                self.refresh_hz
            )));
        }
        Ok(())
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub display: DisplayConfig,
}

impl Config {
    /// Parse and validate a TOML document. Missing fields take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.audio.validate()?;
        self.display.validate()
    }
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Config::from_toml_str(&text)
}
