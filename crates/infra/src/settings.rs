//! Settings file loading (`[scoring]` and `[dispatcher]` sections).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use skillgraph_core::DomainError;
use skillgraph_scoring::{ConfigError, ScoringConfig, ScoringEngine};

use crate::jobs::DispatcherConfig;

/// Environment variable naming the settings file.
pub const CONFIG_ENV: &str = "SKILLGRAPH_CONFIG";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid [scoring] settings: {0}")]
    Scoring(#[from] ConfigError),

    #[error("invalid [dispatcher] settings: {0}")]
    Dispatcher(DomainError),
}

/// Process settings. Every field is defaulted, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub scoring: ScoringConfig,
    pub dispatcher: DispatcherConfig,
}

impl Settings {
    pub fn from_toml_str(contents: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml_str(&contents)?;
        info!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Load the file named by `SKILLGRAPH_CONFIG`, or defaults when it is unset.
    pub fn from_env() -> Result<Self, SettingsError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::load(path),
            _ => {
                warn!("{CONFIG_ENV} not set, using default settings");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.scoring.validate()?;
        self.dispatcher.validate().map_err(SettingsError::Dispatcher)
    }

    pub fn scoring_engine(&self) -> Result<ScoringEngine, ConfigError> {
        ScoringEngine::new(self.scoring.clone())
    }
}
