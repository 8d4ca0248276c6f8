//! Pland configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main pland configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Persistent store configuration
    pub store: StoreConfig,

    /// Planning defaults
    pub planning: PlanningConfig,

    /// Calendar sync configuration
    pub sync: SyncConfig,
}

impl Config {
    /// Validate configuration before use.
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.planning.max_refine_attempts == 0 {
            return Err(eyre::eyre!("planning.max-refine-attempts must be at least 1"));
        }
        if self.sync.create_concurrency == 0 {
            return Err(eyre::eyre!("sync.create-concurrency must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .pland.yml
        let local_config = PathBuf::from(".pland.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/pland/pland.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("pland").join("pland.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Persistent store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store directory; defaults to ~/.local/share/pland/store
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// The directory the store lives in
    pub fn resolve_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pland")
                .join("store"),
        }
    }
}

/// Planning defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    /// Refinement attempt budget per turn
    #[serde(rename = "max-refine-attempts")]
    pub max_refine_attempts: u32,

    /// Buffer minutes assumed when the user names none
    #[serde(rename = "buffer-minutes")]
    pub buffer_minutes: u32,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            max_refine_attempts: 3,
            buffer_minutes: 0,
        }
    }
}

/// Calendar sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Concurrent remote creates per chunk
    #[serde(rename = "create-concurrency")]
    pub create_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { create_concurrency: 4 }
    }
}
