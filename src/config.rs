//! Engine configuration
//!
//! Loaded from a YAML file; every field has a default so an empty file (or
//! no file) yields a working configuration.

use crate::storage::BackendKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub extraction: ExtractionSettings,
    pub retry: RetrySettings,
    pub planning: PlanningSettings,
}

impl EngineConfig {
    /// Read and parse a YAML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Database file; defaults to the platform data directory
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sqlite,
            path: None,
        }
    }
}

impl StorageConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_db_path)
    }
}

/// Default database path (~/.local/share/novelgraph/novelgraph.db)
pub fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("novelgraph").join("novelgraph.db")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Chapters shorter than this (in characters) are not extracted
    pub min_content_chars: usize,
    /// Importance used when the model gives none or an unrecognized value
    pub default_importance: f64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            min_content_chars: 100,
            default_importance: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total failures tolerated before a record becomes permanent
    pub max_attempts: u32,
    /// Flat delay before each automatic retry
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Per-section token allowances for the planning digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestBudget {
    pub outline: usize,
    pub blueprint: usize,
    pub core_narrative: usize,
    pub recent_chapters: usize,
    pub events: usize,
    pub foreshadowing: usize,
    pub character_profiles: usize,
}

impl Default for DigestBudget {
    fn default() -> Self {
        Self {
            outline: 600,
            blueprint: 400,
            core_narrative: 300,
            recent_chapters: 800,
            events: 400,
            foreshadowing: 300,
            character_profiles: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningSettings {
    pub max_steps: usize,
    /// Chapters at or below this number are "early"
    pub early_chapter_threshold: u32,
    pub early_max_steps: usize,
    /// Nearest chapters included as full text
    pub recent_full_text: usize,
    /// Trailing chapters included as summaries
    pub recent_summary_window: usize,
    pub event_limit: usize,
    pub foreshadow_limit: usize,
    pub plotline_limit: usize,
    pub arc_limit: usize,
    pub rhythm_window: usize,
    pub perspective_window: usize,
    pub digest: DigestBudget,
}

impl Default for PlanningSettings {
    fn default() -> Self {
        Self {
            max_steps: 6,
            early_chapter_threshold: 3,
            early_max_steps: 3,
            recent_full_text: 2,
            recent_summary_window: 8,
            event_limit: 10,
            foreshadow_limit: 8,
            plotline_limit: 8,
            arc_limit: 5,
            rhythm_window: 10,
            perspective_window: 6,
            digest: DigestBudget::default(),
        }
    }
}
