//! Configuration for the Sift engine and its hosts.
//!
//! Engine tuning lives in [`EngineConfig`], an explicit value passed into
//! the builder — never ambient global state. [`Config`] is the host-facing
//! TOML file (engine section plus general host settings), stored in a
//! platform-appropriate location.
//!
//! ## Example Configuration File (sift.toml)
//!
//! ```toml
//! [general]
//! root = "/home/me/.cache/sift"
//! log_level = "info"
//!
//! [engine]
//! max_file_size = 8388608
//! stamp_flush_queue = 1024
//! verify_snapshot_cache = false
//! ```

use crate::error::{Result, SiftError};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Files larger than this are treated as having no indexable content.
    pub max_file_size: u64,

    /// Capacity of the stamp store's dirty queue; filling it forces a
    /// batched write of the oldest entries.
    pub stamp_flush_queue: usize,

    /// Indexer faults tolerated per index before a rebuild is scheduled.
    pub max_indexer_failures: u32,

    /// Recompute-and-compare every snapshot cache hit. A divergence is a
    /// bug in a registered indexer and panics loudly.
    pub verify_snapshot_cache: bool,

    /// Serve best-effort query results while a rebuild is pending instead
    /// of failing with `RebuildPending`.
    pub allow_stale_reads: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_file_size: 8 * 1024 * 1024,
            stamp_flush_queue: 1024,
            max_indexer_failures: 16,
            verify_snapshot_cache: cfg!(debug_assertions),
            allow_stale_reads: false,
        }
    }
}

/// General host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Engine root directory (None = platform default).
    pub root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            root: None,
            log_level: "info".to_string(),
        }
    }
}

/// Host-facing configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,

    /// Engine tuning.
    pub engine: EngineConfig,
}

impl Config {
    /// Platform directories for config and data.
    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("io", "sift", "sift")
    }

    /// Default config file path.
    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("sift.toml"))
    }

    /// Resolve the engine root directory.
    pub fn root_dir(&self) -> PathBuf {
        if let Some(root) = &self.general.root {
            return root.clone();
        }
        Self::project_dirs()
            .map(|dirs| dirs.data_dir().join("index"))
            .unwrap_or_else(|| PathBuf::from(".sift"))
    }

    /// Load from the default location, falling back to defaults if the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Config::default()),
        }
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = toml::from_str(&text)
            .map_err(|e| SiftError::serialization(format!("config parse error: {}", e)))?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Save to an explicit path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)
            .map_err(|e| SiftError::serialization(format!("config encode error: {}", e)))?;
        fs::write(path, text)?;
        Ok(())
    }
}
