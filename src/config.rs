//! Configuration management for the backup runner.
//!
//! Loads configuration from a TOML file; every field has a default so a
//! partial file (or no file at all) still yields a usable configuration.

use crate::retention::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub repository: RepositoryConfig,

    #[serde(default)]
    pub retention: RetentionPolicy,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directories whose immediate subdirectories become backup targets.
    /// A missing root contributes nothing.
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,

    /// Per-directory exclude file looked up inside each discovered target
    #[serde(default = "default_user_exclude_filename")]
    pub user_exclude_filename: String,

    /// Machine-wide exclude file, attached only if present on disk
    #[serde(default)]
    pub global_exclude_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Backup engine executable
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Environment file supplying the repository address and credentials
    #[serde(default)]
    pub env_file: Option<PathBuf>,

    /// Cache directory handed to the engine on every invocation
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Per-backend connection count handed to the engine
    #[serde(default = "default_connections")]
    pub connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("/home")]
}

fn default_user_exclude_filename() -> String {
    ".backup-exclude".to_string()
}

fn default_binary() -> String {
    "restic".to_string()
}

fn default_connections() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            user_exclude_filename: default_user_exclude_filename(),
            global_exclude_file: None,
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            env_file: None,
            cache_dir: None,
            connections: default_connections(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            repository: RepositoryConfig::default(),
            retention: RetentionPolicy::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
