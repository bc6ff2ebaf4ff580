//! Configuration parsing for the CLI.

use readthrough_cache::{CacheConfig, FilterMode, TransformConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Failed to read data file {path}: {source}")]
    DataReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse data file {path}: {source}")]
    DataParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Data file {0} must contain a JSON array")]
    NotAnArray(PathBuf),
}

/// Configuration matching the readthrough.yml schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// JSON file holding an array of rows
    pub data: PathBuf,

    #[serde(default = "default_id_key")]
    pub id_key: String,

    /// Delay before the template answers a read
    #[serde(default)]
    pub latency_ms: u64,

    #[serde(default)]
    pub filter: FilterMode,

    #[serde(default)]
    pub transform: Option<TransformConfig>,

    #[serde(default)]
    pub cache: CacheConfig,

    // Internal: path to config file (for relative path resolution)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_id_key() -> String {
    String::from("id")
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;

        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Get the data file, resolved relative to config file
    pub fn data_path(&self) -> PathBuf {
        self.resolve_path(&self.data)
    }

    /// Read the rows of the data file
    pub fn load_rows(&self) -> Result<Vec<Value>, ConfigError> {
        let path = self.data_path();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| ConfigError::DataReadError {
                path: path.clone(),
                source,
            })?;
        let value: Value =
            serde_json::from_str(&contents).map_err(|source| ConfigError::DataParseError {
                path: path.clone(),
                source,
            })?;

        match value {
            Value::Array(rows) => Ok(rows),
            _ => Err(ConfigError::NotAnArray(path)),
        }
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(config_path) = &self.config_path {
            if let Some(parent) = config_path.parent() {
                parent.join(path)
            } else {
                path.to_path_buf()
            }
        } else {
            path.to_path_buf()
        }
    }
}
