//! CLI configuration
//!
//! Read from `<config dir>/evstream/config.toml` unless `--config` names a
//! file. Every field is optional.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use evstream_core::transport::io::DEFAULT_CHUNK_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `tracing` filter used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Upper bound on the size of each chunk read from input
    pub read_chunk_size: usize,
    /// Print a byte and event summary to stderr when done
    pub report: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "warn".to_string(),
            read_chunk_size: DEFAULT_CHUNK_SIZE,
            report: false,
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("evstream").join("config.toml"))
    }

    /// Load `explicit` if given, otherwise the default file when it exists.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path).await;
        }
        match Self::default_path() {
            Some(path) if tokio::fs::try_exists(&path).await.unwrap_or(false) => {
                Self::from_file(&path).await
            }
            _ => Ok(Self::default()),
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.read_chunk_size = config.read_chunk_size.max(1);
        Ok(config)
    }
}
