use crate::core::acquire::{DEFAULT_USER_AGENT, DEFAULT_WORKERS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("No asset root configured; pass --root or set `root` in the config file")]
    MissingRoot,
}

/// Run settings. Every field may be set in a TOML file; command line flags
/// override the file.
///
/// ```toml
/// root = "/data/collections"
/// workers = 12
/// user_agent = "curatrs/0.1"
/// merge_log = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurateConfig {
    pub root: Option<PathBuf>,
    pub workers: usize,
    pub user_agent: String,
    /// Append merged groups to `<root>/.merges.jsonl`.
    pub merge_log: bool,
}

impl Default for CurateConfig {
    fn default() -> Self {
        Self {
            root: None,
            workers: DEFAULT_WORKERS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            merge_log: true,
        }
    }
}

impl CurateConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Load `path` if given, otherwise start from defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn asset_root(&self) -> Result<&Path, ConfigError> {
        self.root.as_deref().ok_or(ConfigError::MissingRoot)
    }
}
