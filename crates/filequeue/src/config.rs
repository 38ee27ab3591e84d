//! Queue configuration loaded from TOML or JSON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::gate::DEFAULT_LIMIT;
use crate::registry::GateOptions;

/// Settings for a [`FileQueue`](crate::queue::FileQueue).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileQueueConfig {
    /// Maximum number of filesystem operations in flight at once.
    pub max_open_files: usize,
    /// Use an independent gate instead of the process-wide shared one.
    pub private_gate: bool,
    /// Base directory for relative paths on the host filesystem.
    pub root: PathBuf,
}

impl Default for FileQueueConfig {
    fn default() -> Self {
        Self {
            max_open_files: DEFAULT_LIMIT,
            private_gate: false,
            root: PathBuf::from("."),
        }
    }
}

impl FileQueueConfig {
    /// Loads a `.toml` or `.json` file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: FileQueueConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: FileQueueConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Gate options matching this config.
    pub fn gate_options(&self) -> GateOptions {
        GateOptions {
            limit: Some(self.max_open_files),
            private: self.private_gate,
        }
    }
}
