//! Engine configuration
//!
//! Loaded from a JSON file next to the session; every field has a default so
//! partial files are accepted.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::defaults;
use crate::error::Result;

const CONFIG_FILE_NAME: &str = "flow-engine.json";

/// Settings shared by every flow of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on ports per side for nodes with numbered ports
    pub max_numbered_ports: usize,
    /// Folder receiving data files of output ports
    pub session_folder: PathBuf,
    /// Suffix of output port data files
    pub data_suffix: String,
    /// Request validation for every newly created node
    pub validate_on_create: bool,
    /// Refuse connections that close a dataflow cycle
    pub reject_cycles: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_numbered_ports: defaults::MAX_NUMBERED_PORTS,
            session_folder: default_session_folder(),
            data_suffix: defaults::DATA_SUFFIX.to_string(),
            validate_on_create: true,
            reject_cycles: true,
        }
    }
}

fn default_session_folder() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(defaults::SESSION_DIR_NAME)
}

impl EngineConfig {
    /// Load configuration from `dir`, falling back to defaults when absent
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            log::debug!("No configuration at {:?}, using defaults", config_path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save configuration to `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;

        let config_path = dir.join(CONFIG_FILE_NAME);
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, contents)?;

        log::info!("Configuration saved to {:?}", config_path);
        Ok(())
    }
}
