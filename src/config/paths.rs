use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Path configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Safetensors file holding the clean training patches
    pub patches_file: String,
    pub checkpoint_dir: String,
    /// Parent of the per-variant monitoring directories
    pub log_dir: String,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            patches_file: "data/patches.safetensors".to_string(),
            checkpoint_dir: "models/trained".to_string(),
            log_dir: "log".to_string(),
        }
    }
}

impl PathConfig {
    pub fn patches_file(&self) -> PathBuf {
        PathBuf::from(&self.patches_file)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        PathBuf::from(&self.checkpoint_dir)
    }

    /// Monitoring directory of one run, e.g. `log/mmd_gan`
    pub fn run_log_dir(&self, run_name: &str) -> PathBuf {
        PathBuf::from(&self.log_dir).join(run_name)
    }
}
