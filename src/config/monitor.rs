use serde::{Deserialize, Serialize};

/// Retention settings for the monitoring sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Write full image tensors every N steps (0 disables image files)
    pub image_interval: usize,
    /// Number of image files kept on disk, oldest removed first
    pub max_image_files: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            image_interval: 100,
            max_image_files: 20,
        }
    }
}
