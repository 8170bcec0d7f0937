use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the upload pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory for downloaded originals. Defaults to the system temp dir.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
