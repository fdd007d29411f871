//! Storage backend configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage fan-out configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Write JSON batch files
    pub json_enabled: bool,
    /// Directory for JSON batch output
    pub output_dir: PathBuf,
    /// Pages per batch file
    pub batch_size: usize,
    /// Pretty-print JSON output
    pub pretty: bool,
    /// Keep records in an in-memory store as well
    pub memory_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            json_enabled: true,
            output_dir: PathBuf::from("./output"),
            batch_size: 100,
            pretty: true,
            memory_enabled: false,
        }
    }
}
