//! Application configuration, read from an optional JSON file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::layout::LayoutConfig;

pub const DEFAULT_EXPORT_FILE_NAME: &str = "mountain.jpeg";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub layout: LayoutConfig,

    /// File name offered when exporting the labeled image.
    pub export_file_name: String,

    /// TrueType/OpenType font for label text, on the canvas and in exports.
    /// The built-in UI font is used when unset.
    pub font_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            layout: LayoutConfig::default(),
            export_file_name: DEFAULT_EXPORT_FILE_NAME.to_string(),
            font_path: None,
        }
    }
}

impl AppConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json(&data)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
