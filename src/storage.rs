//! Per-image label persistence.

#[cfg(test)]
use std::cell::RefCell;
#[cfg(test)]
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::labels::LabelCollection;

/// Loads and saves label collections keyed by image identity.
pub trait LabelStorage {
    /// Stored labels for `image_key`, `Ok(None)` when nothing was saved yet.
    fn try_load(&self, image_key: &str) -> Result<Option<LabelCollection>>;

    fn save(&self, image_key: &str, labels: &LabelCollection) -> Result<()>;

    /// Stored labels, or an empty collection when there are none or they
    /// cannot be read.
    fn load(&self, image_key: &str) -> LabelCollection {
        match self.try_load(image_key) {
            Ok(Some(labels)) => {
                log::info!("Loaded {} labels for {}", labels.len(), image_key);
                labels
            }
            Ok(None) => LabelCollection::new(),
            Err(e) => {
                log::warn!("Ignoring stored labels for {}: {}", image_key, e);
                LabelCollection::new()
            }
        }
    }
}

/// Stores labels as JSON next to the image: `photo.jpg` -> `photo.jpg.labels.json`.
#[derive(Debug, Default, Clone)]
pub struct SidecarStorage;

pub fn sidecar_path(image_path: &Path) -> PathBuf {
    image_path.with_extension(format!(
        "{}labels.json",
        image_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!("{e}."))
            .unwrap_or_default()
    ))
}

impl LabelStorage for SidecarStorage {
    fn try_load(&self, image_key: &str) -> Result<Option<LabelCollection>> {
        let path = sidecar_path(Path::new(image_key));
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn save(&self, image_key: &str, labels: &LabelCollection) -> Result<()> {
        let path = sidecar_path(Path::new(image_key));
        let data = serde_json::to_string_pretty(labels)?;
        std::fs::write(&path, data)?;
        log::trace!("Saved {} labels to {}", labels.len(), path.display());
        Ok(())
    }
}

/// Keeps serialized labels in memory. Stores JSON rather than the values so
/// loads go through the same parsing as the sidecar files.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RefCell<HashMap<String, String>>,
}

#[cfg(test)]
impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_raw(&self, image_key: &str, json: &str) {
        self.entries
            .borrow_mut()
            .insert(image_key.to_string(), json.to_string());
    }

    pub fn saved_count(&self, image_key: &str) -> Option<usize> {
        self.try_load(image_key).ok().flatten().map(|c| c.len())
    }
}

#[cfg(test)]
impl LabelStorage for MemoryStorage {
    fn try_load(&self, image_key: &str) -> Result<Option<LabelCollection>> {
        match self.entries.borrow().get(image_key) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    fn save(&self, image_key: &str, labels: &LabelCollection) -> Result<()> {
        let json = serde_json::to_string(labels)?;
        self.insert_raw(image_key, &json);
        Ok(())
    }
}
