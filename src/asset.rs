//! The image being labeled, decoded once per session.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;

use image::RgbaImage;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct ImageAsset {
    source: PathBuf,
    pixels: RgbaImage,
}

impl ImageAsset {
    pub fn from_pixels(source: impl Into<PathBuf>, pixels: RgbaImage) -> Self {
        Self {
            source: source.into(),
            pixels,
        }
    }

    /// Key under which this image's labels are stored.
    pub fn key(&self) -> String {
        self.source.to_string_lossy().into_owned()
    }

    pub fn natural_width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn natural_height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn natural_size(&self) -> (f32, f32) {
        (self.natural_width() as f32, self.natural_height() as f32)
    }

    /// Decoded RGBA pixels at natural resolution.
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

pub struct ImageLoader;

impl ImageLoader {
    pub fn load(path: &Path) -> Result<ImageAsset> {
        let decoded = image::open(path).map_err(|source| Error::ImageLoadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!(
            "Loaded {} ({}x{})",
            path.display(),
            decoded.width(),
            decoded.height()
        );
        Ok(ImageAsset::from_pixels(path, decoded.to_rgba8()))
    }

    /// Decode on a background thread. The result is delivered once.
    pub fn spawn(path: PathBuf) -> PendingImage {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let result = Self::load(&path).map(Arc::new).map_err(|e| e.to_string());
            let _ = tx.send(result);
        });
        PendingImage {
            state: LoadState::Loading,
            rx: Some(rx),
        }
    }
}

#[derive(Clone, Debug)]
pub enum LoadState {
    Loading,
    Ready(Arc<ImageAsset>),
    /// Terminal: there is no retry.
    Failed(String),
}

pub struct PendingImage {
    state: LoadState,
    rx: Option<Receiver<std::result::Result<Arc<ImageAsset>, String>>>,
}

impl PendingImage {
    pub fn poll(&mut self) -> &LoadState {
        if let Some(rx) = &self.rx {
            match rx.try_recv() {
                Ok(Ok(asset)) => self.state = LoadState::Ready(asset),
                Ok(Err(e)) => {
                    log::error!("{e}");
                    self.state = LoadState::Failed(e);
                }
                Err(TryRecvError::Empty) => return &self.state,
                Err(TryRecvError::Disconnected) => {
                    self.state = LoadState::Failed("image loader stopped".to_string());
                }
            }
            self.rx = None;
        }
        &self.state
    }
}
