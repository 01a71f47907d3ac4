use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use image::RgbaImage;
use rayon::prelude::*;
use thiserror::Error;

use crate::{
    config::OverlaysConfig,
    placement::OverlaySize,
    types::{AssetStatus, OverlayVariant},
};

#[derive(Debug, Error)]
pub enum AssetLoadError {
    #[error("failed to read overlay {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode overlay {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("overlay {path} has no pixels")]
    Empty { path: PathBuf },
}

#[derive(Clone, Debug)]
pub enum AssetState {
    Loading,
    Ready(Arc<RgbaImage>),
    Failed(String),
}

impl AssetState {
    pub fn status(&self) -> AssetStatus {
        match self {
            AssetState::Loading => AssetStatus::Loading,
            AssetState::Ready(_) => AssetStatus::Ready,
            AssetState::Failed(_) => AssetStatus::Failed,
        }
    }

    pub fn image(&self) -> Option<&Arc<RgbaImage>> {
        match self {
            AssetState::Ready(image) => Some(image),
            _ => None,
        }
    }

    pub fn size(&self) -> Option<OverlaySize> {
        self.image().map(|image| OverlaySize {
            width: image.width(),
            height: image.height(),
        })
    }
}

struct LoadedAsset {
    variant: OverlayVariant,
    result: Result<RgbaImage, AssetLoadError>,
}

/// The two garment images. Loading happens on background threads; call
/// [`OverlayRegistry::poll`] to pick up finished loads.
pub struct OverlayRegistry {
    assets: [AssetState; 2],
    loaded_rx: Receiver<LoadedAsset>,
}

impl OverlayRegistry {
    /// Starts loading both assets in the background.
    pub fn load(config: &OverlaysConfig) -> Self {
        let (loaded_tx, loaded_rx) = unbounded();
        let white_threshold = config.strip_white_background.then_some(config.white_threshold);

        for variant in OverlayVariant::ALL {
            let path = config.tuning(variant).path.clone();
            spawn_loader(variant, path, white_threshold, loaded_tx.clone());
        }

        Self {
            assets: [AssetState::Loading, AssetState::Loading],
            loaded_rx,
        }
    }

    /// Applies any loads that finished since the last call.
    pub fn poll(&mut self) {
        while let Ok(loaded) = self.loaded_rx.try_recv() {
            let state = match loaded.result {
                Ok(image) => {
                    log::info!(
                        "{} overlay ready ({}x{})",
                        loaded.variant.key(),
                        image.width(),
                        image.height()
                    );
                    AssetState::Ready(Arc::new(image))
                }
                Err(err) => {
                    log::warn!(
                        "{} overlay unavailable, drawing without it: {err}",
                        loaded.variant.key()
                    );
                    AssetState::Failed(err.to_string())
                }
            };
            self.assets[loaded.variant.index()] = state;
        }
    }

    pub fn get(&self, variant: OverlayVariant) -> &AssetState {
        &self.assets[variant.index()]
    }

    #[cfg(test)]
    pub(crate) fn with_states(male: AssetState, female: AssetState) -> Self {
        let (_tx, loaded_rx) = unbounded();
        Self {
            assets: [male, female],
            loaded_rx,
        }
    }
}

fn spawn_loader(
    variant: OverlayVariant,
    path: PathBuf,
    white_threshold: Option<u8>,
    loaded_tx: Sender<LoadedAsset>,
) {
    thread::spawn(move || {
        let result = load_overlay_image(&path).map(|mut image| {
            if let Some(threshold) = white_threshold {
                strip_white_background(&mut image, threshold);
            }
            image
        });
        let _ = loaded_tx.send(LoadedAsset { variant, result });
    });
}

pub fn load_overlay_image(path: &Path) -> Result<RgbaImage, AssetLoadError> {
    let bytes = std::fs::read(path).map_err(|source| AssetLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let image = image::load_from_memory(&bytes)
        .map_err(|source| AssetLoadError::Decode {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgba8();

    if image.width() == 0 || image.height() == 0 {
        return Err(AssetLoadError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(image)
}

/// Makes every pixel whose R, G and B all exceed `threshold` fully transparent.
pub fn strip_white_background(image: &mut RgbaImage, threshold: u8) {
    image.par_chunks_exact_mut(4).for_each(|px| {
        if px[0] > threshold && px[1] > threshold && px[2] > threshold {
            px.copy_from_slice(&[255, 255, 255, 0]);
        }
    });
}
