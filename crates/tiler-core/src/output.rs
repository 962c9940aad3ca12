//! Thumbnail output: class maps rescaled to a visible grey ramp.

use std::fs;
use std::path::{Path, PathBuf};

use image::GrayImage;

use crate::class_map::ClassMap;
use crate::error::{ConfigError, StoreError};

/// Map class indices `0..class_count` onto `0..=255`, stepping by
/// `255 / (class_count - 1)`. Indices past the last class saturate.
pub fn to_intensity(map: &ClassMap, class_count: u8) -> GrayImage {
    let step = 255.0 / (class_count.max(2) - 1) as f32;
    let data = map.data.iter().map(|&v| (v as f32 * step).min(255.0) as u8).collect();
    GrayImage::from_raw(map.width as u32, map.height as u32, data)
        .unwrap_or_else(|| GrayImage::new(map.width as u32, map.height as u32))
}

/// Writes `<raster>_prediction_thumbnail.png` files into one directory.
#[derive(Debug, Clone)]
pub struct ThumbnailWriter {
    dir: PathBuf,
    class_count: u8,
}

impl ThumbnailWriter {
    pub fn new(dir: impl Into<PathBuf>, class_count: u8) -> Result<Self, ConfigError> {
        if class_count < 2 {
            return Err(ConfigError::Invalid(format!("class count must be >= 2, got {class_count}")));
        }
        Ok(Self { dir: dir.into(), class_count })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, raster: &str) -> PathBuf {
        self.dir.join(format!("{raster}_prediction_thumbnail.png"))
    }

    pub fn write(&self, raster: &str, mosaic: &ClassMap) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io { path: self.dir.clone(), source })?;
        let path = self.path_for(raster);
        to_intensity(mosaic, self.class_count)
            .save_with_format(&path, image::ImageFormat::Png)
            .map_err(|source| StoreError::Image { path: path.clone(), source })?;
        Ok(path)
    }
}
