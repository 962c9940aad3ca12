//! Slide access: the pixel-reader contract, the extension → container table
//! and a reader for plain raster images decoded with the `image` crate.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::SourceError;
use crate::geometry::RasterDimensions;

/// Number of pyramid levels synthesised for plain raster images.
const MAX_LEVELS: usize = 4;

/// Random access to the RGB pixels of one slide at several resolutions.
///
/// Level 0 is full resolution; each further level is coarser. Coordinates
/// passed to `read_region` are in the pixel space of the requested level.
pub trait PixelReader: Send + Sync {
    fn level_count(&self) -> usize;
    fn level_dimensions(&self, level: usize) -> Result<RasterDimensions, SourceError>;
    fn read_region(&self, level: usize, x: usize, y: usize, w: usize, h: usize) -> Result<RgbImage, SourceError>;
}

/// Opens a slide file into a [`PixelReader`].
pub trait SlideOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn PixelReader>, SourceError>;
}

/// Container kinds recognised by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideFormat {
    Tiff,
    Png,
    Jpeg,
}

impl SlideFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "tif" | "tiff" => Some(SlideFormat::Tiff),
            "png" => Some(SlideFormat::Png),
            "jpg" | "jpeg" => Some(SlideFormat::Jpeg),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, SourceError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Self::from_extension(ext).ok_or_else(|| SourceError::UnsupportedFormat(path.display().to_string()))
    }

    fn image_format(self) -> image::ImageFormat {
        match self {
            SlideFormat::Tiff => image::ImageFormat::Tiff,
            SlideFormat::Png => image::ImageFormat::Png,
            SlideFormat::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

/// Name used for a raster's output artifacts: the file stem of its path.
pub fn raster_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A fully decoded raster image with a synthesised 2× pyramid.
pub struct ImageSlide {
    levels: Vec<RgbImage>,
}

impl ImageSlide {
    /// Build the pyramid from an already-decoded level-0 image.
    pub fn from_image(base: RgbImage) -> Self {
        let mut levels = vec![base];
        while levels.len() < MAX_LEVELS {
            let prev = &levels[levels.len() - 1];
            let (w, h) = (prev.width() / 2, prev.height() / 2);
            if w == 0 || h == 0 {
                break;
            }
            let next = imageops::resize(prev, w, h, FilterType::Triangle);
            levels.push(next);
        }
        Self { levels }
    }

    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let format = SlideFormat::from_path(path)?;
        let mut reader = image::ImageReader::open(path)
            .map_err(|e| SourceError::Other(format!("cannot open {}: {e}", path.display())))?;
        reader.set_format(format.image_format());
        let decoded = reader
            .decode()
            .map_err(|source| SourceError::Decode { path: path.to_path_buf(), source })?;
        Ok(Self::from_image(decoded.to_rgb8()))
    }

    fn level(&self, level: usize) -> Result<&RgbImage, SourceError> {
        self.levels.get(level).ok_or(SourceError::MissingLevel { level, available: self.levels.len() })
    }
}

impl PixelReader for ImageSlide {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_dimensions(&self, level: usize) -> Result<RasterDimensions, SourceError> {
        let img = self.level(level)?;
        Ok(RasterDimensions::new(img.width() as usize, img.height() as usize))
    }

    fn read_region(&self, level: usize, x: usize, y: usize, w: usize, h: usize) -> Result<RgbImage, SourceError> {
        let img = self.level(level)?;
        if x + w > img.width() as usize || y + h > img.height() as usize {
            return Err(SourceError::OutOfBounds { level, x, y, w, h });
        }
        Ok(imageops::crop_imm(img, x as u32, y as u32, w as u32, h as u32).to_image())
    }
}

/// Opens plain raster images; every other container is unsupported.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageSlideOpener;

impl SlideOpener for ImageSlideOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn PixelReader>, SourceError> {
        Ok(Box::new(ImageSlide::open(path)?))
    }
}
