//! Per-tile pipeline: read the context patch, infer, trim back to the
//! footprint's valid area, optionally denoise.
//!
//! The processor does no I/O of its own. Pixel reads and inference calls are
//! injected as closures, so it is equally usable with a real slide and a
//! remote model or with in-memory fakes.

use image::RgbImage;

use crate::backend::Exhausted;
use crate::border::ExpandedWindow;
use crate::class_map::ClassMap;
use crate::error::{SourceError, TileError};
use crate::geometry::TileSize;
use crate::morphology::Denoiser;
use crate::planner::Footprint;

/// Inference output trimmed to one footprint's valid area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileResult {
    pub grid_x: usize,
    pub grid_y: usize,
    pub pixels: ClassMap,
}

/// Square region to read, in level-space pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchRequest {
    pub x: usize,
    pub y: usize,
    pub side: usize,
}

#[derive(Debug, Clone)]
pub struct TileProcessor {
    tile: TileSize,
    denoiser: Option<Denoiser>,
}

impl TileProcessor {
    pub fn new(tile: TileSize, denoiser: Option<Denoiser>) -> Self {
        Self { tile, denoiser }
    }

    pub fn tile(&self) -> TileSize {
        self.tile
    }

    /// Run one tile.
    ///
    /// `read` receives the `patch × patch` request at the window origin;
    /// `infer` receives the pixels and returns a class map in the same frame.
    pub fn process<R, I>(
        &self,
        footprint: &Footprint,
        window: &ExpandedWindow,
        read: R,
        infer: I,
    ) -> Result<TileResult, TileError>
    where
        R: FnOnce(PatchRequest) -> Result<RgbImage, SourceError>,
        I: FnOnce(RgbImage) -> Result<ClassMap, Exhausted>,
    {
        let (grid_x, grid_y) = (footprint.grid_x, footprint.grid_y);
        let request = PatchRequest { x: window.read_x, y: window.read_y, side: self.tile.patch() };

        let patch = read(request).map_err(|source| TileError::Read { grid_x, grid_y, source })?;
        let prediction = infer(patch).map_err(|e| TileError::Inference {
            grid_x,
            grid_y,
            attempts: e.attempts,
            source: e.last,
        })?;

        let pixels = self.trim(footprint, window, &prediction).ok_or(TileError::OutputShape {
            grid_x,
            grid_y,
            width: prediction.width,
            height: prediction.height,
            need: self.tile.center,
        })?;
        let pixels = match &self.denoiser {
            Some(d) => d.apply(&pixels),
            None => pixels,
        };
        Ok(TileResult { grid_x, grid_y, pixels })
    }

    /// Drop the context border, then the part of a remainder tile that a
    /// neighbouring tile already owns.
    fn trim(&self, footprint: &Footprint, window: &ExpandedWindow, prediction: &ClassMap) -> Option<ClassMap> {
        let center = self.tile.center;
        let patch = prediction.crop(window.clip_offset_x, window.clip_offset_y, center, center)?;
        patch.crop(
            footprint.clip_left,
            footprint.clip_top,
            footprint.valid_width(),
            footprint.valid_height(),
        )
    }
}
