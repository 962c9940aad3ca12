//! Raster extents and tile sizing.
//! All pixel coordinates are level-space `usize`.

use serde::{Deserialize, Serialize};

/// Pixel extent of one raster at the analysed resolution level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RasterDimensions {
    pub width: usize,
    pub height: usize,
}

impl RasterDimensions {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }
}

/// Analysis tile sizing: the `center` area each tile is authoritative for,
/// plus `border` pixels of context read on every side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileSize {
    pub center: usize,
    pub border: usize,
}

impl TileSize {
    pub fn new(center: usize, border: usize) -> Self {
        Self { center, border }
    }

    /// Side length of the square block sent to inference.
    #[inline]
    pub fn patch(&self) -> usize {
        self.center + 2 * self.border
    }
}

impl Default for TileSize {
    fn default() -> Self {
        Self { center: 2000, border: 100 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_adds_border_on_both_sides() {
        assert_eq!(TileSize::new(2000, 100).patch(), 2200);
        assert_eq!(TileSize::new(64, 0).patch(), 64);
        assert_eq!(TileSize::default().patch(), 2200);
    }
}
