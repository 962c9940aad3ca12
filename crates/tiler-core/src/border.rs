//! Border expander: turns a footprint into a context read window.
//!
//! Interior tiles read `border` pixels of context on each side. At the
//! raster edge there is no context to read, so the window slides inward and
//! takes the missing context from the opposite side instead; nothing is ever
//! reflected or padded.

use serde::{Deserialize, Serialize};

use crate::geometry::{RasterDimensions, TileSize};
use crate::planner::Footprint;

/// Top-left corner of a `patch × patch` read and the offset inside that
/// read where the footprint's `center × center` patch begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpandedWindow {
    pub read_x: usize,
    pub read_y: usize,
    pub clip_offset_x: usize,
    pub clip_offset_y: usize,
}

/// Compute the read window for `footprint`.
///
/// Callers must have checked that both dimensions hold at least one
/// `tile.patch()` (see [`crate::planner::TileLayout::new`]).
pub fn expand(footprint: &Footprint, dims: RasterDimensions, tile: TileSize) -> ExpandedWindow {
    let (read_x, clip_offset_x) = expand_axis(footprint.grid_x, dims.width, tile);
    let (read_y, clip_offset_y) = expand_axis(footprint.grid_y, dims.height, tile);
    ExpandedWindow { read_x, read_y, clip_offset_x, clip_offset_y }
}

/// One axis of [`expand`]: returns `(read, clip_offset)`.
fn expand_axis(grid: usize, extent: usize, tile: TileSize) -> (usize, usize) {
    let border = tile.border as i64;
    let grid_i = grid as i64;

    let mut read = grid_i - border;
    let mut offset = border;
    // Near edge: no context before the tile.
    if grid == 0 {
        read += border;
        offset = 0;
    }
    // Far edge: no context after the tile, take it all from before.
    if grid + tile.center == extent {
        read -= border;
        offset = 2 * border;
    }

    // A tile sitting within `border` of an edge without touching it would
    // still poke outside; settle it inside the raster.
    let max_read = extent.saturating_sub(tile.patch()) as i64;
    if read < 0 || read > max_read {
        read = read.clamp(0, max_read);
        offset = grid_i - read;
    }
    (read as usize, offset as usize)
}
