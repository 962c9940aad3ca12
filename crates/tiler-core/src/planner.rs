//! Region planner: partitions a raster into `center × center` footprints.
//!
//! Full tiles sit on the regular `center` grid. When a dimension is not a
//! multiple of `center`, one extra row (or column) of tiles is anchored flush
//! against the far edge so that it overlaps its neighbour; its clip bounds mark
//! only the not-yet-covered slice as valid. Every footprint therefore has the
//! same pixel size and only the valid region varies.

use serde::{Deserialize, Serialize};

use crate::border::{expand, ExpandedWindow};
use crate::error::PlanningError;
use crate::geometry::{RasterDimensions, TileSize};

/// One analysis tile.
///
/// `(grid_x, grid_y)` is the top-left pixel of the tile's `center × center`
/// patch in raster space. The inclusive clip bounds select the valid
/// sub-rectangle of that patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Footprint {
    pub grid_x: usize,
    pub grid_y: usize,
    pub clip_top: usize,
    pub clip_left: usize,
    pub clip_bottom: usize,
    pub clip_right: usize,
}

impl Footprint {
    /// A footprint whose whole `center × center` patch is valid.
    pub fn full(grid_x: usize, grid_y: usize, center: usize) -> Self {
        Self {
            grid_x,
            grid_y,
            clip_top: 0,
            clip_left: 0,
            clip_bottom: center - 1,
            clip_right: center - 1,
        }
    }

    pub fn valid_width(&self) -> usize {
        self.clip_right + 1 - self.clip_left
    }

    pub fn valid_height(&self) -> usize {
        self.clip_bottom + 1 - self.clip_top
    }

    /// Raster-space top-left pixel of the valid area.
    pub fn valid_origin(&self) -> (usize, usize) {
        (self.grid_x + self.clip_left, self.grid_y + self.clip_top)
    }

    pub fn is_remainder(&self) -> bool {
        self.clip_top > 0 || self.clip_left > 0
    }
}

/// Produce the footprints covering `dims` with `center`-sized tiles.
///
/// Emission order: full tiles column by column (rows nested inside each
/// column), then the bottom remainder row, the right remainder column and
/// the corner.
///
/// Fails when either dimension is smaller than one tile; such a raster
/// would otherwise plan to zero tiles and an empty mosaic.
pub fn plan_footprints(dims: RasterDimensions, center: usize) -> Result<Vec<Footprint>, PlanningError> {
    if center == 0 {
        return Err(PlanningError::ZeroCenter);
    }
    if dims.width < center || dims.height < center {
        return Err(PlanningError::RasterTooSmall {
            width: dims.width,
            height: dims.height,
            center,
        });
    }

    let x_step = dims.width / center;
    let y_step = dims.height / center;
    let row_rem = dims.height % center != 0;
    let col_rem = dims.width % center != 0;

    // Overlap of the far-edge tile with the last full tile, in pixels.
    let top_clip = (y_step + 1) * center - dims.height;
    let left_clip = (x_step + 1) * center - dims.width;
    let last_y = dims.height - center;
    let last_x = dims.width - center;

    let mut out = Vec::with_capacity((x_step + 1) * (y_step + 1));
    for x in 0..x_step {
        for y in 0..y_step {
            out.push(Footprint::full(x * center, y * center, center));
        }
    }
    if row_rem {
        for x in 0..x_step {
            out.push(Footprint { clip_top: top_clip, ..Footprint::full(x * center, last_y, center) });
        }
    }
    if col_rem {
        for y in 0..y_step {
            out.push(Footprint { clip_left: left_clip, ..Footprint::full(last_x, y * center, center) });
        }
    }
    if row_rem && col_rem {
        out.push(Footprint {
            clip_top: top_clip,
            clip_left: left_clip,
            ..Footprint::full(last_x, last_y, center)
        });
    }
    Ok(out)
}

/// A validated tiling of one raster: footprints plus their read windows.
#[derive(Debug, Clone)]
pub struct TileLayout {
    pub dims: RasterDimensions,
    pub tile: TileSize,
    pub footprints: Vec<Footprint>,
}

impl TileLayout {
    /// Plan `dims` and check that every context patch fits inside the raster.
    pub fn new(dims: RasterDimensions, tile: TileSize) -> Result<Self, PlanningError> {
        let footprints = plan_footprints(dims, tile.center)?;
        let patch = tile.patch();
        if dims.width < patch || dims.height < patch {
            return Err(PlanningError::PatchDoesNotFit {
                width: dims.width,
                height: dims.height,
                patch,
            });
        }
        Ok(Self { dims, tile, footprints })
    }

    pub fn len(&self) -> usize {
        self.footprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.footprints.is_empty()
    }

    /// Expanded read window of one footprint of this layout.
    pub fn window(&self, footprint: &Footprint) -> ExpandedWindow {
        expand(footprint, self.dims, self.tile)
    }

    /// Every footprint paired with its read window, in emission order.
    pub fn windows(&self) -> impl Iterator<Item = (Footprint, ExpandedWindow)> + '_ {
        self.footprints.iter().map(move |f| (*f, self.window(f)))
    }
}
