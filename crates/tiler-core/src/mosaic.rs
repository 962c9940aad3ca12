//! Mosaic assembler: downsample every trimmed tile and stitch them back into
//! one raster-shaped thumbnail.
//!
//! Grid positions come from each result's `(grid_x, grid_y)`, never from
//! arrival order. Tiles sharing a `grid_x` form one column, stacked top to
//! bottom; columns are then laid out left to right. Any shape disagreement
//! is an error, never a crop or a pad.

use crate::class_map::ClassMap;
use crate::error::AssemblyError;
use crate::processor::TileResult;

/// Stitch `results` into one class map at `1 / ratio` scale.
///
/// Tiles whose downsampled width or height would be zero are skipped.
pub fn assemble(results: &[TileResult], ratio: usize) -> Result<ClassMap, AssemblyError> {
    if ratio == 0 {
        return Err(AssemblyError::ZeroRatio);
    }

    let mut order: Vec<&TileResult> = results.iter().collect();
    order.sort_by_key(|t| (t.grid_x, t.grid_y));
    for pair in order.windows(2) {
        if (pair[0].grid_x, pair[0].grid_y) == (pair[1].grid_x, pair[1].grid_y) {
            return Err(AssemblyError::DuplicateTile { grid_x: pair[1].grid_x, grid_y: pair[1].grid_y });
        }
    }

    let mut mosaic: Option<ClassMap> = None;
    let mut column: Option<ClassMap> = None;
    let mut last_x: Option<usize> = None;

    for tile in order {
        let Some(small) = tile.pixels.downsample_nearest(ratio) else {
            continue;
        };
        let at = (tile.grid_x, tile.grid_y);
        if last_x != Some(tile.grid_x) {
            last_x = Some(tile.grid_x);
            if let Some(done) = column.take() {
                mosaic = Some(match mosaic {
                    Some(m) => hstack(&m, &done, at)?,
                    None => done,
                });
            }
            column = Some(small);
        } else if let Some(col) = column.take() {
            column = Some(vstack(&col, &small, at)?);
        }
    }

    let last = column.ok_or(AssemblyError::Empty)?;
    match mosaic {
        Some(m) => hstack(&m, &last, last_x.map_or((0, 0), |x| (x, 0))),
        None => Ok(last),
    }
}

/// Stack `bottom` under `top`. Widths must match.
fn vstack(top: &ClassMap, bottom: &ClassMap, at: (usize, usize)) -> Result<ClassMap, AssemblyError> {
    if top.width != bottom.width {
        return Err(mismatch("vertically", top, bottom, at));
    }
    let mut data = Vec::with_capacity(top.data.len() + bottom.data.len());
    data.extend_from_slice(&top.data);
    data.extend_from_slice(&bottom.data);
    Ok(ClassMap { data, width: top.width, height: top.height + bottom.height })
}

/// Place `right` beside `left`. Heights must match.
fn hstack(left: &ClassMap, right: &ClassMap, at: (usize, usize)) -> Result<ClassMap, AssemblyError> {
    if left.height != right.height {
        return Err(mismatch("horizontally", left, right, at));
    }
    let width = left.width + right.width;
    let mut data = Vec::with_capacity(width * left.height);
    for r in 0..left.height {
        data.extend_from_slice(left.row(r));
        data.extend_from_slice(right.row(r));
    }
    Ok(ClassMap { data, width, height: left.height })
}

fn mismatch(op: &'static str, a: &ClassMap, b: &ClassMap, at: (usize, usize)) -> AssemblyError {
    AssemblyError::ShapeMismatch {
        op,
        left_w: a.width,
        left_h: a.height,
        right_w: b.width,
        right_h: b.height,
        grid_x: at.0,
        grid_y: at.1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::RasterDimensions;
    use crate::planner::plan_footprints;

    /// Class of raster pixel `(x, y)` in a synthetic image made of 50px
    /// blocks, each block labelled by its position.
    fn block_class(x: usize, y: usize) -> u8 {
        ((y / 50) * 8 + x / 50) as u8
    }

    /// Trimmed results as a perfect processor would produce them.
    fn synthetic_results(dims: RasterDimensions, center: usize) -> Vec<TileResult> {
        plan_footprints(dims, center)
            .unwrap()
            .into_iter()
            .map(|f| {
                let (x0, y0) = f.valid_origin();
                TileResult {
                    grid_x: f.grid_x,
                    grid_y: f.grid_y,
                    pixels: ClassMap::from_fn(f.valid_width(), f.valid_height(), |r, c| block_class(x0 + c, y0 + r)),
                }
            })
            .collect()
    }

    #[test]
    fn reassembles_full_raster_without_shift() {
        let dims = RasterDimensions::new(400, 300);
        let results = synthetic_results(dims, 100);
        let mosaic = assemble(&results, 1).unwrap();
        assert_eq!((mosaic.width, mosaic.height), (400, 300));
        for r in 0..300 {
            for c in 0..400 {
                assert_eq!(mosaic.get(r, c), block_class(c, r), "pixel ({c}, {r})");
            }
        }
    }

    #[test]
    fn remainder_tiles_land_at_far_edges() {
        let dims = RasterDimensions::new(350, 250);
        let results = synthetic_results(dims, 100);
        let mosaic = assemble(&results, 10).unwrap();
        assert_eq!((mosaic.width, mosaic.height), (35, 25));
        for r in 0..25 {
            for c in 0..35 {
                assert_eq!(mosaic.get(r, c), block_class(c * 10 + 5, r * 10 + 5), "thumbnail pixel ({c}, {r})");
            }
        }
    }

    #[test]
    fn input_order_does_not_matter() {
        let dims = RasterDimensions::new(300, 300);
        let mut results = synthetic_results(dims, 100);
        let expected = assemble(&results, 5).unwrap();
        results.reverse();
        results.swap(1, 4);
        assert_eq!(assemble(&results, 5).unwrap(), expected);
    }

    #[test]
    fn slivers_below_ratio_are_skipped() {
        // Remainder column is 5px wide: it vanishes at ratio 10.
        let dims = RasterDimensions::new(205, 200);
        let mosaic = assemble(&synthetic_results(dims, 100), 10).unwrap();
        assert_eq!((mosaic.width, mosaic.height), (20, 20));
    }

    #[test]
    fn ragged_column_is_a_shape_mismatch() {
        let results = vec![
            TileResult { grid_x: 0, grid_y: 0, pixels: ClassMap::new(10, 10, 0) },
            TileResult { grid_x: 0, grid_y: 10, pixels: ClassMap::new(10, 10, 0) },
            TileResult { grid_x: 10, grid_y: 0, pixels: ClassMap::new(10, 10, 1) },
        ];
        let err = assemble(&results, 1).unwrap_err();
        assert!(matches!(err, AssemblyError::ShapeMismatch { op: "horizontally", .. }), "got {err:?}");

        let inconsistent = vec![
            TileResult { grid_x: 0, grid_y: 0, pixels: ClassMap::new(10, 10, 0) },
            TileResult { grid_x: 0, grid_y: 10, pixels: ClassMap::new(8, 10, 0) },
        ];
        let err = assemble(&inconsistent, 1).unwrap_err();
        assert!(matches!(err, AssemblyError::ShapeMismatch { op: "vertically", grid_y: 10, .. }));
    }

    #[test]
    fn empty_and_duplicate_inputs_fail() {
        assert_eq!(assemble(&[], 10).unwrap_err(), AssemblyError::Empty);
        let dup = vec![
            TileResult { grid_x: 0, grid_y: 0, pixels: ClassMap::new(4, 4, 0) },
            TileResult { grid_x: 0, grid_y: 0, pixels: ClassMap::new(4, 4, 0) },
        ];
        assert_eq!(assemble(&dup, 1).unwrap_err(), AssemblyError::DuplicateTile { grid_x: 0, grid_y: 0 });
        assert_eq!(assemble(&dup, 0).unwrap_err(), AssemblyError::ZeroRatio);
    }
}
