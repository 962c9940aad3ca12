//! Prints the tile plan of a raster as JSON: every footprint with its clip
//! bounds and the expanded read window sent to inference.

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use tiler_core::border::ExpandedWindow;
use tiler_core::{Footprint, RasterDimensions, TileLayout, TileSize};

#[derive(Parser, Debug)]
#[command(name = "plan-inspect", about = "Show footprints and read windows for a raster size")]
struct Args {
    /// Raster width at the analysed level
    #[arg(long)]
    width: usize,

    /// Raster height at the analysed level
    #[arg(long)]
    height: usize,

    #[arg(long, default_value = "2000")]
    center: usize,

    #[arg(long, default_value = "100")]
    border: usize,

    /// Print one compact object per line instead of a pretty document
    #[arg(long)]
    compact: bool,
}

#[derive(Serialize)]
struct PlanEntry {
    #[serde(flatten)]
    footprint: Footprint,
    valid_width: usize,
    valid_height: usize,
    window: ExpandedWindow,
}

#[derive(Serialize)]
struct Plan {
    dims: RasterDimensions,
    tile: TileSize,
    patch: usize,
    tiles: Vec<PlanEntry>,
}

fn plan(args: &Args) -> Result<Plan> {
    let dims = RasterDimensions::new(args.width, args.height);
    let tile = TileSize::new(args.center, args.border);
    let layout = TileLayout::new(dims, tile)?;
    let tiles = layout
        .windows()
        .map(|(footprint, window)| PlanEntry {
            footprint,
            valid_width: footprint.valid_width(),
            valid_height: footprint.valid_height(),
            window,
        })
        .collect();
    Ok(Plan { dims, tile, patch: tile.patch(), tiles })
}

fn main() -> Result<()> {
    let args = Args::parse();
    let plan = plan(&args)?;
    if args.compact {
        for entry in &plan.tiles {
            println!("{}", serde_json::to_string(entry)?);
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_tile_plan_serializes_windows() {
        let args = Args::parse_from(["plan-inspect", "--width", "4000", "--height", "4000"]);
        let plan = plan(&args).unwrap();
        assert_eq!(plan.tiles.len(), 4);
        let json = serde_json::to_value(&plan).unwrap();
        let last = &json["tiles"][3];
        assert_eq!(last["grid_x"], 2000);
        assert_eq!(last["window"]["read_x"], 1800);
        assert_eq!(last["window"]["clip_offset_x"], 200);
    }

    #[test]
    fn undersized_raster_is_an_error() {
        let args = Args::parse_from(["plan-inspect", "--width", "100", "--height", "4000"]);
        assert!(plan(&args).is_err());
    }
}
