//! Error taxonomy for the tiling pipeline.
//!
//! Component errors are small `thiserror` enums. `RasterError` is what the
//! run orchestrator catches per raster; `ErrorKind` is its coarse category
//! used in batch summaries.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Raster dimensions that cannot be tiled with the configured tile size.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("raster {width}x{height} is smaller than one {center}px tile")]
    RasterTooSmall { width: usize, height: usize, center: usize },
    #[error("raster {width}x{height} cannot hold a {patch}px context patch")]
    PatchDoesNotFit { width: usize, height: usize, patch: usize },
    #[error("tile center size must be positive")]
    ZeroCenter,
}

/// Failure opening or reading a slide container.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unsupported raster format: {0}")]
    UnsupportedFormat(String),
    #[error("level {level} not available (slide has {available} levels)")]
    MissingLevel { level: usize, available: usize },
    #[error("region ({x}, {y}) {w}x{h} lies outside level {level}")]
    OutOfBounds { level: usize, x: usize, y: usize, w: usize, h: usize },
    #[error("cannot decode {path}: {source}")]
    Decode { path: PathBuf, source: image::ImageError },
    #[error("{0}")]
    Other(String),
}

/// Failure of the external inference backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("inference call timed out after {0:?}")]
    Timeout(Duration),
    #[error("inference transport error: {0}")]
    Transport(String),
    #[error("malformed inference response: {0}")]
    Malformed(String),
    #[error("inference worker disconnected")]
    Disconnected,
}

/// A read or inference failure attributed to one tile.
#[derive(Debug, Error)]
pub enum TileError {
    #[error("tile ({grid_x}, {grid_y}): pixel read failed: {source}")]
    Read { grid_x: usize, grid_y: usize, source: SourceError },
    #[error("tile ({grid_x}, {grid_y}): inference failed after {attempts} attempt(s): {source}")]
    Inference { grid_x: usize, grid_y: usize, attempts: u32, source: BackendError },
    #[error("tile ({grid_x}, {grid_y}): inference output {width}x{height} cannot hold the {need}px crop")]
    OutputShape { grid_x: usize, grid_y: usize, width: usize, height: usize, need: usize },
}

/// Temporary tile store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("tile ({grid_x}, {grid_y}) of {raster} was already written")]
    AlreadyWritten { raster: String, grid_x: usize, grid_y: usize },
    #[error("tile ({grid_x}, {grid_y}) of {raster} is missing")]
    Missing { raster: String, grid_x: usize, grid_y: usize },
    #[error("store io on {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("store image on {path}: {source}")]
    Image { path: PathBuf, source: image::ImageError },
}

/// Internal invariant violation while stitching tiles together.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("no tile survived downsampling")]
    Empty,
    #[error("downsample ratio must be positive")]
    ZeroRatio,
    #[error("tile ({grid_x}, {grid_y}) appears more than once")]
    DuplicateTile { grid_x: usize, grid_y: usize },
    #[error("cannot stack {op}: {left_w}x{left_h} against {right_w}x{right_h} at tile ({grid_x}, {grid_y})")]
    ShapeMismatch {
        op: &'static str,
        left_w: usize,
        left_h: usize,
        right_w: usize,
        right_h: usize,
        grid_x: usize,
        grid_y: usize,
    },
}

/// Invalid run or backend configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("cannot read config {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("cannot parse config {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
}

/// Everything that can fail one raster of a batch.
#[derive(Debug, Error)]
pub enum RasterError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Planning(#[from] PlanningError),
    #[error(transparent)]
    Tile(#[from] TileError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error("raster run cancelled")]
    Cancelled,
}

/// Coarse category of a raster failure, as reported in the batch summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorKind {
    UnsupportedFormat,
    Source,
    InferenceBackend,
    Planning,
    AssemblyShapeMismatch,
    Storage,
    Cancelled,
}

impl RasterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RasterError::Source(SourceError::UnsupportedFormat(_)) => ErrorKind::UnsupportedFormat,
            RasterError::Source(_) => ErrorKind::Source,
            RasterError::Tile(TileError::Read { .. }) => ErrorKind::Source,
            RasterError::Tile(_) => ErrorKind::InferenceBackend,
            RasterError::Planning(_) => ErrorKind::Planning,
            RasterError::Store(_) => ErrorKind::Storage,
            RasterError::Assembly(_) => ErrorKind::AssemblyShapeMismatch,
            RasterError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
