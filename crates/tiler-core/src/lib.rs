//! Tiled inference over whole-slide rasters with seamless mosaic reassembly.
//!
//! A raster is split into `center × center` footprints, each read with a
//! `border` of real context, sent through a segmentation backend, trimmed
//! back to its footprint and stitched into a downsampled thumbnail.

pub mod backend;
pub mod border;
pub mod class_map;
pub mod config;
pub mod error;
pub mod geometry;
pub mod morphology;
pub mod mosaic;
pub mod orchestrator;
pub mod output;
pub mod planner;
pub mod processor;
pub mod slide;
pub mod store;

pub use backend::{GuardedBackend, InferenceBackend, RetryPolicy};
pub use class_map::ClassMap;
pub use config::{BackendConfig, RunConfig, StoreKind};
pub use error::{ErrorKind, RasterError};
pub use geometry::{RasterDimensions, TileSize};
pub use orchestrator::{BatchSummary, CancelToken, Pipeline, RasterOutcome, RasterStatus};
pub use planner::{Footprint, TileLayout};
