//! Temporary per-tile result stores.
//!
//! Results are keyed by `(raster, grid_x, grid_y)` and written once. Keys are
//! structured values; the PNG store keeps its own index and never recovers a
//! grid position from a file name.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::GrayImage;
use parking_lot::Mutex;

use crate::class_map::ClassMap;
use crate::error::StoreError;
use crate::processor::TileResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub raster: Arc<str>,
    pub grid_x: usize,
    pub grid_y: usize,
}

impl TileKey {
    pub fn new(raster: &Arc<str>, grid_x: usize, grid_y: usize) -> Self {
        Self { raster: Arc::clone(raster), grid_x, grid_y }
    }

    fn already_written(&self) -> StoreError {
        StoreError::AlreadyWritten { raster: self.raster.to_string(), grid_x: self.grid_x, grid_y: self.grid_y }
    }

    fn missing(&self) -> StoreError {
        StoreError::Missing { raster: self.raster.to_string(), grid_x: self.grid_x, grid_y: self.grid_y }
    }
}

/// Write-once keyed storage shared by concurrent tile workers.
pub trait TileStore: Send + Sync {
    fn put(&self, key: TileKey, pixels: ClassMap) -> Result<(), StoreError>;
    fn get(&self, key: &TileKey) -> Result<ClassMap, StoreError>;
    /// Keys stored for `raster`, in ascending `(grid_x, grid_y)` order.
    fn keys(&self, raster: &str) -> Vec<TileKey>;
    /// Forget everything stored for `raster`.
    fn release(&self, raster: &str) -> Result<(), StoreError>;

    /// Whether stored results outlive the process, e.g. as files.
    fn persists(&self) -> bool {
        false
    }

    /// Load every result of `raster`.
    fn results(&self, raster: &str) -> Result<Vec<TileResult>, StoreError> {
        self.keys(raster)
            .into_iter()
            .map(|key| {
                let pixels = self.get(&key)?;
                Ok(TileResult { grid_x: key.grid_x, grid_y: key.grid_y, pixels })
            })
            .collect()
    }
}

/// Keeps results in memory for the lifetime of a raster run.
#[derive(Debug, Default)]
pub struct MemoryTileStore {
    tiles: Mutex<HashMap<TileKey, ClassMap>>,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tiles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.lock().is_empty()
    }
}

impl TileStore for MemoryTileStore {
    fn put(&self, key: TileKey, pixels: ClassMap) -> Result<(), StoreError> {
        let mut tiles = self.tiles.lock();
        if tiles.contains_key(&key) {
            return Err(key.already_written());
        }
        tiles.insert(key, pixels);
        Ok(())
    }

    fn get(&self, key: &TileKey) -> Result<ClassMap, StoreError> {
        self.tiles.lock().get(key).cloned().ok_or_else(|| key.missing())
    }

    fn keys(&self, raster: &str) -> Vec<TileKey> {
        let mut keys: Vec<TileKey> = self.tiles.lock().keys().filter(|k| &*k.raster == raster).cloned().collect();
        keys.sort();
        keys
    }

    fn release(&self, raster: &str) -> Result<(), StoreError> {
        self.tiles.lock().retain(|k, _| &*k.raster != raster);
        Ok(())
    }
}

/// Writes each result as a lossless greyscale PNG of raw class indices,
/// `<root>/<raster>/<raster>_<grid_x>_<grid_y>_prediction.png`.
#[derive(Debug)]
pub struct PngTileStore {
    root: PathBuf,
    keep_files: bool,
    index: Mutex<BTreeSet<TileKey>>,
}

impl PngTileStore {
    /// `keep_files` leaves the PNGs on disk when a raster is released.
    pub fn new(root: impl Into<PathBuf>, keep_files: bool) -> Self {
        Self { root: root.into(), keep_files, index: Mutex::new(BTreeSet::new()) }
    }

    pub fn raster_dir(&self, raster: &str) -> PathBuf {
        self.root.join(raster)
    }

    pub fn tile_path(&self, key: &TileKey) -> PathBuf {
        self.raster_dir(&key.raster)
            .join(format!("{}_{}_{}_prediction.png", key.raster, key.grid_x, key.grid_y))
    }

    fn write_png(path: &Path, pixels: ClassMap) -> Result<(), StoreError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| StoreError::Io { path: dir.to_path_buf(), source })?;
        }
        let (w, h) = (pixels.width as u32, pixels.height as u32);
        let img = GrayImage::from_raw(w, h, pixels.data).ok_or_else(|| StoreError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, "class map buffer size mismatch"),
        })?;
        img.save_with_format(path, image::ImageFormat::Png)
            .map_err(|source| StoreError::Image { path: path.to_path_buf(), source })
    }
}

impl TileStore for PngTileStore {
    fn put(&self, key: TileKey, pixels: ClassMap) -> Result<(), StoreError> {
        // Reserve the key first so two writers can never race on one file.
        if !self.index.lock().insert(key.clone()) {
            return Err(key.already_written());
        }
        let path = self.tile_path(&key);
        Self::write_png(&path, pixels).inspect_err(|_| {
            self.index.lock().remove(&key);
        })
    }

    fn get(&self, key: &TileKey) -> Result<ClassMap, StoreError> {
        if !self.index.lock().contains(key) {
            return Err(key.missing());
        }
        let path = self.tile_path(key);
        let img = image::open(&path)
            .map_err(|source| StoreError::Image { path: path.clone(), source })?
            .into_luma8();
        let (w, h) = img.dimensions();
        ClassMap::from_vec(w as usize, h as usize, img.into_raw()).ok_or_else(|| key.missing())
    }

    fn persists(&self) -> bool {
        true
    }

    fn keys(&self, raster: &str) -> Vec<TileKey> {
        self.index.lock().iter().filter(|k| &*k.raster == raster).cloned().collect()
    }

    fn release(&self, raster: &str) -> Result<(), StoreError> {
        self.index.lock().retain(|k| &*k.raster != raster);
        if self.keep_files {
            return Ok(());
        }
        let dir = self.raster_dir(raster);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path: dir, source }),
        }
    }
}
