//! Run and backend configuration.
//!
//! Both structs deserialize from JSON with every field optional; missing
//! fields take the defaults below. Nothing here is global: the CLI builds
//! one of each and hands them to the components that need them.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::backend::RetryPolicy;
use crate::error::ConfigError;
use crate::geometry::TileSize;

/// Where per-tile results live between processing and assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Png,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Directory the manifest entries are relative to.
    pub source_dir: PathBuf,
    /// Newline-delimited list of raster files.
    pub manifest: PathBuf,
    /// Number of classes the model predicts.
    pub class_count: u8,
    pub output_dir: PathBuf,
    /// Pyramid level to analyse; 0 is full resolution.
    pub level: usize,
    /// Side of the area each tile is authoritative for.
    pub center_size: usize,
    /// Context read around every tile.
    pub border_size: usize,
    pub keep_temp: bool,
    pub post_processing: bool,
    /// Odd side length of the elliptical denoising element.
    pub filter_kernel: usize,
    /// Downsample factor from predictions to the thumbnail.
    pub thumbnail_ratio: usize,
    pub temp_dir: PathBuf,
    pub store: StoreKind,
    /// Concurrent tiles per raster; size this to the backend's capacity.
    pub tile_workers: usize,
    /// Rasters processed at once.
    pub raster_workers: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            manifest: PathBuf::from("slides.txt"),
            class_count: 2,
            output_dir: PathBuf::from("./result"),
            level: 1,
            center_size: 2000,
            border_size: 100,
            keep_temp: false,
            post_processing: false,
            filter_kernel: 9,
            thumbnail_ratio: 10,
            temp_dir: PathBuf::from("./temp"),
            store: StoreKind::Png,
            tile_workers: 4,
            raster_workers: 1,
        }
    }
}

impl RunConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        load_json(path)
    }

    pub fn tile_size(&self) -> TileSize {
        TileSize::new(self.center_size, self.border_size)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::Invalid(msg));
        if self.class_count < 2 {
            return fail(format!("class_count must be >= 2, got {}", self.class_count));
        }
        if self.center_size == 0 {
            return fail("center_size must be positive".into());
        }
        if self.post_processing && (self.filter_kernel == 0 || self.filter_kernel % 2 == 0) {
            return fail(format!("filter_kernel must be a positive odd size, got {}", self.filter_kernel));
        }
        if self.thumbnail_ratio == 0 {
            return fail("thumbnail_ratio must be positive".into());
        }
        if self.tile_workers == 0 || self.raster_workers == 0 {
            return fail("worker counts must be positive".into());
        }
        Ok(())
    }
}

/// Connection settings of the remote inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub model_name: String,
    /// Request tensor name.
    pub input_key: String,
    /// Response tensor name.
    pub output_key: String,
    /// Deadline of one inference call; 0 disables it.
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9000,
            model_name: "stomach".into(),
            input_key: "output".into(),
            output_key: "output".into(),
            timeout_secs: 1000,
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl BackendConfig {
    pub const HOST_VAR: &'static str = "TF_SERVING_HOST";
    pub const PORT_VAR: &'static str = "TF_SERVING_PORT";

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        load_json(path)
    }

    /// Override host and port from `TF_SERVING_HOST` / `TF_SERVING_PORT`.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_vars(|name| std::env::var(name).ok())
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(host) = var(Self::HOST_VAR).filter(|h| !h.is_empty()) {
            self.host = host;
        }
        if let Some(port) = var(Self::PORT_VAR) {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{} is not a port: {port:?}", Self::PORT_VAR)))?;
        }
        Ok(self)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            timeout: self.timeout(),
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}
