//! Run orchestrator: plans, processes and assembles every raster of a batch.
//!
//! Per raster:
//! 1. Open the slide and read the analysed level's dimensions.
//! 2. Plan footprints and check the context patch fits.
//! 3. Expand + process every footprint on the tile pool, storing results.
//! 4. After all tiles finish, assemble the mosaic and write the thumbnail.
//! 5. Release the raster's temporary results.
//!
//! Rasters run on their own pool, bounded separately from the tile pool.
//! A failing raster is reported and never stops the rest of the batch.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::backend::GuardedBackend;
use crate::config::{RunConfig, StoreKind};
use crate::error::{ConfigError, ErrorKind, RasterError, SourceError};
use crate::morphology::Denoiser;
use crate::mosaic::assemble;
use crate::output::ThumbnailWriter;
use crate::planner::TileLayout;
use crate::processor::TileProcessor;
use crate::slide::{raster_name, PixelReader, SlideOpener};
use crate::store::{MemoryTileStore, PngTileStore, TileKey, TileStore};

/// Shared flag that stops a run from issuing new tile requests.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RasterStatus {
    Written(PathBuf),
    Skipped(String),
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RasterOutcome {
    pub entry: String,
    pub status: RasterStatus,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub outcomes: Vec<RasterOutcome>,
}

impl BatchSummary {
    pub fn written(&self) -> usize {
        self.count(|s| matches!(s, RasterStatus::Written(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, RasterStatus::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, RasterStatus::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&RasterStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

/// Read a manifest: one raster path per line, blank lines ignored.
pub fn read_manifest(path: &Path) -> io::Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(text.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect())
}

/// Build the temporary store selected by `config`.
pub fn store_for(config: &RunConfig) -> Arc<dyn TileStore> {
    match config.store {
        StoreKind::Memory => Arc::new(MemoryTileStore::new()),
        StoreKind::Png => Arc::new(PngTileStore::new(&config.temp_dir, config.keep_temp)),
    }
}

fn build_pool(threads: usize, prefix: &'static str) -> Result<rayon::ThreadPool, ConfigError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("{prefix}-{i}"))
        .build()
        .map_err(|e| ConfigError::Invalid(format!("cannot build {prefix} pool: {e}")))
}

/// Output and store name for every entry of a batch.
///
/// An entry keeps its file stem when no other entry shares it; otherwise it
/// is named after its relative path (`a/slide.png` becomes `a_slide`). An
/// entry whose name is still taken is a duplicate and gets `Err` naming the
/// entry that claimed it first.
pub fn raster_ids(entries: &[String]) -> Vec<Result<String, String>> {
    let stems: Vec<String> = entries.iter().map(|e| raster_name(Path::new(e))).collect();
    let mut stem_count: HashMap<&str, usize> = HashMap::new();
    for stem in &stems {
        *stem_count.entry(stem.as_str()).or_default() += 1;
    }

    let mut claimed: HashMap<String, &str> = HashMap::new();
    entries
        .iter()
        .zip(&stems)
        .map(|(entry, stem)| {
            let id = if stem_count[stem.as_str()] == 1 { stem.clone() } else { path_id(entry) };
            match claimed.get(&id) {
                Some(first) => Err((*first).to_string()),
                None => {
                    claimed.insert(id.clone(), entry.as_str());
                    Ok(id)
                }
            }
        })
        .collect()
}

/// Relative path without extension, components joined by `_`.
fn path_id(entry: &str) -> String {
    Path::new(entry)
        .with_extension("")
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("_")
}

pub struct Pipeline {
    config: RunConfig,
    opener: Arc<dyn SlideOpener>,
    backend: GuardedBackend,
    store: Arc<dyn TileStore>,
    writer: ThumbnailWriter,
    processor: TileProcessor,
    tile_pool: rayon::ThreadPool,
    raster_pool: rayon::ThreadPool,
    cancel: CancelToken,
    /// Cancel flags of the rasters currently running, by raster id.
    active: Mutex<HashMap<String, CancelToken>>,
}

impl Pipeline {
    /// The backend is capped at `tile_workers` concurrent calls.
    pub fn new(
        config: RunConfig,
        opener: Arc<dyn SlideOpener>,
        backend: GuardedBackend,
        store: Arc<dyn TileStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let writer = ThumbnailWriter::new(&config.output_dir, config.class_count)?;
        let denoiser = config.post_processing.then(|| Denoiser::new(config.filter_kernel));
        let processor = TileProcessor::new(config.tile_size(), denoiser);
        let tile_pool = build_pool(config.tile_workers, "tile")?;
        let raster_pool = build_pool(config.raster_workers, "raster")?;
        let backend = backend.with_capacity(config.tile_workers);
        Ok(Self {
            config,
            opener,
            backend,
            store,
            writer,
            processor,
            tile_pool,
            raster_pool,
            cancel: CancelToken::default(),
            active: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Batch-wide token: cancelling it stops every running and later raster.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Cancel one running raster. Returns false when no raster with that id
    /// is running.
    pub fn cancel_raster(&self, raster_id: &str) -> bool {
        match self.active.lock().get(raster_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run every raster listed in the configured manifest.
    pub fn run_manifest(&self) -> io::Result<BatchSummary> {
        let entries = read_manifest(&self.config.manifest)?;
        info!(manifest = %self.config.manifest.display(), rasters = entries.len(), "loaded manifest");
        Ok(self.run_batch(&entries))
    }

    /// Run `entries` (paths relative to the source directory). Outcomes keep
    /// the entry order.
    pub fn run_batch(&self, entries: &[String]) -> BatchSummary {
        let ids = raster_ids(entries);
        let outcomes = self
            .raster_pool
            .install(|| entries.par_iter().zip(ids).map(|(e, id)| self.run_entry(e, id)).collect());
        BatchSummary { outcomes }
    }

    fn run_entry(&self, entry: &str, id: Result<String, String>) -> RasterOutcome {
        let start = Instant::now();
        let result = match id {
            Ok(id) => self.run_registered(entry, &id),
            Err(first) => {
                warn!(entry, first = %first, "duplicate manifest entry, skipping");
                let status = RasterStatus::Skipped(format!("same raster name as `{first}`"));
                return RasterOutcome { entry: entry.to_string(), status, elapsed: start.elapsed() };
            }
        };
        let status = match result {
            Ok(path) => {
                info!(entry, path = %path.display(), elapsed_ms = start.elapsed().as_millis() as u64, "prediction saved");
                RasterStatus::Written(path)
            }
            Err(RasterError::Source(SourceError::UnsupportedFormat(what))) => {
                warn!(entry, "format not supported yet, skipping");
                RasterStatus::Skipped(format!("unsupported format: {what}"))
            }
            Err(e) => {
                error!(entry, kind = ?e.kind(), error = %e, "raster failed");
                RasterStatus::Failed { kind: e.kind(), message: e.to_string() }
            }
        };
        RasterOutcome { entry: entry.to_string(), status, elapsed: start.elapsed() }
    }

    /// Run under `id` with a token reachable through [`Self::cancel_raster`].
    fn run_registered(&self, entry: &str, id: &str) -> Result<PathBuf, RasterError> {
        let token = CancelToken::default();
        self.active.lock().insert(id.to_string(), token.clone());
        let result = self.execute(entry, id, &token);
        self.active.lock().remove(id);
        result
    }

    /// Run one raster end to end, named after its file stem, and return the
    /// thumbnail path.
    pub fn run_raster(&self, entry: &str) -> Result<PathBuf, RasterError> {
        let id = raster_name(Path::new(entry));
        self.run_registered(entry, &id)
    }

    /// Like [`Self::run_raster`], stopped early when `cancel` fires.
    pub fn run_raster_with(&self, entry: &str, cancel: &CancelToken) -> Result<PathBuf, RasterError> {
        let id = raster_name(Path::new(entry));
        self.execute(entry, &id, cancel)
    }

    fn stopped(&self, cancel: &CancelToken) -> bool {
        self.cancel.is_cancelled() || cancel.is_cancelled()
    }

    fn execute(&self, entry: &str, id: &str, cancel: &CancelToken) -> Result<PathBuf, RasterError> {
        if self.stopped(cancel) {
            return Err(RasterError::Cancelled);
        }
        let path = self.config.source_dir.join(entry);
        info!(raster = id, path = %path.display(), "analyzing");

        let reader = self.opener.open(&path)?;
        let dims = reader.level_dimensions(self.config.level)?;
        let layout = TileLayout::new(dims, self.config.tile_size())?;
        info!(
            raster = id,
            width = dims.width,
            height = dims.height,
            tiles = layout.len(),
            "planned tiles"
        );

        let raster_id: Arc<str> = Arc::from(id);
        let out = self
            .process_tiles(&raster_id, reader.as_ref(), &layout, cancel)
            .and_then(|()| {
                if self.stopped(cancel) {
                    return Err(RasterError::Cancelled);
                }
                info!(raster = id, "assembling thumbnail");
                let results = self.store.results(id)?;
                let mosaic = assemble(&results, self.config.thumbnail_ratio)?;
                Ok(self.writer.write(id, &mosaic)?)
            })
            .inspect_err(|e| self.discard(id, e))?;

        self.store.release(id)?;
        Ok(out)
    }

    /// Process every footprint of `layout` on the tile pool. Returns once all
    /// started tiles have finished; the first failure or a cancel stops new
    /// tiles.
    fn process_tiles(
        &self,
        raster_id: &Arc<str>,
        reader: &dyn PixelReader,
        layout: &TileLayout,
        cancel: &CancelToken,
    ) -> Result<(), RasterError> {
        let total = layout.len();
        let done = AtomicUsize::new(0);
        let level = self.config.level;

        self.tile_pool.install(|| {
            layout.footprints.par_iter().try_for_each(|footprint| {
                if self.stopped(cancel) {
                    return Err(RasterError::Cancelled);
                }
                let window = layout.window(footprint);
                debug!(raster = %raster_id, ?footprint, ?window, "processing tile");

                let result = self.processor.process(
                    footprint,
                    &window,
                    |req| reader.read_region(level, req.x, req.y, req.side, req.side),
                    |patch| self.backend.predict(patch),
                )?;
                self.store.put(TileKey::new(raster_id, result.grid_x, result.grid_y), result.pixels)?;

                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                info!(raster = %raster_id, "[{n}/{total}] tiles processed");
                Ok(())
            })
        })
    }

    /// Drop a failed raster's partial results. After a storage failure a
    /// file-backed store keeps them on disk for inspection.
    fn discard(&self, raster_id: &str, cause: &RasterError) {
        if cause.kind() == ErrorKind::Storage && self.store.persists() {
            warn!(raster = raster_id, "keeping temporary tiles after storage failure");
            return;
        }
        if let Err(e) = self.store.release(raster_id) {
            warn!(raster = raster_id, error = %e, "cannot discard temporary tiles");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InferenceBackend, RetryPolicy};
    use crate::class_map::ClassMap;
    use crate::error::BackendError;
    use crate::slide::ImageSlide;
    use image::RgbImage;
    use std::thread;
    use tempfile::TempDir;

    /// Serves in-memory images keyed by entry; anything else is unsupported.
    struct FakeOpener(HashMap<String, RgbImage>);

    impl SlideOpener for FakeOpener {
        fn open(&self, path: &Path) -> Result<Box<dyn PixelReader>, SourceError> {
            match self.0.iter().find(|(entry, _)| path.ends_with(entry.as_str())) {
                Some((_, img)) => Ok(Box::new(ImageSlide::from_image(img.clone()))),
                None => Err(SourceError::UnsupportedFormat(path.display().to_string())),
            }
        }
    }

    /// Labels each pixel with its red channel.
    struct RedChannel;

    impl InferenceBackend for RedChannel {
        fn predict(&self, patch: &RgbImage, _model: &str) -> Result<ClassMap, BackendError> {
            let (w, h) = patch.dimensions();
            Ok(ClassMap::from_fn(w as usize, h as usize, |r, c| patch.get_pixel(c as u32, r as u32)[0]))
        }
    }

    /// Hangs on any patch whose top-left pixel is marked with blue = 9.
    struct HangsOnMarkedTile;

    impl InferenceBackend for HangsOnMarkedTile {
        fn predict(&self, patch: &RgbImage, model: &str) -> Result<ClassMap, BackendError> {
            if patch.get_pixel(0, 0)[2] == 9 {
                std::thread::sleep(Duration::from_millis(400));
            }
            RedChannel.predict(patch, model)
        }
    }

    /// Cancels `token` once it has served `after` calls.
    struct CancelsAfter {
        token: CancelToken,
        after: usize,
        calls: AtomicUsize,
    }

    impl InferenceBackend for CancelsAfter {
        fn predict(&self, patch: &RgbImage, model: &str) -> Result<ClassMap, BackendError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
                self.token.cancel();
            }
            RedChannel.predict(patch, model)
        }
    }

    /// Slow on class-0 patches, counting them; instant otherwise.
    #[derive(Default)]
    struct SlowOnBackground {
        background_calls: AtomicUsize,
    }

    impl InferenceBackend for SlowOnBackground {
        fn predict(&self, patch: &RgbImage, model: &str) -> Result<ClassMap, BackendError> {
            if patch.get_pixel(0, 0)[0] == 0 {
                self.background_calls.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(30));
            }
            RedChannel.predict(patch, model)
        }
    }

    fn uniform(w: u32, h: u32, class: u8) -> RgbImage {
        RgbImage::from_pixel(w, h, image::Rgb([class, 0, 0]))
    }

    /// Two-class image: left half class 0, right half class 1.
    fn halves(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, _| image::Rgb([u8::from(x >= w / 2), 0, 0]))
    }

    fn config(dir: &TempDir) -> RunConfig {
        RunConfig {
            source_dir: dir.path().join("slides"),
            output_dir: dir.path().join("result"),
            temp_dir: dir.path().join("temp"),
            level: 0,
            center_size: 40,
            border_size: 5,
            thumbnail_ratio: 4,
            tile_workers: 3,
            raster_workers: 2,
            store: StoreKind::Memory,
            ..RunConfig::default()
        }
    }

    fn pipeline(cfg: RunConfig, images: Vec<(&str, RgbImage)>, backend: Arc<dyn InferenceBackend>) -> Pipeline {
        let opener = FakeOpener(images.into_iter().map(|(k, v)| (k.to_string(), v)).collect());
        let policy = RetryPolicy { max_attempts: 2, timeout: Some(Duration::from_millis(100)), backoff: Duration::ZERO };
        let store = store_for(&cfg);
        Pipeline::new(cfg, Arc::new(opener), GuardedBackend::new(backend, "test", policy), store).unwrap()
    }

    #[test]
    fn writes_thumbnail_matching_source_layout() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(config(&dir), vec![("a.tif", halves(100, 90))], Arc::new(RedChannel));
        let path = p.run_raster("a.tif").unwrap();
        assert!(path.ends_with("a_prediction_thumbnail.png"));

        let thumb = image::open(&path).unwrap().into_luma8();
        assert_eq!(thumb.dimensions(), (25, 22));
        for y in 0..22 {
            for x in 0..25 {
                let expected = if x * 4 + 2 >= 50 { 255 } else { 0 };
                assert_eq!(thumb.get_pixel(x, y).0[0], expected, "thumbnail pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn batch_continues_past_unsupported_and_failed_rasters() {
        let dir = TempDir::new().unwrap();
        let images = vec![("ok.tif", halves(100, 100)), ("tiny.tif", halves(30, 30))];
        let p = pipeline(config(&dir), images, Arc::new(RedChannel));
        let entries: Vec<String> = ["ok.tif", "scan.svs", "tiny.tif"].iter().map(|s| s.to_string()).collect();
        let summary = p.run_batch(&entries);

        assert_eq!(summary.outcomes.len(), 3);
        assert!(matches!(summary.outcomes[0].status, RasterStatus::Written(_)));
        assert!(matches!(summary.outcomes[1].status, RasterStatus::Skipped(_)));
        assert!(matches!(
            summary.outcomes[2].status,
            RasterStatus::Failed { kind: ErrorKind::Planning, .. }
        ));
        assert_eq!((summary.written(), summary.skipped(), summary.failed()), (1, 1, 1));
        assert!(!summary.is_success());
    }

    #[test]
    fn timed_out_tile_fails_raster_without_thumbnail() {
        let dir = TempDir::new().unwrap();
        let cfg = RunConfig { center_size: 50, border_size: 0, ..config(&dir) };
        // 100×100 → four 50px tiles; mark the tile at (50, 50).
        let mut img = halves(100, 100);
        img.put_pixel(50, 50, image::Rgb([1, 0, 9]));
        let p = pipeline(cfg, vec![("slow.tif", img)], Arc::new(HangsOnMarkedTile));

        let err = p.run_raster("slow.tif").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InferenceBackend);
        assert!(
            matches!(err, RasterError::Tile(crate::error::TileError::Inference { grid_x: 50, grid_y: 50, attempts: 2, .. })),
            "got {err}"
        );
        assert!(!p.writer.path_for("slow").exists(), "no partial thumbnail");
        assert!(p.store.keys("slow").is_empty(), "partial tiles discarded");
    }

    #[test]
    fn cancelled_run_issues_no_tiles() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(config(&dir), vec![("a.tif", halves(100, 100))], Arc::new(RedChannel));
        p.cancel_token().cancel();
        let err = p.run_raster("a.tif").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn png_store_is_cleaned_after_success() {
        let dir = TempDir::new().unwrap();
        let cfg = RunConfig { store: StoreKind::Png, ..config(&dir) };
        let temp = cfg.temp_dir.clone();
        let p = pipeline(cfg, vec![("b.png", halves(80, 80))], Arc::new(RedChannel));
        p.run_raster("b.png").unwrap();
        assert!(!temp.join("b").exists());
    }

    #[test]
    fn manifest_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let list = dir.path().join("list.txt");
        fs::write(&list, "a.tif\n\n  b.svs \n").unwrap();
        assert_eq!(read_manifest(&list).unwrap(), vec!["a.tif".to_string(), "b.svs".to_string()]);
    }

    #[test]
    fn ids_fall_back_to_paths_for_shared_stems() {
        let entries: Vec<String> =
            ["x/one.tif", "two.tif", "./y/one.tif", "two.tif"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            raster_ids(&entries),
            vec![
                Ok("x_one".to_string()),
                Ok("two".to_string()),
                Ok("y_one".to_string()),
                Err("two.tif".to_string()),
            ]
        );
    }

    #[test]
    fn same_stem_in_two_folders_gets_two_thumbnails() {
        let dir = TempDir::new().unwrap();
        let images = vec![("a/slide.png", halves(80, 80)), ("b/slide.png", uniform(80, 80, 1))];
        let p = pipeline(config(&dir), images, Arc::new(RedChannel));
        let entries: Vec<String> =
            ["a/slide.png", "b/slide.png", "a/slide.png"].iter().map(|s| s.to_string()).collect();
        let summary = p.run_batch(&entries);

        let written: Vec<&PathBuf> = summary
            .outcomes
            .iter()
            .filter_map(|o| match &o.status {
                RasterStatus::Written(path) => Some(path),
                _ => None,
            })
            .collect();
        assert_eq!(written.len(), 2, "outcomes: {:?}", summary.outcomes);
        assert!(written[0].ends_with("a_slide_prediction_thumbnail.png"));
        assert!(written[1].ends_with("b_slide_prediction_thumbnail.png"));
        assert!(matches!(summary.outcomes[2].status, RasterStatus::Skipped(_)));

        let a = image::open(written[0]).unwrap().into_luma8();
        let b = image::open(written[1]).unwrap().into_luma8();
        assert_eq!(a.get_pixel(0, 0).0[0], 0, "left half of a is background");
        assert!(b.pixels().all(|px| px.0[0] == 255), "b never mixes with a");
    }

    #[test]
    fn cancelling_mid_run_discards_partial_tiles() {
        let dir = TempDir::new().unwrap();
        // 100×100 at center 20 → 25 tiles, processed one at a time.
        let cfg = RunConfig { center_size: 20, border_size: 0, tile_workers: 1, ..config(&dir) };
        let token = CancelToken::default();
        let backend = Arc::new(CancelsAfter { token: token.clone(), after: 2, calls: AtomicUsize::new(0) });
        let p = pipeline(cfg, vec![("c.tif", halves(100, 100))], backend.clone());

        let err = p.run_raster_with("c.tif", &token).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2, "no tile requested after the cancel");
        assert!(p.store.keys("c").is_empty(), "partial tiles discarded");
        assert!(!p.writer.path_for("c").exists());
    }

    #[test]
    fn cancel_raster_leaves_rest_of_batch_running() {
        let dir = TempDir::new().unwrap();
        // `a` has 100 slow tiles, `b` 16 fast ones.
        let cfg = RunConfig { center_size: 10, border_size: 0, tile_workers: 2, ..config(&dir) };
        let backend = Arc::new(SlowOnBackground::default());
        let images = vec![("a.tif", uniform(100, 100, 0)), ("b.tif", uniform(40, 40, 1))];
        let p = pipeline(cfg, images, backend.clone());
        let entries = vec!["a.tif".to_string(), "b.tif".to_string()];

        let summary = thread::scope(|s| {
            let run = s.spawn(|| p.run_batch(&entries));
            for _ in 0..300 {
                if backend.background_calls.load(Ordering::SeqCst) >= 2 {
                    break;
                }
                thread::sleep(Duration::from_millis(10));
            }
            assert!(p.cancel_raster("a"), "a is running");
            run.join().unwrap()
        });

        assert!(matches!(
            summary.outcomes[0].status,
            RasterStatus::Failed { kind: ErrorKind::Cancelled, .. }
        ));
        assert!(matches!(summary.outcomes[1].status, RasterStatus::Written(_)));
        assert!(backend.background_calls.load(Ordering::SeqCst) < 100);
        assert!(p.store.keys("a").is_empty());
        assert!(!p.cancel_raster("a"), "finished rasters are unregistered");
    }

    #[test]
    fn failed_thumbnail_write_releases_memory_store() {
        let dir = TempDir::new().unwrap();
        let blocked = dir.path().join("blocked");
        fs::write(&blocked, b"").unwrap();
        let cfg = RunConfig { output_dir: blocked, ..config(&dir) };
        let p = pipeline(cfg, vec![("a.tif", halves(80, 80))], Arc::new(RedChannel));

        let err = p.run_raster("a.tif").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(p.store.keys("a").is_empty(), "in-memory tiles are not kept");
    }

    #[test]
    fn failed_thumbnail_write_keeps_png_tiles() {
        let dir = TempDir::new().unwrap();
        let blocked = dir.path().join("blocked");
        fs::write(&blocked, b"").unwrap();
        let cfg = RunConfig { output_dir: blocked, store: StoreKind::Png, ..config(&dir) };
        let temp = cfg.temp_dir.clone();
        let p = pipeline(cfg, vec![("a.tif", halves(80, 80))], Arc::new(RedChannel));

        let err = p.run_raster("a.tif").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(p.store.keys("a").len(), 4);
        assert!(temp.join("a").exists(), "tiles left on disk for inspection");
    }
}
