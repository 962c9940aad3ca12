//! Whole-slide inference CLI: tiles every raster in a manifest, runs each
//! tile through a TF Serving model and writes one prediction thumbnail per
//! raster.
//!
//! Settings come from defaults, then the optional JSON files, then flags.

mod tf_serving;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tiler_core::orchestrator::store_for;
use tiler_core::slide::ImageSlideOpener;
use tiler_core::{BackendConfig, GuardedBackend, Pipeline, RasterStatus, RunConfig, StoreKind};
use tracing::{error, info, warn};

use crate::tf_serving::TfServingBackend;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "slide-infer", about = "Tiled segmentation of whole-slide rasters into prediction thumbnails")]
struct Args {
    /// Directory the manifest entries are relative to
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Newline-delimited list of raster files
    #[arg(long)]
    data_list: Option<PathBuf>,

    /// Number of classes the model predicts (>= 2)
    #[arg(long)]
    class_num: Option<u8>,

    /// Directory for prediction thumbnails
    #[arg(long)]
    result_dir: Option<PathBuf>,

    /// Pyramid level to analyse
    #[arg(long)]
    use_level: Option<usize>,

    /// JSON run config; flags override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON backend config; flags and TF_SERVING_HOST/PORT override it
    #[arg(long)]
    backend: Option<PathBuf>,

    #[arg(long)]
    center_size: Option<usize>,

    #[arg(long)]
    border_size: Option<usize>,

    #[arg(long)]
    thumbnail_ratio: Option<usize>,

    /// Keep per-tile PNGs after a raster completes
    #[arg(long)]
    keep_temp: bool,

    /// Denoise each tile with an elliptical open + close
    #[arg(long)]
    post_process: bool,

    #[arg(long)]
    filter_kernel: Option<usize>,

    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Temporary tile store: memory or png
    #[arg(long, value_parser = parse_store)]
    store: Option<StoreKind>,

    /// Concurrent tiles per raster
    #[arg(long)]
    tile_workers: Option<usize>,

    /// Rasters processed at once
    #[arg(long)]
    raster_workers: Option<usize>,

    #[arg(long)]
    model_name: Option<String>,
}

fn parse_store(s: &str) -> Result<StoreKind, String> {
    match s {
        "memory" => Ok(StoreKind::Memory),
        "png" => Ok(StoreKind::Png),
        other => Err(format!("unknown store `{other}`, expected memory or png")),
    }
}

// ── Config assembly ──────────────────────────────────────────────────────────

fn run_config(args: &Args) -> Result<RunConfig> {
    let mut cfg = match &args.config {
        Some(path) => RunConfig::from_json_file(path)?,
        None => RunConfig::default(),
    };
    macro_rules! apply {
        ($($flag:ident => $field:ident),* $(,)?) => {
            $(if let Some(v) = args.$flag.clone() { cfg.$field = v; })*
        };
    }
    apply! {
        data_dir => source_dir,
        data_list => manifest,
        class_num => class_count,
        result_dir => output_dir,
        use_level => level,
        center_size => center_size,
        border_size => border_size,
        thumbnail_ratio => thumbnail_ratio,
        filter_kernel => filter_kernel,
        temp_dir => temp_dir,
        store => store,
        tile_workers => tile_workers,
        raster_workers => raster_workers,
    }
    cfg.keep_temp |= args.keep_temp;
    cfg.post_processing |= args.post_process;
    cfg.validate()?;
    Ok(cfg)
}

fn backend_config(args: &Args) -> Result<BackendConfig> {
    let mut cfg = match &args.backend {
        Some(path) => BackendConfig::from_json_file(path)?,
        None => BackendConfig::default(),
    };
    if let Some(model) = &args.model_name {
        cfg.model_name = model.clone();
    }
    Ok(cfg.with_env()?)
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<ExitCode> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let run = run_config(&args).context("invalid run configuration")?;
    let backend_cfg = backend_config(&args).context("invalid backend configuration")?;
    info!(
        host = %backend_cfg.host,
        port = backend_cfg.port,
        model = %backend_cfg.model_name,
        "using inference service"
    );

    let client = TfServingBackend::new(&backend_cfg).context("cannot build HTTP client")?;
    let backend = GuardedBackend::new(Arc::new(client), &backend_cfg.model_name, backend_cfg.retry_policy());
    let store = store_for(&run);
    let pipeline = Pipeline::new(run, Arc::new(ImageSlideOpener), backend, store)?;

    let manifest = pipeline.config().manifest.clone();
    let summary = pipeline
        .run_manifest()
        .with_context(|| format!("cannot read manifest {}", manifest.display()))?;

    for outcome in &summary.outcomes {
        let secs = outcome.elapsed.as_secs_f64();
        match &outcome.status {
            RasterStatus::Written(path) => info!("{:<40} written  {:>8.1}s  {}", outcome.entry, secs, path.display()),
            RasterStatus::Skipped(reason) => warn!("{:<40} skipped  {reason}", outcome.entry),
            RasterStatus::Failed { kind, message } => error!("{:<40} failed   {kind:?}: {message}", outcome.entry),
        }
    }
    info!(
        written = summary.written(),
        skipped = summary.skipped(),
        failed = summary.failed(),
        "batch finished"
    );

    Ok(if summary.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "slide-infer",
            "--class-num",
            "3",
            "--center-size",
            "500",
            "--store",
            "memory",
            "--post-process",
        ]);
        let cfg = run_config(&args).unwrap();
        assert_eq!(cfg.class_count, 3);
        assert_eq!(cfg.center_size, 500);
        assert_eq!(cfg.border_size, 100);
        assert_eq!(cfg.store, StoreKind::Memory);
        assert!(cfg.post_processing);
    }

    #[test]
    fn single_class_is_rejected() {
        let args = Args::parse_from(["slide-infer", "--class-num", "1"]);
        assert!(run_config(&args).is_err());
    }
}
