// src/main.rs
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use log::{debug, info};
use rayon::ThreadPoolBuilder;
use serde::Serialize;

use spectral_stats::batch::process_batch;
use spectral_stats::cli::{Cli, Commands, IndexPreset};
use spectral_stats::io::{read_scene, read_scenes_parallel};
use spectral_stats::processing::expression::Binding;
use spectral_stats::processing::indices::{BandMapping, IndexSpec};
use spectral_stats::processing::{
    composite, compute_index, CloudMask, CompositeMode, Histogram, ZonalReducer, ZonalStatistics,
};
use spectral_stats::raster::RasterStack;
use spectral_stats::region::{PixelInclusion, Region};

#[derive(Serialize)]
struct IndexSummary {
    index: String,
    formula: String,
    scenes: usize,
    statistics: ZonalStatistics,
    #[serde(skip_serializing_if = "Option::is_none")]
    histogram: Option<Histogram>,
}

struct IndexArgs {
    scenes: Vec<PathBuf>,
    geotiffs: Vec<(String, PathBuf)>,
    index: Option<IndexPreset>,
    formula: Option<String>,
    name: String,
    bindings: Vec<(String, Binding)>,
    composite: CompositeMode,
    inclusion: PixelInclusion,
    percentiles: Vec<f64>,
    bucket_width: Option<f64>,
    reflectance_scale: Option<f64>,
    no_cloud_mask: bool,
}

#[cfg(feature = "gdal")]
fn read_geotiffs(bands: &[(String, PathBuf)]) -> Result<RasterStack> {
    spectral_stats::io::gdal_io::read_stack(bands).context("reading GeoTIFF bands")
}

#[cfg(not(feature = "gdal"))]
fn read_geotiffs(_bands: &[(String, PathBuf)]) -> Result<RasterStack> {
    Err(anyhow!("--geotiff needs the `gdal` feature"))
}

fn run_index(args: IndexArgs) -> Result<()> {
    let scenes = read_scenes_parallel(&args.scenes).context("reading scenes")?;
    let mut stacks: Vec<RasterStack> = scenes.into_iter().map(|scene| scene.stack).collect();
    if !args.geotiffs.is_empty() {
        stacks.push(read_geotiffs(&args.geotiffs)?);
    }
    let scene_count = stacks.len();

    let cloud_mask = CloudMask::sentinel2_scl();
    let stacks = stacks
        .into_iter()
        .map(|stack| {
            if !args.no_cloud_mask && stack.contains(&cloud_mask.band) {
                cloud_mask.apply(&stack)
            } else {
                Ok(stack)
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    let composite = composite(&stacks, args.composite)?;

    let index_spec = match (args.index, args.formula) {
        (Some(preset), _) => preset.spec(),
        (None, Some(formula)) => IndexSpec::Expression {
            name: args.name,
            formula,
            bindings: args.bindings.into_iter().collect(),
        },
        (None, None) => return Err(anyhow!("either --index or --formula is required")),
    };
    let calculator = index_spec.calculator(&BandMapping::default())?;
    let raster = compute_index(calculator.as_ref(), &composite, args.reflectance_scale)?;

    let spatial = composite.spatial();
    let extent = spatial.transform.extent(composite.rows(), composite.cols());
    let region = Region::from_rect(extent, spatial.crs.clone())?;

    let reducer = ZonalReducer::new(args.inclusion);
    let statistics = reducer.reduce_band(&raster, &region, &args.percentiles)?;
    let histogram = match args.bucket_width {
        Some(width) if !statistics.is_empty() => {
            Some(reducer.histogram(&raster, raster.mask(), &region, width)?)
        }
        _ => None,
    };

    let summary = IndexSummary {
        index: calculator.name().to_string(),
        formula: calculator.expression().formula.to_string(),
        scenes: scene_count,
        statistics,
        histogram,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder = Builder::from_env(Env::default().default_filter_or(if cli.verbose {
        "debug"
    } else {
        "info"
    }));
    builder.format_timestamp_secs();
    builder.init();

    if let Some(threads) = cli.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| anyhow!("Failed to build thread pool: {:?}", e))?;
        debug!("rayon pool: {threads} threads");
    }

    match cli.command {
        Commands::Batch { config, report } => {
            process_batch(&config, report.as_deref())?;
        }
        Commands::Index {
            scenes,
            geotiffs,
            index,
            formula,
            name,
            bindings,
            composite,
            inclusion,
            percentiles,
            bucket_width,
            reflectance_scale,
            no_cloud_mask,
        } => run_index(IndexArgs {
            scenes,
            geotiffs,
            index,
            formula,
            name,
            bindings,
            composite,
            inclusion,
            percentiles,
            bucket_width,
            reflectance_scale,
            no_cloud_mask,
        })?,
        Commands::Info { scene } => {
            let scene = read_scene(&scene)
                .with_context(|| format!("reading {}", scene.display()))?;
            info!(
                "{} acquired {} ({}% cloudy)",
                scene.id, scene.date, scene.cloudy_pixel_percentage
            );
            println!("{}", serde_json::to_string_pretty(&scene.stack.metadata())?);
        }
    }

    Ok(())
}
