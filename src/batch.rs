// src/batch.rs
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

use crate::io::{write_json, JsonExporter, PngRenderer, SceneCatalog};
use crate::io::adapter::{ExportFormat, Exporter, RasterEncoding, Visualizer};
use crate::pipeline::{
    ExportSettings, IndexOperation, Pipeline, PipelineReport, PipelineSettings, RenderSettings,
};
use crate::processing::indices::IndexSpec;
use crate::region::Region;

#[derive(Deserialize, Serialize, Debug)]
pub struct BatchConfig {
    #[serde(default)]
    pub global: GlobalParams,
    pub catalog: CatalogConfig,
    pub region: RegionConfig,
    pub pipeline: PipelineSettings,
    pub operations: Vec<Operation>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct GlobalParams {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub float: bool,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: i32,
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default)]
    pub pretty: bool,
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            float: false,
            scale_factor: default_scale_factor(),
            format: ExportFormat::default(),
            pretty: false,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_scale_factor() -> i32 {
    10000
}

/// Scene files to load, either listed or every `*.json` in a directory
#[derive(Deserialize, Serialize, Debug)]
pub struct CatalogConfig {
    #[serde(default)]
    pub scenes: Vec<PathBuf>,
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub bands: Option<Vec<String>>,
}

/// Polygons as rings of `[x, y]`; the first ring of each is the exterior
#[derive(Deserialize, Serialize, Debug)]
pub struct RegionConfig {
    pub crs: String,
    pub polygons: Vec<Vec<Vec<[f64; 2]>>>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct Operation {
    pub index: IndexSpec,
    /// Write the index raster, file name defaults to `<INDEX>_Image_Export`
    #[serde(default)]
    pub output: Option<String>,
    pub float: Option<bool>,
    pub scale_factor: Option<i32>,
    #[serde(default)]
    pub render: Option<RenderSettings>,
}

impl Operation {
    fn to_index_operation(&self, global: &GlobalParams) -> IndexOperation {
        // Get parameters, with operation-specific overrides
        let float = self.float.unwrap_or(global.float);
        let scale_factor = self.scale_factor.unwrap_or(global.scale_factor);

        IndexOperation {
            index: self.index.clone(),
            render: self.render.clone(),
            export: self.output.as_ref().map(|description| ExportSettings {
                description: Some(description.clone()),
                format: global.format,
                encoding: if float {
                    RasterEncoding::Float32
                } else {
                    RasterEncoding::Int16
                },
                scale_factor: Some(scale_factor),
                ..Default::default()
            }),
        }
    }
}

pub fn load_config(config_path: &Path) -> Result<BatchConfig> {
    let config_content = fs::read_to_string(config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let config: BatchConfig = serde_json::from_str(&config_content)
        .with_context(|| format!("parsing {}", config_path.display()))?;
    Ok(config)
}

fn load_catalog(config: &CatalogConfig) -> Result<SceneCatalog> {
    let catalog = match &config.dir {
        Some(dir) => SceneCatalog::from_dir(dir)
            .with_context(|| format!("loading scenes from {}", dir.display()))?,
        None => SceneCatalog::from_paths(&config.scenes).context("loading scenes")?,
    };
    Ok(match &config.bands {
        Some(bands) => catalog.select_bands(bands.iter().cloned()),
        None => catalog,
    })
}

fn exporter(global: &GlobalParams) -> Result<Box<dyn Exporter>> {
    let exporter: Box<dyn Exporter> = match global.format {
        ExportFormat::Json => {
            Box::new(JsonExporter::new(&global.output_dir).pretty(global.pretty))
        }
        #[cfg(feature = "gdal")]
        ExportFormat::GeoTiff => Box::new(crate::io::gdal_io::GeoTiffExporter::new(
            &global.output_dir,
        )),
        #[cfg(not(feature = "gdal"))]
        ExportFormat::GeoTiff => anyhow::bail!("GeoTIFF export needs the `gdal` feature"),
    };
    Ok(exporter)
}

pub fn process_batch(config_path: &Path, report_path: Option<&Path>) -> Result<PipelineReport> {
    let config = load_config(config_path)?;

    let region = Region::from_rings(&config.region.polygons, config.region.crs.clone())
        .context("building region")?;
    let catalog = load_catalog(&config.catalog)?;
    let operations = config
        .operations
        .iter()
        .map(|op| op.to_index_operation(&config.global))
        .collect();

    info!(
        "Starting batch processing with {} operations...",
        config.operations.len()
    );

    let exporter = exporter(&config.global)?;
    let renderer = PngRenderer::new(&config.global.output_dir);
    let pipeline = Pipeline::new(region, config.pipeline, operations);
    let report = pipeline.run(
        &catalog,
        Some(exporter.as_ref()),
        Some(&renderer as &dyn Visualizer),
    )?;

    for (i, index) in report.indices.iter().enumerate() {
        info!(
            "[{}/{}] {} = {}: {} pixels, mean {:?}",
            i + 1,
            report.indices.len(),
            index.name,
            index.formula,
            index.statistics.pixel_count,
            index.statistics.mean
        );
    }

    if let Some(path) = report_path {
        write_json(path, &report, true)
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!("report written to {}", path.display());
    }

    info!("Batch processing complete!");
    Ok(report)
}
