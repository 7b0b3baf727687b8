// src/pipeline.rs
use std::path::PathBuf;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::io::adapter::{
    DateRange, ExportFormat, ExportRequest, Exporter, ImageSource, LayerStyle, RasterEncoding,
    VisBounds, Visualizer, DEFAULT_SCALE_FACTOR,
};
use crate::io::render::Rgb;
use crate::processing::indices::{BandMapping, IndexCalculator, IndexSpec};
use crate::processing::{
    composite, CloudMask, CompositeMode, Histogram, ParallelProcessor, ZonalReducer,
    ZonalStatistics,
};
use crate::raster::{BandRaster, RasterStack, StackMetadata};
use crate::region::{PixelInclusion, Region};

/// Whether band math runs on the composite or on every scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingOrder {
    #[default]
    CompositeFirst,
    IndexFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum HistogramSettings {
    Fixed {
        bucket_width: f64,
    },
    Auto {
        min_bucket_width: f64,
        max_buckets: usize,
    },
    Disabled,
}

impl Default for HistogramSettings {
    fn default() -> Self {
        HistogramSettings::Auto {
            min_bucket_width: 0.01,
            max_buckets: 256,
        }
    }
}

fn default_max_cloud_percent() -> f64 {
    30.0
}

fn default_cloud_mask() -> Option<CloudMask> {
    Some(CloudMask::sentinel2_scl())
}

fn default_percentiles() -> Vec<f64> {
    vec![10.0, 25.0, 50.0, 75.0, 90.0]
}

/// Processing knobs shared by every index of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub dates: DateRange,
    #[serde(default = "default_max_cloud_percent")]
    pub max_cloud_percent: f64,
    /// `null` disables cloud masking
    #[serde(default = "default_cloud_mask")]
    pub cloud_mask: Option<CloudMask>,
    #[serde(default)]
    pub composite: CompositeMode,
    #[serde(default)]
    pub order: ProcessingOrder,
    /// Digital number to reflectance divisor for indices with additive
    /// constants (10000 for Sentinel-2 L2A)
    #[serde(default)]
    pub reflectance_scale: Option<f64>,
    #[serde(default)]
    pub bands: BandMapping,
    #[serde(default)]
    pub inclusion: PixelInclusion,
    #[serde(default = "default_percentiles")]
    pub percentiles: Vec<f64>,
    #[serde(default)]
    pub histogram: HistogramSettings,
    /// Worker threads for index jobs, defaults to the CPU count
    #[serde(default)]
    pub workers: Option<usize>,
}

impl PipelineSettings {
    pub fn new(dates: DateRange) -> Self {
        Self {
            dates,
            max_cloud_percent: default_max_cloud_percent(),
            cloud_mask: default_cloud_mask(),
            composite: CompositeMode::default(),
            order: ProcessingOrder::default(),
            reflectance_scale: None,
            bands: BandMapping::default(),
            inclusion: PixelInclusion::default(),
            percentiles: default_percentiles(),
            histogram: HistogramSettings::default(),
            workers: None,
        }
    }
}

/// Layer styling for one index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default)]
    pub layer_name: Option<String>,
    #[serde(default)]
    pub bounds: VisBounds,
    pub palette: Vec<Rgb>,
}

/// Export options; anything left out follows the raster's own grid
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExportSettings {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub resolution_m: Option<f64>,
    #[serde(default)]
    pub crs: Option<String>,
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default)]
    pub encoding: RasterEncoding,
    #[serde(default)]
    pub scale_factor: Option<i32>,
}

impl ExportSettings {
    pub fn request_for(&self, raster: &BandRaster, inclusion: PixelInclusion) -> ExportRequest {
        ExportRequest {
            description: self
                .description
                .clone()
                .unwrap_or_else(|| format!("{}_Image_Export", raster.name())),
            resolution_m: self
                .resolution_m
                .unwrap_or_else(|| raster.spatial().resolution()),
            crs: self
                .crs
                .clone()
                .unwrap_or_else(|| raster.spatial().crs.clone()),
            format: self.format,
            encoding: self.encoding,
            scale_factor: self.scale_factor.unwrap_or(DEFAULT_SCALE_FACTOR),
            inclusion,
        }
    }
}

/// One index to compute, plus what to do with it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOperation {
    pub index: IndexSpec,
    #[serde(default)]
    pub render: Option<RenderSettings>,
    #[serde(default)]
    pub export: Option<ExportSettings>,
}

impl IndexOperation {
    pub fn new(index: IndexSpec) -> Self {
        Self {
            index,
            render: None,
            export: None,
        }
    }
}

/// Per-index section of the report
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub name: String,
    pub formula: String,
    pub statistics: ZonalStatistics,
    pub histogram: Option<Histogram>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exported: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendered: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub scenes: usize,
    pub composite: StackMetadata,
    pub indices: Vec<IndexReport>,
}

/// In-memory result of [`Pipeline::process`]
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Composite with every index band appended
    pub stack: RasterStack,
    pub indices: Vec<BandRaster>,
    pub report: PipelineReport,
}

/// End-to-end orchestration:
/// fetch -> cloud mask -> composite -> index band math -> zonal reduction
/// -> export / render. Scenes may instead be indexed one by one and the
/// index rasters composited, which is how per-image index maps followed by
/// a temporal median behave.
pub struct Pipeline {
    region: Region,
    settings: PipelineSettings,
    operations: Vec<IndexOperation>,
}

impl Pipeline {
    pub fn new(region: Region, settings: PipelineSettings, operations: Vec<IndexOperation>) -> Self {
        Self {
            region,
            settings,
            operations,
        }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Fetch, process, then hand results to the adapters.
    pub fn run(
        &self,
        source: &dyn ImageSource,
        exporter: Option<&dyn Exporter>,
        visualizer: Option<&dyn Visualizer>,
    ) -> Result<PipelineReport> {
        let scenes = source.fetch_images(
            &self.region,
            &self.settings.dates,
            self.settings.max_cloud_percent,
        )?;
        let mut output = self.process(&scenes)?;

        for ((op, raster), entry) in self
            .operations
            .iter()
            .zip(&output.indices)
            .zip(output.report.indices.iter_mut())
        {
            if let Some(export) = &op.export {
                match exporter {
                    Some(exporter) => {
                        let request = export.request_for(raster, self.settings.inclusion);
                        entry.exported =
                            Some(exporter.export_raster(raster, &self.region, &request)?);
                    }
                    None => warn!("no exporter configured, `{}` not exported", entry.name),
                }
            }
            if let Some(render) = &op.render {
                match visualizer {
                    Some(visualizer) => {
                        let (min, max) = render.bounds.resolve(Some(&entry.statistics));
                        let style = LayerStyle {
                            name: render
                                .layer_name
                                .clone()
                                .unwrap_or_else(|| entry.name.clone()),
                            min,
                            max,
                            palette: render.palette.clone(),
                        };
                        entry.rendered = Some(visualizer.render_layer(raster, &style)?);
                    }
                    None => warn!("no visualizer configured, `{}` not rendered", entry.name),
                }
            }
        }

        Ok(output.report)
    }

    /// Everything between ingestion and the output adapters. No I/O.
    pub fn process(&self, scenes: &[RasterStack]) -> Result<PipelineOutput> {
        if scenes.is_empty() {
            return Err(Error::EmptyCollection);
        }
        let processor = ParallelProcessor::new(self.settings.workers);
        let calculators = self
            .operations
            .iter()
            .map(|op| op.index.calculator(&self.settings.bands))
            .collect::<Result<Vec<_>>>()?;

        let masked = match &self.settings.cloud_mask {
            Some(mask) => processor
                .map(scenes.iter().collect(), |s| mask.apply(s))
                .into_iter()
                .collect::<Result<Vec<_>>>()?,
            None => scenes.to_vec(),
        };

        let base = composite(&masked, self.settings.composite)?;
        let indices = match self.settings.order {
            ProcessingOrder::CompositeFirst => {
                processor.compute_indices(&base, &calculators, self.settings.reflectance_scale)?
            }
            ProcessingOrder::IndexFirst => {
                self.index_then_composite(&processor, &masked, &calculators)?
            }
        };

        let reducer = ZonalReducer::new(self.settings.inclusion);
        let reductions = processor
            .map(indices.iter().collect(), |raster| self.reduce(&reducer, raster))
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        let mut stack = base;
        for raster in &indices {
            stack = stack.append(raster)?;
        }

        let reports = calculators
            .iter()
            .zip(reductions)
            .map(|(calc, (statistics, histogram))| IndexReport {
                name: calc.name().to_string(),
                formula: calc.expression().formula.to_string(),
                statistics,
                histogram,
                exported: None,
                rendered: None,
            })
            .collect();

        info!(
            "processed {} scenes into {} index bands",
            scenes.len(),
            indices.len()
        );
        Ok(PipelineOutput {
            report: PipelineReport {
                scenes: scenes.len(),
                composite: stack.metadata(),
                indices: reports,
            },
            stack,
            indices,
        })
    }

    fn index_then_composite(
        &self,
        processor: &ParallelProcessor,
        scenes: &[RasterStack],
        calculators: &[Box<dyn IndexCalculator>],
    ) -> Result<Vec<BandRaster>> {
        let per_scene = scenes
            .iter()
            .map(|s| processor.compute_indices(s, calculators, self.settings.reflectance_scale))
            .collect::<Result<Vec<_>>>()?;

        calculators
            .iter()
            .enumerate()
            .map(|(i, calc)| {
                let stacks = per_scene
                    .iter()
                    .map(|rasters| rasters[i].to_stack())
                    .collect::<Result<Vec<_>>>()?;
                composite(&stacks, self.settings.composite)?.select(calc.name())
            })
            .collect()
    }

    fn reduce(
        &self,
        reducer: &ZonalReducer,
        raster: &BandRaster,
    ) -> Result<(ZonalStatistics, Option<Histogram>)> {
        let statistics =
            reducer.reduce(raster, raster.mask(), &self.region, &self.settings.percentiles)?;
        if statistics.is_empty() {
            return Ok((statistics, None));
        }
        let histogram = match self.settings.histogram {
            HistogramSettings::Fixed { bucket_width } => {
                Some(reducer.histogram(raster, raster.mask(), &self.region, bucket_width)?)
            }
            HistogramSettings::Auto {
                min_bucket_width,
                max_buckets,
            } => Some(reducer.auto_histogram(
                raster,
                raster.mask(),
                &self.region,
                min_bucket_width,
                max_buckets,
            )?),
            HistogramSettings::Disabled => None,
        };
        Ok((statistics, histogram))
    }
}
