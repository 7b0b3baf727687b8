// src/cli.rs
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::processing::expression::Binding;
use crate::processing::indices::{savi::DEFAULT_SOIL_FACTOR, IndexSpec, SaviForm};
use crate::processing::CompositeMode;
use crate::region::PixelInclusion;

#[derive(Parser)]
#[command(name = "spectral-stats")]
#[command(about = "Spectral index band math, compositing and zonal statistics")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Worker threads for per-pixel work (default: all cores)
    #[arg(long, global = true)]
    pub threads: Option<usize>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a full pipeline described by a JSON config
    Batch {
        /// Pipeline configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Write the statistics report as JSON
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Composite scenes, compute one index and print its statistics
    Index {
        /// Scene files (JSON)
        #[arg(short, long = "scene", num_args = 1.., required_unless_present = "geotiffs")]
        scenes: Vec<PathBuf>,

        /// Single-band GeoTIFF as BAND=PATH (repeatable), read as one extra scene
        #[arg(long = "geotiff", value_parser = parse_band_path)]
        geotiffs: Vec<(String, PathBuf)>,

        /// Index preset over Sentinel-2 band names
        #[arg(short, long, value_enum, required_unless_present = "formula")]
        index: Option<IndexPreset>,

        /// Band-math formula, e.g. "(B8 - B4) / (B8 + B4)"
        #[arg(short, long, conflicts_with = "index")]
        formula: Option<String>,

        /// Output band name for --formula
        #[arg(short, long, default_value = "INDEX")]
        name: String,

        /// Formula binding NAME=BAND or NAME=NUMBER (repeatable)
        #[arg(long = "bind", value_parser = parse_binding)]
        bindings: Vec<(String, Binding)>,

        #[arg(long, value_enum, default_value_t = CompositeMode::Median)]
        composite: CompositeMode,

        #[arg(long, value_enum, default_value_t = PixelInclusion::Centroid)]
        inclusion: PixelInclusion,

        #[arg(long, value_delimiter = ',', default_values_t = [10.0, 25.0, 50.0, 75.0, 90.0])]
        percentiles: Vec<f64>,

        /// Histogram bucket width (no histogram when omitted)
        #[arg(long)]
        bucket_width: Option<f64>,

        /// Divide bands by this before indices with additive constants
        #[arg(long)]
        reflectance_scale: Option<f64>,

        /// Skip the SCL cloud mask
        #[arg(long)]
        no_cloud_mask: bool,
    },

    /// Print scene metadata
    Info {
        #[arg(short, long)]
        scene: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IndexPreset {
    /// (NIR - RED) / (NIR + RED)
    Ndvi,
    /// (GREEN - NIR) / (GREEN + NIR)
    Ndwi,
    /// (GREEN - SWIR) / (GREEN + SWIR)
    Mndwi,
    /// (SWIR - NIR) / (SWIR + NIR)
    Ndbi,
    /// Soil Adjusted Vegetation Index, L = 0.5
    Savi,
}

impl IndexPreset {
    pub fn spec(self) -> IndexSpec {
        match self {
            IndexPreset::Ndvi => IndexSpec::Ndvi,
            IndexPreset::Ndwi => IndexSpec::Ndwi,
            IndexPreset::Mndwi => IndexSpec::Mndwi,
            IndexPreset::Ndbi => IndexSpec::Ndbi,
            IndexPreset::Savi => IndexSpec::Savi {
                l: DEFAULT_SOIL_FACTOR,
                form: SaviForm::Standard,
            },
        }
    }
}

/// `NAME=VALUE`; numeric values bind constants, anything else a band name
pub fn parse_binding(s: &str) -> Result<(String, Binding), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{s}`"))?;
    let (name, value) = (name.trim(), value.trim());
    if name.is_empty() || value.is_empty() {
        return Err(format!("expected NAME=VALUE, got `{s}`"));
    }
    let binding = match value.parse::<f64>() {
        Ok(v) => Binding::Constant(v),
        Err(_) => Binding::Band(value.to_string()),
    };
    Ok((name.to_string(), binding))
}

/// `BAND=PATH`
pub fn parse_band_path(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((band, path)) if !band.trim().is_empty() && !path.trim().is_empty() => {
            Ok((band.trim().to_string(), PathBuf::from(path.trim())))
        }
        _ => Err(format!("expected BAND=PATH, got `{s}`")),
    }
}
