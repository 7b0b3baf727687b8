// src/lib.rs
pub mod batch;
pub mod cli;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod processing;
pub mod raster;
pub mod region;
pub mod utils;

pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineReport, PipelineSettings};
pub use raster::{BandRaster, RasterStack};
pub use region::{PixelInclusion, Region};

// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
