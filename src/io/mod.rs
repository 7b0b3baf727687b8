// src/io/mod.rs
/// Seams between the pipeline and the outside world
///
/// The pipeline only talks to these traits. Ingestion yields in-memory
/// stacks, export and visualization receive finished rasters; none of the
/// core processing touches a file.
pub mod adapter;
pub mod catalog;
#[cfg(feature = "gdal")]
pub mod gdal_io;
pub mod reader;
pub mod render;
pub mod writer;

pub use adapter::{
    clip_to_region, DateRange, ExportFormat, ExportRequest, Exporter, ImageSource, LayerStyle,
    RasterEncoding, VisBounds, Visualizer,
};
pub use catalog::SceneCatalog;
pub use reader::{read_scene, read_scenes_parallel, Scene, SceneFile};
pub use render::{PngRenderer, Rgb};
pub use writer::{write_json, write_scene, ExportedRaster, JsonExporter};
